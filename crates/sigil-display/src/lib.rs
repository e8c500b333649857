//! Operator-facing rendering of the signer's chain tip.
//!
//! A screen is four 20-character rows; a sequence is an ordered list of
//! screens cycled with a fixed dwell. Rows that show the clock or the
//! entropy pool are live cells, evaluated at render time, so the time keeps
//! moving even while the sequence itself is static.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::warn;

use sigil_chain::{b32enc, counter, pubkey, signature, FrameKind};

pub mod lcd;

pub use lcd::{Hd44780, Lcd, LcdBus, MemoryLcd, NullLcd};

#[cfg(target_os = "linux")]
mod i2c;
#[cfg(target_os = "linux")]
pub use i2c::LinuxI2c;

pub const COLS: usize = 20;
pub const ROWS: usize = 4;

/// Dwell per screen while cycling; single-screen sequences refresh faster
/// so the clock row stays current.
pub const DWELL_SINGLE: Duration = Duration::from_secs(1);
pub const DWELL_MULTI: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("bad tail length {got}")]
    BadTailLength { got: usize },

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// One display row: baked text, or a live cell re-read every frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Row {
    Text([u8; COLS]),
    Clock,
    Entropy,
}

pub type Screen = [Row; ROWS];
pub type Sequence = Vec<Screen>;
pub type Rendered = [[u8; COLS]; ROWS];

impl Row {
    pub fn render(&self) -> [u8; COLS] {
        match self {
            Row::Text(text) => *text,
            Row::Clock => u64_line(unix_time()),
            Row::Entropy => u64_line(entropy_avail()),
        }
    }
}

pub fn render_screen(screen: &Screen) -> Rendered {
    [
        screen[0].render(),
        screen[1].render(),
        screen[2].render(),
        screen[3].render(),
    ]
}

fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Bits left in the kernel entropy pool; 0 when unreadable.
pub fn entropy_avail() -> u64 {
    fs::read_to_string("/proc/sys/kernel/random/entropy_avail")
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

fn ascii_row(text: &str) -> [u8; COLS] {
    debug_assert!(text.len() <= COLS && text.is_ascii());
    let mut row = [b' '; COLS];
    row[..text.len()].copy_from_slice(text.as_bytes());
    row
}

/// Left-justified label row.
fn label_line(text: &str) -> Row {
    Row::Text(ascii_row(text))
}

/// Centered heading row, extra space on the right.
fn center_line(text: &str) -> Row {
    let pad = (COLS - text.len()) / 2;
    let mut row = [b' '; COLS];
    row[pad..pad + text.len()].copy_from_slice(text.as_bytes());
    Row::Text(row)
}

/// Right-justified u64, the full 20 columns.
pub fn u64_line(value: u64) -> [u8; COLS] {
    let text = value.to_string();
    let mut row = [b' '; COLS];
    row[COLS - text.len()..].copy_from_slice(text.as_bytes());
    row
}

fn status_screen() -> Screen {
    [
        label_line("Unix Time:"),
        Row::Clock,
        label_line("Entropy Available:"),
        Row::Entropy,
    ]
}

fn error_screen() -> Screen {
    [
        center_line("SIGNER OFFLINE"),
        label_line("Unix Time:"),
        Row::Clock,
        label_line(""),
    ]
}

fn time_and_counter_screen(value: u64) -> Screen {
    [
        label_line("Unix Time:"),
        Row::Clock,
        label_line("Counter:"),
        Row::Text(u64_line(value)),
    ]
}

fn pubkey_screen(key: &[u8]) -> Screen {
    debug_assert_eq!(key.len(), 32);
    let b32 = b32enc(key);
    [
        center_line("Public Key:"),
        label_line(&b32[0..20]),
        label_line(&b32[20..40]),
        label_line(&b32[40..52]),
    ]
}

/// A 64-byte signature encodes to 103 base32 chars, split over two screens
/// of three rows each.
fn signature_screens(sig: &[u8], template: &str) -> [Screen; 2] {
    debug_assert_eq!(sig.len(), 64);
    let b32 = b32enc(sig);
    [
        [
            center_line(&format!("{template}.0:")),
            label_line(&b32[0..20]),
            label_line(&b32[20..40]),
            label_line(&b32[40..60]),
        ],
        [
            center_line(&format!("{template}.1:")),
            label_line(&b32[60..80]),
            label_line(&b32[80..100]),
            label_line(&b32[100..103]),
        ],
    ]
}

pub fn status_sequence() -> Sequence {
    vec![status_screen()]
}

pub fn error_sequence() -> Sequence {
    vec![error_screen()]
}

fn genesis_sequence(tail: &[u8]) -> Sequence {
    let [s1, s2] = signature_screens(signature(tail), "Genesis");
    vec![status_screen(), pubkey_screen(pubkey(tail)), s1, s2]
}

fn active_sequence(tail: &[u8]) -> Sequence {
    let [s1, s2] = signature_screens(signature(tail), "Tail");
    vec![
        time_and_counter_screen(counter(tail)),
        pubkey_screen(pubkey(tail)),
        s1,
        s2,
    ]
}

/// A genesis tip or an active one; a bare request is never a tip.
pub fn tail_to_sequence(tail: &[u8]) -> Result<Sequence, DisplayError> {
    match FrameKind::from_len(tail.len()) {
        Some(FrameKind::Genesis) => Ok(genesis_sequence(tail)),
        Some(FrameKind::Response) => Ok(active_sequence(tail)),
        _ => Err(DisplayError::BadTailLength { got: tail.len() }),
    }
}

pub fn dwell(sequence: &Sequence) -> Duration {
    if sequence.len() < 2 {
        DWELL_SINGLE
    } else {
        DWELL_MULTI
    }
}

/// Render one pass over a sequence.
pub fn render_sequence<L: Lcd>(
    lcd: &mut L,
    sequence: &Sequence,
    dwell: Duration,
) -> Result<(), DisplayError> {
    for screen in sequence {
        lcd.show(&render_screen(screen))?;
        if !dwell.is_zero() {
            thread::sleep(dwell);
        }
    }
    Ok(())
}

/// The current-sequence cell shared between the update paths (IPC push,
/// tail-file poll) and the cycling worker.
pub struct Manager {
    current: Mutex<Sequence>,
    last_tip: Mutex<Option<Vec<u8>>>,
}

impl Manager {
    pub fn new() -> Arc<Manager> {
        Arc::new(Manager {
            current: Mutex::new(status_sequence()),
            last_tip: Mutex::new(None),
        })
    }

    pub fn sequence(&self) -> Sequence {
        self.current.lock().expect("display lock").clone()
    }

    /// Replace the sequence when the tip actually changed; repeated pushes
    /// of the same tail coalesce to nothing.
    pub fn update_tip(&self, tail: &[u8]) {
        {
            let mut last = self.last_tip.lock().expect("display lock");
            if last.as_deref() == Some(tail) {
                return;
            }
            match tail_to_sequence(tail) {
                Ok(sequence) => {
                    *self.current.lock().expect("display lock") = sequence;
                    *last = Some(tail.to_vec());
                }
                Err(err) => warn!(error = %err, "dropping bad tip"),
            }
        }
    }

    pub fn show_error(&self) {
        *self.last_tip.lock().expect("display lock") = None;
        *self.current.lock().expect("display lock") = error_sequence();
    }

    /// File-poll path: absent or empty means the signer is not publishing.
    pub fn poll_tail_file(&self, path: &Path) {
        match fs::read(path) {
            Ok(tail) if !tail.is_empty() => self.update_tip(&tail),
            _ => self.show_error(),
        }
    }

    /// Background cadence producer: cycles the current sequence forever.
    pub fn spawn_worker<L>(self: &Arc<Self>, mut lcd: L) -> JoinHandle<()>
    where
        L: Lcd + Send + 'static,
    {
        let manager = Arc::clone(self);
        thread::spawn(move || loop {
            let sequence = manager.sequence();
            if let Err(err) = render_sequence(&mut lcd, &sequence, dwell(&sequence)) {
                warn!(error = %err, "lcd write failed");
                thread::sleep(DWELL_SINGLE);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigil_chain::Signer;

    fn row_text(row: &Row) -> String {
        String::from_utf8(row.render().to_vec()).unwrap()
    }

    #[test]
    fn u64_line_is_right_justified() {
        assert_eq!(&u64_line(0), b"                   0");
        assert_eq!(&u64_line(u64::MAX), b"18446744073709551615");
        assert_eq!(&u64_line(42)[18..], b"42");
    }

    #[test]
    fn pubkey_screen_layout() {
        let screen = pubkey_screen(&[0u8; 32]);
        assert_eq!(row_text(&screen[0]), "    Public Key:     ");
        assert_eq!(row_text(&screen[1]), "AAAAAAAAAAAAAAAAAAAA");
        assert_eq!(row_text(&screen[2]), "AAAAAAAAAAAAAAAAAAAA");
        assert_eq!(row_text(&screen[3]), "AAAAAAAAAAAA        ");

        let screen = pubkey_screen(&[0xff; 32]);
        assert_eq!(row_text(&screen[1]), "77777777777777777777");
        assert_eq!(row_text(&screen[3]), "77777777777Q        ");
    }

    #[test]
    fn signature_screens_layout() {
        let mut sig = vec![0u8; 32];
        sig.extend_from_slice(&[0xff; 32]);
        let [s1, s2] = signature_screens(&sig, "Tail");
        assert_eq!(row_text(&s1[0]), "      Tail.0:       ");
        assert_eq!(row_text(&s1[1]), "AAAAAAAAAAAAAAAAAAAA");
        assert_eq!(row_text(&s1[2]), "AAAAAAAAAAAAAAAAAAAA");
        assert_eq!(row_text(&s1[3]), "AAAAAAAAAAAP77777777");
        assert_eq!(row_text(&s2[0]), "      Tail.1:       ");
        assert_eq!(row_text(&s2[1]), "77777777777777777777");
        assert_eq!(row_text(&s2[2]), "77777777777777777777");
        assert_eq!(row_text(&s2[3]), "77Y                 ");

        let mut sig = vec![0xffu8; 32];
        sig.extend_from_slice(&[0; 32]);
        let [s1, s2] = signature_screens(&sig, "Genesis");
        assert_eq!(row_text(&s1[0]), "     Genesis.0:     ");
        assert_eq!(row_text(&s1[3]), "77777777777QAAAAAAAA");
        assert_eq!(row_text(&s2[0]), "     Genesis.1:     ");
        assert_eq!(row_text(&s2[3]), "AAA                 ");
    }

    #[test]
    fn sequences_by_tail_length() {
        let mut signer = Signer::new();
        let genesis = signer.genesis().to_vec();
        let seq = tail_to_sequence(&genesis).unwrap();
        assert_eq!(seq.len(), 4);
        // Status screen first, no counter row
        assert_eq!(seq[0], status_screen());

        let tip = signer.sign(7, &[1u8; 224]).unwrap();
        let seq = tail_to_sequence(&tip).unwrap();
        assert_eq!(seq.len(), 4);
        assert_eq!(seq[0][3], Row::Text(u64_line(1)));

        assert!(matches!(
            tail_to_sequence(&[0u8; 224]),
            Err(DisplayError::BadTailLength { got: 224 })
        ));
    }

    #[test]
    fn dwell_depends_on_sequence_length() {
        assert_eq!(dwell(&status_sequence()), DWELL_SINGLE);
        let mut signer = Signer::new();
        let tip = signer.sign(1, &[0u8; 224]).unwrap();
        assert_eq!(dwell(&tail_to_sequence(&tip).unwrap()), DWELL_MULTI);
    }

    #[test]
    fn manager_coalesces_repeat_tips() {
        let manager = Manager::new();
        assert_eq!(manager.sequence(), status_sequence());

        let mut signer = Signer::new();
        let tip = signer.sign(3, &[5u8; 224]).unwrap();
        manager.update_tip(&tip);
        let after_first = manager.sequence();
        assert_ne!(after_first, status_sequence());

        manager.update_tip(&tip);
        assert_eq!(manager.sequence(), after_first);

        // Garbage is dropped without disturbing the shown sequence
        manager.update_tip(&[0u8; 10]);
        assert_eq!(manager.sequence(), after_first);

        let tip2 = signer.sign(4, &[6u8; 224]).unwrap();
        manager.update_tip(&tip2);
        assert_ne!(manager.sequence(), after_first);
    }

    #[test]
    fn manager_polls_tail_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tail");

        let manager = Manager::new();
        manager.poll_tail_file(&path);
        assert_eq!(manager.sequence(), error_sequence());

        let mut signer = Signer::new();
        std::fs::write(&path, signer.genesis()).unwrap();
        manager.poll_tail_file(&path);
        assert_eq!(manager.sequence(), tail_to_sequence(signer.genesis()).unwrap());

        let tip = signer.sign(2, &[1u8; 224]).unwrap();
        std::fs::write(&path, &tip).unwrap();
        manager.poll_tail_file(&path);
        assert_eq!(manager.sequence(), tail_to_sequence(&tip).unwrap());

        std::fs::write(&path, b"").unwrap();
        manager.poll_tail_file(&path);
        assert_eq!(manager.sequence(), error_sequence());
    }

    #[test]
    fn render_pass_hits_every_screen() {
        let mut lcd = MemoryLcd::new();
        let mut signer = Signer::new();
        let tip = signer.sign(9, &[2u8; 224]).unwrap();
        let sequence = tail_to_sequence(&tip).unwrap();
        render_sequence(&mut lcd, &sequence, Duration::ZERO).unwrap();
        assert_eq!(lcd.frames().len(), 4);
        assert_eq!(lcd.frames()[1][0], ascii_row("    Public Key:     "));
    }
}
