//! Content-addressed signature store.
//!
//! Objects live under `<base>/store/<b32[0:2]>/<b32[2:]>`, sharded across
//! the 1024 two-character base32 prefixes. Writes stage in `store/tmp/`,
//! fsync, then rename; the rename is the commit point, so readers never
//! observe partial files. Content addressing makes an already-present
//! destination a success, not a conflict.

use std::fs::{self, File, Permissions};
use std::io::{self, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use sigil_chain::{b32enc, signature, FrameStore, GENESIS, MAX_SIZE, SIGNATURE};
use sigil_crypto::digest;

pub const B32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// The 1024 shard directory names, in alphabet order (which is not ASCII
/// order: digits sort after letters here).
pub fn b32_names() -> impl Iterator<Item = String> {
    B32_ALPHABET.iter().flat_map(|a| {
        B32_ALPHABET
            .iter()
            .map(move |b| String::from_utf8(vec![*a, *b]).expect("ascii"))
    })
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object too large: {got} bytes")]
    TooLarge { got: usize },

    #[error("not a signed frame: {got} bytes")]
    Truncated { got: usize },

    #[error("cannot store empty content")]
    Empty,

    #[error("i/o: {0}")]
    Io(#[from] io::Error),
}

impl From<StoreError> for io::Error {
    fn from(err: StoreError) -> io::Error {
        match err {
            StoreError::Io(err) => err,
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}

/// Build `dir` with its 1024 shard subdirectories plus `tmp/`, staged in a
/// sibling scratch directory and committed by rename. Fails if `dir`
/// already exists non-empty.
pub fn create_subdirs(dir: &Path) -> Result<(), StoreError> {
    let staging = tempfile::Builder::new()
        .prefix(".staging.")
        .tempdir_in(dir.parent().unwrap_or_else(|| Path::new(".")))?;
    for name in b32_names() {
        fs::create_dir(staging.path().join(name))?;
    }
    fs::create_dir(staging.path().join("tmp"))?;
    let staged = staging.into_path();
    fs::rename(&staged, dir)?;
    Ok(())
}

/// Sharded store keyed by arbitrary bytes; callers derive the key.
pub struct B32Store {
    basedir: PathBuf,
}

impl B32Store {
    /// Handle to `<parent>/store` without touching the filesystem.
    pub fn new(parent: &Path) -> B32Store {
        B32Store {
            basedir: parent.join("store"),
        }
    }

    /// Create the on-disk layout, then return the handle.
    pub fn init(parent: &Path) -> Result<B32Store, StoreError> {
        let store = B32Store::new(parent);
        create_subdirs(&store.basedir)?;
        Ok(store)
    }

    /// Adopt an existing layout or create one; daemons restart, chains do not.
    pub fn open_or_init(parent: &Path) -> Result<B32Store, StoreError> {
        let store = B32Store::new(parent);
        if !store.basedir.is_dir() {
            create_subdirs(&store.basedir)?;
        }
        Ok(store)
    }

    pub fn basedir(&self) -> &Path {
        &self.basedir
    }

    fn tmpdir(&self) -> PathBuf {
        self.basedir.join("tmp")
    }

    pub fn path(&self, key: &[u8]) -> PathBuf {
        let b32 = b32enc(key);
        self.basedir.join(&b32[0..2]).join(&b32[2..])
    }

    /// Stage, chmod 0444, write, fsync, rename. Immutable after commit.
    pub fn write(&self, key: &[u8], content: &[u8]) -> Result<PathBuf, StoreError> {
        if content.is_empty() {
            return Err(StoreError::Empty);
        }
        if content.len() > MAX_SIZE {
            return Err(StoreError::TooLarge { got: content.len() });
        }
        let dst = self.path(key);
        if dst.exists() {
            // Same signature means same content; nothing to do.
            debug!(path = %dst.display(), "already stored");
            return Ok(dst);
        }
        let mut tmp = tempfile::Builder::new().tempfile_in(self.tmpdir())?;
        tmp.as_file()
            .set_permissions(Permissions::from_mode(0o444))?;
        tmp.write_all(content)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dst).map_err(|err| err.error)?;
        Ok(dst)
    }

    pub fn read(&self, key: &[u8]) -> Result<Vec<u8>, StoreError> {
        let mut content = Vec::with_capacity(MAX_SIZE);
        let n = File::open(self.path(key))?
            .take(MAX_SIZE as u64 + 1)
            .read_to_end(&mut content)?;
        if n > MAX_SIZE {
            return Err(StoreError::TooLarge { got: n });
        }
        Ok(content)
    }
}

/// Chain store: frames keyed by their own leading 64-byte signature.
pub struct ChainStore {
    store: B32Store,
}

impl ChainStore {
    pub fn new(parent: &Path) -> ChainStore {
        ChainStore {
            store: B32Store::new(parent),
        }
    }

    pub fn init(parent: &Path) -> Result<ChainStore, StoreError> {
        Ok(ChainStore {
            store: B32Store::init(parent)?,
        })
    }

    pub fn open_or_init(parent: &Path) -> Result<ChainStore, StoreError> {
        Ok(ChainStore {
            store: B32Store::open_or_init(parent)?,
        })
    }

    pub fn basedir(&self) -> &Path {
        self.store.basedir()
    }

    pub fn key(signed: &[u8]) -> &[u8] {
        signature(signed)
    }

    pub fn path(&self, signed: &[u8]) -> PathBuf {
        self.store.path(Self::key(signed))
    }

    pub fn write(&self, signed: &[u8]) -> Result<PathBuf, StoreError> {
        if signed.len() < GENESIS {
            return Err(StoreError::Truncated { got: signed.len() });
        }
        self.store.write(Self::key(signed), signed)
    }

    pub fn read(&self, sig: &[u8; SIGNATURE]) -> Result<Vec<u8>, StoreError> {
        self.store.read(sig)
    }

    /// Loader shape for chain traversal: absent frames are `None`, every
    /// other failure propagates.
    pub fn load(&self, sig: &[u8; SIGNATURE]) -> Result<Option<Vec<u8>>, io::Error> {
        match self.store.read(sig) {
            Ok(content) => Ok(Some(content)),
            Err(StoreError::Io(err)) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

impl FrameStore for ChainStore {
    fn append(&self, signed: &[u8]) -> io::Result<()> {
        self.write(signed)?;
        Ok(())
    }
}

/// Manifest store: externally supplied blobs keyed by their SHA-384.
pub struct ManifestStore {
    store: B32Store,
}

impl ManifestStore {
    pub fn new(parent: &Path) -> ManifestStore {
        ManifestStore {
            store: B32Store::new(parent),
        }
    }

    pub fn init(parent: &Path) -> Result<ManifestStore, StoreError> {
        Ok(ManifestStore {
            store: B32Store::init(parent)?,
        })
    }

    pub fn key(content: &[u8]) -> Result<[u8; 48], StoreError> {
        digest::sha384(content).map_err(|_| StoreError::Empty)
    }

    pub fn write(&self, content: &[u8]) -> Result<[u8; 48], StoreError> {
        let key = Self::key(content)?;
        self.store.write(&key, content)?;
        Ok(key)
    }

    pub fn read(&self, key: &[u8; 48]) -> Result<Vec<u8>, StoreError> {
        self.store.read(key)
    }
}

/// Write-to-tmp, fsync, rename. For small published files (the current
/// chain tip) whose readers must never see a partial write.
pub fn atomic_write(mode: u32, data: &[u8], path: &Path) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new().prefix(".atomic.").tempfile_in(dir)?;
    tmp.as_file().set_permissions(Permissions::from_mode(mode))?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}
