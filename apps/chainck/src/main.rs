//! Operator chain audit: walk a stored chain from its tail signature back
//! to the genesis, verifying every link.
//!
//! The two failure verdicts are deliberately distinct. An unused key whose
//! genesis was never published is routine after provisioning; a hole in a
//! chain that has been used means the evidence cannot be trusted and the
//! key must be rotated by hand.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::Parser;

use sigil_chain::{b32dec, verify_chain, ChainError, PUBKEY, SIGNATURE};
use sigil_store::ChainStore;

#[derive(Parser, Debug)]
#[command(name = "sigil-chainck", version, about = "Audit a stored signature chain")]
struct Cli {
    /// Base directory holding the store/ tree
    #[arg(long)]
    store: PathBuf,

    /// Tail signature to start from (base32, 103 chars)
    #[arg(long)]
    tail: String,

    /// Expected public key (base32, 52 chars)
    #[arg(long)]
    pubkey: String,
}

fn decode<const N: usize>(label: &str, text: &str) -> Result<[u8; N]> {
    let raw = b32dec(text.trim()).ok_or_else(|| anyhow!("{label}: invalid base32"))?;
    raw.as_slice()
        .try_into()
        .map_err(|_| anyhow!("{label}: need {N} bytes; got {}", raw.len()))
}

fn run(cli: &Cli) -> Result<Result<u64, ChainError>> {
    let tail: [u8; SIGNATURE] = decode("tail", &cli.tail)?;
    let pubkey: [u8; PUBKEY] = decode("pubkey", &cli.pubkey)?;
    let store = ChainStore::new(&cli.store);
    if !store.basedir().is_dir() {
        return Err(anyhow!("no store at {:?}", store.basedir()));
    }
    Ok(verify_chain(&tail, &pubkey, |sig| store.load(sig)))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli).context("chain audit") {
        Ok(Ok(nodes)) => {
            println!("verify ok: {nodes} nodes from tail to genesis");
            ExitCode::SUCCESS
        }
        Ok(Err(err @ ChainError::FreshKey { .. })) => {
            eprintln!("unused key: {err}");
            ExitCode::from(2)
        }
        Ok(Err(err @ ChainError::BrokenChain { .. })) => {
            eprintln!("UNTRUSTED: {err}; rotate the key");
            ExitCode::from(3)
        }
        Ok(Err(err)) => {
            eprintln!("verify failed: {err}");
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
