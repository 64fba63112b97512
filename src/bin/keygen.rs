//! secp256k1 payer key generator for a2a-agent.
//!
//! This utility generates a new payer key and outputs:
//! - The payer address (fund it with the payment asset)
//! - The private key saved to a file (pass it via `A2A_PRIVATE_KEY`)
//!
//! Usage:
//!   cargo run --bin a2a-keygen [output-dir]

use alloy::signers::local::PrivateKeySigner;
use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    println!("Payer key generator for a2a-agent\n");

    // Get output directory from args or use current directory
    let output_dir = match env::args().nth(1) {
        Some(dir) => PathBuf::from(dir),
        None => env::current_dir()?,
    };
    fs::create_dir_all(&output_dir)?;

    let signer = PrivateKeySigner::random();
    let address = signer.address();
    let secret = format!("0x{}", hex::encode(signer.to_bytes()));

    let key_path = output_dir.join("payer-key.secret");
    let mut file = match create_secret_file(&key_path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            color_eyre::eyre::bail!(
                "{} already exists; refusing to overwrite a key",
                key_path.display()
            );
        }
        Err(e) => return Err(e.into()),
    };
    file.write_all(secret.as_bytes())?;
    file.sync_all()?;

    println!("Address: {}", address.to_checksum(None));
    println!("\nPrivate key saved to: {}", key_path.display());
    println!("  WARNING: Keep this file secure! Anyone holding it can sign payments.");
    println!("\nUse it with:");
    println!("  export A2A_PRIVATE_KEY=$(cat {})", key_path.display());
    println!(
        "\nGenerated: {}",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    );

    Ok(())
}

/// Create `path` exclusively; on Unix it is owner-only from the start.
fn create_secret_file(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}
