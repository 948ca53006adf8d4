// src/commands/keygen.rs
//! Signing key generation

use anyhow::{Context, Result};
use apexbuild::apex::SigningKeyPair;
use std::path::Path;

/// Generate an Ed25519 container signing key pair
pub fn cmd_keygen(output: &str, key_id: Option<String>, force: bool) -> Result<()> {
    let private_path = Path::new(output).with_extension("private");
    let public_path = Path::new(output).with_extension("public");

    if !force && (private_path.exists() || public_path.exists()) {
        anyhow::bail!(
            "Key files already exist. Use --force to overwrite.\n  Private: {}\n  Public: {}",
            private_path.display(),
            public_path.display()
        );
    }

    println!("Generating Ed25519 signing key pair...");

    let mut keypair = SigningKeyPair::generate();
    if let Some(id) = key_id {
        keypair = keypair.with_key_id(&id);
    }

    keypair
        .save_to_files(&private_path, &public_path)
        .context("Failed to save key files")?;

    println!();
    println!("Files created:");
    println!("  Private key: {} (keep this secret!)", private_path.display());
    println!("  Certificate: {}", public_path.display());
    println!();
    println!("Public key (base64):");
    println!("  {}", keypair.public_key_base64());
    println!();
    println!("Reference them from apex.toml:");
    println!("  certificate = \"{}\"", public_path.display());
    println!("  private_key = \"{}\"", private_path.display());

    Ok(())
}
