// src/commands/verify.rs
//! Signed package verification

use anyhow::{Context, Result};
use apexbuild::apex::signing::{load_public_key, verify_signed_package};
use std::path::Path;

/// Verify a signed package
pub fn cmd_verify(package: &str, certificate: Option<&str>, alignment: u16) -> Result<()> {
    let path = Path::new(package);
    if !path.exists() {
        anyhow::bail!("Package not found: {}", package);
    }

    let trusted = certificate
        .map(|c| load_public_key(Path::new(c)))
        .transpose()
        .context("Failed to load certificate")?;

    println!("Verifying: {}", path.display());
    let report = verify_signed_package(path, alignment, trusted.as_ref())?;

    println!();
    println!("  Signature: valid");
    println!("  Key ID: {}", report.key_id.as_deref().unwrap_or("(none)"));
    println!("  Public key: {}", report.public_key);
    if let Some(ts) = &report.timestamp {
        println!("  Signed at: {}", ts);
    }
    println!("  Payload offset: {} ({}-byte aligned)", report.payload_offset, alignment);
    println!("  Entries:");
    for (name, digest) in &report.entries {
        println!("    {}  {}", digest, name);
    }

    Ok(())
}
