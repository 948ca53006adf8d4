// src/commands/inspect.rs
//! Manifest, dependency and allow-list commands

use super::load_config;
use crate::cli::OutputFormat;
use anyhow::{Context, Result};
use apexbuild::apex::validate::validate_content_files;
use apexbuild::apex::ApexBuilder;
use std::path::Path;

/// Generate the manifest outputs only
pub fn cmd_manifest(path: &str, output: &str) -> Result<()> {
    let (config, base_dir) = load_config(path)?;
    let builder = ApexBuilder::new(config, &base_dir);

    let content = builder.collect_content()?;
    let outputs = builder.prepare_manifest(&content)?;

    let out = Path::new(output);
    std::fs::create_dir_all(out).context("Failed to create output directory")?;
    std::fs::write(out.join("apex_manifest.json"), &outputs.full_json)?;
    std::fs::write(out.join("apex_manifest.pb"), &outputs.binary)?;
    if let Some(legacy) = &outputs.legacy_json {
        std::fs::write(out.join("apex_manifest_legacy.json"), legacy)?;
    }

    println!("{}", outputs.full_json);
    Ok(())
}

/// Print the dependency-info report
pub fn cmd_deps(path: &str, format: OutputFormat) -> Result<()> {
    let (config, base_dir) = load_config(path)?;
    let content = ApexBuilder::new(config, &base_dir).collect_content()?;

    match format {
        OutputFormat::Text => print!("{}", content.deps.to_text()),
        OutputFormat::Json => println!("{}", content.deps.to_json()?),
    }
    Ok(())
}

/// Check a content listing against an allow-list
pub fn cmd_validate(content: &str, allow_list: &str) -> Result<()> {
    validate_content_files(Path::new(content), Path::new(allow_list))?;
    println!("{} matches {}", content, allow_list);
    Ok(())
}
