// src/commands/build.rs
//! Package build commands

use super::{CONFIG_FILE, load_config};
use anyhow::{Context, Result};
use apexbuild::apex::{ApexBuilder, BuildResult, ProcessRunner};
use apexbuild::ModuleConfig;
use std::path::Path;
use tracing::info;

/// Write a minimal apex.toml
pub fn cmd_init(name: &str, path: &str, force: bool) -> Result<()> {
    let dir = Path::new(path);
    let config_path = dir.join(CONFIG_FILE);

    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists at {}. Use --force to overwrite.",
            CONFIG_FILE,
            config_path.display()
        );
    }

    let config = ModuleConfig::new_minimal(name);
    let toml = config.to_toml().context("Failed to serialize apex.toml")?;
    std::fs::create_dir_all(dir).context("Failed to create directory")?;
    std::fs::write(&config_path, toml).context("Failed to write apex.toml")?;

    println!("Created {}", config_path.display());
    println!();
    println!("Next steps:");
    println!("  1. Add payload files, keys and dependencies to apex.toml");
    println!("  2. Run 'apexbuild build' to assemble the package");

    Ok(())
}

/// Build a package
pub fn cmd_build(
    path: &str,
    output: &str,
    install_dir: Option<&str>,
    tool_dir: Option<&str>,
) -> Result<()> {
    let (config, base_dir) = load_config(path)?;
    println!("Building {}", config.apex.name);

    let mut runner = ProcessRunner::new();
    if let Some(dir) = tool_dir {
        runner = runner.with_tool_dir(Path::new(dir));
    }

    let mut builder = ApexBuilder::new(config, &base_dir).with_runner(runner);
    if let Some(dir) = install_dir {
        builder = builder.with_install_dir(Path::new(dir));
    }

    let result = builder.build(Path::new(output))?;
    info!("Pipeline finished at stage {}", result.stage);
    print_build_summary(&result);

    Ok(())
}

fn print_build_summary(result: &BuildResult) {
    let artifacts = &result.artifacts;
    println!();
    println!("Package: {}", result.manifest.manifest.name);
    println!("  Version: {}", result.manifest.manifest.version);
    println!("  Entries: {}", result.content.entries.len());
    println!(
        "  Provides: {}",
        join_or_none(&result.manifest.manifest.provide_native_libs)
    );
    println!(
        "  Requires: {}",
        join_or_none(&result.manifest.manifest.require_native_libs)
    );
    println!("  Payload offset: {}", result.package.payload_offset);
    println!("  Signed: {}", if result.package.signed { "yes" } else { "NO (test only)" });
    println!();
    println!("Created:");
    println!("  {}", artifacts.package.display());
    println!("  {}", artifacts.bundle.display());
    if let Some(installed) = &result.installed {
        println!("Installed: {}", installed.display());
    }
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}
