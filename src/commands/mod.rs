// src/commands/mod.rs
//! Command handlers for the apexbuild CLI

mod build;
mod inspect;
mod keygen;
mod verify;

pub use build::{cmd_build, cmd_init};
pub use inspect::{cmd_deps, cmd_manifest, cmd_validate};
pub use keygen::cmd_keygen;
pub use verify::cmd_verify;

use anyhow::Result;
use apexbuild::ModuleConfig;
use std::path::{Path, PathBuf};

/// Name of the module configuration file
pub const CONFIG_FILE: &str = "apex.toml";

/// Locate and load apex.toml, returning it with its directory
pub(crate) fn load_config(path: &str) -> Result<(ModuleConfig, PathBuf)> {
    let path = Path::new(path);
    let config_path = if path.is_dir() {
        path.join(CONFIG_FILE)
    } else {
        path.to_path_buf()
    };

    if !config_path.exists() {
        anyhow::bail!(
            "No {} found at {}. Run 'apexbuild init' first.",
            CONFIG_FILE,
            config_path.display()
        );
    }

    let config = ModuleConfig::from_file(&config_path)
        .map_err(|e| anyhow::anyhow!("Failed to load {}: {}", config_path.display(), e))?;
    let base_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    Ok((config, base_dir))
}
