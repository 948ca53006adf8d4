// src/cli/mod.rs
//! CLI definitions for apexbuild
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.
//!
//! - `init` - Write a minimal apex.toml
//! - `build` - Run the full pipeline for one package
//! - `manifest` - Generate the manifest outputs only
//! - `deps` - Print the dependency-info report
//! - `validate` - Check a content listing against an allow-list
//! - `keygen` - Generate a container signing key pair
//! - `verify` - Check a signed package

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "apexbuild")]
#[command(author = "apexbuild contributors")]
#[command(version)]
#[command(about = "Assemble signed filesystem-image packages", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Report output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a minimal apex.toml
    Init {
        /// Package name
        name: String,

        /// Directory to write apex.toml into
        #[arg(default_value = ".")]
        path: String,

        /// Overwrite an existing apex.toml
        #[arg(long)]
        force: bool,
    },

    /// Build a package
    Build {
        /// Path to apex.toml or directory containing it
        #[arg(default_value = ".")]
        path: String,

        /// Output directory for the package and intermediate artifacts
        #[arg(short, long, default_value = "./out/apex")]
        output: String,

        /// Copy installable packages into this directory
        #[arg(long)]
        install_dir: Option<String>,

        /// Directory searched for external tools before PATH
        #[arg(long)]
        tool_dir: Option<String>,
    },

    /// Generate the manifest outputs without building an image
    Manifest {
        /// Path to apex.toml or directory containing it
        #[arg(default_value = ".")]
        path: String,

        /// Output directory
        #[arg(short, long, default_value = "./out/apex")]
        output: String,
    },

    /// Show the dependency-info report
    Deps {
        /// Path to apex.toml or directory containing it
        #[arg(default_value = ".")]
        path: String,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Check a content listing against an allow-list
    Validate {
        /// Content listing (content.txt from a build)
        content: String,

        /// Reviewed allow-list
        allow_list: String,
    },

    /// Generate an Ed25519 container signing key pair
    Keygen {
        /// Output path for key files (without extension)
        #[arg(short, long, default_value = "apex-container-key")]
        output: String,

        /// Key identifier (e.g., name or email)
        #[arg(long)]
        key_id: Option<String>,

        /// Overwrite existing key files
        #[arg(long)]
        force: bool,
    },

    /// Verify a signed package
    Verify {
        /// Path to the .apex package
        package: String,

        /// Require the package to be signed by this certificate
        #[arg(long)]
        certificate: Option<String>,

        /// Expected payload alignment in bytes
        #[arg(long, default_value_t = apexbuild::apex::signing::DEFAULT_ALIGNMENT)]
        alignment: u16,
    },
}
