// src/lib.rs

//! apexbuild: standalone package assembler
//!
//! Builds signed, self-contained filesystem-image packages from a declarative
//! module description and the build outputs it references.
//!
//! # Architecture
//!
//! - Dependency walker: collects payload files, notices and native libraries
//! - Manifest builder: injects provided/required libraries, emits JSON and CBOR
//! - Image assembler: stages files, writes the permission table, runs the image tool
//! - Content validator: compares the image listing against a reviewed allow-list
//! - Signer/bundler: Ed25519-signed aligned container plus app-store bundle

pub mod apex;
mod error;
pub mod hash;

pub use apex::{ApexBuilder, BuildResult, FileClass, FileEntry, ModuleConfig};
pub use error::{Error, Result};
