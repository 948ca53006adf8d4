// src/apex/mod.rs
//! Package assembly
//!
//! This module implements the package build pipeline:
//! - Module configuration (apex.toml)
//! - Payload file model and dependency graph walking
//! - Manifest generation (JSON, CBOR binary, legacy JSON)
//! - Staging recipe, permission table and image tool invocation
//! - Allow-list validation
//! - Container signing and bundle packaging

pub mod builder;
pub mod bundle;
pub mod config;
pub mod file_entry;
pub mod graph;
pub mod image;
pub mod manifest;
pub mod policy;
pub mod recipe;
pub mod sdk;
pub mod signing;
pub mod stage;
pub mod tool;
pub mod validate;

pub use builder::{ApexBuilder, BuildArtifacts, BuildResult, CollectedContent};
pub use config::{ApexProperties, DepSpec, FileSpec, ModuleConfig, ModuleSpec, PayloadFsType};
pub use file_entry::{FileClass, FileEntry, PermissionClass};
pub use graph::{DepInfo, DependencyEdge, DependencyGraph, DependencyReport, ModuleNode, NativeLibs};
pub use image::{AssembledImage, Classification, ImageAssembler, ImageOptions, PermissionTable};
pub use manifest::{ApexManifest, BinaryApexManifest, ManifestOutputs, build_manifest};
pub use policy::{LinkPolicy, NeverLink, PlatformLinkPolicy};
pub use recipe::{BuildRecipe, RecipeAction};
pub use sdk::SdkVersion;
pub use signing::{ContainerSigner, SignedPackage, SigningKeyPair, verify_signed_package};
pub use stage::{Stage, StageTracker};
pub use tool::{ProcessRunner, ToolInvocation, ToolOutput, ToolRunner};
pub use validate::validate_content;
