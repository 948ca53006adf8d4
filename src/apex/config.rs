// src/apex/config.rs

//! Module configuration (apex.toml) parsing and data structures
//!
//! The configuration is read once at the start of assembly and never
//! mutated afterwards. Relative paths are resolved against the directory
//! holding the configuration file.

use crate::apex::file_entry::{parent_dir, FileClass, FileEntry};
use crate::apex::graph::{DependencyEdge, DependencyGraph, ModuleNode};
use crate::apex::sdk::SdkVersion;
use crate::apex::signing::DEFAULT_ALIGNMENT;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Root structure of apex.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub apex: ApexProperties,

    /// Modules the package can reach through its dependency graph
    #[serde(default)]
    pub modules: Vec<ModuleSpec>,
}

impl ModuleConfig {
    /// Load configuration from a file path
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self> {
        let config: ModuleConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate required properties and cross references
    pub fn validate(&self) -> Result<()> {
        if self.apex.name.trim().is_empty() {
            return Err(Error::config("apex.name", "must not be empty"));
        }
        if let Some(name) = &self.apex.apex_name
            && name.trim().is_empty()
        {
            return Err(Error::config("apex.apex_name", "must not be empty when set"));
        }
        if !self.apex.alignment.is_power_of_two() {
            return Err(Error::config(
                "apex.alignment",
                format!("{} is not a power of two", self.apex.alignment),
            ));
        }

        self.apex.min_sdk()?;

        let mut names = HashSet::new();
        names.insert(self.apex.name.as_str());
        for module in &self.modules {
            if module.name.trim().is_empty() {
                return Err(Error::config("modules.name", "must not be empty"));
            }
            if !names.insert(module.name.as_str()) {
                return Err(Error::config(
                    "modules.name",
                    format!("module '{}' is declared twice", module.name),
                ));
            }
        }

        let deps = self
            .apex
            .deps
            .iter()
            .map(|d| ("apex.deps", d))
            .chain(
                self.modules
                    .iter()
                    .flat_map(|m| m.deps.iter().map(|d| ("modules.deps", d))),
            );
        for (property, dep) in deps {
            if dep.name() == self.apex.name {
                return Err(Error::config(
                    property,
                    format!("'{}' is the package itself", dep.name()),
                ));
            }
            if !names.contains(dep.name()) {
                return Err(Error::config(
                    property,
                    format!("unknown module '{}'", dep.name()),
                ));
            }
        }

        Ok(())
    }

    /// Generate a minimal configuration for a new package
    pub fn new_minimal(name: &str) -> Self {
        ModuleConfig {
            apex: ApexProperties {
                name: name.to_string(),
                manifest: default_manifest(),
                apex_name: None,
                certificate: None,
                private_key: None,
                key: None,
                public_key: None,
                min_sdk_version: None,
                target_sdk_version: None,
                allowed_files: None,
                payload_fs_type: PayloadFsType::default(),
                link_to_platform: false,
                installable: true,
                no_hashtree: false,
                test_only_unsigned_payload: false,
                file_contexts: None,
                notice: None,
                alignment: DEFAULT_ALIGNMENT,
                arch: default_arch(),
                deps: Vec::new(),
                files: Vec::new(),
            },
            modules: Vec::new(),
        }
    }

    /// Serialize to TOML string
    pub fn to_toml(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Build the dependency graph rooted at the package module
    pub fn dependency_graph(&self) -> DependencyGraph {
        let mut graph = DependencyGraph::new();

        graph.add_node(ModuleNode {
            name: self.apex.name.clone(),
            native_libs: Vec::new(),
            notice: self.apex.notice.clone(),
            min_sdk_version: self.apex.min_sdk_version.clone(),
            available_to_platform: false,
            files: self.apex.files.clone(),
        });
        for dep in &self.apex.deps {
            graph.add_edge(dep.edge(&self.apex.name));
        }

        for module in &self.modules {
            graph.add_node(ModuleNode {
                name: module.name.clone(),
                native_libs: module.native_libs.clone(),
                notice: module.notice.clone(),
                min_sdk_version: module.min_sdk_version.clone(),
                available_to_platform: module.available_to_platform,
                files: module.files.clone(),
            });
            for dep in &module.deps {
                graph.add_edge(dep.edge(&module.name));
            }
        }

        graph
    }
}

/// Package-level properties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApexProperties {
    pub name: String,

    /// Source JSON manifest
    #[serde(default = "default_manifest")]
    pub manifest: PathBuf,

    /// Overrides the package name written into the manifest
    #[serde(default)]
    pub apex_name: Option<String>,

    /// Container signing certificate (public key file)
    #[serde(default)]
    pub certificate: Option<PathBuf>,

    /// Container signing private key
    #[serde(default)]
    pub private_key: Option<PathBuf>,

    /// Payload signing key handed to the image tool
    #[serde(default)]
    pub key: Option<PathBuf>,

    #[serde(default)]
    pub public_key: Option<PathBuf>,

    #[serde(default)]
    pub min_sdk_version: Option<String>,

    #[serde(default)]
    pub target_sdk_version: Option<String>,

    /// Reviewed allow-list of package contents
    #[serde(default)]
    pub allowed_files: Option<PathBuf>,

    #[serde(default)]
    pub payload_fs_type: PayloadFsType,

    /// Replace transitive platform-available libraries with links to the platform copy
    #[serde(default)]
    pub link_to_platform: bool,

    #[serde(default = "default_true")]
    pub installable: bool,

    /// Skip integrity-tree generation (image goes to a pre-verified partition)
    #[serde(default)]
    pub no_hashtree: bool,

    /// Package the payload without container signing. Tests only.
    #[serde(default)]
    pub test_only_unsigned_payload: bool,

    #[serde(default)]
    pub file_contexts: Option<PathBuf>,

    #[serde(default)]
    pub notice: Option<PathBuf>,

    /// Byte alignment of the payload inside the signed container
    #[serde(default = "default_alignment")]
    pub alignment: u16,

    /// Architecture name used inside the bundle
    #[serde(default = "default_arch")]
    pub arch: String,

    #[serde(default)]
    pub deps: Vec<DepSpec>,

    #[serde(default)]
    pub files: Vec<FileSpec>,
}

impl ApexProperties {
    /// Minimum SDK level (defaults to the in-development platform)
    pub fn min_sdk(&self) -> Result<SdkVersion> {
        match &self.min_sdk_version {
            Some(v) => v.parse(),
            None => Ok(SdkVersion::default()),
        }
    }

    /// Name the package is published under
    pub fn package_name(&self) -> &str {
        self.apex_name.as_deref().unwrap_or(&self.name)
    }
}

fn default_manifest() -> PathBuf {
    PathBuf::from("apex_manifest.json")
}

fn default_true() -> bool {
    true
}

fn default_alignment() -> u16 {
    DEFAULT_ALIGNMENT
}

fn default_arch() -> String {
    "arm64".to_string()
}

/// Filesystem type of the payload image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFsType {
    #[default]
    Ext4,
    F2fs,
    Erofs,
}

impl PayloadFsType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadFsType::Ext4 => "ext4",
            PayloadFsType::F2fs => "f2fs",
            PayloadFsType::Erofs => "erofs",
        }
    }
}

/// A module reachable from the package
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSpec {
    pub name: String,

    /// Native library names this module produces
    #[serde(default)]
    pub native_libs: Vec<String>,

    #[serde(default)]
    pub notice: Option<PathBuf>,

    #[serde(default)]
    pub min_sdk_version: Option<String>,

    /// The platform ships its own copy of this module
    #[serde(default)]
    pub available_to_platform: bool,

    #[serde(default)]
    pub deps: Vec<DepSpec>,

    #[serde(default)]
    pub files: Vec<FileSpec>,
}

/// A dependency declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DepSpec {
    /// Internal dependency by name
    Simple(String),
    Detailed {
        name: String,
        /// The dependency lives in another package or on the platform
        #[serde(default)]
        external: bool,
        #[serde(default)]
        tag: Option<String>,
    },
}

impl DepSpec {
    pub fn name(&self) -> &str {
        match self {
            DepSpec::Simple(name) => name,
            DepSpec::Detailed { name, .. } => name,
        }
    }

    pub fn is_external(&self) -> bool {
        match self {
            DepSpec::Simple(_) => false,
            DepSpec::Detailed { external, .. } => *external,
        }
    }

    fn edge(&self, from: &str) -> DependencyEdge {
        let tag = match self {
            DepSpec::Detailed { tag: Some(tag), .. } => tag.clone(),
            _ => "shared".to_string(),
        };
        DependencyEdge {
            from: from.to_string(),
            to: self.name().to_string(),
            external: self.is_external(),
            tag,
        }
    }
}

/// A payload file declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSpec {
    /// Built artifact, relative to the configuration directory
    pub src: PathBuf,

    /// Destination inside the package
    pub dest: String,

    pub class: FileClass,

    #[serde(default)]
    pub symlinks: Vec<String>,
}

impl FileSpec {
    /// Turn the declaration into a payload entry
    pub fn to_entry(&self, base_dir: &Path) -> Result<FileEntry> {
        let built_file = if self.src.is_absolute() {
            self.src.clone()
        } else {
            base_dir.join(&self.src)
        };
        FileEntry::new(
            built_file,
            &self.dest,
            parent_dir(&self.dest),
            self.class,
            self.symlinks.clone(),
        )
    }
}

/// Resolve a configured path against the configuration directory
pub fn resolve_path(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}
