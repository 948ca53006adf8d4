// src/apex/file_entry.rs

//! Payload file model
//!
//! A [`FileEntry`] is one file destined for the package image: the built
//! artifact produced by an upstream rule, where it lands inside the package,
//! and how it must be treated when the image is staged.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Kind of payload file
///
/// Closed set; every consumer matches it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileClass {
    NativeSharedLib,
    Executable,
    Script,
    Etc,
    JavaSharedLib,
    /// A single application package, copied as-is
    App,
    /// An archive of application splits, extracted into its install directory
    AppSet,
}

impl FileClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileClass::NativeSharedLib => "native_shared_lib",
            FileClass::Executable => "executable",
            FileClass::Script => "script",
            FileClass::Etc => "etc",
            FileClass::JavaSharedLib => "java_shared_lib",
            FileClass::App => "app",
            FileClass::AppSet => "app_set",
        }
    }

    /// Permission class the image assembler applies to files of this kind
    pub fn permission(&self) -> PermissionClass {
        match self {
            FileClass::Executable | FileClass::Script => PermissionClass::Executable,
            FileClass::AppSet => PermissionClass::AppPackage,
            FileClass::NativeSharedLib
            | FileClass::Etc
            | FileClass::JavaSharedLib
            | FileClass::App => PermissionClass::ReadOnly,
        }
    }

    /// Whether the file may be replaced by a link to the platform's copy
    pub fn is_platform_linkable(&self) -> bool {
        matches!(self, FileClass::NativeSharedLib | FileClass::Executable)
    }
}

impl fmt::Display for FileClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Access class of a path inside the image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionClass {
    /// Default for everything not listed elsewhere
    ReadOnly,
    /// Binaries and the directories leading to them
    Executable,
    /// Contents extracted from an archive into a directory
    AppPackage,
}

/// One packaged file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    /// Built artifact on the host (read-only, owned by the producing module)
    pub built_file: PathBuf,
    /// Destination relative to the package root, e.g. `bin/foo`
    pub dest_path: String,
    /// Directory of `dest_path` inside the package (empty for the root)
    pub install_dir: String,
    pub class: FileClass,
    /// Alias names created next to the file, e.g. `foo` -> `bin/foo_alias`
    pub symlinks: Vec<String>,
    /// Module that produced the file
    pub module_name: String,
    /// Pulled in through another dependency rather than listed by the package
    pub transitive: bool,
    /// The platform ships its own copy of this module
    pub available_to_platform: bool,
    pub notice: Option<PathBuf>,
}

impl FileEntry {
    /// Create a payload entry.
    ///
    /// `install_dir` must be the directory part of `dest_path`. Paths must be
    /// relative, normalized and stay inside the package root.
    pub fn new(
        built_file: impl Into<PathBuf>,
        dest_path: &str,
        install_dir: &str,
        class: FileClass,
        symlinks: Vec<String>,
    ) -> Result<Self> {
        validate_package_path(dest_path)?;

        let expected_dir = parent_dir(dest_path);
        if install_dir != expected_dir {
            return Err(Error::InvalidPath {
                path: dest_path.to_string(),
                reason: format!(
                    "install directory '{}' does not contain it (expected '{}')",
                    install_dir, expected_dir
                ),
            });
        }

        if class == FileClass::AppSet && !symlinks.is_empty() {
            return Err(Error::InvalidPath {
                path: dest_path.to_string(),
                reason: "app-set archives are extracted and cannot have symlink aliases"
                    .to_string(),
            });
        }

        for alias in &symlinks {
            if alias.is_empty() || alias.contains('/') || alias == "." || alias == ".." {
                return Err(Error::InvalidPath {
                    path: alias.clone(),
                    reason: "symlink aliases must be plain file names".to_string(),
                });
            }
        }

        Ok(Self {
            built_file: built_file.into(),
            dest_path: dest_path.to_string(),
            install_dir: install_dir.to_string(),
            class,
            symlinks,
            module_name: String::new(),
            transitive: false,
            available_to_platform: false,
            notice: None,
        })
    }

    /// Create an entry, deriving the install directory from the destination
    pub fn at(built_file: impl Into<PathBuf>, dest_path: &str, class: FileClass) -> Result<Self> {
        validate_package_path(dest_path)?;
        let dir = parent_dir(dest_path).to_string();
        Self::new(built_file, dest_path, &dir, class, Vec::new())
    }

    pub fn with_module(mut self, name: &str) -> Self {
        self.module_name = name.to_string();
        self
    }

    pub fn with_transitive(mut self, transitive: bool) -> Self {
        self.transitive = transitive;
        self
    }

    pub fn with_available_to_platform(mut self, available: bool) -> Self {
        self.available_to_platform = available;
        self
    }

    pub fn with_notice(mut self, notice: Option<PathBuf>) -> Self {
        self.notice = notice;
        self
    }

    /// File name component of the destination
    pub fn file_name(&self) -> &str {
        self.dest_path
            .rsplit_once('/')
            .map(|(_, name)| name)
            .unwrap_or(&self.dest_path)
    }

    /// Destinations of the alias symlinks
    pub fn symlink_paths(&self) -> Vec<String> {
        self.symlinks.iter().map(|s| join_path(&self.install_dir, s)).collect()
    }

    /// Every path this entry creates inside the image (file first, then aliases)
    pub fn installed_paths(&self) -> Vec<String> {
        let mut paths = vec![self.dest_path.clone()];
        paths.extend(self.symlink_paths());
        paths
    }

    /// Ancestor directories of the destination, innermost first
    pub fn ancestor_dirs(&self) -> Vec<String> {
        let mut dirs = Vec::new();
        let mut dir = self.install_dir.as_str();
        while !dir.is_empty() {
            dirs.push(dir.to_string());
            dir = parent_dir(dir);
        }
        dirs
    }

    /// Path of the platform's copy of this file
    pub fn platform_path(&self) -> String {
        format!("/system/{}", self.dest_path)
    }
}

/// Check that a path is a normalized, relative path inside the package root
pub fn validate_package_path(path: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if path.is_empty() {
        return Err(invalid("path is empty"));
    }
    if Path::new(path).is_absolute() || path.starts_with('/') {
        return Err(invalid("path must be relative to the package root"));
    }
    for segment in path.split('/') {
        match segment {
            "" => return Err(invalid("path contains an empty segment")),
            "." | ".." => return Err(invalid("path must not contain '.' or '..' segments")),
            _ => {}
        }
    }
    Ok(())
}

/// Directory part of a package path (`""` for top-level files)
pub(crate) fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

pub(crate) fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}
