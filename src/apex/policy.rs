// src/apex/policy.rs
//! Symlink-to-platform policy
//!
//! A package may ship a library that the platform already carries. When the
//! policy allows it, the image gets a symlink to the platform copy instead of
//! a second copy of the file. The decision is a trait so builds can swap in
//! their own rules.

use crate::apex::file_entry::FileEntry;

/// Decides whether an entry is replaced by a link to the platform copy
pub trait LinkPolicy {
    /// Policy name for logging
    fn name(&self) -> &str;

    fn should_link(&self, entry: &FileEntry) -> bool;
}

/// Default policy: link transitive, platform-available binaries and libraries
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformLinkPolicy {
    pub enabled: bool,
}

impl PlatformLinkPolicy {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl LinkPolicy for PlatformLinkPolicy {
    fn name(&self) -> &str {
        "platform-link"
    }

    fn should_link(&self, entry: &FileEntry) -> bool {
        self.enabled
            && entry.transitive
            && entry.available_to_platform
            && entry.class.is_platform_linkable()
    }
}

/// Never link; every entry is copied
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverLink;

impl LinkPolicy for NeverLink {
    fn name(&self) -> &str {
        "never"
    }

    fn should_link(&self, _entry: &FileEntry) -> bool {
        false
    }
}
