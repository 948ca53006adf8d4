// src/apex/stage.rs

//! Pipeline stage tracking
//!
//! Assembly moves through a fixed sequence of stages. Each transition is one
//! step forward; skipping a stage or going back is an error.

use crate::error::{Error, Result};
use std::fmt;

/// Assembly stage of one package
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Stage {
    #[default]
    Unbuilt,
    ContentCollected,
    ManifestReady,
    ImageAssembled,
    ContentValidated,
    Signed,
}

impl Stage {
    /// The only stage this one may move to
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Unbuilt => Some(Stage::ContentCollected),
            Stage::ContentCollected => Some(Stage::ManifestReady),
            Stage::ManifestReady => Some(Stage::ImageAssembled),
            Stage::ImageAssembled => Some(Stage::ContentValidated),
            Stage::ContentValidated => Some(Stage::Signed),
            Stage::Signed => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Unbuilt => "unbuilt",
            Stage::ContentCollected => "content-collected",
            Stage::ManifestReady => "manifest-ready",
            Stage::ImageAssembled => "image-assembled",
            Stage::ContentValidated => "content-validated",
            Stage::Signed => "signed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One-way stage machine
#[derive(Debug, Default)]
pub struct StageTracker {
    current: Stage,
}

impl StageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Stage {
        self.current
    }

    /// Move to `to`, which must directly follow the current stage
    pub fn advance(&mut self, to: Stage) -> Result<()> {
        if self.current.next() != Some(to) {
            return Err(Error::InvalidTransition {
                from: self.current.to_string(),
                to: to.to_string(),
            });
        }
        self.current = to;
        Ok(())
    }
}
