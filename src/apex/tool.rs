// src/apex/tool.rs

//! External tool invocations
//!
//! The image builder and friends are subprocess collaborators. The pipeline
//! only serializes their arguments and checks the exit status; how a tool is
//! actually run is behind [`ToolRunner`] so tests can substitute a fake.

use crate::error::{Error, Result};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Program name of the image builder
pub const IMAGE_TOOL: &str = "apexer";

/// A fully-serialized command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<OsString>,
}

impl ToolInvocation {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append `flag value`
    pub fn flag(self, flag: &str, value: impl Into<OsString>) -> Self {
        self.arg(flag).arg(value)
    }

    /// Append `flag value` when the value is present
    pub fn flag_opt(self, flag: &str, value: Option<impl Into<OsString>>) -> Self {
        match value {
            Some(v) => self.flag(flag, v),
            None => self,
        }
    }

    /// Append a bare switch when `on` is set
    pub fn switch(self, flag: &str, on: bool) -> Self {
        if on { self.arg(flag) } else { self }
    }

    /// Value following `flag`, if present
    pub fn value_of(&self, flag: &str) -> Option<&OsString> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Captured output of a successful tool run
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs external tools on behalf of the pipeline
pub trait ToolRunner {
    /// Run the invocation to completion.
    ///
    /// A non-zero exit must be reported as [`Error::ToolFailed`] carrying the
    /// captured output.
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput>;
}

/// Runs tools as child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    /// Directory searched before `PATH`
    tool_dir: Option<PathBuf>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look for tools in `dir` first
    pub fn with_tool_dir(mut self, dir: &Path) -> Self {
        self.tool_dir = Some(dir.to_path_buf());
        self
    }

    fn resolve(&self, program: &str) -> Result<PathBuf> {
        if let Some(dir) = &self.tool_dir {
            let candidate = dir.join(program);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        which::which(program).map_err(|e| Error::ToolFailed {
            tool: program.to_string(),
            status: "not found".to_string(),
            stdout: String::new(),
            stderr: e.to_string(),
        })
    }
}

impl ToolRunner for ProcessRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        let path = self.resolve(&invocation.program)?;
        info!("Running {}", invocation);

        let output = Command::new(&path)
            .args(&invocation.args)
            .output()
            .map_err(|e| Error::ToolFailed {
                tool: invocation.program.clone(),
                status: "could not start".to_string(),
                stdout: String::new(),
                stderr: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(Error::ToolFailed {
                tool: invocation.program.clone(),
                status: output.status.to_string(),
                stdout,
                stderr,
            });
        }

        debug!("{} finished: {} bytes of output", invocation.program, stdout.len());
        Ok(ToolOutput { stdout, stderr })
    }
}
