// src/apex/validate.rs
//! Content allow-list validation
//!
//! Packages with a reviewed allow-list fail the build when the assembled
//! image contains anything the list does not name. Missing entries are fine;
//! only additions need review.

use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

/// Parse an allow-list: one path per line, blank lines and `#` comments ignored
pub fn parse_allow_list(content: &str) -> BTreeSet<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Fail if `actual` contains entries that `allowed` does not
pub fn validate_content<'a, I>(actual: I, allowed: &BTreeSet<String>, remediation: &str) -> Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let unexpected: BTreeSet<&str> = actual
        .into_iter()
        .map(str::trim)
        .filter(|path| !path.is_empty() && !allowed.contains(*path))
        .collect();

    if unexpected.is_empty() {
        debug!("Content matches allow-list ({} entries)", allowed.len());
        return Ok(());
    }

    Err(Error::ContentViolation {
        unexpected: unexpected.into_iter().map(str::to_string).collect(),
        remediation: remediation.to_string(),
    })
}

/// Check a content manifest file against an allow-list file
pub fn validate_content_files(content_file: &Path, allow_list: &Path) -> Result<()> {
    info!(
        "Checking {} against {}",
        content_file.display(),
        allow_list.display()
    );
    let actual = std::fs::read_to_string(content_file)?;
    let allowed = parse_allow_list(&std::fs::read_to_string(allow_list)?);
    validate_content(
        actual.lines(),
        &allowed,
        &remediation_command(content_file, allow_list),
    )
}

/// Command that accepts the current content as the new allow-list
pub fn remediation_command(content_file: &Path, allow_list: &Path) -> String {
    format!("cp {} {}", content_file.display(), allow_list.display())
}
