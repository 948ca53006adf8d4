// src/apex/bundle.rs

//! App-store bundle packaging
//!
//! The bundle re-packages the same payload in the module layout app stores
//! expect: the image under `base/apex/<arch>.img`, the manifest and payload
//! key under `base/root/`, and a `BundleConfig.pb.json` that keeps payloads
//! and manifests uncompressed.

use crate::apex::signing::stored;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use zip::ZipWriter;

pub const BUNDLE_CONFIG_ENTRY: &str = "BundleConfig.pb.json";

/// Bundle tool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleConfig {
    pub compression: Compression,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compression {
    pub uncompressed_glob: Vec<String>,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            compression: Compression {
                uncompressed_glob: vec![
                    "apex_payload.img".to_string(),
                    "apex_manifest.*".to_string(),
                ],
            },
        }
    }
}

/// Inputs to the bundle
#[derive(Debug, Clone)]
pub struct BundleContents<'a> {
    pub image: &'a Path,
    pub manifest_pb: &'a [u8],
    pub public_key: &'a [u8],
    pub arch: &'a str,
}

/// Write the bundle zip to `output`, returning the entry names in order
pub fn write_bundle(contents: &BundleContents<'_>, output: &Path) -> Result<Vec<String>> {
    let options = stored();
    let mut zip = ZipWriter::new(File::create(output)?);
    let mut names = Vec::new();

    let config = serde_json::to_string_pretty(&BundleConfig::default())?;
    zip.start_file(BUNDLE_CONFIG_ENTRY, options)?;
    zip.write_all(config.as_bytes())?;
    names.push(BUNDLE_CONFIG_ENTRY.to_string());

    let image_entry = format!("base/apex/{}.img", contents.arch);
    zip.start_file(image_entry.as_str(), options)?;
    io::copy(&mut File::open(contents.image)?, &mut zip)?;
    names.push(image_entry);

    zip.start_file("base/root/apex_manifest.pb", options)?;
    zip.write_all(contents.manifest_pb)?;
    names.push("base/root/apex_manifest.pb".to_string());

    zip.start_file("base/root/apex_pubkey", options)?;
    zip.write_all(contents.public_key)?;
    names.push("base/root/apex_pubkey".to_string());

    zip.finish()?;
    info!("Wrote bundle {} ({} entries)", output.display(), names.len());
    Ok(names)
}

/// Bundle path for a package
pub fn bundle_path(out_dir: &Path, name: &str) -> PathBuf {
    out_dir.join(format!("{}.aab", name))
}
