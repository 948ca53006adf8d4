// src/apex/manifest.rs
//! Package manifest (apex_manifest.json / apex_manifest.pb)
//!
//! The source manifest is JSON written by the package owner. The builder
//! injects the native library sets computed by the dependency walker and the
//! optional name override, then emits three forms: the full JSON, the
//! CBOR-encoded binary manifest read by the installer, and the stripped legacy
//! JSON for installers at the oldest supported SDK level.

use crate::apex::sdk::SdkVersion;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Current binary manifest format version
pub const FORMAT_VERSION: u8 = 1;

/// Keys understood by installers at the oldest supported SDK level
pub const LEGACY_KEYS: &[&str] = &[
    "name",
    "version",
    "versionName",
    "preInstallHook",
    "postInstallHook",
    "noCode",
];

/// Package manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApexManifest {
    pub name: String,

    pub version: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provide_native_libs: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub require_native_libs: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_install_hook: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_install_hook: Option<String>,

    /// Keys this builder does not interpret, carried through unchanged
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ApexManifest {
    /// Parse a source manifest
    ///
    /// Malformed JSON is a manifest error; a missing `name` or `version` is a
    /// configuration error naming the key.
    pub fn parse(source: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(source)
            .map_err(|e| Error::Manifest(format!("malformed source manifest: {}", e)))?;

        let Value::Object(object) = &value else {
            return Err(Error::Manifest(
                "source manifest must be a JSON object".to_string(),
            ));
        };
        for key in ["name", "version"] {
            if !object.contains_key(key) {
                return Err(Error::config(
                    format!("manifest.{}", key),
                    "required key is missing",
                ));
            }
        }

        serde_json::from_value(value)
            .map_err(|e| Error::Manifest(format!("invalid source manifest: {}", e)))
    }

    /// Replace the native library sets, keeping the manifest invariants
    ///
    /// Both sets end up sorted and deduplicated, and nothing the package
    /// provides is listed as required.
    pub fn set_native_libs(&mut self, provided: &[String], required: &[String]) {
        let provided: BTreeSet<String> = self
            .provide_native_libs
            .iter()
            .chain(provided)
            .cloned()
            .collect();
        let required: BTreeSet<String> = self
            .require_native_libs
            .iter()
            .chain(required)
            .filter(|lib| !provided.contains(*lib))
            .cloned()
            .collect();

        self.provide_native_libs = provided.into_iter().collect();
        self.require_native_libs = required.into_iter().collect();
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Serialize to the stripped legacy JSON
    pub fn to_legacy_json(&self) -> Result<String> {
        let Value::Object(full) = serde_json::to_value(self)? else {
            return Err(Error::Manifest("manifest did not serialize to an object".to_string()));
        };

        let legacy: Map<String, Value> = full
            .into_iter()
            .filter(|(key, _)| LEGACY_KEYS.contains(&key.as_str()))
            .collect();
        Ok(serde_json::to_string_pretty(&Value::Object(legacy))?)
    }

    /// Binary form of this manifest
    pub fn to_binary(&self) -> BinaryApexManifest {
        BinaryApexManifest {
            format_version: FORMAT_VERSION,
            name: self.name.clone(),
            version: self.version,
            version_name: self.version_name.clone(),
            provide_native_libs: self.provide_native_libs.clone(),
            require_native_libs: self.require_native_libs.clone(),
            pre_install_hook: self.pre_install_hook.clone(),
            post_install_hook: self.post_install_hook.clone(),
            no_code: self
                .extra
                .get("noCode")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }
    }
}

/// Binary manifest structure (CBOR-encoded)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryApexManifest {
    pub format_version: u8,
    pub name: String,
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_name: Option<String>,
    #[serde(default)]
    pub provide_native_libs: Vec<String>,
    #[serde(default)]
    pub require_native_libs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_install_hook: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_install_hook: Option<String>,
    #[serde(default)]
    pub no_code: bool,
}

impl BinaryApexManifest {
    /// Encode to CBOR bytes
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| Error::Manifest(format!("failed to encode binary manifest: {}", e)))?;
        Ok(buf)
    }

    /// Decode from CBOR bytes
    pub fn from_cbor(data: &[u8]) -> Result<Self> {
        ciborium::from_reader(data)
            .map_err(|e| Error::Manifest(format!("failed to decode binary manifest: {}", e)))
    }
}

/// Everything the manifest stage produces
#[derive(Debug, Clone)]
pub struct ManifestOutputs {
    pub manifest: ApexManifest,
    pub full_json: String,
    pub binary: Vec<u8>,
    /// Only for packages whose minimum SDK is the oldest supported level
    pub legacy_json: Option<String>,
}

/// Build the package manifest from its source and the walker results
pub fn build_manifest(
    source: &str,
    provided: &[String],
    required: &[String],
    name_override: Option<&str>,
    min_sdk: SdkVersion,
) -> Result<ManifestOutputs> {
    let mut manifest = ApexManifest::parse(source)?;

    if let Some(name) = name_override {
        debug!("Overriding manifest name {} -> {}", manifest.name, name);
        manifest.name = name.to_string();
    }
    manifest.set_native_libs(provided, required);

    let full_json = manifest.to_json()?;
    let binary = manifest.to_binary().to_cbor()?;
    let legacy_json = if min_sdk.is_oldest_supported() {
        Some(manifest.to_legacy_json()?)
    } else {
        None
    };

    Ok(ManifestOutputs {
        manifest,
        full_json,
        binary,
        legacy_json,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"{
        "name": "com.example.media",
        "version": 3,
        "versionName": "3.0",
        "postInstallHook": "bin/setup",
        "noCode": true,
        "jniLibs": ["libjni.so"]
    }"#;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_required_excludes_provided() {
        let out = build_manifest(
            SOURCE,
            &strings(&["libA"]),
            &strings(&["libA", "libB"]),
            None,
            SdkVersion::Current,
        )
        .unwrap();
        assert_eq!(out.manifest.provide_native_libs, vec!["libA"]);
        assert_eq!(out.manifest.require_native_libs, vec!["libB"]);
    }

    #[test]
    fn test_sets_sorted_and_deduplicated() {
        let out = build_manifest(
            SOURCE,
            &strings(&["libz.so", "liba.so", "libz.so"]),
            &strings(&["libm.so", "libc.so", "libm.so"]),
            None,
            SdkVersion::Current,
        )
        .unwrap();
        assert_eq!(out.manifest.provide_native_libs, vec!["liba.so", "libz.so"]);
        assert_eq!(out.manifest.require_native_libs, vec!["libc.so", "libm.so"]);
    }

    #[test]
    fn test_name_override_and_unknown_keys_kept() {
        let out = build_manifest(SOURCE, &[], &[], Some("com.example.other"), SdkVersion::Current)
            .unwrap();
        let json: Value = serde_json::from_str(&out.full_json).unwrap();
        assert_eq!(json["name"], "com.example.other");
        assert_eq!(json["jniLibs"][0], "libjni.so");
        assert!(out.legacy_json.is_none());
    }

    #[test]
    fn test_binary_roundtrip() {
        let out = build_manifest(SOURCE, &strings(&["libA"]), &[], None, SdkVersion::Level(30))
            .unwrap();
        let binary = BinaryApexManifest::from_cbor(&out.binary).unwrap();
        assert_eq!(binary.name, "com.example.media");
        assert_eq!(binary.version, 3);
        assert!(binary.no_code);
        assert_eq!(binary.provide_native_libs, vec!["libA"]);
    }

    #[test]
    fn test_legacy_only_at_oldest_sdk() {
        let out = build_manifest(
            SOURCE,
            &strings(&["libA"]),
            &strings(&["libB"]),
            None,
            SdkVersion::Level(29),
        )
        .unwrap();
        let legacy: Value = serde_json::from_str(out.legacy_json.as_deref().unwrap()).unwrap();
        let keys: Vec<&String> = legacy.as_object().unwrap().keys().collect();
        assert_eq!(
            keys,
            vec!["name", "noCode", "postInstallHook", "version", "versionName"]
        );
    }

    #[test]
    fn test_malformed_source() {
        let err = ApexManifest::parse("{ not json").unwrap_err();
        assert!(matches!(err, Error::Manifest(_)));
        let err = ApexManifest::parse("[1, 2]").unwrap_err();
        assert!(matches!(err, Error::Manifest(_)));
        let err = ApexManifest::parse(r#"{"name": "x", "version": "three"}"#).unwrap_err();
        assert!(matches!(err, Error::Manifest(_)));
    }

    #[test]
    fn test_missing_version_names_key() {
        let err = ApexManifest::parse(r#"{"name": "x"}"#).unwrap_err();
        assert!(matches!(err, Error::Config { ref property, .. } if property == "manifest.version"));
    }
}
