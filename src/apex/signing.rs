// src/apex/signing.rs
//! Container signing and verification
//!
//! The signed package is a zip container holding the manifests, the payload
//! public key, and the payload image stored uncompressed at an aligned offset
//! so the installer can mount it in place. `META-INF/SIGNATURE.json` carries
//! an Ed25519 signature over the SHA-256 digests of every other entry.

use crate::error::{Error, Result};
use crate::hash;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

/// Default payload alignment inside the container
pub const DEFAULT_ALIGNMENT: u16 = 4096;

pub const PAYLOAD_ENTRY: &str = "apex_payload.img";
pub const MANIFEST_PB_ENTRY: &str = "apex_manifest.pb";
pub const MANIFEST_JSON_ENTRY: &str = "apex_manifest.json";
pub const PUBKEY_ENTRY: &str = "apex_pubkey";
pub const SIGNATURE_ENTRY: &str = "META-INF/SIGNATURE.json";

const ALGORITHM: &str = "ed25519";

/// An Ed25519 signing key pair
pub struct SigningKeyPair {
    signing_key: SigningKey,
    key_id: Option<String>,
}

impl SigningKeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
            key_id: None,
        }
    }

    /// Set a human-readable key identifier
    pub fn with_key_id(mut self, id: &str) -> Self {
        self.key_id = Some(id.to_string());
        self
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn public_key_base64(&self) -> String {
        BASE64.encode(self.verifying_key().as_bytes())
    }

    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    /// Sign the canonical digest listing of a package
    pub fn sign(&self, digests: &BTreeMap<String, String>) -> PackageSignature {
        let signature = self.signing_key.sign(&signed_payload(digests));

        PackageSignature {
            algorithm: ALGORITHM.to_string(),
            signature: BASE64.encode(signature.to_bytes()),
            public_key: self.public_key_base64(),
            key_id: self.key_id.clone(),
            timestamp: Some(signature_timestamp()),
            digests: digests.clone(),
        }
    }

    /// Save the key pair to files (private and public)
    pub fn save_to_files(&self, private_path: &Path, public_path: &Path) -> Result<()> {
        let private_data = KeyFile {
            algorithm: ALGORITHM.to_string(),
            key: BASE64.encode(self.signing_key.to_bytes()),
            key_id: self.key_id.clone(),
        };
        fs::write(private_path, private_data.to_toml()?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(private_path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(private_path, perms)?;
        }

        let public_data = KeyFile {
            algorithm: ALGORITHM.to_string(),
            key: self.public_key_base64(),
            key_id: self.key_id.clone(),
        };
        fs::write(public_path, public_data.to_toml()?)?;

        Ok(())
    }

    /// Load a key pair from a private key file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let key_file = KeyFile::load(path)?;
        let key_array: [u8; 32] = decode_key(&key_file.key, path)?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&key_array),
            key_id: key_file.key_id,
        })
    }
}

/// Key file format
#[derive(Debug, Serialize, Deserialize)]
struct KeyFile {
    algorithm: String,
    key: String,
    #[serde(default)]
    key_id: Option<String>,
}

impl KeyFile {
    fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Signing(format!("failed to read key file {}: {}", path.display(), e))
        })?;
        let key_file: KeyFile = toml::from_str(&content).map_err(|e| {
            Error::Signing(format!("failed to parse key file {}: {}", path.display(), e))
        })?;
        if key_file.algorithm != ALGORITHM {
            return Err(Error::Signing(format!(
                "unsupported key algorithm: {}",
                key_file.algorithm
            )));
        }
        Ok(key_file)
    }

    fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Signing(e.to_string()))
    }
}

fn decode_key(encoded: &str, path: &Path) -> Result<[u8; 32]> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| Error::Signing(format!("invalid base64 in {}: {}", path.display(), e)))?;
    bytes
        .try_into()
        .map_err(|_| Error::Signing(format!("invalid key length in {}", path.display())))
}

/// Load a public key (certificate) file
pub fn load_public_key(path: &Path) -> Result<VerifyingKey> {
    let key_file = KeyFile::load(path)?;
    let bytes = decode_key(&key_file.key, path)?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| Error::Signing(format!("invalid public key {}: {}", path.display(), e)))
}

/// Signature data embedded in a signed package
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSignature {
    pub algorithm: String,
    /// Base64-encoded signature bytes
    pub signature: String,
    /// Base64-encoded public key
    pub public_key: String,
    #[serde(default)]
    pub key_id: Option<String>,
    /// RFC 3339
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Entry name -> SHA-256, for every other entry in the container
    pub digests: BTreeMap<String, String>,
}

/// Bytes covered by the signature: `name digest` lines in name order
fn signed_payload(digests: &BTreeMap<String, String>) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, digest) in digests {
        out.extend_from_slice(name.as_bytes());
        out.push(b' ');
        out.extend_from_slice(digest.as_bytes());
        out.push(b'\n');
    }
    out
}

/// Honors SOURCE_DATE_EPOCH so rebuilt packages are byte-identical
fn signature_timestamp() -> String {
    timestamp_from_epoch(std::env::var("SOURCE_DATE_EPOCH").ok().as_deref())
}

fn timestamp_from_epoch(epoch: Option<&str>) -> String {
    epoch
        .and_then(|s| s.trim().parse::<i64>().ok())
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(chrono::Utc::now)
        .to_rfc3339()
}

/// Inputs to the container
#[derive(Debug, Clone)]
pub struct PackageContents {
    pub image: PathBuf,
    pub manifest_pb: Vec<u8>,
    pub manifest_json: String,
    /// Payload public key shipped next to the image
    pub public_key: Vec<u8>,
}

/// A written container
#[derive(Debug, Clone)]
pub struct SignedPackage {
    pub path: PathBuf,
    /// Byte offset of the payload data in the container
    pub payload_offset: u64,
    pub digests: BTreeMap<String, String>,
    pub signed: bool,
}

/// Writes signed (or, for tests, unsigned) containers
pub struct ContainerSigner {
    key: Option<SigningKeyPair>,
    alignment: u16,
}

impl ContainerSigner {
    /// Load the container key pair; the certificate must match the private key
    pub fn from_key_files(certificate: &Path, private_key: &Path) -> Result<Self> {
        let key = SigningKeyPair::load_from_file(private_key)?;
        let certified = load_public_key(certificate)?;
        if certified != key.verifying_key() {
            return Err(Error::Signing(format!(
                "certificate {} does not match private key {}",
                certificate.display(),
                private_key.display()
            )));
        }
        Ok(Self::with_key(key))
    }

    pub fn with_key(key: SigningKeyPair) -> Self {
        Self {
            key: Some(key),
            alignment: DEFAULT_ALIGNMENT,
        }
    }

    /// Test-only: write the container without a signature
    pub fn unsigned() -> Self {
        Self {
            key: None,
            alignment: DEFAULT_ALIGNMENT,
        }
    }

    pub fn with_alignment(mut self, alignment: u16) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn is_signing(&self) -> bool {
        self.key.is_some()
    }

    /// Write the container to `output`
    pub fn sign(&self, contents: &PackageContents, output: &Path) -> Result<SignedPackage> {
        let mut digests = BTreeMap::new();
        digests.insert(
            MANIFEST_JSON_ENTRY.to_string(),
            hash::sha256(contents.manifest_json.as_bytes()),
        );
        digests.insert(MANIFEST_PB_ENTRY.to_string(), hash::sha256(&contents.manifest_pb));
        digests.insert(PUBKEY_ENTRY.to_string(), hash::sha256(&contents.public_key));
        digests.insert(PAYLOAD_ENTRY.to_string(), hash::sha256_file(&contents.image)?);

        let mut zip = ZipWriter::new(File::create(output)?);
        let options = stored();

        zip.start_file(MANIFEST_JSON_ENTRY, options)?;
        zip.write_all(contents.manifest_json.as_bytes())?;
        zip.start_file(MANIFEST_PB_ENTRY, options)?;
        zip.write_all(&contents.manifest_pb)?;
        zip.start_file(PUBKEY_ENTRY, options)?;
        zip.write_all(&contents.public_key)?;

        zip.start_file_aligned(PAYLOAD_ENTRY, options, self.alignment)?;
        let mut image = File::open(&contents.image)?;
        io::copy(&mut image, &mut zip)?;

        match &self.key {
            Some(key) => {
                let signature = key.sign(&digests);
                zip.start_file(SIGNATURE_ENTRY, options)?;
                zip.write_all(serde_json::to_string_pretty(&signature)?.as_bytes())?;
                info!(
                    "Signed {} with key {}",
                    output.display(),
                    key.key_id().unwrap_or("(unnamed)")
                );
            }
            None => warn!(
                "{} is NOT signed (test_only_unsigned_payload)",
                output.display()
            ),
        }
        zip.finish()?;

        let mut written = ZipArchive::new(File::open(output)?)?;
        let payload_offset = written.by_name(PAYLOAD_ENTRY)?.data_start();

        Ok(SignedPackage {
            path: output.to_path_buf(),
            payload_offset,
            digests,
            signed: self.key.is_some(),
        })
    }
}

/// Options shared by every container entry
pub(crate) fn stored() -> FileOptions {
    FileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644)
}

/// Outcome of checking a signed container
#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub key_id: Option<String>,
    pub public_key: String,
    pub timestamp: Option<String>,
    pub payload_offset: u64,
    pub entries: BTreeMap<String, String>,
}

/// Re-check digests, signature and payload alignment of a container
///
/// With `trusted` set, the signing key must also be that key.
pub fn verify_signed_package(
    path: &Path,
    alignment: u16,
    trusted: Option<&VerifyingKey>,
) -> Result<VerificationReport> {
    let mut archive = ZipArchive::new(File::open(path)?)?;

    let signature: PackageSignature = {
        let mut entry = archive
            .by_name(SIGNATURE_ENTRY)
            .map_err(|_| Error::Signing(format!("{} is not signed", path.display())))?;
        let mut raw = String::new();
        entry.read_to_string(&mut raw)?;
        serde_json::from_str(&raw)?
    };
    if signature.algorithm != ALGORITHM {
        return Err(Error::Signing(format!(
            "unsupported signature algorithm: {}",
            signature.algorithm
        )));
    }

    let mut entries = BTreeMap::new();
    let mut payload_offset = None;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        if name == SIGNATURE_ENTRY {
            continue;
        }
        if name == PAYLOAD_ENTRY {
            if entry.compression() != CompressionMethod::Stored {
                return Err(Error::Signing("payload must be stored uncompressed".to_string()));
            }
            payload_offset = Some(entry.data_start());
        }
        entries.insert(name, hash::sha256_reader(&mut entry)?);
    }

    let payload_offset = payload_offset
        .ok_or_else(|| Error::Signing(format!("{} has no {}", path.display(), PAYLOAD_ENTRY)))?;
    if alignment > 0 && payload_offset % u64::from(alignment) != 0 {
        return Err(Error::Signing(format!(
            "payload at offset {} is not {}-byte aligned",
            payload_offset, alignment
        )));
    }

    if entries != signature.digests {
        let changed: Vec<&str> = entries
            .keys()
            .chain(signature.digests.keys())
            .filter(|k| entries.get(*k) != signature.digests.get(*k))
            .map(String::as_str)
            .collect();
        return Err(Error::Signing(format!(
            "content does not match signature: {}",
            changed.join(", ")
        )));
    }

    let key_bytes: [u8; 32] = BASE64
        .decode(&signature.public_key)
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| Error::Signing("invalid public key in signature".to_string()))?;
    let key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| Error::Signing(format!("invalid public key in signature: {}", e)))?;
    if let Some(trusted) = trusted
        && *trusted != key
    {
        return Err(Error::Signing("package was signed by an untrusted key".to_string()));
    }

    let sig_bytes = BASE64
        .decode(&signature.signature)
        .map_err(|e| Error::Signing(format!("invalid signature encoding: {}", e)))?;
    let sig = Signature::from_slice(&sig_bytes)
        .map_err(|e| Error::Signing(format!("invalid signature: {}", e)))?;
    key.verify(&signed_payload(&signature.digests), &sig)
        .map_err(|e| Error::Signing(format!("signature verification failed: {}", e)))?;

    Ok(VerificationReport {
        key_id: signature.key_id,
        public_key: signature.public_key,
        timestamp: signature.timestamp,
        payload_offset,
        entries,
    })
}
