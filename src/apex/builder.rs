// src/apex/builder.rs
//! Package build pipeline
//!
//! Drives one module through every stage: collect payload entries by walking
//! the dependency graph, build the manifest, assemble the image, check it
//! against the allow-list, then sign and bundle it. Intermediate artifacts are
//! written to the output directory so a failed build can be inspected.

use crate::apex::bundle::{BundleContents, bundle_path, write_bundle};
use crate::apex::config::{ModuleConfig, resolve_path};
use crate::apex::file_entry::FileEntry;
use crate::apex::graph::{DependencyReport, NativeLibs};
use crate::apex::image::{AssembledImage, ImageAssembler, ImageOptions};
use crate::apex::manifest::{ManifestOutputs, build_manifest};
use crate::apex::policy::{LinkPolicy, PlatformLinkPolicy};
use crate::apex::signing::{ContainerSigner, PackageContents, SignedPackage};
use crate::apex::stage::{Stage, StageTracker};
use crate::apex::tool::{ProcessRunner, ToolRunner};
use crate::apex::validate::validate_content_files;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const LEGACY_MANIFEST: &str = "apex_manifest_legacy.json";
pub const DEPS_INFO_TXT: &str = "deps-info.txt";
pub const DEPS_INFO_JSON: &str = "deps-info.json";
pub const NOTICE: &str = "NOTICE";
pub const INSTALLED_FILES: &str = "installed-files.txt";
const STAGING_DIR: &str = "staging";

/// Payload content gathered from the dependency graph
#[derive(Debug, Clone)]
pub struct CollectedContent {
    pub entries: Vec<FileEntry>,
    pub native_libs: NativeLibs,
    pub notices: Vec<PathBuf>,
    pub deps: DependencyReport,
}

/// Paths of everything a build wrote
#[derive(Debug, Clone)]
pub struct BuildArtifacts {
    pub manifest_json: PathBuf,
    pub manifest_pb: PathBuf,
    pub legacy_manifest: Option<PathBuf>,
    pub canned_fs_config: PathBuf,
    pub copy_commands: PathBuf,
    pub content: PathBuf,
    pub deps_info_txt: PathBuf,
    pub deps_info_json: PathBuf,
    pub notice: Option<PathBuf>,
    pub unsigned_image: PathBuf,
    pub package: PathBuf,
    pub bundle: PathBuf,
    pub installed_files: PathBuf,
}

/// Result of building a package
#[derive(Debug)]
pub struct BuildResult {
    pub name: String,
    pub stage: Stage,
    pub content: CollectedContent,
    pub manifest: ManifestOutputs,
    pub image: AssembledImage,
    pub package: SignedPackage,
    pub artifacts: BuildArtifacts,
    /// Where the package was installed, if it was
    pub installed: Option<PathBuf>,
}

/// Package builder
pub struct ApexBuilder {
    config: ModuleConfig,
    base_dir: PathBuf,
    runner: Box<dyn ToolRunner>,
    policy: Box<dyn LinkPolicy>,
    install_dir: Option<PathBuf>,
}

impl ApexBuilder {
    /// Create a builder; relative paths in `config` resolve against `base_dir`
    pub fn new(config: ModuleConfig, base_dir: &Path) -> Self {
        let policy = PlatformLinkPolicy::new(config.apex.link_to_platform);
        Self {
            config,
            base_dir: base_dir.to_path_buf(),
            runner: Box::new(ProcessRunner::new()),
            policy: Box::new(policy),
            install_dir: None,
        }
    }

    /// Run external tools through `runner`
    pub fn with_runner(mut self, runner: impl ToolRunner + 'static) -> Self {
        self.runner = Box::new(runner);
        self
    }

    /// Replace the symlink-to-platform policy
    pub fn with_policy(mut self, policy: impl LinkPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Copy installable packages into `dir` after signing
    pub fn with_install_dir(mut self, dir: &Path) -> Self {
        self.install_dir = Some(dir.to_path_buf());
        self
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    fn path(&self, path: &Path) -> PathBuf {
        resolve_path(&self.base_dir, path)
    }

    /// Walk the dependency graph and gather payload entries.
    ///
    /// The package's own files come first. Files of every internally reachable
    /// module follow; a module only reached through another dependency is
    /// marked transitive.
    pub fn collect_content(&self) -> Result<CollectedContent> {
        let apex = &self.config.apex;
        let root = apex.name.as_str();
        let graph = self.config.dependency_graph();

        // module -> reached only through other modules
        let mut reached: BTreeMap<String, bool> = BTreeMap::new();
        graph.walk(root, |from, to, edge| {
            if edge.external || to.name == root {
                return false;
            }
            let transitive = from.name != root;
            reached
                .entry(to.name.clone())
                .and_modify(|t| *t = *t && transitive)
                .or_insert(transitive);
            true
        })?;

        let mut entries = Vec::new();
        for spec in &apex.files {
            entries.push(
                spec.to_entry(&self.base_dir)?
                    .with_module(root)
                    .with_notice(apex.notice.as_ref().map(|n| self.path(n))),
            );
        }
        for (name, transitive) in &reached {
            let Some(node) = graph.get_node(name) else {
                continue;
            };
            for spec in &node.files {
                entries.push(
                    spec.to_entry(&self.base_dir)?
                        .with_module(name)
                        .with_transitive(*transitive)
                        .with_available_to_platform(node.available_to_platform)
                        .with_notice(node.notice.as_ref().map(|n| self.path(n))),
                );
            }
        }
        debug!("Collected {} payload entries from {} modules", entries.len(), reached.len() + 1);

        Ok(CollectedContent {
            entries,
            native_libs: graph.native_libs(root)?,
            notices: graph
                .collect_notices(root)?
                .into_iter()
                .map(|n| self.path(&n))
                .collect(),
            deps: graph.dependency_info(root)?,
        })
    }

    /// Build the manifest outputs for collected content
    pub fn prepare_manifest(&self, content: &CollectedContent) -> Result<ManifestOutputs> {
        let apex = &self.config.apex;
        let source_path = self.path(&apex.manifest);
        let source = fs::read_to_string(&source_path).map_err(|e| {
            Error::config(
                "apex.manifest",
                format!("cannot read {}: {}", source_path.display(), e),
            )
        })?;

        build_manifest(
            &source,
            &content.native_libs.provided,
            &content.native_libs.required,
            apex.apex_name.as_deref(),
            apex.min_sdk()?,
        )
    }

    /// Container signer for this package, checked before any work is done
    fn signer(&self) -> Result<ContainerSigner> {
        let apex = &self.config.apex;
        if apex.test_only_unsigned_payload {
            warn!(
                "{}: test_only_unsigned_payload is set, container will not be signed",
                apex.name
            );
            return Ok(ContainerSigner::unsigned().with_alignment(apex.alignment));
        }

        let certificate = apex
            .certificate
            .as_ref()
            .ok_or_else(|| Error::config("apex.certificate", "required to sign the package"))?;
        let private_key = apex
            .private_key
            .as_ref()
            .ok_or_else(|| Error::config("apex.private_key", "required to sign the package"))?;
        if apex.public_key.is_none() {
            return Err(Error::config(
                "apex.public_key",
                "required to sign the package",
            ));
        }

        Ok(
            ContainerSigner::from_key_files(&self.path(certificate), &self.path(private_key))?
                .with_alignment(apex.alignment),
        )
    }

    /// Run the whole pipeline, writing artifacts into `out_dir`
    pub fn build(&self, out_dir: &Path) -> Result<BuildResult> {
        let apex = &self.config.apex;
        let name = apex.name.clone();
        info!("Building package {}", name);

        let key = apex
            .key
            .as_ref()
            .map(|k| self.path(k))
            .ok_or_else(|| Error::config("apex.key", "payload signing key is required"))?;
        let signer = self.signer()?;
        let mut tracker = StageTracker::new();
        fs::create_dir_all(out_dir)?;

        let content = self.collect_content()?;
        tracker.advance(Stage::ContentCollected)?;

        let deps_info_txt = out_dir.join(DEPS_INFO_TXT);
        let deps_info_json = out_dir.join(DEPS_INFO_JSON);
        fs::write(&deps_info_txt, content.deps.to_text())?;
        fs::write(&deps_info_json, content.deps.to_json()?)?;
        let notice = write_notice(&content.notices, &out_dir.join(NOTICE))?;

        let manifest = self.prepare_manifest(&content)?;
        let manifest_json = out_dir.join(crate::apex::image::MANIFEST_JSON);
        let manifest_pb = out_dir.join(crate::apex::image::MANIFEST_PB);
        fs::write(&manifest_json, &manifest.full_json)?;
        fs::write(&manifest_pb, &manifest.binary)?;
        let legacy_manifest = match &manifest.legacy_json {
            Some(legacy) => {
                let path = out_dir.join(LEGACY_MANIFEST);
                fs::write(&path, legacy)?;
                Some(path)
            }
            None => None,
        };
        tracker.advance(Stage::ManifestReady)?;

        let options = ImageOptions {
            staging_dir: out_dir.join(STAGING_DIR),
            work_dir: out_dir.to_path_buf(),
            output: out_dir.join(format!("{}.apex.unsigned", name)),
            key,
            public_key: apex.public_key.as_ref().map(|p| self.path(p)),
            payload_fs_type: apex.payload_fs_type,
            min_sdk: apex.min_sdk()?,
            target_sdk: apex.target_sdk_version.clone(),
            file_contexts: apex.file_contexts.as_ref().map(|p| self.path(p)),
            no_hashtree: apex.no_hashtree,
        };
        let image = ImageAssembler::new(self.runner.as_ref(), self.policy.as_ref())
            .assemble(&content.entries, &manifest, &options)?;
        let installed_files = out_dir.join(INSTALLED_FILES);
        fs::write(&installed_files, installed_files_report(&options.staging_dir)?)?;
        tracker.advance(Stage::ImageAssembled)?;

        match &apex.allowed_files {
            Some(allowed) => validate_content_files(&image.content_file, &self.path(allowed))?,
            None => debug!("{}: no allow-list configured", name),
        }
        tracker.advance(Stage::ContentValidated)?;

        let public_key = match &options.public_key {
            Some(path) => fs::read(path)?,
            None => Vec::new(),
        };
        let package_path = out_dir.join(format!("{}.apex", name));
        let package = signer.sign(
            &PackageContents {
                image: image.image_path.clone(),
                manifest_pb: manifest.binary.clone(),
                manifest_json: manifest.full_json.clone(),
                public_key: public_key.clone(),
            },
            &package_path,
        )?;
        let bundle = bundle_path(out_dir, &name);
        write_bundle(
            &BundleContents {
                image: &image.image_path,
                manifest_pb: &manifest.binary,
                public_key: &public_key,
                arch: &apex.arch,
            },
            &bundle,
        )?;
        tracker.advance(Stage::Signed)?;

        let installed = self.install(&package_path)?;

        info!(
            "Built {} ({} entries, payload at offset {})",
            package_path.display(),
            content.entries.len(),
            package.payload_offset
        );

        Ok(BuildResult {
            name,
            stage: tracker.current(),
            artifacts: BuildArtifacts {
                manifest_json,
                manifest_pb,
                legacy_manifest,
                canned_fs_config: image.canned_fs_config.clone(),
                copy_commands: image.copy_commands.clone(),
                content: image.content_file.clone(),
                deps_info_txt,
                deps_info_json,
                notice,
                unsigned_image: image.image_path.clone(),
                package: package_path,
                bundle,
                installed_files,
            },
            content,
            manifest,
            image,
            package,
            installed,
        })
    }

    fn install(&self, package: &Path) -> Result<Option<PathBuf>> {
        let apex = &self.config.apex;
        let Some(dir) = &self.install_dir else {
            return Ok(None);
        };
        if !apex.installable {
            info!("{} is not installable, skipping install", apex.name);
            return Ok(None);
        }

        fs::create_dir_all(dir)?;
        let target = dir.join(format!("{}.apex", apex.package_name()));
        fs::copy(package, &target)?;
        info!("Installed {}", target.display());
        Ok(Some(target))
    }
}

/// Concatenate notice files; nothing is written when there are none
fn write_notice(notices: &[PathBuf], output: &Path) -> Result<Option<PathBuf>> {
    if notices.is_empty() {
        return Ok(None);
    }

    let mut out = String::new();
    for notice in notices {
        let text = fs::read_to_string(notice).map_err(|e| {
            Error::config("notice", format!("cannot read {}: {}", notice.display(), e))
        })?;
        let _ = writeln!(out, "==> {} <==", notice.display());
        out.push_str(&text);
        if !text.ends_with('\n') {
            out.push('\n');
        }
    }
    fs::write(output, out)?;
    Ok(Some(output.to_path_buf()))
}

/// `size path` for every file in the staging tree, largest first
pub fn installed_files_report(staging: &Path) -> Result<String> {
    let mut files = Vec::new();
    for entry in WalkDir::new(staging).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }
        let size = entry.path().symlink_metadata()?.len();
        let rel = entry
            .path()
            .strip_prefix(staging)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .into_owned();
        files.push((size, format!("./{}", rel)));
    }
    files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

    let mut out = String::new();
    for (size, path) in files {
        let _ = writeln!(out, "{} {}", size, path);
    }
    Ok(out)
}
