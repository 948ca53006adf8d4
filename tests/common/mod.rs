// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use apexbuild::apex::image::content_manifest;
use apexbuild::apex::{ApexBuilder, SigningKeyPair, ToolInvocation, ToolOutput, ToolRunner};
use apexbuild::{Error, ModuleConfig, Result};
use std::cell::RefCell;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;

pub const PACKAGE: &str = "com.example.media";

/// Module configuration used by most pipeline tests
pub const DEFAULT_CONFIG: &str = r#"
[apex]
name = "com.example.media"
certificate = "keys/container.public"
private_key = "keys/container.private"
key = "keys/payload.pem"
public_key = "keys/payload.avbpubkey"
min_sdk_version = "29"
link_to_platform = true
notice = "NOTICE.media"
deps = ["libmedia", "mediatool", "mediaapps"]

[[apex.files]]
src = "out/extra.conf"
dest = "etc/extra.conf"
class = "etc"

[[modules]]
name = "libmedia"
native_libs = ["libmedia.so"]
notice = "NOTICE.libmedia"
min_sdk_version = "29"
deps = ["libutils", { name = "libc", external = true }]

[[modules.files]]
src = "out/libmedia.so"
dest = "lib64/libmedia.so"
class = "native_shared_lib"

[[modules]]
name = "libutils"
native_libs = ["libutils.so"]
available_to_platform = true

[[modules.files]]
src = "out/libutils.so"
dest = "lib64/libutils.so"
class = "native_shared_lib"

[[modules]]
name = "mediatool"
deps = ["libmedia"]

[[modules.files]]
src = "out/mediatool"
dest = "bin/mediatool"
class = "executable"
symlinks = ["mt"]

[[modules]]
name = "mediaapps"

[[modules.files]]
src = "out/mediaapps.apks"
dest = "app/MediaApps/MediaApps.apks"
class = "app_set"

[[modules]]
name = "libc"
native_libs = ["libc.so"]
available_to_platform = true
"#;

/// Content listing the default configuration produces
pub const EXPECTED_CONTENT: &[&str] = &[
    "./apex_manifest.json",
    "./apex_manifest.pb",
    "./app/MediaApps/MediaApps.apk",
    "./bin/mediatool",
    "./bin/mt",
    "./etc/extra.conf",
    "./lib64/libmedia.so",
    "./lib64/libutils.so",
];

/// A source tree with built outputs, manifest and keys.
///
/// Keep the fixture alive for as long as its paths are used.
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        fs::create_dir_all(root.join("out")).unwrap();
        fs::create_dir_all(root.join("keys")).unwrap();

        fs::write(
            root.join("apex_manifest.json"),
            r#"{"name": "com.example.media", "version": 7, "versionName": "7.0", "noCode": true}"#,
        )
        .unwrap();
        fs::write(root.join("out/extra.conf"), "level=3\n").unwrap();
        fs::write(root.join("out/libmedia.so"), vec![0x7f; 4096]).unwrap();
        fs::write(root.join("out/libutils.so"), vec![0x7e; 2048]).unwrap();
        fs::write(root.join("out/mediatool"), "#!/bin/sh\necho media\n").unwrap();
        write_app_set(&root.join("out/mediaapps.apks"));
        fs::write(root.join("NOTICE.media"), "media license\n").unwrap();
        fs::write(root.join("NOTICE.libmedia"), "libmedia license\n").unwrap();

        SigningKeyPair::generate()
            .with_key_id("fixture")
            .save_to_files(
                &root.join("keys/container.private"),
                &root.join("keys/container.public"),
            )
            .unwrap();
        fs::write(root.join("keys/payload.pem"), "payload private key").unwrap();
        fs::write(root.join("keys/payload.avbpubkey"), "payload public key").unwrap();

        let fixture = Self { dir };
        fixture.write_config(DEFAULT_CONFIG);
        fixture
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn out_dir(&self) -> PathBuf {
        self.root().join("build")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root().join("apex.toml")
    }

    pub fn write_config(&self, toml: &str) {
        fs::write(self.config_path(), toml).unwrap();
    }

    pub fn config(&self) -> ModuleConfig {
        ModuleConfig::from_file(&self.config_path()).unwrap()
    }

    /// Builder wired to a fake image tool
    pub fn builder(&self, tool: &FakeImageTool) -> ApexBuilder {
        self.builder_with(self.config(), tool)
    }

    pub fn builder_with(&self, config: ModuleConfig, tool: &FakeImageTool) -> ApexBuilder {
        ApexBuilder::new(config, self.root()).with_runner(tool.clone())
    }
}

fn write_app_set(path: &Path) {
    let mut zip = zip::ZipWriter::new(fs::File::create(path).unwrap());
    zip.start_file("MediaApps.apk", zip::write::FileOptions::default())
        .unwrap();
    zip.write_all(b"apk contents").unwrap();
    zip.finish().unwrap();
}

/// Stand-in for the image tool.
///
/// Records every invocation and writes a deterministic image: the staging
/// content listing. Can be told to fail like a real tool would.
#[derive(Clone, Default)]
pub struct FakeImageTool {
    pub calls: Rc<RefCell<Vec<ToolInvocation>>>,
    pub fail_with: Option<String>,
}

impl FakeImageTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(stderr: &str) -> Self {
        Self {
            fail_with: Some(stderr.to_string()),
            ..Self::default()
        }
    }

    pub fn last_call(&self) -> ToolInvocation {
        self.calls.borrow().last().cloned().unwrap()
    }
}

impl ToolRunner for FakeImageTool {
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        self.calls.borrow_mut().push(invocation.clone());

        if let Some(stderr) = &self.fail_with {
            return Err(Error::ToolFailed {
                tool: invocation.program.clone(),
                status: "exit status: 1".to_string(),
                stdout: String::new(),
                stderr: stderr.clone(),
            });
        }

        let n = invocation.args.len();
        let staging = PathBuf::from(&invocation.args[n - 2]);
        let output = PathBuf::from(&invocation.args[n - 1]);
        let listing = content_manifest(&staging)?.join("\n");
        fs::write(output, listing)?;

        Ok(ToolOutput::default())
    }
}
