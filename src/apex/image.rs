// src/apex/image.rs

//! Filesystem image assembly
//!
//! Turns payload entries plus the manifest into a staging directory, the
//! permission table (`canned_fs_config`), the content manifest, and finally
//! an unsigned filesystem image produced by the external image tool.

use crate::apex::config::PayloadFsType;
use crate::apex::file_entry::{FileEntry, PermissionClass};
use crate::apex::manifest::ManifestOutputs;
use crate::apex::policy::LinkPolicy;
use crate::apex::recipe::BuildRecipe;
use crate::apex::sdk::SdkVersion;
use crate::apex::tool::{IMAGE_TOOL, ToolInvocation, ToolRunner};
use crate::error::{Error, Result};
use std::collections::{BTreeSet, HashSet};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

pub const MANIFEST_JSON: &str = "apex_manifest.json";
pub const MANIFEST_PB: &str = "apex_manifest.pb";
pub const CANNED_FS_CONFIG: &str = "canned_fs_config";
pub const CONTENT_FILE: &str = "content.txt";
pub const COPY_COMMANDS: &str = "copy_commands.sh";

const RESERVED_PATHS: &[&str] = &[MANIFEST_JSON, MANIFEST_PB];

/// Owner, group and mode of a path in the image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsPermission {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

impl FsPermission {
    pub const ROOT_DIR: FsPermission = FsPermission { uid: 1000, gid: 1000, mode: 0o755 };
    pub const READ_ONLY: FsPermission = FsPermission { uid: 1000, gid: 1000, mode: 0o644 };
    pub const EXECUTABLE: FsPermission = FsPermission { uid: 0, gid: 2000, mode: 0o755 };
}

/// Entries partitioned by permission class
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Read-only files and their aliases, in entry order
    pub read_only: Vec<String>,
    /// Executables, their aliases, and every directory leading to them
    pub executable: Vec<String>,
    /// Directories app-set archives are extracted into
    pub app_set_dirs: Vec<String>,
}

impl Classification {
    /// Partition entries. The executable list keeps first-seen order: each
    /// file, its aliases, then its ancestor directories innermost first.
    pub fn from_entries(entries: &[FileEntry]) -> Self {
        let mut out = Classification::default();
        let mut seen_exec = HashSet::new();
        let mut seen_ro = HashSet::new();
        let mut seen_app = HashSet::new();

        for entry in entries {
            match entry.class.permission() {
                PermissionClass::ReadOnly => {
                    for path in entry.installed_paths() {
                        if seen_ro.insert(path.clone()) {
                            out.read_only.push(path);
                        }
                    }
                }
                PermissionClass::Executable => {
                    for path in entry.installed_paths().into_iter().chain(entry.ancestor_dirs()) {
                        if seen_exec.insert(path.clone()) {
                            out.executable.push(path);
                        }
                    }
                }
                PermissionClass::AppPackage => {
                    if seen_app.insert(entry.install_dir.clone()) {
                        out.app_set_dirs.push(entry.install_dir.clone());
                    }
                }
            }
        }

        // A directory holding an executable is never read-only
        out.read_only.retain(|p| !seen_exec.contains(p));
        out
    }

    /// Every classified path
    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.read_only
            .iter()
            .chain(&self.executable)
            .chain(&self.app_set_dirs)
    }
}

/// Canned filesystem configuration handed to the image tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionTable {
    lines: Vec<(String, FsPermission)>,
}

impl PermissionTable {
    pub fn from_classification(classes: &Classification) -> Self {
        let mut lines = vec![
            ("/".to_string(), FsPermission::ROOT_DIR),
            (format!("/{}", MANIFEST_JSON), FsPermission::READ_ONLY),
            (format!("/{}", MANIFEST_PB), FsPermission::READ_ONLY),
        ];

        let read_only: BTreeSet<&String> = classes.read_only.iter().collect();
        let executable: BTreeSet<&String> = classes.executable.iter().collect();
        let app_dirs: BTreeSet<&String> = classes.app_set_dirs.iter().collect();

        lines.extend(
            read_only
                .into_iter()
                .map(|p| (format!("/{}", p), FsPermission::READ_ONLY)),
        );
        lines.extend(
            executable
                .into_iter()
                .map(|p| (format!("/{}", p), FsPermission::EXECUTABLE)),
        );
        lines.extend(
            app_dirs
                .into_iter()
                .map(|d| (format!("/{}/*", d), FsPermission::READ_ONLY)),
        );

        Self { lines }
    }

    pub fn get(&self, path: &str) -> Option<FsPermission> {
        self.lines
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, perm)| *perm)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Render in `path uid gid mode` form
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (path, perm) in &self.lines {
            let _ = writeln!(out, "{} {} {} {:04o}", path, perm.uid, perm.gid, perm.mode);
        }
        out
    }
}

/// Image tool settings for one assembly
#[derive(Debug, Clone)]
pub struct ImageOptions {
    /// Cleared and repopulated on every run
    pub staging_dir: PathBuf,
    /// Where intermediate files are written
    pub work_dir: PathBuf,
    /// Unsigned image path
    pub output: PathBuf,
    pub key: PathBuf,
    pub public_key: Option<PathBuf>,
    pub payload_fs_type: PayloadFsType,
    pub min_sdk: SdkVersion,
    pub target_sdk: Option<String>,
    pub file_contexts: Option<PathBuf>,
    pub no_hashtree: bool,
}

/// Everything the assembler produced
#[derive(Debug, Clone)]
pub struct AssembledImage {
    pub classification: Classification,
    pub permissions: PermissionTable,
    pub recipe: BuildRecipe,
    /// Sorted `./`-prefixed content listing
    pub content: Vec<String>,
    pub invocation: ToolInvocation,
    pub image_path: PathBuf,
    pub canned_fs_config: PathBuf,
    pub content_file: PathBuf,
    pub copy_commands: PathBuf,
}

/// Assembles the unsigned filesystem image
pub struct ImageAssembler<'a> {
    runner: &'a dyn ToolRunner,
    policy: &'a dyn LinkPolicy,
}

impl<'a> ImageAssembler<'a> {
    pub fn new(runner: &'a dyn ToolRunner, policy: &'a dyn LinkPolicy) -> Self {
        Self { runner, policy }
    }

    /// Compute the permission classes, table and recipe without touching disk
    pub fn plan(&self, entries: &[FileEntry]) -> Result<(Classification, PermissionTable, BuildRecipe)> {
        check_destinations(entries)?;
        let classification = Classification::from_entries(entries);
        let permissions = PermissionTable::from_classification(&classification);
        let recipe = BuildRecipe::from_entries(entries, self.policy);
        Ok((classification, permissions, recipe))
    }

    /// Stage the entries and run the image tool
    pub fn assemble(
        &self,
        entries: &[FileEntry],
        manifest: &ManifestOutputs,
        options: &ImageOptions,
    ) -> Result<AssembledImage> {
        let (classification, permissions, recipe) = self.plan(entries)?;

        let staging = &options.staging_dir;
        if staging.exists() {
            debug!("Clearing staging directory {}", staging.display());
            fs::remove_dir_all(staging)?;
        }
        fs::create_dir_all(staging)?;
        fs::create_dir_all(&options.work_dir)?;

        recipe.apply(staging)?;
        fs::write(staging.join(MANIFEST_PB), &manifest.binary)?;
        fs::write(staging.join(MANIFEST_JSON), &manifest.full_json)?;

        let canned_fs_config = options.work_dir.join(CANNED_FS_CONFIG);
        fs::write(&canned_fs_config, permissions.render())?;

        let copy_commands = options.work_dir.join(COPY_COMMANDS);
        fs::write(&copy_commands, recipe.to_shell(staging))?;

        let content = content_manifest(staging)?;
        let content_file = options.work_dir.join(CONTENT_FILE);
        fs::write(&content_file, render_lines(&content))?;

        let invocation = image_invocation(options, &canned_fs_config);
        info!(
            "Building {} image from {} entries ({} copied)",
            options.payload_fs_type.as_str(),
            entries.len(),
            recipe.copy_count()
        );
        self.runner.run(&invocation)?;

        if !options.output.is_file() {
            return Err(Error::ToolFailed {
                tool: IMAGE_TOOL.to_string(),
                status: "exited successfully".to_string(),
                stdout: String::new(),
                stderr: format!("no image written to {}", options.output.display()),
            });
        }

        Ok(AssembledImage {
            classification,
            permissions,
            recipe,
            content,
            invocation,
            image_path: options.output.clone(),
            canned_fs_config,
            content_file,
            copy_commands,
        })
    }
}

/// Destinations must be unique and must not shadow the manifests.
///
/// App-set install directories are owned by their archives: no other path,
/// executable directory, or app-set directory may sit at or below one.
pub fn check_destinations(entries: &[FileEntry]) -> Result<()> {
    let app_dirs: BTreeSet<&str> = entries
        .iter()
        .filter(|e| e.class.permission() == PermissionClass::AppPackage)
        .map(|e| e.install_dir.as_str())
        .collect();

    let mut seen = HashSet::new();
    for entry in entries {
        match entry.class.permission() {
            PermissionClass::AppPackage => {
                let dir = entry.install_dir.as_str();
                if let Some(outer) = app_dirs.iter().find(|d| **d != dir && is_within(dir, d)) {
                    return Err(Error::InvalidPath {
                        path: dir.to_string(),
                        reason: format!("nested inside app-set directory '{}'", outer),
                    });
                }
            }
            class => {
                let mut paths = entry.installed_paths();
                if class == PermissionClass::Executable {
                    paths.extend(entry.ancestor_dirs());
                }
                for path in paths {
                    if let Some(dir) = app_dirs.iter().find(|d| is_within(&path, d)) {
                        return Err(Error::InvalidPath {
                            path,
                            reason: format!("inside app-set directory '{}'", dir),
                        });
                    }
                }
            }
        }

        for path in entry.installed_paths() {
            if RESERVED_PATHS.contains(&path.as_str()) {
                return Err(Error::InvalidPath {
                    path,
                    reason: "reserved for the package manifest".to_string(),
                });
            }
            if !seen.insert(path.clone()) {
                return Err(Error::InvalidPath {
                    path,
                    reason: "installed by more than one entry".to_string(),
                });
            }
        }
    }
    Ok(())
}

/// `path` is `dir` itself or lies below it
fn is_within(path: &str, dir: &str) -> bool {
    dir.is_empty()
        || path == dir
        || path
            .strip_prefix(dir)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Sorted listing of every file and symlink under `root`, `./`-prefixed
pub fn content_manifest(root: &Path) -> Result<Vec<String>> {
    let mut paths = BTreeSet::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }
        let rel = entry.path().strip_prefix(root).map_err(|_| Error::InvalidPath {
            path: entry.path().display().to_string(),
            reason: "outside the staging directory".to_string(),
        })?;
        paths.insert(format!("./{}", rel.to_string_lossy()));
    }
    Ok(paths.into_iter().collect())
}

fn render_lines(lines: &[String]) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Serialize the image tool command line
pub fn image_invocation(options: &ImageOptions, canned_fs_config: &Path) -> ToolInvocation {
    ToolInvocation::new(IMAGE_TOOL)
        .arg("--force")
        .flag("--manifest", options.staging_dir.join(MANIFEST_PB))
        .flag("--manifest_json", options.staging_dir.join(MANIFEST_JSON))
        .flag_opt("--file_contexts", options.file_contexts.as_ref())
        .flag("--canned_fs_config", canned_fs_config)
        .flag("--payload_type", "image")
        .flag("--key", &options.key)
        .flag_opt("--pubkey", options.public_key.as_ref())
        .flag("--payload_fs_type", options.payload_fs_type.as_str())
        .flag("--min_sdk_version", options.min_sdk.to_string())
        .flag_opt("--target_sdk_version", options.target_sdk.as_deref())
        .switch("--no_hashtree", options.no_hashtree)
        .arg(&options.staging_dir)
        .arg(&options.output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apex::file_entry::FileClass;
    use crate::apex::manifest::build_manifest;
    use crate::apex::policy::NeverLink;
    use crate::apex::tool::ToolOutput;
    use std::cell::RefCell;
    use tempfile::TempDir;

    #[test]
    fn test_classification_example() {
        let entries = vec![
            FileEntry::at("out/foo", "bin/foo", FileClass::Executable).unwrap(),
            FileEntry::at("out/bar.so", "lib/bar.so", FileClass::NativeSharedLib).unwrap(),
        ];
        let classes = Classification::from_entries(&entries);
        assert_eq!(classes.executable, vec!["bin/foo", "bin"]);
        assert_eq!(classes.read_only, vec!["lib/bar.so"]);
        assert!(classes.app_set_dirs.is_empty());
    }

    #[test]
    fn test_nested_executable_dirs_deduplicated() {
        let entries = vec![
            FileEntry::at("o/a", "bin/x/a", FileClass::Executable).unwrap(),
            FileEntry::at("o/b", "bin/x/b", FileClass::Script).unwrap(),
            FileEntry::at("o/c", "bin/c", FileClass::Executable).unwrap(),
        ];
        let classes = Classification::from_entries(&entries);
        assert_eq!(classes.executable, vec!["bin/x/a", "bin/x", "bin", "bin/x/b", "bin/c"]);
    }

    #[test]
    fn test_permission_table_one_line_per_path() {
        let entries = vec![
            FileEntry::new("o/a", "bin/a", "bin", FileClass::Executable, vec!["aa".into()]).unwrap(),
            FileEntry::at("o/l", "lib64/l.so", FileClass::NativeSharedLib).unwrap(),
            FileEntry::at("o/e", "etc/conf", FileClass::Etc).unwrap(),
            FileEntry::at("o/s.apks", "app/S/S.apks", FileClass::AppSet).unwrap(),
        ];
        let classes = Classification::from_entries(&entries);
        let table = PermissionTable::from_classification(&classes);
        let rendered = table.render();

        let paths: Vec<&str> = rendered.lines().map(|l| l.split(' ').next().unwrap()).collect();
        let unique: HashSet<&str> = paths.iter().copied().collect();
        assert_eq!(paths.len(), unique.len());

        assert_eq!(
            rendered,
            "/ 1000 1000 0755\n\
             /apex_manifest.json 1000 1000 0644\n\
             /apex_manifest.pb 1000 1000 0644\n\
             /etc/conf 1000 1000 0644\n\
             /lib64/l.so 1000 1000 0644\n\
             /bin 0 2000 0755\n\
             /bin/a 0 2000 0755\n\
             /bin/aa 0 2000 0755\n\
             /app/S/* 1000 1000 0644\n"
        );
        assert_eq!(table.get("/bin/a"), Some(FsPermission::EXECUTABLE));
    }

    #[test]
    fn test_duplicate_destination_rejected() {
        let runner = RecordingRunner::default();
        let assembler = ImageAssembler::new(&runner, &NeverLink);
        let entries = vec![
            FileEntry::at("o/a", "etc/a", FileClass::Etc).unwrap(),
            FileEntry::at("o/b", "etc/a", FileClass::Etc).unwrap(),
        ];
        assert!(matches!(assembler.plan(&entries), Err(Error::InvalidPath { .. })));

        let reserved = vec![FileEntry::at("o/m", "apex_manifest.pb", FileClass::Etc).unwrap()];
        assert!(matches!(assembler.plan(&reserved), Err(Error::InvalidPath { .. })));
    }

    #[test]
    fn test_app_set_dir_is_exclusive() {
        let app_set = FileEntry::at("o/x.apks", "bin/X.apks", FileClass::AppSet).unwrap();

        // Executable in the archive's directory
        let exec = FileEntry::at("o/foo", "bin/foo", FileClass::Executable).unwrap();
        let err = check_destinations(&[exec, app_set.clone()]).unwrap_err();
        assert!(matches!(err, Error::InvalidPath { ref path, .. } if path == "bin/foo"));

        // Executable below it; its ancestor directory collides
        let deep = FileEntry::at("o/t", "bin/sub/t", FileClass::Script).unwrap();
        let err = check_destinations(&[app_set.clone(), deep]).unwrap_err();
        assert!(matches!(err, Error::InvalidPath { ref path, .. } if path == "bin/sub/t"));

        let nested = FileEntry::at("o/y.apks", "bin/Y/Y.apks", FileClass::AppSet).unwrap();
        let err = check_destinations(&[app_set.clone(), nested]).unwrap_err();
        assert!(matches!(err, Error::InvalidPath { ref path, .. } if path == "bin/Y"));

        // Sibling directories sharing a prefix are fine
        let sibling = FileEntry::at("o/c", "binx/c", FileClass::Executable).unwrap();
        let conf = FileEntry::at("o/e", "etc/conf", FileClass::Etc).unwrap();
        check_destinations(&[app_set, sibling, conf]).unwrap();
    }

    #[derive(Default)]
    struct RecordingRunner {
        calls: RefCell<Vec<ToolInvocation>>,
    }

    impl ToolRunner for RecordingRunner {
        fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
            let out = invocation.args.last().unwrap();
            fs::write(out, b"image").unwrap();
            self.calls.borrow_mut().push(invocation.clone());
            Ok(ToolOutput::default())
        }
    }

    struct FailingRunner;

    impl ToolRunner for FailingRunner {
        fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
            Err(Error::ToolFailed {
                tool: invocation.program.clone(),
                status: "exit status: 1".into(),
                stdout: String::new(),
                stderr: "bad key".into(),
            })
        }
    }

    fn options(tmp: &Path) -> ImageOptions {
        ImageOptions {
            staging_dir: tmp.join("stage"),
            work_dir: tmp.join("work"),
            output: tmp.join("work/pkg.apex.unsigned"),
            key: tmp.join("payload.pem"),
            public_key: None,
            payload_fs_type: PayloadFsType::Ext4,
            min_sdk: SdkVersion::Level(30),
            target_sdk: Some("31".into()),
            file_contexts: None,
            no_hashtree: true,
        }
    }

    fn manifest() -> ManifestOutputs {
        build_manifest(r#"{"name":"pkg","version":1}"#, &[], &[], None, SdkVersion::Level(30))
            .unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn test_assemble_writes_artifacts() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("foo");
        fs::write(&src, b"bin").unwrap();
        let entries =
            vec![FileEntry::new(&src, "bin/foo", "bin", FileClass::Executable, vec!["f".into()]).unwrap()];

        // Leftovers from a previous run must disappear
        let opts = options(tmp.path());
        fs::create_dir_all(opts.staging_dir.join("stale")).unwrap();
        fs::write(opts.staging_dir.join("stale/file"), b"old").unwrap();

        let runner = RecordingRunner::default();
        let image = ImageAssembler::new(&runner, &NeverLink)
            .assemble(&entries, &manifest(), &opts)
            .unwrap();

        assert_eq!(
            image.content,
            vec!["./apex_manifest.json", "./apex_manifest.pb", "./bin/f", "./bin/foo"]
        );
        assert_eq!(
            fs::read_to_string(&image.content_file).unwrap(),
            "./apex_manifest.json\n./apex_manifest.pb\n./bin/f\n./bin/foo\n"
        );
        assert!(image.canned_fs_config.is_file());
        assert!(image.copy_commands.is_file());

        let calls = runner.calls.borrow();
        assert_eq!(calls.len(), 1);
        let inv = &calls[0];
        assert_eq!(inv.value_of("--payload_fs_type").unwrap(), "ext4");
        assert_eq!(inv.value_of("--min_sdk_version").unwrap(), "30");
        assert_eq!(inv.value_of("--target_sdk_version").unwrap(), "31");
        assert!(inv.has_arg("--no_hashtree"));
        assert!(inv.value_of("--pubkey").is_none());
    }

    #[test]
    fn test_tool_failure_propagates() {
        let tmp = TempDir::new().unwrap();
        let err = ImageAssembler::new(&FailingRunner, &NeverLink)
            .assemble(&[], &manifest(), &options(tmp.path()))
            .unwrap_err();
        match err {
            Error::ToolFailed { stderr, .. } => assert_eq!(stderr, "bad key"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
