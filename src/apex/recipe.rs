// src/apex/recipe.rs

//! Staging recipe
//!
//! The recipe is the ordered list of filesystem actions that turns a set of
//! payload entries into a staging directory. It is computed once, rendered to
//! `copy_commands.sh` for inspection, and applied natively. Every action is
//! idempotent, so replaying the recipe against the same directory gives the
//! same tree.

use crate::apex::file_entry::{join_path, FileClass, FileEntry};
use crate::apex::policy::LinkPolicy;
use crate::error::Result;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One staging action. Package paths are relative to the staging root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipeAction {
    Mkdir { path: String },
    Copy { src: PathBuf, dest: String },
    /// `link` points at `target` (absolute platform path or sibling name)
    Symlink { target: String, link: String },
    ClearDir { path: String },
    Extract { archive: PathBuf, dir: String },
}

impl RecipeAction {
    /// Render as a shell command against `root`
    pub fn to_shell(&self, root: &Path) -> String {
        let at = |p: &str| shell_quote(&root.join(p).to_string_lossy());
        match self {
            RecipeAction::Mkdir { path } => format!("mkdir -p {}", at(path)),
            RecipeAction::Copy { src, dest } => {
                format!("cp -f {} {}", shell_quote(&src.to_string_lossy()), at(dest))
            }
            RecipeAction::Symlink { target, link } => {
                format!("ln -sfn {} {}", shell_quote(target), at(link))
            }
            RecipeAction::ClearDir { path } => format!("rm -rf {}", at(path)),
            RecipeAction::Extract { archive, dir } => format!(
                "unzip -qDD -d {} {}",
                at(dir),
                shell_quote(&archive.to_string_lossy())
            ),
        }
    }

    /// Perform the action against `root`
    pub fn apply(&self, root: &Path) -> Result<()> {
        match self {
            RecipeAction::Mkdir { path } => {
                fs::create_dir_all(root.join(path))?;
            }
            RecipeAction::Copy { src, dest } => {
                let dest = root.join(dest);
                if dest.is_symlink() {
                    fs::remove_file(&dest)?;
                }
                fs::copy(src, &dest)?;
            }
            RecipeAction::Symlink { target, link } => {
                let link = root.join(link);
                if link.symlink_metadata().is_ok() {
                    fs::remove_file(&link)?;
                }
                symlink(target, &link)?;
            }
            RecipeAction::ClearDir { path } => {
                let dir = root.join(path);
                if dir.exists() {
                    fs::remove_dir_all(&dir)?;
                }
                fs::create_dir_all(&dir)?;
            }
            RecipeAction::Extract { archive, dir } => {
                let file = fs::File::open(archive)?;
                let mut zip = zip::ZipArchive::new(file)?;
                zip.extract(root.join(dir))?;
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn symlink(target: &str, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(_target: &str, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "symlinks require a unix host",
    ))
}

/// Ordered staging actions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildRecipe {
    pub actions: Vec<RecipeAction>,
}

impl BuildRecipe {
    /// Compute the recipe for a set of entries.
    ///
    /// Order: directories (sorted), app-set directory clears, then per-entry
    /// actions sorted by destination. Entries the policy links are not copied.
    pub fn from_entries(entries: &[FileEntry], policy: &dyn LinkPolicy) -> Self {
        let mut sorted: Vec<&FileEntry> = entries.iter().collect();
        sorted.sort_by(|a, b| a.dest_path.cmp(&b.dest_path));

        let dirs: BTreeSet<&str> = sorted
            .iter()
            .map(|e| e.install_dir.as_str())
            .filter(|d| !d.is_empty())
            .collect();
        let app_set_dirs: BTreeSet<&str> = sorted
            .iter()
            .filter(|e| e.class == FileClass::AppSet)
            .map(|e| e.install_dir.as_str())
            .collect();

        let mut actions: Vec<RecipeAction> = dirs
            .into_iter()
            .map(|d| RecipeAction::Mkdir { path: d.to_string() })
            .collect();
        actions.extend(
            app_set_dirs
                .into_iter()
                .map(|d| RecipeAction::ClearDir { path: d.to_string() }),
        );

        for entry in sorted {
            if entry.class == FileClass::AppSet {
                actions.push(RecipeAction::Extract {
                    archive: entry.built_file.clone(),
                    dir: entry.install_dir.clone(),
                });
                continue;
            }

            if policy.should_link(entry) {
                debug!("{}: linking {} to platform copy", policy.name(), entry.dest_path);
                actions.push(RecipeAction::Symlink {
                    target: entry.platform_path(),
                    link: entry.dest_path.clone(),
                });
            } else {
                actions.push(RecipeAction::Copy {
                    src: entry.built_file.clone(),
                    dest: entry.dest_path.clone(),
                });
            }

            for alias in &entry.symlinks {
                actions.push(RecipeAction::Symlink {
                    target: entry.file_name().to_string(),
                    link: join_path(&entry.install_dir, alias),
                });
            }
        }

        Self { actions }
    }

    /// Render the whole recipe as a shell script
    pub fn to_shell(&self, root: &Path) -> String {
        let mut out = String::from("#!/bin/sh\nset -e\n");
        for action in &self.actions {
            let _ = writeln!(out, "{}", action.to_shell(root));
        }
        out
    }

    /// Apply every action in order
    pub fn apply(&self, root: &Path) -> Result<()> {
        fs::create_dir_all(root)?;
        for action in &self.actions {
            action.apply(root)?;
        }
        Ok(())
    }

    /// Number of files copied (not linked or extracted)
    pub fn copy_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, RecipeAction::Copy { .. }))
            .count()
    }
}

fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+=:,@".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apex::policy::{NeverLink, PlatformLinkPolicy};
    use tempfile::TempDir;

    fn entries() -> Vec<FileEntry> {
        vec![
            FileEntry::new("out/foo", "bin/foo", "bin", FileClass::Executable, vec!["f".into()])
                .unwrap(),
            FileEntry::at("out/libbar.so", "lib64/libbar.so", FileClass::NativeSharedLib)
                .unwrap()
                .with_transitive(true)
                .with_available_to_platform(true),
            FileEntry::at("out/apps.zip", "app/Set/Set.apks", FileClass::AppSet).unwrap(),
        ]
    }

    #[test]
    fn test_order_and_policy() {
        let recipe = BuildRecipe::from_entries(&entries(), &PlatformLinkPolicy::new(true));
        assert_eq!(
            recipe.actions,
            vec![
                RecipeAction::Mkdir { path: "app/Set".into() },
                RecipeAction::Mkdir { path: "bin".into() },
                RecipeAction::Mkdir { path: "lib64".into() },
                RecipeAction::ClearDir { path: "app/Set".into() },
                RecipeAction::Extract {
                    archive: "out/apps.zip".into(),
                    dir: "app/Set".into()
                },
                RecipeAction::Copy {
                    src: "out/foo".into(),
                    dest: "bin/foo".into()
                },
                RecipeAction::Symlink {
                    target: "foo".into(),
                    link: "bin/f".into()
                },
                RecipeAction::Symlink {
                    target: "/system/lib64/libbar.so".into(),
                    link: "lib64/libbar.so".into()
                },
            ]
        );
        assert_eq!(recipe.copy_count(), 1);
    }

    #[test]
    fn test_deterministic_regardless_of_input_order() {
        let mut reversed = entries();
        reversed.reverse();
        let a = BuildRecipe::from_entries(&entries(), &NeverLink);
        let b = BuildRecipe::from_entries(&reversed, &NeverLink);
        assert_eq!(a, b);
        assert_eq!(a.to_shell(Path::new("/s")), b.to_shell(Path::new("/s")));
    }

    #[test]
    fn test_shell_rendering() {
        let recipe = BuildRecipe::from_entries(&entries(), &NeverLink);
        let script = recipe.to_shell(Path::new("/stage"));
        assert!(script.contains("mkdir -p /stage/bin\n"));
        assert!(script.contains("rm -rf /stage/app/Set\n"));
        assert!(script.contains("unzip -qDD -d /stage/app/Set out/apps.zip\n"));
        assert!(script.contains("cp -f out/foo /stage/bin/foo\n"));
        assert!(script.contains("ln -sfn foo /stage/bin/f\n"));
        assert_eq!(shell_quote("a b"), "'a b'");
    }

    #[cfg(unix)]
    #[test]
    fn test_apply_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("foo");
        fs::write(&src, b"#!/bin/sh\n").unwrap();
        let entry =
            FileEntry::new(&src, "bin/foo", "bin", FileClass::Executable, vec!["f".into()]).unwrap();
        let recipe = BuildRecipe::from_entries(&[entry], &NeverLink);

        let stage = tmp.path().join("stage");
        recipe.apply(&stage).unwrap();
        recipe.apply(&stage).unwrap();

        assert_eq!(fs::read(stage.join("bin/foo")).unwrap(), b"#!/bin/sh\n");
        assert_eq!(
            fs::read_link(stage.join("bin/f")).unwrap(),
            PathBuf::from("foo")
        );
    }
}
