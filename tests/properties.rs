// tests/properties.rs

//! Invariants that must hold for any payload, checked over enumerated inputs.

mod common;

use apexbuild::Error;
use apexbuild::apex::image::{check_destinations, content_manifest};
use apexbuild::apex::manifest::ApexManifest;
use apexbuild::apex::validate::{parse_allow_list, validate_content};
use apexbuild::apex::{
    BuildRecipe, Classification, DependencyEdge, DependencyGraph, FileClass, FileEntry,
    ImageAssembler, ModuleNode, NeverLink, PermissionTable, PlatformLinkPolicy,
};
use common::FakeImageTool;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;

/// Entries covering every permission class, aliases, and shared directories
fn entry_pool(built_dir: &Path) -> Vec<FileEntry> {
    let specs: [(&str, FileClass, &[&str]); 8] = [
        ("bin/foo", FileClass::Executable, &["foo-alias"]),
        ("bin/sub/tool", FileClass::Script, &[]),
        ("lib/bar.so", FileClass::NativeSharedLib, &[]),
        ("lib64/libbaz.so", FileClass::NativeSharedLib, &["libbaz.so.1"]),
        ("etc/init.rc", FileClass::Etc, &[]),
        ("javalib/core.jar", FileClass::JavaSharedLib, &[]),
        ("app/Gallery/Gallery.apks", FileClass::AppSet, &[]),
        // Shares its directory with bin/sub/tool
        ("bin/sub/Extras.apks", FileClass::AppSet, &[]),
    ];

    specs
        .iter()
        .enumerate()
        .map(|(i, (dest, class, aliases))| {
            let built = built_dir.join(format!("built-{}", i));
            if *class == FileClass::AppSet {
                let mut zip = zip::ZipWriter::new(fs::File::create(&built).unwrap());
                zip.start_file("Gallery.apk", zip::write::FileOptions::default())
                    .unwrap();
                zip.finish().unwrap();
            } else {
                fs::write(&built, format!("contents of {}", dest)).unwrap();
            }
            let dir = dest.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
            FileEntry::new(
                built,
                dest,
                dir,
                *class,
                aliases.iter().map(|a| a.to_string()).collect(),
            )
            .unwrap()
            .with_transitive(i % 2 == 1)
            .with_available_to_platform(true)
        })
        .collect()
}

/// Every non-empty subset of `pool`, in a stable order
fn subsets(pool: &[FileEntry]) -> Vec<Vec<FileEntry>> {
    (1u32..(1 << pool.len()))
        .map(|mask| {
            pool.iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, e)| e.clone())
                .collect()
        })
        .collect()
}

/// Subsets the assembler accepts, and how many it rejected
fn accepted_subsets(pool: &[FileEntry]) -> (Vec<Vec<FileEntry>>, usize) {
    let all = subsets(pool);
    let total = all.len();
    let accepted: Vec<Vec<FileEntry>> = all
        .into_iter()
        .filter(|entries| check_destinations(entries).is_ok())
        .collect();
    let rejected = total - accepted.len();
    (accepted, rejected)
}

#[test]
fn test_every_path_has_exactly_one_class() {
    let tmp = tempfile::tempdir().unwrap();
    let pool = entry_pool(tmp.path());
    let (accepted, rejected) = accepted_subsets(&pool);
    assert!(rejected > 0);

    for entries in accepted {
        let classes = Classification::from_entries(&entries);

        let mut seen = HashSet::new();
        for path in classes.paths() {
            assert!(seen.insert(path.clone()), "{} classified twice", path);
        }

        let mut expected = HashSet::new();
        for entry in &entries {
            if entry.class == FileClass::AppSet {
                expected.insert(entry.install_dir.clone());
                continue;
            }
            expected.extend(entry.installed_paths());
            if entry.class.permission() == apexbuild::apex::PermissionClass::Executable {
                expected.extend(entry.ancestor_dirs());
            }
        }
        assert_eq!(seen, expected);

        let table = PermissionTable::from_classification(&classes);
        for path in classes.read_only.iter().chain(&classes.executable) {
            assert!(table.get(&format!("/{}", path)).is_some(), "{} has no permission", path);
            // No app-set glob covers a path with its own line
            for dir in &classes.app_set_dirs {
                assert!(
                    path != dir && !path.starts_with(&format!("{}/", dir)),
                    "{} is also covered by /{}/*",
                    path,
                    dir
                );
            }
        }
    }
}

#[test]
fn test_required_never_overlaps_provided() {
    let names = ["libA", "libB", "libC", "libD"];
    let lists: Vec<Vec<String>> = (0u32..(1 << names.len()))
        .map(|mask| {
            names
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, n)| n.to_string())
                .collect()
        })
        .collect();

    for provided in &lists {
        for required in &lists {
            let mut manifest = ApexManifest::parse(r#"{"name": "p", "version": 1}"#).unwrap();
            manifest.set_native_libs(provided, required);

            let p: BTreeSet<&String> = manifest.provide_native_libs.iter().collect();
            assert!(manifest.require_native_libs.iter().all(|r| !p.contains(r)));

            let mut sorted = manifest.require_native_libs.clone();
            sorted.sort();
            sorted.dedup();
            assert_eq!(sorted, manifest.require_native_libs);
        }
    }
}

#[test]
fn test_required_minus_provided_scenario() {
    let mut manifest = ApexManifest::parse(r#"{"name": "p", "version": 1}"#).unwrap();
    manifest.set_native_libs(&["libA".to_string()], &["libA".to_string(), "libB".to_string()]);
    assert_eq!(manifest.require_native_libs, vec!["libB"]);
}

#[test]
fn test_content_listing_sorted_and_unique() {
    let tmp = tempfile::tempdir().unwrap();
    let built = tmp.path().join("built");
    fs::create_dir_all(&built).unwrap();
    let pool = entry_pool(&built);

    for (i, entries) in accepted_subsets(&pool).0.into_iter().enumerate() {
        let staging = tmp.path().join(format!("staging-{}", i));
        BuildRecipe::from_entries(&entries, &NeverLink)
            .apply(&staging)
            .unwrap();

        let listing = content_manifest(&staging).unwrap();
        let mut expected = listing.clone();
        expected.sort();
        expected.dedup();
        assert_eq!(listing, expected);
        assert!(listing.iter().all(|p| p.starts_with("./")));
    }
}

#[test]
fn test_recipe_is_deterministic() {
    let tmp = tempfile::tempdir().unwrap();
    let pool = entry_pool(tmp.path());
    let tool = FakeImageTool::new();
    let policy = PlatformLinkPolicy::new(true);
    let assembler = ImageAssembler::new(&tool, &policy);

    for entries in accepted_subsets(&pool).0 {
        let staging = tmp.path().join("staging");
        let mut scripts = Vec::new();
        let mut tables = Vec::new();
        for _ in 0..2 {
            if staging.exists() {
                fs::remove_dir_all(&staging).unwrap();
            }
            let (_, table, recipe) = assembler.plan(&entries).unwrap();
            recipe.apply(&staging).unwrap();
            scripts.push(recipe.to_shell(&staging));
            tables.push(table.render());
        }
        assert_eq!(scripts[0], scripts[1]);
        assert_eq!(tables[0], tables[1]);
    }
}

#[test]
fn test_walk_visits_each_edge_once() {
    let mut graph = DependencyGraph::new();
    for name in ["A", "B", "C", "D", "E"] {
        graph.add_node(ModuleNode::new(name));
    }
    graph.add_edge(DependencyEdge::internal("A", "B"));
    graph.add_edge(DependencyEdge::internal("A", "C"));
    graph.add_edge(DependencyEdge::internal("B", "D"));
    graph.add_edge(DependencyEdge::internal("C", "D"));
    graph.add_edge(DependencyEdge::internal("D", "E"));
    // Duplicate declaration and a back edge
    graph.add_edge(DependencyEdge::internal("A", "B"));
    graph.add_edge(DependencyEdge::internal("E", "A"));

    let mut visited = Vec::new();
    graph
        .walk("A", |from, to, _| {
            visited.push((from.name.clone(), to.name.clone()));
            true
        })
        .unwrap();

    let unique: HashSet<&(String, String)> = visited.iter().collect();
    assert_eq!(unique.len(), visited.len());
    assert_eq!(visited.len(), 6);
}

#[test]
fn test_walk_stops_at_external_edge() {
    let mut graph = DependencyGraph::new();
    for name in ["pkg", "libx", "other", "deep"] {
        graph.add_node(ModuleNode::new(name));
    }
    graph.add_edge(DependencyEdge::internal("pkg", "libx"));
    graph.add_edge(DependencyEdge::external("libx", "other"));
    graph.add_edge(DependencyEdge::internal("other", "deep"));

    let mut reached = Vec::new();
    graph
        .walk("pkg", |_, to, edge| {
            reached.push(to.name.clone());
            !edge.external
        })
        .unwrap();
    assert_eq!(reached, vec!["libx", "other"]);
}

#[test]
fn test_executable_and_read_only_scenario() {
    let entries = vec![
        FileEntry::at("/out/foo", "bin/foo", FileClass::Executable).unwrap(),
        FileEntry::at("/out/bar.so", "lib/bar.so", FileClass::NativeSharedLib).unwrap(),
    ];
    let classes = Classification::from_entries(&entries);
    assert_eq!(classes.executable, vec!["bin/foo", "bin"]);
    assert_eq!(classes.read_only, vec!["lib/bar.so"]);
}

#[test]
fn test_allow_list_scenario() {
    let allowed = parse_allow_list("a.txt\nb.txt\n");
    let err = validate_content(["a.txt", "b.txt", "c.txt"], &allowed, "cp content.txt allowed.txt")
        .unwrap_err();
    match err {
        Error::ContentViolation { unexpected, .. } => assert_eq!(unexpected, vec!["c.txt"]),
        other => panic!("expected content violation, got {}", other),
    }
}
