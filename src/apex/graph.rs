// src/apex/graph.rs

//! Dependency graph and depth-first walker
//!
//! The graph is built fresh for every assembly pass from the module
//! configuration. The walker stops at package boundaries (external edges)
//! when the visitor asks it to, visits every edge at most once, and expands
//! every module at most once, so diamond-shaped graphs stay O(V + E).

use crate::apex::config::FileSpec;
use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::Write as _;
use std::path::PathBuf;

/// A module in the dependency graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleNode {
    pub name: String,
    /// Native library names the module produces
    pub native_libs: Vec<String>,
    pub notice: Option<PathBuf>,
    pub min_sdk_version: Option<String>,
    pub available_to_platform: bool,
    /// Payload files the module contributes when bundled
    pub files: Vec<FileSpec>,
}

impl ModuleNode {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            native_libs: Vec::new(),
            notice: None,
            min_sdk_version: None,
            available_to_platform: false,
            files: Vec::new(),
        }
    }

    pub fn with_native_libs(mut self, libs: &[&str]) -> Self {
        self.native_libs = libs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_notice(mut self, notice: &str) -> Self {
        self.notice = Some(PathBuf::from(notice));
        self
    }
}

/// A dependency edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
    /// Crosses a package boundary
    pub external: bool,
    pub tag: String,
}

impl DependencyEdge {
    pub fn internal(from: &str, to: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            external: false,
            tag: "shared".to_string(),
        }
    }

    pub fn external(from: &str, to: &str) -> Self {
        Self {
            external: true,
            ..Self::internal(from, to)
        }
    }
}

/// Dependency graph of one package
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: HashMap<String, ModuleNode>,
    /// Outgoing edges in declaration order
    edges: HashMap<String, Vec<DependencyEdge>>,
}

impl DependencyGraph {
    /// Create a new empty dependency graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module node to the graph
    pub fn add_node(&mut self, node: ModuleNode) {
        self.nodes.insert(node.name.clone(), node);
    }

    /// Add a dependency edge to the graph
    pub fn add_edge(&mut self, edge: DependencyEdge) {
        self.edges.entry(edge.from.clone()).or_default().push(edge);
    }

    /// Get a node by module name
    pub fn get_node(&self, name: &str) -> Option<&ModuleNode> {
        self.nodes.get(name)
    }

    /// Get all outgoing edges of a module
    pub fn get_dependencies(&self, name: &str) -> Vec<&DependencyEdge> {
        self.edges
            .get(name)
            .map(|v| v.iter().collect())
            .unwrap_or_default()
    }

    fn node(&self, name: &str) -> Result<&ModuleNode> {
        self.nodes
            .get(name)
            .ok_or_else(|| Error::Graph(format!("module '{}' is not declared", name)))
    }

    /// Depth-first walk from `root`.
    ///
    /// `visit(from, to, edge)` is called once per distinct `(from, to)` edge;
    /// returning `false` prunes the subtree below `to` for that edge. A module
    /// is expanded at most once, the first time a visit of an edge into it
    /// returns `true`. Self edges are skipped.
    pub fn walk<F>(&self, root: &str, mut visit: F) -> Result<()>
    where
        F: FnMut(&ModuleNode, &ModuleNode, &DependencyEdge) -> bool,
    {
        self.node(root)?;

        let mut visited_edges: HashSet<(&str, &str)> = HashSet::new();
        let mut expanded: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&DependencyEdge> = Vec::new();

        expanded.insert(root);
        self.push_children(root, &mut stack);

        while let Some(edge) = stack.pop() {
            if edge.from == edge.to {
                continue;
            }
            if !visited_edges.insert((edge.from.as_str(), edge.to.as_str())) {
                continue;
            }

            let from = self.node(&edge.from)?;
            let to = self.node(&edge.to)?;

            if visit(from, to, edge) && expanded.insert(to.name.as_str()) {
                self.push_children(&to.name, &mut stack);
            }
        }

        Ok(())
    }

    /// Push outgoing edges so they pop in declaration order
    fn push_children<'a>(&'a self, name: &str, stack: &mut Vec<&'a DependencyEdge>) {
        if let Some(edges) = self.edges.get(name) {
            stack.extend(edges.iter().rev());
        }
    }

    /// Notice files of the package and every internally reachable module
    pub fn collect_notices(&self, root: &str) -> Result<Vec<PathBuf>> {
        let mut notices = BTreeSet::new();
        if let Some(notice) = &self.node(root)?.notice {
            notices.insert(notice.clone());
        }

        self.walk(root, |_, to, edge| {
            if edge.external {
                return false;
            }
            if let Some(notice) = &to.notice {
                notices.insert(notice.clone());
            }
            true
        })?;

        Ok(notices.into_iter().collect())
    }

    /// Native libraries provided by the package and required from outside it
    ///
    /// Libraries of internally reachable modules are provided. Libraries of
    /// modules on the far side of an external edge are required; the walk does
    /// not descend past them.
    pub fn native_libs(&self, root: &str) -> Result<NativeLibs> {
        let mut libs = NativeLibs::default();
        libs.provided.extend(self.node(root)?.native_libs.iter().cloned());

        self.walk(root, |_, to, edge| {
            if edge.external {
                libs.required.extend(to.native_libs.iter().cloned());
                false
            } else {
                libs.provided.extend(to.native_libs.iter().cloned());
                true
            }
        })?;

        Ok(libs)
    }

    /// Dependency records for the dependency-info report
    pub fn dependency_info(&self, root: &str) -> Result<DependencyReport> {
        let root_node = self.node(root)?;
        let mut infos: BTreeMap<String, DepInfo> = BTreeMap::new();

        self.walk(root, |from, to, edge| {
            let info = infos.entry(to.name.clone()).or_insert_with(|| DepInfo {
                to: to.name.clone(),
                from: Vec::new(),
                external: true,
                min_sdk_version: to.min_sdk_version.clone(),
            });
            if !info.from.contains(&from.name) {
                info.from.push(from.name.clone());
            }
            // Reachable internally through any path means it is bundled
            info.external = info.external && edge.external;
            !edge.external
        })?;

        let mut deps: Vec<DepInfo> = infos.into_values().collect();
        for dep in &mut deps {
            dep.from.sort();
        }

        Ok(DependencyReport {
            module: root_node.name.clone(),
            min_sdk_version: root_node.min_sdk_version.clone(),
            deps,
        })
    }
}

/// Provided/required native library names before manifest normalization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeLibs {
    pub provided: Vec<String>,
    pub required: Vec<String>,
}

/// One entry of the dependency-info report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepInfo {
    pub to: String,
    pub from: Vec<String>,
    pub external: bool,
    pub min_sdk_version: Option<String>,
}

/// Dependency-info report for a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyReport {
    pub module: String,
    pub min_sdk_version: Option<String>,
    pub deps: Vec<DepInfo>,
}

impl DependencyReport {
    /// Render the plain-text report (`deps-info.txt`)
    ///
    /// ```text
    /// com.example.media(minSdkVersion:29)
    /// libmedia(minSdkVersion:29) <- com.example.media, mediatool
    /// (external) libc(minSdkVersion:(no version)) <- libmedia
    /// ```
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{}(minSdkVersion:{})",
            self.module,
            sdk_or_placeholder(&self.min_sdk_version)
        );
        for dep in &self.deps {
            let _ = writeln!(
                out,
                "{}{}(minSdkVersion:{}) <- {}",
                if dep.external { "(external) " } else { "" },
                dep.to,
                sdk_or_placeholder(&dep.min_sdk_version),
                dep.from.join(", ")
            );
        }
        out
    }

    /// Render the JSON report (`deps-info.json`)
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn sdk_or_placeholder(version: &Option<String>) -> &str {
    version.as_deref().unwrap_or("(no version)")
}
