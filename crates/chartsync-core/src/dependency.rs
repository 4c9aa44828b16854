//! Declared and vendored subchart graph
//!
//! Declared dependencies come from `Chart.yaml`; vendored ones are whatever
//! sits in the chart's `charts/` directory, either extracted or as `.tgz`.
//! Both are merged by chart name into one tree stored as an arena of nodes.
//! Building never fails: unreadable subcharts become nodes with empty fields.

use semver::{Version, VersionReq};
use std::path::{Path, PathBuf};

use crate::archive;
use crate::chart::{ChartDependency, ChartMetadata};

pub type NodeId = usize;

const VENDOR_DIR: &str = "charts";
const MAX_DEPTH: usize = 16;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyNode {
    pub name: String,
    pub repository: Option<String>,
    pub declared_version: Option<String>,
    pub vendored_version: Option<String>,
    pub alias: Option<String>,
    pub condition: Option<String>,
    pub children: Vec<NodeId>,
    /// Vendored, but its Chart.yaml could not be read
    pub unreadable: bool,
    /// Chart name already appears among its ancestors; not expanded
    pub cycle: bool,
}

/// Declared constraint not satisfied by the vendored copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDrift {
    pub name: String,
    pub declared: String,
    pub vendored: String,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyTree {
    nodes: Vec<DependencyNode>,
}

enum Vendored {
    Dir(PathBuf, Option<ChartMetadata>),
    Archive(Option<ChartMetadata>),
}

struct VendoredEntry {
    name: String,
    kind: Vendored,
}

impl DependencyTree {
    /// Build the tree rooted at an extracted chart directory
    pub fn build(chart_root: &Path) -> Self {
        let mut tree = Self::default();
        let meta = ChartMetadata::load(chart_root).ok();
        let name = meta
            .as_ref()
            .map(|m| m.name.clone())
            .unwrap_or_else(|| dir_name(chart_root));
        let mut ancestors = Vec::new();
        tree.add_vendored_dir(chart_root, name, None, meta, &mut ancestors);
        tree
    }

    pub fn root(&self) -> Option<&DependencyNode> {
        self.nodes.first()
    }

    pub fn get(&self, id: NodeId) -> Option<&DependencyNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DependencyNode> {
        self.nodes.iter()
    }

    /// Direct dependencies of the root chart
    pub fn top_level(&self) -> Vec<&DependencyNode> {
        self.root()
            .map(|root| root.children.iter().filter_map(|id| self.get(*id)).collect())
            .unwrap_or_default()
    }

    /// Top-level dependencies that are declared but have no vendored copy
    pub fn missing_vendored(&self) -> Vec<&str> {
        self.top_level()
            .into_iter()
            .filter(|n| n.declared_version.is_some() && n.vendored_version.is_none() && !n.unreadable)
            .map(|n| n.name.as_str())
            .collect()
    }

    /// Every node whose vendored version falls outside its declared constraint
    pub fn drift(&self) -> Vec<VersionDrift> {
        self.nodes
            .iter()
            .filter_map(|n| {
                let declared = n.declared_version.as_ref()?;
                let vendored = n.vendored_version.as_ref()?;
                (!satisfies(declared, vendored)).then(|| VersionDrift {
                    name: n.name.clone(),
                    declared: declared.clone(),
                    vendored: vendored.clone(),
                })
            })
            .collect()
    }

    /// Whether rendering should refresh `charts/` first
    pub fn needs_dependency_update(&self) -> bool {
        !self.missing_vendored().is_empty() || !self.drift().is_empty()
    }

    /// Render as tree for display
    pub fn render_tree(&self) -> String {
        let Some(root) = self.root() else {
            return String::new();
        };

        let mut lines = vec![match &root.vendored_version {
            Some(v) => format!("{}@{}", root.name, v),
            None => root.name.clone(),
        }];
        let count = root.children.len();
        for (i, child) in root.children.iter().enumerate() {
            self.render_tree_node(*child, &mut lines, "", i + 1 == count);
        }
        lines.join("\n")
    }

    fn render_tree_node(&self, id: NodeId, lines: &mut Vec<String>, prefix: &str, is_last: bool) {
        let Some(node) = self.get(id) else {
            return;
        };
        let connector = if is_last { "└── " } else { "├── " };

        let mut label = match &node.alias {
            Some(alias) if alias != &node.name => format!("{} (alias: {})", node.name, alias),
            _ => node.name.clone(),
        };
        match (&node.declared_version, &node.vendored_version) {
            (Some(d), Some(v)) => label.push_str(&format!("@{} (vendored {})", d, v)),
            (Some(d), None) if node.unreadable => label.push_str(&format!("@{} (unreadable)", d)),
            (Some(d), None) => label.push_str(&format!("@{} (not vendored)", d)),
            (None, Some(v)) => label.push_str(&format!(" (vendored {}, undeclared)", v)),
            (None, None) if node.unreadable => label.push_str(" (unreadable)"),
            (None, None) => {}
        }
        if node.cycle {
            label.push_str(" (cycle)");
        }
        lines.push(format!("{}{}{}", prefix, connector, label));

        let new_prefix = format!("{}{}   ", prefix, if is_last { " " } else { "│" });
        let count = node.children.len();
        for (i, child) in node.children.iter().enumerate() {
            self.render_tree_node(*child, lines, &new_prefix, i + 1 == count);
        }
    }

    fn push(&mut self, node: DependencyNode) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn add_vendored_dir(
        &mut self,
        dir: &Path,
        name: String,
        declared: Option<&ChartDependency>,
        meta: Option<ChartMetadata>,
        ancestors: &mut Vec<String>,
    ) -> NodeId {
        let mut node = declared_node(&name, declared);
        node.vendored_version = meta.as_ref().map(|m| m.version.clone());
        node.unreadable = meta.is_none();
        node.cycle = ancestors.contains(&name);

        let id = self.push(node);
        let Some(meta) = meta else {
            return id;
        };
        if self.nodes[id].cycle || ancestors.len() >= MAX_DEPTH {
            return id;
        }

        ancestors.push(name);
        let children = self.merge_children(dir, &meta, ancestors);
        ancestors.pop();

        self.nodes[id].children = children;
        id
    }

    fn merge_children(&mut self, dir: &Path, meta: &ChartMetadata, ancestors: &mut Vec<String>) -> Vec<NodeId> {
        let mut vendored = scan_vendor_dir(&dir.join(VENDOR_DIR));
        let mut children = Vec::new();

        for dep in &meta.dependencies {
            let pos = vendored.iter().position(|v| v.name == dep.name);
            let id = match pos.map(|p| vendored.remove(p)) {
                Some(entry) => self.add_entry(entry, Some(dep), ancestors),
                None => self.push(declared_node(&dep.name, Some(dep))),
            };
            children.push(id);
        }

        for entry in vendored {
            let id = self.add_entry(entry, None, ancestors);
            children.push(id);
        }

        children
    }

    fn add_entry(&mut self, entry: VendoredEntry, declared: Option<&ChartDependency>, ancestors: &mut Vec<String>) -> NodeId {
        match entry.kind {
            Vendored::Dir(path, meta) => self.add_vendored_dir(&path, entry.name, declared, meta, ancestors),
            Vendored::Archive(meta) => {
                let mut node = declared_node(&entry.name, declared);
                node.vendored_version = meta.as_ref().map(|m| m.version.clone());
                node.unreadable = meta.is_none();
                let id = self.push(node);
                if let Some(meta) = meta {
                    let children: Vec<NodeId> = meta
                        .dependencies
                        .iter()
                        .map(|d| self.push(declared_node(&d.name, Some(d))))
                        .collect();
                    self.nodes[id].children = children;
                }
                id
            }
        }
    }
}

fn declared_node(name: &str, declared: Option<&ChartDependency>) -> DependencyNode {
    DependencyNode {
        name: name.to_string(),
        repository: declared.and_then(|d| d.repository.clone()),
        declared_version: declared.and_then(|d| d.version.clone()),
        alias: declared.and_then(|d| d.alias.clone()),
        condition: declared.and_then(|d| d.condition.clone()),
        ..Default::default()
    }
}

fn scan_vendor_dir(vendor: &Path) -> Vec<VendoredEntry> {
    let Ok(read) = std::fs::read_dir(vendor) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = read.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    paths.sort();

    paths
        .into_iter()
        .filter_map(|path| {
            if path.is_dir() {
                let meta = ChartMetadata::load(&path).ok();
                let name = meta.as_ref().map(|m| m.name.clone()).unwrap_or_else(|| dir_name(&path));
                Some(VendoredEntry {
                    name,
                    kind: Vendored::Dir(path, meta),
                })
            } else if path.extension().is_some_and(|e| e == "tgz") {
                let meta = archive::read_chart_metadata(&path).ok();
                let name = meta.as_ref().map(|m| m.name.clone()).unwrap_or_else(|| {
                    path.file_stem()
                        .map(|s| s.to_string_lossy().to_string())
                        .unwrap_or_default()
                });
                Some(VendoredEntry {
                    name,
                    kind: Vendored::Archive(meta),
                })
            } else {
                None
            }
        })
        .collect()
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Helm-style constraint check; falls back to string equality when either
/// side does not parse
fn satisfies(constraint: &str, version: &str) -> bool {
    let Ok(version) = Version::parse(version.trim().trim_start_matches('v')) else {
        return constraint.trim() == version.trim();
    };
    match VersionReq::parse(&helm_constraint(constraint)) {
        Ok(req) => req.matches(&version),
        Err(_) => constraint.trim().trim_start_matches('v') == version.to_string(),
    }
}

/// `2.x.x` -> `2.*`, `>=1.0 <2.0` -> `>=1.0, <2.0`, exact `1.2.3` -> `=1.2.3`
fn helm_constraint(raw: &str) -> String {
    let parts: Vec<String> = raw
        .split([' ', ','])
        .filter(|p| !p.is_empty())
        .map(|p| {
            let mut p = p.trim_start_matches('v').replace(['x', 'X'], "*");
            let mut wildcard = false;
            while let Some(stripped) = p.strip_suffix(".*") {
                p = stripped.to_string();
                wildcard = true;
            }
            if wildcard {
                p.push_str(".*");
            }
            let has_operator = p.starts_with(['=', '>', '<', '~', '^', '*']);
            if !has_operator && !wildcard && p.matches('.').count() == 2 {
                p.insert(0, '=');
            }
            p
        })
        .collect();
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn fixture() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(
            &root.join("Chart.yaml"),
            r#"apiVersion: v2
name: app
version: 1.0.0
dependencies:
  - name: redis
    version: ^17.0.0
    repository: https://charts.bitnami.com/bitnami
  - name: postgresql
    version: 12.1.0
    repository: https://charts.bitnami.com/bitnami
    condition: postgresql.enabled
"#,
        );
        write(
            &root.join("charts/redis/Chart.yaml"),
            r#"apiVersion: v2
name: redis
version: 17.3.2
dependencies:
  - name: common
    version: 2.x.x
    repository: oci://registry-1.docker.io/bitnamicharts
"#,
        );
        write(
            &root.join("charts/redis/charts/common/Chart.yaml"),
            "apiVersion: v2\nname: common\nversion: 2.0.0\n",
        );
        temp
    }

    #[test]
    fn test_merge_declared_and_vendored() {
        let temp = fixture();
        let tree = DependencyTree::build(temp.path());

        let top = tree.top_level();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].name, "redis");
        assert_eq!(top[0].declared_version.as_deref(), Some("^17.0.0"));
        assert_eq!(top[0].vendored_version.as_deref(), Some("17.3.2"));
        assert_eq!(top[1].name, "postgresql");
        assert!(top[1].vendored_version.is_none());
        assert_eq!(top[1].condition.as_deref(), Some("postgresql.enabled"));

        assert_eq!(tree.missing_vendored(), vec!["postgresql"]);
        assert!(tree.drift().is_empty());
        assert!(tree.needs_dependency_update());
    }

    #[test]
    fn test_render_tree() {
        let temp = fixture();
        let tree = DependencyTree::build(temp.path());
        insta::assert_snapshot!(tree.render_tree(), @r"
        app@1.0.0
        ├── redis@^17.0.0 (vendored 17.3.2)
        │   └── common@2.x.x (vendored 2.0.0)
        └── postgresql@12.1.0 (not vendored)
        ");
    }

    #[test]
    fn test_drift_reported() {
        let temp = fixture();
        write(
            &temp.path().join("charts/postgresql/Chart.yaml"),
            "apiVersion: v2\nname: postgresql\nversion: 12.5.0\n",
        );
        let tree = DependencyTree::build(temp.path());

        assert!(tree.missing_vendored().is_empty());
        assert_eq!(
            tree.drift(),
            vec![VersionDrift {
                name: "postgresql".to_string(),
                declared: "12.1.0".to_string(),
                vendored: "12.5.0".to_string(),
            }]
        );
    }

    #[test]
    fn test_unreadable_subchart_is_a_node() {
        let temp = fixture();
        write(&temp.path().join("charts/broken/Chart.yaml"), "name: [unclosed\n");
        let tree = DependencyTree::build(temp.path());

        let broken = tree.top_level().into_iter().find(|n| n.name == "broken").unwrap();
        assert!(broken.unreadable);
        assert!(broken.vendored_version.is_none());
    }

    #[test]
    fn test_self_reference_does_not_recurse() {
        let temp = TempDir::new().unwrap();
        write(
            &temp.path().join("Chart.yaml"),
            "apiVersion: v2\nname: loop\nversion: 0.1.0\ndependencies:\n  - name: loop\n    version: 0.1.0\n",
        );
        write(
            &temp.path().join("charts/loop/Chart.yaml"),
            "apiVersion: v2\nname: loop\nversion: 0.1.0\ndependencies:\n  - name: loop\n    version: 0.1.0\n",
        );
        let tree = DependencyTree::build(temp.path());

        assert_eq!(tree.len(), 2);
        let child = &tree.top_level()[0];
        assert!(child.cycle);
        assert!(child.children.is_empty());
    }

    #[test]
    fn test_vendored_archive() {
        let temp = fixture();
        let src = temp.path().join("src-postgresql");
        write(
            &src.join("Chart.yaml"),
            "apiVersion: v2\nname: postgresql\nversion: 12.1.0\ndependencies:\n  - name: common\n    version: 2.x.x\n",
        );
        archive::create_chart_archive(&src, "postgresql", &temp.path().join("charts/postgresql-12.1.0.tgz"))
            .unwrap();

        let tree = DependencyTree::build(temp.path());
        let pg = tree.top_level().into_iter().find(|n| n.name == "postgresql").unwrap();
        assert_eq!(pg.vendored_version.as_deref(), Some("12.1.0"));
        assert_eq!(pg.children.len(), 1);
        assert!(tree.missing_vendored().is_empty());
    }

    #[test]
    fn test_helm_constraints() {
        assert!(satisfies("^17.0.0", "17.3.2"));
        assert!(satisfies("2.x.x", "2.9.1"));
        assert!(satisfies("5.19.*", "5.19.3"));
        assert!(satisfies(">=1.0.0 <2.0.0", "1.5.0"));
        assert!(!satisfies("12.1.0", "12.5.0"));
        assert!(satisfies("v1.14.0", "v1.14.0"));
    }
}
