//! Addon discovery from values documents and catalogs
//!
//! Values documents come in many shapes: a canonical `addons` list, an
//! `addons` map keyed by release, or addon specs buried anywhere in the tree
//! (ArgoCD `Application` sources, umbrella chart values, ...). Each mapping
//! node is classified by a fixed set of field rules into a [`Candidate`].
//!
//! Catalogs use the stable [`Addon`] schema and are read without heuristics.

use indexmap::IndexSet;
use serde_yaml::{Mapping, Value};
use std::path::Path;

use crate::addon::{Addon, scalar_to_string};
use crate::error::{CoreError, Result};

/// Fields an addon spec can carry, each accepted under several names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Chart,
    Repository,
    Version,
    Release,
    Namespace,
    IncludeDependencies,
}

impl Field {
    fn aliases(self) -> &'static [&'static str] {
        match self {
            Field::Chart => &["chart", "addonChart"],
            Field::Repository => &[
                "repoUrl",
                "repoURL",
                "addonChartRepository",
                "repository",
            ],
            Field::Version => &["targetRevision", "addonChartVersion", "version"],
            Field::Release => &["releaseName", "addonChartReleaseName", "release"],
            Field::Namespace => &[
                "ociNamespace",
                "oci_namespace",
                "addonChartRepositoryNamespace",
            ],
            Field::IncludeDependencies => &["includeDependencies"],
        }
    }

    /// First alias holding a non-empty scalar
    fn lookup(self, map: &Mapping) -> Option<String> {
        self.aliases().iter().find_map(|alias| {
            map.get(*alias)
                .and_then(scalar_to_string)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
    }
}

/// Outcome of classifying one node of a values document
#[derive(Debug)]
pub enum Candidate {
    Addon(Addon),
    NotAnAddon,
    /// Looks like an addon but fails validation
    Malformed(String),
}

/// Classify a single node against the field rules
pub fn classify(node: &Value) -> Candidate {
    let Value::Mapping(map) = node else {
        return Candidate::NotAnAddon;
    };

    let (Some(chart), Some(repository)) =
        (Field::Chart.lookup(map), Field::Repository.lookup(map))
    else {
        return Candidate::NotAnAddon;
    };

    let mut addon = Addon {
        chart,
        oci_namespace: Field::Namespace.lookup(map),
        repository,
        version: Field::Version.lookup(map),
        release: Field::Release.lookup(map),
        include_dependencies: true,
    };
    if let Some(flag) = Field::IncludeDependencies.lookup(map) {
        addon.include_dependencies = flag != "false";
    }

    match addon.normalized() {
        Ok(addon) => Candidate::Addon(addon),
        Err(e) => Candidate::Malformed(e.to_string()),
    }
}

/// Addons found in one input plus the nodes that could not be used
#[derive(Debug, Default)]
pub struct Discovery {
    pub addons: Vec<Addon>,
    pub errors: Vec<CoreError>,
}

impl Discovery {
    fn push(&mut self, addon: Addon) {
        self.addons.push(addon);
    }

    fn reject(&mut self, node: impl Into<String>, message: impl Into<String>) {
        self.errors.push(CoreError::discovery(node, message));
    }

    /// Drop later duplicates of `(chart, version, repository, ociNamespace)`
    fn dedupe(mut self) -> Self {
        let mut seen = IndexSet::new();
        self.addons.retain(|a| seen.insert(a.dedup_key()));
        self
    }

    /// Concatenate another discovery result after this one
    pub fn extend(&mut self, other: Discovery) {
        self.addons.extend(other.addons);
        self.errors.extend(other.errors);
    }
}

/// Discover addons in a parsed values document
pub fn discover_in_values(doc: &Value) -> Discovery {
    let mut found = Discovery::default();

    match doc.get("addons") {
        Some(Value::Sequence(items)) => {
            for (idx, item) in items.iter().enumerate() {
                canonical_entry(&mut found, format!("addons[{}]", idx), item, None);
            }
        }
        Some(Value::Mapping(entries)) => {
            for (key, item) in entries {
                let name = scalar_to_string(key).unwrap_or_default();
                canonical_entry(&mut found, format!("addons.{}", name), item, Some(name));
            }
        }
        Some(Value::Null) | None => scan(&mut found, doc),
        Some(_) => found.reject("addons", "expected a list or a map of addon specs"),
    }

    found.dedupe()
}

/// Read and discover addons in a values file
pub fn discover_in_values_file(path: &Path) -> Result<Discovery> {
    let content = std::fs::read_to_string(path)?;
    let doc: Value = serde_yaml::from_str(&content)?;
    Ok(discover_in_values(&doc))
}

fn canonical_entry(found: &mut Discovery, node: String, item: &Value, key: Option<String>) {
    if !item.is_mapping() {
        found.reject(node, "addon entry is not a mapping");
        return;
    }
    match classify(item) {
        Candidate::Addon(mut addon) => {
            if addon.release.is_none() {
                addon.release = key.filter(|k| !k.is_empty());
            }
            found.push(addon);
        }
        Candidate::NotAnAddon => found.reject(node, "missing chart or repository"),
        Candidate::Malformed(message) => found.reject(node, message),
    }
}

fn scan(found: &mut Discovery, node: &Value) {
    match classify(node) {
        Candidate::Addon(addon) => found.push(addon),
        Candidate::Malformed(_) | Candidate::NotAnAddon => match node {
            Value::Mapping(map) => {
                for value in map.values() {
                    scan(found, value);
                }
            }
            Value::Sequence(items) => {
                for item in items {
                    scan(found, item);
                }
            }
            _ => {}
        },
    }
}

/// Parse a catalog: a top-level list, or a mapping with an `addons` list
pub fn discover_in_catalog(yaml: &str) -> Result<Discovery> {
    let doc: Value = serde_yaml::from_str(yaml)?;
    let entries = match &doc {
        Value::Sequence(items) => items,
        Value::Mapping(_) => match doc.get("addons") {
            Some(Value::Sequence(items)) => items,
            _ => {
                return Err(CoreError::discovery(
                    "addons",
                    "catalog must contain an 'addons' list",
                ));
            }
        },
        Value::Null => return Ok(Discovery::default()),
        _ => {
            return Err(CoreError::discovery(
                "<root>",
                "catalog must be a list or a mapping",
            ));
        }
    };

    let mut found = Discovery::default();
    for (idx, entry) in entries.iter().enumerate() {
        let node = format!("addons[{}]", idx);
        match serde_yaml::from_value::<Addon>(entry.clone()) {
            Ok(addon) => match addon.normalized() {
                Ok(addon) => found.push(addon),
                Err(e) => found.reject(node, e.to_string()),
            },
            Err(e) => found.reject(node, e.to_string()),
        }
    }
    Ok(found)
}

/// Load several catalog files in order
pub fn discover_in_catalog_files<P: AsRef<Path>>(paths: &[P]) -> Result<Discovery> {
    let mut all = Discovery::default();
    for path in paths {
        let content = std::fs::read_to_string(path.as_ref())?;
        all.extend(discover_in_catalog(&content)?);
    }
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(yaml: &str) -> Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_canonical_list() {
        let found = discover_in_values(&doc(
            r#"
addons:
  - chart: cert-manager
    repoUrl: https://charts.jetstack.io
    targetRevision: v1.14.0
    releaseName: cert-manager
  - addonChart: karpenter/karpenter
    addonChartRepository: oci://public.ecr.aws
    addonChartVersion: 1.0.6
"#,
        ));

        assert!(found.errors.is_empty());
        assert_eq!(found.addons.len(), 2);
        assert_eq!(found.addons[0].version.as_deref(), Some("v1.14.0"));
        assert_eq!(found.addons[1].chart, "karpenter");
        assert_eq!(found.addons[1].oci_namespace.as_deref(), Some("karpenter"));
    }

    #[test]
    fn test_canonical_map_key_becomes_release() {
        let found = discover_in_values(&doc(
            r#"
addons:
  metrics:
    chart: metrics-server
    repository: https://kubernetes-sigs.github.io/metrics-server
  named:
    chart: external-dns
    repository: https://kubernetes-sigs.github.io/external-dns
    releaseName: dns
"#,
        ));

        assert_eq!(found.addons.len(), 2);
        assert_eq!(found.addons[0].release.as_deref(), Some("metrics"));
        assert_eq!(found.addons[1].release.as_deref(), Some("dns"));
    }

    #[test]
    fn test_malformed_entry_does_not_stop_discovery() {
        let found = discover_in_values(&doc(
            r#"
addons:
  - chart: broken
  - chart: ok
    repository: https://charts.example.com
  - just-a-string
"#,
        ));

        assert_eq!(found.addons.len(), 1);
        assert_eq!(found.addons[0].chart, "ok");
        assert_eq!(found.errors.len(), 2);
        assert!(found.errors[0].to_string().contains("addons[0]"));
        assert!(found.errors[1].to_string().contains("addons[2]"));
    }

    #[test]
    fn test_heuristic_scan_finds_nested_specs() {
        let found = discover_in_values(&doc(
            r#"
platform:
  apps:
    - name: ingress
      source:
        chart: ingress-nginx
        repoURL: https://kubernetes.github.io/ingress-nginx
        targetRevision: 4.10.0
  observability:
    grafana:
      spec:
        chart: grafana
        repository: https://grafana.github.io/helm-charts
        version: 7.3.0
image:
  repository: nginx
  tag: "1.25"
"#,
        ));

        assert!(found.errors.is_empty());
        let charts: Vec<_> = found.addons.iter().map(|a| a.chart.as_str()).collect();
        assert_eq!(charts, vec!["ingress-nginx", "grafana"]);
    }

    #[test]
    fn test_duplicates_collapse() {
        let found = discover_in_values(&doc(
            r#"
a:
  chart: redis
  repository: https://charts.bitnami.com/bitnami
  version: 18.0.0
b:
  chart: redis
  repository: https://charts.bitnami.com/bitnami
  version: 18.0.0
  release: cache
c:
  chart: redis
  repository: https://charts.bitnami.com/bitnami
  version: 19.0.0
"#,
        ));

        assert_eq!(found.addons.len(), 2);
        assert!(found.addons[0].release.is_none());
    }

    #[test]
    fn test_numeric_version_is_stringified() {
        let found = discover_in_values(&doc(
            r#"
addons:
  - chart: demo
    repository: https://example/charts
    version: 2.3
"#,
        ));
        assert_eq!(found.addons[0].version.as_deref(), Some("2.3"));
    }

    #[test]
    fn test_catalog_list_and_mapping_forms() {
        let list = discover_in_catalog(
            r#"
- chart: a
  repository: https://charts.example.com
  release: r1
"#,
        )
        .unwrap();
        assert_eq!(list.addons.len(), 1);

        let mapping = discover_in_catalog(
            r#"
addons:
  - chart: ns/b
    repository: oci://registry.example.com
  - repository: https://charts.example.com
"#,
        )
        .unwrap();
        assert_eq!(mapping.addons.len(), 1);
        assert_eq!(mapping.addons[0].oci_namespace.as_deref(), Some("ns"));
        assert_eq!(mapping.errors.len(), 1);
    }

    #[test]
    fn test_catalog_rejects_wrong_shape() {
        assert!(discover_in_catalog("addons: nope").is_err());
        assert!(discover_in_catalog("").unwrap().addons.is_empty());
    }

    #[test]
    fn test_multiple_catalog_files_in_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let first = dir.path().join("one.yaml");
        let second = dir.path().join("two.yaml");
        std::fs::write(&first, "- {chart: a, repository: https://x}\n").unwrap();
        std::fs::write(&second, "addons:\n  - {chart: b, repository: https://y}\n").unwrap();

        let found = discover_in_catalog_files(&[first, second]).unwrap();
        let charts: Vec<_> = found.addons.iter().map(|a| a.chart.as_str()).collect();
        assert_eq!(charts, vec!["a", "b"]);
    }
}
