//! Helm `Chart.yaml` metadata

use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

use crate::addon::scalar_to_string;
use crate::error::{CoreError, Result};

pub const CHART_FILE: &str = "Chart.yaml";

/// Chart.yaml structure (the subset chartsync reads)
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    #[serde(default)]
    pub api_version: Option<String>,

    pub name: String,

    #[serde(deserialize_with = "scalar")]
    pub version: String,

    #[serde(default, deserialize_with = "optional_scalar")]
    pub app_version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// application or library
    #[serde(default, rename = "type")]
    pub chart_type: Option<String>,

    #[serde(default)]
    pub dependencies: Vec<ChartDependency>,

    #[serde(default)]
    pub deprecated: bool,
}

/// Dependency declared in Chart.yaml
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartDependency {
    pub name: String,

    /// Version constraint
    #[serde(default, deserialize_with = "optional_scalar")]
    pub version: Option<String>,

    #[serde(default)]
    pub repository: Option<String>,

    #[serde(default)]
    pub condition: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub alias: Option<String>,
}

impl ChartMetadata {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read `<chart_root>/Chart.yaml`
    pub fn load(chart_root: &Path) -> Result<Self> {
        let path = chart_root.join(CHART_FILE);
        if !path.exists() {
            return Err(CoreError::ChartNotFound {
                path: chart_root.display().to_string(),
            });
        }
        let content = std::fs::read_to_string(&path)?;
        Self::from_yaml(&content)
    }

    /// Distinct `http(s)` dependency repositories, in declaration order
    pub fn http_repositories(&self) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        for dep in &self.dependencies {
            if let Some(repo) = dep.repository.as_deref().map(str::trim) {
                if (repo.starts_with("http://") || repo.starts_with("https://"))
                    && !urls.iter().any(|u| u == repo)
                {
                    urls.push(repo.to_string());
                }
            }
        }
        urls
    }

    /// Hosts of `oci://` dependency repositories
    pub fn oci_hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = Vec::new();
        for dep in &self.dependencies {
            if let Some(rest) = dep.repository.as_deref().and_then(|r| r.trim().strip_prefix("oci://")) {
                let host = rest.split('/').next().unwrap_or(rest).to_string();
                if !host.is_empty() && !hosts.contains(&host) {
                    hosts.push(host);
                }
            }
        }
        hosts
    }

    /// Every condition path of every dependency (`a.enabled,b.enabled` splits)
    pub fn conditions(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for dep in &self.dependencies {
            for cond in dep.condition.iter().flat_map(|c| c.split(',')) {
                let cond = cond.trim();
                if !cond.is_empty() && !out.iter().any(|c| c == cond) {
                    out.push(cond.to_string());
                }
            }
        }
        out
    }
}

impl ChartDependency {
    /// Alias if set, else the chart name
    pub fn effective_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

fn scalar<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    scalar_to_string(&value).ok_or_else(|| serde::de::Error::custom("expected a scalar"))
}

fn optional_scalar<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(scalar_to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHART: &str = r#"
apiVersion: v2
name: kube-prometheus-stack
version: 58.1.0
appVersion: v0.73.0
type: application
dependencies:
  - name: crds
    version: "0.0.0"
    condition: crds.enabled
  - name: kube-state-metrics
    version: 5.19.*
    repository: https://prometheus-community.github.io/helm-charts
    condition: kubeStateMetrics.enabled
  - name: prometheus-node-exporter
    version: 4.33.*
    repository: https://prometheus-community.github.io/helm-charts
    condition: nodeExporter.enabled,prometheus-node-exporter.enabled
  - name: grafana
    version: 7.3.*
    repository: https://grafana.github.io/helm-charts
    condition: grafana.enabled
  - name: common
    version: 2.x.x
    repository: oci://registry-1.docker.io/bitnamicharts
"#;

    #[test]
    fn test_parse_chart_yaml() {
        let meta = ChartMetadata::from_yaml(CHART).unwrap();
        assert_eq!(meta.name, "kube-prometheus-stack");
        assert_eq!(meta.version, "58.1.0");
        assert_eq!(meta.app_version.as_deref(), Some("v0.73.0"));
        assert_eq!(meta.dependencies.len(), 5);
    }

    #[test]
    fn test_dependency_repositories() {
        let meta = ChartMetadata::from_yaml(CHART).unwrap();
        assert_eq!(
            meta.http_repositories(),
            vec![
                "https://prometheus-community.github.io/helm-charts",
                "https://grafana.github.io/helm-charts",
            ]
        );
        assert_eq!(meta.oci_hosts(), vec!["registry-1.docker.io"]);
    }

    #[test]
    fn test_conditions_split() {
        let meta = ChartMetadata::from_yaml(CHART).unwrap();
        assert_eq!(
            meta.conditions(),
            vec![
                "crds.enabled",
                "kubeStateMetrics.enabled",
                "nodeExporter.enabled",
                "prometheus-node-exporter.enabled",
                "grafana.enabled",
            ]
        );
    }

    #[test]
    fn test_numeric_versions() {
        let meta = ChartMetadata::from_yaml("name: x\nversion: 1.0\nappVersion: 2\n").unwrap();
        assert_eq!(meta.version, "1.0");
        assert_eq!(meta.app_version.as_deref(), Some("2"));
    }

    #[test]
    fn test_load_missing_chart() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            ChartMetadata::load(dir.path()),
            Err(CoreError::ChartNotFound { .. })
        ));
    }
}
