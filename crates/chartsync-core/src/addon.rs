//! Addon model, catalog documents and name filtering

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{CoreError, Result};

/// Hosts that only serve charts over OCI, even when written without `oci://`
const OCI_ONLY_HOSTS: &[&str] = &["public.ecr.aws", "ghcr.io"];

/// One declared Helm chart to mirror
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Addon {
    pub chart: String,

    #[serde(default, alias = "oci_namespace", skip_serializing_if = "Option::is_none")]
    pub oci_namespace: Option<String>,

    /// HTTP Helm repository URL or OCI registry root
    pub repository: String,

    /// `None` means "resolve to latest"
    #[serde(
        default,
        deserialize_with = "optional_scalar",
        skip_serializing_if = "Option::is_none"
    )]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,

    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub include_dependencies: bool,
}

/// How the chart is fetched from its source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressingMode {
    /// Classic Helm repository with an `index.yaml`
    Http { url: String },
    /// OCI registry; `reference` is the full `oci://host[/ns]/chart`
    Oci { reference: String },
}

impl Addon {
    /// Create a validated addon. A chart written as `namespace/chart` is
    /// split at its last separator into `oci_namespace` and `chart`.
    pub fn new(chart: impl Into<String>, repository: impl Into<String>) -> Result<Self> {
        let addon = Self {
            chart: chart.into(),
            oci_namespace: None,
            repository: repository.into(),
            version: None,
            release: None,
            include_dependencies: true,
        };
        addon.normalized()
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        let version = version.into();
        self.version = if version.trim().is_empty() {
            None
        } else {
            Some(version.trim().to_string())
        };
        self
    }

    pub fn with_release(mut self, release: impl Into<String>) -> Self {
        self.release = Some(release.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        let ns = namespace.into().trim_matches('/').to_string();
        self.oci_namespace = if ns.is_empty() { None } else { Some(ns) };
        self
    }

    pub fn with_include_dependencies(mut self, include: bool) -> Self {
        self.include_dependencies = include;
        self
    }

    /// Apply the namespace split and whitespace cleanup, then validate
    pub fn normalized(mut self) -> Result<Self> {
        let chart = self.chart.trim().trim_matches('/').to_string();
        match chart.rsplit_once('/') {
            Some((ns, name)) => {
                let ns = ns.trim_matches('/');
                if !ns.is_empty() {
                    self.oci_namespace = Some(match self.oci_namespace.take() {
                        Some(existing) if !existing.trim_matches('/').is_empty() => {
                            format!("{}/{}", existing.trim_matches('/'), ns)
                        }
                        _ => ns.to_string(),
                    });
                }
                self.chart = name.to_string();
            }
            None => self.chart = chart,
        }

        self.repository = self.repository.trim().trim_end_matches('/').to_string();
        self.oci_namespace = self
            .oci_namespace
            .take()
            .map(|ns| ns.trim_matches('/').to_string())
            .filter(|ns| !ns.is_empty());
        self.version = self
            .version
            .take()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        self.release = self
            .release
            .take()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chart.is_empty() {
            return Err(CoreError::MissingField {
                field: "chart".to_string(),
            });
        }
        if self.repository.is_empty() {
            return Err(CoreError::MissingField {
                field: format!("repository (chart '{}')", self.chart),
            });
        }
        Ok(())
    }

    pub fn is_oci(&self) -> bool {
        self.repository.starts_with("oci://")
            || OCI_ONLY_HOSTS
                .iter()
                .any(|host| self.repository.contains(host))
            || self.oci_namespace.is_some()
    }

    pub fn addressing(&self) -> AddressingMode {
        if self.is_oci() {
            let root = self.repository.trim_start_matches("oci://");
            let reference = match &self.oci_namespace {
                Some(ns) => format!("oci://{}/{}/{}", root, ns, self.chart),
                None => format!("oci://{}/{}", root, self.chart),
            };
            AddressingMode::Oci { reference }
        } else {
            AddressingMode::Http {
                url: self.repository.clone(),
            }
        }
    }

    /// Name shown in logs and the summary table
    pub fn display_name(&self) -> &str {
        self.release.as_deref().unwrap_or(&self.chart)
    }

    /// Identity used to drop duplicate declarations
    pub fn dedup_key(&self) -> (String, Option<String>, String, Option<String>) {
        (
            self.chart.clone(),
            self.version.clone(),
            self.repository.clone(),
            self.oci_namespace.clone(),
        )
    }
}

/// Which input document the addon list came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMode {
    Values,
    Catalog,
}

/// Catalog document listing addons with a stable schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub addons: Vec<Addon>,
}

impl Catalog {
    pub fn new(addons: Vec<Addon>) -> Self {
        Self { addons }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }
}

/// Inclusion and exclusion lists applied to discovered addons
#[derive(Debug, Clone, Default)]
pub struct AddonFilter {
    only: HashSet<String>,
    exclude: HashSet<String>,
}

impl AddonFilter {
    pub fn new<I, J, S, T>(only: I, exclude: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Self {
            only: normalize_names(only),
            exclude: normalize_names(exclude),
        }
    }

    /// Split comma-separated selector arguments (`a,b` or repeated flags)
    pub fn split_list<S: AsRef<str>>(inputs: &[S]) -> Vec<String> {
        inputs
            .iter()
            .flat_map(|s| s.as_ref().split(','))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.only.is_empty() && self.exclude.is_empty()
    }

    /// Values mode matches on `chart`; catalog mode matches on `release`
    pub fn matches(&self, addon: &Addon, mode: DiscoveryMode) -> bool {
        let key = match mode {
            DiscoveryMode::Values => addon.chart.as_str(),
            DiscoveryMode::Catalog => addon.release.as_deref().unwrap_or(""),
        }
        .trim()
        .to_lowercase();

        if !self.only.is_empty() && !self.only.contains(&key) {
            return false;
        }
        !self.exclude.contains(&key)
    }

    pub fn apply(&self, addons: Vec<Addon>, mode: DiscoveryMode) -> Vec<Addon> {
        addons
            .into_iter()
            .filter(|a| self.matches(a, mode))
            .collect()
    }
}

fn normalize_names<I, S>(names: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|s| s.as_ref().trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn default_true() -> bool {
    true
}

fn is_true(v: &bool) -> bool {
    *v
}

/// Accept `version: 1.2` as well as `version: "1.2"`
fn optional_scalar<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(scalar_to_string))
}

/// Render a YAML scalar as a string; mappings and sequences yield `None`
pub(crate) fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
