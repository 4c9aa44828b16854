//! Mirror mapping: where each chart and image lands in the target registry
//!
//! Mapping is a pure function of the target, the chart name and the set of
//! source images. Distinct source repositories never share a destination
//! repository: when two of them would, both are moved to a longer path
//! (flattened: basename, then full source path, then registry-qualified path;
//! mirrored-path: source path, then registry-qualified path). The escalation
//! only looks at the whole set, so input order never changes the result.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};
use crate::extract::ImageSet;
use crate::image::ImageReference;

/// Destination path layout, fixed per deployment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MirrorScheme {
    /// `<registry>/<prefix>/<chart>/<image-basename>:<tag>`
    #[default]
    Flattened,
    /// `<registry>/<prefix>/<source path>:<tag>`
    MirroredPath,
}

impl MirrorScheme {
    fn max_level(self) -> usize {
        match self {
            MirrorScheme::Flattened => 2,
            MirrorScheme::MirroredPath => 1,
        }
    }
}

impl fmt::Display for MirrorScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirrorScheme::Flattened => write!(f, "flattened"),
            MirrorScheme::MirroredPath => write!(f, "mirrored-path"),
        }
    }
}

impl FromStr for MirrorScheme {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "flattened" | "flat" => Ok(MirrorScheme::Flattened),
            "mirrored-path" | "mirrored" | "mirror" => Ok(MirrorScheme::MirroredPath),
            other => Err(format!(
                "unknown mirror scheme '{}' (expected 'flattened' or 'mirrored-path')",
                other
            )),
        }
    }
}

/// Private registry root plus the layout used under it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorTarget {
    registry: String,
    prefix: Option<String>,
    scheme: MirrorScheme,
}

/// Chart source reference and its destination (`<registry>/<chart>:<version>`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartMapping {
    pub source: String,
    pub destination: ImageReference,
}

impl ChartMapping {
    /// `oci://<registry>` as expected by `helm push`
    pub fn push_target(&self) -> String {
        format!("oci://{}", self.destination.registry)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMapping {
    pub source: ImageReference,
    pub destination: ImageReference,
}

/// All image mappings for one chart, ordered by normalized source identity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorPlan {
    chart: String,
    mappings: Vec<ImageMapping>,
}

type RepoIdentity = (String, String);

impl MirrorTarget {
    pub fn new(registry: &str, scheme: MirrorScheme) -> Self {
        let registry = registry
            .trim()
            .trim_start_matches("oci://")
            .trim_start_matches("https://")
            .trim_end_matches('/')
            .to_lowercase();
        Self {
            registry,
            prefix: None,
            scheme,
        }
    }

    pub fn with_prefix(mut self, prefix: Option<&str>) -> Self {
        self.prefix = prefix
            .map(|p| p.trim().trim_matches('/').to_lowercase())
            .filter(|p| !p.is_empty());
        self
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn scheme(&self) -> MirrorScheme {
        self.scheme
    }

    /// Charts are never prefixed so `helm push` targets stay name-stable
    pub fn chart_mapping(&self, source: impl Into<String>, chart: &str, version: &str) -> ChartMapping {
        ChartMapping {
            source: source.into(),
            destination: ImageReference {
                registry: self.registry.clone(),
                repository: chart.to_lowercase(),
                tag: Some(version.to_string()),
                digest: None,
            },
        }
    }

    /// Map every image of one chart to its destination
    pub fn plan(&self, chart: &str, images: &ImageSet) -> MirrorPlan {
        let identities: BTreeSet<RepoIdentity> = images.iter().map(|i| i.repository_key()).collect();
        let paths = self.assign_paths(chart, identities);

        let mappings = images
            .iter()
            .filter_map(|source| {
                let path = paths.get(&source.repository_key())?;
                Some(ImageMapping {
                    source: source.clone(),
                    destination: ImageReference {
                        registry: self.registry.clone(),
                        repository: path.clone(),
                        tag: Some(source.publish_tag()),
                        digest: None,
                    },
                })
            })
            .collect();

        MirrorPlan {
            chart: chart.to_string(),
            mappings,
        }
    }

    fn assign_paths(&self, chart: &str, identities: BTreeSet<RepoIdentity>) -> BTreeMap<RepoIdentity, String> {
        let max_level = self.scheme.max_level();
        let mut assigned = BTreeMap::new();
        let mut taken = BTreeSet::new();
        let mut pending: Vec<RepoIdentity> = identities.into_iter().collect();

        for level in 0..=max_level {
            let mut by_path: BTreeMap<String, Vec<RepoIdentity>> = BTreeMap::new();
            for id in pending.drain(..) {
                by_path
                    .entry(self.candidate_path(chart, &id, level))
                    .or_default()
                    .push(id);
            }

            for (path, ids) in by_path {
                let unique = ids.len() == 1 && !taken.contains(&path);
                if unique || level == max_level {
                    for id in ids {
                        assigned.insert(id, path.clone());
                    }
                    taken.insert(path);
                } else {
                    pending.extend(ids);
                }
            }

            if pending.is_empty() {
                break;
            }
        }

        assigned
    }

    fn candidate_path(&self, chart: &str, id: &RepoIdentity, level: usize) -> String {
        let (registry, repository) = id;
        let host = registry.replace(':', "-");
        let basename = repository.rsplit('/').next().unwrap_or(repository);

        let mut segments: Vec<&str> = Vec::new();
        if let Some(prefix) = &self.prefix {
            segments.push(prefix);
        }
        match (self.scheme, level) {
            (MirrorScheme::Flattened, 0) => segments.extend([chart, basename]),
            (MirrorScheme::Flattened, 1) => segments.extend([chart, repository.as_str()]),
            (MirrorScheme::Flattened, _) => segments.extend([chart, host.as_str(), repository.as_str()]),
            (MirrorScheme::MirroredPath, 0) => segments.push(repository),
            (MirrorScheme::MirroredPath, _) => segments.extend([host.as_str(), repository.as_str()]),
        }
        segments.join("/").to_lowercase()
    }
}

impl MirrorPlan {
    pub fn chart(&self) -> &str {
        &self.chart
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageMapping> {
        self.mappings.iter()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Destination for a source with the same normalized identity
    pub fn destination_for(&self, source: &ImageReference) -> Option<&ImageReference> {
        let key = source.key();
        self.mappings
            .iter()
            .find(|m| m.source.key() == key)
            .map(|m| &m.destination)
    }

    /// Mappings whose source lives in the given repository (any tag)
    pub fn for_repository(&self, source: &ImageReference) -> Vec<&ImageMapping> {
        let repo = source.repository_key();
        self.mappings
            .iter()
            .filter(|m| m.source.repository_key() == repo)
            .collect()
    }

    pub fn retain<F: FnMut(&ImageMapping) -> bool>(&mut self, f: F) {
        self.mappings.retain(f);
    }
}

/// Who owns a destination repository path
#[derive(Debug, Clone, PartialEq, Eq)]
enum Owner {
    Chart(String),
    Image(RepoIdentity),
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Chart(source) => write!(f, "chart {}", source),
            Owner::Image((registry, repository)) => write!(f, "image {}/{}", registry, repository),
        }
    }
}

/// Destination repositories claimed so far in a run
///
/// Addons sharing a chart name, or mirrored-path sources from different
/// registries landing on one path, would otherwise overwrite each other.
#[derive(Debug, Default)]
pub struct MirrorLedger {
    claimed: HashMap<String, Owner>,
}

impl MirrorLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim_chart(&mut self, mapping: &ChartMapping) -> Result<()> {
        let owner = Owner::Chart(mapping.source.clone());
        self.claim(mapping.destination.repository.clone(), owner, &mapping.source)
    }

    /// Claim every destination in the plan; colliding mappings are removed
    /// from the plan and returned as errors.
    pub fn claim_plan(&mut self, plan: &mut MirrorPlan) -> Vec<CoreError> {
        let mut errors = Vec::new();
        plan.retain(|m| {
            let owner = Owner::Image(m.source.repository_key());
            match self.claim(m.destination.repository.clone(), owner, &m.source.to_string()) {
                Ok(()) => true,
                Err(e) => {
                    errors.push(e);
                    false
                }
            }
        });
        errors
    }

    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }

    fn claim(&mut self, path: String, owner: Owner, source: &str) -> Result<()> {
        match self.claimed.get(&path) {
            Some(existing) if *existing != owner => Err(CoreError::MappingCollision {
                destination: path,
                claimed_by: existing.to_string(),
                source_image: source.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.claimed.insert(path, owner);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY: &str = "123456789012.dkr.ecr.eu-west-1.amazonaws.com";

    fn images(refs: &[&str]) -> ImageSet {
        refs.iter().map(|r| ImageReference::parse(r).unwrap()).collect()
    }

    fn destinations(plan: &MirrorPlan) -> Vec<String> {
        plan.iter().map(|m| m.destination.to_string()).collect()
    }

    #[test]
    fn test_flattened_demo_scenario() {
        let target = MirrorTarget::new(REGISTRY, MirrorScheme::Flattened);

        let chart = target.chart_mapping("https://example/charts/demo", "demo", "2.3.0");
        assert_eq!(chart.destination.to_string(), format!("{}/demo:2.3.0", REGISTRY));
        assert_eq!(chart.push_target(), format!("oci://{}", REGISTRY));

        let plan = target.plan("demo", &images(&["example.io/demo/app:2.3.0"]));
        assert_eq!(destinations(&plan), vec![format!("{}/demo/app:2.3.0", REGISTRY)]);
    }

    #[test]
    fn test_deterministic() {
        let target = MirrorTarget::new(REGISTRY, MirrorScheme::Flattened).with_prefix(Some("mirror"));
        let set = images(&["bitnami/nginx:1.0", "quay.io/other/nginx:1.0", "redis:7"]);
        assert_eq!(target.plan("web", &set), target.plan("web", &set));
    }

    #[test]
    fn test_same_image_in_two_charts_is_chart_scoped() {
        let target = MirrorTarget::new(REGISTRY, MirrorScheme::Flattened);
        let set = images(&["bitnami/nginx:1.0"]);

        let a = target.plan("frontend", &set);
        let b = target.plan("backend", &set);
        assert_ne!(destinations(&a), destinations(&b));
        assert_eq!(destinations(&a), vec![format!("{}/frontend/nginx:1.0", REGISTRY)]);
    }

    #[test]
    fn test_basename_collision_escalates() {
        let target = MirrorTarget::new(REGISTRY, MirrorScheme::Flattened);
        let plan = target.plan(
            "web",
            &images(&["bitnami/nginx:1.0", "quay.io/other/nginx:1.0", "busybox:1.36"]),
        );

        let mut dests = destinations(&plan);
        dests.sort();
        assert_eq!(
            dests,
            vec![
                format!("{}/web/bitnami/nginx:1.0", REGISTRY),
                format!("{}/web/busybox:1.36", REGISTRY),
                format!("{}/web/other/nginx:1.0", REGISTRY),
            ]
        );
    }

    #[test]
    fn test_same_path_different_registry_is_qualified() {
        let target = MirrorTarget::new(REGISTRY, MirrorScheme::MirroredPath);
        let plan = target.plan(
            "web",
            &images(&["docker.io/bitnami/nginx:1.0", "quay.io/bitnami/nginx:1.0"]),
        );

        let mut dests = destinations(&plan);
        dests.sort();
        assert_eq!(
            dests,
            vec![
                format!("{}/docker.io/bitnami/nginx:1.0", REGISTRY),
                format!("{}/quay.io/bitnami/nginx:1.0", REGISTRY),
            ]
        );
    }

    #[test]
    fn test_injective_over_many_sources() {
        let target = MirrorTarget::new(REGISTRY, MirrorScheme::Flattened).with_prefix(Some("p"));
        let set = images(&[
            "nginx:1.0",
            "bitnami/nginx:1.0",
            "quay.io/bitnami/nginx:1.0",
            "ghcr.io/x/nginx:1.0",
            "localhost:5000/nginx:1.0",
            "bitnami/redis:7",
        ]);
        let plan = target.plan("c", &set);
        let unique: BTreeSet<_> = destinations(&plan).into_iter().collect();
        assert_eq!(unique.len(), set.len());
    }

    #[test]
    fn test_mirrored_path_keeps_source_path_and_prefix() {
        let target = MirrorTarget::new(&format!("oci://{}/", REGISTRY), MirrorScheme::MirroredPath)
            .with_prefix(Some("/public/"));
        let plan = target.plan("web", &images(&["bitnami/nginx:1.0"]));
        assert_eq!(destinations(&plan), vec![format!("{}/public/bitnami/nginx:1.0", REGISTRY)]);

        let chart = target.chart_mapping("oci://registry-1.docker.io/bitnamicharts/nginx", "nginx", "15.0.0");
        assert_eq!(chart.destination.to_string(), format!("{}/nginx:15.0.0", REGISTRY));
    }

    #[test]
    fn test_digest_only_source_gets_digest_tag() {
        let digest = format!("sha256:{}", "b".repeat(64));
        let target = MirrorTarget::new(REGISTRY, MirrorScheme::Flattened);
        let plan = target.plan("c", &images(&[&format!("registry.k8s.io/pause@{}", digest)]));
        let dest = &plan.iter().next().unwrap().destination;
        assert_eq!(dest.tag.as_deref(), Some(format!("sha256-{}", "b".repeat(64)).as_str()));
    }

    #[test]
    fn test_ledger_rejects_foreign_claims() {
        let target = MirrorTarget::new(REGISTRY, MirrorScheme::MirroredPath);
        let mut ledger = MirrorLedger::new();

        let mut first = target.plan("a", &images(&["bitnami/nginx:1.0"]));
        assert!(ledger.claim_plan(&mut first).is_empty());

        // Same source in another chart shares the destination
        let mut again = target.plan("b", &images(&["bitnami/nginx:1.1"]));
        assert!(ledger.claim_plan(&mut again).is_empty());
        assert_eq!(again.len(), 1);

        let chart_a = target.chart_mapping("https://one/charts", "nginx", "1.0.0");
        let chart_b = target.chart_mapping("https://two/charts", "nginx", "1.0.0");
        assert!(ledger.claim_chart(&chart_a).is_ok());
        assert!(matches!(
            ledger.claim_chart(&chart_b),
            Err(CoreError::MappingCollision { .. })
        ));
    }

    #[test]
    fn test_scheme_parse() {
        assert_eq!("flattened".parse::<MirrorScheme>().unwrap(), MirrorScheme::Flattened);
        assert_eq!("Mirrored-Path".parse::<MirrorScheme>().unwrap(), MirrorScheme::MirroredPath);
        assert!("nested".parse::<MirrorScheme>().is_err());
    }
}
