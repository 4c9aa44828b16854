//! Values overlay: point a chart's image settings at the mirror
//!
//! A single rewrite pass over the chart's default values produces both
//! outputs: the rewritten defaults that get repacked into the chart, and the
//! consumer override document, which is the difference between the rewritten
//! and original defaults. Every rewritten image object in that document carries
//! its repository and tag together, even when only one of them changed.
//!
//! Mirror destinations are addressed by tag, so a `digest` next to a rewritten
//! image is cleared rather than left pointing at the source manifest.
//!
//! Recognized shapes, at any depth:
//! - `{registry?, repository, tag?, digest?}` objects
//! - `{registry?, image, tag?}` objects
//! - flat `imageRegistry` / `imageRepository` / `imageTag` siblings
//! - image-named keys holding a reference string (`image: nginx:1.25`)
//!
//! A value is only rewritten when its repository appears in the mirror plan.

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use crate::image::ImageReference;
use crate::mirror::MirrorPlan;
use crate::values::Values;

/// `(registry, repository, tag)` field names of a structured image object
const FIELD_SETS: &[(&str, &str, &str)] = &[
    ("registry", "repository", "tag"),
    ("registry", "image", "tag"),
    ("imageRegistry", "imageRepository", "imageTag"),
];

const DIGEST_KEY: &str = "digest";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rewrite {
    /// Dotted location in the values document (`sidecars[1].image`)
    pub path: String,
    pub source: ImageReference,
    pub destination: ImageReference,
}

#[derive(Debug, Clone)]
pub struct ImageOverlay {
    original: Values,
    rewritten: Values,
    rewrites: Vec<Rewrite>,
}

impl ImageOverlay {
    pub fn build(defaults: &Values, plan: &MirrorPlan) -> Self {
        let mut rewritten = defaults.clone();
        let mut rewrites = Vec::new();
        let mut path = Vec::new();
        rewrite_node(&mut rewritten.0, &mut path, plan, &mut rewrites);

        Self {
            original: defaults.clone(),
            rewritten,
            rewrites,
        }
    }

    /// Full defaults with every recognized image pointing at the mirror
    pub fn rewritten_defaults(&self) -> &Values {
        &self.rewritten
    }

    /// Changed keys plus the full repository/tag of each rewritten image
    pub fn override_document(&self) -> Values {
        let mut doc = self.rewritten.diff_from(&self.original);
        pin_image_fields(&mut doc.0, &self.rewritten.0);
        doc
    }

    pub fn rewrites(&self) -> &[Rewrite] {
        &self.rewrites
    }

    pub fn is_empty(&self) -> bool {
        self.rewrites.is_empty()
    }
}

fn rewrite_node(node: &mut JsonValue, path: &mut Vec<String>, plan: &MirrorPlan, out: &mut Vec<Rewrite>) {
    match node {
        JsonValue::Object(map) => {
            let mut handled = None;
            for (registry_key, repo_key, tag_key) in FIELD_SETS {
                if let Some(rewrite) = rewrite_structured(map, registry_key, repo_key, tag_key, plan) {
                    out.push(Rewrite {
                        path: join_path(path),
                        ..rewrite
                    });
                    handled = Some(*repo_key);
                    break;
                }
            }

            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                if handled == Some(key.as_str()) {
                    continue;
                }
                let Some(value) = map.get_mut(&key) else {
                    continue;
                };
                path.push(key.clone());
                match value {
                    JsonValue::String(s) if is_image_key(&key) => {
                        if let Some((source, destination)) = lookup_str(s, plan) {
                            *value = JsonValue::String(destination.to_string());
                            out.push(Rewrite {
                                path: join_path(path),
                                source,
                                destination,
                            });
                        }
                    }
                    JsonValue::Object(_) | JsonValue::Array(_) => rewrite_node(value, path, plan, out),
                    _ => {}
                }
                path.pop();
            }
        }
        JsonValue::Array(items) => {
            for (idx, item) in items.iter_mut().enumerate() {
                match path.pop() {
                    Some(last) => {
                        path.push(format!("{}[{}]", last, idx));
                        rewrite_node(item, path, plan, out);
                        path.pop();
                        path.push(last);
                    }
                    None => {
                        path.push(format!("[{}]", idx));
                        rewrite_node(item, path, plan, out);
                        path.pop();
                    }
                }
            }
        }
        _ => {}
    }
}

fn rewrite_structured(
    map: &mut Map<String, JsonValue>,
    registry_key: &str,
    repo_key: &str,
    tag_key: &str,
    plan: &MirrorPlan,
) -> Option<Rewrite> {
    let repository = map.get(repo_key)?.as_str()?.to_string();
    let registry = map.get(registry_key).and_then(json_scalar);
    let tag = map.get(tag_key).and_then(json_scalar);
    let digest = map.get(DIGEST_KEY).and_then(json_scalar);

    let parsed = ImageReference::from_parts(
        registry.as_deref(),
        &repository,
        tag.as_deref(),
        digest.as_deref(),
    )
    .ok()?;
    let (source, destination) = lookup(&parsed, plan)?;

    if map.contains_key(registry_key) {
        map.insert(registry_key.to_string(), JsonValue::String(destination.registry.clone()));
        map.insert(repo_key.to_string(), JsonValue::String(destination.repository.clone()));
    } else {
        map.insert(repo_key.to_string(), JsonValue::String(destination.name()));
    }
    if let Some(tag) = &destination.tag {
        map.insert(tag_key.to_string(), JsonValue::String(tag.clone()));
    }
    if digest.is_some() {
        map.insert(DIGEST_KEY.to_string(), JsonValue::String(String::new()));
    }

    Some(Rewrite {
        path: String::new(),
        source,
        destination,
    })
}

/// Copy the image fields of every rewritten object from `full` into `doc`.
/// Lists are already emitted whole by the diff.
fn pin_image_fields(doc: &mut JsonValue, full: &JsonValue) {
    let (JsonValue::Object(doc), JsonValue::Object(full)) = (doc, full) else {
        return;
    };

    for (registry_key, repo_key, tag_key) in FIELD_SETS {
        let Some(JsonValue::String(_)) = full.get(*repo_key) else {
            continue;
        };
        if !doc.contains_key(*repo_key) && !doc.contains_key(*registry_key) {
            continue;
        }
        for key in [*registry_key, *repo_key, *tag_key, DIGEST_KEY] {
            if let Some(value) = full.get(key) {
                doc.insert(key.to_string(), value.clone());
            }
        }
    }

    for (key, value) in doc.iter_mut() {
        if let Some(full_value) = full.get(key) {
            pin_image_fields(value, full_value);
        }
    }
}

fn lookup_str(raw: &str, plan: &MirrorPlan) -> Option<(ImageReference, ImageReference)> {
    let parsed = ImageReference::parse(raw).ok()?;
    lookup(&parsed, plan)
}

/// Exact tag match first; otherwise the repository's first mapping, since
/// chart defaults often leave the tag empty and fall back to appVersion.
fn lookup(image: &ImageReference, plan: &MirrorPlan) -> Option<(ImageReference, ImageReference)> {
    if let Some(dest) = plan.destination_for(image) {
        let source = plan
            .for_repository(image)
            .into_iter()
            .find(|m| m.source.key() == image.key())
            .map(|m| m.source.clone())
            .unwrap_or_else(|| image.clone());
        return Some((source, dest.clone()));
    }
    plan.for_repository(image)
        .first()
        .map(|m| (m.source.clone(), m.destination.clone()))
}

fn is_image_key(key: &str) -> bool {
    key == "image" || key.ends_with("Image") || key.ends_with("_image")
}

fn json_scalar(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn join_path(path: &[String]) -> String {
    path.join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ImageSet;
    use crate::mirror::{MirrorScheme, MirrorTarget};
    use serde_json::json;

    const REGISTRY: &str = "registry.internal";

    fn plan(chart: &str, refs: &[&str]) -> MirrorPlan {
        let images: ImageSet = refs.iter().map(|r| ImageReference::parse(r).unwrap()).collect();
        MirrorTarget::new(REGISTRY, MirrorScheme::Flattened).plan(chart, &images)
    }

    #[test]
    fn test_registry_repository_tag_object() {
        let defaults = Values(json!({
            "image": {"registry": "docker.io", "repository": "bitnami/redis", "tag": "7.2.4", "pullPolicy": "IfNotPresent"},
            "replicas": 1
        }));
        let overlay = ImageOverlay::build(&defaults, &plan("redis", &["docker.io/bitnami/redis:7.2.4"]));

        assert_eq!(overlay.rewrites().len(), 1);
        assert_eq!(overlay.rewrites()[0].path, "image");
        assert_eq!(
            overlay.override_document().0,
            json!({"image": {"registry": REGISTRY, "repository": "redis/redis", "tag": "7.2.4"}})
        );
        assert_eq!(
            overlay.rewritten_defaults().get("image.pullPolicy").unwrap(),
            "IfNotPresent"
        );
    }

    #[test]
    fn test_repository_without_registry_field() {
        let defaults = Values(json!({
            "controller": {"image": {"repository": "registry.k8s.io/ingress-nginx/controller", "tag": ""}}
        }));
        let overlay = ImageOverlay::build(
            &defaults,
            &plan("ingress-nginx", &["registry.k8s.io/ingress-nginx/controller:v1.10.0"]),
        );

        assert_eq!(
            overlay.override_document().0,
            json!({"controller": {"image": {
                "repository": format!("{}/ingress-nginx/controller", REGISTRY),
                "tag": "v1.10.0"
            }}})
        );
    }

    #[test]
    fn test_flat_image_fields() {
        let defaults = Values(json!({
            "imageRegistry": "public.ecr.aws",
            "imageRepository": "karpenter/controller",
            "imageTag": "1.0.6"
        }));
        let overlay = ImageOverlay::build(&defaults, &plan("karpenter", &["public.ecr.aws/karpenter/controller:1.0.6"]));

        // Only the host changes, but the consumer still gets the full reference
        assert_eq!(
            overlay.override_document().0,
            json!({"imageRegistry": REGISTRY, "imageRepository": "karpenter/controller", "imageTag": "1.0.6"})
        );
        assert_eq!(
            overlay.rewritten_defaults().get("imageRepository").unwrap(),
            "karpenter/controller"
        );
    }

    #[test]
    fn test_string_image_inside_list() {
        let defaults = Values(json!({
            "sidecars": [
                {"name": "a", "image": "busybox:1.36"},
                {"name": "b", "image": "quay.io/prometheus/node-exporter:v1.7.0"}
            ]
        }));
        let overlay = ImageOverlay::build(
            &defaults,
            &plan("app", &["quay.io/prometheus/node-exporter:v1.7.0"]),
        );

        assert_eq!(overlay.rewrites()[0].path, "sidecars[1].image");
        assert_eq!(
            overlay.override_document().0,
            json!({"sidecars": [
                {"name": "a", "image": "busybox:1.36"},
                {"name": "b", "image": format!("{}/app/node-exporter:v1.7.0", REGISTRY)}
            ]})
        );
    }

    #[test]
    fn test_unmapped_images_untouched() {
        let defaults = Values(json!({
            "image": {"repository": "nginx", "tag": "1.25"},
            "chartRepository": {"repository": "https://charts.example.com"}
        }));
        let overlay = ImageOverlay::build(&defaults, &plan("x", &["redis:7"]));

        assert!(overlay.is_empty());
        assert!(overlay.override_document().is_empty());
        assert_eq!(overlay.rewritten_defaults(), &defaults);
    }

    #[test]
    fn test_both_projections_share_mapping() {
        let defaults = Values(json!({"image": {"repository": "example.io/demo/app", "tag": "2.3.0"}}));
        let overlay = ImageOverlay::build(&defaults, &plan("demo", &["example.io/demo/app:2.3.0"]));

        let mut applied = defaults.clone();
        applied.merge(&overlay.override_document());
        assert_eq!(&applied, overlay.rewritten_defaults());
        assert_eq!(
            applied.get("image.repository").unwrap(),
            &json!(format!("{}/demo/app", REGISTRY))
        );
    }

    #[test]
    fn test_source_digest_is_cleared() {
        let digest = format!("sha256:{}", "a".repeat(64));
        let defaults = Values(json!({
            "image": {
                "repository": "example.io/demo/app",
                "tag": "2.3.0",
                "digest": digest
            }
        }));
        let source = format!("example.io/demo/app:2.3.0@{}", digest);
        let overlay = ImageOverlay::build(&defaults, &plan("demo", &[source.as_str()]));

        assert_eq!(overlay.rewrites().len(), 1);
        assert_eq!(overlay.rewritten_defaults().get("image.digest").unwrap(), "");
        assert_eq!(
            overlay.override_document().0,
            json!({"image": {
                "repository": format!("{}/demo/app", REGISTRY),
                "tag": "2.3.0",
                "digest": ""
            }})
        );
    }

    #[test]
    fn test_unchanged_tag_is_still_emitted() {
        let defaults = Values(json!({
            "server": {"image": {"repository": "example.io/demo/app", "tag": "2.3.0", "pullPolicy": "Always"}},
            "replicas": 2
        }));
        let overlay = ImageOverlay::build(&defaults, &plan("demo", &["example.io/demo/app:2.3.0"]));

        assert_eq!(
            overlay.override_document().0,
            json!({"server": {"image": {
                "repository": format!("{}/demo/app", REGISTRY),
                "tag": "2.3.0"
            }}})
        );
    }
}
