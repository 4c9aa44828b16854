//! Image extraction from rendered chart output

use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::LazyLock;

use crate::addon::scalar_to_string;
use crate::image::{ImageKey, ImageReference};

static DOCUMENT_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^---[ \t]*(?:#.*)?$").expect("valid regex"));

/// Deduplicated set of images, iterated in normalized-key order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageSet {
    images: BTreeMap<ImageKey, ImageReference>,
}

impl ImageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless an image with the same normalized identity is present
    pub fn insert(&mut self, image: ImageReference) -> bool {
        match self.images.entry(image.key()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(image);
                true
            }
        }
    }

    pub fn remove(&mut self, key: &ImageKey) -> Option<ImageReference> {
        self.images.remove(key)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageReference> {
        self.images.values()
    }

    pub fn contains(&self, image: &ImageReference) -> bool {
        self.images.contains_key(&image.key())
    }
}

impl FromIterator<ImageReference> for ImageSet {
    fn from_iter<T: IntoIterator<Item = ImageReference>>(iter: T) -> Self {
        let mut set = ImageSet::new();
        for image in iter {
            set.insert(image);
        }
        set
    }
}

/// Split a multi-document YAML stream and parse each document
///
/// Documents that fail to parse are skipped and reported by index, so one
/// broken manifest does not hide the images in the rest of the stream.
pub fn parse_rendered(stream: &str) -> (Vec<Value>, Vec<(usize, serde_yaml::Error)>) {
    let mut docs = Vec::new();
    let mut failures = Vec::new();

    for (idx, chunk) in DOCUMENT_SEPARATOR.split(stream).enumerate() {
        if chunk.trim().is_empty() {
            continue;
        }
        match serde_yaml::from_str::<Value>(chunk) {
            Ok(Value::Null) => {}
            Ok(doc) => docs.push(doc),
            Err(e) => failures.push((idx, e)),
        }
    }

    (docs, failures)
}

/// Collect every image referenced in the given documents
///
/// Two shapes are recognized at any depth:
/// - an `image` key holding a reference string
/// - an image-named key (`image`, `initImage`, `sidecar_image`, ...) holding
///   a mapping with `repository` plus `tag` or `digest`, and optionally `registry`
///
/// Values that do not parse as a literal reference are ignored.
pub fn extract_images(docs: &[Value]) -> ImageSet {
    let mut set = ImageSet::new();
    for doc in docs {
        walk(doc, &mut set);
    }
    set
}

fn walk(node: &Value, set: &mut ImageSet) {
    match node {
        Value::Mapping(map) => {
            for (key, value) in map {
                if let Some(key) = key.as_str() {
                    if is_image_key(key) {
                        if let Some(image) = image_from_value(key, value) {
                            set.insert(image);
                            continue;
                        }
                    }
                }
                walk(value, set);
            }
        }
        Value::Sequence(items) => {
            for item in items {
                walk(item, set);
            }
        }
        _ => {}
    }
}

fn is_image_key(key: &str) -> bool {
    key == "image" || key.ends_with("Image") || key.ends_with("_image")
}

fn image_from_value(key: &str, value: &Value) -> Option<ImageReference> {
    match value {
        Value::String(s) if key == "image" => ImageReference::parse(s).ok(),
        Value::Mapping(map) => structured_image(map),
        _ => None,
    }
}

/// `{registry?, repository, tag | digest}`
pub(crate) fn structured_image(map: &Mapping) -> Option<ImageReference> {
    let field = |name: &str| map.get(name).and_then(scalar_to_string);

    let repository = field("repository")?;
    let tag = field("tag");
    let digest = field("digest");
    if tag.is_none() && digest.is_none() {
        return None;
    }
    ImageReference::from_parts(
        field("registry").as_deref(),
        &repository,
        tag.as_deref(),
        digest.as_deref(),
    )
    .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deep_image_and_duplicate_collapse() {
        let stream = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: demo
spec:
  template:
    spec:
      containers:
        - name: app
          image: example.io/demo/app:2.3.0
---
apiVersion: batch/v1
kind: Job
spec:
  template:
    spec:
      initContainers:
        - name: wait
          image: "example.io/demo/app:2.3.0"
"#;
        let (docs, failures) = parse_rendered(stream);
        assert!(failures.is_empty());
        assert_eq!(docs.len(), 2);

        let images = extract_images(&docs);
        assert_eq!(images.len(), 1);
        assert_eq!(
            images.iter().next().unwrap().to_string(),
            "example.io/demo/app:2.3.0"
        );
    }

    #[test]
    fn test_normalized_duplicates_collapse() {
        let (docs, _) = parse_rendered(
            r#"
a:
  image: nginx:1.25
b:
  image: docker.io/library/nginx:1.25
"#,
        );
        assert_eq!(extract_images(&docs).len(), 1);
    }

    #[test]
    fn test_structured_forms() {
        let (docs, _) = parse_rendered(
            r#"
kind: ConfigMap
data:
  sidecarImage:
    registry: quay.io
    repository: prometheus/node-exporter
    tag: v1.7.0
  config_reloader_image:
    repository: ghcr.io/jimmidyson/configmap-reload
    tag: v0.12.0
  notAnImage:
    repository: https://charts.example.com
"#,
        );
        let images: Vec<String> = extract_images(&docs).iter().map(|i| i.to_string()).collect();
        assert_eq!(
            images,
            vec![
                "ghcr.io/jimmidyson/configmap-reload:v0.12.0",
                "quay.io/prometheus/node-exporter:v1.7.0",
            ]
        );
    }

    #[test]
    fn test_order_independent() {
        let (forward, _) = parse_rendered("a: {image: \"b:1\"}\n---\nb: {image: \"a:1\"}\n");
        let (backward, _) = parse_rendered("b: {image: \"a:1\"}\n---\na: {image: \"b:1\"}\n");
        assert_eq!(extract_images(&forward), extract_images(&backward));
    }

    #[test]
    fn test_image_set_keeps_key_order() {
        let mut set = ImageSet::new();
        for n in (0..50).rev() {
            assert!(set.insert(ImageReference::parse(&format!("example.io/app-{:02}:1.0", n)).unwrap()));
        }
        assert!(!set.insert(ImageReference::parse("example.io/app-07:1.0").unwrap()));
        assert_eq!(set.len(), 50);

        let first = ImageReference::parse("example.io/app-00:1.0").unwrap();
        assert_eq!(set.iter().next(), Some(&first));
        assert_eq!(set.remove(&first.key()), Some(first.clone()));
        assert!(!set.contains(&first));
        assert_eq!(set.iter().next().unwrap().to_string(), "example.io/app-01:1.0");
    }

    #[test]
    fn test_broken_document_skipped() {
        let (docs, failures) = parse_rendered("image: ok:1\n---\nbroken: [unclosed\n---\nimage: also:2\n");
        assert_eq!(docs.len(), 2);
        assert_eq!(failures.len(), 1);
        assert_eq!(extract_images(&docs).len(), 2);
    }

    #[test]
    fn test_templated_values_ignored() {
        let (docs, _) = parse_rendered("image: \"\"\nother:\n  image: \"{{ .Values.x }}\"\n");
        assert!(extract_images(&docs).is_empty());
    }
}
