//! Chart values with deep merge support

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::Path;

use crate::error::Result;

/// Values document (a chart's `values.yaml`, an override file, or render overrides)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(pub JsonValue);

impl Values {
    /// Create empty values
    pub fn new() -> Self {
        Self(JsonValue::Object(serde_json::Map::new()))
    }

    /// Read a `values.yaml` from disk
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse values from YAML string. An empty document yields empty values.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        if value.is_null() {
            return Ok(Self::new());
        }
        Ok(Self(value))
    }

    /// Build values from `dotted.path=value` string pairs
    pub fn from_dotted<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut values = Values::new();
        for (path, value) in pairs {
            values.set(path, JsonValue::String(value.to_string()));
        }
        values
    }

    /// Merge `overlay` on top, the way Helm layers `-f` files: mappings merge
    /// key by key, lists and scalars from `overlay` win.
    pub fn merge(&mut self, overlay: &Values) {
        deep_merge(&mut self.0, &overlay.0);
    }

    /// Set a value by dotted path (e.g., "settings.clusterName")
    pub fn set(&mut self, path: &str, value: JsonValue) {
        let parts: Vec<&str> = path.split('.').collect();
        set_nested(&mut self.0, &parts, value);
    }

    /// Look up `image.repository` style paths
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        let parts: Vec<&str> = path.split('.').collect();
        get_nested(&self.0, &parts)
    }

    pub fn into_inner(self) -> JsonValue {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        match &self.0 {
            JsonValue::Object(map) => map.is_empty(),
            JsonValue::Null => true,
            _ => false,
        }
    }

    /// Serialize back to YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.0)?)
    }

    /// Write as YAML to `path`, creating parent directories
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }

    /// The smallest document that, merged onto `base`, yields `self`
    ///
    /// Objects are compared key by key. Arrays and scalars that differ are
    /// emitted whole, since Helm replaces lists rather than merging them.
    /// Keys removed from `self` are not represented.
    pub fn diff_from(&self, base: &Values) -> Values {
        match diff(&base.0, &self.0) {
            Some(changed) => Values(changed),
            None => Values::new(),
        }
    }
}

fn deep_merge(base: &mut JsonValue, overlay: &JsonValue) {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

fn diff(base: &JsonValue, target: &JsonValue) -> Option<JsonValue> {
    if base == target {
        return None;
    }
    match (base, target) {
        (JsonValue::Object(base_map), JsonValue::Object(target_map)) => {
            let mut changed = serde_json::Map::new();
            for (key, target_value) in target_map {
                match base_map.get(key) {
                    Some(base_value) => {
                        if let Some(d) = diff(base_value, target_value) {
                            changed.insert(key.clone(), d);
                        }
                    }
                    None => {
                        changed.insert(key.clone(), target_value.clone());
                    }
                }
            }
            if changed.is_empty() {
                None
            } else {
                Some(JsonValue::Object(changed))
            }
        }
        _ => Some(target.clone()),
    }
}

fn set_nested(value: &mut JsonValue, path: &[&str], new_value: JsonValue) {
    let Some((key, remaining)) = path.split_first() else {
        *value = new_value;
        return;
    };

    if !value.is_object() {
        *value = JsonValue::Object(serde_json::Map::new());
    }

    if let JsonValue::Object(map) = value {
        if remaining.is_empty() {
            map.insert(key.to_string(), new_value);
        } else {
            let entry = map
                .entry(key.to_string())
                .or_insert_with(|| JsonValue::Object(serde_json::Map::new()));
            set_nested(entry, remaining, new_value);
        }
    }
}

fn get_nested<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let Some((key, remaining)) = path.split_first() else {
        return Some(value);
    };

    match value {
        JsonValue::Object(map) => map.get(*key).and_then(|v| get_nested(v, remaining)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deep_merge() {
        let mut base = Values::from_yaml(
            r#"
image:
  repository: nginx
  tag: "1.0"
replicas: 1
"#,
        )
        .unwrap();

        let overlay = Values::from_yaml(
            r#"
image:
  tag: "2.0"
  pullPolicy: Always
replicas: 3
"#,
        )
        .unwrap();

        base.merge(&overlay);

        assert_eq!(base.get("image.repository").unwrap(), "nginx");
        assert_eq!(base.get("image.tag").unwrap(), "2.0");
        assert_eq!(base.get("image.pullPolicy").unwrap(), "Always");
        assert_eq!(base.get("replicas").unwrap(), 3);
    }

    #[test]
    fn test_from_dotted() {
        let values = Values::from_dotted([
            ("settings.clusterName", "placeholder"),
            ("settings.clusterEndpoint", "https://placeholder"),
        ]);

        assert_eq!(values.get("settings.clusterName").unwrap(), "placeholder");
        assert_eq!(
            values.get("settings.clusterEndpoint").unwrap(),
            "https://placeholder"
        );
    }

    #[test]
    fn test_empty_document() {
        let values = Values::from_yaml("").unwrap();
        assert!(values.is_empty());
    }

    #[test]
    fn test_diff_keeps_only_changed_leaves() {
        let base = Values(json!({
            "image": {"repository": "nginx", "tag": "1.0", "pullPolicy": "IfNotPresent"},
            "replicas": 1
        }));
        let target = Values(json!({
            "image": {"repository": "mirror/nginx", "tag": "1.0", "pullPolicy": "IfNotPresent"},
            "replicas": 1
        }));

        let d = target.diff_from(&base);
        assert_eq!(d.0, json!({"image": {"repository": "mirror/nginx"}}));
    }

    #[test]
    fn test_diff_emits_whole_lists() {
        let base = Values(json!({"sidecars": [{"image": "a:1"}, {"image": "b:1"}]}));
        let target = Values(json!({"sidecars": [{"image": "a:1"}, {"image": "m/b:1"}]}));

        let d = target.diff_from(&base);
        assert_eq!(
            d.0,
            json!({"sidecars": [{"image": "a:1"}, {"image": "m/b:1"}]})
        );
    }

    #[test]
    fn test_diff_merged_onto_base_reproduces_target() {
        let base = Values(json!({"a": {"b": 1, "c": [1, 2]}, "d": "x"}));
        let target = Values(json!({"a": {"b": 2, "c": [1, 2]}, "d": "x", "e": true}));

        let mut rebuilt = base.clone();
        rebuilt.merge(&target.diff_from(&base));
        assert_eq!(rebuilt, target);
    }
}
