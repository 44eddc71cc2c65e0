//! Two-way strategic merge diffs
//!
//! Produces the patch documents understood by the Kubernetes API server for
//! `application/strategic-merge-patch+json`. Lists whose field has a merge key
//! are diffed element by element, merge-strategy lists of plain values (such as
//! `finalizers`) are diffed by membership, and every other list is replaced
//! wholesale, which is also what a plain JSON merge patch does.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::{Map, Value};

use crate::error::{Error, Result};

const PATCH_DIRECTIVE: &str = "$patch";
const DELETE_DIRECTIVE: &str = "delete";
const SET_ELEMENT_ORDER_PREFIX: &str = "$setElementOrder/";
const DELETE_FROM_PRIMITIVE_LIST_PREFIX: &str = "$deleteFromPrimitiveList/";

/// Merge schema for strategic patches.
///
/// Lookups first try `<parent>.<field>` (where `parent` is the name of the
/// field holding the enclosing object) and then the bare `<field>`, so
/// `spec.ports` on a Service and `ports` on a container resolve differently.
/// Merge-strategy lists of plain values are registered separately with
/// [`MergeKeys::with_primitive_list`] and resolve the same way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeKeys {
    keys: BTreeMap<String, String>,
    primitive_lists: BTreeSet<String>,
}

impl Default for MergeKeys {
    /// Merge keys of the workload fields touched during an upgrade
    fn default() -> Self {
        Self::none()
            .with("containers", "name")
            .with("initContainers", "name")
            .with("ephemeralContainers", "name")
            .with("env", "name")
            .with("volumes", "name")
            .with("imagePullSecrets", "name")
            .with("volumeMounts", "mountPath")
            .with("volumeDevices", "devicePath")
            .with("ports", "containerPort")
            .with("spec.ports", "port")
            .with("conditions", "type")
            .with("hostAliases", "ip")
            .with("ownerReferences", "uid")
            .with("topologySpreadConstraints", "topologyKey")
            .with("schedulingGates", "name")
            .with("resourceClaims", "name")
            .with_primitive_list("finalizers")
    }
}

impl MergeKeys {
    /// Schema without merge keys: every list is atomic.
    pub fn none() -> Self {
        Self {
            keys: BTreeMap::new(),
            primitive_lists: BTreeSet::new(),
        }
    }

    pub fn with(mut self, field: impl Into<String>, key: impl Into<String>) -> Self {
        self.keys.insert(field.into(), key.into());
        self
    }

    /// Register `field` as a merge-strategy list of plain values.
    pub fn with_primitive_list(mut self, field: impl Into<String>) -> Self {
        self.primitive_lists.insert(field.into());
        self
    }

    pub fn merges_primitives(&self, parent: &str, field: &str) -> bool {
        self.primitive_lists.contains(&format!("{parent}.{field}"))
            || self.primitive_lists.contains(field)
    }

    pub fn merge_key(&self, parent: &str, field: &str) -> Option<&str> {
        self.keys
            .get(&format!("{parent}.{field}"))
            .or_else(|| self.keys.get(field))
            .map(String::as_str)
    }
}

/// Diff two JSON objects into a two-way merge patch.
pub fn two_way_merge(
    keys: &MergeKeys,
    old: &Map<String, Value>,
    new: &Map<String, Value>,
) -> Result<Map<String, Value>> {
    diff_maps(keys, "", old, new)
}

fn diff_maps(
    keys: &MergeKeys,
    parent: &str,
    old: &Map<String, Value>,
    new: &Map<String, Value>,
) -> Result<Map<String, Value>> {
    let mut patch = Map::new();

    for (field, new_value) in new {
        let old_value = match old.get(field) {
            Some(v) if v == new_value => continue,
            Some(v) => v,
            None => {
                patch.insert(field.clone(), new_value.clone());
                continue;
            }
        };

        match (old_value, new_value) {
            (Value::Object(o), Value::Object(n)) => {
                let nested = diff_maps(keys, field, o, n)?;
                if !nested.is_empty() {
                    patch.insert(field.clone(), Value::Object(nested));
                }
            }
            (Value::Array(o), Value::Array(n)) => match keys.merge_key(parent, field) {
                Some(key) if all_objects(o) && all_objects(n) => {
                    let (entries, order) = diff_keyed_list(keys, field, key, o, n)?;
                    if let Some(order) = order {
                        patch.insert(
                            format!("{SET_ELEMENT_ORDER_PREFIX}{field}"),
                            Value::Array(order),
                        );
                    }
                    if !entries.is_empty() {
                        patch.insert(field.clone(), Value::Array(entries));
                    }
                }
                None if keys.merges_primitives(parent, field)
                    && all_scalars(o)
                    && all_scalars(n) =>
                {
                    let (added, removed) = diff_primitive_list(o, n);
                    patch.insert(
                        format!("{SET_ELEMENT_ORDER_PREFIX}{field}"),
                        Value::Array(n.clone()),
                    );
                    if !removed.is_empty() {
                        patch.insert(
                            format!("{DELETE_FROM_PRIMITIVE_LIST_PREFIX}{field}"),
                            Value::Array(removed),
                        );
                    }
                    if !added.is_empty() {
                        patch.insert(field.clone(), Value::Array(added));
                    }
                }
                _ => {
                    patch.insert(field.clone(), new_value.clone());
                }
            },
            _ => {
                patch.insert(field.clone(), new_value.clone());
            }
        }
    }

    for field in old.keys() {
        if !new.contains_key(field) {
            patch.insert(field.clone(), Value::Null);
        }
    }

    Ok(patch)
}

fn all_objects(items: &[Value]) -> bool {
    items.iter().all(Value::is_object)
}

fn all_scalars(items: &[Value]) -> bool {
    items.iter().all(|v| !v.is_object() && !v.is_array())
}

fn scalar_sort_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Items added to and removed from a list of plain values, each deduplicated
/// and sorted the way the API server's own diff orders them.
fn diff_primitive_list(old: &[Value], new: &[Value]) -> (Vec<Value>, Vec<Value>) {
    let collect = |from: &[Value], absent_in: &[Value]| {
        let mut items: Vec<Value> = Vec::new();
        for item in from {
            if !absent_in.contains(item) && !items.contains(item) {
                items.push(item.clone());
            }
        }
        items.sort_by_key(scalar_sort_key);
        items
    };
    (collect(new, old), collect(old, new))
}

fn key_of<'a>(field: &str, key: &str, item: &'a Value) -> Result<&'a Value> {
    item.get(key).ok_or_else(|| {
        Error::PatchComputationFailed(format!(
            "element of list {field} is missing merge key {key}"
        ))
    })
}

/// Returns the patch entries for a keyed list and, when membership or order
/// changed, the `$setElementOrder` list.
fn diff_keyed_list(
    keys: &MergeKeys,
    field: &str,
    key: &str,
    old: &[Value],
    new: &[Value],
) -> Result<(Vec<Value>, Option<Vec<Value>>)> {
    let mut old_by_key: HashMap<String, &Map<String, Value>> = HashMap::new();
    let mut old_order = Vec::with_capacity(old.len());
    for item in old {
        let k = key_of(field, key, item)?;
        old_order.push(k.clone());
        if let Value::Object(map) = item {
            old_by_key.entry(k.to_string()).or_insert(map);
        }
    }

    let mut entries = Vec::new();
    let mut new_order = Vec::with_capacity(new.len());
    for item in new {
        let k = key_of(field, key, item)?;
        new_order.push(k.clone());
        let Value::Object(new_map) = item else {
            continue;
        };
        match old_by_key.get(&k.to_string()) {
            Some(old_map) if *old_map == new_map => {}
            Some(old_map) => {
                let mut entry = diff_maps(keys, field, old_map, new_map)?;
                entry.insert(key.to_string(), k.clone());
                entries.push(Value::Object(entry));
            }
            None => entries.push(item.clone()),
        }
    }

    for k in &old_order {
        if !new_order.contains(k) {
            let mut deletion = Map::new();
            deletion.insert(key.to_string(), k.clone());
            deletion.insert(
                PATCH_DIRECTIVE.to_string(),
                Value::String(DELETE_DIRECTIVE.to_string()),
            );
            entries.push(Value::Object(deletion));
        }
    }

    let order = (!entries.is_empty() || old_order != new_order).then(|| {
        new_order
            .into_iter()
            .map(|k| {
                let mut element = Map::new();
                element.insert(key.to_string(), k);
                Value::Object(element)
            })
            .collect()
    });
    Ok((entries, order))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn diff(keys: &MergeKeys, old: Value, new: Value) -> Value {
        let (Value::Object(o), Value::Object(n)) = (old, new) else {
            panic!("test documents must be objects");
        };
        Value::Object(two_way_merge(keys, &o, &n).unwrap())
    }

    #[test]
    fn test_identical_maps_give_empty_patch() {
        let doc = json!({"a": 1, "b": {"c": [1, 2]}});
        assert_eq!(diff(&MergeKeys::default(), doc.clone(), doc), json!({}));
    }

    #[test]
    fn test_changed_added_and_removed_fields() {
        let patch = diff(
            &MergeKeys::default(),
            json!({"keep": 1, "change": "a", "drop": true, "nested": {"x": 1, "y": 2}}),
            json!({"keep": 1, "change": "b", "add": [1], "nested": {"x": 1, "y": 3}}),
        );
        assert_eq!(
            patch,
            json!({"change": "b", "drop": null, "add": [1], "nested": {"y": 3}})
        );
    }

    #[test]
    fn test_scalar_lists_are_replaced() {
        let patch = diff(
            &MergeKeys::default(),
            json!({"args": ["--a", "--b"]}),
            json!({"args": ["--a"]}),
        );
        assert_eq!(patch, json!({"args": ["--a"]}));
    }

    #[test]
    fn test_keyed_list_change_emits_element_diff_and_order() {
        let patch = diff(
            &MergeKeys::default(),
            json!({"containers": [
                {"name": "jiva", "image": "openebs/jiva:1.2.0"},
                {"name": "exporter", "image": "openebs/m-exporter:1.2.0"}
            ]}),
            json!({"containers": [
                {"name": "jiva", "image": "openebs/jiva:1.3.0"},
                {"name": "exporter", "image": "openebs/m-exporter:1.2.0"}
            ]}),
        );
        assert_eq!(
            patch,
            json!({
                "$setElementOrder/containers": [{"name": "jiva"}, {"name": "exporter"}],
                "containers": [{"name": "jiva", "image": "openebs/jiva:1.3.0"}]
            })
        );
    }

    #[test]
    fn test_keyed_list_removal_uses_delete_directive() {
        let patch = diff(
            &MergeKeys::default(),
            json!({"env": [{"name": "A", "value": "1"}, {"name": "B", "value": "2"}]}),
            json!({"env": [{"name": "A", "value": "1"}]}),
        );
        assert_eq!(
            patch,
            json!({
                "$setElementOrder/env": [{"name": "A"}],
                "env": [{"name": "B", "$patch": "delete"}]
            })
        );
    }

    #[test]
    fn test_keyed_list_reorder_only_sets_order() {
        let patch = diff(
            &MergeKeys::default(),
            json!({"volumes": [{"name": "a"}, {"name": "b"}]}),
            json!({"volumes": [{"name": "b"}, {"name": "a"}]}),
        );
        assert_eq!(patch, json!({"$setElementOrder/volumes": [{"name": "b"}, {"name": "a"}]}));
    }

    #[test]
    fn test_parent_qualified_key_wins() {
        let keys = MergeKeys::default();
        assert_eq!(keys.merge_key("spec", "ports"), Some("port"));
        assert_eq!(keys.merge_key("containers", "ports"), Some("containerPort"));
        assert_eq!(keys.merge_key("spec", "tolerations"), None);
    }

    #[test]
    fn test_finalizer_removal_uses_delete_from_primitive_list() {
        let patch = diff(
            &MergeKeys::default(),
            json!({"metadata": {"finalizers": ["cstorvolumereplica.openebs.io/finalizer", "keep"]}}),
            json!({"metadata": {"finalizers": ["keep"]}}),
        );
        assert_eq!(
            patch,
            json!({"metadata": {
                "$deleteFromPrimitiveList/finalizers": ["cstorvolumereplica.openebs.io/finalizer"],
                "$setElementOrder/finalizers": ["keep"]
            }})
        );
    }

    #[test]
    fn test_finalizer_addition_sends_only_new_items() {
        let patch = diff(
            &MergeKeys::default(),
            json!({"metadata": {"finalizers": ["keep"]}}),
            json!({"metadata": {"finalizers": ["openebs.io/pool-protection", "keep"]}}),
        );
        assert_eq!(
            patch,
            json!({"metadata": {
                "$setElementOrder/finalizers": ["openebs.io/pool-protection", "keep"],
                "finalizers": ["openebs.io/pool-protection"]
            }})
        );
    }

    #[test]
    fn test_primitive_list_without_merge_strategy_is_replaced() {
        let patch = diff(
            &MergeKeys::none(),
            json!({"finalizers": ["a", "b"]}),
            json!({"finalizers": ["b"]}),
        );
        assert_eq!(patch, json!({"finalizers": ["b"]}));
    }

    #[test]
    fn test_scheduling_fields_are_keyed() {
        let keys = MergeKeys::default();
        assert_eq!(keys.merge_key("spec", "topologySpreadConstraints"), Some("topologyKey"));
        assert_eq!(keys.merge_key("spec", "schedulingGates"), Some("name"));
        assert_eq!(keys.merge_key("spec", "resourceClaims"), Some("name"));
        assert!(keys.merges_primitives("metadata", "finalizers"));
    }

    #[test]
    fn test_missing_merge_key_fails() {
        let (Value::Object(o), Value::Object(n)) = (
            json!({"containers": [{"name": "a"}]}),
            json!({"containers": [{"image": "b"}]}),
        ) else {
            unreachable!()
        };
        let err = two_way_merge(&MergeKeys::default(), &o, &n).unwrap_err();
        assert!(matches!(err, Error::PatchComputationFailed(_)));
    }

    #[test]
    fn test_no_keys_behaves_like_merge_patch() {
        let patch = diff(
            &MergeKeys::none(),
            json!({"containers": [{"name": "a", "image": "x:1"}]}),
            json!({"containers": [{"name": "a", "image": "x:2"}]}),
        );
        assert_eq!(
            patch,
            json!({"containers": [{"name": "a", "image": "x:2"}]})
        );
    }
}
