//! Patch generation for object updates
//!
//! Both objects are serialized to JSON and diffed. The default output is a
//! two-way strategic merge patch, the format `kubectl` and the upgrade jobs
//! submit for Deployments and other built-in workloads.

mod strategic;

use std::fmt;
use std::str::FromStr;

use kube::api::Patch;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::{Error, Result};

pub use strategic::{two_way_merge, MergeKeys};

/// Patch flavours accepted by the Kubernetes API server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PatchFormat {
    #[default]
    Strategic,
    Merge,
    Json,
}

impl PatchFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            PatchFormat::Strategic => "application/strategic-merge-patch+json",
            PatchFormat::Merge => "application/merge-patch+json",
            PatchFormat::Json => "application/json-patch+json",
        }
    }
}

impl fmt::Display for PatchFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PatchFormat::Strategic => "strategic",
            PatchFormat::Merge => "merge",
            PatchFormat::Json => "json",
        };
        f.write_str(name)
    }
}

impl FromStr for PatchFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strategic" => Ok(PatchFormat::Strategic),
            "merge" => Ok(PatchFormat::Merge),
            "json" => Ok(PatchFormat::Json),
            other => Err(format!(
                "unknown patch format '{other}', expected strategic, merge or json"
            )),
        }
    }
}

fn serialize_pair<T: Serialize + ?Sized>(old: &T, new: &T) -> Result<(Value, Value)> {
    let old = serde_json::to_value(old).map_err(Error::SerializeOldFailed)?;
    let new = serde_json::to_value(new).map_err(Error::SerializeNewFailed)?;
    Ok((old, new))
}

fn to_bytes<T: Serialize + ?Sized>(patch: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(patch).map_err(|e| Error::PatchComputationFailed(e.to_string()))
}

/// Compute the strategic merge patch turning `old` into `new`.
///
/// The returned bytes are compact JSON and can be submitted as-is with the
/// `application/strategic-merge-patch+json` content type.
pub fn compute_patch<T: Serialize + ?Sized>(old: &T, new: &T) -> Result<Vec<u8>> {
    compute_strategic_patch_with(&MergeKeys::default(), old, new)
}

/// Like [`compute_patch`] with a caller supplied merge schema.
#[instrument(skip_all)]
pub fn compute_strategic_patch_with<T: Serialize + ?Sized>(
    keys: &MergeKeys,
    old: &T,
    new: &T,
) -> Result<Vec<u8>> {
    let (old, new) = serialize_pair(old, new)?;
    let (Value::Object(old), Value::Object(new)) = (&old, &new) else {
        return Err(Error::PatchComputationFailed(
            "strategic merge patch requires both objects to serialize to JSON objects"
                .to_string(),
        ));
    };
    let patch = two_way_merge(keys, old, new)?;
    debug!(fields = patch.len(), "computed strategic merge patch");
    to_bytes(&patch)
}

/// Compute a patch of the given `format` turning `old` into `new`.
#[instrument(skip(old, new))]
pub fn compute_patch_as<T: Serialize + ?Sized>(
    format: PatchFormat,
    old: &T,
    new: &T,
) -> Result<Vec<u8>> {
    match format {
        PatchFormat::Strategic => compute_patch(old, new),
        PatchFormat::Merge => {
            let (old, new) = serialize_pair(old, new)?;
            let patch = match (old, new) {
                (Value::Object(o), Value::Object(n)) => {
                    Value::Object(two_way_merge(&MergeKeys::none(), &o, &n)?)
                }
                // a non-object merge patch replaces the whole document
                (_, new) => new,
            };
            to_bytes(&patch)
        }
        PatchFormat::Json => {
            let (old, new) = serialize_pair(old, new)?;
            let patch = json_patch::diff(&old, &new);
            debug!(operations = patch.0.len(), "computed json patch");
            to_bytes(&patch)
        }
    }
}

/// Whether `patch` describes no change at all.
pub fn is_empty_patch(patch: &[u8]) -> bool {
    match serde_json::from_slice::<Value>(patch) {
        Ok(Value::Object(map)) => map.is_empty(),
        Ok(Value::Array(ops)) => ops.is_empty(),
        _ => false,
    }
}

/// Wrap generated patch bytes as the matching `kube` patch for `Api::patch`.
pub fn kube_patch(format: PatchFormat, patch: &[u8]) -> Result<Patch<Value>> {
    let invalid = |e: serde_json::Error| {
        Error::PatchComputationFailed(format!("invalid {format} patch document: {e}"))
    };
    Ok(match format {
        PatchFormat::Strategic => Patch::Strategic(serde_json::from_slice(patch).map_err(invalid)?),
        PatchFormat::Merge => Patch::Merge(serde_json::from_slice(patch).map_err(invalid)?),
        PatchFormat::Json => Patch::Json(serde_json::from_slice(patch).map_err(invalid)?),
    })
}
