//! Helpers for upgrading OpenEBS storage engines
//!
//! Two independent utilities used by the upgrade jobs: rewriting container
//! image references for a new version (optionally under a private registry)
//! and computing the patches submitted to the Kubernetes API.

pub mod error;
pub mod image;
pub mod manifest;
pub mod patch;

pub use error::{Error, Result};
pub use image::{image_tag, rewrite_image_url, upgraded_image};
pub use patch::{compute_patch, compute_patch_as, kube_patch, MergeKeys, PatchFormat};
