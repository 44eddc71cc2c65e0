//! Container image reference rewriting
//!
//! Upgrades replace the tag of every data-plane image and, for air-gapped
//! clusters, move the image under a private registry directory.

use tracing::debug;

use crate::error::{Error, Result};

/// Split `url` at its last `:` into `(base, tag)`.
///
/// The last separator is used so that registry ports (`localhost:5000/...`)
/// stay part of the base.
fn split_tag(url: &str) -> Result<(&str, &str)> {
    url.rsplit_once(':').ok_or_else(|| Error::MissingVersionTag {
        url: url.to_string(),
    })
}

/// Strip the version tag from `url` and optionally relocate the image under `prefix`.
///
/// With an empty `prefix` only the tag is removed. Otherwise the image name
/// (last path segment) is appended verbatim to `prefix` and every other path
/// segment is dropped, e.g. `abc/quay.io/openebs/jiva:1.2.0` with prefix
/// `xyz/aws-56546546/openebsdirectory/` becomes
/// `xyz/aws-56546546/openebsdirectory/jiva`.
pub fn rewrite_image_url(url: &str, prefix: &str) -> Result<String> {
    let (base, _) = split_tag(url)?;
    if prefix.is_empty() {
        return Ok(base.to_string());
    }

    let image_name = base.rsplit_once('/').map_or(base, |(_, name)| name);
    debug!(url, prefix, image_name, "relocating image under registry prefix");
    Ok(format!("{prefix}{image_name}"))
}

/// Version tag of `url`, the text after its last `:`.
pub fn image_tag(url: &str) -> Result<&str> {
    split_tag(url).map(|(_, tag)| tag)
}

/// Full image reference to roll out for an upgrade to `tag`.
pub fn upgraded_image(url: &str, prefix: &str, tag: &str) -> Result<String> {
    if tag.is_empty() {
        return Err(Error::EmptyTargetTag);
    }
    let base = rewrite_image_url(url, prefix)?;
    Ok(format!("{base}:{tag}"))
}
