use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::util::errors::{json_error, Result};

/// Content hash of the managed spec, compared on every pass to detect drift.
pub const LAST_APPLIED_HASH_ANNOTATION: &str = "goharbor.io/last-applied-hash";

const CHECKSUM_DOMAIN: &str = "checksum.goharbor.io";
const STATIC_CHECKSUM_PREFIX: &str = "static.checksum.goharbor.io/";

/// SHA-256 over the JSON encoding of `value`, hex encoded.
///
/// Struct fields serialize in declaration order and maps are `BTreeMap`s,
/// so equal values always hash equal.
pub fn hash_of<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let bytes = serde_json::to_vec(value).map_err(json_error)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

pub fn applied_hash(metadata: &ObjectMeta) -> Option<&str> {
    metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(LAST_APPLIED_HASH_ANNOTATION))
        .map(String::as_str)
}

pub fn set_applied_hash(metadata: &mut ObjectMeta, hash: String) {
    metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(LAST_APPLIED_HASH_ANNOTATION.to_string(), hash);
}

/// `<namespace>.<kind>.checksum.goharbor.io/<name>`, tracking an upstream object.
pub fn dependency_checksum_key(namespace: &str, kind: &str, name: &str) -> String {
    format!("{namespace}.{}.{CHECKSUM_DOMAIN}/{name}", kind.to_lowercase())
}

/// `static.checksum.goharbor.io/<name>`, tracking a fixed template.
pub fn static_checksum_key(name: &str) -> String {
    format!("{STATIC_CHECKSUM_PREFIX}{name}")
}

pub fn is_static_checksum(key: &str) -> bool {
    key.starts_with(STATIC_CHECKSUM_PREFIX)
}

pub fn is_checksum(key: &str) -> bool {
    key.split_once('/')
        .is_some_and(|(domain, _)| domain.ends_with(CHECKSUM_DOMAIN))
}

/// Carries annotations from the live object over to its rewrite.
///
/// Keys this operator manages (the applied hash and every checksum) come from
/// `desired` only; static checksums are never carried between objects.
pub fn merge_live_annotations(desired: &mut ObjectMeta, live: &ObjectMeta) {
    let Some(live_annotations) = live.annotations.as_ref() else {
        return;
    };
    let annotations = desired.annotations.get_or_insert_with(BTreeMap::new);
    for (key, value) in live_annotations {
        if key == LAST_APPLIED_HASH_ANNOTATION || is_checksum(key) {
            continue;
        }
        annotations.entry(key.clone()).or_insert_with(|| value.clone());
    }
}
