//! # Request Signing
//!
//! Every request to the game API carries a `sign` parameter: the form fields
//! sorted by key, joined as `key=value&...`, with the shared secret appended
//! and hashed with MD5. The digest goes in front of the other fields.

use md5::{Digest, Md5};
use std::collections::BTreeMap;

/// Compute the signature for a set of form parameters.
///
/// # Example
/// ```ignore
/// let sign = signature(&[("fid", "42".to_string()), ("time", "1700000000".to_string())], "key");
/// ```
pub fn signature(params: &[(&str, String)], secret: &str) -> String {
    let sorted: BTreeMap<&str, &str> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Md5::new();
    hasher.update(joined.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Build the signed form: `sign` first, then the original parameters.
pub fn signed_form(params: &[(&str, String)], secret: &str) -> Vec<(String, String)> {
    let mut form = Vec::with_capacity(params.len() + 1);
    form.push(("sign".to_string(), signature(params, secret)));
    form.extend(params.iter().map(|(k, v)| (k.to_string(), v.clone())));
    form
}
