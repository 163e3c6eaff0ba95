//! Composition of backend object keys from a mount and a path inside it.
//!
//! Every handler goes through [`compose_key`], so the slash handling at
//! segment boundaries is decided in exactly one place.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum StorageKeyError {
    #[error("a file operation cannot target the mount root")]
    MountRoot,
}

/// `root_folder + mount segment + sub_path`, normalized to a relative key.
///
/// Directory keys end with exactly one `/`, except the bucket root which is
/// the empty string. File keys never end with `/`.
pub fn compose_key(
    root_folder: &str,
    mount_path: &str,
    sub_path: &str,
    is_directory: bool,
) -> Result<String, StorageKeyError> {
    let mut key = String::new();

    if !root_folder.is_empty() {
        key.push_str(root_folder);
        if !root_folder.ends_with('/') {
            key.push('/');
        }
    }

    let segment = mount_path.trim_start_matches('/');
    if !segment.trim_end_matches('/').is_empty() {
        key.push_str(segment);
        key.push('/');
    }

    key.push_str(sub_path.trim_start_matches('/'));

    let mut key = collapse_slashes(&key);
    if key.starts_with('/') {
        key.remove(0);
    }

    if is_directory {
        if !key.is_empty() && !key.ends_with('/') {
            key.push('/');
        }
        Ok(key)
    } else {
        if sub_path.trim_matches('/').is_empty() {
            return Err(StorageKeyError::MountRoot);
        }
        Ok(key.trim_end_matches('/').to_owned())
    }
}

fn collapse_slashes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev = false;
    for c in s.chars() {
        if c == '/' {
            if prev {
                continue;
            }
            prev = true;
        } else {
            prev = false;
        }
        out.push(c);
    }
    out
}

/// Directory key the mount itself maps to.
pub fn mount_root_key(root_folder: &str, mount_path: &str) -> String {
    // directories never fail
    compose_key(root_folder, mount_path, "/", true).unwrap_or_default()
}

/// Immediate parent directory of a key, `""` at the bucket root.
pub fn parent_prefix(key: &str) -> String {
    let trimmed = key.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(i) => trimmed[..=i].to_owned(),
        None => String::new(),
    }
}

/// Last segment of a key without its trailing slash.
pub fn key_name(key: &str) -> &str {
    key.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}
