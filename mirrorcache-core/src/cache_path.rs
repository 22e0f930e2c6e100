use md5::{Digest, Md5};
use std::path::{Path, PathBuf};

/// Derive the on-disk cache path for `(distro, package_path)` (§3, §8
/// property 1): `STORAGE/<distro>/<h[0:2]>/<h>_<basename>` where `h` is the
/// hex MD5 of `package_path`. Pure function: identical inputs always yield
/// an identical path.
pub fn cache_path(storage_root: &Path, distro: &str, package_path: &str) -> PathBuf {
    let hash = hex_md5(package_path);
    let basename = basename_of(package_path);
    storage_root
        .join(distro)
        .join(&hash[0..2])
        .join(format!("{hash}_{basename}"))
}

fn hex_md5(input: &str) -> String {
    let digest = Md5::digest(input.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn basename_of(package_path: &str) -> &str {
    match package_path.rsplit('/').next() {
        Some(s) if !s.is_empty() => s,
        _ => "index",
    }
}

/// Recover the logical filename (the original last path segment) from a
/// cache entry's on-disk filename: the substring after the first `_`.
/// Falls back to the whole name if there is no `_` (shouldn't happen for
/// entries produced by `cache_path`, but callers may feed arbitrary names
/// found while walking the storage tree).
pub fn logical_filename(on_disk_name: &str) -> &str {
    match on_disk_name.split_once('_') {
        Some((_, rest)) => rest,
        None => on_disk_name,
    }
}

/// The `.tmp` sibling used for atomic fetch-and-cache commits (§4.6).
pub fn tmp_path(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".tmp");
    final_path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_is_deterministic() {
        let root = Path::new("/var/cache/mirrorcache");
        let a = cache_path(root, "ubuntu", "pool/main/x.deb");
        let b = cache_path(root, "ubuntu", "pool/main/x.deb");
        assert_eq!(a, b);
    }

    #[test]
    fn path_uses_first_two_hash_chars_as_shard() {
        let root = Path::new("/storage");
        let path = cache_path(root, "ubuntu", "pool/main/x.deb");
        let hash = hex_md5("pool/main/x.deb");
        assert_eq!(path, root.join("ubuntu").join(&hash[0..2]).join(format!("{hash}_x.deb")));
    }

    #[test]
    fn empty_package_path_uses_index_basename() {
        let root = Path::new("/storage");
        let path = cache_path(root, "ubuntu", "");
        assert!(path.file_name().unwrap().to_str().unwrap().ends_with("_index"));
    }

    #[test]
    fn logical_filename_strips_hash_prefix() {
        assert_eq!(logical_filename("deadbeefcafef00d_x.deb"), "x.deb");
    }

    #[test]
    fn logical_filename_without_underscore_returns_whole_name() {
        assert_eq!(logical_filename("noUnderscoreHere"), "noUnderscoreHere");
    }

    #[test]
    fn tmp_path_appends_suffix() {
        let final_path = Path::new("/storage/ubuntu/ab/abcd_x.deb");
        assert_eq!(tmp_path(final_path), Path::new("/storage/ubuntu/ab/abcd_x.deb.tmp"));
    }
}
