use crate::{normalized_path::NormalizedPath, repository::Mount};
use std::collections::BTreeSet;
use tracing::{debug, instrument};

/// A path resolved against a mount.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLocation {
    pub mount: Mount,
    /// Remainder of the request path inside the mount, always starts with `/`.
    pub sub_path: String,
}

impl ResolvedLocation {
    pub fn is_mount_root(&self) -> bool {
        self.sub_path.trim_matches('/').is_empty()
    }
}

/// Synthetic view of a path that only exists because mounts live below it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VirtualLevel {
    pub subdirectories: BTreeSet<String>,
    pub mounts: Vec<Mount>,
}

impl VirtualLevel {
    pub fn is_empty(&self) -> bool {
        self.subdirectories.is_empty() && self.mounts.is_empty()
    }

    /// Names of every child collection at this level.
    pub fn child_names(&self) -> BTreeSet<String> {
        let mut names = self.subdirectories.clone();
        for m in &self.mounts {
            names.insert(mount_segment_name(m).to_owned());
        }
        names
    }
}

fn mount_segment_name(mount: &Mount) -> &str {
    mount.mount_path.rsplit('/').next().unwrap_or("")
}

/// The set of mounts visible to one caller, ordered most specific first.
#[derive(Debug, Clone)]
pub struct Aggregate {
    mounts: Vec<Mount>,
}

impl Aggregate {
    pub fn new(mut mounts: Vec<Mount>) -> Self {
        mounts.sort_by(|a, b| {
            b.mount_path
                .len()
                .cmp(&a.mount_path.len())
                .then_with(|| a.mount_path.cmp(&b.mount_path))
        });
        Aggregate { mounts }
    }

    pub fn mounts(&self) -> &[Mount] {
        &self.mounts
    }

    /// Longest-prefix match of `path` against the mount paths.
    #[instrument(level = "debug", skip(self))]
    pub fn find_route(&self, path: &NormalizedPath) -> Option<ResolvedLocation> {
        let col = path.is_collection();
        let request = path.trim_end_matches('/');
        for m in &self.mounts {
            let mount_path = if m.is_root() { "" } else { m.mount_path.as_str() };
            let rest = if request == mount_path {
                ""
            } else if request.starts_with(mount_path)
                && request[mount_path.len()..].starts_with('/')
            {
                &request[mount_path.len()..]
            } else {
                continue;
            };

            let sub_path = if rest.is_empty() {
                "/".to_owned()
            } else if col {
                format!("{}/", rest)
            } else {
                rest.to_owned()
            };
            debug!(route = %m.mount_path, sub_path = %sub_path);
            return Some(ResolvedLocation {
                mount: m.clone(),
                sub_path,
            });
        }
        None
    }

    /// Mounts and intermediate folders directly below the collection `level`.
    #[instrument(level = "debug", skip(self))]
    pub fn find_routes_at_level(&self, level: &NormalizedPath) -> VirtualLevel {
        let level = level.as_dir();
        let mut result = VirtualLevel::default();

        for m in &self.mounts {
            if m.is_root() {
                continue;
            }
            let mount_dir = format!("{}/", m.mount_path);
            if mount_dir.len() <= level.len() || !mount_dir.starts_with(&*level) {
                continue;
            }
            let rest = &mount_dir[level.len()..];
            let el = match rest.split('/').next() {
                Some(el) if !el.is_empty() => el,
                _ => continue,
            };
            if rest.len() == el.len() + 1 {
                result.mounts.push(m.clone());
            } else {
                result.subdirectories.insert(el.to_owned());
            }
        }

        for m in &result.mounts {
            result.subdirectories.remove(mount_segment_name(m));
        }
        result.mounts.sort_by(|a, b| a.mount_path.cmp(&b.mount_path));
        debug!(subdirectories = ?result.subdirectories, mounts = result.mounts.len());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn helper_path(s: &str) -> NormalizedPath {
        NormalizedPath::parse(s).unwrap()
    }

    fn aggregate(paths: &[&str]) -> Aggregate {
        Aggregate::new(
            paths
                .iter()
                .map(|p| Mount::new(p, p, "mem"))
                .collect(),
        )
    }

    fn route(fs: &Aggregate, path: &str) -> (String, String) {
        let r = fs.find_route(&helper_path(path)).unwrap();
        (r.mount.mount_path, r.sub_path)
    }

    #[test]
    fn check_find_route() {
        let fs = aggregate(&["/tmp/fs/fs1", "/tmp/fs1"]);

        assert_eq!(route(&fs, "/tmp/fs/fs1"), ("/tmp/fs/fs1".into(), "/".into()));
        assert_eq!(route(&fs, "/tmp/fs1/"), ("/tmp/fs1".into(), "/".into()));
        assert_eq!(route(&fs, "/tmp/fs1/fs1"), ("/tmp/fs1".into(), "/fs1".into()));
        assert_eq!(
            route(&fs, "/tmp/fs1/res-%e2%82%ac"),
            ("/tmp/fs1".into(), "/res-€".into())
        );
        assert_eq!(
            route(&fs, "/tmp/fs1/one/two.txt"),
            ("/tmp/fs1".into(), "/one/two.txt".into())
        );
        assert_eq!(route(&fs, "/tmp/fs1/one/"), ("/tmp/fs1".into(), "/one/".into()));

        assert!(fs.find_route(&helper_path("/not_exist")).is_none());
        assert!(fs.find_route(&helper_path("/tmp/fs10")).is_none());
        assert!(fs.find_route(&helper_path("/tmp/")).is_none());
    }

    #[test]
    fn longest_prefix_wins() {
        let fs = aggregate(&["/a", "/a/b"]);
        assert_eq!(route(&fs, "/a/b/c"), ("/a/b".into(), "/c".into()));
        assert_eq!(route(&fs, "/a/bc"), ("/a".into(), "/bc".into()));
        assert_eq!(route(&fs, "/a/b"), ("/a/b".into(), "/".into()));
    }

    #[test]
    fn root_mount_catches_everything_else() {
        let fs = aggregate(&["/", "/photos"]);
        assert_eq!(route(&fs, "/"), ("/".into(), "/".into()));
        assert_eq!(route(&fs, "/docs/a.txt"), ("/".into(), "/docs/a.txt".into()));
        assert_eq!(route(&fs, "/photos/a.jpg"), ("/photos".into(), "/a.jpg".into()));
    }

    #[test]
    fn check_find_level() {
        let fs = aggregate(&[
            "/fs1",
            "/fs2",
            "/tmp/fs1",
            "/tmp/fs2",
            "/tmp/tmp/fs2",
            "/tmp/tmp/tmp/fs2",
        ]);

        let root = fs.find_routes_at_level(&helper_path("/"));
        assert_eq!(root.mounts.len(), 2);
        assert_eq!(root.subdirectories.len(), 1);
        assert_eq!(root.child_names().len(), 3);
        assert!(fs.find_routes_at_level(&helper_path("/fs1/")).is_empty());
        assert_eq!(fs.find_routes_at_level(&helper_path("/tmp/")).child_names().len(), 3);
        assert_eq!(
            fs.find_routes_at_level(&helper_path("/tmp/tmp/")).child_names().len(),
            2
        );
        assert_eq!(
            fs.find_routes_at_level(&helper_path("/tmp/tmp/tmp"))
                .child_names()
                .len(),
            1
        );
    }

    #[test]
    fn synthesizes_intermediate_folders() {
        let fs = aggregate(&["/photos", "/docs/archive"]);
        let root = fs.find_routes_at_level(&NormalizedPath::root());
        assert_eq!(
            root.child_names().into_iter().collect::<Vec<_>>(),
            vec!["docs".to_owned(), "photos".to_owned()]
        );
        assert!(root.subdirectories.contains("docs"));
        assert_eq!(root.mounts[0].mount_path, "/photos");

        let docs = fs.find_routes_at_level(&helper_path("/docs"));
        assert!(docs.subdirectories.is_empty());
        assert_eq!(docs.mounts[0].mount_path, "/docs/archive");
    }

    #[test]
    fn mount_names_shadow_synthetic_folders() {
        let fs = aggregate(&["/a", "/a/b/c"]);
        let root = fs.find_routes_at_level(&NormalizedPath::root());
        assert!(root.subdirectories.is_empty());
        assert_eq!(root.child_names().len(), 1);

        let a = fs.find_routes_at_level(&helper_path("/a/"));
        assert!(a.subdirectories.contains("b"));
    }
}
