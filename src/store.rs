use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::error::StoreError;
use crate::platform::Platform;

/// `versions/<platform>/<manifest id>/...` on disk.
#[derive(Debug, Clone)]
pub struct VersionStore {
    root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformVersions {
    pub platform: String,
    pub versions: Vec<String>,
}

/// A manifest id is used verbatim as one path segment, so it must be exactly one normal component.
pub fn validate_version_id(id: &str) -> Result<&str, StoreError> {
    let invalid = || StoreError::InvalidVersionId(id.to_string());
    if id.trim().is_empty() || id.contains(['/', '\\', '\0']) {
        return Err(invalid());
    }
    let mut comps = Path::new(id).components();
    match (comps.next(), comps.next()) {
        (Some(Component::Normal(_)), None) => Ok(id),
        _ => Err(invalid()),
    }
}

impl VersionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_layout(&self) -> Result<(), StoreError> {
        for p in Platform::ALL {
            let dir = self.platform_dir(p);
            std::fs::create_dir_all(&dir)
                .map_err(|e| StoreError::io(format!("create {}", dir.display()), e))?;
        }
        Ok(())
    }

    pub fn platform_dir(&self, platform: Platform) -> PathBuf {
        self.root.join(platform.folder_name())
    }

    pub fn leaf_dir(&self, platform: Platform, version: &str) -> Result<PathBuf, StoreError> {
        let version = validate_version_id(version)?;
        Ok(self.platform_dir(platform).join(version))
    }

    /// True when the leaf exists and holds at least one entry.
    pub fn is_populated(&self, platform: Platform, version: &str) -> Result<bool, StoreError> {
        let leaf = self.leaf_dir(platform, version)?;
        Ok(dir_has_any_entries(&leaf))
    }

    /// Every platform folder (including legacy ones such as `Unknown`) with its versions, sorted.
    pub fn list(&self) -> Result<Vec<PlatformVersions>, StoreError> {
        let Ok(rd) = std::fs::read_dir(&self.root) else {
            return Ok(vec![]);
        };

        let mut out = vec![];
        for e in rd {
            let Ok(e) = e else { continue };
            let path = e.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            out.push(PlatformVersions {
                platform: name.to_string(),
                versions: sorted_subdirs(&path)?,
            });
        }
        out.sort_by(|a, b| a.platform.cmp(&b.platform));
        Ok(out)
    }

    pub fn versions(&self, platform: Platform) -> Result<Vec<String>, StoreError> {
        let dir = self.platform_dir(platform);
        if !dir.exists() {
            return Ok(vec![]);
        }
        sorted_subdirs(&dir)
    }

    pub fn remove(&self, platform: Platform, version: &str) -> Result<(), StoreError> {
        let leaf = self.leaf_dir(platform, version)?;
        if !leaf.exists() {
            return Err(StoreError::NotFound {
                platform: platform.to_string(),
                version: version.to_string(),
            });
        }
        remove_entry(&leaf).map_err(|e| StoreError::io(format!("remove {}", leaf.display()), e))?;
        log::info!("Removed version {version} for {platform}");
        Ok(())
    }
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<String>, StoreError> {
    let rd = std::fs::read_dir(dir).map_err(|e| StoreError::io(format!("read {}", dir.display()), e))?;
    let mut out: Vec<String> = vec![];
    for e in rd {
        let Ok(e) = e else { continue };
        let path = e.path();
        if !path.is_dir() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|s| s.to_str()) {
            out.push(name.to_string());
        }
    }
    out.sort();
    Ok(out)
}

pub(crate) fn dir_has_any_entries(path: &Path) -> bool {
    std::fs::read_dir(path).ok().and_then(|mut rd| rd.next()).is_some()
}

/// Removes a file, symlink or directory tree.
pub(crate) fn remove_entry(path: &Path) -> std::io::Result<()> {
    let md = std::fs::symlink_metadata(path)?;
    if md.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

/// Removes every entry inside `dir`, keeping `dir` itself.
pub fn clear_dir(dir: &Path) -> std::io::Result<()> {
    for e in std::fs::read_dir(dir)? {
        remove_entry(&e?.path())?;
    }
    Ok(())
}

/// Moves every entry of `source` into `target`.
///
/// An existing entry with the same name in `target` is removed first, so
/// retrying into the same leaf never fails on a collision. Returns the number
/// of entries moved.
pub fn ingest(source: &Path, target: &Path) -> std::io::Result<usize> {
    std::fs::create_dir_all(target)?;
    let mut moved = 0usize;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let from = entry.path();
        let to = target.join(entry.file_name());
        if std::fs::symlink_metadata(&to).is_ok() {
            log::debug!("replacing existing {}", to.display());
            remove_entry(&to)?;
        }
        move_entry(&from, &to)?;
        moved += 1;
    }
    Ok(moved)
}

fn move_entry(from: &Path, to: &Path) -> std::io::Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) => {
            // Rename fails across filesystems; fall back to copy + delete.
            log::debug!(
                "rename {} -> {} failed ({e}), copying instead",
                from.display(),
                to.display()
            );
            copy_recursive(from, to)?;
            remove_entry(from)
        }
    }
}

fn copy_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    let md = std::fs::symlink_metadata(src)?;
    if !md.is_dir() {
        std::fs::copy(src, dst)?;
        return Ok(());
    }
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        copy_recursive(&entry.path(), &dst.join(entry.file_name()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn rejects_path_traversal_ids() {
        for bad in ["", "  ", ".", "..", "../x", "a/b", r"a\b", "/abs", "x\0y"] {
            assert!(validate_version_id(bad).is_err(), "{bad:?} should be rejected");
        }
        assert_eq!(validate_version_id("5891432174380298").unwrap(), "5891432174380298");
        assert!(validate_version_id("v0.22.21").is_ok());
    }

    #[test]
    fn leaf_dir_is_keyed_by_platform_then_version() {
        let store = VersionStore::new("/data/versions");
        assert_eq!(
            store.leaf_dir(Platform::Linux, "123").unwrap(),
            PathBuf::from("/data/versions/Linux/123")
        );
        assert!(store.leaf_dir(Platform::Linux, "..").is_err());
    }

    #[test]
    fn lists_platforms_and_versions_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        let store = VersionStore::new(tmp.path().join("versions"));
        assert!(store.list().unwrap().is_empty());

        store.ensure_layout().unwrap();
        fs::create_dir_all(store.leaf_dir(Platform::Windows, "222").unwrap()).unwrap();
        fs::create_dir_all(store.leaf_dir(Platform::Windows, "111").unwrap()).unwrap();
        fs::create_dir_all(store.root().join("Unknown").join("999")).unwrap();
        fs::write(store.platform_dir(Platform::Windows).join("notes.txt"), "x").unwrap();

        let listed = store.list().unwrap();
        let names: Vec<&str> = listed.iter().map(|p| p.platform.as_str()).collect();
        assert_eq!(names, vec!["Linux", "Mac", "Unknown", "Windows"]);
        assert_eq!(listed[3].versions, vec!["111", "222"]);
        assert_eq!(listed[2].versions, vec!["999"]);
        assert_eq!(store.versions(Platform::Mac).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn remove_deletes_leaf_and_reports_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let store = VersionStore::new(tmp.path());
        let leaf = store.leaf_dir(Platform::Mac, "7").unwrap();
        fs::create_dir_all(leaf.join("Contents")).unwrap();
        assert!(store.is_populated(Platform::Mac, "7").unwrap());

        store.remove(Platform::Mac, "7").unwrap();
        assert!(!leaf.exists());
        assert!(matches!(
            store.remove(Platform::Mac, "7"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn ingest_moves_everything_and_empties_source() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("depot");
        let dst = tmp.path().join("leaf");
        fs::create_dir_all(src.join("worldbox_Data")).unwrap();
        fs::write(src.join("worldbox.exe"), "exe").unwrap();
        fs::write(src.join("worldbox_Data").join("level0"), "lvl").unwrap();

        let moved = ingest(&src, &dst).unwrap();
        assert_eq!(moved, 2);
        assert_eq!(fs::read_to_string(dst.join("worldbox.exe")).unwrap(), "exe");
        assert_eq!(
            fs::read_to_string(dst.join("worldbox_Data").join("level0")).unwrap(),
            "lvl"
        );
        assert!(!dir_has_any_entries(&src));
    }

    #[test]
    fn ingest_replaces_colliding_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("depot");
        let dst = tmp.path().join("leaf");
        fs::create_dir_all(src.join("data")).unwrap();
        fs::write(src.join("worldbox.exe"), "new").unwrap();
        fs::write(src.join("data").join("fresh"), "fresh").unwrap();

        fs::create_dir_all(dst.join("data")).unwrap();
        fs::write(dst.join("worldbox.exe"), "old").unwrap();
        fs::write(dst.join("data").join("stale"), "stale").unwrap();
        fs::write(dst.join("keep.txt"), "keep").unwrap();

        ingest(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("worldbox.exe")).unwrap(), "new");
        assert!(dst.join("data").join("fresh").exists());
        assert!(!dst.join("data").join("stale").exists());
        assert!(dst.join("keep.txt").exists());
    }

    #[test]
    fn clear_dir_keeps_the_directory() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("a").join("b")).unwrap();
        fs::write(tmp.path().join("f"), "x").unwrap();
        clear_dir(tmp.path()).unwrap();
        assert!(tmp.path().exists());
        assert!(!dir_has_any_entries(tmp.path()));
    }
}
