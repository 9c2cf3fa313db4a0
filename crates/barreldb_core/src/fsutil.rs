//! File-system helpers: directory sizing and backup copies.

use std::fs;
use std::io;
use std::path::Path;

/// Returns the total size in bytes of all files under `path`, recursively.
pub(crate) fn dir_size(path: &Path) -> io::Result<u64> {
    let mut total = 0;

    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += metadata.len();
        }
    }

    Ok(total)
}

/// Copies the contents of `src` into `dst`, creating `dst` if needed.
///
/// Entries whose file name appears in `exclude` are skipped at any depth.
pub(crate) fn copy_dir(src: &Path, dst: &Path, exclude: &[&str]) -> io::Result<()> {
    fs::create_dir_all(dst)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if exclude.iter().any(|ex| name == *ex) {
            continue;
        }

        let target = dst.join(&name);
        if entry.metadata()?.is_dir() {
            copy_dir(&entry.path(), &target, exclude)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn dir_size_sums_nested_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a"), b"12345").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b"), b"123").unwrap();

        assert_eq!(dir_size(dir.path()).unwrap(), 8);
    }

    #[test]
    fn copy_dir_skips_excluded_names() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        fs::write(src.path().join("keep"), b"data").unwrap();
        fs::write(src.path().join("flock"), b"").unwrap();

        copy_dir(src.path(), dst.path(), &["flock"]).unwrap();

        assert!(dst.path().join("keep").exists());
        assert!(!dst.path().join("flock").exists());
    }

    #[test]
    fn copy_dir_recurses() {
        let src = tempdir().unwrap();
        let dst_root = tempdir().unwrap();
        let dst = dst_root.path().join("copy");

        fs::create_dir(src.path().join("nested")).unwrap();
        fs::write(src.path().join("nested/file"), b"inner").unwrap();

        copy_dir(src.path(), &dst, &[]).unwrap();

        assert_eq!(fs::read(dst.join("nested/file")).unwrap(), b"inner");
    }
}
