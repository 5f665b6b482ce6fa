use std::fs;
use std::io;
use std::path::Path;

/// Copies every file below `src` into `dst`, preserving relative directory
/// structure. Missing intermediate directories are created.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<u64> {
    let mut copied = 0;
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copied += copy_dir_recursive(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Number of directory entries of any kind in `dir`.
pub fn count_entries(dir: &Path) -> io::Result<usize> {
    Ok(fs::read_dir(dir)?.count())
}

/// Number of non-directory entries in `dir`; 0 if it cannot be read.
pub fn count_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .map(|rd| {
            rd.filter_map(Result::ok)
                .filter(|e| e.file_type().map(|t| !t.is_dir()).unwrap_or(false))
                .count()
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn copies_nested_structure() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        fs::write(src.path().join("a"), b"1").unwrap();
        fs::create_dir_all(src.path().join("sub/deeper")).unwrap();
        fs::write(src.path().join("sub/deeper/b"), b"2").unwrap();

        let out = dst.path().join("corpus");
        assert_eq!(copy_dir_recursive(src.path(), &out).unwrap(), 2);
        assert_eq!(fs::read(out.join("a")).unwrap(), b"1");
        assert_eq!(fs::read(out.join("sub/deeper/b")).unwrap(), b"2");
        assert_eq!(count_entries(&out).unwrap(), 2);
        assert_eq!(count_files(&out), 1);
        assert_eq!(count_files(&dst.path().join("missing")), 0);
    }
}
