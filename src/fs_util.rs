//! Atomic file replacement.
//!
//! Bytes go to a uniquely named temp file in the destination directory, are
//! flushed to disk, then renamed over the target. Readers see either the old
//! file or the complete new one.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Write `bytes` to `path` atomically.
///
/// With `private` set the file is created with mode 0600 on Unix.
/// On failure the temp file is removed and `path` is left untouched.
pub fn write_atomic(path: &Path, bytes: &[u8], private: bool) -> io::Result<()> {
    let tmp = temp_path_for(path)?;

    let result = write_then_rename(&tmp, path, bytes, private);
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn temp_path_for(path: &Path) -> io::Result<PathBuf> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    Ok(dir.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple())))
}

fn write_then_rename(tmp: &Path, path: &Path, bytes: &[u8], private: bool) -> io::Result<()> {
    let mut file = open_new(tmp, private)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(tmp, path)
}

fn open_new(path: &Path, private: bool) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        if private {
            options.mode(0o600);
        }
    }
    #[cfg(not(unix))]
    let _ = private;

    options.open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn leftovers(dir: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if name.ends_with(".tmp") {
                names.push(name);
            }
        }
        Ok(names)
    }

    #[test]
    fn test_write_and_replace() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("out.txt");

        write_atomic(&path, b"first", false)?;
        write_atomic(&path, b"second", false)?;

        assert_eq!(fs::read(&path)?, b"second");
        assert!(leftovers(temp_dir.path())?.is_empty());
        Ok(())
    }

    #[test]
    fn test_missing_directory_leaves_nothing() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("no_such_dir").join("out.txt");

        assert!(write_atomic(&path, b"data", false).is_err());
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_private_mode() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("secret.json");

        write_atomic(&path, b"{}", true)?;

        let mode = fs::metadata(&path)?.permissions().mode();
        assert_eq!(mode & 0o777, 0o600, "file should have 0600 permissions");
        Ok(())
    }
}
