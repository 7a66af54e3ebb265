//! Filesystem seam used by path repair and the artwork resolver.

use std::fs;
use std::io;
use std::path::Path;

/// Minimal file operations the repair and artwork layers need.
pub trait FileAccess: Send + Sync {
    fn is_file(&self, path: &Path) -> bool;

    /// Writes `bytes` to `path`, replacing any existing file, and returns the
    /// number of bytes that ended up on disk.
    fn write_file(&self, path: &Path, bytes: &[u8]) -> io::Result<u64>;

    fn remove_file(&self, path: &Path) -> io::Result<()>;
}

/// [`FileAccess`] backed by the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFiles;

fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            fs::create_dir_all(parent)
        }
        _ => Ok(()),
    }
}

impl FileAccess for LocalFiles {
    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn write_file(&self, path: &Path, bytes: &[u8]) -> io::Result<u64> {
        ensure_parent_dir(path)?;
        let mut temp_name = path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = Path::new(&temp_name);
        if temp_path.exists() {
            let _ = fs::remove_file(temp_path);
        }
        fs::write(temp_path, bytes)?;
        fs::rename(temp_path, path)?;
        Ok(fs::metadata(path)?.len())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    /// Creates a fresh directory under the system temp dir.
    pub fn unique_temp_dir(name: &str) -> PathBuf {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time should be valid")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("roqvault_{name}_{nonce}"));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }
}
