//! Writing the assembled download to disk.
//!
//! A single synchronous write plus a permissions change, off the async
//! reactor via `spawn_blocking` — the same "don't block on sync I/O" idiom
//! this corpus's disk layer uses for its own (considerably more elaborate)
//! per-block writes.

use crate::error::Result;
use std::path::PathBuf;

/// Writes `bytes` to `path`, creating or truncating it, then sets its mode
/// to `0o755`.
pub(crate) async fn write_output(path: PathBuf, bytes: Vec<u8>) -> Result<()> {
    tokio::task::spawn_blocking(move || write_output_blocking(&path, &bytes))
        .await
        .expect("blocking disk write task panicked")
}

fn write_output_blocking(path: &std::path::Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes)?;
    set_permissions(path)?;
    Ok(())
}

#[cfg(unix)]
fn set_permissions(path: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_permissions(_path: &std::path::Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_bytes_and_sets_permissions() {
        let dir = std::env::temp_dir().join(format!("leechcrate-disk-test-{:?}", std::thread::current().id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("out.bin");

        write_output(path.clone(), vec![1, 2, 3, 4]).await.unwrap();

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written, vec![1, 2, 3, 4]);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
