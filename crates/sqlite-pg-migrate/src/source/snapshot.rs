//! Point-in-time copy of a SQLite database file.
//!
//! A running application may hold the database open in WAL mode, with recent
//! commits still living in the `-wal` file. Copying the main file together
//! with its `-wal` and `-shm` companions gives the reader a private copy that
//! nothing else writes to.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{MigrateError, Result};

/// Companion files SQLite keeps next to a WAL-mode database.
const SIDECAR_SUFFIXES: [&str; 2] = ["-wal", "-shm"];

/// Copy `src` and any existing sidecar files into `dest_dir`.
///
/// Returns the path of the copied database file.
pub fn copy_database(src: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let file_name = src.file_name().ok_or_else(|| {
        MigrateError::SourceUnavailable(format!("not a database file path: {}", src.display()))
    })?;
    if !src.is_file() {
        return Err(MigrateError::SourceUnavailable(format!(
            "SQLite DB not found: {}",
            src.display()
        )));
    }

    let dest = dest_dir.join(file_name);
    let bytes = std::fs::copy(src, &dest)?;
    debug!("Copied {} ({} bytes) to {}", src.display(), bytes, dest.display());

    for suffix in SIDECAR_SUFFIXES {
        let companion = sidecar(src, suffix);
        if companion.is_file() {
            std::fs::copy(&companion, sidecar(&dest, suffix))?;
            debug!("Copied {}", companion.display());
        }
    }

    info!("Reading from snapshot {}", dest.display());
    Ok(dest)
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
