//! Private temporary directories for model processes and frame capture.

use std::io;
use std::path::Path;

use tempfile::TempDir;

use crate::defaults;

/// Creates a private temporary directory, preferring `/dev/shm` when it
/// exists so socket and frame traffic stays off persistent storage.
///
/// The directory is removed when the returned handle is dropped.
pub(crate) fn temp_dir() -> io::Result<TempDir> {
    let shm = Path::new("/dev/shm");
    if shm.is_dir()
        && let Ok(dir) = tempfile::Builder::new()
            .prefix(defaults::TEMP_DIR_PREFIX)
            .tempdir_in(shm)
    {
        return Ok(dir);
    }
    tempfile::Builder::new()
        .prefix(defaults::TEMP_DIR_PREFIX)
        .tempdir()
}
