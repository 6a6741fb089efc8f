//! Crash-safe file creation.

use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use uuid::Uuid;

/// Write `path` so that any observer sees either no file there or the
/// complete contents, never a partial write.
///
/// The payload is streamed into a uniquely named sibling of `path` and
/// renamed over it once fully flushed and synced. If anything fails,
/// the temporary is removed and `path` is left untouched. Two workers
/// racing on the same task each write their own temporary; whichever
/// renames last wins, and neither leaves a torn file.
pub fn write_atomic<F>(path: impl AsRef<Path>, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let path = path.as_ref();
    let file_name = path
        .file_name()
        .and_then(OsStr::to_str)
        .with_context(|| format!("invalid output path {}", path.display()))?;
    let tmp = path.with_file_name(format!("{file_name}.{}.tmp", Uuid::new_v4()));

    let written: Result<()> = (|| {
        let file = File::create(&tmp)
            .with_context(|| format!("cannot create temporary file {}", tmp.display()))?;
        let mut writer = BufWriter::new(file);
        write(&mut writer)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    })();

    if let Err(err) = written {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }

    fs::rename(&tmp, path).map_err(|err| {
        let _ = fs::remove_file(&tmp);
        anyhow::Error::new(err).context(format!("cannot rename into {}", path.display()))
    })
}
