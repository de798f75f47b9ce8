use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::clock::current_unix_timestamp_ms;

fn sibling_temp_path(path: &Path, dir: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "nudgebot".to_string());
    dir.join(format!(
        ".{file_name}.{}.{}.partial",
        std::process::id(),
        current_unix_timestamp_ms()
    ))
}

/// Replaces `path` with `content` in one rename. The data is flushed to disk
/// first, so a crash leaves either the old or the new file.
pub fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("destination path cannot be empty");
    }
    if path.is_dir() {
        bail!("destination path '{}' is a directory", path.display());
    }
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let temp_path = sibling_temp_path(path, dir);
    let written = File::create(&temp_path)
        .and_then(|mut file| {
            file.write_all(content.as_bytes())?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&temp_path, path));
    if let Err(error) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(error).with_context(|| format!("failed to write {}", path.display()));
    }
    Ok(())
}
