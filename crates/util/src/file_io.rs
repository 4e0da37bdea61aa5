//! Durable file writes.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

/// Write `content` to `path` through a sibling temporary file and a rename.
///
/// The temporary file is synced before the rename so a completed call leaves
/// either the previous or the new content on disk, never a torn write.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    }
    let temporary_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|extension| extension.to_str()).unwrap_or("tmp")
    ));
    {
        let mut file = File::create(&temporary_path).with_context(|| format!("create temporary file {}", temporary_path.display()))?;
        file.write_all(content.as_bytes())
            .with_context(|| format!("write temporary file {}", temporary_path.display()))?;
        file.sync_all()
            .with_context(|| format!("sync temporary file {}", temporary_path.display()))?;
    }
    fs::rename(&temporary_path, path).with_context(|| format!("persist {} -> {}", temporary_path.display(), path.display()))?;
    Ok(())
}
