//! Sorted listing of every path in the root filesystem.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use walkdir::WalkDir;

/// All entries under `root` in `find -xdev` notation, sorted bytewise.
///
/// The root itself is `.`, everything else `./relative/path`. Other
/// filesystems mounted below `root` are not entered.
pub fn list_root(root: &Path) -> Result<Vec<Vec<u8>>> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(root).same_file_system(true) {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("{} is outside {}", entry.path().display(), root.display()))?;

        let mut line = b".".to_vec();
        if !relative.as_os_str().is_empty() {
            line.push(b'/');
            line.extend_from_slice(relative.as_os_str().as_bytes());
        }
        entries.push(line);
    }

    entries.sort();
    Ok(entries)
}

/// Write the sorted listing of `root` to `filelist`.
pub fn write_filelist(root: &Path, filelist: &Path) -> Result<()> {
    let entries = list_root(root)?;

    let file = File::create(filelist)
        .with_context(|| format!("Failed to create {}", filelist.display()))?;
    let mut out = BufWriter::new(file);
    for entry in &entries {
        out.write_all(entry)?;
        out.write_all(b"\n")?;
    }
    out.flush()
        .with_context(|| format!("Failed to write {}", filelist.display()))?;
    Ok(())
}
