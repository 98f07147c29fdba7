//! Module archive assembly
//!
//! Builds the `.zip` artifact from a checked-out working tree. Every entry is
//! placed under `<module>@<version>/`; version-control metadata directories
//! and non-regular files (symlinks, sockets) are left out.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::constants::vcs;
use crate::errors::{VcsError, VcsResult};

/// Write a zip of `workdir` to `dest` with every entry under `prefix`
///
/// Entries are written in sorted path order so identical trees produce
/// identical archives.
///
/// # Errors
///
/// Returns `VcsError::Archive` if the tree cannot be walked or the zip written
pub fn write_module_zip(workdir: &Path, prefix: &str, dest: &Path) -> VcsResult<usize> {
    let prefix = if prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{}/", prefix)
    };

    let file = File::create(dest).map_err(|e| archive_error("creating archive file", e))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    let walker = WalkDir::new(workdir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.file_name() != vcs::METADATA_DIR);

    let mut count = 0;
    for entry in walker {
        let entry = entry.map_err(|e| VcsError::Archive {
            reason: format!("walking {}: {}", workdir.display(), e),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(workdir)
            .map_err(|e| VcsError::Archive {
                reason: e.to_string(),
            })?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        zip.start_file(format!("{}{}", prefix, name), options)
            .map_err(|e| VcsError::Archive {
                reason: format!("adding {}: {}", name, e),
            })?;
        let mut source =
            File::open(entry.path()).map_err(|e| archive_error("reading working tree", e))?;
        io::copy(&mut source, &mut zip).map_err(|e| archive_error("writing archive", e))?;
        count += 1;
    }

    let mut writer = zip.finish().map_err(|e| VcsError::Archive {
        reason: format!("finishing archive: {}", e),
    })?;
    writer
        .flush()
        .map_err(|e| archive_error("flushing archive", e))?;
    Ok(count)
}

fn archive_error(context: &str, e: io::Error) -> VcsError {
    VcsError::Archive {
        reason: format!("{}: {}", context, e),
    }
}
