//! Patch a package's ZIP archive with rewritten parts.
//!
//! Unmodified entries are copied via `raw_copy_file` (zero recompression cost).
//! Rewritten entries keep their position; new entries are appended in path
//! order.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Write};
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::error::Result;
use crate::options::Compression;

/// Write `original_data` with every part in `written` replaced (or added) and
/// every part in `removed` dropped.
pub(crate) fn patch_zip(
    original_data: &[u8],
    written: &BTreeMap<String, Vec<u8>>,
    removed: &BTreeSet<String>,
    compression: Compression,
) -> Result<Vec<u8>> {
    let cursor = Cursor::new(original_data);
    let mut archive = ZipArchive::new(cursor)?;
    let options = FileOptions::default().compression_method(compression.into());

    let buf: Vec<u8> = Vec::with_capacity(original_data.len());
    let mut writer = ZipWriter::new(Cursor::new(buf));
    let mut copied: BTreeSet<String> = BTreeSet::new();

    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i)?;
        let name = entry.name().to_string();

        if removed.contains(&name) {
            continue;
        }
        if let Some(bytes) = written.get(&name) {
            writer.start_file(name.as_str(), options)?;
            writer.write_all(bytes)?;
            copied.insert(name);
            continue;
        }

        // Pass through unmodified entry (raw copy, no re-compression)
        writer.raw_copy_file(entry)?;
    }

    for (name, bytes) in written.iter().filter(|(name, _)| !copied.contains(*name)) {
        writer.start_file(name.as_str(), options)?;
        writer.write_all(bytes)?;
    }

    let cursor = writer.finish()?;
    Ok(cursor.into_inner())
}

/// Write a fresh archive holding `files` in the given order.
pub(crate) fn write_archive(
    files: &[(String, Vec<u8>)],
    compression: Compression,
) -> Result<Vec<u8>> {
    let options = FileOptions::default().compression_method(compression.into());
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in files {
        writer.start_file(name.as_str(), options)?;
        writer.write_all(bytes)?;
    }
    Ok(writer.finish()?.into_inner())
}
