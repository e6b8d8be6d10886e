//! Combines existing archives into one deterministic output.

use std::collections::HashSet;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use buildstamp_util::{AtomicFile, paths};
use tracing::debug;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::add_data_hermetic;
use crate::util::errors::BuildstampResult;

/// Maps a source entry path to its destination; `None` drops the entry.
pub type PathTransform<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Merges `inputs`, in the order given, into a new archive at `output`.
///
/// When two inputs carry an entry mapping to the same destination path, the
/// first occurrence wins and later ones are dropped without a warning;
/// callers express priority through input ordering, and some rely on the
/// silence. Entries whose transform returns `None` (or an empty path) are
/// skipped the same way. Directory entries are never merged.
///
/// Each entry keeps its source's compression choice unless `force_compress`
/// overrides it for the whole merge. Metadata is rewritten hermetically, as
/// with the builder.
pub fn merge_zips(
    output: &Path,
    inputs: &[PathBuf],
    path_transform: Option<PathTransform<'_>>,
    force_compress: Option<bool>,
) -> BuildstampResult<()> {
    let out = AtomicFile::new(output)?;
    let out = merge_zips_to(out, inputs, path_transform, force_compress)
        .with_context(|| format!("failed to merge archives into `{}`", output.display()))?;
    out.commit()?;
    Ok(())
}

/// Writer-generic form of [`merge_zips`] for callers holding an open handle.
pub fn merge_zips_to<W: Write + Seek>(
    writer: W,
    inputs: &[PathBuf],
    path_transform: Option<PathTransform<'_>>,
    force_compress: Option<bool>,
) -> BuildstampResult<W> {
    let mut zip = ZipWriter::new(writer);
    let mut added_names = HashSet::new();

    for input in inputs {
        let mut archive = ZipArchive::new(paths::open(input)?)
            .with_context(|| format!("failed to read archive `{}`", input.display()))?;
        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .with_context(|| format!("failed to read entry from `{}`", input.display()))?;
            if entry.is_dir() {
                continue;
            }
            let dst_name = match path_transform {
                Some(transform) => match transform(entry.name()) {
                    Some(name) if !name.is_empty() => name,
                    _ => continue,
                },
                None => entry.name().to_owned(),
            };
            if !added_names.insert(dst_name.clone()) {
                debug!(
                    "dropping duplicate entry `{dst_name}` from `{}`",
                    input.display()
                );
                continue;
            }
            let compress =
                force_compress.unwrap_or(entry.compression() != CompressionMethod::Stored);
            let mut data = Vec::new();
            entry.read_to_end(&mut data).with_context(|| {
                format!("failed to read `{dst_name}` from `{}`", input.display())
            })?;
            add_data_hermetic(&mut zip, &dst_name, &data, Some(compress))?;
        }
    }
    Ok(zip.finish()?)
}
