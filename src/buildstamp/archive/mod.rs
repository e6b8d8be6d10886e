//! Deterministic zip construction.
//!
//! Archives produced here are byte-for-byte reproducible: building the same
//! logical entry set on another machine, in another order, or after touching
//! every source file yields an identical output file. Three rules make that
//! hold:
//!
//! - Entries are sorted by archive path before writing, so neither caller
//!   ordering nor filesystem enumeration order leaks into the output.
//! - Every entry carries a fixed date-time (2001-01-01 00:00:00) instead of
//!   the source file's mtime.
//! - Mode bits are pinned to a `0o644` baseline; only the executable bits
//!   survive from the source file. Symlinked sources become symlink entries
//!   storing the link-target text, not the target's bytes.
//!
//! Output always goes through [`AtomicFile`], so an aborted build never
//! leaves a corrupt archive at the destination. The `*_to` variants accept
//! any `Write + Seek` handle for callers that manage the destination
//! themselves.

mod extract;
mod merge;

use std::fs;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use buildstamp_util::{AtomicFile, paths};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::util::errors::{BuildstampResult, InvalidPathError};

pub use self::extract::extract_zip;
pub use self::merge::{PathTransform, merge_zips, merge_zips_to};

/// Fixed date-time stamped on every entry, far enough in the past to be
/// obviously synthetic.
const HERMETIC_TIMESTAMP: (u16, u8, u8, u8, u8, u8) = (2001, 1, 1, 0, 0, 0);

/// Baseline mode bits for entries; only executable bits are added from the
/// source file.
const HERMETIC_FILE_MODE: u32 = 0o644;

/// Contents smaller than this are never deflated; the codec overhead would
/// grow them.
const MIN_COMPRESS_SIZE: usize = 16;

fn hermetic_mtime() -> DateTime {
    let (year, month, day, hour, minute, second) = HERMETIC_TIMESTAMP;
    DateTime::from_date_and_time(year, month, day, hour, minute, second)
        .expect("fixed timestamp is within zip range")
}

/// One file to be written into an archive: a validated archive-relative
/// destination plus the bytes' origin.
pub struct ZipEntry {
    pub zip_path: String,
    source: EntrySource,
}

enum EntrySource {
    File(PathBuf),
    Data(Vec<u8>),
}

impl ZipEntry {
    /// Entry whose bytes come from `source` on disk. If `source` is a
    /// symlink it is stored as a symlink entry, not dereferenced.
    pub fn from_file(zip_path: impl Into<String>, source: impl Into<PathBuf>) -> ZipEntry {
        ZipEntry {
            zip_path: zip_path.into(),
            source: EntrySource::File(source.into()),
        }
    }

    /// Entry with in-memory contents.
    pub fn from_data(zip_path: impl Into<String>, data: impl Into<Vec<u8>>) -> ZipEntry {
        ZipEntry {
            zip_path: zip_path.into(),
            source: EntrySource::Data(data.into()),
        }
    }

    /// Entry whose archive path is `source` made relative to `base_dir`.
    pub fn from_relative_file(base_dir: &Path, source: impl Into<PathBuf>) -> BuildstampResult<ZipEntry> {
        let source = source.into();
        let relative = source.strip_prefix(base_dir).with_context(|| {
            format!(
                "`{}` is not under base directory `{}`",
                source.display(),
                base_dir.display()
            )
        })?;
        let zip_path = relative
            .to_str()
            .ok_or_else(|| {
                anyhow::format_err!("archive path `{}` is not valid utf-8", relative.display())
            })?
            .replace('\\', "/");
        Ok(ZipEntry::from_file(zip_path, source))
    }
}

/// Build-wide knobs for [`build_zip`].
#[derive(Default)]
pub struct ZipOptions<'a> {
    /// Per-entry compression decision, keyed by the final archive path.
    /// Entries with no decision function are stored uncompressed.
    pub compress_fn: Option<&'a dyn Fn(&str) -> bool>,
    /// Path prepended to every archive path.
    pub prefix: Option<&'a str>,
}

/// Validates an archive-relative path: relative, normalized, no parent
/// traversal. Everything written into or read out of an archive goes through
/// this check.
pub fn check_zip_path(name: &str) -> BuildstampResult<()> {
    if Path::new(name).has_root() {
        return Err(InvalidPathError::Absolute(name.to_string()).into());
    }
    let normalized = paths::normalize_path(Path::new(name));
    if name.is_empty() || normalized.as_os_str() != name {
        return Err(InvalidPathError::NonCanonical(name.to_string()).into());
    }
    Ok(())
}

/// Builds the archive at `output` from `entries`.
///
/// Entries are sorted by archive path first; supplying them in any order
/// produces the same bytes. Any entry failure aborts the whole build and
/// leaves no file at `output`.
pub fn build_zip(
    output: &Path,
    entries: Vec<ZipEntry>,
    options: &ZipOptions<'_>,
) -> BuildstampResult<()> {
    let out = AtomicFile::new(output)?;
    let out = build_zip_to(out, entries, options)
        .with_context(|| format!("failed to build archive `{}`", output.display()))?;
    out.commit()?;
    Ok(())
}

/// Writer-generic form of [`build_zip`] for callers holding an open handle.
pub fn build_zip_to<W: Write + Seek>(
    writer: W,
    mut entries: Vec<ZipEntry>,
    options: &ZipOptions<'_>,
) -> BuildstampResult<W> {
    entries.sort_by(|a, b| a.zip_path.cmp(&b.zip_path));
    if let Some(pair) = entries.windows(2).find(|pair| pair[0].zip_path == pair[1].zip_path) {
        return Err(InvalidPathError::Duplicate(pair[0].zip_path.clone()).into());
    }

    let mut zip = ZipWriter::new(writer);
    for entry in &entries {
        let zip_path = match options.prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), entry.zip_path),
            None => entry.zip_path.clone(),
        };
        let compress = options.compress_fn.map(|decide| decide(&zip_path));
        match &entry.source {
            EntrySource::File(path) => add_file_hermetic(&mut zip, &zip_path, path, compress)?,
            EntrySource::Data(data) => add_data_hermetic(&mut zip, &zip_path, data, compress)?,
        }
    }
    Ok(zip.finish()?)
}

/// Creates an archive from every file under `base_dir`, with paths relative
/// to it.
pub fn zip_directory(
    output: &Path,
    base_dir: &Path,
    options: &ZipOptions<'_>,
) -> BuildstampResult<()> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(base_dir) {
        let entry =
            entry.with_context(|| format!("failed to walk `{}`", base_dir.display()))?;
        if entry.file_type().is_dir() {
            continue;
        }
        entries.push(ZipEntry::from_relative_file(base_dir, entry.path())?);
    }
    build_zip(output, entries, options)
}

/// Adds one on-disk file with hermetic metadata: pinned timestamp, `0o644`
/// baseline with the source's executable bits, symlinks stored as link
/// targets.
fn add_file_hermetic<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    zip_path: &str,
    src: &Path,
    compress: Option<bool>,
) -> BuildstampResult<()> {
    check_zip_path(zip_path)?;
    let meta = fs::symlink_metadata(src)
        .with_context(|| format!("failed to stat `{}`", src.display()))?;

    if meta.file_type().is_symlink() {
        let target = fs::read_link(src)
            .with_context(|| format!("failed to read link `{}`", src.display()))?;
        let target = target.to_str().ok_or_else(|| {
            anyhow::format_err!("link target of `{}` is not valid utf-8", src.display())
        })?;
        let options = SimpleFileOptions::default().last_modified_time(hermetic_mtime());
        zip.add_symlink(zip_path, target, options)
            .with_context(|| format!("failed to add symlink entry `{zip_path}`"))?;
        return Ok(());
    }

    let mut mode = HERMETIC_FILE_MODE;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        mode |= meta.permissions().mode() & 0o111;
    }
    let data = paths::read_bytes(src)?;
    write_entry(zip, zip_path, &data, compress, mode)
}

/// Adds one in-memory entry with hermetic metadata.
fn add_data_hermetic<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    zip_path: &str,
    data: &[u8],
    compress: Option<bool>,
) -> BuildstampResult<()> {
    check_zip_path(zip_path)?;
    write_entry(zip, zip_path, data, compress, HERMETIC_FILE_MODE)
}

/// The single low-level entry writer shared by the builder and the merger.
fn write_entry<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    zip_path: &str,
    data: &[u8],
    compress: Option<bool>,
    mode: u32,
) -> BuildstampResult<()> {
    let compress = compress.unwrap_or(false) && data.len() >= MIN_COMPRESS_SIZE;
    let method = if compress {
        CompressionMethod::Deflated
    } else {
        CompressionMethod::Stored
    };
    let options = SimpleFileOptions::default()
        .compression_method(method)
        .last_modified_time(hermetic_mtime())
        .unix_permissions(mode);
    zip.start_file(zip_path, options)
        .with_context(|| format!("failed to start archive entry `{zip_path}`"))?;
    zip.write_all(data)
        .with_context(|| format!("failed to write archive entry `{zip_path}`"))?;
    Ok(())
}
