//! Unpacks archives with the same path discipline as the builder.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use buildstamp_util::paths;
use glob::Pattern;
use zip::ZipArchive;

use super::check_zip_path;
use crate::util::errors::{BuildstampResult, InvalidPathError};

/// Extracts the leaf entries of `archive` into `dest`, returning the paths
/// written.
///
/// Entry names are validated before any file is touched by them, so a
/// hostile archive cannot escape `dest`. When `no_clobber` is set (callers
/// usually want it), extraction fails rather than overwrite an existing
/// file. An optional glob `pattern` limits which entries are extracted.
///
/// Symlink entries are re-created as symlinks from their stored target text;
/// executable bits recorded in an entry's mode are applied to the extracted
/// file.
pub fn extract_zip(
    archive: &Path,
    dest: &Path,
    no_clobber: bool,
    pattern: Option<&Pattern>,
) -> BuildstampResult<Vec<PathBuf>> {
    paths::create_dir_all(dest)?;
    let mut zip = ZipArchive::new(paths::open(archive)?)
        .with_context(|| format!("failed to read archive `{}`", archive.display()))?;

    let mut extracted = Vec::new();
    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .with_context(|| format!("failed to read entry from `{}`", archive.display()))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_owned();
        if let Some(pattern) = pattern {
            if !pattern.matches(&name) {
                continue;
            }
        }
        check_zip_path(&name)?;

        let output_path = dest.join(&name);
        if no_clobber && output_path.symlink_metadata().is_ok() {
            return Err(InvalidPathError::Clobber(output_path).into());
        }
        if let Some(parent) = output_path.parent() {
            paths::create_dir_all(parent)?;
        }

        let mode = entry.unix_mode();
        if is_symlink(mode) {
            let mut target = String::new();
            entry
                .read_to_string(&mut target)
                .with_context(|| format!("failed to read link target of `{name}`"))?;
            make_symlink(&target, &output_path)?;
        } else {
            let mut out = paths::create(&output_path)?;
            io::copy(&mut entry, &mut out)
                .with_context(|| format!("failed to extract `{name}`"))?;
            #[cfg(unix)]
            if let Some(mode) = mode {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(
                    &output_path,
                    std::fs::Permissions::from_mode(mode & 0o777),
                )
                .with_context(|| format!("failed to set mode on `{}`", output_path.display()))?;
            }
        }
        extracted.push(output_path);
    }
    Ok(extracted)
}

/// The high-order bytes of an entry's external attributes carry the unix
/// file-type bits; symlink entries store the link target as their contents.
fn is_symlink(mode: Option<u32>) -> bool {
    mode.is_some_and(|mode| mode & 0o170000 == 0o120000)
}

#[cfg(unix)]
fn make_symlink(target: &str, link: &Path) -> BuildstampResult<()> {
    std::os::unix::fs::symlink(target, link)
        .with_context(|| format!("failed to create symlink `{}`", link.display()))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_symlink(target: &str, link: &Path) -> BuildstampResult<()> {
    // No symlinks to speak of; store the target text so the content is at
    // least inspectable.
    paths::write(link, target.as_bytes())
}
