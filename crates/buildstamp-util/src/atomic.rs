//! Atomic replace-or-discard output files.
//!
//! A build step must never leave a half-written artifact at its final
//! destination: an interrupted process may leave a stray temporary file
//! behind, but the destination either keeps its old contents or receives the
//! complete new ones. [`AtomicFile`] writes into a uniquely named temporary
//! file created in the destination's own directory (so the final rename never
//! crosses a filesystem) and renames it into place on [`AtomicFile::commit`].
//!
//! Committing compares the temporary against any pre-existing destination
//! first and skips the rename when the contents are identical, leaving the
//! destination's mtime untouched. Downstream consumers may use that mtime as
//! a coarse invalidation signal, so an unchanged output must not look new.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::{Builder as TempFileBuilder, NamedTempFile};
use tracing::debug;

/// An output file that only appears at its destination once it is complete.
///
/// Dropping an uncommitted `AtomicFile` removes the temporary and leaves the
/// destination alone.
pub struct AtomicFile {
    dest: PathBuf,
    tmp: NamedTempFile,
}

impl AtomicFile {
    /// Starts writing a new version of `dest`.
    ///
    /// The parent directory of `dest` must already exist; the temporary is
    /// created there.
    pub fn new(dest: impl AsRef<Path>) -> Result<AtomicFile> {
        let dest = dest.as_ref().to_path_buf();
        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let prefix = dest
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("output");
        let tmp = TempFileBuilder::new()
            .prefix(prefix)
            .suffix(".tmp")
            .tempfile_in(dir)
            .with_context(|| format!("failed to create a temporary file in `{}`", dir.display()))?;
        Ok(AtomicFile { dest, tmp })
    }

    /// Finishes the write: renames the temporary over the destination, or
    /// discards it when the destination already holds identical contents.
    ///
    /// Returns whether the destination was replaced.
    pub fn commit(mut self) -> Result<bool> {
        self.tmp.flush()?;
        if contents_equal(self.tmp.path(), &self.dest)? {
            debug!("unchanged, leaving `{}` alone", self.dest.display());
            return Ok(false);
        }
        if let Err(e) = self.tmp.persist(&self.dest) {
            let tmp_path = e.file.path().to_path_buf();
            return Err(anyhow::Error::from(e.error).context(format!(
                "failed to replace `{}` with `{}`",
                self.dest.display(),
                tmp_path.display()
            )));
        }
        Ok(true)
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tmp.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.tmp.flush()
    }
}

impl Seek for AtomicFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.tmp.seek(pos)
    }
}

/// Writes `contents` to `dest` atomically.
///
/// Returns whether the destination was replaced.
pub fn write_atomic(dest: &Path, contents: &[u8]) -> Result<bool> {
    let mut out = AtomicFile::new(dest)?;
    out.write_all(contents)
        .with_context(|| format!("failed to write `{}`", dest.display()))?;
    out.commit()
}

/// Streaming byte comparison; `b` is allowed to be missing.
fn contents_equal(a: &Path, b: &Path) -> Result<bool> {
    let meta_b = match fs::metadata(b) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e).with_context(|| format!("failed to stat `{}`", b.display())),
    };
    let meta_a = fs::metadata(a).with_context(|| format!("failed to stat `{}`", a.display()))?;
    if meta_a.len() != meta_b.len() {
        return Ok(false);
    }

    let mut file_a = fs::File::open(a).with_context(|| format!("failed to open `{}`", a.display()))?;
    let mut file_b = fs::File::open(b).with_context(|| format!("failed to open `{}`", b.display()))?;
    let mut buf_a = [0; 64 * 1024];
    let mut buf_b = [0; 64 * 1024];
    loop {
        let n = file_a.read(&mut buf_a)?;
        if n == 0 {
            return Ok(true);
        }
        file_b.read_exact(&mut buf_b[..n])?;
        if buf_a[..n] != buf_b[..n] {
            return Ok(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn commit_replaces_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.txt");
        fs::write(&dest, "old").unwrap();

        let mut out = AtomicFile::new(&dest).unwrap();
        out.write_all(b"new").unwrap();
        assert!(out.commit().unwrap());
        assert_eq!(fs::read_to_string(&dest).unwrap(), "new");
    }

    #[test]
    fn identical_contents_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.txt");
        fs::write(&dest, "same").unwrap();

        let mut out = AtomicFile::new(&dest).unwrap();
        out.write_all(b"same").unwrap();
        assert!(!out.commit().unwrap());
        assert_eq!(fs::read_to_string(&dest).unwrap(), "same");
    }

    #[test]
    fn drop_cleans_up_temporary() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.txt");

        let mut out = AtomicFile::new(&dest).unwrap();
        out.write_all(b"abandoned").unwrap();
        drop(out);

        assert!(!dest.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn missing_destination_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.txt");

        assert!(write_atomic(&dest, b"fresh").unwrap());
        assert_eq!(fs::read_to_string(&dest).unwrap(), "fresh");
    }
}
