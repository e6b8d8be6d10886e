//! Emits the dependency record consumed by the outer build-graph scheduler.
//!
//! A depfile is a single line in Makefile syntax associating one build output
//! with every file that must invalidate it:
//!
//! ```text
//! out/app.zip: srcs/a.java srcs/b.java tools/pack.toml
//! ```
//!
//! The scheduler parses this as a dependency edge list, so the format must be
//! reproduced exactly; embedded spaces are escaped as `\ `. Writing is
//! deliberately not atomic: the owning step's staleness record governs
//! correctness, and a torn depfile merely causes a conservative rebuild.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use buildstamp_util::paths;

use crate::util::errors::{BuildstampResult, ConfigurationError};

/// Renders one path for a depfile, escaping embedded spaces. When `basedir`
/// is given and prefixes the path, the rendered path is relative to it.
fn render_filename(path: &Path, basedir: Option<&Path>) -> BuildstampResult<String> {
    let path = basedir
        .and_then(|base| path.strip_prefix(base).ok())
        .unwrap_or(path);
    let path = path
        .to_str()
        .ok_or_else(|| anyhow::format_err!("depfile path `{}` is not valid utf-8", path.display()))?;
    Ok(path.replace(' ', "\\ "))
}

/// Writes the depfile mapping `primary_output` to `deps`.
///
/// `deps` are written in the order given; callers that need run-to-run
/// determinism sort first. Parent directories of `depfile_path` are created
/// as needed.
///
/// A depfile must never declare itself as its own trigger; that would feed a
/// cycle to the scheduler, so it is rejected as a [`ConfigurationError`].
pub fn write_depfile(
    depfile_path: &Path,
    primary_output: &Path,
    deps: &[PathBuf],
    basedir: Option<&Path>,
) -> BuildstampResult<()> {
    if depfile_path == primary_output {
        return Err(ConfigurationError::new(format!(
            "depfile `{}` must name an output other than itself",
            depfile_path.display()
        ))
        .into());
    }
    if let Some(parent) = depfile_path.parent() {
        if !parent.as_os_str().is_empty() {
            paths::create_dir_all(parent)?;
        }
    }

    let mut out = BufWriter::new(paths::create(depfile_path)?);
    write!(out, "{}:", render_filename(primary_output, basedir)?)?;
    for dep in deps {
        write!(out, " {}", render_filename(dep, basedir)?)?;
    }
    writeln!(out)?;
    out.flush()
        .with_context(|| format!("failed to write `{}`", depfile_path.display()))?;
    Ok(())
}
