//! Tracks a build step's inputs to decide whether it must run again.
//!
//! A step declares the files and strings that feed it and the files it
//! produces. [`run_if_stale`] fingerprints the declared inputs, compares the
//! result against the record left by the previous successful run, and invokes
//! the step's work function only when something differs (or when no usable
//! record exists, or when a declared output has gone missing). After the work
//! function returns successfully the record is replaced, so the next
//! invocation can answer "fresh" from two small files.
//!
//! ## Record files
//!
//! Each step stores its record at a caller-chosen path as a pair of files:
//!
//! - The record path itself holds a 16 hex-digit hash of the full
//!   [`Fingerprint`]. This is what the fast path compares.
//! - A sibling `.json` file holds the full fingerprint. It is only read when
//!   the hashes differ, to work out *which* field changed for the
//!   [`DirtyReason`] log line.
//!
//! Both files are replaced through atomic renames, JSON first and the hash
//! file last, so a crash between the two leaves a mismatched pair that reads
//! as stale. A record that fails to load is treated as absent: the step
//! conservatively re-runs rather than erroring.
//!
//! ## What is (and is not) in a fingerprint
//!
//! Input files are digested by content, never by modification time. Mtimes
//! are unreliable across fresh checkouts, container-image caching, and
//! network filesystems, and a digest is cheap at the sizes involved. File
//! size is recorded alongside the digest for diagnostics only.
//!
//! A failed work function leaves the record exactly as it was, so a failed
//! step can never masquerade as a successful one. The missing-output check
//! covers the related hazard of a partially written artifact from an
//! interrupted run being picked up as complete.

mod dirty_reason;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use buildstamp_util::{ContentDigest, paths, write_atomic};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::depfile::write_depfile;
use crate::util::errors::{BuildstampResult, ConfigurationError, MissingInputError};
use crate::util::{hash_u64, to_hex};

pub use self::dirty_reason::DirtyReason;

/// Format tag for persisted records. Bump when the record layout changes;
/// old records then read as stale instead of misparsing.
const RECORD_VERSION: u32 = 1;

/// Fed between input strings before digesting. The bytes `0xFE 0xFF` can
/// never appear in well-formed UTF-8, so no pair of string lists collides.
const STRING_SEPARATOR: &[u8] = b"\xFE\xFF";

/// Everything that identifies one build step to the staleness check.
#[derive(Clone, Debug)]
pub struct StepDescription<'a> {
    /// Where this step's fingerprint record lives. No two concurrently
    /// running steps may share a record path; that contract is the
    /// caller's to uphold.
    pub record_path: &'a Path,
    /// Files whose contents feed the step. Every path must exist when the
    /// check runs.
    pub input_paths: &'a [PathBuf],
    /// Non-file inputs: command lines, tool versions, switches.
    pub input_strings: &'a [String],
    /// Files the step produces. Must be non-empty.
    pub output_paths: &'a [PathBuf],
    /// Run the work function even when the record matches.
    pub force: bool,
}

/// Fingerprint of one input file.
#[derive(Clone, Debug, Hash, PartialEq, Serialize, Deserialize)]
pub struct InputFingerprint {
    pub path: PathBuf,
    /// Size in bytes at fingerprint time. Diagnostics only; never compared
    /// on its own.
    pub size: u64,
    /// Stable content digest.
    pub hash: u64,
}

/// The recorded state of one build step: sorted input fingerprints, a digest
/// of the input strings, and the sorted set of declared outputs.
///
/// Identical step state always produces an identical record; inputs and
/// outputs are sorted before hashing so enumeration order cannot leak in.
#[derive(Debug, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    version: u32,
    inputs: Vec<InputFingerprint>,
    strings: u64,
    outputs: Vec<PathBuf>,
}

impl Fingerprint {
    /// Fingerprints the step's current inputs and declared outputs.
    pub fn calculate(step: &StepDescription<'_>) -> BuildstampResult<Fingerprint> {
        if step.output_paths.is_empty() {
            return Err(
                ConfigurationError::new("at least one output path must be declared").into(),
            );
        }

        let mut inputs = BTreeMap::new();
        for path in step.input_paths {
            if inputs.contains_key(path) {
                continue;
            }
            if !path.exists() {
                return Err(MissingInputError { path: path.clone() }.into());
            }
            let size = std::fs::metadata(path)
                .with_context(|| format!("failed to stat `{}`", path.display()))?
                .len();
            let mut digest = ContentDigest::new();
            digest.update_path(path)?;
            inputs.insert(path.clone(), (size, digest.finish()));
        }
        let inputs = inputs
            .into_iter()
            .map(|(path, (size, hash))| InputFingerprint { path, size, hash })
            .collect();

        let mut outputs = step.output_paths.to_vec();
        outputs.sort();
        outputs.dedup();

        Ok(Fingerprint {
            version: RECORD_VERSION,
            inputs,
            strings: hash_strings(step.input_strings),
            outputs,
        })
    }

    fn hash_u64(&self) -> u64 {
        hash_u64(self)
    }

    /// Compares this fingerprint with the previously recorded one.
    ///
    /// Only called once the short hashes are known to differ; the return
    /// value is the first differing field, for logging.
    fn compare(&self, old: &Fingerprint) -> DirtyReason {
        if self.version != old.version {
            return DirtyReason::RecordVersionChanged {
                old: old.version,
                new: self.version,
            };
        }
        if self.strings != old.strings {
            return DirtyReason::InputStringsChanged {
                old: old.strings,
                new: self.strings,
            };
        }
        if self.outputs != old.outputs {
            return DirtyReason::OutputSetChanged {
                old: old.outputs.clone(),
                new: self.outputs.clone(),
            };
        }
        let input_paths = |inputs: &[InputFingerprint]| {
            inputs.iter().map(|i| i.path.clone()).collect::<Vec<_>>()
        };
        if input_paths(&self.inputs) != input_paths(&old.inputs) {
            return DirtyReason::InputSetChanged {
                old: input_paths(&old.inputs),
                new: input_paths(&self.inputs),
            };
        }
        for (new, old) in self.inputs.iter().zip(old.inputs.iter()) {
            if new.hash != old.hash {
                return DirtyReason::InputContentsChanged {
                    path: new.path.clone(),
                    old_hash: old.hash,
                    new_hash: new.hash,
                };
            }
        }
        DirtyReason::NothingObvious
    }
}

/// Digest of the sorted input strings, joined with [`STRING_SEPARATOR`].
fn hash_strings(strings: &[String]) -> u64 {
    let mut sorted: Vec<&str> = strings.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let mut digest = ContentDigest::new();
    for s in sorted {
        digest.update(s.as_bytes());
        digest.update(STRING_SEPARATOR);
    }
    digest.finish()
}

/// Reads the previously recorded short hash and fingerprint, if any.
///
/// Any failure reads as "no record": a vanished or corrupt record must cause
/// a conservative rebuild, not an error.
fn load_previous(record_path: &Path) -> Option<(String, Fingerprint)> {
    let short = paths::read(record_path).ok()?;
    let json = paths::read(&record_path.with_extension("json")).ok()?;
    match serde_json::from_str(&json) {
        Ok(old) => Some((short, old)),
        Err(e) => {
            debug!(
                "unreadable fingerprint record at {}: {e}",
                record_path.display()
            );
            None
        }
    }
}

/// Writes the short hash to `record_path` and the full fingerprint to
/// `record_path.json`, each atomically. The hash file goes last so a crash
/// in between leaves a pair that compares as stale.
fn write_record(record_path: &Path, fingerprint: &Fingerprint) -> BuildstampResult<()> {
    if let Some(parent) = record_path.parent() {
        if !parent.as_os_str().is_empty() {
            paths::create_dir_all(parent)?;
        }
    }
    let hash = fingerprint.hash_u64();
    debug!("write fingerprint ({:x}): {}", hash, record_path.display());
    let json = serde_json::to_string(fingerprint)
        .with_context(|| format!("failed to serialize record for `{}`", record_path.display()))?;
    write_atomic(&record_path.with_extension("json"), json.as_bytes())?;
    write_atomic(record_path, to_hex(hash).as_bytes())?;
    Ok(())
}

/// Finds the first reason the step is stale, ignoring `force`.
fn find_dirty_reason(step: &StepDescription<'_>, new: &Fingerprint) -> Option<DirtyReason> {
    if let Some(path) = step.output_paths.iter().find(|path| !path.exists()) {
        return Some(DirtyReason::MissingOutput { path: path.clone() });
    }
    let Some((old_short, old)) = load_previous(step.record_path) else {
        return Some(DirtyReason::FreshBuild);
    };
    if to_hex(new.hash_u64()) == old_short {
        return None;
    }
    Some(new.compare(&old))
}

/// Runs `work` only when the step's recorded state no longer matches its
/// current inputs and outputs.
///
/// The work function runs at most once, synchronously. When it fails, the
/// error propagates unchanged and the on-disk record is left untouched, so
/// the next invocation re-runs the step. Only after `work` succeeds is the
/// new record written.
///
/// Returns whether the work function ran; callers use this for diagnostics
/// only.
pub fn run_if_stale<F>(step: &StepDescription<'_>, work: F) -> BuildstampResult<bool>
where
    F: FnOnce(&DirtyReason) -> BuildstampResult<()>,
{
    let new = Fingerprint::calculate(step)?;
    let dirty = match find_dirty_reason(step, &new) {
        None if step.force => Some(DirtyReason::Forced),
        other => other,
    };
    let Some(reason) = dirty else {
        debug!("fresh: {}", step.record_path.display());
        return Ok(false);
    };
    debug!("dirty {}: {reason}", step.record_path.display());

    work(&reason)?;
    write_record(step.record_path, &new)?;
    Ok(true)
}

/// Depfile-aware variant of [`run_if_stale`].
///
/// When `depfile` is given it is added to the declared outputs, and
/// `tool_deps` (paths of the tool's own implementation, supplied explicitly
/// by the caller at startup; there is no global registry) join the tracked
/// inputs so that editing the tool re-runs the step. After the work function
/// succeeds, the depfile maps the first originally-declared output to
/// `tool_deps` plus `extra_deps`, feeding the outer build graph.
pub fn run_and_write_depfile_if_stale<F>(
    step: &StepDescription<'_>,
    depfile: Option<&Path>,
    tool_deps: &[PathBuf],
    extra_deps: &[PathBuf],
    work: F,
) -> BuildstampResult<bool>
where
    F: FnOnce(&DirtyReason) -> BuildstampResult<()>,
{
    if step.output_paths.is_empty() {
        return Err(ConfigurationError::new("at least one output path must be declared").into());
    }
    let Some(depfile) = depfile else {
        return run_if_stale(step, work);
    };

    let mut input_paths = step.input_paths.to_vec();
    input_paths.extend(tool_deps.iter().cloned());
    let mut output_paths = step.output_paths.to_vec();
    output_paths.push(depfile.to_path_buf());
    let primary_output = step.output_paths[0].clone();

    let step = StepDescription {
        record_path: step.record_path,
        input_paths: &input_paths,
        input_strings: step.input_strings,
        output_paths: &output_paths,
        force: step.force,
    };
    run_if_stale(&step, |reason| {
        work(reason)?;
        let mut deps = tool_deps.to_vec();
        deps.extend(extra_deps.iter().cloned());
        write_depfile(depfile, &primary_output, &deps, None)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trips_through_json() {
        let fingerprint = Fingerprint {
            version: RECORD_VERSION,
            inputs: vec![InputFingerprint {
                path: PathBuf::from("srcs/a.txt"),
                size: 12,
                hash: 0xfeed,
            }],
            strings: 42,
            outputs: vec![PathBuf::from("out/a.zip")],
        };
        let json = serde_json::to_string(&fingerprint).unwrap();
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back.hash_u64(), fingerprint.hash_u64());
    }

    #[test]
    fn string_hash_ignores_order_but_not_content() {
        let ab = hash_strings(&["a".to_string(), "b".to_string()]);
        let ba = hash_strings(&["b".to_string(), "a".to_string()]);
        assert_eq!(ab, ba);

        let joined = hash_strings(&["ab".to_string()]);
        assert_ne!(ab, joined);
    }
}
