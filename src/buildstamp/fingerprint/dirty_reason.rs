use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// The first difference found between a step's recorded state and its
/// current state.
///
/// This exists purely so logs can say *why* a step re-ran; correctness never
/// depends on which variant fired, only on whether one did.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum DirtyReason {
    /// No usable record exists at the record path. Also covers records that
    /// fail to deserialize, which are treated as absent rather than fatal.
    FreshBuild,
    /// The caller asked for a re-run regardless of recorded state.
    Forced,
    MissingOutput {
        path: PathBuf,
    },
    RecordVersionChanged {
        old: u32,
        new: u32,
    },
    InputContentsChanged {
        path: PathBuf,
        old_hash: u64,
        new_hash: u64,
    },
    InputSetChanged {
        old: Vec<PathBuf>,
        new: Vec<PathBuf>,
    },
    InputStringsChanged {
        old: u64,
        new: u64,
    },
    OutputSetChanged {
        old: Vec<PathBuf>,
        new: Vec<PathBuf>,
    },
    /// The record hash differs but no individual field does. This typically
    /// means the comparison above needs updating; seeing it a lot is a bug.
    NothingObvious,
}

impl DirtyReason {
    pub fn is_fresh_build(&self) -> bool {
        matches!(self, DirtyReason::FreshBuild)
    }
}

impl fmt::Display for DirtyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirtyReason::FreshBuild => write!(f, "first run of this step"),
            DirtyReason::Forced => write!(f, "re-run was forced"),
            DirtyReason::MissingOutput { path } => {
                write!(f, "output `{}` is missing", path.display())
            }
            DirtyReason::RecordVersionChanged { old, new } => {
                write!(f, "record format changed ({old} != {new})")
            }
            DirtyReason::InputContentsChanged {
                path,
                old_hash,
                new_hash,
            } => write!(
                f,
                "contents of `{}` changed ({old_hash:x} != {new_hash:x})",
                path.display()
            ),
            DirtyReason::InputSetChanged { .. } => write!(f, "the set of input files changed"),
            DirtyReason::InputStringsChanged { .. } => write!(f, "an input string changed"),
            DirtyReason::OutputSetChanged { .. } => {
                write!(f, "the set of declared outputs changed")
            }
            DirtyReason::NothingObvious => write!(f, "stale for no obvious reason"),
        }
    }
}
