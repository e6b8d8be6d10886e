//! Staleness tracking and deterministic zip packaging for build pipelines.
//!
//! A build step hands [`fingerprint::run_if_stale`] the files and strings
//! that feed it, the files it produces, and a work function. The work
//! function runs only when the recorded state of a previous successful run no
//! longer matches; afterwards the record is replaced so the next invocation
//! is a cheap comparison. Steps that produce archives do so through
//! [`archive`], which writes zip files whose bytes are independent of
//! machine, ordering, and source timestamps, and every artifact lands via an
//! atomic rename so interrupted builds never leave partial outputs.
//! [`depfile`] reports a step's full dependency set back to the scheduler
//! that drives the build graph.
//!
//! The pieces compose but do not depend on each other's policy: the
//! fingerprint layer never inspects archive contents, and the archive layer
//! works the same whether or not a staleness check gated it.

pub use crate::archive::{
    ZipEntry, ZipOptions, build_zip, build_zip_to, check_zip_path, extract_zip, merge_zips,
    merge_zips_to, zip_directory,
};
pub use crate::depfile::write_depfile;
pub use crate::fingerprint::{
    DirtyReason, Fingerprint, StepDescription, run_and_write_depfile_if_stale, run_if_stale,
};
pub use crate::util::errors::{
    BuildstampResult, ConfigurationError, InvalidPathError, MissingInputError,
};

pub mod archive;
pub mod depfile;
pub mod fingerprint;
pub mod util;
