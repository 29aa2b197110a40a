//! Patch application.
//!
//! Applies a diff to a prior document to reconstruct the new version, then
//! verifies the result against the digest recorded in the diff. A result
//! that fails verification is never handed back; the only recovery is a
//! full copy of the document from a peer.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{info, trace, warn, Level};

use super::generator::subtract;
use super::Diff;
use crate::constants::ATTR_ID;
use crate::digest::digest;
use crate::error::{DebugArtifacts, Error, Result};
use crate::node::{merge_object, Element};
use crate::xml::dump_unformatted;

/// Patch application for diffs.
#[derive(Debug, Clone, Default)]
pub struct Patch {
    /// Where to write debug snapshots when verification fails.
    artifact_dir: Option<PathBuf>,
}

impl Patch {
    /// Creates a patch applicator. Debug snapshots are only written when
    /// TRACE logging is enabled for this module, to the system temp dir.
    pub fn new() -> Self {
        Patch { artifact_dir: None }
    }

    /// Always writes debug snapshots to `dir` when verification fails.
    pub fn with_artifact_dir(dir: impl Into<PathBuf>) -> Self {
        Patch {
            artifact_dir: Some(dir.into()),
        }
    }

    /// Applies `diff` to `old` and returns the new document.
    ///
    /// # Errors
    /// * [`Error::MultipleChangeRoots`] if a section holds more than one
    ///   change set.
    /// * [`Error::DigestMismatch`] if the diff records a digest and the
    ///   result does not match it. The result must be discarded.
    pub fn apply(&self, old: &Element, diff: &Diff) -> Result<Element> {
        let removed = diff.removed_change()?;
        let added = diff.added_change()?;

        trace!("subtraction phase");
        let mut candidate = match removed {
            Some(removed) => subtract(old, Some(removed), false, None)
                .unwrap_or_else(|| identity_of(old)),
            None => old.clone(),
        };

        trace!("addition phase");
        if let Some(added) = added {
            merge_object(&mut candidate, added, true);
        }
        candidate.purge_diff_markers();

        if let Some(expected) = diff.digest() {
            let calculated = digest(&candidate, true, diff.feature_set());
            if calculated.as_str() != expected {
                info!(expected, calculated = %calculated, "digest mismatch");
                let artifacts = self.save_artifacts(old, diff, &candidate);
                return Err(Error::DigestMismatch {
                    expected: expected.to_string(),
                    calculated: calculated.into_string(),
                    artifacts,
                });
            }
            trace!(expected, calculated = %calculated, "digest matched");
        }

        Ok(candidate)
    }

    fn save_artifacts(&self, old: &Element, diff: &Diff, candidate: &Element) -> Option<DebugArtifacts> {
        let dir = match &self.artifact_dir {
            Some(dir) => dir.clone(),
            None if tracing::enabled!(Level::TRACE) => std::env::temp_dir(),
            None => return None,
        };

        match save_all(&dir, old, diff, candidate) {
            Ok(artifacts) => Some(artifacts),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "could not save digest mismatch artifacts");
                None
            }
        }
    }
}

/// Applies `diff` to `old` with default options.
pub fn apply_diff(old: &Element, diff: &Diff) -> Result<Element> {
    Patch::new().apply(old, diff)
}

/// Root left over when the whole document was cancelled out.
fn identity_of(old: &Element) -> Element {
    let mut root = Element::new(old.name());
    if let Some(id) = old.id() {
        root.set_attr(ATTR_ID, id);
    }
    root
}

fn save_all(
    dir: &Path,
    old: &Element,
    diff: &Diff,
    candidate: &Element,
) -> std::io::Result<DebugArtifacts> {
    Ok(DebugArtifacts {
        original: save_artifact(dir, "diff:original", old)?,
        diff: save_artifact(dir, "diff:input", diff.as_element())?,
        candidate: save_artifact(dir, "diff:new", candidate)?,
    })
}

fn save_artifact(dir: &Path, desc: &str, doc: &Element) -> std::io::Result<PathBuf> {
    let prefix = format!("{}-", desc.replace(':', "-"));
    let mut file = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".xml")
        .tempfile_in(dir)?;
    file.write_all(dump_unformatted(doc).as_bytes())?;
    let (_, path) = file.keep().map_err(|e| e.error)?;
    info!(path = %path.display(), "saving {}", desc);
    Ok(path)
}
