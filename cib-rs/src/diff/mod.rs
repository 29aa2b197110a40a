//! Diff and patch of configuration documents.
//!
//! A diff has two sections. `diff-removed` is a minimal patch naming only
//! the attribute values to revert and the subtrees deleted outright;
//! `diff-added` is a maximal snapshot holding full copies of every element
//! that is new or changed. Each section carries at most one change set,
//! rooted at the document root.

mod generator;
mod log;
mod patch;

pub use generator::{diff, diff_with_digest, DiffGenerator};
pub use log::{format_diff, log_diff};
pub use patch::{apply_diff, Patch};

use crate::constants::{
    ATTR_DIGEST, ATTR_FEATURE_SET, CRM_FEATURE_SET, DIFF_ADDED_TAG, DIFF_REMOVED_TAG,
    DIFF_ROOT_TAG,
};
use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::node::Element;

/// A change description between two versions of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff {
    root: Element,
}

impl Diff {
    /// Creates an empty diff stamped with `feature_set`.
    pub fn new(feature_set: &str) -> Self {
        let mut root = Element::new(DIFF_ROOT_TAG);
        root.set_attr(ATTR_FEATURE_SET, feature_set);
        root.create_child(DIFF_REMOVED_TAG);
        root.create_child(DIFF_ADDED_TAG);
        Diff { root }
    }

    /// Wraps a parsed diff element.
    pub fn from_element(root: Element) -> Result<Self> {
        if root.name() != DIFF_ROOT_TAG {
            return Err(Error::MalformedInput(format!(
                "expected <{}> but found <{}>",
                DIFF_ROOT_TAG,
                root.name()
            )));
        }
        Ok(Diff { root })
    }

    /// Returns the wire form.
    pub fn as_element(&self) -> &Element {
        &self.root
    }

    /// Consumes the diff and returns the wire form.
    pub fn into_element(self) -> Element {
        self.root
    }

    /// Feature set of the peer that produced the diff.
    pub fn feature_set(&self) -> Option<&str> {
        self.root.attr(ATTR_FEATURE_SET)
    }

    /// Digest the patched document is expected to have.
    pub fn digest(&self) -> Option<&str> {
        self.root.attr(ATTR_DIGEST)
    }

    /// Records the digest of the expected patch result.
    pub fn set_digest(&mut self, digest: &Digest) {
        self.root.set_attr(ATTR_DIGEST, digest.as_str());
    }

    /// The `diff-removed` section, if present.
    pub fn removed_section(&self) -> Option<&Element> {
        self.root.first_named_child(DIFF_REMOVED_TAG)
    }

    /// The `diff-added` section, if present.
    pub fn added_section(&self) -> Option<&Element> {
        self.root.first_named_child(DIFF_ADDED_TAG)
    }

    /// The single change set of the removed section.
    pub fn removed_change(&self) -> Result<Option<&Element>> {
        change_root(self.removed_section(), DIFF_REMOVED_TAG)
    }

    /// The single change set of the added section.
    pub fn added_change(&self) -> Result<Option<&Element>> {
        change_root(self.added_section(), DIFF_ADDED_TAG)
    }

    /// Returns true if neither section holds anything.
    pub fn is_empty(&self) -> bool {
        let empty = |s: Option<&Element>| s.is_none_or(|s| !s.has_children());
        empty(self.removed_section()) && empty(self.added_section())
    }

    pub(crate) fn section_mut(&mut self, tag: &str) -> &mut Element {
        let index = match self.root.find_child_index(tag, None) {
            Some(index) => index,
            None => {
                self.root.create_child(tag);
                self.root.child_count() - 1
            }
        };
        &mut self.root.children_mut()[index]
    }
}

impl Default for Diff {
    fn default() -> Self {
        Diff::new(CRM_FEATURE_SET)
    }
}

impl TryFrom<Element> for Diff {
    type Error = Error;

    fn try_from(root: Element) -> Result<Self> {
        Diff::from_element(root)
    }
}

fn change_root<'a>(section: Option<&'a Element>, tag: &'static str) -> Result<Option<&'a Element>> {
    let Some(section) = section else {
        return Ok(None);
    };
    match section.child_count() {
        0 => Ok(None),
        1 => Ok(section.children().first()),
        count => {
            tracing::error!(section = tag, count, "diffs cannot contain more than one change set");
            Err(Error::MultipleChangeRoots { section: tag, count })
        }
    }
}

/// Removes every diff marker from `doc` and its descendants.
pub fn purge_diff_markers(doc: &mut Element) {
    doc.purge_diff_markers();
}
