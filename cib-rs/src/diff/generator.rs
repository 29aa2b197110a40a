//! Diff generation.
//!
//! Both sections are produced by the same recursive subtraction. Removing
//! `new` from `old` yields the values to revert; removing `old` from `new`
//! in full mode yields the complete elements to merge back in.

use tracing::{debug, trace};

use super::Diff;
use crate::constants::{
    is_volatile, ATTR_ID, CRM_FEATURE_SET, DIFF_ADDED_TAG, DIFF_MARKER, DIFF_REMOVED_TAG,
    MARKER_ADDED_TOP, MARKER_REMOVED_TOP,
};
use crate::digest::digest;
use crate::node::Element;

/// Builds diffs between two versions of a document.
#[derive(Debug, Clone)]
pub struct DiffGenerator {
    /// Drop elements that carry nothing but their identity.
    suppress_trivial: bool,
    /// Feature set stamped on produced diffs.
    feature_set: String,
    /// Record the digest of the new version.
    with_digest: bool,
}

impl Default for DiffGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl DiffGenerator {
    /// Creates a generator that suppresses trivial elements, stamps the
    /// current feature set and records no digest.
    pub fn new() -> Self {
        DiffGenerator {
            suppress_trivial: true,
            feature_set: CRM_FEATURE_SET.to_string(),
            with_digest: false,
        }
    }

    /// Sets whether identity-only leaves are pruned.
    pub fn suppress_trivial(mut self, suppress: bool) -> Self {
        self.suppress_trivial = suppress;
        self
    }

    /// Sets the feature set stamped on the diff. It also selects the
    /// digest algorithm.
    pub fn feature_set(mut self, feature_set: impl Into<String>) -> Self {
        self.feature_set = feature_set.into();
        self
    }

    /// Sets whether the filtered digest of the new version is recorded.
    pub fn with_digest(mut self, with_digest: bool) -> Self {
        self.with_digest = with_digest;
        self
    }

    /// Computes the diff from `old` to `new`.
    ///
    /// Returns `None` when the documents have no differences.
    pub fn generate(&self, old: &Element, new: &Element) -> Option<Diff> {
        let mut removed = subtract(old, Some(new), false, Some(MARKER_REMOVED_TOP));
        let mut added = subtract(new, Some(old), true, Some(MARKER_ADDED_TOP));

        if self.suppress_trivial {
            if removed.as_mut().is_some_and(can_prune_leaf) {
                removed = None;
            }
            if added.as_mut().is_some_and(can_prune_leaf) {
                added = None;
            }
        }

        if removed.is_none() && added.is_none() {
            trace!(root = old.name(), "no differences");
            return None;
        }

        let mut diff = Diff::new(&self.feature_set);
        if let Some(removed) = removed {
            diff.section_mut(DIFF_REMOVED_TAG).add_child(removed);
        }
        if let Some(added) = added {
            diff.section_mut(DIFF_ADDED_TAG).add_child(added);
        }
        if self.with_digest {
            let expected = digest(new, true, Some(&self.feature_set));
            diff.set_digest(&expected);
        }

        debug!(
            root = old.name(),
            feature_set = %self.feature_set,
            digest = ?diff.digest(),
            "generated diff"
        );
        Some(diff)
    }
}

/// Computes the diff from `old` to `new`, or `None` if they are equivalent.
pub fn diff(old: &Element, new: &Element, suppress: bool) -> Option<Diff> {
    DiffGenerator::new().suppress_trivial(suppress).generate(old, new)
}

/// Like [`diff`], and also records the filtered digest of `new` so the
/// receiver can verify its patch result.
pub fn diff_with_digest(old: &Element, new: &Element, suppress: bool) -> Option<Diff> {
    DiffGenerator::new()
        .suppress_trivial(suppress)
        .with_digest(true)
        .generate(old, new)
}

/// Returns what `left` holds that `right` does not.
///
/// Children are matched by tag and identity. A `left` element missing from
/// `right` is copied whole and tagged with `marker`. With `full` every
/// changed element carries all of its attributes; otherwise it carries its
/// identity plus the `left` values of the attributes that differ.
///
/// With no `marker` the call is cancelling a patch out of a document rather
/// than building one: matched elements that have nothing left are kept as
/// identity-only shells instead of being dropped, and volatile attributes
/// are kept unless `right` names them with the same value.
pub(crate) fn subtract(
    left: &Element,
    right: Option<&Element>,
    full: bool,
    marker: Option<&str>,
) -> Option<Element> {
    let Some(right) = right else {
        trace!(tag = left.name(), id = ?left.id(), "complete copy");
        let mut copy = left.clone();
        if let Some(marker) = marker {
            copy.set_attr(DIFF_MARKER, marker);
        }
        return Some(copy);
    };

    if right.attr(DIFF_MARKER) == Some(MARKER_REMOVED_TOP) {
        trace!(tag = left.name(), id = ?left.id(), "root of the deletion");
        return None;
    }

    let mut result = Element::new(left.name());
    let mut differences = false;

    for left_child in left.children() {
        let right_child = right.find_child(left_child.name(), left_child.id());
        if let Some(child_diff) = subtract(left_child, right_child, full, marker) {
            result.add_child(child_diff);
            differences = true;
        }
    }

    if differences && full {
        copy_all_attributes(&mut result, left);
        return Some(result);
    }

    // A patch cancels only what the removed section names, volatile
    // attributes included
    let patching = marker.is_none();
    let mut changed: Vec<&str> = Vec::new();
    for (name, value) in left.attributes() {
        if name == ATTR_ID || (!patching && is_volatile(name)) {
            continue;
        }
        if right.attr(name) == Some(value) {
            continue;
        }

        differences = true;
        if full {
            copy_all_attributes(&mut result, left);
            return Some(result);
        }
        changed.push(name);
    }

    if !differences {
        if !patching {
            trace!(tag = left.name(), id = ?left.id(), "no changes");
            return None;
        }
        if let Some(id) = left.id() {
            result.set_attr(ATTR_ID, id);
        }
        return Some(result);
    }

    for (name, value) in left.attributes() {
        if name == ATTR_ID || changed.contains(&name) {
            result.set_attr(name, value);
        }
    }
    Some(result)
}

fn copy_all_attributes(target: &mut Element, source: &Element) {
    for (name, value) in source.attributes() {
        target.set_attr(name, value);
    }
}

/// Removes descendants that carry nothing but an identity, and reports
/// whether `node` itself carries nothing but an identity.
///
/// Marked subtrees are whole copies and are left untouched.
fn can_prune_leaf(node: &mut Element) -> bool {
    if node.has_attr(DIFF_MARKER) {
        return false;
    }
    let mut can_prune = node.attributes().all(|(name, _)| name == ATTR_ID);
    node.retain_children(|child| !can_prune_leaf(child));
    if node.has_children() {
        can_prune = false;
    }
    can_prune
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{dump_unformatted, parse_str};

    fn parse(xml: &str) -> Element {
        parse_str(xml).unwrap()
    }

    fn sections(diff: &Diff) -> (Option<String>, Option<String>) {
        (
            diff.removed_change().unwrap().map(dump_unformatted),
            diff.added_change().unwrap().map(dump_unformatted),
        )
    }

    #[test]
    fn test_changed_attribute() {
        let old = parse(r#"<cfg><node id="1" score="10"/></cfg>"#);
        let new = parse(r#"<cfg><node id="1" score="20"/></cfg>"#);
        let diff = diff(&old, &new, false).unwrap();
        let (removed, added) = sections(&diff);
        assert_eq!(removed.as_deref(), Some(r#"<cfg><node id="1" score="10"/></cfg>"#));
        assert_eq!(added.as_deref(), Some(r#"<cfg><node id="1" score="20"/></cfg>"#));
    }

    #[test]
    fn test_deleted_child() {
        let old = parse(r#"<cfg><node id="1"/><node id="2" uname="b"><attr id="a"/></node></cfg>"#);
        let new = parse(r#"<cfg><node id="1"/></cfg>"#);
        let diff = diff(&old, &new, true).unwrap();
        let (removed, added) = sections(&diff);
        assert_eq!(
            removed.as_deref(),
            Some(r#"<cfg><node id="2" uname="b" __crm_diff_marker__="removed:top"><attr id="a"/></node></cfg>"#)
        );
        assert!(added.is_none());
    }

    #[test]
    fn test_added_child_is_full_copy() {
        let old = parse(r#"<cfg epoch="1"><nodes/></cfg>"#);
        let new = parse(r#"<cfg epoch="1"><nodes><node id="3" uname="c"/></nodes></cfg>"#);
        let diff = diff(&old, &new, true).unwrap();
        let (removed, added) = sections(&diff);
        assert!(removed.is_none());
        assert_eq!(
            added.as_deref(),
            Some(r#"<cfg epoch="1"><nodes><node id="3" uname="c" __crm_diff_marker__="added:top"/></nodes></cfg>"#)
        );
    }

    #[test]
    fn test_identical_documents() {
        let doc = parse(r#"<cfg a="1"><node id="1" score="10"><x/></node></cfg>"#);
        assert!(diff(&doc, &doc, false).is_none());
        assert!(diff(&doc, &doc, true).is_none());
    }

    #[test]
    fn test_volatile_attributes_ignored() {
        let old = parse(r#"<cfg cib-last-written="then" update-client="a"><n id="1" crm-debug-origin="x"/></cfg>"#);
        let new = parse(r#"<cfg cib-last-written="now" update-client="b"><n id="1" crm-debug-origin="y"/></cfg>"#);
        assert!(diff(&old, &new, false).is_none());
    }

    #[test]
    fn test_removed_attribute_records_old_value() {
        let old = parse(r#"<cfg><n id="1" a="x" b="y"/></cfg>"#);
        let new = parse(r#"<cfg><n id="1" b="y"/></cfg>"#);
        let diff = diff(&old, &new, false).unwrap();
        let (removed, added) = sections(&diff);
        assert_eq!(removed.as_deref(), Some(r#"<cfg><n id="1" a="x"/></cfg>"#));
        assert!(added.is_none());
    }

    #[test]
    fn test_full_mode_copies_ancestor_attributes() {
        let old = parse(r#"<cfg epoch="1" admin="0"><n id="1" a="x"/></cfg>"#);
        let new = parse(r#"<cfg epoch="1" admin="0"><n id="1" a="y" b="z"/></cfg>"#);
        let added = subtract(&new, Some(&old), true, Some(MARKER_ADDED_TOP)).unwrap();
        assert_eq!(
            dump_unformatted(&added),
            r#"<cfg epoch="1" admin="0"><n id="1" a="y" b="z"/></cfg>"#
        );
    }

    #[test]
    fn test_suppress_prunes_identity_only_leaves() {
        let mut node = parse(r#"<cfg><n id="1"/><m id="2"><k id="3"/></m><v id="4" x="1"/></cfg>"#);
        assert!(!can_prune_leaf(&mut node));
        assert_eq!(dump_unformatted(&node), r#"<cfg><v id="4" x="1"/></cfg>"#);

        let mut trivial = parse(r#"<cfg><n id="1"/></cfg>"#);
        assert!(can_prune_leaf(&mut trivial));
    }

    #[test]
    fn test_suppress_keeps_marked_subtrees_whole() {
        let old = parse(r#"<cfg><nodes/></cfg>"#);
        let new = parse(r#"<cfg><nodes><node id="3"><attrs id="a"/></node></nodes></cfg>"#);
        let diff = diff(&old, &new, true).unwrap();
        let (_, added) = sections(&diff);
        assert_eq!(
            added.as_deref(),
            Some(r#"<cfg><nodes><node id="3" __crm_diff_marker__="added:top"><attrs id="a"/></node></nodes></cfg>"#)
        );
    }

    #[test]
    fn test_subtract_stops_at_deletion_root() {
        let left = parse(r#"<n id="1" a="x"/>"#);
        let right = parse(r#"<n id="1" __crm_diff_marker__="removed:top"/>"#);
        assert!(subtract(&left, Some(&right), false, None).is_none());
    }

    #[test]
    fn test_subtract_without_marker_keeps_shells() {
        let left = parse(r#"<cfg><n id="1" a="x"/></cfg>"#);
        let right = parse(r#"<cfg><n id="1" a="x"/></cfg>"#);
        let result = subtract(&left, Some(&right), false, None).unwrap();
        assert_eq!(dump_unformatted(&result), r#"<cfg><n id="1"/></cfg>"#);
    }

    #[test]
    fn test_diff_with_digest() {
        let old = parse(r#"<cib epoch="1"><configuration/></cib>"#);
        let new = parse(r#"<cib epoch="2"><configuration/></cib>"#);
        let diff = diff_with_digest(&old, &new, true).unwrap();
        let expected = digest(&new, true, Some(CRM_FEATURE_SET));
        assert_eq!(diff.digest(), Some(expected.as_str()));
        assert_eq!(diff.feature_set(), Some(CRM_FEATURE_SET));
    }

    #[test]
    fn test_generator_feature_set() {
        let old = parse(r#"<cib epoch="1"/>"#);
        let new = parse(r#"<cib epoch="2"/>"#);
        let diff = DiffGenerator::new()
            .feature_set("3.0.1")
            .with_digest(true)
            .generate(&old, &new)
            .unwrap();
        assert_eq!(diff.feature_set(), Some("3.0.1"));
        let expected = digest(&new, true, Some("3.0.1"));
        assert_eq!(diff.digest(), Some(expected.as_str()));
    }
}
