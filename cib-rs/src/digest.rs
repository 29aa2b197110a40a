//! Content digests of documents.
//!
//! Two canonicalizations exist. The v1 ("legacy") form sorts every
//! attribute list and hashes a framed serialization; the v2 ("fast") form
//! hashes the document as it is, optionally ignoring the status section.
//! Peers agree on the algorithm through the feature set version carried by
//! a diff, and a digest is only ever compared against one produced by the
//! same algorithm.

use std::cmp::Ordering;
use std::fmt;

use md5::{Digest as _, Md5};
use tracing::trace;

use crate::constants::{is_volatile, CIB_TAG, DIGEST_V2_MIN_FEATURE_SET, STATUS_TAG};
use crate::node::Element;
use crate::version::compare_version;
use crate::xml::dump_unformatted;

/// The canonicalization used to produce a [`Digest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    /// Sorted attributes, framed serialization.
    V1,
    /// Unsorted, status excluded when filtering.
    V2,
}

impl DigestAlgorithm {
    /// Selects the algorithm for a peer's feature set version.
    ///
    /// Peers older than 3.0.5, and peers that do not say, get v1.
    pub fn for_version(version: Option<&str>) -> Self {
        match version {
            Some(v) if compare_version(DIGEST_V2_MIN_FEATURE_SET, v) != Ordering::Greater => {
                DigestAlgorithm::V2
            }
            _ => DigestAlgorithm::V1,
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestAlgorithm::V1 => write!(f, "v1"),
            DigestAlgorithm::V2 => write!(f, "v2"),
        }
    }
}

/// A 128-bit content hash rendered as 32 lowercase hex characters.
///
/// Equality takes the algorithm into account, so digests produced by
/// different algorithms never compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: DigestAlgorithm,
    hex: String,
}

impl Digest {
    fn compute(algorithm: DigestAlgorithm, text: &str) -> Self {
        let hex = hex::encode(Md5::digest(text.as_bytes()));
        trace!(%algorithm, digest = %hex, bytes = text.len(), "computed digest");
        Digest { algorithm, hex }
    }

    /// Returns the algorithm that produced this digest.
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Returns the hex form.
    pub fn as_str(&self) -> &str {
        &self.hex
    }

    /// Consumes the digest and returns the hex form.
    pub fn into_string(self) -> String {
        self.hex
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex)
    }
}

/// Computes a v1 digest.
///
/// With `sort` or `filter` the attributes of every node are sorted by name
/// first; with `filter` every volatile attribute is also removed throughout
/// the tree.
pub fn digest_v1(doc: &Element, sort: bool, filter: bool) -> Digest {
    let text = if sort || filter {
        let mut copy = doc.clone();
        sort_recursive(&mut copy);
        if filter {
            strip_volatile_recursive(&mut copy);
        }
        dump_unformatted(&copy)
    } else {
        dump_unformatted(doc)
    };

    // Legacy consumers hash this exact framing
    let framed = format!(" {}\n", text);
    Digest::compute(DigestAlgorithm::V1, &framed)
}

/// Computes a v2 digest.
///
/// With `filter` volatile attributes are removed from the root only, and
/// the root's `status` children are left out entirely. The filtered copy is
/// always hashed as a `cib` element, whatever the root is called.
pub fn digest_v2(doc: &Element, filter: bool) -> Digest {
    let text = if filter {
        let mut copy = Element::new(CIB_TAG);
        for (name, value) in doc.attributes() {
            if !is_volatile(name) {
                copy.set_attr(name, value);
            }
        }
        for child in doc.children() {
            if child.name() != STATUS_TAG {
                copy.add_child_copy(child);
            }
        }
        dump_unformatted(&copy)
    } else {
        dump_unformatted(doc)
    };
    Digest::compute(DigestAlgorithm::V2, &text)
}

/// Computes a digest with the algorithm implied by `version`.
pub fn versioned_digest(doc: &Element, sort: bool, filter: bool, version: Option<&str>) -> Digest {
    match DigestAlgorithm::for_version(version) {
        DigestAlgorithm::V1 => {
            trace!(version = ?version, "using v1 digest algorithm");
            digest_v1(doc, sort, filter)
        }
        DigestAlgorithm::V2 => {
            trace!(version = ?version, "using v2 digest algorithm");
            digest_v2(doc, filter)
        }
    }
}

/// Computes the unsorted digest selected by `version`.
pub fn digest(doc: &Element, filter: bool, version: Option<&str>) -> Digest {
    versioned_digest(doc, false, filter, version)
}

/// Digest recorded alongside documents on disk. Always v1.
pub fn on_disk_digest(doc: &Element) -> Digest {
    digest_v1(doc, false, false)
}

/// Digest of operation parameters. Always v1 with sorted attributes.
pub fn operation_digest(doc: &Element) -> Digest {
    digest_v1(doc, true, false)
}

/// v1 digest with explicit sort and filter controls.
pub fn calculate_digest(doc: &Element, sort: bool, filter: bool) -> Digest {
    digest_v1(doc, sort, filter)
}

fn sort_recursive(element: &mut Element) {
    element.sort_attributes();
    for child in element.children_mut() {
        sort_recursive(child);
    }
}

fn strip_volatile_recursive(element: &mut Element) {
    element.retain_attrs(|name, _| !is_volatile(name));
    for child in element.children_mut() {
        strip_volatile_recursive(child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse_str;

    const DOC: &str = r#"<cib epoch="2" cib-last-written="Mon Jan  1 00:00:00 2024" admin_epoch="0"><configuration><nodes><node uname="a" id="1" crm-debug-origin="x"/></nodes></configuration><status><node_state id="1"/></status></cib>"#;

    #[test]
    fn test_algorithm_selection() {
        assert_eq!(DigestAlgorithm::for_version(None), DigestAlgorithm::V1);
        assert_eq!(DigestAlgorithm::for_version(Some("3.0.4")), DigestAlgorithm::V1);
        assert_eq!(DigestAlgorithm::for_version(Some("2.0")), DigestAlgorithm::V1);
        assert_eq!(DigestAlgorithm::for_version(Some("3.0.5")), DigestAlgorithm::V2);
        assert_eq!(DigestAlgorithm::for_version(Some("3.0.7")), DigestAlgorithm::V2);
        assert_eq!(DigestAlgorithm::for_version(Some("3.1")), DigestAlgorithm::V2);
    }

    #[test]
    fn test_known_v1_value() {
        let doc = Element::new("a");
        let expected = hex::encode(Md5::digest(b" <a/>\n"));
        assert_eq!(on_disk_digest(&doc).as_str(), expected);
    }

    #[test]
    fn test_known_v2_value() {
        let doc = Element::new("a");
        let expected = hex::encode(Md5::digest(b"<a/>"));
        assert_eq!(digest_v2(&doc, false).as_str(), expected);
    }

    #[test]
    fn test_v2_filter_hashes_a_cib_root() {
        let doc = parse_str(r#"<a x="1" update-user="u"><b/><status/></a>"#).unwrap();
        let expected = hex::encode(Md5::digest(br#"<cib x="1"><b/></cib>"#));
        assert_eq!(digest_v2(&doc, true).as_str(), expected);

        let renamed = parse_str(r#"<cib x="1"><b/></cib>"#).unwrap();
        assert_eq!(digest_v2(&doc, true), digest_v2(&renamed, true));
        assert_ne!(digest_v2(&doc, false), digest_v2(&renamed, false));
    }

    #[test]
    fn test_digest_form() {
        let doc = parse_str(DOC).unwrap();
        let d = digest(&doc, true, Some("3.0.7"));
        assert_eq!(d.as_str().len(), 32);
        assert!(d
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_digest_is_stable() {
        let doc = parse_str(DOC).unwrap();
        assert_eq!(digest(&doc, true, None), digest(&doc, true, None));
        assert_eq!(
            digest(&doc, true, Some("3.0.7")),
            digest(&doc, true, Some("3.0.7"))
        );
    }

    #[test]
    fn test_volatile_attributes_ignored_when_filtering() {
        let a = parse_str(DOC).unwrap();
        let mut b = a.clone();
        b.set_attr("cib-last-written", "Tue Feb  2 00:00:00 2024");

        for version in [None, Some("3.0.7")] {
            assert_eq!(digest(&a, true, version), digest(&b, true, version));
            assert_ne!(digest(&a, false, version), digest(&b, false, version));
        }
    }

    #[test]
    fn test_content_change_changes_digest() {
        let a = parse_str(DOC).unwrap();
        let mut b = a.clone();
        b.set_attr("epoch", "3");
        for version in [None, Some("3.0.7")] {
            assert_ne!(digest(&a, true, version), digest(&b, true, version));
        }
    }

    #[test]
    fn test_v1_sort_ignores_attribute_order() {
        let a = parse_str(r#"<n a="1" b="2"/>"#).unwrap();
        let b = parse_str(r#"<n b="2" a="1"/>"#).unwrap();
        assert_eq!(operation_digest(&a), operation_digest(&b));
        assert_ne!(on_disk_digest(&a), on_disk_digest(&b));
    }

    #[test]
    fn test_v1_filter_is_recursive() {
        let a = parse_str(DOC).unwrap();
        let mut b = a.clone();
        b.children_mut()[0].children_mut()[0].children_mut()[0]
            .set_attr("crm-debug-origin", "elsewhere");
        assert_eq!(calculate_digest(&a, false, true), calculate_digest(&b, false, true));
    }

    #[test]
    fn test_v2_filter_excludes_status() {
        let a = parse_str(DOC).unwrap();
        let mut b = a.clone();
        b.children_mut()[1].children_mut()[0].set_attr("crmd", "online");
        assert_eq!(digest_v2(&a, true), digest_v2(&b, true));
        assert_ne!(digest_v2(&a, false), digest_v2(&b, false));
        assert_ne!(digest_v1(&a, false, true), digest_v1(&b, false, true));
    }

    #[test]
    fn test_versions_never_compare_equal() {
        let doc = Element::new("a");
        let v1 = digest_v1(&doc, false, false);
        let v2 = digest_v2(&doc, false);
        assert_ne!(v1, v2);
        assert_eq!(v1.algorithm(), DigestAlgorithm::V1);
        assert_eq!(v2.algorithm(), DigestAlgorithm::V2);
    }
}
