//! xml-cib - diff, patch, digest and schema upgrade for replicated
//! configuration documents
//!
//! This library keeps copies of a tree-shaped cluster configuration in step
//! without shipping the whole document on every change.
//!
//! # Overview
//!
//! - [`diff()`] computes a change description between two versions of a
//!   document. Its `diff-removed` section is a minimal patch; its
//!   `diff-added` section holds full copies of everything new or changed.
//! - [`apply_diff`] reconstructs the new version from the old one and the
//!   diff, and checks the result against the digest the diff carries.
//! - [`digest()`] hashes a document deterministically. Two algorithms
//!   exist and peers pick one from the feature set version they advertise.
//! - [`SchemaRegistry`] validates documents against a catalog of grammar
//!   versions and upgrades old documents through chained transforms.
//!
//! Elements are matched across versions by tag name and `id` attribute.
//! Documents hold elements and attributes only; text content is dropped on
//! parse.
//!
//! # Example
//!
//! ```
//! use xml_cib::{apply_diff, diff_with_digest, parse_str};
//!
//! let old = parse_str(r#"<cib epoch="1"><configuration><nodes/></configuration></cib>"#).unwrap();
//! let new = parse_str(r#"<cib epoch="2"><configuration><nodes><node id="n1"/></nodes></configuration></cib>"#).unwrap();
//!
//! let d = diff_with_digest(&old, &new, true).unwrap();
//! assert_eq!(apply_diff(&old, &d).unwrap(), new);
//! ```

pub mod constants;
pub mod diff;
pub mod digest;
pub mod error;
pub mod node;
pub mod schema;
pub mod version;
pub mod xml;

// Re-export commonly used types
pub use constants::*;
pub use error::{DebugArtifacts, Error, Result};
pub use node::{
    add_object, char_to_score, expand_idref, expand_increment, find_children, merge_object,
    replace_child, update_child, Element,
};
pub use version::compare_version;
pub use xml::{
    dump_formatted, dump_unformatted, parse_bytes, parse_file, parse_reader, parse_str,
    write_file, XmlParser, XmlPrinter, XmlPrinterOptions,
};

// Re-export diff types
pub use diff::{
    apply_diff, diff, diff_with_digest, format_diff, log_diff, purge_diff_markers, Diff,
    DiffGenerator, Patch,
};

// Re-export digest types
pub use digest::{
    calculate_digest, digest, digest_v1, digest_v2, on_disk_digest, operation_digest,
    versioned_digest, Digest, DigestAlgorithm,
};

// Re-export schema types
pub use schema::{
    default_catalog, default_schema_dir, ConfigStatus, ConfigUpdate, RuleSet, RuleTransform,
    SchemaDescriptor, SchemaId, SchemaKind, SchemaRegistry, Transformer, UpgradeOutcome,
};
