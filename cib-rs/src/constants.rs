//! Constants used throughout the engine.
//!
//! Tag and attribute names here are part of the wire and on-disk formats
//! shared with other cluster members, so they must not change.

/// Attribute used to match corresponding nodes across two tree versions.
pub const ATTR_ID: &str = "id";

/// Attribute that references another element's identity.
pub const ATTR_IDREF: &str = "id-ref";

/// Attribute naming the schema version a document declares.
pub const ATTR_VALIDATION: &str = "validate-with";

/// Legacy attribute that opts a document out of validation.
pub const ATTR_IGNORE_DTD: &str = "ignore-dtd";

/// Attribute listing attribute names whose values are masked in logs.
pub const ATTR_HIDDEN: &str = "hidden";

/// Origin marker (volatile).
pub const ATTR_ORIGIN: &str = "crm-debug-origin";

/// Last-written timestamp (volatile).
pub const ATTR_LAST_WRITTEN: &str = "cib-last-written";

/// Node that originated the last update (volatile).
pub const ATTR_UPDATE_ORIGIN: &str = "update-origin";

/// Client that performed the last update (volatile).
pub const ATTR_UPDATE_CLIENT: &str = "update-client";

/// User that performed the last update (volatile).
pub const ATTR_UPDATE_USER: &str = "update-user";

/// Bookkeeping attributes excluded from diff comparison and filtered digests.
pub const VOLATILE_ATTRS: [&str; 5] = [
    ATTR_ORIGIN,
    ATTR_LAST_WRITTEN,
    ATTR_UPDATE_ORIGIN,
    ATTR_UPDATE_CLIENT,
    ATTR_UPDATE_USER,
];

/// Returns true if `name` is one of the volatile bookkeeping attributes.
pub fn is_volatile(name: &str) -> bool {
    VOLATILE_ATTRS.contains(&name)
}

/// Root tag of a diff document.
pub const DIFF_ROOT_TAG: &str = "diff";

/// Section holding the minimal patch of what must be reverted.
pub const DIFF_REMOVED_TAG: &str = "diff-removed";

/// Section holding the maximal snapshot of what is new or changed.
pub const DIFF_ADDED_TAG: &str = "diff-added";

/// Attribute carrying the protocol/feature-set version.
pub const ATTR_FEATURE_SET: &str = "crm_feature_set";

/// Attribute carrying the digest of the expected patch result.
pub const ATTR_DIGEST: &str = "digest";

/// Attribute tagging whole subtrees copied into a diff.
pub const DIFF_MARKER: &str = "__crm_diff_marker__";

/// Marker value for the root of a deleted subtree.
pub const MARKER_REMOVED_TOP: &str = "removed:top";

/// Marker value for the root of an added subtree.
pub const MARKER_ADDED_TOP: &str = "added:top";

/// Feature set stamped on diffs produced by this engine.
pub const CRM_FEATURE_SET: &str = "3.0.7";

/// Feature sets older than this use the v1 digest algorithm.
pub const DIGEST_V2_MIN_FEATURE_SET: &str = "3.0.5";

/// Root element of a cluster configuration document.
pub const CIB_TAG: &str = "cib";

/// Subtree excluded from filtered v2 digests.
pub const STATUS_TAG: &str = "status";

/// Oldest schema version a live cluster accepts without upgrading.
pub const MINIMUM_SCHEMA_VERSION: &str = "pacemaker-1.0";

/// Newest schema version known to the default catalog.
pub const LATEST_SCHEMA_VERSION: &str = "pacemaker-1.2";

/// Sentinel schema version meaning "no validation".
pub const SCHEMA_NONE: &str = "none";

/// Environment variable overriding the schema resource directory.
pub const SCHEMA_DIR_ENV: &str = "PCMK_schema_directory";

/// Score representing infinity; increments saturate here.
pub const SCORE_INFINITY: i64 = 1_000_000;
