//! End-to-end diff, patch and digest scenarios over realistic
//! configuration documents.
//!
//! Fixture documents live in `tests/fixtures/`.

use std::path::{Path, PathBuf};

use xml_cib::{
    apply_diff, diff, diff_with_digest, digest, dump_formatted, dump_unformatted, format_diff,
    on_disk_digest, parse_file, parse_str, write_file, Diff, DiffGenerator, Element, Error, Patch,
    ATTR_LAST_WRITTEN, DIFF_MARKER,
};

fn fixture_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn fixture(name: &str) -> Element {
    parse_file(fixture_dir().join(name)).unwrap()
}

fn find<'a>(root: &'a Element, name: &str, id: &str) -> Option<&'a Element> {
    if root.name() == name && root.id() == Some(id) {
        return Some(root);
    }
    root.children().iter().find_map(|c| find(c, name, id))
}

/// Sends a diff through its text form, as a peer would receive it.
fn over_the_wire(diff: &Diff) -> Diff {
    let text = dump_formatted(diff.as_element());
    Diff::from_element(parse_str(&text).unwrap()).unwrap()
}

#[test]
fn changed_attribute_round_trip() {
    let old = parse_str(r#"<cfg><node id="1" score="10"/></cfg>"#).unwrap();
    let new = parse_str(r#"<cfg><node id="1" score="20"/></cfg>"#).unwrap();

    let d = diff(&old, &new, true).unwrap();
    assert_eq!(
        d.removed_change().unwrap().map(dump_unformatted).as_deref(),
        Some(r#"<cfg><node id="1" score="10"/></cfg>"#)
    );
    assert_eq!(
        d.added_change().unwrap().map(dump_unformatted).as_deref(),
        Some(r#"<cfg><node id="1" score="20"/></cfg>"#)
    );
    assert_eq!(apply_diff(&old, &d).unwrap(), new);
}

#[test]
fn deleted_child_round_trip() {
    let old = parse_str(r#"<cfg><node id="1"/><node id="2" uname="b"><x id="x"/></node></cfg>"#).unwrap();
    let new = parse_str(r#"<cfg><node id="1"/></cfg>"#).unwrap();

    let d = diff(&old, &new, true).unwrap();
    let removed = d.removed_change().unwrap().unwrap();
    let deleted = find(removed, "node", "2").unwrap();
    assert_eq!(deleted.attr(DIFF_MARKER), Some("removed:top"));
    assert_eq!(deleted.child_count(), 1);
    assert!(d.added_change().unwrap().is_none());

    let patched = apply_diff(&old, &d).unwrap();
    assert_eq!(patched, new);
}

#[test]
fn identical_documents_have_no_diff() {
    let doc = fixture("cib-old.xml");
    assert!(diff(&doc, &doc, true).is_none());
    assert!(diff(&doc, &doc.clone(), false).is_none());
}

#[test]
fn full_configuration_round_trip() {
    let old = fixture("cib-old.xml");
    let new = fixture("cib-new.xml");

    let d = over_the_wire(&diff_with_digest(&old, &new, true).unwrap());
    assert!(d.digest().is_some());

    // Deleted resources travel whole, new nodes as full copies
    let removed = d.removed_change().unwrap().unwrap();
    assert_eq!(
        find(removed, "primitive", "web").and_then(|p| p.attr(DIFF_MARKER)),
        Some("removed:top")
    );
    assert_eq!(
        find(removed, "nvpair", "opt-stonith").and_then(|n| n.attr("value")),
        Some("false")
    );
    let added = d.added_change().unwrap().unwrap();
    assert_eq!(
        find(added, "node", "node-c").and_then(|n| n.attr(DIFF_MARKER)),
        Some("added:top")
    );
    assert_eq!(
        find(added, "nvpair", "node-b-standby").and_then(|n| n.attr("value")),
        Some("on")
    );
    assert!(find(added, "node_state", "node-a").is_none());

    let patched = apply_diff(&old, &d).unwrap();
    assert_eq!(patched, new);
    assert!(!dump_unformatted(&patched).contains(DIFF_MARKER));
}

#[test]
fn stale_document_is_rejected() {
    let old = fixture("cib-old.xml");
    let new = fixture("cib-new.xml");
    let d = diff_with_digest(&old, &new, true).unwrap();

    // The receiver's copy drifted in a part the diff does not touch
    let mut stale = old.clone();
    let nodes = stale.children_mut()[0].first_named_child_mut("nodes").unwrap();
    nodes.children_mut()[0].set_attr("uname", "alpha-renamed");

    let err = apply_diff(&stale, &d).unwrap_err();
    assert!(err.requires_full_resync());
    match err {
        Error::DigestMismatch {
            expected,
            calculated,
            ..
        } => {
            assert_eq!(Some(expected.as_str()), d.digest());
            assert_ne!(expected, calculated);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn mismatch_artifacts_are_written() {
    let dir = tempfile::tempdir().unwrap();
    let old = fixture("cib-old.xml");
    let new = fixture("cib-new.xml");
    let mut d = diff(&old, &new, true).unwrap();
    d.set_digest(&digest(&old, true, d.feature_set()));

    let err = Patch::with_artifact_dir(dir.path()).apply(&old, &d).unwrap_err();
    let Error::DigestMismatch {
        artifacts: Some(artifacts),
        ..
    } = err
    else {
        panic!("expected a digest mismatch with artifacts");
    };
    assert_eq!(parse_file(&artifacts.original).unwrap(), old);
    assert_eq!(parse_file(&artifacts.candidate).unwrap(), new);
    let saved = Diff::from_element(parse_file(&artifacts.diff).unwrap()).unwrap();
    assert_eq!(saved, d);
}

#[test]
fn multiple_change_roots_are_an_error() {
    let old = parse_str(r#"<cfg><node id="1"/></cfg>"#).unwrap();
    let d = Diff::from_element(
        parse_str(
            r#"<diff crm_feature_set="3.0.7">
                 <diff-removed/>
                 <diff-added><cfg/><cfg/></diff-added>
               </diff>"#,
        )
        .unwrap(),
    )
    .unwrap();
    assert!(matches!(
        apply_diff(&old, &d),
        Err(Error::MultipleChangeRoots {
            section: "diff-added",
            count: 2
        })
    ));
}

#[test]
fn volatile_attributes_and_digests() {
    let doc = fixture("cib-old.xml");
    let mut touched = doc.clone();
    touched.set_attr(ATTR_LAST_WRITTEN, "Thu Oct 15 12:00:00 2026");

    for version in [Some("3.0.1"), Some("3.0.7")] {
        assert_eq!(digest(&doc, true, version), digest(&touched, true, version));
        assert_ne!(digest(&doc, false, version), digest(&touched, false, version));
    }
    assert!(diff(&doc, &touched, true).is_none());
}

#[test]
fn legacy_peers_get_legacy_digests() {
    let old = fixture("cib-old.xml");
    let new = fixture("cib-new.xml");

    let d = DiffGenerator::new()
        .feature_set("3.0.1")
        .with_digest(true)
        .generate(&old, &new)
        .unwrap();
    assert_eq!(d.digest(), Some(digest(&new, true, Some("3.0.1")).as_str()));
    assert_ne!(d.digest(), Some(digest(&new, true, Some("3.0.7")).as_str()));
    assert_eq!(apply_diff(&old, &d).unwrap(), new);
}

#[test]
fn compressed_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cib.xml.bz2");
    let original = fixture("cib-new.xml");

    let mut doc = original.clone();
    write_file(&mut doc, &path, true).unwrap();
    assert!(doc.has_attr(ATTR_LAST_WRITTEN));

    let read = parse_file(&path).unwrap();
    assert_eq!(read, doc);
    // Only the bookkeeping stamp differs from what we started with
    assert!(diff(&original, &read, true).is_none());
    assert_ne!(on_disk_digest(&original), on_disk_digest(&read));
}

#[test]
fn empty_input_is_distinct() {
    assert!(matches!(parse_str(""), Err(Error::EmptyInput)));
    assert!(matches!(parse_str("<!-- nothing -->"), Err(Error::MalformedInput(_))));
}

#[test]
fn diff_rendering() {
    let old = fixture("cib-old.xml");
    let new = fixture("cib-new.xml");
    let d = diff(&old, &new, true).unwrap();

    let full = format_diff(&d, false);
    let short = format_diff(&d, true);
    assert!(full.iter().any(|l| l.starts_with('-') && l.contains("primitive")));
    assert!(full.iter().any(|l| l.starts_with('+') && l.contains("node-c")));
    assert!(short.len() <= full.len());
}
