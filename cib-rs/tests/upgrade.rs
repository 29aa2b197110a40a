//! Validation and upgrade against the bundled schema catalog.

use std::path::{Path, PathBuf};

use xml_cib::{
    parse_file, parse_str, ConfigStatus, Element, Error, SchemaId, SchemaKind, SchemaRegistry,
    ATTR_VALIDATION,
};

fn schema_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("schemas")
}

fn registry() -> SchemaRegistry {
    SchemaRegistry::with_defaults(schema_dir()).unwrap()
}

fn fixture(name: &str) -> Element {
    parse_file(Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)).unwrap()
}

fn id(registry: &SchemaRegistry, name: &str) -> SchemaId {
    registry.lookup(name).unwrap()
}

fn find<'a>(root: &'a Element, name: &str, id: &str) -> Option<&'a Element> {
    if root.name() == name && root.id() == Some(id) {
        return Some(root);
    }
    root.children().iter().find_map(|c| find(c, name, id))
}

#[test]
fn bundled_catalog() {
    let registry = registry();
    let names: Vec<&str> = registry.schemas().map(|(_, d)| d.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "pacemaker-0.6",
            "transitional-0.6",
            "pacemaker-0.7",
            "pacemaker-1.0",
            "pacemaker-1.1",
            "pacemaker-1.2",
            "none"
        ]
    );
    assert_eq!(registry.schema_name(registry.latest()), "pacemaker-1.2");
    assert_eq!(
        registry.descriptor(id(&registry, "pacemaker-0.6")).map(|d| d.kind),
        Some(SchemaKind::Dtd)
    );
}

#[test]
fn every_bundled_grammar_loads() {
    let registry = registry();
    let doc = parse_str("<cib/>").unwrap();
    for (schema, descriptor) in registry.schemas() {
        let verdict = registry.validate(&doc, schema);
        assert!(verdict.is_ok(), "{}: {:?}", descriptor.name, verdict);
        if descriptor.kind != SchemaKind::None {
            assert_eq!(verdict.ok(), Some(false), "{} accepted an empty cib", descriptor.name);
        }
    }
}

#[test]
fn current_configuration_validates() {
    let registry = registry();
    for name in ["cib-old.xml", "cib-new.xml"] {
        let doc = fixture(name);
        assert_eq!(registry.validate_document(&doc, None).unwrap(), true, "{name}");
        assert!(registry.validate_verbose(&doc).unwrap());
    }

    let mut broken = fixture("cib-old.xml");
    broken.children_mut()[0].create_child("unknown-section");
    assert!(!registry.validate_document(&broken, None).unwrap());
    assert!(!registry.validate_verbose(&broken).unwrap());
}

#[test]
fn legacy_configuration_only_validates_as_legacy() {
    let registry = registry();
    let doc = fixture("cib-0.6.xml");
    assert!(registry.validate(&doc, id(&registry, "pacemaker-0.6")).unwrap());
    assert!(registry.validate(&doc, id(&registry, "transitional-0.6")).unwrap());
    assert!(!registry.validate(&doc, id(&registry, "pacemaker-1.0")).unwrap());
    // Undeclared documents are held to the minimum supported version
    assert!(!registry.validate_document(&doc, None).unwrap());
    assert!(registry.validate_document(&doc, Some("pacemaker-0.6")).unwrap());
    assert!(matches!(
        registry.validate_document(&doc, Some("pacemaker-9.9")),
        Err(Error::UnknownSchemaVersion(_))
    ));
}

#[test]
fn legacy_configuration_upgrades_to_latest() {
    let registry = registry();
    let doc = fixture("cib-0.6.xml");
    let minimum = id(&registry, "pacemaker-1.0");

    let outcome = registry.upgrade(&doc, Some(minimum), true);
    assert!(outcome.ok);
    assert!(outcome.reached_minimum());
    assert_eq!(outcome.achieved, Some(registry.latest()));

    let upgraded = &outcome.document;
    assert_eq!(upgraded.attr(ATTR_VALIDATION), Some("pacemaker-1.2"));
    assert_eq!(upgraded.attr("have-quorum"), Some("true"));
    assert!(!upgraded.has_attr("have_quorum"));
    assert!(!upgraded.has_attr("ignore_dtd"));
    assert!(find(upgraded, "master", "ms-drbd").is_some());
    assert!(find(upgraded, "master_slave", "ms-drbd").is_none());

    let set = find(upgraded, "cluster_property_set", "cib-bootstrap-options").unwrap();
    assert_eq!(set.child_count(), 2);
    assert!(set.children().iter().all(|c| c.name() == "nvpair"));

    let order = find(upgraded, "rsc_order", "ip-after-drbd").unwrap();
    assert_eq!(order.attr("first"), Some("ms-drbd"));
    assert_eq!(order.attr("then"), Some("ip"));
    assert_eq!(order.attr("first-action"), Some("promote"));
    assert!(!order.has_attr("type"));

    assert!(registry.validate(upgraded, registry.latest()).unwrap());
    // The input is left alone
    assert!(doc.has_attr("have_quorum"));
}

#[test]
fn legacy_orderings_keep_their_direction() {
    let registry = registry();
    let mut doc = fixture("cib-0.6.xml");
    doc.children_mut()[0]
        .first_named_child_mut("constraints")
        .unwrap()
        .add_child(Element::with_attributes(
            "rsc_order",
            [
                ("id", "drbd-before-ip"),
                ("from", "ms-drbd"),
                ("action", "promote"),
                ("type", "before"),
                ("to", "ip"),
                ("to_action", "start"),
            ],
        ));
    assert!(registry.validate(&doc, id(&registry, "pacemaker-0.6")).unwrap());

    let outcome = registry.upgrade(&doc, Some(id(&registry, "pacemaker-1.0")), true);
    assert!(outcome.ok);
    assert_eq!(outcome.achieved, Some(registry.latest()));

    let before = find(&outcome.document, "rsc_order", "drbd-before-ip").unwrap();
    assert_eq!(before.attr("first"), Some("ms-drbd"));
    assert_eq!(before.attr("first-action"), Some("promote"));
    assert_eq!(before.attr("then"), Some("ip"));
    assert_eq!(before.attr("then-action"), Some("start"));
    assert!(!before.has_attr("type"));

    let after = find(&outcome.document, "rsc_order", "ip-after-drbd").unwrap();
    assert_eq!(after.attr("first"), Some("ms-drbd"));
    assert_eq!(after.attr("then"), Some("ip"));
}

#[test]
fn transitional_configuration_upgrades() {
    let registry = registry();
    let mut doc = fixture("cib-0.6.xml");
    doc.set_attr(ATTR_VALIDATION, "transitional-0.6");

    let outcome = registry.upgrade(&doc, None, true);
    assert!(outcome.ok);
    assert_eq!(outcome.achieved, Some(registry.latest()));
}

#[test]
fn failed_transform_stops_the_walk() {
    let registry = registry();
    let doc = fixture("cib-0.6-conflict.xml");
    let minimum = id(&registry, "pacemaker-1.0");

    let outcome = registry.upgrade(&doc, Some(minimum), true);
    assert!(!outcome.ok);
    assert!(!outcome.reached_minimum());
    assert_eq!(outcome.achieved, Some(id(&registry, "pacemaker-0.6")));
    // The rejected transform output is not kept
    assert!(outcome.document.has_attr("have_quorum"));
    assert!(find(&outcome.document, "master_slave", "ms-drbd").is_some());
}

#[test]
fn upgrade_without_transforms_only_checks() {
    let registry = registry();
    let doc = fixture("cib-0.6.xml");
    let outcome = registry.upgrade(&doc, None, false);
    assert!(outcome.ok);
    assert_eq!(outcome.achieved, Some(id(&registry, "transitional-0.6")));
    assert!(outcome.document.has_attr("have_quorum"));
}

#[test]
fn upgrade_never_goes_backwards() {
    let registry = registry();
    let mut doc = fixture("cib-old.xml");
    doc.set_attr(ATTR_VALIDATION, "pacemaker-1.1");
    doc.children_mut()[0].create_child("unknown-section");

    for transform in [false, true] {
        let outcome = registry.upgrade(&doc, None, transform);
        assert_eq!(outcome.achieved, Some(id(&registry, "pacemaker-1.1")));
        assert_eq!(outcome.document.attr(ATTR_VALIDATION), Some("pacemaker-1.1"));
    }

    let latest = fixture("cib-old.xml");
    let outcome = registry.upgrade(&latest, None, true);
    assert_eq!(outcome.achieved, Some(registry.latest()));
    assert_eq!(outcome.document, latest);
}

#[test]
fn config_update_classification() {
    let registry = registry();
    let minimum = id(&registry, "pacemaker-1.0");
    let latest = registry.latest();

    let update = registry.config_update(&fixture("cib-0.6.xml"), minimum, latest);
    assert_eq!(update.status, ConfigStatus::UpgradedToLatest);
    assert!(update.is_acceptable());
    assert_eq!(update.document.attr(ATTR_VALIDATION), Some("pacemaker-1.2"));

    let conflict = fixture("cib-0.6-conflict.xml");
    let update = registry.config_update(&conflict, minimum, latest);
    assert_eq!(update.status, ConfigStatus::BelowMinimum);
    assert!(!update.is_acceptable());
    assert_eq!(update.document, conflict);

    let current = fixture("cib-old.xml");
    let update = registry.config_update(&current, minimum, latest);
    assert_eq!(update.status, ConfigStatus::Current);
    assert_eq!(update.document, current);

    let mut unchecked = fixture("cib-old.xml");
    unchecked.set_attr(ATTR_VALIDATION, "none");
    let update = registry.config_update(&unchecked, minimum, latest);
    assert_eq!(update.status, ConfigStatus::ValidationDisabled);
    assert!(registry.validate_document(&unchecked, None).unwrap());
}

#[test]
fn concurrent_validation_shares_grammars() {
    let registry = registry();
    let doc = fixture("cib-new.xml");
    let latest = registry.latest();

    std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| s.spawn(|| registry.validate(&doc, latest).unwrap()))
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
    });
}
