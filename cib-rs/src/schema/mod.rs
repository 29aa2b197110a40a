//! Schema registry and upgrader.
//!
//! The registry holds an ordered catalog of document format versions. Each
//! entry names a grammar (none, an external DTD or a RELAX-NG grammar), an
//! optional transform to the next format, and the version that transform
//! produces. Documents declare their version in `validate-with`.
//!
//! RELAX-NG grammars are compiled on first use and kept per catalog slot
//! until [`SchemaRegistry::clear_caches`]. DTDs are read on every call.

mod dtd;
mod pattern;
mod relaxng;
mod transform;

pub use transform::{Rule, RuleSet, RuleTransform, Selector, Transformer};

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, error, info, trace, warn};

use self::pattern::Grammar;
use crate::constants::{
    ATTR_IGNORE_DTD, ATTR_VALIDATION, MINIMUM_SCHEMA_VERSION, SCHEMA_DIR_ENV, SCHEMA_NONE,
};
use crate::error::{Error, Result};
use crate::node::Element;
use crate::xml::dump_formatted;

/// How documents of a catalog version are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaKind {
    /// No checking; every document passes.
    None,
    /// An external DTD.
    Dtd,
    /// A RELAX-NG grammar in XML syntax.
    RelaxNg,
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDescriptor {
    /// Version name as written in `validate-with`.
    pub name: String,
    pub kind: SchemaKind,
    /// Grammar file, relative to the schema directory.
    pub location: Option<String>,
    /// Transform to the upgrade target, relative to the schema directory.
    pub transform: Option<String>,
    /// Version the transform produces. Defaults to the next entry.
    pub upgrade_target: Option<String>,
}

impl SchemaDescriptor {
    /// An entry that performs no validation.
    pub fn none(name: impl Into<String>) -> Self {
        SchemaDescriptor {
            name: name.into(),
            kind: SchemaKind::None,
            location: None,
            transform: None,
            upgrade_target: None,
        }
    }

    /// An entry validated by the DTD at `location`.
    pub fn dtd(name: impl Into<String>, location: impl Into<String>) -> Self {
        SchemaDescriptor {
            kind: SchemaKind::Dtd,
            location: Some(location.into()),
            ..SchemaDescriptor::none(name)
        }
    }

    /// An entry validated by the RELAX-NG grammar at `location`.
    pub fn relaxng(name: impl Into<String>, location: impl Into<String>) -> Self {
        SchemaDescriptor {
            kind: SchemaKind::RelaxNg,
            location: Some(location.into()),
            ..SchemaDescriptor::none(name)
        }
    }

    pub fn with_transform(mut self, transform: impl Into<String>) -> Self {
        self.transform = Some(transform.into());
        self
    }

    pub fn with_upgrade_target(mut self, target: impl Into<String>) -> Self {
        self.upgrade_target = Some(target.into());
        self
    }
}

/// The catalog of configuration formats shipped with the engine.
pub fn default_catalog() -> Vec<SchemaDescriptor> {
    vec![
        SchemaDescriptor::dtd("pacemaker-0.6", "crm.dtd")
            .with_transform("upgrade06.xml")
            .with_upgrade_target("pacemaker-1.0"),
        SchemaDescriptor::dtd("transitional-0.6", "crm-transitional.dtd")
            .with_transform("upgrade06.xml")
            .with_upgrade_target("pacemaker-1.0"),
        SchemaDescriptor::relaxng("pacemaker-0.7", "pacemaker-1.0.rng"),
        SchemaDescriptor::relaxng("pacemaker-1.0", "pacemaker-1.0.rng")
            .with_upgrade_target("pacemaker-1.2"),
        SchemaDescriptor::relaxng("pacemaker-1.1", "pacemaker-1.1.rng")
            .with_upgrade_target("pacemaker-1.2"),
        SchemaDescriptor::relaxng("pacemaker-1.2", "pacemaker-1.2.rng"),
        SchemaDescriptor::none(SCHEMA_NONE),
    ]
}

/// Schema directory from the environment, or the bundled one.
pub fn default_schema_dir() -> PathBuf {
    std::env::var_os(SCHEMA_DIR_ENV)
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/schemas")))
}

/// Position of a version in a registry's catalog. Later versions compare
/// greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaId(usize);

impl SchemaId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of [`SchemaRegistry::upgrade`].
#[derive(Debug, Clone)]
pub struct UpgradeOutcome {
    /// The document, transformed as far as the walk got.
    pub document: Element,
    /// Highest version the document validates against, if any.
    pub achieved: Option<SchemaId>,
    /// False when a transform failed or produced an invalid document.
    pub ok: bool,
    /// The minimum the caller asked for.
    pub minimum: Option<SchemaId>,
}

impl UpgradeOutcome {
    /// Returns true if the achieved version is at least the minimum.
    pub fn reached_minimum(&self) -> bool {
        self.minimum
            .is_none_or(|min| self.achieved.is_some_and(|achieved| achieved >= min))
    }
}

/// Classification produced by [`SchemaRegistry::config_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigStatus {
    /// Already at or above the minimum; nothing changed.
    Current,
    /// Upgraded to the latest version.
    UpgradedToLatest,
    /// Upgraded past the minimum but not to the latest version.
    UpgradedNotLatest,
    /// Could not be upgraded to the minimum. The document is unchanged.
    BelowMinimum,
    /// Declares a version past the latest, such as `none`.
    ValidationDisabled,
}

/// Result of [`SchemaRegistry::config_update`].
#[derive(Debug, Clone)]
pub struct ConfigUpdate {
    pub document: Element,
    pub version: Option<SchemaId>,
    pub status: ConfigStatus,
}

impl ConfigUpdate {
    /// Returns false if the configuration must be rejected.
    pub fn is_acceptable(&self) -> bool {
        self.status != ConfigStatus::BelowMinimum
    }
}

#[derive(Debug)]
struct SchemaEntry {
    descriptor: SchemaDescriptor,
    target: Option<usize>,
    grammar: RwLock<Option<Arc<Grammar>>>,
}

/// Catalog of schema versions plus the machinery to validate and upgrade
/// documents against it.
#[derive(Debug)]
pub struct SchemaRegistry {
    entries: Vec<SchemaEntry>,
    latest: usize,
    schema_dir: PathBuf,
    transformer: Box<dyn Transformer>,
}

impl SchemaRegistry {
    /// Builds a registry over `catalog`, loading resources from `schema_dir`.
    ///
    /// # Errors
    /// [`Error::InvalidCatalog`] if names repeat, a grammar location is
    /// missing, a validating entry follows a `none` entry, or an upgrade
    /// target does not name a later validating entry.
    pub fn new(catalog: Vec<SchemaDescriptor>, schema_dir: impl Into<PathBuf>) -> Result<Self> {
        let latest = catalog
            .iter()
            .rposition(|d| d.kind != SchemaKind::None)
            .ok_or_else(|| Error::InvalidCatalog("no validating schema in the catalog".into()))?;

        for (i, d) in catalog.iter().enumerate() {
            if catalog[..i].iter().any(|other| other.name == d.name) {
                return Err(Error::InvalidCatalog(format!("{} is listed twice", d.name)));
            }
            match d.kind {
                SchemaKind::None if i < latest => {
                    return Err(Error::InvalidCatalog(format!(
                        "{} disables validation but is followed by validating schemas",
                        d.name
                    )));
                }
                SchemaKind::Dtd | SchemaKind::RelaxNg if d.location.is_none() => {
                    return Err(Error::InvalidCatalog(format!("{} has no grammar", d.name)));
                }
                _ => {}
            }
        }

        let mut entries = Vec::with_capacity(catalog.len());
        for (i, descriptor) in catalog.iter().enumerate() {
            let target = match &descriptor.upgrade_target {
                Some(name) => {
                    let target = catalog
                        .iter()
                        .position(|d| &d.name == name)
                        .filter(|&t| t > i && t <= latest)
                        .ok_or_else(|| {
                            Error::InvalidCatalog(format!(
                                "{} upgrades to {}, which is not a later schema",
                                descriptor.name, name
                            ))
                        })?;
                    Some(target)
                }
                None if i < latest => Some(i + 1),
                None => None,
            };
            entries.push(SchemaEntry {
                descriptor: descriptor.clone(),
                target,
                grammar: RwLock::new(None),
            });
        }

        let schema_dir = schema_dir.into();
        debug!(
            schemas = entries.len(),
            dir = %schema_dir.display(),
            "schema registry ready"
        );
        Ok(SchemaRegistry {
            entries,
            latest,
            schema_dir,
            transformer: Box::new(RuleTransform),
        })
    }

    /// The default catalog over `schema_dir`.
    pub fn with_defaults(schema_dir: impl Into<PathBuf>) -> Result<Self> {
        SchemaRegistry::new(default_catalog(), schema_dir)
    }

    /// The default catalog over [`default_schema_dir`].
    pub fn from_env() -> Result<Self> {
        SchemaRegistry::with_defaults(default_schema_dir())
    }

    /// Replaces the transform implementation.
    pub fn with_transformer(mut self, transformer: impl Transformer + 'static) -> Self {
        self.transformer = Box::new(transformer);
        self
    }

    pub fn schema_dir(&self) -> &Path {
        &self.schema_dir
    }

    /// Finds a version by name.
    pub fn lookup(&self, name: &str) -> Option<SchemaId> {
        self.entries
            .iter()
            .position(|e| e.descriptor.name == name)
            .map(SchemaId)
    }

    /// Name of a version, or `unknown` for an id from another registry.
    pub fn schema_name(&self, id: SchemaId) -> &str {
        self.entries
            .get(id.0)
            .map(|e| e.descriptor.name.as_str())
            .unwrap_or("unknown")
    }

    pub fn descriptor(&self, id: SchemaId) -> Option<&SchemaDescriptor> {
        self.entries.get(id.0).map(|e| &e.descriptor)
    }

    /// The newest version that performs validation.
    pub fn latest(&self) -> SchemaId {
        SchemaId(self.latest)
    }

    /// Iterates over the catalog in order.
    pub fn schemas(&self) -> impl Iterator<Item = (SchemaId, &SchemaDescriptor)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (SchemaId(i), &e.descriptor))
    }

    /// Drops every compiled grammar.
    pub fn clear_caches(&self) {
        for entry in &self.entries {
            let mut slot = entry.grammar.write().unwrap_or_else(PoisonError::into_inner);
            if slot.take().is_some() {
                trace!(schema = %entry.descriptor.name, "dropped cached grammar");
            }
        }
    }

    /// Validates `doc` against one version.
    ///
    /// # Errors
    /// [`Error::SchemaLoad`] if the grammar cannot be read, and
    /// [`Error::UnknownSchemaVersion`] for an id from another registry.
    pub fn validate(&self, doc: &Element, id: SchemaId) -> Result<bool> {
        self.validate_logged(doc, id, false)
    }

    /// Validates `doc` against the version it declares.
    ///
    /// `validation` overrides the declaration. Undeclared documents are
    /// checked against the minimum supported version, unless they carry the
    /// legacy `ignore-dtd` opt-out.
    pub fn validate_document(&self, doc: &Element, validation: Option<&str>) -> Result<bool> {
        let id = self.resolve_version(doc, validation)?;
        self.validate_logged(doc, id, false)
    }

    /// Like [`validate_document`](Self::validate_document), but reports a
    /// rejection at error level along with the numbered document.
    pub fn validate_verbose(&self, doc: &Element) -> Result<bool> {
        let id = self.resolve_version(doc, None)?;
        let valid = self.validate_logged(doc, id, true)?;
        if !valid {
            for (n, line) in dump_formatted(doc).lines().enumerate() {
                error!("{:4}: {}", n + 1, line);
            }
        }
        Ok(valid)
    }

    fn resolve_version(&self, doc: &Element, validation: Option<&str>) -> Result<SchemaId> {
        let name = match validation.or_else(|| doc.attr(ATTR_VALIDATION)) {
            Some(name) => name,
            None if doc.attr(ATTR_IGNORE_DTD).is_some_and(is_true) => SCHEMA_NONE,
            None => MINIMUM_SCHEMA_VERSION,
        };
        self.lookup(name).ok_or_else(|| {
            error!(version = name, "unknown schema version");
            Error::UnknownSchemaVersion(name.to_string())
        })
    }

    fn validate_logged(&self, doc: &Element, id: SchemaId, to_logs: bool) -> Result<bool> {
        let entry = self
            .entries
            .get(id.0)
            .ok_or_else(|| Error::UnknownSchemaVersion(id.to_string()))?;
        let name = entry.descriptor.name.as_str();

        let verdict = match (entry.descriptor.kind, entry.descriptor.location.as_deref()) {
            (SchemaKind::None, _) | (_, None) => Ok(()),
            (SchemaKind::Dtd, Some(location)) => {
                let path = self.schema_dir.join(location);
                trace!(schema = name, path = %path.display(), "validating with DTD");
                dtd::load(&path)?.validate(doc)
            }
            (SchemaKind::RelaxNg, Some(location)) => {
                trace!(schema = name, "validating with RELAX-NG");
                self.relaxng(entry, location)?.validate(doc)
            }
        };

        match verdict {
            Ok(()) => Ok(true),
            Err(reason) if to_logs => {
                error!(schema = name, %reason, "document does not validate");
                Ok(false)
            }
            Err(reason) => {
                debug!(schema = name, %reason, "document does not validate");
                Ok(false)
            }
        }
    }

    fn relaxng(&self, entry: &SchemaEntry, location: &str) -> Result<Arc<Grammar>> {
        if let Some(grammar) = entry
            .grammar
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Ok(Arc::clone(grammar));
        }

        let mut slot = entry.grammar.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have compiled it while we waited
        if let Some(grammar) = slot.as_ref() {
            return Ok(Arc::clone(grammar));
        }
        let path = self.schema_dir.join(location);
        debug!(schema = %entry.descriptor.name, path = %path.display(), "compiling RELAX-NG grammar");
        let grammar = Arc::new(relaxng::load(&path)?);
        *slot = Some(Arc::clone(&grammar));
        Ok(grammar)
    }

    /// Validation for the upgrade walk, where a grammar that cannot be
    /// loaded just means the version is out of reach.
    fn is_valid(&self, doc: &Element, index: usize) -> bool {
        match self.validate(doc, SchemaId(index)) {
            Ok(valid) => valid,
            Err(e) => {
                error!(schema = %self.schema_name(SchemaId(index)), error = %e, "cannot validate");
                false
            }
        }
    }

    /// Walks the catalog upward from the version `doc` declares.
    ///
    /// Every version the document validates against is recorded as
    /// achieved. With `transform`, each version's transform (or, without
    /// one, a direct check) is used to jump to its upgrade target, but only
    /// when the result validates there. A failing transform stops the walk
    /// with `ok` false; the achieved version never drops below the declared
    /// one.
    pub fn upgrade(
        &self,
        doc: &Element,
        minimum: Option<SchemaId>,
        transform: bool,
    ) -> UpgradeOutcome {
        let declared_name = doc.attr(ATTR_VALIDATION);
        let declared = declared_name.and_then(|name| self.lookup(name));
        if let (Some(name), None) = (declared_name, declared) {
            warn!(version = name, "unknown schema version, starting from the oldest");
        }

        let mut outcome = UpgradeOutcome {
            document: doc.clone(),
            achieved: declared,
            ok: true,
            minimum,
        };
        if declared.is_some_and(|d| d.0 >= self.latest) {
            trace!(version = ?declared_name, "nothing to upgrade");
            return outcome;
        }

        let mut index = match declared {
            Some(d) if transform => d.0,
            Some(d) => d.0 + 1,
            None => 0,
        };
        let mut known_valid = false;

        while index <= self.latest {
            let entry = &self.entries[index];
            let name = entry.descriptor.name.as_str();
            if !known_valid && !self.is_valid(&outcome.document, index) {
                debug!(schema = name, "configuration does not validate");
                index += 1;
                continue;
            }
            known_valid = false;
            debug!(schema = name, "configuration validates");
            outcome.achieved = Some(SchemaId(index));

            let next = match entry.target {
                Some(next) if transform => next,
                _ => {
                    index += 1;
                    continue;
                }
            };
            let next_name = self.entries[next].descriptor.name.as_str();

            match &entry.descriptor.transform {
                None => {
                    if self.is_valid(&outcome.document, next) {
                        debug!(from = name, to = next_name, "upgrading without a transform");
                        index = next;
                        known_valid = true;
                    } else {
                        trace!(from = name, to = next_name, "upgrade target does not validate");
                        index += 1;
                    }
                }
                Some(resource) => {
                    let path = self.schema_dir.join(resource);
                    info!(from = name, to = next_name, transform = %resource, "transforming configuration");
                    match self.transformer.transform(&outcome.document, &path) {
                        Ok(upgraded) if self.is_valid(&upgraded, next) => {
                            outcome.document = upgraded;
                            index = next;
                            known_valid = true;
                        }
                        Ok(_) => {
                            error!(from = name, to = next_name, "transform did not produce a valid configuration");
                            outcome.ok = false;
                            break;
                        }
                        Err(e) => {
                            error!(from = name, to = next_name, error = %e, "transform failed");
                            outcome.ok = false;
                            break;
                        }
                    }
                }
            }
        }

        if let Some(best) = outcome.achieved {
            if declared.is_none_or(|d| best > d) {
                let best_name = self.schema_name(best).to_string();
                info!(from = ?declared_name, to = %best_name, "configuration upgraded");
                outcome.document.set_attr(ATTR_VALIDATION, best_name);
            }
        }
        outcome
    }

    /// Upgrades a copy of `doc` if it declares a version below `minimum`,
    /// and classifies the result.
    pub fn config_update(&self, doc: &Element, minimum: SchemaId, latest: SchemaId) -> ConfigUpdate {
        let version = doc.attr(ATTR_VALIDATION).and_then(|name| self.lookup(name));

        if version.is_none_or(|v| v < minimum) {
            let outcome = self.upgrade(doc, Some(minimum), true);
            let achieved = outcome.achieved;
            let achieved_name = achieved.map_or("none", |a| self.schema_name(a));
            let min_name = self.schema_name(minimum);

            if !outcome.reached_minimum() {
                error!(
                    achieved = achieved_name,
                    minimum = min_name,
                    "configuration could not be upgraded to the minimum supported version"
                );
                return ConfigUpdate {
                    document: doc.clone(),
                    version: achieved,
                    status: ConfigStatus::BelowMinimum,
                };
            }

            let status = if achieved.is_some_and(|a| a < latest) {
                warn!(
                    version = achieved_name,
                    "configuration was upgraded to an acceptable but not the most recent version"
                );
                ConfigStatus::UpgradedNotLatest
            } else {
                info!(version = achieved_name, "configuration was upgraded to the latest version");
                ConfigStatus::UpgradedToLatest
            };
            return ConfigUpdate {
                document: outcome.document,
                version: achieved,
                status,
            };
        }

        if version.is_some_and(|v| v > latest) {
            warn!("configuration validation is currently disabled");
            return ConfigUpdate {
                document: doc.clone(),
                version,
                status: ConfigStatus::ValidationDisabled,
            };
        }

        ConfigUpdate {
            document: doc.clone(),
            version,
            status: ConfigStatus::Current,
        }
    }
}

fn is_true(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "on" | "yes" | "y" | "1"
    )
}
