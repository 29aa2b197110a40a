//! Document transforms between schema versions.
//!
//! A transform resource is a rule document:
//!
//! ```xml
//! <transform name="upgrade06">
//!   <unwrap-element name="attributes"/>
//!   <rename-attribute element="cib" from="have_quorum" to="have-quorum"/>
//!   <remove-attribute element="cib" name="ignore_dtd"/>
//!   <set-attribute element="cib" name="validate-with" value="pacemaker-1.0"/>
//!   <rename-element from="master_slave" to="master"/>
//!   <remove-element name="obsolete"/>
//! </transform>
//! ```
//!
//! Rules run in document order, each over the whole tree. An `element`
//! selector of `*` (or none) matches every element. Attribute rules may
//! also require `when-attribute` to hold `when-value` on the element:
//!
//! ```xml
//! <rename-attribute element="rsc_order" when-attribute="type" when-value="before"
//!                   from="from" to="first"/>
//! ```

use std::fmt;
use std::path::Path;

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::node::Element;
use crate::xml::parse_file;

/// Turns a document valid for one schema version into a candidate for the
/// next.
pub trait Transformer: Send + Sync + fmt::Debug {
    /// Applies the transform stored at `resource` to a copy of `doc`.
    fn transform(&self, doc: &Element, resource: &Path) -> Result<Element>;
}

/// The default [`Transformer`]: reads the resource as a [`RuleSet`] on
/// every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleTransform;

impl Transformer for RuleTransform {
    fn transform(&self, doc: &Element, resource: &Path) -> Result<Element> {
        let rules = RuleSet::load(resource)?;
        rules.apply(doc)
    }
}

/// One rewrite step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    RenameElement {
        from: String,
        to: String,
    },
    RenameAttribute {
        select: Selector,
        from: String,
        to: String,
    },
    RemoveAttribute {
        select: Selector,
        name: String,
    },
    SetAttribute {
        select: Selector,
        name: String,
        value: String,
    },
    /// Deletes matching elements and everything below them.
    RemoveElement {
        name: String,
    },
    /// Replaces matching elements with their children.
    UnwrapElement {
        name: String,
    },
}

/// Which elements an attribute rule touches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    /// Tag name; `None` matches every element.
    pub element: Option<String>,
    /// Attribute name and the value it must have.
    pub when: Option<(String, String)>,
}

impl Selector {
    fn matches(&self, element: &Element) -> bool {
        self.element.as_deref().is_none_or(|tag| tag == element.name())
            && self
                .when
                .as_ref()
                .is_none_or(|(name, value)| element.attr(name) == Some(value.as_str()))
    }
}

/// An ordered list of rules loaded from a `<transform>` document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    name: String,
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Reads a rule document from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let doc = parse_file(path).map_err(|e| Error::TransformFailed {
            transform: name,
            reason: e.to_string(),
        })?;
        RuleSet::from_element(&doc)
    }

    /// Builds a rule set from a parsed `<transform>` element.
    pub fn from_element(doc: &Element) -> Result<Self> {
        let name = doc.attr("name").unwrap_or("transform").to_string();
        let failed = |reason: String| Error::TransformFailed {
            transform: name.clone(),
            reason,
        };
        if doc.name() != "transform" {
            return Err(failed(format!("expected <transform> but found <{}>", doc.name())));
        }

        let mut rules = Vec::with_capacity(doc.child_count());
        for rule in doc.children() {
            let required = |attr: &str| {
                rule.attr(attr)
                    .map(str::to_string)
                    .ok_or_else(|| failed(format!("<{}> requires a {} attribute", rule.name(), attr)))
            };
            let when = match (rule.attr("when-attribute"), rule.attr("when-value")) {
                (Some(name), Some(value)) => Some((name.to_string(), value.to_string())),
                (None, None) => None,
                _ => {
                    return Err(failed(format!(
                        "<{}> needs both when-attribute and when-value",
                        rule.name()
                    )))
                }
            };
            let select = Selector {
                element: rule
                    .attr("element")
                    .filter(|e| *e != "*")
                    .map(str::to_string),
                when,
            };
            rules.push(match rule.name() {
                "rename-element" => Rule::RenameElement {
                    from: required("from")?,
                    to: required("to")?,
                },
                "rename-attribute" => Rule::RenameAttribute {
                    select: select.clone(),
                    from: required("from")?,
                    to: required("to")?,
                },
                "remove-attribute" => Rule::RemoveAttribute {
                    select: select.clone(),
                    name: required("name")?,
                },
                "set-attribute" => Rule::SetAttribute {
                    select: select.clone(),
                    name: required("name")?,
                    value: required("value")?,
                },
                "remove-element" => Rule::RemoveElement {
                    name: required("name")?,
                },
                "unwrap-element" => Rule::UnwrapElement {
                    name: required("name")?,
                },
                other => return Err(failed(format!("unknown rule <{other}>"))),
            });
        }
        Ok(RuleSet { name, rules })
    }

    /// Name given by the rule document.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Applies every rule to a copy of `doc`.
    pub fn apply(&self, doc: &Element) -> Result<Element> {
        let mut out = doc.clone();
        for rule in &self.rules {
            trace!(transform = %self.name, ?rule, "applying rule");
            match rule {
                Rule::RemoveElement { name } | Rule::UnwrapElement { name }
                    if out.name() == name =>
                {
                    return Err(Error::TransformFailed {
                        transform: self.name.clone(),
                        reason: format!("cannot remove the root element <{name}>"),
                    });
                }
                _ => apply_rule(&mut out, rule),
            }
        }
        debug!(transform = %self.name, rules = self.rules.len(), "transform applied");
        Ok(out)
    }
}

fn apply_rule(element: &mut Element, rule: &Rule) {
    match rule {
        Rule::RenameElement { from, to } => {
            if element.name() == from {
                element.set_name(to.as_str());
            }
        }
        Rule::RenameAttribute { select, from, to } => {
            if select.matches(element) {
                if let Some(value) = element.remove_attr(from) {
                    element.set_attr(to.as_str(), value);
                }
            }
        }
        Rule::RemoveAttribute { select, name } => {
            if select.matches(element) {
                element.remove_attr(name);
            }
        }
        Rule::SetAttribute {
            select,
            name,
            value,
        } => {
            if select.matches(element) {
                element.set_attr(name.as_str(), value.as_str());
            }
        }
        Rule::RemoveElement { name } => {
            element.retain_children(|child| child.name() != name);
        }
        Rule::UnwrapElement { name } => {
            if element.children().iter().any(|c| c.name() == name) {
                for child in element.take_children() {
                    if child.name() == name {
                        let mut child = child;
                        for grandchild in child.take_children() {
                            element.add_child(grandchild);
                        }
                    } else {
                        element.add_child(child);
                    }
                }
            }
        }
    }

    for child in element.children_mut() {
        apply_rule(child, rule);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse_str;

    fn rules(xml: &str) -> RuleSet {
        RuleSet::from_element(&parse_str(xml).unwrap()).unwrap()
    }

    #[test]
    fn test_attribute_rules() {
        let set = rules(
            r#"<transform name="t">
                 <rename-attribute element="cib" from="have_quorum" to="have-quorum"/>
                 <remove-attribute element="*" name="generated"/>
                 <set-attribute element="cib" name="validate-with" value="pacemaker-1.0"/>
               </transform>"#,
        );
        let doc = parse_str(r#"<cib have_quorum="true" generated="1"><x generated="2" have_quorum="0"/></cib>"#).unwrap();
        let out = set.apply(&doc).unwrap();
        assert_eq!(out.attr("have-quorum"), Some("true"));
        assert!(!out.has_attr("have_quorum"));
        assert!(!out.has_attr("generated"));
        assert_eq!(out.attr("validate-with"), Some("pacemaker-1.0"));
        let x = &out.children()[0];
        assert!(!x.has_attr("generated"));
        assert_eq!(x.attr("have_quorum"), Some("0"));
        assert!(!x.has_attr("validate-with"));
    }

    #[test]
    fn test_element_rules() {
        let set = rules(
            r#"<transform name="t">
                 <unwrap-element name="attributes"/>
                 <rename-element from="master_slave" to="master"/>
                 <remove-element name="obsolete"/>
               </transform>"#,
        );
        let doc = parse_str(
            r#"<r><set id="s"><attributes><nvpair id="a"/><nvpair id="b"/></attributes><rule id="r"/></set><master_slave id="m"><obsolete/></master_slave></r>"#,
        )
        .unwrap();
        let out = set.apply(&doc).unwrap();
        let expected = parse_str(
            r#"<r><set id="s"><nvpair id="a"/><nvpair id="b"/><rule id="r"/></set><master id="m"/></r>"#,
        )
        .unwrap();
        assert_eq!(out, expected);
        // Input untouched
        assert_eq!(doc.children()[1].name(), "master_slave");
    }

    #[test]
    fn test_conditional_attribute_rules() {
        let set = rules(
            r#"<transform name="t">
                 <rename-attribute element="order" when-attribute="type" when-value="before" from="from" to="first"/>
                 <rename-attribute element="order" from="from" to="then"/>
                 <remove-attribute element="order" name="type"/>
               </transform>"#,
        );
        let doc = parse_str(
            r#"<c><order id="b" from="x" type="before"/><order id="a" from="y" type="after"/><order id="d" from="z"/></c>"#,
        )
        .unwrap();
        let out = set.apply(&doc).unwrap();
        let expected = parse_str(r#"<c><order id="b" first="x"/><order id="a" then="y"/><order id="d" then="z"/></c>"#)
            .unwrap();
        assert_eq!(out, expected);

        let half = parse_str(r#"<transform><remove-attribute name="a" when-attribute="b"/></transform>"#).unwrap();
        assert!(matches!(
            RuleSet::from_element(&half),
            Err(Error::TransformFailed { .. })
        ));
    }

    #[test]
    fn test_bundled_upgrade_keeps_order_direction() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("schemas/upgrade06.xml");
        let doc = parse_str(
            r#"<cib><configuration><constraints>
                 <rsc_order id="after" from="web" action="start" type="after" to="db" to_action="promote"/>
                 <rsc_order id="before" from="db" action="promote" type="before" to="web" to_action="start"/>
                 <rsc_order id="plain" from="web" to="db"/>
               </constraints></configuration></cib>"#,
        )
        .unwrap();
        let out = RuleTransform.transform(&doc, &path).unwrap();
        let expected = parse_str(
            r#"<cib validate-with="pacemaker-1.0"><configuration><constraints>
                 <rsc_order id="after" then="web" then-action="start" first="db" first-action="promote"/>
                 <rsc_order id="before" first="db" first-action="promote" then="web" then-action="start"/>
                 <rsc_order id="plain" then="web" first="db"/>
               </constraints></configuration></cib>"#,
        )
        .unwrap();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_root_cannot_be_removed() {
        let set = rules(r#"<transform name="t"><remove-element name="cib"/></transform>"#);
        let doc = parse_str("<cib/>").unwrap();
        assert!(matches!(set.apply(&doc), Err(Error::TransformFailed { .. })));
    }

    #[test]
    fn test_bad_rule_documents() {
        let unknown = parse_str(r#"<transform><xslt/></transform>"#).unwrap();
        assert!(matches!(
            RuleSet::from_element(&unknown),
            Err(Error::TransformFailed { .. })
        ));
        let incomplete = parse_str(r#"<transform><rename-element from="a"/></transform>"#).unwrap();
        assert!(RuleSet::from_element(&incomplete).is_err());
        let wrong_root = parse_str(r#"<stylesheet/>"#).unwrap();
        assert!(RuleSet::from_element(&wrong_root).is_err());
    }

    #[test]
    fn test_missing_resource() {
        let doc = parse_str("<cib/>").unwrap();
        let err = RuleTransform
            .transform(&doc, Path::new("/nonexistent/upgrade.xml"))
            .unwrap_err();
        assert!(matches!(err, Error::TransformFailed { .. }));
    }
}
