//! External DTD loader.
//!
//! Understands element and attribute-list declarations, parameter entities
//! and comments, which is all the legacy configuration grammars use. The
//! declarations are compiled into the same pattern form as RELAX-NG
//! grammars; every declared element is accepted as the document root.

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use super::pattern::{
    choice, empty, group, not_allowed, one_or_more, optional, text, zero_or_more, Datatype,
    Grammar, NameClass, Pattern,
};
use crate::error::{Error, Result};

/// Parameter entities may refer to each other, but not this deep.
const MAX_ENTITY_DEPTH: usize = 16;

/// Loads and compiles the DTD at `path`.
pub(crate) fn load(path: &Path) -> Result<Grammar> {
    let text = std::fs::read_to_string(path).map_err(|e| load_error(path, e))?;
    load_str(&text, path)
}

/// Compiles DTD text. `path` is only used in error reports.
pub(crate) fn load_str(text: &str, path: &Path) -> Result<Grammar> {
    let mut parser = DtdParser {
        path,
        entities: FxHashMap::default(),
        elements: IndexMap::new(),
        attlists: IndexMap::new(),
    };
    parser.declarations(text, 0)?;
    trace!(
        elements = parser.elements.len(),
        attlists = parser.attlists.len(),
        "parsed DTD"
    );
    Ok(parser.compile())
}

fn load_error(path: &Path, reason: impl ToString) -> Error {
    Error::SchemaLoad {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Occur {
    Once,
    Optional,
    ZeroOrMore,
    OneOrMore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Particle {
    Name(String, Occur),
    Seq(Vec<Particle>, Occur),
    Choice(Vec<Particle>, Occur),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ContentModel {
    Empty,
    Any,
    /// `#PCDATA` optionally mixed with the named elements.
    Mixed(Vec<String>),
    Children(Particle),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AttType {
    Cdata,
    Id,
    IdRef,
    IdRefs,
    NmToken,
    NmTokens,
    Enumeration(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AttDefault {
    Required,
    Implied,
    Fixed(String),
    Value(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttDef {
    name: String,
    kind: AttType,
    default: AttDefault,
}

struct DtdParser<'a> {
    path: &'a Path,
    entities: FxHashMap<String, String>,
    elements: IndexMap<String, ContentModel>,
    attlists: IndexMap<String, Vec<AttDef>>,
}

impl DtdParser<'_> {
    fn error(&self, reason: impl ToString) -> Error {
        load_error(self.path, reason)
    }

    fn declarations(&mut self, text: &str, depth: usize) -> Result<()> {
        if depth > MAX_ENTITY_DEPTH {
            return Err(self.error("parameter entities nest too deeply"));
        }
        let mut rest = text;
        loop {
            rest = rest.trim_start();
            if rest.is_empty() {
                return Ok(());
            }
            if let Some(r) = rest.strip_prefix("<!--") {
                let end = r.find("-->").ok_or_else(|| self.error("unterminated comment"))?;
                rest = &r[end + 3..];
            } else if let Some(r) = rest.strip_prefix("<?") {
                let end = r
                    .find("?>")
                    .ok_or_else(|| self.error("unterminated processing instruction"))?;
                rest = &r[end + 2..];
            } else if let Some(r) = rest.strip_prefix('%') {
                let end = r.find(';').ok_or_else(|| self.error("unterminated entity reference"))?;
                let value = self.entity(&r[..end])?;
                self.declarations(&value, depth + 1)?;
                rest = &r[end + 1..];
            } else if let Some(r) = rest.strip_prefix("<!") {
                let end = declaration_end(r).ok_or_else(|| self.error("unterminated declaration"))?;
                self.declaration(&r[..end])?;
                rest = &r[end + 1..];
            } else {
                let snippet: String = rest.chars().take(20).collect();
                return Err(self.error(format!("unexpected content: {snippet}")));
            }
        }
    }

    fn entity(&self, name: &str) -> Result<String> {
        self.entities
            .get(name)
            .cloned()
            .ok_or_else(|| self.error(format!("undefined parameter entity %{name};")))
    }

    /// Replaces parameter entity references in `text`.
    fn expand(&self, text: &str, depth: usize) -> Result<String> {
        if !text.contains('%') {
            return Ok(text.to_string());
        }
        if depth > MAX_ENTITY_DEPTH {
            return Err(self.error("parameter entities nest too deeply"));
        }
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find('%') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            match after.find(';') {
                Some(end) if is_name(&after[..end]) => {
                    let value = self.entity(&after[..end])?;
                    out.push_str(&self.expand(&value, depth + 1)?);
                    rest = &after[end + 1..];
                }
                _ => {
                    out.push('%');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        Ok(out)
    }

    fn declaration(&mut self, body: &str) -> Result<()> {
        if let Some(r) = body.strip_prefix("ENTITY") {
            return self.entity_declaration(r);
        }
        let body = self.expand(body, 0)?;
        if let Some(r) = body.strip_prefix("ELEMENT") {
            self.element_declaration(r)
        } else if let Some(r) = body.strip_prefix("ATTLIST") {
            self.attlist_declaration(r)
        } else {
            debug!(declaration = %body.chars().take(20).collect::<String>(), "ignoring DTD declaration");
            Ok(())
        }
    }

    fn entity_declaration(&mut self, body: &str) -> Result<()> {
        let Some(body) = body.trim_start().strip_prefix('%') else {
            // General entities never appear in configuration documents
            return Ok(());
        };
        let body = body.trim_start();
        let name_end = body
            .find(char::is_whitespace)
            .ok_or_else(|| self.error("malformed entity declaration"))?;
        let name = &body[..name_end];
        let value_part = body[name_end..].trim();
        let Some((value, _)) = quoted(value_part) else {
            debug!(entity = name, "ignoring external parameter entity");
            return Ok(());
        };
        let value = self.expand(value, 0)?;
        // First declaration wins
        self.entities.entry(name.to_string()).or_insert(value);
        Ok(())
    }

    fn element_declaration(&mut self, body: &str) -> Result<()> {
        let body = body.trim();
        let name_end = body
            .find(|c: char| c.is_whitespace() || c == '(')
            .ok_or_else(|| self.error("malformed element declaration"))?;
        let name = body[..name_end].to_string();
        let model = self.content_model(body[name_end..].trim())?;
        if self.elements.contains_key(&name) {
            return Err(self.error(format!("element {name} declared twice")));
        }
        self.elements.insert(name, model);
        Ok(())
    }

    fn content_model(&self, text: &str) -> Result<ContentModel> {
        match text {
            "EMPTY" => return Ok(ContentModel::Empty),
            "ANY" => return Ok(ContentModel::Any),
            _ => {}
        }
        let tokens = model_tokens(text);
        if tokens.get(1).map(String::as_str) == Some("#PCDATA") {
            let names = tokens
                .iter()
                .filter(|t| is_name(t))
                .cloned()
                .collect();
            return Ok(ContentModel::Mixed(names));
        }
        let mut cursor = ModelCursor { tokens: &tokens, pos: 0 };
        let particle = cursor
            .particle()
            .ok_or_else(|| self.error(format!("cannot parse content model {text}")))?;
        if cursor.pos != tokens.len() {
            return Err(self.error(format!("trailing content in model {text}")));
        }
        Ok(ContentModel::Children(particle))
    }

    fn attlist_declaration(&mut self, body: &str) -> Result<()> {
        let mut tokens = attlist_tokens(body).into_iter();
        let Some(AttToken::Word(element)) = tokens.next() else {
            return Err(self.error("attribute list without an element"));
        };
        let mut defs = Vec::new();
        while let Some(token) = tokens.next() {
            let AttToken::Word(name) = token else {
                return Err(self.error(format!("malformed attribute list for {element}")));
            };
            let kind = match tokens.next() {
                Some(AttToken::Word(word)) => match word.as_str() {
                    "CDATA" => AttType::Cdata,
                    "ID" => AttType::Id,
                    "IDREF" => AttType::IdRef,
                    "IDREFS" => AttType::IdRefs,
                    "NMTOKEN" | "ENTITY" => AttType::NmToken,
                    "NMTOKENS" | "ENTITIES" => AttType::NmTokens,
                    "NOTATION" => match tokens.next() {
                        Some(AttToken::Group(values)) => AttType::Enumeration(values),
                        _ => return Err(self.error(format!("malformed NOTATION for {name}"))),
                    },
                    other => return Err(self.error(format!("unknown attribute type {other}"))),
                },
                Some(AttToken::Group(values)) => AttType::Enumeration(values),
                _ => return Err(self.error(format!("missing type for attribute {name}"))),
            };
            let default = match tokens.next() {
                Some(AttToken::Word(word)) => match word.as_str() {
                    "#REQUIRED" => AttDefault::Required,
                    "#IMPLIED" => AttDefault::Implied,
                    "#FIXED" => match tokens.next() {
                        Some(AttToken::Quoted(value)) => AttDefault::Fixed(value),
                        _ => return Err(self.error(format!("#FIXED without value for {name}"))),
                    },
                    other => return Err(self.error(format!("unknown default {other}"))),
                },
                Some(AttToken::Quoted(value)) => AttDefault::Value(value),
                _ => return Err(self.error(format!("missing default for attribute {name}"))),
            };
            defs.push(AttDef {
                name,
                kind,
                default,
            });
        }

        let list = self.attlists.entry(element).or_default();
        for def in defs {
            if !list.iter().any(|d| d.name == def.name) {
                list.push(def);
            }
        }
        Ok(())
    }

    fn compile(self) -> Grammar {
        let slots: FxHashMap<&str, usize> = self
            .elements
            .keys()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();
        let reference = |name: &str| match slots.get(name) {
            Some(&slot) => Arc::new(Pattern::Ref(slot)),
            None => {
                debug!(element = name, "content refers to an undeclared element");
                not_allowed()
            }
        };

        let mut defines = Vec::with_capacity(self.elements.len());
        for (name, model) in &self.elements {
            let content = match model {
                ContentModel::Empty => empty(),
                ContentModel::Any => {
                    let any = self
                        .elements
                        .keys()
                        .fold(text(), |acc, n| choice(acc, reference(n)));
                    zero_or_more(any)
                }
                ContentModel::Mixed(names) if names.is_empty() => text(),
                ContentModel::Mixed(names) => {
                    zero_or_more(names.iter().fold(text(), |acc, n| choice(acc, reference(n))))
                }
                ContentModel::Children(particle) => particle_pattern(particle, &reference),
            };
            let attributes = self
                .attlists
                .get(name)
                .map(|defs| {
                    defs.iter()
                        .fold(empty(), |acc, def| group(acc, attribute_pattern(def)))
                })
                .unwrap_or_else(empty);
            defines.push(Arc::new(Pattern::Element(
                NameClass::name(name.as_str()),
                group(attributes, content),
            )));
        }

        let start = (0..defines.len()).fold(not_allowed(), |acc, slot| {
            choice(acc, Arc::new(Pattern::Ref(slot)))
        });
        Grammar::new(start, defines)
    }
}

fn attribute_pattern(def: &AttDef) -> Arc<Pattern> {
    let value = match (&def.default, &def.kind) {
        (AttDefault::Fixed(v), AttType::Cdata) => Arc::new(Pattern::Value(Datatype::String, v.clone())),
        (AttDefault::Fixed(v), _) => Arc::new(Pattern::Value(Datatype::Token, v.clone())),
        (_, AttType::Cdata) => text(),
        (_, AttType::Id) => Arc::new(Pattern::Data(Datatype::Id, None)),
        (_, AttType::IdRef) => Arc::new(Pattern::Data(Datatype::IdRef, None)),
        (_, AttType::IdRefs) => Arc::new(Pattern::Data(Datatype::IdRefs, None)),
        (_, AttType::NmToken) => Arc::new(Pattern::Data(Datatype::NmToken, None)),
        (_, AttType::NmTokens) => Arc::new(Pattern::Data(Datatype::NmTokens, None)),
        (_, AttType::Enumeration(values)) => values.iter().fold(not_allowed(), |acc, v| {
            choice(acc, Arc::new(Pattern::Value(Datatype::Token, v.clone())))
        }),
    };
    let attribute = Arc::new(Pattern::Attribute(NameClass::name(def.name.as_str()), value));
    match def.default {
        AttDefault::Required => attribute,
        _ => optional(attribute),
    }
}

fn particle_pattern(particle: &Particle, reference: &dyn Fn(&str) -> Arc<Pattern>) -> Arc<Pattern> {
    let (base, occur) = match particle {
        Particle::Name(name, occur) => (reference(name), *occur),
        Particle::Seq(items, occur) => (
            items
                .iter()
                .fold(empty(), |acc, p| group(acc, particle_pattern(p, reference))),
            *occur,
        ),
        Particle::Choice(items, occur) => (
            items
                .iter()
                .fold(not_allowed(), |acc, p| choice(acc, particle_pattern(p, reference))),
            *occur,
        ),
    };
    match occur {
        Occur::Once => base,
        Occur::Optional => optional(base),
        Occur::ZeroOrMore => zero_or_more(base),
        Occur::OneOrMore => one_or_more(base),
    }
}

/// Index of the `>` closing a declaration, skipping quoted text.
fn declaration_end(text: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in text.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '>') => return Some(i),
            (None, _) => {}
        }
    }
    None
}

/// Splits a leading quoted string off `text`.
fn quoted(text: &str) -> Option<(&str, &str)> {
    let quote = text.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let inner = &text[1..];
    let end = inner.find(quote)?;
    Some((&inner[..end], &inner[end + 1..]))
}

fn is_name(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
}

fn model_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    for c in text.chars() {
        if c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | '#') {
            word.push(c);
            continue;
        }
        if !word.is_empty() {
            tokens.push(std::mem::take(&mut word));
        }
        if !c.is_whitespace() {
            tokens.push(c.to_string());
        }
    }
    if !word.is_empty() {
        tokens.push(word);
    }
    tokens
}

struct ModelCursor<'t> {
    tokens: &'t [String],
    pos: usize,
}

impl<'t> ModelCursor<'t> {
    fn peek(&self) -> Option<&'t str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn next(&mut self) -> Option<&'t str> {
        let token = self.tokens.get(self.pos).map(String::as_str);
        self.pos += 1;
        token
    }

    fn occur(&mut self) -> Occur {
        let occur = match self.peek() {
            Some("?") => Occur::Optional,
            Some("*") => Occur::ZeroOrMore,
            Some("+") => Occur::OneOrMore,
            _ => return Occur::Once,
        };
        self.pos += 1;
        occur
    }

    fn particle(&mut self) -> Option<Particle> {
        match self.next()? {
            "(" => {
                let mut items = vec![self.particle()?];
                let mut separator: Option<String> = None;
                loop {
                    match self.next()? {
                        ")" => break,
                        sep @ ("," | "|") => {
                            if separator.as_deref().is_some_and(|s| s != sep) {
                                return None;
                            }
                            separator = Some(sep.to_string());
                            items.push(self.particle()?);
                        }
                        _ => return None,
                    }
                }
                let occur = self.occur();
                Some(match separator.as_deref() {
                    Some("|") => Particle::Choice(items, occur),
                    _ => Particle::Seq(items, occur),
                })
            }
            name if is_name(name) => Some(Particle::Name(name.to_string(), self.occur())),
            _ => None,
        }
    }
}

enum AttToken {
    Word(String),
    Quoted(String),
    Group(Vec<String>),
}

fn attlist_tokens(text: &str) -> Vec<AttToken> {
    let mut tokens = Vec::new();
    let mut rest = text.trim_start();
    while !rest.is_empty() {
        if let Some(r) = rest.strip_prefix('(') {
            let end = r.find(')').unwrap_or(r.len());
            let values = r[..end]
                .split('|')
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
            tokens.push(AttToken::Group(values));
            rest = r.get(end + 1..).unwrap_or("");
        } else if let Some((value, r)) = quoted(rest) {
            tokens.push(AttToken::Quoted(value.to_string()));
            rest = r;
        } else {
            let end = rest
                .find(|c: char| c.is_whitespace() || c == '(')
                .unwrap_or(rest.len());
            tokens.push(AttToken::Word(rest[..end].to_string()));
            rest = &rest[end..];
        }
        rest = rest.trim_start();
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse_str;

    const DTD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!-- test grammar -->
<!ENTITY % epochs "admin_epoch CDATA #REQUIRED epoch CDATA #REQUIRED">
<!ENTITY % boolean "(true|false)">
<!ELEMENT cib (configuration, status)>
<!ATTLIST cib
          %epochs;
          have_quorum %boolean; 'false'
          ignore_dtd %boolean; #IMPLIED
          generated CDATA #FIXED "true">
<!ELEMENT configuration (nodes, resources?)>
<!ELEMENT nodes (node*)>
<!ELEMENT node EMPTY>
<!ATTLIST node id ID #REQUIRED type (normal|member|ping) 'normal'>
<!ELEMENT resources (primitive | group)+>
<!ELEMENT primitive EMPTY>
<!ATTLIST primitive id ID #REQUIRED description CDATA #IMPLIED>
<!ELEMENT group (primitive+)>
<!ATTLIST group id ID #REQUIRED>
<!ELEMENT status ANY>
<!ELEMENT lrm (#PCDATA | node)*>
"#;

    fn check(xml: &str) -> std::result::Result<(), String> {
        let g = load_str(DTD, Path::new("test.dtd")).unwrap();
        g.validate(&parse_str(xml).unwrap())
    }

    #[test]
    fn test_valid_document() {
        let xml = r#"<cib admin_epoch="0" epoch="1" have_quorum="true">
            <configuration>
              <nodes><node id="n1"/><node id="n2" type="ping"/></nodes>
              <resources><group id="g"><primitive id="p1"/></group><primitive id="p2" description="> x"/></resources>
            </configuration>
            <status><nodes/><lrm><node id="n3"/></lrm></status>
          </cib>"#;
        assert_eq!(check(xml), Ok(()));
    }

    #[test]
    fn test_sequence_and_occurrence() {
        assert!(check(r#"<cib admin_epoch="0" epoch="1"><configuration><nodes/></configuration><status/></cib>"#).is_ok());
        assert!(check(r#"<cib admin_epoch="0" epoch="1"><status/><configuration><nodes/></configuration></cib>"#).is_err());
        assert!(check(r#"<cib admin_epoch="0" epoch="1"><configuration><nodes/><resources/></configuration><status/></cib>"#).is_err());
    }

    #[test]
    fn test_attribute_rules() {
        let body = "<configuration><nodes/></configuration><status/>";
        assert!(check(&format!(r#"<cib epoch="1">{body}</cib>"#)).is_err());
        assert!(check(&format!(r#"<cib admin_epoch="0" epoch="1" have_quorum="yes">{body}</cib>"#)).is_err());
        assert!(check(&format!(r#"<cib admin_epoch="0" epoch="1" generated="false">{body}</cib>"#)).is_err());
        assert!(check(&format!(r#"<cib admin_epoch="0" epoch="1" generated="true">{body}</cib>"#)).is_ok());
        assert!(check(&format!(r#"<cib admin_epoch="0" epoch="1" extra="1">{body}</cib>"#)).is_err());
    }

    #[test]
    fn test_any_element_is_a_root() {
        assert!(check(r#"<nodes><node id="a"/></nodes>"#).is_ok());
        assert!(check(r#"<unknown/>"#).is_err());
    }

    #[test]
    fn test_undefined_entity() {
        let err = load_str("<!ELEMENT a %missing;>", Path::new("bad.dtd"));
        assert!(matches!(err, Err(Error::SchemaLoad { .. })));
    }

    #[test]
    fn test_content_model_parsing() {
        let parser = DtdParser {
            path: Path::new("x.dtd"),
            entities: FxHashMap::default(),
            elements: IndexMap::new(),
            attlists: IndexMap::new(),
        };
        assert_eq!(
            parser.content_model("(a, (b | c)*, d?)+").unwrap(),
            ContentModel::Children(Particle::Seq(
                vec![
                    Particle::Name("a".into(), Occur::Once),
                    Particle::Choice(
                        vec![
                            Particle::Name("b".into(), Occur::Once),
                            Particle::Name("c".into(), Occur::Once),
                        ],
                        Occur::ZeroOrMore
                    ),
                    Particle::Name("d".into(), Occur::Optional),
                ],
                Occur::OneOrMore
            ))
        );
        assert_eq!(
            parser.content_model("(#PCDATA|a|b)*").unwrap(),
            ContentModel::Mixed(vec!["a".into(), "b".into()])
        );
        assert!(parser.content_model("(a, b | c)").is_err());
    }
}
