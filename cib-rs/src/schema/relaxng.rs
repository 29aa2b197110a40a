//! RELAX-NG grammar loader (XML syntax).
//!
//! Reads a grammar file, follows its `include` and `externalRef` links
//! relative to the including file, and compiles everything into a single
//! [`Grammar`]. Elements outside the RELAX-NG namespace (annotations) are
//! skipped.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use super::pattern::{
    choice, empty, group, interleave, not_allowed, one_or_more, optional, text,
    zero_or_more, Datatype, Grammar, NameClass, Pattern,
};
use crate::error::{Error, Result};

const RELAXNG_NS: &[u8] = b"http://relaxng.org/ns/structure/1.0";

/// Loads and compiles the grammar at `path`.
pub(crate) fn load(path: &Path) -> Result<Grammar> {
    let root = read_file(path)?;
    compile(&root, base_dir(path))
}

/// Compiles grammar text. Relative references resolve against `dir`.
pub(crate) fn load_str(text: &str, dir: &Path) -> Result<Grammar> {
    let root = parse(text, &dir.join("<inline>"))?;
    compile(&root, dir.to_path_buf())
}

fn compile(root: &RngNode, dir: PathBuf) -> Result<Grammar> {
    let mut compiler = Compiler::default();
    let top = Scope::default();
    let start = compiler.pattern(root, &dir, &top)?;
    debug!(
        defines = compiler.defines.len(),
        files = compiler.files,
        "compiled RELAX-NG grammar"
    );
    Ok(Grammar::new(start, compiler.defines))
}

fn base_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

fn load_error(path: &Path, reason: impl ToString) -> Error {
    Error::SchemaLoad {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// A RELAX-NG element as written in the grammar file.
#[derive(Debug, Clone, Default)]
struct RngNode {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<RngNode>,
    text: String,
}

impl RngNode {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn first_child(&self, name: &str) -> Option<&RngNode> {
        self.children.iter().find(|c| c.name == name)
    }
}

fn read_file(path: &Path) -> Result<RngNode> {
    let text = std::fs::read_to_string(path).map_err(|e| load_error(path, e))?;
    trace!(path = %path.display(), bytes = text.len(), "read grammar file");
    parse(&text, path)
}

fn is_relaxng(ns: &ResolveResult) -> bool {
    match ns {
        ResolveResult::Bound(Namespace(uri)) => *uri == RELAXNG_NS,
        ResolveResult::Unbound => true,
        ResolveResult::Unknown(_) => false,
    }
}

fn parse(text: &str, path: &Path) -> Result<RngNode> {
    let mut reader = NsReader::from_str(text);
    let mut stack: Vec<RngNode> = Vec::new();
    let mut root: Option<RngNode> = None;
    // Depth inside an annotation element we are skipping
    let mut foreign = 0usize;

    loop {
        match reader.read_resolved_event() {
            Ok((ns, Event::Start(e))) => {
                if foreign > 0 || !is_relaxng(&ns) {
                    foreign += 1;
                    continue;
                }
                stack.push(rng_node(&e, path)?);
            }
            Ok((ns, Event::Empty(e))) => {
                if foreign > 0 || !is_relaxng(&ns) {
                    continue;
                }
                let node = rng_node(&e, path)?;
                attach(&mut stack, &mut root, node);
            }
            Ok((_, Event::End(_))) => {
                if foreign > 0 {
                    foreign -= 1;
                    continue;
                }
                if let Some(node) = stack.pop() {
                    attach(&mut stack, &mut root, node);
                }
            }
            Ok((_, Event::Text(t))) => {
                if foreign > 0 {
                    continue;
                }
                if let Some(top) = stack.last_mut() {
                    let raw = std::str::from_utf8(t.as_ref()).map_err(|e| load_error(path, e))?;
                    let text = unescape(raw).map_err(|e| load_error(path, e))?;
                    top.text.push_str(&text);
                }
            }
            Ok((_, Event::GeneralRef(r))) => {
                if foreign > 0 {
                    continue;
                }
                if let Some(top) = stack.last_mut() {
                    let name = std::str::from_utf8(r.as_ref()).map_err(|e| load_error(path, e))?;
                    let c = resolve_entity(name)
                        .ok_or_else(|| load_error(path, format!("unknown entity &{name};")))?;
                    top.text.push(c);
                }
            }
            Ok((_, Event::CData(c))) => {
                if let (0, Some(top)) = (foreign, stack.last_mut()) {
                    top.text.push_str(&String::from_utf8_lossy(c.as_ref()));
                }
            }
            Ok((_, Event::Eof)) => break,
            Ok(_) => {}
            Err(e) => return Err(load_error(path, e)),
        }
    }

    root.ok_or_else(|| load_error(path, "no RELAX-NG content"))
}

fn rng_node(e: &BytesStart, path: &Path) -> Result<RngNode> {
    let name = std::str::from_utf8(e.local_name().as_ref())
        .map_err(|e| load_error(path, e))?
        .to_string();
    let mut node = RngNode {
        name,
        ..RngNode::default()
    };
    for attr in e.attributes() {
        let attr = attr.map_err(|e| load_error(path, e))?;
        let key = std::str::from_utf8(attr.key.as_ref()).map_err(|e| load_error(path, e))?;
        // Namespace declarations and foreign annotations
        if key.starts_with("xmlns") || key.contains(':') {
            continue;
        }
        let value = attr.unescape_value().map_err(|e| load_error(path, e))?;
        node.attrs.push((key.to_string(), value.trim().to_string()));
    }
    Ok(node)
}

fn attach(stack: &mut [RngNode], root: &mut Option<RngNode>, node: RngNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => {
            if root.is_none() {
                *root = Some(node);
            }
        }
    }
}

fn resolve_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let code = name.strip_prefix('#')?;
            let value = match code.strip_prefix('x') {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse().ok()?,
            };
            char::from_u32(value)
        }
    }
}

/// Names visible to `ref` inside one grammar, plus the enclosing grammar
/// for `parentRef`.
#[derive(Default)]
struct Scope<'p> {
    names: FxHashMap<String, usize>,
    parent: Option<&'p Scope<'p>>,
}

/// A `start` or `define` body together with the directory it came from.
#[derive(Clone)]
struct Component {
    combine: Option<String>,
    node: RngNode,
    dir: PathBuf,
}

#[derive(Default)]
struct Components {
    start: Vec<Component>,
    defines: IndexMap<String, Vec<Component>>,
}

#[derive(Default)]
struct Compiler {
    defines: Vec<Arc<Pattern>>,
    files: usize,
}

impl Compiler {
    fn pattern(&mut self, node: &RngNode, dir: &Path, scope: &Scope<'_>) -> Result<Arc<Pattern>> {
        let p = match node.name.as_str() {
            "element" => {
                let (names, body) = name_class_and_body(node, dir)?;
                Arc::new(Pattern::Element(names, self.group_of(body, dir, scope)?))
            }
            "attribute" => {
                let (names, body) = name_class_and_body(node, dir)?;
                let value = if body.is_empty() {
                    text()
                } else {
                    self.group_of(body, dir, scope)?
                };
                Arc::new(Pattern::Attribute(names, value))
            }
            "group" => self.group_of(&node.children, dir, scope)?,
            "interleave" => {
                let mut acc = empty();
                for child in &node.children {
                    acc = interleave(acc, self.pattern(child, dir, scope)?);
                }
                acc
            }
            "choice" => {
                let mut acc = not_allowed();
                for child in &node.children {
                    acc = choice(acc, self.pattern(child, dir, scope)?);
                }
                acc
            }
            "optional" => optional(self.group_of(&node.children, dir, scope)?),
            "zeroOrMore" => zero_or_more(self.group_of(&node.children, dir, scope)?),
            "oneOrMore" => one_or_more(self.group_of(&node.children, dir, scope)?),
            "mixed" => interleave(self.group_of(&node.children, dir, scope)?, text()),
            "list" => Arc::new(Pattern::List(self.group_of(&node.children, dir, scope)?)),
            "empty" => empty(),
            "text" => text(),
            "notAllowed" => not_allowed(),
            "data" => {
                let datatype = datatype(node.attr("type").unwrap_or("string"));
                let except = match node.first_child("except") {
                    Some(except) => Some(self.choice_of(&except.children, dir, scope)?),
                    None => None,
                };
                Arc::new(Pattern::Data(datatype, except))
            }
            "value" => {
                let datatype = datatype(node.attr("type").unwrap_or("token"));
                Arc::new(Pattern::Value(datatype, node.text.clone()))
            }
            "ref" => {
                let name = required_attr(node, "name", dir)?;
                let slot = scope
                    .names
                    .get(name)
                    .ok_or_else(|| load_error(dir, format!("reference to undefined pattern {name}")))?;
                Arc::new(Pattern::Ref(*slot))
            }
            "parentRef" => {
                let name = required_attr(node, "name", dir)?;
                let slot = scope
                    .parent
                    .and_then(|p| p.names.get(name))
                    .ok_or_else(|| {
                        load_error(dir, format!("parent reference to undefined pattern {name}"))
                    })?;
                Arc::new(Pattern::Ref(*slot))
            }
            "externalRef" => {
                let path = dir.join(required_attr(node, "href", dir)?);
                let external = read_file(&path)?;
                self.files += 1;
                self.pattern(&external, &base_dir(&path), scope)?
            }
            "grammar" => self.grammar(node, dir, scope)?,
            other => {
                return Err(load_error(dir, format!("unsupported pattern <{other}>")));
            }
        };
        Ok(p)
    }

    fn group_of(&mut self, nodes: &[RngNode], dir: &Path, scope: &Scope<'_>) -> Result<Arc<Pattern>> {
        let mut acc = empty();
        for node in nodes {
            acc = group(acc, self.pattern(node, dir, scope)?);
        }
        Ok(acc)
    }

    fn choice_of(&mut self, nodes: &[RngNode], dir: &Path, scope: &Scope<'_>) -> Result<Arc<Pattern>> {
        let mut acc = not_allowed();
        for node in nodes {
            acc = choice(acc, self.pattern(node, dir, scope)?);
        }
        Ok(acc)
    }

    /// Compiles a nested grammar and returns its start pattern.
    fn grammar(&mut self, node: &RngNode, dir: &Path, parent: &Scope<'_>) -> Result<Arc<Pattern>> {
        let mut components = Components::default();
        self.collect(node, dir, &mut components)?;

        let mut scope = Scope {
            names: FxHashMap::default(),
            parent: Some(parent),
        };
        for name in components.defines.keys() {
            scope.names.insert(name.clone(), self.defines.len());
            self.defines.push(not_allowed());
        }

        for (name, bodies) in &components.defines {
            let body = self.combine(bodies, &scope)?;
            if let Some(&slot) = scope.names.get(name) {
                self.defines[slot] = body;
            }
        }

        if components.start.is_empty() {
            return Err(load_error(dir, "grammar has no start"));
        }
        self.combine(&components.start, &scope)
    }

    fn combine(&mut self, bodies: &[Component], scope: &Scope<'_>) -> Result<Arc<Pattern>> {
        let interleaved = bodies
            .iter()
            .any(|b| b.combine.as_deref() == Some("interleave"));
        let mut acc: Option<Arc<Pattern>> = None;
        for body in bodies {
            let p = self.group_of(&body.node.children, &body.dir, scope)?;
            acc = Some(match acc {
                None => p,
                Some(prev) if interleaved => interleave(prev, p),
                Some(prev) => choice(prev, p),
            });
        }
        Ok(acc.unwrap_or_else(not_allowed))
    }

    /// Gathers the `start` and `define` components of a grammar, following
    /// `div` and `include`.
    fn collect(&mut self, node: &RngNode, dir: &Path, out: &mut Components) -> Result<()> {
        for child in &node.children {
            match child.name.as_str() {
                "start" => out.start.push(component(child, dir)),
                "define" => {
                    let name = required_attr(child, "name", dir)?;
                    out.defines
                        .entry(name.to_string())
                        .or_default()
                        .push(component(child, dir));
                }
                "div" => self.collect(child, dir, out)?,
                "include" => {
                    let path = dir.join(required_attr(child, "href", dir)?);
                    let included = read_file(&path)?;
                    self.files += 1;
                    if included.name != "grammar" {
                        return Err(load_error(&path, "included file is not a grammar"));
                    }
                    let mut inner = Components::default();
                    self.collect(&included, &base_dir(&path), &mut inner)?;

                    // Components inside <include> replace the included ones
                    let mut overrides = Components::default();
                    self.collect(child, dir, &mut overrides)?;
                    if !overrides.start.is_empty() {
                        inner.start = overrides.start;
                    }
                    for (name, bodies) in overrides.defines {
                        inner.defines.insert(name, bodies);
                    }

                    out.start.extend(inner.start);
                    for (name, bodies) in inner.defines {
                        out.defines.entry(name).or_default().extend(bodies);
                    }
                }
                other => debug!(element = other, "ignoring grammar content"),
            }
        }
        Ok(())
    }
}

fn component(node: &RngNode, dir: &Path) -> Component {
    Component {
        combine: node.attr("combine").map(str::to_string),
        node: node.clone(),
        dir: dir.to_path_buf(),
    }
}

/// Splits an `element`/`attribute` into its name class and body.
fn name_class_and_body<'n>(node: &'n RngNode, dir: &Path) -> Result<(NameClass, &'n [RngNode])> {
    if let Some(name) = node.attr("name") {
        return Ok((NameClass::name(local_part(name)), &node.children));
    }
    let Some((first, body)) = node.children.split_first() else {
        return Err(load_error(dir, format!("<{}> without a name", node.name)));
    };
    Ok((name_class(first, dir)?, body))
}

fn required_attr<'n>(node: &'n RngNode, name: &str, dir: &Path) -> Result<&'n str> {
    node.attr(name)
        .ok_or_else(|| load_error(dir, format!("<{}> requires a {} attribute", node.name, name)))
}

fn local_part(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

fn datatype(name: &str) -> Datatype {
    Datatype::from_name(name).unwrap_or_else(|| {
        debug!(datatype = name, "datatype not checked");
        Datatype::Any
    })
}

fn name_class(node: &RngNode, dir: &Path) -> Result<NameClass> {
    let except = |node: &RngNode| -> Result<Option<Box<NameClass>>> {
        match node.first_child("except") {
            Some(except) => Ok(Some(Box::new(name_class_choice(&except.children, dir)?))),
            None => Ok(None),
        }
    };
    match node.name.as_str() {
        "name" => Ok(NameClass::name(local_part(node.text.trim()))),
        // Documents carry no namespaces, so nsName matches like anyName
        "anyName" | "nsName" => Ok(NameClass::Any {
            except: except(node)?,
        }),
        "choice" => name_class_choice(&node.children, dir),
        other => Err(load_error(dir, format!("unsupported name class <{other}>"))),
    }
}

fn name_class_choice(nodes: &[RngNode], dir: &Path) -> Result<NameClass> {
    let mut classes = nodes.iter().map(|n| name_class(n, dir));
    let Some(first) = classes.next() else {
        return Err(load_error(dir, "empty name class choice"));
    };
    classes.try_fold(first?, |acc, next| {
        Ok(NameClass::Choice(Box::new(acc), Box::new(next?)))
    })
}
