//! Grammar patterns and the validator that runs them.
//!
//! Both grammar front ends (RELAX-NG and DTD) compile into the same pattern
//! algebra. Validation works on derivatives: each attribute and child of an
//! element is consumed in turn, and the element is accepted when what is
//! left of its content pattern can match nothing.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::node::Element;

/// Set of element or attribute names a pattern accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NameClass {
    /// Any name, minus the exceptions.
    Any { except: Option<Box<NameClass>> },
    /// Exactly one name.
    Name(String),
    Choice(Box<NameClass>, Box<NameClass>),
}

impl NameClass {
    pub(crate) fn name(name: impl Into<String>) -> Self {
        NameClass::Name(name.into())
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        match self {
            NameClass::Any { except } => except.as_ref().is_none_or(|e| !e.contains(name)),
            NameClass::Name(n) => n == name,
            NameClass::Choice(a, b) => a.contains(name) || b.contains(name),
        }
    }
}

/// The subset of XML Schema datatypes understood by `data` and `value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Datatype {
    String,
    Token,
    Boolean,
    Integer,
    NonNegativeInteger,
    PositiveInteger,
    Decimal,
    Id,
    IdRef,
    IdRefs,
    NmToken,
    NmTokens,
    /// A type we do not check; every value passes.
    Any,
}

impl Datatype {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        let dt = match name {
            "string" | "normalizedString" | "anyURI" | "dateTime" | "date" | "duration" => {
                Datatype::String
            }
            "token" | "language" => Datatype::Token,
            "boolean" => Datatype::Boolean,
            "integer" | "int" | "long" | "short" | "byte" => Datatype::Integer,
            "nonNegativeInteger" | "unsignedInt" | "unsignedLong" | "unsignedShort" => {
                Datatype::NonNegativeInteger
            }
            "positiveInteger" => Datatype::PositiveInteger,
            "decimal" | "float" | "double" => Datatype::Decimal,
            "ID" | "NCName" | "Name" => Datatype::Id,
            "IDREF" => Datatype::IdRef,
            "IDREFS" => Datatype::IdRefs,
            "NMTOKEN" => Datatype::NmToken,
            "NMTOKENS" => Datatype::NmTokens,
            _ => return None,
        };
        Some(dt)
    }

    pub(crate) fn allows(self, value: &str) -> bool {
        let v = value.trim();
        match self {
            Datatype::String | Datatype::Token | Datatype::Any => true,
            Datatype::Boolean => matches!(v, "true" | "false" | "1" | "0"),
            Datatype::Integer => {
                let digits = v.strip_prefix(['+', '-']).unwrap_or(v);
                is_digits(digits)
            }
            Datatype::NonNegativeInteger => is_digits(v.strip_prefix('+').unwrap_or(v)),
            Datatype::PositiveInteger => {
                let digits = v.strip_prefix('+').unwrap_or(v);
                is_digits(digits) && digits.bytes().any(|b| b != b'0')
            }
            Datatype::Decimal => v.parse::<f64>().is_ok(),
            Datatype::Id | Datatype::IdRef => is_ncname(v),
            Datatype::IdRefs => {
                let mut tokens = v.split_whitespace().peekable();
                tokens.peek().is_some() && tokens.all(is_ncname)
            }
            Datatype::NmToken => is_nmtoken(v),
            Datatype::NmTokens => {
                let mut tokens = v.split_whitespace().peekable();
                tokens.peek().is_some() && tokens.all(is_nmtoken)
            }
        }
    }

    pub(crate) fn equal(self, a: &str, b: &str) -> bool {
        match self {
            Datatype::String => a == b,
            Datatype::Boolean => {
                let truth = |s: &str| matches!(s.trim(), "true" | "1");
                self.allows(a) && self.allows(b) && truth(a) == truth(b)
            }
            Datatype::Integer | Datatype::NonNegativeInteger | Datatype::PositiveInteger => {
                match (a.trim().parse::<i128>(), b.trim().parse::<i128>()) {
                    (Ok(x), Ok(y)) => x == y,
                    _ => a.trim() == b.trim(),
                }
            }
            _ => a.split_whitespace().eq(b.split_whitespace()),
        }
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '.' | '-' | '_')
}

fn is_ncname(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => chars.all(is_name_char),
        _ => false,
    }
}

fn is_nmtoken(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| is_name_char(c) || c == ':')
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Pattern {
    Empty,
    NotAllowed,
    Text,
    Choice(Arc<Pattern>, Arc<Pattern>),
    Interleave(Arc<Pattern>, Arc<Pattern>),
    Group(Arc<Pattern>, Arc<Pattern>),
    OneOrMore(Arc<Pattern>),
    Attribute(NameClass, Arc<Pattern>),
    Element(NameClass, Arc<Pattern>),
    /// Index of a named definition in the owning [`Grammar`].
    Ref(usize),
    Value(Datatype, String),
    Data(Datatype, Option<Arc<Pattern>>),
    List(Arc<Pattern>),
}

impl Pattern {
    fn is_not_allowed(&self) -> bool {
        matches!(self, Pattern::NotAllowed)
    }

    fn is_empty(&self) -> bool {
        matches!(self, Pattern::Empty)
    }
}

pub(crate) fn empty() -> Arc<Pattern> {
    Arc::new(Pattern::Empty)
}

pub(crate) fn not_allowed() -> Arc<Pattern> {
    Arc::new(Pattern::NotAllowed)
}

pub(crate) fn text() -> Arc<Pattern> {
    Arc::new(Pattern::Text)
}

pub(crate) fn choice(a: Arc<Pattern>, b: Arc<Pattern>) -> Arc<Pattern> {
    if a.is_not_allowed() {
        return b;
    }
    if b.is_not_allowed() || a == b {
        return a;
    }
    let duplicate = match &*a {
        Pattern::Choice(x, y) => *x == b || *y == b,
        _ => false,
    };
    if duplicate {
        return a;
    }
    Arc::new(Pattern::Choice(a, b))
}

pub(crate) fn group(a: Arc<Pattern>, b: Arc<Pattern>) -> Arc<Pattern> {
    if a.is_not_allowed() || b.is_not_allowed() {
        return not_allowed();
    }
    if a.is_empty() {
        return b;
    }
    if b.is_empty() {
        return a;
    }
    Arc::new(Pattern::Group(a, b))
}

pub(crate) fn interleave(a: Arc<Pattern>, b: Arc<Pattern>) -> Arc<Pattern> {
    if a.is_not_allowed() || b.is_not_allowed() {
        return not_allowed();
    }
    if a.is_empty() {
        return b;
    }
    if b.is_empty() {
        return a;
    }
    Arc::new(Pattern::Interleave(a, b))
}

pub(crate) fn one_or_more(p: Arc<Pattern>) -> Arc<Pattern> {
    if p.is_not_allowed() || p.is_empty() {
        return p;
    }
    Arc::new(Pattern::OneOrMore(p))
}

pub(crate) fn optional(p: Arc<Pattern>) -> Arc<Pattern> {
    choice(p, empty())
}

pub(crate) fn zero_or_more(p: Arc<Pattern>) -> Arc<Pattern> {
    optional(one_or_more(p))
}

/// A compiled grammar: a start pattern plus the named definitions it
/// refers to.
#[derive(Debug)]
pub(crate) struct Grammar {
    start: Arc<Pattern>,
    defines: Vec<Arc<Pattern>>,
}

impl Grammar {
    pub(crate) fn new(start: Arc<Pattern>, defines: Vec<Arc<Pattern>>) -> Self {
        Grammar { start, defines }
    }

    /// Checks `root` against the grammar. On rejection the error names the
    /// innermost problem found.
    pub(crate) fn validate(&self, root: &Element) -> Result<(), String> {
        let mut validator = Validator {
            grammar: self,
            memo: FxHashMap::default(),
            errors: Vec::new(),
        };
        let rest = validator.child_deriv(&self.start, root);
        if validator.nullable(&rest) {
            return Ok(());
        }
        trace!(errors = validator.errors.len(), "document rejected");
        Err(validator
            .errors
            .into_iter()
            .next()
            .unwrap_or_else(|| format!("element <{}> is not allowed as the root", root.name())))
    }
}

struct Validator<'g> {
    grammar: &'g Grammar,
    /// Verdicts for (content pattern, element) pairs already checked.
    memo: FxHashMap<(usize, usize), bool>,
    errors: Vec<String>,
}

impl Validator<'_> {
    fn resolve(&self, index: usize) -> Arc<Pattern> {
        self.grammar
            .defines
            .get(index)
            .cloned()
            .unwrap_or_else(not_allowed)
    }

    fn nullable(&self, p: &Pattern) -> bool {
        match p {
            Pattern::Empty | Pattern::Text => true,
            Pattern::Choice(a, b) => self.nullable(a) || self.nullable(b),
            Pattern::Interleave(a, b) | Pattern::Group(a, b) => {
                self.nullable(a) && self.nullable(b)
            }
            Pattern::OneOrMore(a) => self.nullable(a),
            Pattern::Ref(i) => self
                .grammar
                .defines
                .get(*i)
                .is_some_and(|d| self.nullable(d)),
            _ => false,
        }
    }

    /// Derivative of `p` with respect to the whole element `e`.
    fn child_deriv(&mut self, p: &Arc<Pattern>, e: &Element) -> Arc<Pattern> {
        match &**p {
            Pattern::Choice(a, b) => {
                let da = self.child_deriv(a, e);
                let db = self.child_deriv(b, e);
                choice(da, db)
            }
            Pattern::Interleave(a, b) => {
                let left = interleave(self.child_deriv(a, e), b.clone());
                let right = interleave(a.clone(), self.child_deriv(b, e));
                choice(left, right)
            }
            Pattern::Group(a, b) => {
                let first = group(self.child_deriv(a, e), b.clone());
                if self.nullable(a) {
                    let second = self.child_deriv(b, e);
                    choice(first, second)
                } else {
                    first
                }
            }
            Pattern::OneOrMore(a) => {
                let d = self.child_deriv(a, e);
                group(d, optional(p.clone()))
            }
            Pattern::Element(names, content) => {
                if names.contains(e.name()) && self.element_valid(content, e) {
                    empty()
                } else {
                    not_allowed()
                }
            }
            Pattern::Ref(i) => {
                let target = self.resolve(*i);
                self.child_deriv(&target, e)
            }
            _ => not_allowed(),
        }
    }

    fn element_valid(&mut self, content: &Arc<Pattern>, e: &Element) -> bool {
        let key = (Arc::as_ptr(content) as usize, e as *const Element as usize);
        if let Some(&valid) = self.memo.get(&key) {
            return valid;
        }
        let valid = self.check_element(content, e);
        self.memo.insert(key, valid);
        valid
    }

    fn check_element(&mut self, content: &Arc<Pattern>, e: &Element) -> bool {
        let mut p = content.clone();
        for (name, value) in e.attributes() {
            p = self.att_deriv(&p, name, value);
            if p.is_not_allowed() {
                self.errors.push(format!(
                    "attribute {}=\"{}\" is not allowed on <{}>",
                    name,
                    value,
                    e.name()
                ));
                return false;
            }
        }

        p = self.close(&p);
        if p.is_not_allowed() {
            self.errors
                .push(format!("element <{}> is missing a required attribute", e.name()));
            return false;
        }

        for child in e.children() {
            p = self.child_deriv(&p, child);
            if p.is_not_allowed() {
                self.errors.push(format!(
                    "element <{}> is not allowed here in <{}>",
                    child.name(),
                    e.name()
                ));
                return false;
            }
        }

        let complete = self.nullable(&p) || (!e.has_children() && self.value_matches(&p, ""));
        if !complete {
            self.errors
                .push(format!("element <{}> has incomplete content", e.name()));
        }
        complete
    }

    fn att_deriv(&self, p: &Arc<Pattern>, name: &str, value: &str) -> Arc<Pattern> {
        match &**p {
            Pattern::Choice(a, b) => choice(
                self.att_deriv(a, name, value),
                self.att_deriv(b, name, value),
            ),
            Pattern::Interleave(a, b) => choice(
                interleave(self.att_deriv(a, name, value), b.clone()),
                interleave(a.clone(), self.att_deriv(b, name, value)),
            ),
            Pattern::Group(a, b) => choice(
                group(self.att_deriv(a, name, value), b.clone()),
                group(a.clone(), self.att_deriv(b, name, value)),
            ),
            Pattern::OneOrMore(a) => group(self.att_deriv(a, name, value), optional(p.clone())),
            Pattern::Attribute(names, allowed) => {
                if names.contains(name) && self.value_matches(allowed, value) {
                    empty()
                } else {
                    not_allowed()
                }
            }
            Pattern::Ref(i) => self.att_deriv(&self.resolve(*i), name, value),
            _ => not_allowed(),
        }
    }

    /// Rules out any attribute still expected once the start tag is done.
    fn close(&self, p: &Arc<Pattern>) -> Arc<Pattern> {
        match &**p {
            Pattern::Choice(a, b) => choice(self.close(a), self.close(b)),
            Pattern::Interleave(a, b) => interleave(self.close(a), self.close(b)),
            Pattern::Group(a, b) => group(self.close(a), self.close(b)),
            Pattern::OneOrMore(a) => one_or_more(self.close(a)),
            Pattern::Attribute(..) => not_allowed(),
            Pattern::Ref(i) => self.close(&self.resolve(*i)),
            _ => p.clone(),
        }
    }

    fn text_deriv(&self, p: &Arc<Pattern>, s: &str) -> Arc<Pattern> {
        match &**p {
            Pattern::Choice(a, b) => choice(self.text_deriv(a, s), self.text_deriv(b, s)),
            Pattern::Interleave(a, b) => choice(
                interleave(self.text_deriv(a, s), b.clone()),
                interleave(a.clone(), self.text_deriv(b, s)),
            ),
            Pattern::Group(a, b) => {
                let first = group(self.text_deriv(a, s), b.clone());
                if self.nullable(a) {
                    choice(first, self.text_deriv(b, s))
                } else {
                    first
                }
            }
            Pattern::OneOrMore(a) => group(self.text_deriv(a, s), optional(p.clone())),
            Pattern::Text => p.clone(),
            Pattern::Value(dt, expected) => {
                if dt.equal(expected, s) {
                    empty()
                } else {
                    not_allowed()
                }
            }
            Pattern::Data(dt, except) => {
                let excluded = except.as_ref().is_some_and(|x| self.value_matches(x, s));
                if dt.allows(s) && !excluded {
                    empty()
                } else {
                    not_allowed()
                }
            }
            Pattern::List(items) => {
                let mut rest = items.clone();
                for token in s.split_whitespace() {
                    rest = self.text_deriv(&rest, token);
                }
                if self.nullable(&rest) {
                    empty()
                } else {
                    not_allowed()
                }
            }
            Pattern::Ref(i) => self.text_deriv(&self.resolve(*i), s),
            _ => not_allowed(),
        }
    }

    fn value_matches(&self, p: &Arc<Pattern>, s: &str) -> bool {
        self.nullable(&self.text_deriv(p, s)) || (s.trim().is_empty() && self.nullable(p))
    }
}
