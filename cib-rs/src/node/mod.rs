//! Element tree used to represent configuration documents.
//!
//! Every node exclusively owns its attributes and children, so a clone is a
//! fully independent copy and moving a node into a new parent detaches it
//! from wherever it was before.

mod score;
mod search;

pub use score::{char_to_score, expand_increment};
pub use search::{
    add_object, expand_idref, find_children, merge_object, replace_child, update_child,
};

use indexmap::IndexMap;

use crate::constants::{ATTR_ID, DIFF_MARKER};

/// A tagged element with ordered attributes and owned children.
///
/// Attribute insertion order is kept for serialization but is not
/// significant when comparing content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    /// The tag name.
    name: String,
    /// Attributes in insertion order. Names are unique.
    attributes: IndexMap<String, String>,
    /// Child elements in document order.
    children: Vec<Element>,
}

impl Element {
    /// Creates an element with no attributes or children.
    pub fn new(name: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            attributes: IndexMap::new(),
            children: Vec::new(),
        }
    }

    /// Creates an element with the given attributes, keeping their order.
    pub fn with_attributes<K, V, I>(name: impl Into<String>, attrs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut element = Element::new(name);
        for (k, v) in attrs {
            element.set_attr(k, v);
        }
        element
    }

    /// Returns the tag name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renames the element.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Returns the identity value, if any.
    pub fn id(&self) -> Option<&str> {
        self.attr(ATTR_ID)
    }

    /// Returns the value of an attribute.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Returns an attribute parsed as an integer.
    pub fn attr_int(&self, name: &str) -> Option<i64> {
        self.attr(name).and_then(|v| v.trim().parse().ok())
    }

    /// Returns true if the attribute is present.
    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Sets an attribute. An existing attribute keeps its position.
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Sets an integer attribute.
    pub fn set_attr_int(&mut self, name: impl Into<String>, value: i64) {
        self.set_attr(name, value.to_string());
    }

    /// Removes and re-adds an attribute so it moves to the end.
    pub fn replace_attr(&mut self, name: &str, value: impl Into<String>) {
        self.attributes.shift_remove(name);
        self.attributes.insert(name.to_string(), value.into());
    }

    /// Removes an attribute, returning its old value.
    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        self.attributes.shift_remove(name)
    }

    /// Iterates over attributes in insertion order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the number of attributes.
    pub fn attr_count(&self) -> usize {
        self.attributes.len()
    }

    /// Returns true if the element carries any attribute.
    pub fn has_attributes(&self) -> bool {
        !self.attributes.is_empty()
    }

    /// Sorts attributes by name.
    pub fn sort_attributes(&mut self) {
        self.attributes.sort_keys();
    }

    /// Keeps only the attributes for which `keep` returns true.
    pub fn retain_attrs(&mut self, mut keep: impl FnMut(&str, &str) -> bool) {
        self.attributes.retain(|k, v| keep(k, v));
    }

    /// Returns the children in order.
    pub fn children(&self) -> &[Element] {
        &self.children
    }

    /// Returns mutable access to the children.
    pub fn children_mut(&mut self) -> &mut [Element] {
        &mut self.children
    }

    /// Returns the number of children.
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Returns true if the element has any child.
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Attaches a child, taking ownership, and returns a reference to it.
    pub fn add_child(&mut self, child: Element) -> &mut Element {
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    /// Attaches a deep copy of `child`.
    pub fn add_child_copy(&mut self, child: &Element) -> &mut Element {
        self.add_child(child.clone())
    }

    /// Creates and attaches a new empty child.
    pub fn create_child(&mut self, name: impl Into<String>) -> &mut Element {
        self.add_child(Element::new(name))
    }

    /// Detaches the child at `index` and hands over ownership.
    ///
    /// Returns `None` if the index is out of range.
    pub fn detach_child(&mut self, index: usize) -> Option<Element> {
        if index < self.children.len() {
            Some(self.children.remove(index))
        } else {
            None
        }
    }

    /// Replaces the child at `index`, returning the previous one.
    pub fn replace_child_at(&mut self, index: usize, child: Element) -> Option<Element> {
        self.children
            .get_mut(index)
            .map(|slot| std::mem::replace(slot, child))
    }

    /// Keeps only the children for which `keep` returns true.
    pub fn retain_children(&mut self, keep: impl FnMut(&mut Element) -> bool) {
        self.children.retain_mut(keep);
    }

    /// Removes every child.
    pub fn clear_children(&mut self) {
        self.children.clear();
    }

    /// Removes and returns every child.
    pub fn take_children(&mut self) -> Vec<Element> {
        std::mem::take(&mut self.children)
    }

    /// Finds the position of the child matching `name` and, if given, `id`.
    ///
    /// With no `id` the first child with that tag matches.
    pub fn find_child_index(&self, name: &str, id: Option<&str>) -> Option<usize> {
        self.children.iter().position(|child| {
            child.name == name && id.is_none_or(|id| child.id() == Some(id))
        })
    }

    /// Finds the child matching `name` and, if given, `id`.
    pub fn find_child(&self, name: &str, id: Option<&str>) -> Option<&Element> {
        self.find_child_index(name, id).map(|i| &self.children[i])
    }

    /// Mutable variant of [`Element::find_child`].
    pub fn find_child_mut(&mut self, name: &str, id: Option<&str>) -> Option<&mut Element> {
        self.find_child_index(name, id)
            .map(move |i| &mut self.children[i])
    }

    /// Finds the child that corresponds to `other` by tag and identity.
    pub fn find_match(&self, other: &Element) -> Option<&Element> {
        self.find_child(other.name(), other.id())
    }

    /// Returns the first child with the given tag.
    pub fn first_named_child(&self, name: &str) -> Option<&Element> {
        self.find_child(name, None)
    }

    /// Mutable variant of [`Element::first_named_child`].
    pub fn first_named_child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.find_child_mut(name, None)
    }

    /// Removes the diff marker attribute from this element and all descendants.
    pub fn purge_diff_markers(&mut self) {
        self.remove_attr(DIFF_MARKER);
        for child in &mut self.children {
            child.purge_diff_markers();
        }
    }

    /// Copies every attribute of `src` onto this element, applying increment
    /// expansion (`name="name++"`, `name="name+=N"`).
    pub fn copy_in_properties(&mut self, src: &Element) {
        for (name, value) in src.attributes() {
            expand_increment(self, name, value);
        }
    }

    /// Applies increment expansion to every attribute of this subtree.
    pub fn fix_increments_recursive(&mut self) {
        let attrs: Vec<(String, String)> = self
            .attributes()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        for (name, value) in attrs {
            score::expand(self, &name, &value, true);
        }
        for child in &mut self.children {
            child.fix_increments_recursive();
        }
    }

    /// Counts the elements in this subtree, including itself.
    pub fn subtree_size(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(Element::subtree_size)
            .sum::<usize>()
    }
}

impl std::fmt::Display for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}", self.name)?;
        if let Some(id) = self.id() {
            write!(f, " id={}", id)?;
        }
        write!(f, ">")
    }
}
