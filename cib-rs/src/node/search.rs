//! Locating, merging and replacing elements inside a tree.

use tracing::{debug, error, trace};

use super::Element;
use crate::constants::ATTR_IDREF;

/// Merges `update` into `target`, then recursively into matching children.
///
/// Children are located by (tag, identity), or by tag alone when the update
/// child has no identity, and created when missing. With `as_diff` set the
/// update's attributes are copied verbatim and moved to the end so the
/// update's ordering is kept; otherwise increment expansion applies.
pub fn merge_object(target: &mut Element, update: &Element, as_diff: bool) {
    if as_diff {
        for (name, value) in update.attributes() {
            target.replace_attr(name, value);
        }
    } else {
        target.copy_in_properties(update);
    }

    for child in update.children() {
        add_object(target, child, as_diff);
    }
}

/// Locates or creates the child of `parent` that corresponds to `update`
/// and merges `update` into it.
pub fn add_object(parent: &mut Element, update: &Element, as_diff: bool) {
    let index = match parent.find_child_index(update.name(), update.id()) {
        Some(index) => {
            trace!(tag = update.name(), id = ?update.id(), "found node to update");
            index
        }
        None => {
            trace!(tag = update.name(), id = ?update.id(), "adding node");
            parent.create_child(update.name());
            parent.child_count() - 1
        }
    };
    merge_object(&mut parent.children_mut()[index], update, as_diff);
}

/// Merges `update` into the first element of `root` (itself included) with
/// the same tag and identity. Returns true if a match was updated.
pub fn update_child(root: &mut Element, update: &Element) -> bool {
    if root.name() == update.name() && root.id() == update.id() {
        trace!(tag = root.name(), id = ?root.id(), "update match found");
        merge_object(root, update, false);
        return true;
    }

    root.children_mut()
        .iter_mut()
        .any(|child| update_child(child, update))
}

/// Deletes or replaces the first strict descendant of `root` matching
/// `update` by tag, and by identity when `update` has one.
///
/// With `delete_only` the match is removed, and only if every attribute of
/// `update` has the same value on it. Otherwise it is replaced by a copy of
/// `update`. The search root is never removed. Returns true on a change.
pub fn replace_child(root: &mut Element, update: &Element, delete_only: bool) -> bool {
    if is_replace_match(root, update, delete_only) {
        debug!(tag = root.name(), "cannot delete the search root");
    }
    replace_in_children(root, update, delete_only)
}

fn replace_in_children(parent: &mut Element, update: &Element, delete_only: bool) -> bool {
    let mut index = 0;
    while index < parent.child_count() {
        let child = &parent.children()[index];
        if is_replace_match(child, update, delete_only) {
            trace!(tag = child.name(), id = ?child.id(), "delete match found");
            if delete_only {
                parent.detach_child(index);
            } else {
                parent.replace_child_at(index, update.clone());
            }
            return true;
        }

        if replace_in_children(&mut parent.children_mut()[index], update, delete_only) {
            return true;
        }
        index += 1;
    }
    false
}

fn is_replace_match(candidate: &Element, update: &Element, delete_only: bool) -> bool {
    if candidate.name() != update.name() {
        return false;
    }
    if update.id().is_some() && candidate.id() != update.id() {
        return false;
    }
    !delete_only
        || update
            .attributes()
            .all(|(name, value)| candidate.attr(name) == Some(value))
}

/// Collects copies of the elements of `root` (itself included) whose tag is
/// `tag` and whose `field` attribute equals `value`, when those are given.
///
/// Matching elements are only searched further when `search_matches` is set.
pub fn find_children(
    root: &Element,
    tag: Option<&str>,
    field: Option<&str>,
    value: Option<&str>,
    search_matches: bool,
) -> Vec<Element> {
    let mut found = Vec::new();
    collect_children(&mut found, root, tag, field, value, search_matches);
    found
}

fn collect_children(
    found: &mut Vec<Element>,
    node: &Element,
    tag: Option<&str>,
    field: Option<&str>,
    value: Option<&str>,
    search_matches: bool,
) {
    let tag_ok = tag.is_none_or(|tag| node.name() == tag);
    let value_ok = match value {
        None => true,
        Some(value) => field.and_then(|field| node.attr(field)) == Some(value),
    };

    let matched = tag_ok && value_ok;
    if matched {
        found.push(node.clone());
    }
    if search_matches || !matched {
        for child in node.children() {
            collect_children(found, child, tag, field, value, search_matches);
        }
    }
}

/// Resolves an `id-ref` indirection.
///
/// Returns `input` itself when it has no `id-ref`. Otherwise returns the
/// element under `top` (or under `input` when `top` is `None`) with the
/// same tag and the referenced identity, or `None` if there is none.
pub fn expand_idref<'a>(input: &'a Element, top: Option<&'a Element>) -> Option<&'a Element> {
    let Some(reference) = input.attr(ATTR_IDREF) else {
        return Some(input);
    };

    let top = top.unwrap_or(input);
    let found = find_by_identity(top, input.name(), reference);
    if found.is_none() {
        error!(
            tag = input.name(),
            id = reference,
            scope = top.name(),
            "no match for reference: invalid configuration"
        );
    }
    found
}

fn find_by_identity<'a>(node: &'a Element, tag: &str, id: &str) -> Option<&'a Element> {
    if node.name() == tag && node.id() == Some(id) {
        return Some(node);
    }
    node.children()
        .iter()
        .find_map(|child| find_by_identity(child, tag, id))
}
