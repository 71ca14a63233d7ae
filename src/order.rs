//! The Classpath Orderer (§4.4): flattens the opener phase's tree of
//! classpath elements (toplevel entries, each possibly carrying manifest
//! `Class-Path` children) into the single linear sequence the rest of the
//! pipeline scans in. First-wins masking later depends on this order
//! being stable and depth-first, so that an element nearer the head of
//! the classpath always shadows one further back.
use std::collections::HashSet;
use std::sync::Arc;

use crate::element::{ClasspathElement, ElementArena, ElementId};

/// Depth-first flattening of every toplevel element and its manifest
/// cross-reference children, breaking cycles by never re-visiting an
/// element id. Elements with `skip = true` (failed opens) are walked for
/// their side effects on `visited` but not emitted.
pub fn build_final_order(arena: &ElementArena) -> Vec<Arc<ClasspathElement>> {
    let mut toplevel: Vec<Arc<ClasspathElement>> = arena
        .all()
        .into_iter()
        .filter(|element| element.parent.is_none())
        .collect();
    toplevel.sort_by_key(|element| element.order_within_parent);

    let mut visited: HashSet<ElementId> = HashSet::new();
    let mut order = Vec::new();
    for root in toplevel {
        visit(&root, arena, &mut visited, &mut order);
    }
    order
}

fn visit(
    element: &Arc<ClasspathElement>,
    arena: &ElementArena,
    visited: &mut HashSet<ElementId>,
    order: &mut Vec<Arc<ClasspathElement>>,
) {
    if !visited.insert(element.id) {
        return;
    }
    if !element.is_skipped() {
        order.push(element.clone());
    }

    let mut children: Vec<Arc<ClasspathElement>> =
        element.children().into_iter().map(|id| arena.get(id)).collect();
    children.sort_by_key(|child| child.order_within_parent);
    for child in children {
        visit(&child, arena, visited, order);
    }
}
