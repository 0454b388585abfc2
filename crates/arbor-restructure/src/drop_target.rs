//! Pointer drop inference
//!
//! The renderer reports which rows are on screen and where the pointer was
//! released. Vertical position picks the hovered row and the before/after
//! side; horizontal offset picks the depth, which selects the new parent from
//! the hovered row's ancestor chain.

use serde::{Deserialize, Serialize};

use arbor_branches::BranchStore;

/// One rendered row, top to bottom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibleRow {
    pub branch_id: String,
    pub top: f32,
    pub height: f32,
    /// The row's children are drawn below it
    pub expanded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pointer {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropGeometry {
    /// Horizontal distance between depth levels
    pub indent: f32,
    /// X coordinate of depth 0
    pub origin_x: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropSide {
    Before,
    After,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DropPlacement {
    pub hovered: String,
    pub side: DropSide,
    /// Depth the dropped branch will sit at (ROOT is 0)
    pub depth: usize,
    pub parent_id: String,
    /// Insertion index among `parent_id`'s current children
    pub index: usize,
}

fn hovered_row(rows: &[VisibleRow], y: f32) -> Option<&VisibleRow> {
    let first = rows.first()?;
    if y < first.top {
        return Some(first);
    }
    rows.iter()
        .find(|row| y >= row.top && y < row.top + row.height)
        .or_else(|| rows.last())
}

/// Work out where a drop at `pointer` lands. `None` means there is no legal
/// target under the pointer.
pub fn resolve_drop(
    store: &BranchStore,
    rows: &[VisibleRow],
    pointer: Pointer,
    geometry: DropGeometry,
) -> Option<DropPlacement> {
    let row = hovered_row(rows, pointer.y)?;
    let side = if pointer.y < row.top + row.height / 2.0 {
        DropSide::Before
    } else {
        DropSide::After
    };

    // Hovered row first, then its ancestors up to ROOT
    let mut chain = vec![store.get(&row.branch_id)?];
    chain.extend(store.get_ancestors(&row.branch_id));
    let hovered_depth = chain.len() - 1;

    let has_visible_children = row.expanded && !store.get_child_ids(&row.branch_id).is_empty();
    let max_depth = match side {
        DropSide::Before => hovered_depth,
        DropSide::After if has_visible_children => hovered_depth,
        DropSide::After => hovered_depth + 1,
    };
    // Depth 0 belongs to ROOT alone
    if max_depth < 1 {
        return None;
    }

    let wanted = if geometry.indent > 0.0 {
        ((pointer.x - geometry.origin_x) / geometry.indent).floor().max(0.0) as usize
    } else {
        hovered_depth
    };
    let depth = wanted.clamp(1, max_depth);

    if depth == hovered_depth + 1 {
        // Nest under the hovered row, after its hidden children
        let parent = &chain[0];
        return Some(DropPlacement {
            hovered: row.branch_id.clone(),
            side,
            depth,
            parent_id: parent.id.clone(),
            index: store.get_child_ids(&parent.id).len(),
        });
    }

    let anchor = &chain[hovered_depth - depth];
    let parent = &chain[hovered_depth - depth + 1];
    let position = store
        .get_child_ids(&parent.id)
        .iter()
        .position(|id| *id == anchor.id)?;
    let index = match side {
        DropSide::Before => position,
        DropSide::After => position + 1,
    };

    Some(DropPlacement {
        hovered: row.branch_id.clone(),
        side,
        depth,
        parent_id: parent.id.clone(),
        index,
    })
}
