//! Selection of session paths included in the next backup
//!
//! A selection is kept in canonical form: either exactly `{root}`, meaning the
//! whole session including children that appear later, or a strict subset of
//! the current child ids. Every mutation re-canonicalizes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::SessionItem;

/// Tri-state checkbox status of a folder in the selection tree
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FolderStatus {
    None,
    All,
    Mixed,
}

/// The session root and its current children, in display order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionTree {
    root: String,
    children: Vec<String>,
}

impl SelectionTree {
    pub fn new(root: impl Into<String>, items: &[SessionItem]) -> Self {
        Self::from_ids(root, items.iter().map(|item| item.id.clone()))
    }

    pub fn from_ids<I, S>(root: impl Into<String>, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = BTreeSet::new();
        let children = children
            .into_iter()
            .map(Into::into)
            .filter(|id| seen.insert(id.clone()))
            .collect();

        Self {
            root: root.into(),
            children,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn children(&self) -> &[String] {
        &self.children
    }

    pub fn is_root(&self, id: &str) -> bool {
        self.root == id
    }

    pub fn is_child(&self, id: &str) -> bool {
        self.children.iter().any(|child| child == id)
    }
}

/// Set of path ids marked for inclusion in the next backup
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct SelectionState {
    paths: BTreeSet<String>,
}

impl SelectionState {
    /// Nothing selected
    pub fn empty() -> Self {
        Self::default()
    }

    /// The whole session, present and future children
    pub fn everything(root: impl Into<String>) -> Self {
        let mut paths = BTreeSet::new();
        paths.insert(root.into());
        Self { paths }
    }

    /// Build a selection from raw stored ids; not canonicalized
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.paths.contains(id)
    }

    /// Whether `id` is included, counting children covered by a selected root
    pub fn is_selected(&self, tree: &SelectionTree, id: &str) -> bool {
        if self.paths.contains(id) {
            return true;
        }
        tree.is_child(id) && self.paths.contains(tree.root())
    }

    pub fn folder_status(&self, tree: &SelectionTree, id: &str) -> FolderStatus {
        if !tree.is_root(id) {
            return if self.is_selected(tree, id) {
                FolderStatus::All
            } else {
                FolderStatus::None
            };
        }

        if self.paths.contains(tree.root()) {
            return FolderStatus::All;
        }

        let children = tree.children();
        let selected = children
            .iter()
            .filter(|child| self.paths.contains(child.as_str()))
            .count();

        if children.is_empty() || selected == 0 {
            FolderStatus::None
        } else if selected == children.len() {
            FolderStatus::All
        } else {
            FolderStatus::Mixed
        }
    }

    /// Flip the inclusion of `id`
    ///
    /// Ids that are neither the root nor a current child are ignored.
    pub fn toggle(&mut self, tree: &SelectionTree, id: &str) {
        if tree.is_root(id) {
            if self.folder_status(tree, id) == FolderStatus::All {
                self.paths.clear();
            } else {
                *self = Self::everything(tree.root());
            }
            return;
        }

        if !tree.is_child(id) {
            return;
        }

        if self.paths.contains(tree.root()) {
            // Root form expands to every child except the one toggled off
            self.paths = tree
                .children()
                .iter()
                .filter(|child| child.as_str() != id)
                .cloned()
                .collect();
            return;
        }

        if !self.paths.remove(id) {
            self.paths.insert(id.to_string());
        }
        self.collapse_if_full(tree);
    }

    /// Drop ids that are no longer children and restore canonical form
    ///
    /// Returns true if the selection changed.
    pub fn canonicalize(&mut self, tree: &SelectionTree) -> bool {
        let before = self.paths.clone();

        if self.paths.contains(tree.root()) {
            *self = Self::everything(tree.root());
        } else {
            self.paths.retain(|id| tree.is_child(id));
            self.collapse_if_full(tree);
        }

        before != self.paths
    }

    pub fn is_canonical(&self, tree: &SelectionTree) -> bool {
        if self.paths.contains(tree.root()) {
            return self.paths.len() == 1;
        }

        let all_children = self.paths.iter().all(|id| tree.is_child(id));
        let full = !tree.children().is_empty()
            && tree
                .children()
                .iter()
                .all(|child| self.paths.contains(child.as_str()));

        all_children && !full
    }

    /// Paths a run should copy, filtered against the current children
    ///
    /// Returns `[root]` for a whole-session selection, otherwise the selected
    /// children in tree order.
    pub fn selected_paths(&self, tree: &SelectionTree) -> Vec<String> {
        if self.paths.contains(tree.root()) {
            return vec![tree.root().to_string()];
        }

        tree.children()
            .iter()
            .filter(|child| self.paths.contains(child.as_str()))
            .cloned()
            .collect()
    }

    fn collapse_if_full(&mut self, tree: &SelectionTree) {
        let children = tree.children();
        if !children.is_empty()
            && children
                .iter()
                .all(|child| self.paths.contains(child.as_str()))
        {
            *self = Self::everything(tree.root());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> SelectionTree {
        SelectionTree::from_ids(
            "session",
            ["session/Capture", "session/Selects", "session/Output", "session/Trash"],
        )
    }

    #[test]
    fn test_root_toggle_selects_and_clears() {
        let tree = tree();
        let mut selection = SelectionState::empty();

        selection.toggle(&tree, "session");
        assert_eq!(selection, SelectionState::everything("session"));
        assert_eq!(selection.folder_status(&tree, "session"), FolderStatus::All);

        selection.toggle(&tree, "session");
        assert!(selection.is_empty());
        assert_eq!(selection.folder_status(&tree, "session"), FolderStatus::None);
    }

    #[test]
    fn test_child_toggle_expands_root_form() {
        let tree = tree();
        let mut selection = SelectionState::everything("session");

        selection.toggle(&tree, "session/Trash");

        assert!(!selection.contains("session"));
        assert_eq!(selection.len(), 3);
        assert!(!selection.is_selected(&tree, "session/Trash"));
        assert!(selection.is_selected(&tree, "session/Capture"));
        assert_eq!(selection.folder_status(&tree, "session"), FolderStatus::Mixed);
    }

    #[test]
    fn test_full_child_set_collapses_to_root() {
        let tree = tree();
        let mut selection = SelectionState::empty();

        for child in tree.children().to_vec() {
            selection.toggle(&tree, &child);
        }

        assert_eq!(selection, SelectionState::everything("session"));
    }

    #[test]
    fn test_toggle_twice_is_identity() {
        let tree = tree();
        let starts = [
            SelectionState::empty(),
            SelectionState::everything("session"),
            SelectionState::from_paths(["session/Capture"]),
            SelectionState::from_paths(["session/Capture", "session/Selects", "session/Output"]),
        ];
        let ids = [
            "session",
            "session/Capture",
            "session/Selects",
            "session/Output",
            "session/Trash",
        ];

        for start in &starts {
            for id in ids {
                // Root toggle from mixed selects everything, then clears; skip it
                if id == "session" && start.folder_status(&tree, id) == FolderStatus::Mixed {
                    continue;
                }
                let mut selection = start.clone();
                selection.toggle(&tree, id);
                selection.toggle(&tree, id);
                assert_eq!(&selection, start, "toggling {id} twice from {start:?}");
            }
        }
    }

    #[test]
    fn test_toggle_sequences_stay_canonical() {
        let tree = tree();
        let ids = [
            "session",
            "session/Capture",
            "session/Selects",
            "session/Output",
            "session/Trash",
        ];
        let mut selection = SelectionState::empty();

        // Deterministic walk through a few hundred toggles
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        for _ in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let id = ids[(seed % ids.len() as u64) as usize];

            selection.toggle(&tree, id);
            assert!(selection.is_canonical(&tree), "{selection:?} after {id}");

            let every_child = tree
                .children()
                .iter()
                .all(|child| selection.is_selected(&tree, child));
            let no_child = !tree
                .children()
                .iter()
                .any(|child| selection.is_selected(&tree, child));
            let status = selection.folder_status(&tree, "session");
            assert_eq!(status == FolderStatus::All, every_child);
            assert_eq!(status == FolderStatus::None, no_child);
        }
    }

    #[test]
    fn test_single_child_root_form() {
        let tree = SelectionTree::from_ids("session", ["session/Capture"]);
        let mut selection = SelectionState::everything("session");

        selection.toggle(&tree, "session/Capture");
        assert!(selection.is_empty());

        selection.toggle(&tree, "session/Capture");
        assert_eq!(selection, SelectionState::everything("session"));
    }

    #[test]
    fn test_empty_tree_status() {
        let tree = SelectionTree::from_ids("session", Vec::<String>::new());
        let mut selection = SelectionState::empty();
        assert_eq!(selection.folder_status(&tree, "session"), FolderStatus::None);

        selection.toggle(&tree, "session");
        assert_eq!(selection.folder_status(&tree, "session"), FolderStatus::All);
    }

    #[test]
    fn test_unknown_ids_are_ignored() {
        let tree = tree();
        let mut selection = SelectionState::from_paths(["session/Capture"]);
        selection.toggle(&tree, "session/Gone");
        assert_eq!(selection, SelectionState::from_paths(["session/Capture"]));
    }

    #[test]
    fn test_canonicalize_prunes_stale_ids() {
        let tree = tree();
        let mut selection =
            SelectionState::from_paths(["session/Capture", "session/Removed", "session/Selects"]);

        assert!(selection.canonicalize(&tree));
        assert_eq!(
            selection,
            SelectionState::from_paths(["session/Capture", "session/Selects"])
        );
        assert!(!selection.canonicalize(&tree));

        // Pruning down to the full child set collapses
        let small = SelectionTree::from_ids("session", ["session/Capture"]);
        selection.canonicalize(&small);
        assert_eq!(selection, SelectionState::everything("session"));

        // Root plus children reduces to root
        let mut mixed = SelectionState::from_paths(["session", "session/Capture"]);
        mixed.canonicalize(&tree);
        assert_eq!(mixed, SelectionState::everything("session"));
    }

    #[test]
    fn test_selected_paths_follow_tree_order() {
        let tree = tree();
        let selection = SelectionState::from_paths(["session/Trash", "session/Capture"]);
        assert_eq!(
            selection.selected_paths(&tree),
            vec!["session/Capture".to_string(), "session/Trash".to_string()]
        );
        assert_eq!(
            SelectionState::everything("session").selected_paths(&tree),
            vec!["session".to_string()]
        );
    }
}
