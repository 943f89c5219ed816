#![allow(dead_code)]
//! Process hierarchy materialization.
//!
//! [`Forest::build`] links a flat record set into parent/child trees using
//! each record's optional parent id. [`flatten`] walks that forest in name
//! order and produces the display list, descending only into nodes the caller
//! has expanded.
//!
//! Pure functions, no I/O. Nodes are addressed by index into the forest's
//! node vector, so there are no back references.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, warn};

/// What the tree builder needs from a record.
pub trait TreeRecord {
    fn id(&self) -> i64;
    fn parent_id(&self) -> Option<i64>;
    fn name(&self) -> &str;
}

/// One record plus its position in the hierarchy.
#[derive(Debug)]
pub struct TreeNode<'a, T> {
    pub record: &'a T,
    /// Indices into the owning forest, in discovery order.
    children: Vec<usize>,
    pub depth: usize,
}

impl<T> TreeNode<'_, T> {
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }
}

/// Parent/child linkage over a borrowed record set.
#[derive(Debug)]
pub struct Forest<'a, T> {
    nodes: Vec<TreeNode<'a, T>>,
    index: HashMap<i64, usize>,
    roots: Vec<usize>,
    detached: Vec<i64>,
}

impl<'a, T: TreeRecord> Forest<'a, T> {
    /// Build the forest in three passes: index, link, assign depth.
    ///
    /// A record is a root when its parent id is null, points at itself, or
    /// points at an id missing from `records`. With duplicate ids the last
    /// record wins. Records caught in a parent cycle are never reached from a
    /// root; they are reported by [`Forest::detached_ids`] and left out of
    /// every traversal.
    pub fn build(records: &'a [T]) -> Self {
        let mut last_seen: HashMap<i64, usize> = HashMap::with_capacity(records.len());
        for (pos, record) in records.iter().enumerate() {
            last_seen.insert(record.id(), pos);
        }

        let mut nodes = Vec::with_capacity(last_seen.len());
        let mut index = HashMap::with_capacity(last_seen.len());
        for (pos, record) in records.iter().enumerate() {
            if last_seen.get(&record.id()) != Some(&pos) {
                warn!(id = record.id(), "Duplicate process id, keeping the last occurrence");
                continue;
            }
            index.insert(record.id(), nodes.len());
            nodes.push(TreeNode {
                record,
                children: Vec::new(),
                depth: 0,
            });
        }

        let mut roots = Vec::new();
        for i in 0..nodes.len() {
            let id = nodes[i].record.id();
            match nodes[i].record.parent_id() {
                Some(parent) if parent == id => {
                    warn!(id, "Process is its own parent, treating it as a root");
                    roots.push(i);
                }
                Some(parent) => match index.get(&parent) {
                    Some(&p) => nodes[p].children.push(i),
                    None => roots.push(i),
                },
                None => roots.push(i),
            }
        }

        let mut reached = vec![false; nodes.len()];
        let mut stack: Vec<(usize, usize)> = roots.iter().map(|&r| (r, 0)).collect();
        while let Some((i, depth)) = stack.pop() {
            reached[i] = true;
            nodes[i].depth = depth;
            for &child in &nodes[i].children {
                stack.push((child, depth + 1));
            }
        }

        let detached: Vec<i64> = nodes
            .iter()
            .zip(&reached)
            .filter(|&(_, &seen)| !seen)
            .map(|(node, _)| node.record.id())
            .collect();
        if !detached.is_empty() {
            warn!(
                count = detached.len(),
                ids = ?detached,
                "Parent cycle detected, processes are unreachable from any root"
            );
        }

        debug!(nodes = nodes.len(), roots = roots.len(), "Built process forest");

        Self {
            nodes,
            index,
            roots,
            detached,
        }
    }
}

impl<'a, T> Forest<'a, T> {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<&TreeNode<'a, T>> {
        self.index.get(&id).map(|&i| &self.nodes[i])
    }

    /// Root nodes in input order.
    pub fn roots(&self) -> impl Iterator<Item = &TreeNode<'a, T>> {
        self.roots.iter().map(|&i| &self.nodes[i])
    }

    /// Direct children of `node` in discovery order.
    pub fn children<'f>(
        &'f self,
        node: &'f TreeNode<'a, T>,
    ) -> impl Iterator<Item = &'f TreeNode<'a, T>> {
        node.children.iter().map(|&i| &self.nodes[i])
    }

    /// Ids that sit on or below a parent cycle.
    pub fn detached_ids(&self) -> &[i64] {
        &self.detached
    }
}

/// Caller-owned set of node ids whose children should be shown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpandedIds(HashSet<i64>);

impl ExpandedIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.0.contains(&id)
    }

    /// Flip the state of `id`, returning whether it is now expanded.
    pub fn toggle(&mut self, id: i64) -> bool {
        if self.0.remove(&id) {
            false
        } else {
            self.0.insert(id);
            true
        }
    }

    pub fn expand(&mut self, id: i64) {
        self.0.insert(id);
    }

    pub fn collapse(&mut self, id: i64) {
        self.0.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<i64> for ExpandedIds {
    fn from_iter<I: IntoIterator<Item = i64>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A visible row of the hierarchy.
#[derive(Debug, Clone, Serialize)]
pub struct DisplayEntry<'a, T> {
    #[serde(flatten)]
    pub record: &'a T,
    pub depth: usize,
    #[serde(rename = "hasChildren")]
    pub has_children: bool,
}

/// Produce the ordered rows to render.
///
/// Roots are always emitted. A node's children follow it only when the node
/// is in `expanded`. Every sibling group, roots included, is sorted with
/// [`compare_names`]; equal names keep input order.
pub fn flatten<'a, T: TreeRecord>(
    forest: &Forest<'a, T>,
    expanded: &ExpandedIds,
) -> Vec<DisplayEntry<'a, T>> {
    let mut entries = Vec::new();
    let mut stack = forest.sorted(&forest.roots);
    stack.reverse();

    while let Some(i) = stack.pop() {
        let node = &forest.nodes[i];
        let has_children = node.has_children();
        entries.push(DisplayEntry {
            record: node.record,
            depth: node.depth,
            has_children,
        });

        if has_children && expanded.contains(node.record.id()) {
            stack.extend(forest.sorted(&node.children).into_iter().rev());
        }
    }

    entries
}

/// Build and flatten in one call.
pub fn display_entries<'a, T: TreeRecord>(
    records: &'a [T],
    expanded: &ExpandedIds,
) -> Vec<DisplayEntry<'a, T>> {
    flatten(&Forest::build(records), expanded)
}

impl<T: TreeRecord> Forest<'_, T> {
    fn sorted(&self, group: &[usize]) -> Vec<usize> {
        let mut ordered = group.to_vec();
        // stable
        ordered.sort_by(|&a, &b| {
            compare_names(self.nodes[a].record.name(), self.nodes[b].record.name())
        });
        ordered
    }
}

/// Case-insensitive, accent-aware ordering of display names.
///
/// Names are compared first with case and Latin diacritics folded away, then
/// with case folded only, so "resume" sorts before "résumé" and both before
/// "revenue". Names differing only in case are equal.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    NameKey::new(a).cmp(&NameKey::new(b))
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct NameKey {
    base: String,
    accented: String,
}

impl NameKey {
    fn new(name: &str) -> Self {
        let accented = name.to_lowercase();
        let mut base = String::with_capacity(accented.len());
        for c in accented.chars() {
            match fold_diacritic(c) {
                Some(folded) => base.push_str(folded),
                None => base.push(c),
            }
        }
        Self { base, accented }
    }
}

fn fold_diacritic(c: char) -> Option<&'static str> {
    let folded = match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => "a",
        'æ' => "ae",
        'ç' | 'ć' | 'ĉ' | 'ċ' | 'č' => "c",
        'ď' | 'đ' | 'ð' => "d",
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => "e",
        'ĝ' | 'ğ' | 'ġ' | 'ģ' => "g",
        'ĥ' | 'ħ' => "h",
        'ì' | 'í' | 'î' | 'ï' | 'ĩ' | 'ī' | 'ĭ' | 'į' | 'ı' => "i",
        'ĵ' => "j",
        'ķ' => "k",
        'ĺ' | 'ļ' | 'ľ' | 'ŀ' | 'ł' => "l",
        'ñ' | 'ń' | 'ņ' | 'ň' => "n",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ŏ' | 'ő' => "o",
        'œ' => "oe",
        'ŕ' | 'ŗ' | 'ř' => "r",
        'ś' | 'ŝ' | 'ş' | 'š' => "s",
        'ß' => "ss",
        'ţ' | 'ť' | 'ŧ' => "t",
        'ù' | 'ú' | 'û' | 'ü' | 'ũ' | 'ū' | 'ŭ' | 'ů' | 'ű' | 'ų' => "u",
        'ŵ' => "w",
        'ý' | 'ÿ' | 'ŷ' => "y",
        'ź' | 'ż' | 'ž' => "z",
        _ => return None,
    };
    Some(folded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize)]
    struct Rec {
        id: i64,
        parent: Option<i64>,
        name: &'static str,
    }

    impl TreeRecord for Rec {
        fn id(&self) -> i64 {
            self.id
        }
        fn parent_id(&self) -> Option<i64> {
            self.parent
        }
        fn name(&self) -> &str {
            self.name
        }
    }

    fn rec(id: i64, name: &'static str, parent: Option<i64>) -> Rec {
        Rec { id, parent, name }
    }

    fn rows(records: &[Rec], expanded: &[i64]) -> Vec<(i64, usize, bool)> {
        let expanded: ExpandedIds = expanded.iter().copied().collect();
        display_entries(records, &expanded)
            .iter()
            .map(|e| (e.record.id, e.depth, e.has_children))
            .collect()
    }

    fn ids(records: &[Rec], expanded: &[i64]) -> Vec<i64> {
        rows(records, expanded).into_iter().map(|(id, _, _)| id).collect()
    }

    fn sample() -> Vec<Rec> {
        vec![
            rec(1, "B", None),
            rec(2, "A", Some(1)),
            rec(3, "C", Some(1)),
        ]
    }

    #[test]
    fn test_collapsed_root_hides_children() {
        assert_eq!(rows(&sample(), &[]), vec![(1, 0, true)]);
    }

    #[test]
    fn test_expanded_root_shows_sorted_children() {
        assert_eq!(
            rows(&sample(), &[1]),
            vec![(1, 0, true), (2, 1, false), (3, 1, false)]
        );
    }

    #[test]
    fn test_orphan_is_root() {
        let records = vec![rec(5, "Orphan", Some(999))];
        assert_eq!(rows(&records, &[]), vec![(5, 0, false)]);
    }

    #[test]
    fn test_self_reference_is_single_root() {
        let records = vec![rec(7, "Self", Some(7))];
        assert_eq!(rows(&records, &[7]), vec![(7, 0, false)]);

        let forest = Forest::build(&records);
        assert_eq!(forest.roots().count(), 1);
        assert!(forest.detached_ids().is_empty());
    }

    #[test]
    fn test_rebuild_after_delete() {
        let records: Vec<Rec> = sample().into_iter().filter(|r| r.id != 2).collect();
        assert_eq!(rows(&records, &[1]), vec![(1, 0, true), (3, 1, false)]);
    }

    #[test]
    fn test_empty_input() {
        let records: Vec<Rec> = Vec::new();
        let forest = Forest::build(&records);
        assert!(forest.is_empty());
        assert_eq!(forest.roots().count(), 0);
        assert!(flatten(&forest, &ExpandedIds::new()).is_empty());
    }

    #[test]
    fn test_idempotent() {
        let records = vec![
            rec(1, "Root", None),
            rec(2, "x", Some(1)),
            rec(3, "X", Some(1)),
            rec(4, "deep", Some(2)),
        ];
        let expanded: ExpandedIds = [1, 2].into_iter().collect();
        let first = serde_json::to_string(&display_entries(&records, &expanded)).unwrap();
        let second = serde_json::to_string(&display_entries(&records, &expanded)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_every_root_visible_regardless_of_expansion() {
        let records = vec![
            rec(1, "one", None),
            rec(2, "two", Some(40)),
            rec(3, "three", Some(1)),
            rec(4, "four", None),
        ];
        for expanded in [&[][..], &[1][..], &[1, 2, 3, 4][..]] {
            let shown = ids(&records, expanded);
            for root in [1, 2, 4] {
                assert!(shown.contains(&root), "root {root} missing for {expanded:?}");
            }
        }
    }

    #[test]
    fn test_collapse_removes_only_that_subtree() {
        let records = vec![
            rec(1, "a", None),
            rec(2, "a1", Some(1)),
            rec(3, "a1x", Some(2)),
            rec(4, "a2", Some(1)),
            rec(5, "a2x", Some(4)),
        ];
        assert_eq!(ids(&records, &[1, 2, 4]), vec![1, 2, 3, 4, 5]);
        assert_eq!(ids(&records, &[1, 4]), vec![1, 2, 4, 5]);
        // deeper expansion state is kept but hidden under a collapsed ancestor
        assert_eq!(ids(&records, &[2, 4]), vec![1]);
    }

    #[test]
    fn test_depth_counts_ancestor_edges() {
        let records = vec![
            rec(4, "d", Some(3)),
            rec(3, "c", Some(2)),
            rec(2, "b", Some(1)),
            rec(1, "a", None),
        ];
        let forest = Forest::build(&records);
        for (id, depth) in [(1, 0), (2, 1), (3, 2), (4, 3)] {
            assert_eq!(forest.get(id).unwrap().depth, depth);
        }
        assert_eq!(
            rows(&records, &[1, 2, 3]),
            vec![(1, 0, true), (2, 1, true), (3, 2, true), (4, 3, false)]
        );
    }

    #[test]
    fn test_has_children_ignores_expansion() {
        let forest_records = sample();
        let forest = Forest::build(&forest_records);
        let root = forest.get(1).unwrap();
        assert!(root.has_children());
        assert_eq!(forest.children(root).count(), 2);
        assert!(!forest.get(2).unwrap().has_children());
    }

    #[test]
    fn test_sibling_order_case_insensitive_and_stable() {
        let records = vec![
            rec(1, "banana", None),
            rec(2, "Apple", None),
            rec(3, "apple", None),
            rec(4, "Cherry", None),
            rec(5, "APPLE", None),
        ];
        assert_eq!(ids(&records, &[]), vec![2, 3, 5, 1, 4]);
    }

    #[test]
    fn test_accented_names_sort_next_to_base_letter() {
        let records = vec![
            rec(1, "Zebra", None),
            rec(2, "Éclair", None),
            rec(3, "eagle", None),
            rec(4, "Fig", None),
            rec(5, "ábaco", None),
        ];
        assert_eq!(ids(&records, &[]), vec![5, 3, 2, 4, 1]);
    }

    #[test]
    fn test_compare_names() {
        assert_eq!(compare_names("resume", "Résumé"), Ordering::Less);
        assert_eq!(compare_names("Résumé", "revenue"), Ordering::Less);
        assert_eq!(compare_names("Straße", "strasse"), Ordering::Greater);
        assert_eq!(compare_names("MiXeD", "mixed"), Ordering::Equal);
    }

    #[test]
    fn test_cycle_is_detached_and_terminates() {
        let records = vec![
            rec(1, "root", None),
            rec(2, "A", Some(3)),
            rec(3, "B", Some(2)),
            rec(4, "under cycle", Some(2)),
        ];
        let forest = Forest::build(&records);
        assert_eq!(forest.detached_ids(), &[2, 3, 4]);
        assert_eq!(ids(&records, &[1, 2, 3, 4]), vec![1]);
    }

    #[test]
    fn test_duplicate_ids_last_writer_wins() {
        let records = vec![
            rec(1, "root", None),
            rec(2, "first copy", None),
            rec(2, "second copy", Some(1)),
        ];
        let forest = Forest::build(&records);
        assert_eq!(forest.len(), 2);
        assert_eq!(forest.get(2).unwrap().record.name, "second copy");
        assert_eq!(rows(&records, &[1]), vec![(1, 0, true), (2, 1, false)]);
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let records: Vec<Rec> = (1..=50_000)
            .map(|id| rec(id, "n", if id == 1 { None } else { Some(id - 1) }))
            .collect();
        let expanded: ExpandedIds = (1..=50_000).collect();
        let entries = display_entries(&records, &expanded);
        assert_eq!(entries.len(), 50_000);
        assert_eq!(entries.last().unwrap().depth, 49_999);
    }

    #[test]
    fn test_toggle() {
        let mut expanded = ExpandedIds::new();
        assert!(expanded.toggle(3));
        assert!(expanded.contains(3));
        assert!(!expanded.toggle(3));
        assert!(expanded.is_empty());

        expanded.expand(1);
        expanded.expand(1);
        assert_eq!(expanded.len(), 1);
        expanded.collapse(1);
        assert!(!expanded.contains(1));
    }

    #[test]
    fn test_display_entry_serialization() {
        let records = sample();
        let entries = display_entries(&records, &ExpandedIds::new());
        let json = serde_json::to_value(&entries).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{"id": 1, "parent": null, "name": "B", "depth": 0, "hasChildren": true}])
        );
    }
}
