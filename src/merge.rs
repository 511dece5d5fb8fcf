use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::convert::{IssueRecord, convert_records};
use crate::tree::{Assignee, Node, Position};

/// Presentation state of one node that must survive a refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedNode {
    pub position: Position,
    pub collapsed: bool,
    pub assignee: Option<Assignee>,
    pub diverged: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LayoutSnapshot {
    pub nodes: HashMap<String, CapturedNode>,
    /// Diverged local nodes keyed by their parent id, kept so a refresh does
    /// not silently drop edits the tracker never accepted.
    local_only: Vec<(String, Node)>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub preserved: usize,
    pub unplaced: usize,
    pub carried: usize,
}

/// Records position, collapse state, assignee and divergence for every node,
/// keyed by id.
pub fn capture_layout(root: &Node) -> LayoutSnapshot {
    let mut snapshot = LayoutSnapshot::default();
    root.walk(&mut |node| {
        snapshot.nodes.insert(
            node.id.clone(),
            CapturedNode {
                position: node.position,
                collapsed: node.collapsed,
                assignee: node.assignee.clone(),
                diverged: node.diverged,
            },
        );
    });
    collect_local_only(root, &mut snapshot.local_only);
    snapshot
}

fn collect_local_only(node: &Node, out: &mut Vec<(String, Node)>) {
    for child in &node.children {
        if child.diverged {
            out.push((node.id.clone(), child.clone()));
        } else {
            collect_local_only(child, out);
        }
    }
}

/// Copies captured state onto matching nodes of `fresh`. Nodes with no match
/// keep `Position::Unset` and are placed by the next layout pass.
pub fn apply_snapshot(fresh: &mut Node, snapshot: &LayoutSnapshot) -> MergeStats {
    let mut stats = MergeStats::default();
    fresh.walk_mut(&mut |node| match snapshot.nodes.get(&node.id) {
        Some(captured) => {
            node.position = captured.position;
            node.collapsed = captured.collapsed && node.has_children();
            node.diverged = captured.diverged;
            if node.assignee.is_none() {
                node.assignee = captured.assignee.clone();
            }
            stats.preserved += 1;
        }
        None => stats.unplaced += 1,
    });

    let mut present = HashSet::new();
    fresh.walk(&mut |node| {
        present.insert(node.id.clone());
    });
    for (parent_id, node) in &snapshot.local_only {
        if present.contains(&node.id) {
            continue;
        }
        let Some(carried) = without_ids(node, &present) else {
            continue;
        };
        if let Some(parent) = fresh.find_mut(parent_id) {
            parent.children.push(carried);
            stats.carried += 1;
        }
    }
    stats
}

/// Clone of `node` minus any descendant already present in the fresh tree.
fn without_ids(node: &Node, present: &HashSet<String>) -> Option<Node> {
    if present.contains(&node.id) {
        return None;
    }
    let mut copy = node.clone();
    copy.children = node
        .children
        .iter()
        .filter_map(|child| without_ids(child, present))
        .collect();
    Some(copy)
}

/// Rebuilds the tree from a fresh dataset while keeping the presentation
/// state of `existing`.
pub fn merge_records(
    existing: Option<&Node>,
    filtered: &[IssueRecord],
    all: &[IssueRecord],
) -> Node {
    let mut fresh = convert_records(filtered, Some(all));
    let Some(existing) = existing else {
        return fresh;
    };
    let snapshot = capture_layout(existing);
    let stats = apply_snapshot(&mut fresh, &snapshot);
    debug!(
        preserved = stats.preserved,
        unplaced = stats.unplaced,
        carried = stats.carried,
        "merged fresh records"
    );
    fresh
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::fixtures::*;
    use crate::layout::{EstimatedText, LayoutConfig, layout};
    use crate::tree::Point;

    fn records() -> Vec<IssueRecord> {
        vec![
            record("1", "Epic"),
            with_parent(record("2", "Task"), "1"),
            record("3", "Chore"),
        ]
    }

    fn laid_out() -> Node {
        let records = records();
        let mut root = convert_records(&records, None);
        layout(&mut root, &EstimatedText, &LayoutConfig::default());
        root
    }

    #[test]
    fn merging_same_data_twice_is_stable() {
        let records = records();
        let mut root = laid_out();
        root.find_mut("3").unwrap().position = Position::relative(Point::new(420.0, 75.0));
        root.find_mut("1").unwrap().collapsed = true;

        let once = merge_records(Some(&root), &records, &records);
        let twice = merge_records(Some(&once), &records, &records);

        assert_eq!(once, twice);
        assert_eq!(
            once.find("3").unwrap().position,
            Position::relative(Point::new(420.0, 75.0))
        );
        assert!(once.find("1").unwrap().collapsed);
        assert_eq!(once.position, root.position);
    }

    #[test]
    fn new_records_arrive_unplaced() {
        let mut records = records();
        let root = laid_out();
        records.push(record("4", "Fresh"));

        let merged = merge_records(Some(&root), &records, &records);
        assert_eq!(merged.find("4").unwrap().position, Position::Unset);
        assert!(merged.find("2").unwrap().position.is_set());
    }

    #[test]
    fn captured_assignee_only_fills_gaps() {
        let records = records();
        let mut root = laid_out();
        root.find_mut("3").unwrap().assignee = Some(Assignee {
            id: Some("u1".into()),
            name: Some("Local".into()),
            email: None,
        });

        let merged = merge_records(Some(&root), &records, &records);
        assert_eq!(
            merged.find("3").unwrap().assignee.as_ref().and_then(|a| a.name.as_deref()),
            Some("Local")
        );

        let mut remote = records.clone();
        remote[2].assignee = Some(Assignee {
            id: Some("u2".into()),
            name: Some("Remote".into()),
            email: None,
        });
        let merged = merge_records(Some(&root), &remote, &remote);
        assert_eq!(
            merged.find("3").unwrap().assignee.as_ref().and_then(|a| a.name.as_deref()),
            Some("Remote")
        );
    }

    #[test]
    fn diverged_local_nodes_survive_refresh() {
        let records = records();
        let mut root = laid_out();
        let local = root.find_mut("1").unwrap().add_child("Not yet upstream");
        local.diverged = true;
        let local_id = local.id.clone();

        let merged = merge_records(Some(&root), &records, &records);
        let carried = merged.find(&local_id).unwrap();
        assert!(carried.diverged);
        assert_eq!(carried.parent_id.as_deref(), Some("1"));

        let again = merge_records(Some(&merged), &records, &records);
        assert_eq!(merged, again);
    }

    #[test]
    fn group_nodes_keep_their_state() {
        let records = records();
        let mut root = laid_out();
        root.position = Position::absolute(Point::new(250.0, 125.0));
        let merged = merge_records(Some(&root), &records, &records);
        assert_eq!(merged.position, Position::absolute(Point::new(250.0, 125.0)));
    }
}
