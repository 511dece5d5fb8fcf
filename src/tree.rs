use std::fmt;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TreeError;

pub const DEFAULT_STATUS: &str = "Backlog";

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Where a node lives on the canvas.
///
/// The root stores an absolute centre; every other node stores an offset from
/// its parent's resolved centre. `Unset` means the layout engine still has to
/// place the node.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Position {
    #[default]
    Unset,
    Absolute {
        x: f32,
        y: f32,
    },
    Relative {
        dx: f32,
        dy: f32,
    },
}

impl Position {
    pub fn absolute(point: Point) -> Self {
        Position::Absolute {
            x: point.x,
            y: point.y,
        }
    }

    pub fn relative(offset: Point) -> Self {
        Position::Relative {
            dx: offset.x,
            dy: offset.y,
        }
    }

    /// Stores `resolved` against `parent`: relative when there is a parent,
    /// absolute for the root.
    pub fn anchored(resolved: Point, parent: Option<Point>) -> Self {
        match parent {
            Some(parent) => Position::relative(resolved - parent),
            None => Position::absolute(resolved),
        }
    }

    pub fn is_set(&self) -> bool {
        !matches!(self, Position::Unset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Team,
    Project,
    Issue,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Team => "team",
            NodeType::Project => "project",
            NodeType::Issue => "issue",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            NodeType::Team => "Team",
            NodeType::Project => "Project",
            NodeType::Issue => "Issue",
        }
    }

    /// Teams and projects are synthetic grouping nodes.
    pub fn is_protected(&self) -> bool {
        !matches!(self, NodeType::Issue)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Team and project attributes a node inherits from its parent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lineage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
}

impl Lineage {
    /// A team passes on only itself; projects and issues pass on team and
    /// project.
    pub fn inherited_from(parent: &Node) -> Self {
        match parent.node_type {
            NodeType::Team => Lineage {
                team_id: parent.lineage.team_id.clone(),
                team_name: parent.lineage.team_name.clone(),
                project_id: None,
                project_name: None,
            },
            NodeType::Project | NodeType::Issue => parent.lineage.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignee {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub status: String,
    pub node_type: NodeType,
    #[serde(flatten)]
    pub lineage: Lineage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<Assignee>,
    #[serde(default)]
    pub collapsed: bool,
    #[serde(default = "default_true")]
    pub is_filtered: bool,
    #[serde(default)]
    pub is_greyed_out: bool,
    #[serde(default)]
    pub diverged: bool,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub children: Vec<Node>,
}

fn default_true() -> bool {
    true
}

/// Partial edit of a node's content fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// `Some(None)` clears the assignee.
    #[serde(default)]
    pub assignee: Option<Option<Assignee>>,
}

impl NodePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.assignee.is_none()
    }
}

impl Node {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        node_type: NodeType,
        status: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            name: name.into(),
            description: String::new(),
            status: status.into(),
            node_type,
            lineage: Lineage::default(),
            assignee: None,
            collapsed: false,
            is_filtered: true,
            is_greyed_out: false,
            diverged: false,
            position: Position::Unset,
            children: Vec::new(),
        }
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn find(&self, id: &str) -> Option<&Node> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Node> {
        if self.id == id {
            return Some(self);
        }
        self.children
            .iter_mut()
            .find_map(|child| child.find_mut(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    /// Returns the node whose `children` hold `id`.
    pub fn parent_of(&self, id: &str) -> Option<&Node> {
        if self.children.iter().any(|child| child.id == id) {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.parent_of(id))
    }

    /// Ids from the root down to (and including) `id`.
    pub fn path_to(&self, id: &str) -> Option<Vec<String>> {
        if self.id == id {
            return Some(vec![self.id.clone()]);
        }
        for child in &self.children {
            if let Some(mut path) = child.path_to(id) {
                path.insert(0, self.id.clone());
                return Some(path);
            }
        }
        None
    }

    /// Pre-order visit of this node and every descendant.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Node)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    pub fn walk_mut(&mut self, visit: &mut impl FnMut(&mut Node)) {
        visit(self);
        for child in &mut self.children {
            child.walk_mut(visit);
        }
    }

    pub fn count(&self) -> usize {
        1 + self.children.iter().map(Node::count).sum::<usize>()
    }

    /// Appends a new issue child that inherits this node's lineage. The child
    /// has no position yet.
    pub fn add_child(&mut self, name: impl Into<String>) -> &mut Node {
        let mut child = Node::new(
            Uuid::new_v4().to_string(),
            name,
            NodeType::Issue,
            DEFAULT_STATUS,
        );
        child.parent_id = Some(self.id.clone());
        child.lineage = Lineage::inherited_from(self);
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    /// Attaches an already-built node under `parent_id`.
    pub fn attach(&mut self, parent_id: &str, mut child: Node) -> Result<&mut Node, TreeError> {
        let parent = self
            .find_mut(parent_id)
            .ok_or_else(|| TreeError::NotFound(parent_id.to_string()))?;
        child.parent_id = Some(parent.id.clone());
        parent.children.push(child);
        let last = parent.children.len() - 1;
        Ok(&mut parent.children[last])
    }

    /// Checks whether `id` may be deleted without touching the tree.
    pub fn check_deletable(&self, id: &str) -> Result<&Node, TreeError> {
        if self.id == id {
            return Err(TreeError::ProtectedRoot);
        }
        let target = self
            .find(id)
            .ok_or_else(|| TreeError::NotFound(id.to_string()))?;
        if target.node_type.is_protected() {
            return Err(TreeError::ProtectedType(target.node_type));
        }
        Ok(target)
    }

    /// Removes an issue node and its subtree. The root, teams and projects are
    /// refused and the tree is left untouched.
    pub fn delete_by_id(&mut self, id: &str) -> Result<Node, TreeError> {
        self.check_deletable(id)?;
        self.detach(id)
            .ok_or_else(|| TreeError::NotFound(id.to_string()))
    }

    fn detach(&mut self, id: &str) -> Option<Node> {
        if let Some(index) = self.children.iter().position(|child| child.id == id) {
            return Some(self.children.remove(index));
        }
        self.children.iter_mut().find_map(|child| child.detach(id))
    }

    /// Moves `node_id` (with its subtree) under `new_parent_id`.
    ///
    /// The moved node and all of its descendants re-derive their lineage from
    /// the new parent. The moved node loses its stored position so the layout
    /// engine places it next to the new parent; descendants keep their
    /// offsets.
    pub fn reparent(&mut self, node_id: &str, new_parent_id: &str) -> Result<(), TreeError> {
        if node_id == new_parent_id {
            return Err(TreeError::SelfParent(node_id.to_string()));
        }
        if self.id == node_id {
            return Err(TreeError::RootMove);
        }
        let moving = self
            .find(node_id)
            .ok_or_else(|| TreeError::NotFound(node_id.to_string()))?;
        if moving.contains(new_parent_id) {
            return Err(TreeError::DescendantParent {
                node: node_id.to_string(),
                target: new_parent_id.to_string(),
            });
        }
        if !self.contains(new_parent_id) {
            return Err(TreeError::NotFound(new_parent_id.to_string()));
        }

        let mut node = self
            .detach(node_id)
            .ok_or_else(|| TreeError::NotFound(node_id.to_string()))?;
        let new_parent = self
            .find_mut(new_parent_id)
            .ok_or_else(|| TreeError::NotFound(new_parent_id.to_string()))?;

        node.parent_id = Some(new_parent.id.clone());
        node.position = Position::Unset;
        node.inherit_from(new_parent);
        new_parent.children.push(node);
        Ok(())
    }

    /// Re-derives lineage for this node from `parent`, then cascades down.
    /// A team keeps its own lineage and a project keeps its project fields.
    fn inherit_from(&mut self, parent: &Node) {
        let inherited = Lineage::inherited_from(parent);
        match self.node_type {
            NodeType::Team => {}
            NodeType::Project => {
                self.lineage.team_id = inherited.team_id;
                self.lineage.team_name = inherited.team_name;
            }
            NodeType::Issue => self.lineage = inherited,
        }
        let snapshot = self.lineage_carrier();
        for child in &mut self.children {
            child.inherit_from(&snapshot);
        }
    }

    /// A childless stand-in that carries just enough to act as a parent for
    /// lineage inheritance.
    fn lineage_carrier(&self) -> Node {
        let mut carrier = Node::new(self.id.clone(), String::new(), self.node_type, "");
        carrier.lineage = self.lineage.clone();
        carrier
    }

    /// Flips `collapsed` when the node has children. Returns the new state.
    pub fn toggle_collapsed(&mut self) -> bool {
        if self.has_children() {
            self.collapsed = !self.collapsed;
        }
        self.collapsed
    }

    pub fn apply_patch(&mut self, patch: &NodePatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(status) = &patch.status {
            self.status = status.clone();
        }
        if let Some(assignee) = &patch.assignee {
            self.assignee = assignee.clone();
        }
    }

    /// True when any node in the tree carries a stored position.
    pub fn has_stored_positions(&self) -> bool {
        self.position.is_set() || self.children.iter().any(Node::has_stored_positions)
    }

    pub fn clear_positions(&mut self) {
        self.walk_mut(&mut |node| node.position = Position::Unset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn team(id: &str) -> Node {
        let mut node = Node::new(format!("team-{id}"), format!("Team {id}"), NodeType::Team, "In Progress");
        node.lineage.team_id = Some(id.to_string());
        node.lineage.team_name = Some(format!("Team {id}"));
        node
    }

    fn project(team: &Node, id: &str) -> Node {
        let mut node = Node::new(
            format!("project-{id}"),
            format!("Project {id}"),
            NodeType::Project,
            "In Progress",
        );
        node.lineage = team.lineage.clone();
        node.lineage.project_id = Some(id.to_string());
        node.lineage.project_name = Some(format!("Project {id}"));
        node
    }

    fn sample() -> Node {
        let mut root = team("eng");
        let mut proj = project(&root, "p1");
        proj.parent_id = Some(root.id.clone());
        let issue = proj.add_child("Parent issue");
        issue.add_child("Child issue");
        root.children.push(proj);
        root.add_child("Loose issue");
        root
    }

    #[test]
    fn find_returns_first_match_and_none_for_unknown() {
        let root = sample();
        assert_eq!(root.find("project-p1").map(|n| n.name.as_str()), Some("Project p1"));
        assert!(root.find("missing").is_none());
        assert_eq!(root.count(), 5);
    }

    #[test]
    fn add_child_inherits_by_parent_type() {
        let mut root = sample();

        let from_team = root.add_child("under team");
        assert_eq!(from_team.node_type, NodeType::Issue);
        assert_eq!(from_team.lineage.team_id.as_deref(), Some("eng"));
        assert!(from_team.lineage.project_id.is_none());
        assert_eq!(from_team.position, Position::Unset);

        let proj = root.find_mut("project-p1").unwrap();
        let from_project = proj.add_child("under project");
        assert_eq!(from_project.lineage.project_id.as_deref(), Some("p1"));
        assert_eq!(from_project.lineage.team_name.as_deref(), Some("Team eng"));
        assert_eq!(from_project.status, DEFAULT_STATUS);
    }

    #[test]
    fn protected_nodes_are_not_deleted() {
        let mut root = sample();
        let before = root.clone();

        assert_eq!(
            root.delete_by_id("project-p1"),
            Err(TreeError::ProtectedType(NodeType::Project))
        );
        assert_eq!(root.delete_by_id("team-eng"), Err(TreeError::ProtectedRoot));
        assert_eq!(root, before);
    }

    #[test]
    fn deleting_an_issue_removes_its_subtree() {
        let mut root = sample();
        let parent_id = root.find("project-p1").unwrap().children[0].id.clone();

        let removed = root.delete_by_id(&parent_id).unwrap();
        assert_eq!(removed.children.len(), 1);
        assert_eq!(root.count(), 3);
        assert!(matches!(root.delete_by_id("nope"), Err(TreeError::NotFound(_))));
    }

    #[test]
    fn reparent_cascades_lineage_to_descendants() {
        let mut root = sample();
        let mut other = team("ops");
        other.children.push({
            let mut p = project(&other, "p2");
            p.parent_id = Some(other.id.clone());
            p
        });
        let mut workspace = Node::new("virtual-root", "Teams", NodeType::Team, "In Progress");
        root.parent_id = Some(workspace.id.clone());
        other.parent_id = Some(workspace.id.clone());
        workspace.children = vec![root, other];

        let moving = workspace.find("project-p1").unwrap().children[0].id.clone();
        workspace.reparent(&moving, "project-p2").unwrap();

        let moved = workspace.find(&moving).unwrap();
        assert_eq!(moved.parent_id.as_deref(), Some("project-p2"));
        assert_eq!(moved.lineage.team_id.as_deref(), Some("ops"));
        assert_eq!(moved.lineage.project_id.as_deref(), Some("p2"));
        let child = &moved.children[0];
        assert_eq!(child.lineage.team_id.as_deref(), Some("ops"));
        assert_eq!(child.lineage.project_name.as_deref(), Some("Project p2"));
        assert!(workspace.find("project-p1").unwrap().children.is_empty());
    }

    #[test]
    fn reparent_under_team_drops_project() {
        let mut root = sample();
        let moving = root.find("project-p1").unwrap().children[0].id.clone();
        root.reparent(&moving, "team-eng").unwrap();
        let moved = root.find(&moving).unwrap();
        assert!(moved.lineage.project_id.is_none());
        assert!(moved.children[0].lineage.project_id.is_none());
        assert_eq!(moved.children[0].lineage.team_id.as_deref(), Some("eng"));
    }

    #[test]
    fn moved_project_keeps_its_identity_under_another_team() {
        let mut eng = sample();
        let mut ops = team("ops");
        let mut workspace = Node::new("virtual-root", "Teams", NodeType::Team, "In Progress");
        eng.parent_id = Some(workspace.id.clone());
        ops.parent_id = Some(workspace.id.clone());
        workspace.children = vec![eng, ops];

        workspace.reparent("project-p1", "team-ops").unwrap();

        let moved = workspace.find("project-p1").unwrap();
        assert_eq!(moved.parent_id.as_deref(), Some("team-ops"));
        assert_eq!(moved.lineage.team_id.as_deref(), Some("ops"));
        assert_eq!(moved.lineage.project_id.as_deref(), Some("p1"));
        assert_eq!(moved.lineage.project_name.as_deref(), Some("Project p1"));
        let mut issues = Vec::new();
        moved.walk(&mut |node| {
            if node.node_type == NodeType::Issue {
                issues.push(node.lineage.clone());
            }
        });
        assert_eq!(issues.len(), 2);
        for lineage in issues {
            assert_eq!(lineage.team_id.as_deref(), Some("ops"));
            assert_eq!(lineage.project_id.as_deref(), Some("p1"));
        }
    }

    #[test]
    fn reparent_refuses_invalid_moves() {
        let mut root = sample();
        let before = root.clone();
        let parent_id = root.find("project-p1").unwrap().children[0].id.clone();
        let child_id = root.find(&parent_id).unwrap().children[0].id.clone();

        assert!(matches!(
            root.reparent(&parent_id, &parent_id),
            Err(TreeError::SelfParent(_))
        ));
        assert_eq!(root.reparent("team-eng", &parent_id), Err(TreeError::RootMove));
        assert!(matches!(
            root.reparent(&parent_id, &child_id),
            Err(TreeError::DescendantParent { .. })
        ));
        assert!(matches!(
            root.reparent(&parent_id, "missing"),
            Err(TreeError::NotFound(_))
        ));
        assert_eq!(root, before);
    }

    #[test]
    fn reparent_resets_only_the_moved_position() {
        let mut root = sample();
        let parent_id = root.find("project-p1").unwrap().children[0].id.clone();
        {
            let node = root.find_mut(&parent_id).unwrap();
            node.position = Position::relative(Point::new(300.0, 40.0));
            node.children[0].position = Position::relative(Point::new(250.0, 0.0));
        }
        root.reparent(&parent_id, "team-eng").unwrap();
        let moved = root.find(&parent_id).unwrap();
        assert_eq!(moved.position, Position::Unset);
        assert_eq!(moved.children[0].position, Position::relative(Point::new(250.0, 0.0)));
    }

    #[test]
    fn toggle_collapsed_requires_children() {
        let mut root = sample();
        assert!(root.toggle_collapsed());
        assert!(!root.toggle_collapsed());
        let leaf = root.find_mut("project-p1").unwrap().children[0].children[0].id.clone();
        assert!(!root.find_mut(&leaf).unwrap().toggle_collapsed());
    }

    #[test]
    fn patch_updates_only_given_fields() {
        let mut node = Node::new("1", "Old", NodeType::Issue, "Todo");
        node.description = "keep".into();
        node.apply_patch(&NodePatch {
            name: Some("New".into()),
            assignee: Some(Some(Assignee {
                id: Some("u1".into()),
                name: Some("Ada".into()),
                email: None,
            })),
            ..NodePatch::default()
        });
        assert_eq!(node.name, "New");
        assert_eq!(node.description, "keep");
        assert_eq!(node.status, "Todo");
        assert_eq!(node.assignee.as_ref().and_then(|a| a.name.as_deref()), Some("Ada"));
    }

    #[test]
    fn position_anchoring() {
        let parent = Point::new(100.0, 50.0);
        assert_eq!(
            Position::anchored(Point::new(400.0, 80.0), Some(parent)),
            Position::relative(Point::new(300.0, 30.0))
        );
        assert_eq!(
            Position::anchored(parent, None),
            Position::absolute(parent)
        );
    }
}
