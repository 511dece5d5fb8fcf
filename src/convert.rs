use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::tree::{Assignee, DEFAULT_STATUS, Lineage, Node, NodeType};

pub const VIRTUAL_ROOT_ID: &str = "virtual-root";
pub const UNASSIGNED_TEAM_ID: &str = "team-unassigned";
const GROUP_STATUS: &str = "In Progress";

/// One issue as delivered by the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<RecordRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StateRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<Assignee>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<TeamRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StateRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TeamRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl TeamRef {
    pub fn label(&self) -> Option<&str> {
        self.name.as_deref().or(self.key.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProjectRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl IssueRecord {
    pub fn parent_id(&self) -> Option<&str> {
        self.parent.as_ref().map(|parent| parent.id.as_str())
    }

    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|title| !title.is_empty())
            .or(self.identifier.as_deref())
            .unwrap_or("Untitled Issue")
    }

    pub fn status_label(&self) -> &str {
        self.state
            .as_ref()
            .map(|state| state.name.as_str())
            .unwrap_or("Unknown")
    }

    pub fn assignee_label(&self) -> &str {
        self.assignee
            .as_ref()
            .and_then(|assignee| assignee.name.as_deref())
            .unwrap_or("Unassigned")
    }

    fn team_key(&self) -> Option<(&str, &str)> {
        let team = self.team.as_ref()?;
        Some((team.id.as_str(), team.label()?))
    }

    fn project_key(&self) -> Option<(&str, &str)> {
        let project = self.project.as_ref()?;
        Some((project.id.as_str(), project.name.as_deref()?))
    }

    fn to_node(&self, parent_id: &str, visible: bool) -> Node {
        let status = self
            .state
            .as_ref()
            .map(|state| state.name.clone())
            .unwrap_or_else(|| DEFAULT_STATUS.to_string());
        let mut node = Node::new(self.id.clone(), self.display_title(), NodeType::Issue, status);
        node.parent_id = Some(parent_id.to_string());
        node.description = self.description.clone().unwrap_or_default();
        node.lineage = Lineage {
            team_id: self.team.as_ref().map(|team| team.id.clone()),
            team_name: self
                .team
                .as_ref()
                .and_then(|team| team.label().map(str::to_string)),
            project_id: self.project.as_ref().map(|project| project.id.clone()),
            project_name: self.project.as_ref().and_then(|project| project.name.clone()),
        };
        node.assignee = self.assignee.clone();
        node.is_filtered = visible;
        node.is_greyed_out = !visible;
        node
    }
}

/// Status/assignee multi-select filter. An empty selection on either axis
/// matches every record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFilter {
    #[serde(default)]
    pub statuses: BTreeSet<String>,
    #[serde(default)]
    pub assignees: BTreeSet<String>,
}

impl RecordFilter {
    pub fn matches(&self, record: &IssueRecord) -> bool {
        let status_ok = self.statuses.is_empty() || self.statuses.contains(record.status_label());
        let assignee_ok =
            self.assignees.is_empty() || self.assignees.contains(record.assignee_label());
        status_ok && assignee_ok
    }

    pub fn apply(&self, records: &[IssueRecord]) -> Vec<IssueRecord> {
        records
            .iter()
            .filter(|record| self.matches(record))
            .cloned()
            .collect()
    }
}

/// Distinct filter labels with their record counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOptions {
    pub statuses: BTreeMap<String, usize>,
    pub assignees: BTreeMap<String, usize>,
}

pub fn filter_options(records: &[IssueRecord]) -> FilterOptions {
    let mut options = FilterOptions::default();
    for record in records {
        *options
            .statuses
            .entry(record.status_label().to_string())
            .or_default() += 1;
        *options
            .assignees
            .entry(record.assignee_label().to_string())
            .or_default() += 1;
    }
    options
}

struct Group<'a> {
    id: String,
    name: String,
    issues: Vec<&'a IssueRecord>,
}

/// Keeps first-seen order of groups.
fn group_by<'a>(
    issues: impl IntoIterator<Item = &'a IssueRecord>,
    key: impl Fn(&'a IssueRecord) -> Option<(&'a str, &'a str)>,
) -> (Vec<Group<'a>>, Vec<&'a IssueRecord>) {
    let mut groups: Vec<Group<'a>> = Vec::new();
    let mut loose = Vec::new();
    for issue in issues {
        match key(issue) {
            Some((id, name)) => match groups.iter_mut().find(|group| group.id == id) {
                Some(group) => group.issues.push(issue),
                None => groups.push(Group {
                    id: id.to_string(),
                    name: name.to_string(),
                    issues: vec![issue],
                }),
            },
            None => loose.push(issue),
        }
    }
    (groups, loose)
}

struct Converter<'a> {
    visible: HashSet<&'a str>,
    processed: HashSet<&'a str>,
    children: HashMap<&'a str, Vec<&'a IssueRecord>>,
    placed: HashSet<&'a str>,
}

impl<'a> Converter<'a> {
    fn new(filtered: &'a [IssueRecord], processed: &[&'a IssueRecord]) -> Self {
        let mut children: HashMap<&str, Vec<&IssueRecord>> = HashMap::new();
        for issue in processed {
            if let Some(parent) = issue.parent_id() {
                children.entry(parent).or_default().push(issue);
            }
        }
        Self {
            visible: filtered.iter().map(|issue| issue.id.as_str()).collect(),
            processed: processed.iter().map(|issue| issue.id.as_str()).collect(),
            children,
            placed: HashSet::new(),
        }
    }

    fn is_group_root(&self, issue: &IssueRecord) -> bool {
        match issue.parent_id() {
            Some(parent) => !self.processed.contains(parent),
            None => true,
        }
    }

    fn build(&mut self, issue: &'a IssueRecord, parent_id: &str) -> Option<Node> {
        if !self.placed.insert(issue.id.as_str()) {
            return None;
        }
        let mut node = issue.to_node(parent_id, self.visible.contains(issue.id.as_str()));
        let kids = self.children.get(issue.id.as_str()).cloned().unwrap_or_default();
        for child in kids {
            if let Some(child_node) = self.build(child, &node.id) {
                node.children.push(child_node);
            }
        }
        Some(node)
    }

    /// Attaches the roots of `issues` under `parent`. Issues caught in a parent
    /// cycle are never reached from a root; they are hung directly on `parent`
    /// so nothing disappears.
    fn attach_roots(&mut self, parent: &mut Node, issues: &[&'a IssueRecord]) {
        let roots: Vec<&'a IssueRecord> = issues
            .iter()
            .copied()
            .filter(|issue| self.is_group_root(issue))
            .collect();
        for issue in roots {
            if let Some(node) = self.build(issue, &parent.id) {
                parent.children.push(node);
            }
        }
    }

    fn attach_stragglers(&mut self, parent: &mut Node, issues: &[&'a IssueRecord]) {
        for issue in issues {
            if self.placed.contains(issue.id.as_str()) {
                continue;
            }
            if let Some(node) = self.build(issue, &parent.id) {
                parent.children.push(node);
            }
        }
    }
}

fn team_node(id: &str, name: &str) -> Node {
    let mut node = Node::new(format!("team-{id}"), name, NodeType::Team, GROUP_STATUS);
    node.description = format!("Team: {name}");
    node.lineage.team_id = Some(id.to_string());
    node.lineage.team_name = Some(name.to_string());
    node
}

fn project_node(team: &Node, id: &str, name: &str) -> Node {
    let team_id = team.lineage.team_id.as_deref().unwrap_or_default();
    let mut node = Node::new(
        format!("project-{team_id}-{id}"),
        name,
        NodeType::Project,
        GROUP_STATUS,
    );
    node.parent_id = Some(team.id.clone());
    node.description = format!("Project: {name}");
    node.lineage = Lineage {
        team_id: team.lineage.team_id.clone(),
        team_name: team.lineage.team_name.clone(),
        project_id: Some(id.to_string()),
        project_name: Some(name.to_string()),
    };
    node
}

pub fn virtual_root(teams: Vec<Node>) -> Node {
    let mut root = Node::new(VIRTUAL_ROOT_ID, "Teams", NodeType::Team, GROUP_STATUS);
    root.description = "Multiple teams".to_string();
    root.children = teams
        .into_iter()
        .map(|mut team| {
            team.parent_id = Some(VIRTUAL_ROOT_ID.to_string());
            team
        })
        .collect();
    root
}

/// Builds the hierarchy from `filtered` records.
///
/// `all` is the unfiltered record set used to pull in the ancestors of
/// filtered issues; those ancestors come back greyed out. Records are grouped
/// by team, then by project; issues whose parent is not part of the processed
/// set become roots of their group.
pub fn convert_records(filtered: &[IssueRecord], all: Option<&[IssueRecord]>) -> Node {
    if filtered.is_empty() {
        return virtual_root(Vec::new());
    }
    let all = all.unwrap_or(filtered);

    let visible: HashSet<&str> = filtered.iter().map(|issue| issue.id.as_str()).collect();
    let by_id: HashMap<&str, &IssueRecord> =
        all.iter().map(|issue| (issue.id.as_str(), issue)).collect();

    let mut processed: Vec<&IssueRecord> = filtered.iter().collect();
    let mut synthesized: HashSet<&str> = HashSet::new();
    for issue in filtered {
        let mut cursor = issue.parent_id();
        while let Some(parent_id) = cursor {
            if visible.contains(parent_id) || synthesized.contains(parent_id) {
                break;
            }
            let Some(parent) = by_id.get(parent_id) else {
                break;
            };
            synthesized.insert(parent_id);
            processed.push(parent);
            cursor = parent.parent_id();
        }
    }
    debug!(
        filtered = filtered.len(),
        ancestors = synthesized.len(),
        "converting records"
    );

    let mut converter = Converter::new(filtered, &processed);
    let (team_groups, teamless) = group_by(processed.iter().copied(), IssueRecord::team_key);

    let mut teams = Vec::with_capacity(team_groups.len() + 1);
    for team_group in &team_groups {
        let mut team = team_node(&team_group.id, &team_group.name);
        let (project_groups, projectless) =
            group_by(team_group.issues.iter().copied(), IssueRecord::project_key);
        for project_group in &project_groups {
            let mut project = project_node(&team, &project_group.id, &project_group.name);
            converter.attach_roots(&mut project, &project_group.issues);
            team.children.push(project);
        }
        converter.attach_roots(&mut team, &projectless);
        teams.push(team);
    }

    if !teamless.is_empty() {
        let mut unassigned = Node::new(
            UNASSIGNED_TEAM_ID,
            "Unassigned Team",
            NodeType::Team,
            DEFAULT_STATUS,
        );
        unassigned.description = "Issues without team assignment".to_string();
        converter.attach_roots(&mut unassigned, &teamless);
        teams.push(unassigned);
    }

    for (team, group) in teams.iter_mut().zip(team_groups.iter()) {
        converter.attach_stragglers(team, &group.issues);
    }
    if let Some(unassigned) = teams.iter_mut().find(|team| team.id == UNASSIGNED_TEAM_ID) {
        converter.attach_stragglers(unassigned, &teamless);
    }

    if teams.len() == 1 {
        teams.remove(0)
    } else {
        virtual_root(teams)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn flat_records_hang_off_a_single_team_root() {
        let records = vec![record("1", "One"), record("2", "Two"), record("3", "Three")];
        let root = convert_records(&records, None);

        assert_eq!(root.id, "team-eng");
        assert_eq!(root.node_type, NodeType::Team);
        assert!(root.parent_id.is_none());
        assert_eq!(root.children.len(), 3);
        for child in &root.children {
            assert_eq!(child.node_type, NodeType::Issue);
            assert_eq!(child.parent_id.as_deref(), Some("team-eng"));
            assert_eq!(child.lineage.team_id.as_deref(), Some("eng"));
            assert_eq!(child.lineage.team_name.as_deref(), Some("Engineering"));
            assert!(child.lineage.project_id.is_none());
        }
    }

    #[test]
    fn projects_group_issues_and_children_nest() {
        let records = vec![
            with_project(record("1", "Epic"), "p1", "Platform"),
            with_parent(with_project(record("2", "Task"), "p1", "Platform"), "1"),
            record("3", "Loose"),
        ];
        let root = convert_records(&records, None);

        assert_eq!(root.children.len(), 2);
        let project = &root.children[0];
        assert_eq!(project.id, "project-eng-p1");
        assert_eq!(project.node_type, NodeType::Project);
        assert_eq!(project.children.len(), 1);
        assert_eq!(project.children[0].children[0].id, "2");
        assert_eq!(project.children[0].children[0].parent_id.as_deref(), Some("1"));
        assert_eq!(root.children[1].id, "3");
    }

    #[test]
    fn several_teams_get_a_virtual_root() {
        let records = vec![
            record("1", "Eng issue"),
            with_team(record("2", "Ops issue"), "ops", "Operations"),
            IssueRecord {
                id: "3".into(),
                title: Some("Orphan".into()),
                ..IssueRecord::default()
            },
        ];
        let root = convert_records(&records, None);

        assert_eq!(root.id, VIRTUAL_ROOT_ID);
        let ids: Vec<_> = root.children.iter().map(|team| team.id.as_str()).collect();
        assert_eq!(ids, ["team-eng", "team-ops", UNASSIGNED_TEAM_ID]);
        assert!(
            root.children
                .iter()
                .all(|team| team.parent_id.as_deref() == Some(VIRTUAL_ROOT_ID))
        );
        assert_eq!(root.children[2].children[0].status, DEFAULT_STATUS);
    }

    #[test]
    fn missing_ancestors_are_synthesized_greyed_out() {
        let all = vec![
            record("1", "Grandparent"),
            with_parent(record("2", "Parent"), "1"),
            with_status(with_parent(record("3", "Leaf"), "2"), "Done"),
        ];
        let filtered = vec![all[2].clone()];
        let root = convert_records(&filtered, Some(&all));

        assert_eq!(root.children.len(), 1);
        let grandparent = &root.children[0];
        assert_eq!(grandparent.id, "1");
        assert!(grandparent.is_greyed_out);
        assert!(!grandparent.is_filtered);
        let parent = &grandparent.children[0];
        assert!(parent.is_greyed_out);
        let leaf = &parent.children[0];
        assert_eq!(leaf.id, "3");
        assert!(leaf.is_filtered);
        assert!(!leaf.is_greyed_out);
    }

    #[test]
    fn unknown_parent_makes_the_issue_a_group_root() {
        let records = vec![with_parent(record("2", "Child"), "gone")];
        let root = convert_records(&records, None);
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].id, "2");
    }

    #[test]
    fn parent_cycles_do_not_drop_issues() {
        let records = vec![
            with_parent(record("1", "A"), "2"),
            with_parent(record("2", "B"), "1"),
        ];
        let root = convert_records(&records, None);
        assert_eq!(root.count(), 3);
    }

    #[test]
    fn empty_input_yields_an_empty_virtual_root() {
        let root = convert_records(&[], None);
        assert_eq!(root.id, VIRTUAL_ROOT_ID);
        assert!(root.children.is_empty());
    }

    #[test]
    fn filter_uses_fallback_labels() {
        let mut unassigned = record("1", "A");
        unassigned.state = None;
        let assigned = IssueRecord {
            assignee: Some(Assignee {
                id: Some("u1".into()),
                name: Some("Ada".into()),
                email: None,
            }),
            ..record("2", "B")
        };
        let records = vec![unassigned, assigned];

        let filter = RecordFilter {
            statuses: ["Unknown".to_string()].into_iter().collect(),
            assignees: BTreeSet::new(),
        };
        let kept = filter.apply(&records);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "1");

        assert_eq!(RecordFilter::default().apply(&records).len(), 2);

        let options = filter_options(&records);
        assert_eq!(options.assignees.get("Unassigned"), Some(&1));
        assert_eq!(options.assignees.get("Ada"), Some(&1));
        assert_eq!(options.statuses.get("Todo"), Some(&1));
    }
}
