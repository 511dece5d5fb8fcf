use anyhow::Result;
use issuemap::convert::{ProjectRef, RecordRef, StateRef, TeamRef};
use issuemap::layout::{CONSTANT_SPACING, EstimatedText, resolved_position};
use issuemap::upstream::parse_records;
use issuemap::{
    IssueRecord, LayoutConfig, MapSession, NodeType, Point, Position, RecordFilter, SessionError,
    SvgOptions, TreeError, convert_records, layout, merge_records, render_svg,
};

fn issue(id: &str, title: &str, team: &str) -> IssueRecord {
    IssueRecord {
        id: id.to_string(),
        title: Some(title.to_string()),
        state: Some(StateRef {
            id: None,
            name: "Todo".to_string(),
            kind: None,
        }),
        team: Some(TeamRef {
            id: team.to_string(),
            name: Some(format!("Team {team}")),
            key: None,
        }),
        ..IssueRecord::default()
    }
}

fn child_of(mut record: IssueRecord, parent: &str) -> IssueRecord {
    record.parent = Some(RecordRef {
        id: parent.to_string(),
    });
    record
}

fn in_project(mut record: IssueRecord, project: &str) -> IssueRecord {
    record.project = Some(ProjectRef {
        id: project.to_string(),
        name: Some(format!("Project {project}")),
    });
    record
}

#[test]
fn flat_records_of_one_team_hang_off_the_team_root() {
    let records = vec![
        issue("a", "First", "t1"),
        issue("b", "Second", "t1"),
        issue("c", "Third", "t1"),
    ];
    let root = convert_records(&records, None);

    assert_eq!(root.node_type, NodeType::Team);
    assert_eq!(root.name, "Team t1");
    assert_eq!(root.children.len(), 3);
    for child in &root.children {
        assert_eq!(child.node_type, NodeType::Issue);
        assert_eq!(child.parent_id.as_deref(), Some(root.id.as_str()));
    }
}

#[test]
fn project_delete_is_refused_and_tree_is_untouched() {
    let records = vec![
        in_project(issue("a", "Epic", "t1"), "p1"),
        child_of(in_project(issue("b", "Task", "t1"), "p1"), "a"),
    ];
    let mut session = MapSession::from_records(records, RecordFilter::default());
    session.render();
    let before = session.tree().clone();
    let rows = session.records().len();

    let err = session.delete("project-t1-p1").unwrap_err();
    assert_eq!(
        err,
        SessionError::Tree(TreeError::ProtectedType(NodeType::Project))
    );
    assert_eq!(
        session.take_warning().as_deref(),
        Some("Cannot delete Project nodes. Only issue nodes can be deleted.")
    );
    assert_eq!(session.tree(), &before);
    assert_eq!(session.records().len(), rows);
    assert_eq!(rows, 2);
}

#[test]
fn filtered_child_brings_greyed_out_ancestors() {
    let mut done = child_of(issue("b", "Task", "t1"), "a");
    done.state = Some(StateRef {
        id: None,
        name: "Done".to_string(),
        kind: None,
    });
    let records = vec![issue("a", "Epic", "t1"), done];
    let filter = RecordFilter {
        statuses: ["Done".to_string()].into_iter().collect(),
        ..RecordFilter::default()
    };

    let session = MapSession::from_records(records, filter);
    let epic = session.tree().find("a").expect("ancestor should be synthesized");
    assert!(epic.is_greyed_out);
    assert!(!epic.is_filtered);
    assert!(!session.tree().find("b").unwrap().is_greyed_out);
}

#[test]
fn children_keep_constant_spacing_from_their_parent() {
    let records = vec![
        issue("a", "A fairly long epic title", "t1"),
        child_of(issue("b", "Short", "t1"), "a"),
        child_of(issue("c", "A much longer child title here", "t1"), "a"),
    ];
    let mut root = convert_records(&records, None);
    let map = layout(&mut root, &EstimatedText, &LayoutConfig::default());

    for gap in map.link_gaps() {
        assert!(
            (gap.distance - CONSTANT_SPACING).abs() < 0.01,
            "{} -> {} was {}",
            gap.source,
            gap.target,
            gap.distance
        );
    }
}

#[test]
fn layout_persists_positions_that_resolve_to_rendered_centres() {
    let records = vec![
        issue("a", "Epic", "t1"),
        child_of(issue("b", "Task", "t1"), "a"),
    ];
    let mut root = convert_records(&records, None);
    let map = layout(&mut root, &EstimatedText, &LayoutConfig::default());

    assert!(matches!(root.position, Position::Absolute { .. }));
    assert!(matches!(
        root.find("b").unwrap().position,
        Position::Relative { .. }
    ));
    for placed in &map.nodes {
        let resolved = resolved_position(&root, &placed.id).unwrap();
        assert!((resolved.x - placed.center.x).abs() < 0.01);
        assert!((resolved.y - placed.center.y).abs() < 0.01);
    }
}

#[test]
fn refresh_keeps_moved_nodes_where_the_user_left_them() {
    let records = vec![
        issue("a", "Epic", "t1"),
        child_of(issue("b", "Task", "t1"), "a"),
        issue("c", "Loose", "t1"),
    ];
    let mut session = MapSession::from_records(records.clone(), RecordFilter::default());
    session.render();
    let moved_to = session.move_by("c", Point::new(40.0, 90.0)).unwrap();

    let mut fresh = records;
    fresh.push(issue("d", "New upstream", "t1"));
    session.refresh(fresh);

    let center = session.rendered().unwrap().center("c").unwrap();
    assert!((center.x - moved_to.x).abs() < 0.01);
    assert!((center.y - moved_to.y).abs() < 0.01);
    assert!(session.rendered().unwrap().center("d").is_some());
}

#[test]
fn merge_of_identical_data_is_idempotent() {
    let records = vec![
        issue("a", "Epic", "t1"),
        child_of(issue("b", "Task", "t1"), "a"),
        issue("z", "Other team", "t2"),
    ];
    let mut tree = convert_records(&records, None);
    layout(&mut tree, &EstimatedText, &LayoutConfig::default());

    let once = merge_records(Some(&tree), &records, &records);
    let twice = merge_records(Some(&once), &records, &records);
    assert_eq!(once, twice);
    assert_eq!(once.id, "virtual-root");
}

#[test]
fn saved_fixture_renders_to_svg() -> Result<()> {
    let text = include_str!("input/issues.json");
    let records = parse_records(text)?;
    assert_eq!(records.len(), 5);

    let mut session = MapSession::from_records(records, RecordFilter::default());
    let svg = render_svg(session.render(), &SvgOptions::default())?;

    assert!(svg.contains("<svg"), "rendered svg should contain root element");
    assert!(svg.contains("Launch billing"));
    assert!(svg.contains("Operations"));
    assert_eq!(svg.matches("class=\"node ").count(), session.tree().count());
    Ok(())
}
