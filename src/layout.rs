use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::status::status_color;
use crate::tree::{Node, NodeType, Point, Position};

/// Gap between a parent's collapse control and the left edge of a child box.
pub const CONSTANT_SPACING: f32 = 200.0;
pub const CONTROL_OFFSET: f32 = 5.0;
pub const CONTROL_RADIUS: f32 = 12.0;
pub const CONNECTOR_OFFSET: f32 = 8.0;
pub const CONNECTOR_RADIUS: f32 = 6.0;

pub const ROOT_FONT_SIZE: f32 = 16.0;
pub const NODE_FONT_SIZE: f32 = 14.0;
pub const EMPTY_LABEL: &str = "New Issue";

pub const MIN_SCALE: f32 = 0.1;
pub const MAX_SCALE: f32 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LayoutConfig {
    pub spacing: f32,
    pub origin_x: f32,
    pub viewport: Size,
    pub sibling_separation: f32,
    pub cousin_separation: f32,
    /// Vertical pixels per separation unit in the initial pass.
    pub slot_height: f32,
    /// Vertical gap between a newly placed node and the sibling above it.
    pub sibling_gap: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            spacing: CONSTANT_SPACING,
            origin_x: 100.0,
            viewport: Size::new(1000.0, 600.0),
            sibling_separation: 2.0,
            cousin_separation: 3.0,
            slot_height: 30.0,
            sibling_gap: 20.0,
        }
    }
}

impl LayoutConfig {
    pub fn origin(&self) -> Point {
        Point::new(self.origin_x, self.viewport.height / 2.0)
    }
}

/// Text measurement supplied by the host. Returning `None` selects the
/// character-count estimate.
pub trait TextMeasure {
    fn measure(&self, text: &str, font_size: f32, bold: bool) -> Option<Size>;
}

/// Measurer for hosts without a text engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimatedText;

impl TextMeasure for EstimatedText {
    fn measure(&self, _text: &str, _font_size: f32, _bold: bool) -> Option<Size> {
        None
    }
}

pub fn display_label(name: &str) -> &str {
    if name.is_empty() { EMPTY_LABEL } else { name }
}

pub fn font_size(depth: usize) -> f32 {
    if depth == 0 { ROOT_FONT_SIZE } else { NODE_FONT_SIZE }
}

/// Box footprint of a node label.
pub fn node_size(name: &str, depth: usize, measurer: &dyn TextMeasure) -> Size {
    let label = display_label(name);
    let font_size = font_size(depth);
    match measurer.measure(label, font_size, depth == 0) {
        Some(measured) if measured.width > 0.0 && measured.height > 0.0 => Size::new(
            (measured.width + 30.0).max(80.0),
            (measured.height + 16.0).max(32.0),
        ),
        _ => Size::new(
            (label.chars().count() as f32 * font_size * 0.7 + 30.0).max(100.0),
            (font_size * 1.5 + 16.0).max(40.0),
        ),
    }
}

/// Right edge of the collapse control drawn beside a node.
pub fn control_x(center: Point, size: Size) -> f32 {
    center.x + size.width / 2.0 + CONTROL_OFFSET + CONTROL_RADIUS
}

/// Centre of the reparent connector drawn left of a node.
pub fn connector_x(center: Point, size: Size) -> f32 {
    center.x - size.width / 2.0 - CONNECTOR_OFFSET
}

/// Horizontal centre for a child of a node at `parent` with `parent_size`.
pub fn child_x(parent: Point, parent_size: Size, child_size: Size, spacing: f32) -> f32 {
    control_x(parent, parent_size) + spacing + child_size.width / 2.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rect {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl Rect {
    pub fn around(center: Point, size: Size) -> Self {
        Self {
            min_x: center.x - size.width / 2.0,
            min_y: center.y - size.height / 2.0,
            max_x: center.x + size.width / 2.0,
            max_y: center.y + size.height / 2.0,
        }
    }

    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f32 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.min_x
            && point.x <= self.max_x
            && point.y >= self.min_y
            && point.y <= self.max_y
    }

    pub fn union(&self, other: &Rect) -> Rect {
        Rect {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    pub fn inflate(&self, amount: f32) -> Rect {
        Rect {
            min_x: self.min_x - amount,
            min_y: self.min_y - amount,
            max_x: self.max_x + amount,
            max_y: self.max_y + amount,
        }
    }
}

/// A visible node with its resolved centre and box.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedNode {
    pub id: String,
    pub parent_id: Option<String>,
    pub label: String,
    pub node_type: NodeType,
    pub status: String,
    pub color: &'static str,
    pub depth: usize,
    pub center: Point,
    pub size: Size,
    pub has_children: bool,
    pub collapsed: bool,
    pub is_greyed_out: bool,
    pub diverged: bool,
}

impl PlacedNode {
    pub fn rect(&self) -> Rect {
        Rect::around(self.center, self.size)
    }

    pub fn transform(&self) -> String {
        format!("translate({},{})", self.center.x, self.center.y)
    }

    pub fn control_point(&self) -> Point {
        Point::new(control_x(self.center, self.size), self.center.y)
    }

    pub fn connector_point(&self) -> Point {
        Point::new(connector_x(self.center, self.size), self.center.y)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub source: String,
    pub target: String,
    pub from: Point,
    pub to: Point,
}

impl Link {
    fn between(parent: &PlacedNode, child: &PlacedNode) -> Self {
        Self {
            source: parent.id.clone(),
            target: child.id.clone(),
            from: parent.control_point(),
            to: child.connector_point(),
        }
    }

    /// Cubic curve bending through the horizontal midpoint.
    pub fn path(&self) -> String {
        let mid_x = (self.from.x + self.to.x) / 2.0;
        format!(
            "M{},{} C{},{} {},{} {},{}",
            self.from.x, self.from.y, mid_x, self.from.y, mid_x, self.to.y, self.to.x, self.to.y
        )
    }
}

/// Result of a layout pass: every visible node in pre-order plus the links
/// between visible parents and children.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapLayout {
    pub nodes: Vec<PlacedNode>,
    pub links: Vec<Link>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl MapLayout {
    fn from_nodes(nodes: Vec<PlacedNode>) -> Self {
        let index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.id.clone(), i))
            .collect();
        let links = nodes
            .iter()
            .filter_map(|child| {
                let parent = index.get(child.parent_id.as_deref()?)?;
                Some(Link::between(&nodes[*parent], child))
            })
            .collect();
        Self {
            nodes,
            links,
            index,
        }
    }

    pub fn node(&self, id: &str) -> Option<&PlacedNode> {
        self.index.get(id).map(|i| &self.nodes[*i])
    }

    pub fn center(&self, id: &str) -> Option<Point> {
        self.node(id).map(|node| node.center)
    }

    pub fn bounds(&self) -> Option<Rect> {
        self.nodes
            .iter()
            .map(PlacedNode::rect)
            .reduce(|acc, rect| acc.union(&rect))
    }

    /// First node in render order whose box contains `point`, skipping
    /// `exclude`.
    pub fn hit_test(&self, point: Point, exclude: Option<&str>) -> Option<&PlacedNode> {
        self.nodes
            .iter()
            .filter(|node| Some(node.id.as_str()) != exclude)
            .find(|node| node.rect().contains(point))
    }

    /// Ids of `id` and every visible descendant.
    pub fn subtree_ids(&self, id: &str) -> HashSet<String> {
        let mut ids = HashSet::new();
        if self.node(id).is_none() {
            return ids;
        }
        ids.insert(id.to_string());
        // Pre-order: descendants follow their ancestor.
        for node in &self.nodes {
            if let Some(parent) = &node.parent_id {
                if ids.contains(parent) {
                    ids.insert(node.id.clone());
                }
            }
        }
        ids
    }

    /// Shifts the given nodes by `delta` and rebuilds only the links that
    /// touch them. Returns how many links were recomputed.
    pub fn translate(&mut self, ids: &HashSet<String>, delta: Point) -> usize {
        for node in self.nodes.iter_mut().filter(|node| ids.contains(&node.id)) {
            node.center = node.center + delta;
        }
        let mut touched = 0;
        for link in self.links.iter_mut() {
            if !ids.contains(&link.source) && !ids.contains(&link.target) {
                continue;
            }
            if let (Some(parent), Some(child)) = (
                self.index.get(&link.source).map(|i| &self.nodes[*i]),
                self.index.get(&link.target).map(|i| &self.nodes[*i]),
            ) {
                *link = Link::between(parent, child);
                touched += 1;
            }
        }
        touched
    }

    /// Horizontal gap between each parent's control edge and its child's box.
    pub fn link_gaps(&self) -> Vec<LinkGap> {
        self.links
            .iter()
            .filter_map(|link| {
                let child = self.node(&link.target)?;
                Some(LinkGap {
                    source: link.source.clone(),
                    target: link.target.clone(),
                    distance: child.rect().min_x - link.from.x,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkGap {
    pub source: String,
    pub target: String,
    pub distance: f32,
}

/// Lays out the visible part of the tree and persists every resolved
/// position back into the nodes.
///
/// When no node carries a stored position the tidy initial pass runs;
/// otherwise stored positions are replayed and only unplaced nodes are
/// positioned.
pub fn layout(root: &mut Node, measurer: &dyn TextMeasure, config: &LayoutConfig) -> MapLayout {
    let mut sizes = HashMap::new();
    measure_visible(root, 0, measurer, &mut sizes);

    let mut centers = HashMap::new();
    if root.has_stored_positions() {
        debug!(nodes = sizes.len(), "replaying stored positions");
        replay(root, None, &sizes, config, &mut centers);
    } else {
        debug!(nodes = sizes.len(), "running initial layout");
        initial_layout(root, &sizes, config, &mut centers);
    }

    let mut placed = Vec::with_capacity(centers.len());
    collect(root, 0, &sizes, &centers, &mut placed);
    MapLayout::from_nodes(placed)
}

fn visible_children(node: &Node) -> &[Node] {
    if node.collapsed { &[] } else { &node.children }
}

fn measure_visible(
    node: &Node,
    depth: usize,
    measurer: &dyn TextMeasure,
    sizes: &mut HashMap<String, Size>,
) {
    sizes.insert(node.id.clone(), node_size(&node.name, depth, measurer));
    for child in visible_children(node) {
        measure_visible(child, depth + 1, measurer, sizes);
    }
}

fn size_of(sizes: &HashMap<String, Size>, id: &str) -> Size {
    sizes
        .get(id)
        .copied()
        .unwrap_or_else(|| Size::new(100.0, 40.0))
}

struct SlotCursor {
    next: f32,
    last_leaf_parent: Option<Option<String>>,
}

/// Assigns vertical slots in separation units: leaves take consecutive
/// slots, parents sit at the midpoint of their first and last child.
fn assign_slots(
    node: &Node,
    config: &LayoutConfig,
    cursor: &mut SlotCursor,
    slots: &mut HashMap<String, f32>,
) -> f32 {
    let children = visible_children(node);
    let slot = if children.is_empty() {
        let slot = match &cursor.last_leaf_parent {
            None => 0.0,
            Some(previous) if *previous == node.parent_id => {
                cursor.next + config.sibling_separation
            }
            Some(_) => cursor.next + config.cousin_separation,
        };
        cursor.next = slot;
        cursor.last_leaf_parent = Some(node.parent_id.clone());
        slot
    } else {
        let mut first = None;
        let mut last = 0.0;
        for child in children {
            let child_slot = assign_slots(child, config, cursor, slots);
            first.get_or_insert(child_slot);
            last = child_slot;
        }
        (first.unwrap_or(last) + last) / 2.0
    };
    slots.insert(node.id.clone(), slot);
    slot
}

fn initial_layout(
    root: &mut Node,
    sizes: &HashMap<String, Size>,
    config: &LayoutConfig,
    centers: &mut HashMap<String, Point>,
) {
    let mut slots = HashMap::new();
    let mut cursor = SlotCursor {
        next: 0.0,
        last_leaf_parent: None,
    };
    let root_slot = assign_slots(root, config, &mut cursor, &mut slots);
    let origin = config.origin();
    let shift = origin.y - root_slot * config.slot_height;

    root.position = Position::absolute(origin);
    centers.insert(root.id.clone(), origin);
    place_children(root, origin, sizes, &slots, config, shift, centers);
}

fn place_children(
    parent: &mut Node,
    parent_center: Point,
    sizes: &HashMap<String, Size>,
    slots: &HashMap<String, f32>,
    config: &LayoutConfig,
    shift: f32,
    centers: &mut HashMap<String, Point>,
) {
    if parent.collapsed {
        return;
    }
    let parent_size = size_of(sizes, &parent.id);
    for child in parent.children.iter_mut() {
        let child_size = size_of(sizes, &child.id);
        let slot = slots.get(&child.id).copied().unwrap_or_default();
        let center = Point::new(
            child_x(parent_center, parent_size, child_size, config.spacing),
            slot * config.slot_height + shift,
        );
        child.position = Position::anchored(center, Some(parent_center));
        centers.insert(child.id.clone(), center);
        place_children(child, center, sizes, slots, config, shift, centers);
    }
}

fn replay(
    node: &mut Node,
    parent: Option<Point>,
    sizes: &HashMap<String, Size>,
    config: &LayoutConfig,
    centers: &mut HashMap<String, Point>,
) {
    let center = match (node.position, parent) {
        (Position::Absolute { x, y }, None) => Point::new(x, y),
        (_, None) => {
            let origin = config.origin();
            debug!(id = %node.id, "root has no absolute position, using origin");
            node.position = Position::absolute(origin);
            origin
        }
        (position, Some(parent_center)) => {
            let Some(center) = stored_center(position, parent_center) else {
                return;
            };
            if matches!(position, Position::Absolute { .. }) {
                node.position = Position::anchored(center, Some(parent_center));
            }
            center
        }
    };
    centers.insert(node.id.clone(), center);

    if node.collapsed {
        return;
    }

    let size = size_of(sizes, &node.id);
    let mut lowest: Option<f32> = None;
    for child in &node.children {
        if let Some(child_center) = stored_center(child.position, center) {
            let bottom = child_center.y + size_of(sizes, &child.id).height / 2.0;
            lowest = Some(lowest.map_or(bottom, |current| current.max(bottom)));
        }
    }

    for child in node.children.iter_mut() {
        if !child.position.is_set() {
            let child_size = size_of(sizes, &child.id);
            let y = match lowest {
                Some(bottom) => bottom + config.sibling_gap + child_size.height / 2.0,
                None => center.y,
            };
            let placed = Point::new(child_x(center, size, child_size, config.spacing), y);
            debug!(id = %child.id, x = placed.x, y = placed.y, "placing new node");
            child.position = Position::anchored(placed, Some(center));
            lowest = Some(y + child_size.height / 2.0);
        }
        replay(child, Some(center), sizes, config, centers);
    }
}

/// Centre implied by a stored position under a parent centre. Absolute
/// positions on non-root nodes are taken as-is.
fn stored_center(position: Position, parent: Point) -> Option<Point> {
    match position {
        Position::Relative { dx, dy } => Some(parent + Point::new(dx, dy)),
        Position::Absolute { x, y } => Some(Point::new(x, y)),
        Position::Unset => None,
    }
}

fn collect(
    node: &Node,
    depth: usize,
    sizes: &HashMap<String, Size>,
    centers: &HashMap<String, Point>,
    out: &mut Vec<PlacedNode>,
) {
    let Some(center) = centers.get(&node.id).copied() else {
        return;
    };
    out.push(PlacedNode {
        id: node.id.clone(),
        parent_id: node.parent_id.clone(),
        label: display_label(&node.name).to_string(),
        node_type: node.node_type,
        status: node.status.clone(),
        color: status_color(&node.status),
        depth,
        center,
        size: size_of(sizes, &node.id),
        has_children: node.has_children(),
        collapsed: node.collapsed,
        is_greyed_out: node.is_greyed_out,
        diverged: node.diverged,
    });
    for child in visible_children(node) {
        collect(child, depth + 1, sizes, centers, out);
    }
}

/// Resolves the stored position of `id` by walking from the root and adding
/// relative offsets. `None` when the node or an ancestor is unplaced.
pub fn resolved_position(root: &Node, id: &str) -> Option<Point> {
    let path = root.path_to(id)?;
    let mut current = match root.position {
        Position::Absolute { x, y } => Point::new(x, y),
        _ => return None,
    };
    let mut node = root;
    for step in path.iter().skip(1) {
        node = node.children.iter().find(|child| &child.id == step)?;
        current = stored_center(node.position, current)?;
    }
    Some(current)
}

/// Pan and zoom applied to the whole map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewTransform {
    pub scale: f32,
    pub x: f32,
    pub y: f32,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl ViewTransform {
    pub const IDENTITY: ViewTransform = ViewTransform {
        scale: 1.0,
        x: 0.0,
        y: 0.0,
    };

    /// Identity scale, translated so `bounds` sits in the middle of
    /// `viewport`.
    pub fn centered_on(bounds: Rect, viewport: Size) -> Self {
        Self {
            scale: 1.0,
            x: viewport.width / 2.0 - bounds.min_x - bounds.width() / 2.0,
            y: viewport.height / 2.0 - bounds.min_y - bounds.height() / 2.0,
        }
    }

    pub fn clamped(self) -> Self {
        Self {
            scale: self.scale.clamp(MIN_SCALE, MAX_SCALE),
            ..self
        }
    }

    pub fn to_diagram(&self, screen: Point) -> Point {
        Point::new((screen.x - self.x) / self.scale, (screen.y - self.y) / self.scale)
    }

    pub fn to_screen(&self, diagram: Point) -> Point {
        Point::new(diagram.x * self.scale + self.x, diagram.y * self.scale + self.y)
    }

    /// Scales by `factor` keeping the diagram point under `anchor` fixed.
    pub fn zoom_at(&self, factor: f32, anchor: Point) -> Self {
        let focus = self.to_diagram(anchor);
        let scale = (self.scale * factor).clamp(MIN_SCALE, MAX_SCALE);
        Self {
            scale,
            x: anchor.x - focus.x * scale,
            y: anchor.y - focus.y * scale,
        }
    }

    pub fn panned(&self, delta: Point) -> Self {
        Self {
            x: self.x + delta.x,
            y: self.y + delta.y,
            ..*self
        }
    }

    pub fn svg_attr(&self) -> String {
        format!("translate({},{}) scale({})", self.x, self.y, self.scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CharWidth(f32);

    impl TextMeasure for CharWidth {
        fn measure(&self, text: &str, font_size: f32, _bold: bool) -> Option<Size> {
            Some(Size::new(text.chars().count() as f32 * self.0, font_size))
        }
    }

    fn issue(id: &str, name: &str) -> Node {
        Node::new(id, name, NodeType::Issue, "Todo")
    }

    fn with_children(mut node: Node, children: Vec<Node>) -> Node {
        node.children = children
            .into_iter()
            .map(|mut child| {
                child.parent_id = Some(node.id.clone());
                child
            })
            .collect();
        node
    }

    fn sample() -> Node {
        with_children(
            Node::new("root", "Engineering", NodeType::Team, "In Progress"),
            vec![
                with_children(
                    issue("a", "A short one"),
                    vec![issue("a1", "x"), issue("a2", "a much longer label here")],
                ),
                issue("b", "B"),
                with_children(issue("c", ""), vec![issue("c1", "leaf")]),
            ],
        )
    }

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-3, "{a} != {b}");
    }

    #[test]
    fn fallback_and_measured_sizes() {
        let fallback = node_size("abc", 1, &EstimatedText);
        assert_close(fallback.width, 100.0);
        assert_close(fallback.height, 40.0);

        let long = node_size("twenty characters!!!", 0, &EstimatedText);
        assert_close(long.width, 20.0 * 16.0 * 0.7 + 30.0);

        let measured = node_size("hi", 1, &CharWidth(8.0));
        assert_close(measured.width, 80.0);
        assert_close(measured.height, 32.0);

        let empty = node_size("", 1, &EstimatedText);
        assert_close(empty.width, (EMPTY_LABEL.len() as f32 * 14.0 * 0.7 + 30.0).max(100.0));
    }

    #[test]
    fn initial_layout_places_root_at_origin_and_persists_positions() {
        let mut root = sample();
        let config = LayoutConfig::default();
        let map = layout(&mut root, &EstimatedText, &config);

        assert_eq!(map.center("root"), Some(Point::new(100.0, 300.0)));
        assert_eq!(root.position, Position::absolute(Point::new(100.0, 300.0)));
        let mut all_set = true;
        root.walk(&mut |node| all_set &= node.position.is_set());
        assert!(all_set);
        assert_eq!(map.nodes.len(), 7);
        assert_eq!(map.links.len(), 6);
    }

    #[test]
    fn constant_spacing_between_control_and_child_box() {
        let mut root = sample();
        let map = layout(&mut root, &CharWidth(7.5), &LayoutConfig::default());

        for link in &map.links {
            let parent = map.node(&link.source).unwrap();
            let child = map.node(&link.target).unwrap();
            let gap = child.rect().min_x - control_x(parent.center, parent.size);
            assert_close(gap, CONSTANT_SPACING);
            assert_close(link.to.x, child.rect().min_x - CONNECTOR_OFFSET);
        }
    }

    #[test]
    fn siblings_and_cousins_use_separation_units() {
        let mut root = sample();
        let config = LayoutConfig::default();
        let map = layout(&mut root, &EstimatedText, &config);
        let y = |id: &str| map.center(id).unwrap().y;

        assert_close(y("a2") - y("a1"), 2.0 * config.slot_height);
        assert_close(y("b") - y("a2"), 3.0 * config.slot_height);
        assert_close(y("a"), (y("a1") + y("a2")) / 2.0);
        assert_close(y("c"), y("c1"));
    }

    #[test]
    fn resolved_positions_match_layout() {
        let mut root = sample();
        let map = layout(&mut root, &EstimatedText, &LayoutConfig::default());
        for placed in &map.nodes {
            let resolved = resolved_position(&root, &placed.id).unwrap();
            assert_close(resolved.x, placed.center.x);
            assert_close(resolved.y, placed.center.y);
        }
    }

    #[test]
    fn replay_keeps_stored_positions() {
        let mut root = sample();
        let config = LayoutConfig::default();
        layout(&mut root, &EstimatedText, &config);
        root.find_mut("b").unwrap().position = Position::relative(Point::new(400.0, -50.0));

        let map = layout(&mut root, &EstimatedText, &config);
        assert_eq!(map.center("b"), Some(Point::new(500.0, 250.0)));
    }

    #[test]
    fn new_child_goes_below_lowest_sibling() {
        let mut root = sample();
        let config = LayoutConfig::default();
        let first = layout(&mut root, &EstimatedText, &config);
        let a2 = first.node("a2").unwrap().clone();

        let parent = root.find_mut("a").unwrap();
        let id = parent.add_child("fresh").id.clone();
        let map = layout(&mut root, &EstimatedText, &config);

        let placed = map.node(&id).unwrap();
        let parent = map.node("a").unwrap();
        assert_close(placed.rect().min_x - control_x(parent.center, parent.size), CONSTANT_SPACING);
        assert_close(
            placed.center.y,
            a2.rect().max_y + config.sibling_gap + placed.size.height / 2.0,
        );
        assert!(matches!(
            root.find(&id).unwrap().position,
            Position::Relative { .. }
        ));
    }

    #[test]
    fn first_child_is_level_with_parent() {
        let mut root = sample();
        let config = LayoutConfig::default();
        layout(&mut root, &EstimatedText, &config);
        let id = root.find_mut("b").unwrap().add_child("first").id.clone();
        let map = layout(&mut root, &EstimatedText, &config);
        assert_close(map.center(&id).unwrap().y, map.center("b").unwrap().y);
    }

    #[test]
    fn collapsed_children_are_not_laid_out() {
        let mut root = sample();
        root.find_mut("a").unwrap().collapsed = true;
        let map = layout(&mut root, &EstimatedText, &LayoutConfig::default());
        assert!(map.node("a1").is_none());
        assert!(map.node("a").unwrap().collapsed);
        assert_eq!(root.find("a1").unwrap().position, Position::Unset);
    }

    #[test]
    fn absolute_child_positions_become_relative() {
        let mut root = sample();
        let config = LayoutConfig::default();
        layout(&mut root, &EstimatedText, &config);
        root.find_mut("b").unwrap().position = Position::absolute(Point::new(700.0, 90.0));
        let map = layout(&mut root, &EstimatedText, &config);
        assert_eq!(map.center("b"), Some(Point::new(700.0, 90.0)));
        assert_eq!(
            root.find("b").unwrap().position,
            Position::relative(Point::new(600.0, -210.0))
        );
    }

    #[test]
    fn hit_test_skips_excluded_node() {
        let mut root = sample();
        let map = layout(&mut root, &EstimatedText, &LayoutConfig::default());
        let b = map.center("b").unwrap();
        assert_eq!(map.hit_test(b, None).map(|n| n.id.as_str()), Some("b"));
        assert!(map.hit_test(b, Some("b")).is_none());
        assert!(map.hit_test(Point::new(-500.0, -500.0), None).is_none());
    }

    #[test]
    fn translate_moves_subtree_and_its_links() {
        let mut root = sample();
        let mut map = layout(&mut root, &EstimatedText, &LayoutConfig::default());
        let before = map.clone();
        let ids = map.subtree_ids("a");
        assert_eq!(ids.len(), 3);

        let touched = map.translate(&ids, Point::new(10.0, -5.0));
        assert_eq!(touched, 3);
        assert_eq!(
            map.center("a1").unwrap(),
            before.center("a1").unwrap() + Point::new(10.0, -5.0)
        );
        assert_eq!(map.center("b"), before.center("b"));
    }

    #[test]
    fn link_path_uses_midpoint_controls() {
        let link = Link {
            source: "p".into(),
            target: "c".into(),
            from: Point::new(0.0, 0.0),
            to: Point::new(100.0, 50.0),
        };
        assert_eq!(link.path(), "M0,0 C50,0 50,50 100,50");
    }

    #[test]
    fn view_transform_centres_and_clamps() {
        let bounds = Rect {
            min_x: 0.0,
            min_y: 0.0,
            max_x: 200.0,
            max_y: 100.0,
        };
        let view = ViewTransform::centered_on(bounds, Size::new(1000.0, 600.0));
        assert_eq!(view, ViewTransform { scale: 1.0, x: 400.0, y: 250.0 });

        let zoomed = view.zoom_at(100.0, Point::new(500.0, 300.0));
        assert_close(zoomed.scale, MAX_SCALE);
        let anchor = zoomed.to_diagram(Point::new(500.0, 300.0));
        assert_close(anchor.x, 100.0);
        assert_close(anchor.y, 50.0);
        assert_close(view.zoom_at(0.0001, Point::default()).scale, MIN_SCALE);
    }
}
