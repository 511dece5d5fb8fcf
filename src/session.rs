use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::convert::{IssueRecord, RecordFilter};
use crate::error::{SessionError, TreeError};
use crate::layout::{EstimatedText, LayoutConfig, MapLayout, TextMeasure, ViewTransform, layout};
use crate::merge::merge_records;
use crate::tree::{Assignee, DEFAULT_STATUS, Node, NodePatch, Point, Position};

/// Two clicks on the same node closer together than this are a double click.
pub const CLICK_WINDOW_MS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EditTarget {
    Existing { id: String },
    NewChild { parent_id: String },
}

/// An unconfirmed edit. Nothing in the tree changes until it is confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDraft {
    pub target: EditTarget,
    pub name: String,
    pub description: String,
    pub status: String,
    pub assignee: Option<Assignee>,
}

impl NodeDraft {
    fn for_node(node: &Node) -> Self {
        Self {
            target: EditTarget::Existing {
                id: node.id.clone(),
            },
            name: node.name.clone(),
            description: node.description.clone(),
            status: node.status.clone(),
            assignee: node.assignee.clone(),
        }
    }

    fn for_child(parent_id: &str) -> Self {
        Self {
            target: EditTarget::NewChild {
                parent_id: parent_id.to_string(),
            },
            name: String::new(),
            description: String::new(),
            status: DEFAULT_STATUS.to_string(),
            assignee: None,
        }
    }

    /// Changes relative to `node`; fields that did not change are left out.
    fn diff(&self, node: &Node) -> NodePatch {
        NodePatch {
            name: (self.name != node.name).then(|| self.name.clone()),
            description: (self.description != node.description).then(|| self.description.clone()),
            status: (self.status != node.status).then(|| self.status.clone()),
            assignee: (self.assignee != node.assignee).then(|| self.assignee.clone()),
        }
    }

    pub fn apply(&mut self, patch: &NodePatch) {
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
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MenuItem {
    NewChild,
    Edit,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextMenu {
    pub node_id: String,
    pub items: Vec<MenuItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Key {
    Tab,
    Delete,
    Escape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    /// Waiting for the click window to elapse.
    Pending,
    /// Second click inside the window; an edit draft is now open.
    DoubleClick,
}

/// Result of a confirmed draft.
#[derive(Debug, Clone, PartialEq)]
pub enum Confirmed {
    Created {
        id: String,
        parent_id: String,
    },
    Updated {
        id: String,
        patch: NodePatch,
        previous: NodePatch,
    },
}

impl Confirmed {
    pub fn id(&self) -> &str {
        match self {
            Confirmed::Created { id, .. } | Confirmed::Updated { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Deleted {
    pub parent_id: String,
    pub node: Node,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reparented {
    pub node_id: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MenuOutcome {
    DraftOpened,
    Deleted(Deleted),
}

#[derive(Debug, Clone, PartialEq)]
pub enum KeyOutcome {
    DraftOpened,
    Deleted(Deleted),
    MenuClosed,
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
enum Gesture {
    Idle,
    Connector {
        node_id: String,
    },
    Move {
        node_id: String,
        last: Point,
        subtree: HashSet<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct PendingClick {
    node_id: String,
    at_ms: u64,
}

/// Interaction state for one open map: the tree, what is selected, the
/// gesture in flight and the pan/zoom transform.
pub struct MapSession {
    tree: Node,
    records: Vec<IssueRecord>,
    filter: RecordFilter,
    config: LayoutConfig,
    measurer: Box<dyn TextMeasure + Send>,
    rendered: Option<MapLayout>,
    transform: Option<ViewTransform>,
    selected: Option<String>,
    pending_click: Option<PendingClick>,
    gesture: Gesture,
    menu: Option<ContextMenu>,
    draft: Option<NodeDraft>,
    warning: Option<String>,
}

impl MapSession {
    pub fn new(tree: Node) -> Self {
        Self {
            tree,
            records: Vec::new(),
            filter: RecordFilter::default(),
            config: LayoutConfig::default(),
            measurer: Box::new(EstimatedText),
            rendered: None,
            transform: None,
            selected: None,
            pending_click: None,
            gesture: Gesture::Idle,
            menu: None,
            draft: None,
            warning: None,
        }
    }

    pub fn from_records(records: Vec<IssueRecord>, filter: RecordFilter) -> Self {
        let filtered = filter.apply(&records);
        let tree = merge_records(None, &filtered, &records);
        let mut session = Self::new(tree);
        session.records = records;
        session.filter = filter;
        session
    }

    pub fn with_config(mut self, config: LayoutConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_measurer(mut self, measurer: impl TextMeasure + Send + 'static) -> Self {
        self.measurer = Box::new(measurer);
        self
    }

    pub fn tree(&self) -> &Node {
        &self.tree
    }

    /// Direct tree access for remote-sync bookkeeping. Callers should
    /// re-render afterwards.
    pub fn tree_mut(&mut self) -> &mut Node {
        self.rendered = None;
        &mut self.tree
    }

    pub fn records(&self) -> &[IssueRecord] {
        &self.records
    }

    pub fn filter(&self) -> &RecordFilter {
        &self.filter
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn draft(&self) -> Option<&NodeDraft> {
        self.draft.as_ref()
    }

    pub fn context_menu(&self) -> Option<&ContextMenu> {
        self.menu.as_ref()
    }

    pub fn transform(&self) -> Option<ViewTransform> {
        self.transform
    }

    pub fn rendered(&self) -> Option<&MapLayout> {
        self.rendered.as_ref()
    }

    pub fn take_warning(&mut self) -> Option<String> {
        self.warning.take()
    }

    pub fn is_dragging(&self) -> bool {
        !matches!(self.gesture, Gesture::Idle)
    }

    /// Lays out the tree and caches the result. The view is centred on the
    /// first render only; later renders keep the current transform.
    pub fn render(&mut self) -> &MapLayout {
        let map = layout(&mut self.tree, &*self.measurer, &self.config);
        if self.transform.is_none() {
            if let Some(bounds) = map.bounds() {
                self.transform = Some(ViewTransform::centered_on(bounds, self.config.viewport));
            }
        }
        self.rendered.insert(map)
    }

    fn rendered_or_render(&mut self) -> &MapLayout {
        if self.rendered.is_none() {
            self.render();
        }
        self.rendered.get_or_insert_with(MapLayout::default)
    }

    fn refuse(&mut self, err: TreeError) -> SessionError {
        warn!(error = %err, "local edit refused");
        self.warning = Some(err.to_string());
        SessionError::Tree(err)
    }

    fn require(&self, id: &str) -> Result<&Node, SessionError> {
        self.tree
            .find(id)
            .ok_or_else(|| SessionError::Tree(TreeError::NotFound(id.to_string())))
    }

    // Selection

    pub fn select(&mut self, id: Option<&str>) -> Result<(), SessionError> {
        if let Some(id) = id {
            self.require(id)?;
        }
        self.pending_click = None;
        self.selected = id.map(str::to_string);
        Ok(())
    }

    /// Registers a click on a node. The selection only changes once `tick`
    /// sees the click window elapse without a second click.
    pub fn click(&mut self, id: &str, at_ms: u64) -> Result<ClickOutcome, SessionError> {
        self.require(id)?;
        if let Some(pending) = self.pending_click.take() {
            let within = at_ms.saturating_sub(pending.at_ms) < CLICK_WINDOW_MS;
            if within && pending.node_id == id {
                self.begin_edit(id)?;
                return Ok(ClickOutcome::DoubleClick);
            }
            if !within {
                self.toggle_selection(&pending.node_id);
            }
        }
        self.pending_click = Some(PendingClick {
            node_id: id.to_string(),
            at_ms,
        });
        Ok(ClickOutcome::Pending)
    }

    /// Resolves an expired pending click. Returns the new selection when it
    /// changed.
    pub fn tick(&mut self, now_ms: u64) -> Option<Option<String>> {
        let expired = self
            .pending_click
            .as_ref()
            .is_some_and(|pending| now_ms.saturating_sub(pending.at_ms) >= CLICK_WINDOW_MS);
        if !expired {
            return None;
        }
        let pending = self.pending_click.take()?;
        self.toggle_selection(&pending.node_id);
        Some(self.selected.clone())
    }

    fn toggle_selection(&mut self, id: &str) {
        if self.selected.as_deref() == Some(id) {
            self.selected = None;
        } else {
            self.selected = Some(id.to_string());
        }
    }

    /// Click on empty canvas.
    pub fn click_background(&mut self) {
        self.pending_click = None;
        self.selected = None;
        self.menu = None;
    }

    // Collapse

    pub fn toggle_collapse(&mut self, id: &str) -> Result<bool, SessionError> {
        let node = self
            .tree
            .find_mut(id)
            .ok_or_else(|| SessionError::Tree(TreeError::NotFound(id.to_string())))?;
        let collapsed = node.toggle_collapsed();
        debug!(id, collapsed, "toggled collapse");
        self.render();
        Ok(collapsed)
    }

    // Drag to reparent

    pub fn begin_connector_drag(&mut self, id: &str) -> Result<(), SessionError> {
        if self.is_dragging() {
            return Err(SessionError::GestureActive);
        }
        if self.require(id)?.is_root() {
            return Err(self.refuse(TreeError::RootMove));
        }
        self.gesture = Gesture::Connector {
            node_id: id.to_string(),
        };
        Ok(())
    }

    /// Drops the connector at `release` (diagram coordinates). Returns the
    /// move when the pointer was over another node.
    pub fn end_connector_drag(&mut self, release: Point) -> Result<Option<Reparented>, SessionError> {
        let node_id = match &self.gesture {
            Gesture::Connector { node_id } => node_id.clone(),
            _ => return Err(SessionError::NoGesture),
        };
        self.gesture = Gesture::Idle;
        let target = self
            .rendered_or_render()
            .hit_test(release, Some(node_id.as_str()))
            .map(|node| node.id.clone());
        let Some(target) = target else {
            return Ok(None);
        };
        self.reparent(&node_id, &target).map(Some)
    }

    pub fn reparent(&mut self, node_id: &str, new_parent_id: &str) -> Result<Reparented, SessionError> {
        let from = self
            .tree
            .parent_of(node_id)
            .map(|parent| parent.id.clone())
            .unwrap_or_default();
        if let Err(err) = self.tree.reparent(node_id, new_parent_id) {
            return Err(self.refuse(err));
        }
        debug!(node_id, from = %from, to = new_parent_id, "reparented");
        self.render();
        Ok(Reparented {
            node_id: node_id.to_string(),
            from,
            to: new_parent_id.to_string(),
        })
    }

    // Whole-subtree move

    pub fn begin_move(&mut self, id: &str, pointer: Point) -> Result<(), SessionError> {
        if self.is_dragging() {
            return Err(SessionError::GestureActive);
        }
        self.require(id)?;
        let subtree = self.rendered_or_render().subtree_ids(id);
        if subtree.is_empty() {
            return Err(SessionError::NotRendered);
        }
        self.gesture = Gesture::Move {
            node_id: id.to_string(),
            last: pointer,
            subtree,
        };
        Ok(())
    }

    /// Moves the dragged node and its visible descendants by the frame delta.
    /// Returns the number of links recomputed.
    pub fn drag_to(&mut self, pointer: Point) -> Result<usize, SessionError> {
        let Gesture::Move { last, subtree, .. } = &mut self.gesture else {
            return Err(SessionError::NoGesture);
        };
        let delta = pointer - *last;
        *last = pointer;
        let map = self.rendered.as_mut().ok_or(SessionError::NotRendered)?;
        Ok(map.translate(subtree, delta))
    }

    /// Persists the moved node and re-anchors every visible descendant on its
    /// parent. Returns the node's final centre.
    pub fn end_move(&mut self) -> Result<Point, SessionError> {
        let (node_id, subtree) = match std::mem::replace(&mut self.gesture, Gesture::Idle) {
            Gesture::Move {
                node_id, subtree, ..
            } => (node_id, subtree),
            other => {
                self.gesture = other;
                return Err(SessionError::NoGesture);
            }
        };
        let map = self.rendered.as_ref().ok_or(SessionError::NotRendered)?;
        let center = map.center(&node_id).ok_or(SessionError::NotRendered)?;

        // Descendants moved with their parent, so an offset that is already
        // relative still holds exactly.
        let mut anchors = Vec::with_capacity(subtree.len());
        for id in &subtree {
            let Some(placed) = map.node(id) else { continue };
            let parent_center = placed
                .parent_id
                .as_deref()
                .and_then(|parent| map.center(parent));
            anchors.push((id.clone(), Position::anchored(placed.center, parent_center)));
        }
        for (id, position) in anchors {
            let Some(node) = self.tree.find_mut(&id) else { continue };
            let keep = id != node_id && matches!(node.position, Position::Relative { .. });
            if !keep {
                node.position = position;
            }
        }
        debug!(node_id = %node_id, x = center.x, y = center.y, "move persisted");
        self.render();
        Ok(center)
    }

    /// Moves a node by `delta` in one step.
    pub fn move_by(&mut self, id: &str, delta: Point) -> Result<Point, SessionError> {
        let start = self
            .rendered_or_render()
            .center(id)
            .ok_or(SessionError::NotRendered)?;
        self.begin_move(id, start)?;
        self.drag_to(start + delta)?;
        self.end_move()
    }

    pub fn cancel_gesture(&mut self) {
        if matches!(self.gesture, Gesture::Move { .. }) {
            self.gesture = Gesture::Idle;
            self.render();
        } else {
            self.gesture = Gesture::Idle;
        }
    }

    // Zoom and pan

    pub fn set_transform(&mut self, transform: ViewTransform) -> bool {
        if self.is_dragging() {
            return false;
        }
        self.transform = Some(transform.clamped());
        true
    }

    pub fn pan(&mut self, delta: Point) -> bool {
        let current = self.transform.unwrap_or_default();
        self.set_transform(current.panned(delta))
    }

    pub fn zoom(&mut self, factor: f32, anchor: Point) -> bool {
        let current = self.transform.unwrap_or_default();
        self.set_transform(current.zoom_at(factor, anchor))
    }

    // Drafts

    pub fn begin_edit(&mut self, id: &str) -> Result<&NodeDraft, SessionError> {
        let draft = NodeDraft::for_node(self.require(id)?);
        self.menu = None;
        Ok(self.draft.insert(draft))
    }

    pub fn begin_new_child(&mut self, parent_id: &str) -> Result<&NodeDraft, SessionError> {
        self.require(parent_id)?;
        self.menu = None;
        Ok(self.draft.insert(NodeDraft::for_child(parent_id)))
    }

    pub fn update_draft(&mut self, patch: &NodePatch) -> Result<&NodeDraft, SessionError> {
        let draft = self.draft.as_mut().ok_or(SessionError::NoDraft)?;
        draft.apply(patch);
        Ok(draft)
    }

    pub fn cancel_edit(&mut self) -> Option<NodeDraft> {
        self.draft.take()
    }

    /// Materializes the open draft: a new child is created and selected, an
    /// existing node receives the changed fields.
    pub fn confirm_edit(&mut self) -> Result<Confirmed, SessionError> {
        let draft = self.draft.take().ok_or(SessionError::NoDraft)?;
        let confirmed = match &draft.target {
            EditTarget::NewChild { parent_id } => {
                let parent = self
                    .tree
                    .find_mut(parent_id)
                    .ok_or_else(|| SessionError::Tree(TreeError::NotFound(parent_id.clone())))?;
                let child = parent.add_child(draft.name.clone());
                child.description = draft.description.clone();
                child.status = draft.status.clone();
                child.assignee = draft.assignee.clone();
                let id = child.id.clone();
                self.selected = Some(id.clone());
                Confirmed::Created {
                    id,
                    parent_id: parent_id.clone(),
                }
            }
            EditTarget::Existing { id } => {
                let node = self
                    .tree
                    .find_mut(id)
                    .ok_or_else(|| SessionError::Tree(TreeError::NotFound(id.clone())))?;
                let patch = draft.diff(node);
                let previous = NodeDraft::for_node(node).diff_from(&patch);
                node.apply_patch(&patch);
                Confirmed::Updated {
                    id: id.clone(),
                    patch,
                    previous,
                }
            }
        };
        self.render();
        Ok(confirmed)
    }

    /// Applies a patch to a node without going through a draft.
    pub fn patch_node(&mut self, id: &str, patch: &NodePatch) -> Result<Confirmed, SessionError> {
        self.begin_edit(id)?;
        self.update_draft(patch)?;
        self.confirm_edit()
    }

    // Deletion

    pub fn delete(&mut self, id: &str) -> Result<Deleted, SessionError> {
        if self.require(id)?.is_greyed_out {
            return Err(self.refuse(TreeError::GreyedOut(id.to_string())));
        }
        let parent_id = self
            .tree
            .parent_of(id)
            .map(|parent| parent.id.clone())
            .unwrap_or_default();
        let node = match self.tree.delete_by_id(id) {
            Ok(node) => node,
            Err(err) => return Err(self.refuse(err)),
        };
        if self
            .selected
            .as_deref()
            .is_some_and(|selected| node.contains(selected))
        {
            self.selected = None;
        }
        debug!(id, "deleted node");
        self.render();
        Ok(Deleted { parent_id, node })
    }

    // Context menu

    pub fn open_context_menu(&mut self, id: &str) -> Result<&ContextMenu, SessionError> {
        let node = self.require(id)?;
        let mut items = vec![MenuItem::NewChild, MenuItem::Edit];
        if !node.is_root() {
            items.push(MenuItem::Delete);
        }
        Ok(self.menu.insert(ContextMenu {
            node_id: id.to_string(),
            items,
        }))
    }

    pub fn close_context_menu(&mut self) {
        self.menu = None;
    }

    pub fn choose(&mut self, item: MenuItem) -> Result<MenuOutcome, SessionError> {
        let menu = self.menu.take().ok_or(SessionError::NoMenu)?;
        if !menu.items.contains(&item) {
            return Err(self.refuse(TreeError::ProtectedRoot));
        }
        match item {
            MenuItem::NewChild => {
                self.begin_new_child(&menu.node_id)?;
                Ok(MenuOutcome::DraftOpened)
            }
            MenuItem::Edit => {
                self.begin_edit(&menu.node_id)?;
                Ok(MenuOutcome::DraftOpened)
            }
            MenuItem::Delete => self.delete(&menu.node_id).map(MenuOutcome::Deleted),
        }
    }

    // Keyboard

    pub fn key(&mut self, key: Key) -> Result<KeyOutcome, SessionError> {
        match key {
            Key::Tab => {
                let parent = self
                    .selected
                    .clone()
                    .unwrap_or_else(|| self.tree.id.clone());
                self.begin_new_child(&parent)?;
                Ok(KeyOutcome::DraftOpened)
            }
            Key::Delete => match self.selected.clone() {
                Some(id) => self.delete(&id).map(KeyOutcome::Deleted),
                None => Ok(KeyOutcome::Ignored),
            },
            Key::Escape => {
                self.menu = None;
                Ok(KeyOutcome::MenuClosed)
            }
        }
    }

    // Remote bookkeeping

    /// Renames a node once the tracker has assigned it a permanent id.
    pub fn rekey(&mut self, old_id: &str, new_id: &str) -> Result<(), SessionError> {
        let node = self
            .tree
            .find_mut(old_id)
            .ok_or_else(|| SessionError::Tree(TreeError::NotFound(old_id.to_string())))?;
        node.id = new_id.to_string();
        for child in &mut node.children {
            child.parent_id = Some(new_id.to_string());
        }
        if self.selected.as_deref() == Some(old_id) {
            self.selected = Some(new_id.to_string());
        }
        self.rendered = None;
        Ok(())
    }

    /// Stores the tracker's copy of a record so a later filter change
    /// re-merges from up-to-date data.
    pub fn remember_record(&mut self, record: IssueRecord) {
        match self.records.iter_mut().find(|held| held.id == record.id) {
            Some(held) => *held = record,
            None => self.records.push(record),
        }
    }

    pub fn forget_record(&mut self, id: &str) {
        self.records.retain(|record| record.id != id);
    }

    // Refresh

    /// Replaces the record set and merges it into the current tree.
    pub fn refresh(&mut self, records: Vec<IssueRecord>) {
        self.records = records;
        self.remerge();
    }

    /// Changes the active filter and re-merges the held records.
    pub fn set_filter(&mut self, filter: RecordFilter) {
        self.filter = filter;
        self.remerge();
    }

    fn remerge(&mut self) {
        let filtered = self.filter.apply(&self.records);
        self.tree = merge_records(Some(&self.tree), &filtered, &self.records);
        if let Some(selected) = &self.selected {
            if !self.tree.contains(selected) {
                self.selected = None;
            }
        }
        if let Some(EditTarget::Existing { id }) = self.draft.as_ref().map(|draft| &draft.target) {
            if !self.tree.contains(id) {
                self.draft = None;
            }
        }
        self.menu = None;
        self.render();
    }
}

impl NodeDraft {
    /// The current values of the fields `patch` touches.
    fn diff_from(&self, patch: &NodePatch) -> NodePatch {
        NodePatch {
            name: patch.name.as_ref().map(|_| self.name.clone()),
            description: patch.description.as_ref().map(|_| self.description.clone()),
            status: patch.status.as_ref().map(|_| self.status.clone()),
            assignee: patch.assignee.as_ref().map(|_| self.assignee.clone()),
        }
    }
}
