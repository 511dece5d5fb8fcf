use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::UpstreamError;
use crate::layout::EMPTY_LABEL;
use crate::session::{Confirmed, Deleted, MapSession, Reparented};
use crate::tree::{Node, NodePatch, NodeType};
use crate::upstream::{IssueChanges, IssueWriter, NewIssue, StateDirectory};

/// A local edit that may need to be mirrored upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteChange {
    Created {
        node_id: String,
        parent_id: String,
    },
    Updated {
        node_id: String,
        patch: NodePatch,
        previous: NodePatch,
    },
    Deleted {
        parent_id: String,
        node: Node,
    },
    Reparented {
        node_id: String,
        from: String,
        to: String,
    },
}

impl RemoteChange {
    pub fn node_id(&self) -> &str {
        match self {
            RemoteChange::Created { node_id, .. }
            | RemoteChange::Updated { node_id, .. }
            | RemoteChange::Reparented { node_id, .. } => node_id,
            RemoteChange::Deleted { node, .. } => &node.id,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            RemoteChange::Created { .. } => "create",
            RemoteChange::Updated { .. } => "update",
            RemoteChange::Deleted { .. } => "delete",
            RemoteChange::Reparented { .. } => "move",
        }
    }
}

impl From<Confirmed> for RemoteChange {
    fn from(confirmed: Confirmed) -> Self {
        match confirmed {
            Confirmed::Created { id, parent_id } => RemoteChange::Created {
                node_id: id,
                parent_id,
            },
            Confirmed::Updated {
                id,
                patch,
                previous,
            } => RemoteChange::Updated {
                node_id: id,
                patch,
                previous,
            },
        }
    }
}

impl From<Deleted> for RemoteChange {
    fn from(deleted: Deleted) -> Self {
        RemoteChange::Deleted {
            parent_id: deleted.parent_id,
            node: deleted.node,
        }
    }
}

impl From<Reparented> for RemoteChange {
    fn from(moved: Reparented) -> Self {
        RemoteChange::Reparented {
            node_id: moved.node_id,
            from: moved.from,
            to: moved.to,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Decision {
    /// Keep the local change and flag the node as diverged.
    KeepLocal,
    /// Undo the local change.
    Discard,
    /// Leave the local change in place unflagged and let the caller decide
    /// later through [`resolve`].
    Defer,
}

/// Asked once per failed remote write.
pub trait DivergencePrompt: Send + Sync {
    fn decide(&self, change: &RemoteChange, error: &UpstreamError) -> Decision;
}

pub struct AlwaysKeep;

impl DivergencePrompt for AlwaysKeep {
    fn decide(&self, _change: &RemoteChange, _error: &UpstreamError) -> Decision {
        Decision::KeepLocal
    }
}

pub struct AlwaysDiscard;

impl DivergencePrompt for AlwaysDiscard {
    fn decide(&self, _change: &RemoteChange, _error: &UpstreamError) -> Decision {
        Decision::Discard
    }
}

pub struct Deferred;

impl DivergencePrompt for Deferred {
    fn decide(&self, _change: &RemoteChange, _error: &UpstreamError) -> Decision {
        Decision::Defer
    }
}

/// Terminal yes/no prompt. A prompt that cannot be shown defers.
pub struct ConfirmPrompt;

impl DivergencePrompt for ConfirmPrompt {
    fn decide(&self, change: &RemoteChange, error: &UpstreamError) -> Decision {
        let prompt = format!(
            "Failed to {} '{}' in the tracker: {error}. Keep the change in the map anyway?",
            change.action(),
            change.node_id()
        );
        match dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
        {
            Ok(true) => Decision::KeepLocal,
            Ok(false) => Decision::Discard,
            Err(err) => {
                warn!(error = %err, "confirmation prompt unavailable");
                Decision::Defer
            }
        }
    }
}

/// A failed write waiting for a decision.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub change: RemoteChange,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// The tracker accepted the change. Holds the node's id after the write,
    /// which differs from the local id for created nodes.
    Synced { node_id: String },
    /// Nothing to send, e.g. an edit to a team or project node.
    Skipped,
    KeptLocal { error: String },
    Discarded { error: String },
    Deferred(PendingWrite),
}

enum RemoteCall {
    Create { local_id: String, issue: NewIssue },
    Update { id: String, changes: IssueChanges },
    Delete { id: String },
}

fn issue_node<'a>(tree: &'a Node, id: &str) -> Option<&'a Node> {
    tree.find(id).filter(|node| node.node_type == NodeType::Issue)
}

/// Translates a local change into the tracker call that mirrors it.
fn plan(tree: &Node, states: &StateDirectory, change: &RemoteChange) -> Result<Option<RemoteCall>, UpstreamError> {
    match change {
        RemoteChange::Created { node_id, parent_id } => {
            let Some(node) = issue_node(tree, node_id) else {
                return Ok(None);
            };
            let parent = tree.find(parent_id);
            let team_id = node.lineage.team_id.clone().ok_or_else(|| {
                UpstreamError::Rejected(format!("issueCreate (no team above '{parent_id}')"))
            })?;
            let title = if node.name.trim().is_empty() {
                EMPTY_LABEL.to_string()
            } else {
                node.name.clone()
            };
            Ok(Some(RemoteCall::Create {
                local_id: node_id.clone(),
                issue: NewIssue {
                    state_id: states.state_id(&team_id, &node.status).map(str::to_string),
                    team_id,
                    title,
                    description: (!node.description.is_empty()).then(|| node.description.clone()),
                    parent_id: parent
                        .filter(|parent| parent.node_type == NodeType::Issue)
                        .map(|parent| parent.id.clone()),
                    project_id: node.lineage.project_id.clone(),
                },
            }))
        }
        RemoteChange::Updated { node_id, patch, .. } => {
            let Some(node) = issue_node(tree, node_id) else {
                return Ok(None);
            };
            let team_id = node.lineage.team_id.as_deref().unwrap_or_default();
            let changes = IssueChanges {
                title: patch.name.clone(),
                description: patch.description.clone(),
                state_id: patch
                    .status
                    .as_deref()
                    .and_then(|status| states.state_id(team_id, status))
                    .map(str::to_string),
                assignee_id: patch
                    .assignee
                    .as_ref()
                    .map(|assignee| assignee.as_ref().and_then(|a| a.id.clone())),
                ..IssueChanges::default()
            };
            if changes.is_empty() {
                return Ok(None);
            }
            Ok(Some(RemoteCall::Update {
                id: node_id.clone(),
                changes,
            }))
        }
        RemoteChange::Deleted { node, .. } => {
            if node.node_type != NodeType::Issue {
                return Ok(None);
            }
            Ok(Some(RemoteCall::Delete {
                id: node.id.clone(),
            }))
        }
        RemoteChange::Reparented { node_id, to, .. } => {
            if issue_node(tree, node_id).is_none() {
                return Ok(None);
            }
            let Some(parent) = tree.find(to) else {
                return Ok(None);
            };
            Ok(Some(RemoteCall::Update {
                id: node_id.clone(),
                changes: IssueChanges {
                    parent_id: Some(
                        (parent.node_type == NodeType::Issue).then(|| parent.id.clone()),
                    ),
                    project_id: Some(parent.lineage.project_id.clone()),
                    team_id: parent.lineage.team_id.clone(),
                    ..IssueChanges::default()
                },
            }))
        }
    }
}

/// Mirrors one local change upstream. On failure `prompt` decides whether the
/// local change stays (flagged as diverged) or is rolled back. Nothing is
/// retried.
pub async fn push_change<W: IssueWriter>(
    session: &mut MapSession,
    writer: &W,
    states: &StateDirectory,
    prompt: &dyn DivergencePrompt,
    change: RemoteChange,
) -> SyncOutcome {
    let call = match plan(session.tree(), states, &change) {
        Ok(Some(call)) => call,
        Ok(None) => {
            debug!(node_id = change.node_id(), "nothing to send upstream");
            return SyncOutcome::Skipped;
        }
        Err(err) => return settle(session, prompt, change, err),
    };

    let result = match call {
        RemoteCall::Create { local_id, issue } => match writer.create_record(issue).await {
            Ok(record) => {
                let remote_id = record.id.clone();
                if let Err(err) = session.rekey(&local_id, &remote_id) {
                    warn!(error = %err, "created node vanished before it could be renamed");
                }
                session.remember_record(record);
                Ok(remote_id)
            }
            Err(err) => Err(err),
        },
        RemoteCall::Update { id, changes } => match writer.update_record(&id, changes).await {
            Ok(record) => {
                session.remember_record(record);
                Ok(id)
            }
            Err(err) => Err(err),
        },
        RemoteCall::Delete { id } => match writer.delete_record(&id).await {
            Ok(()) => {
                session.forget_record(&id);
                Ok(id)
            }
            Err(err) => Err(err),
        },
    };

    match result {
        Ok(node_id) => {
            info!(node_id = %node_id, action = change.action(), "synced with tracker");
            SyncOutcome::Synced { node_id }
        }
        Err(err) => settle(session, prompt, change, err),
    }
}

fn settle(
    session: &mut MapSession,
    prompt: &dyn DivergencePrompt,
    change: RemoteChange,
    err: UpstreamError,
) -> SyncOutcome {
    warn!(error = %err, node_id = change.node_id(), action = change.action(), "tracker write failed");
    let decision = prompt.decide(&change, &err);
    let error = err.to_string();
    match decision {
        Decision::Defer => {
            // Flagged so a refresh before the decision carries the node over.
            mark_diverged(session, change.node_id(), true);
            session.render();
            SyncOutcome::Deferred(PendingWrite { change, error })
        }
        decision => resolve(session, PendingWrite { change, error }, decision),
    }
}

fn mark_diverged(session: &mut MapSession, id: &str, diverged: bool) -> bool {
    match session.tree_mut().find_mut(id) {
        Some(node) => {
            node.diverged = diverged;
            true
        }
        None => false,
    }
}

/// Applies a decision to a failed write.
pub fn resolve(session: &mut MapSession, pending: PendingWrite, decision: Decision) -> SyncOutcome {
    let PendingWrite { change, error } = pending;
    match decision {
        Decision::KeepLocal => {
            match &change {
                // A refresh may have brought the deleted record back.
                RemoteChange::Deleted { node, .. } => {
                    if session.tree().contains(&node.id) {
                        if let Err(err) = session.delete(&node.id) {
                            warn!(error = %err, "could not delete the node again");
                        }
                    }
                }
                other => {
                    if !mark_diverged(session, other.node_id(), true) {
                        warn!(node_id = other.node_id(), "kept change no longer has a node");
                    }
                }
            }
            session.render();
            SyncOutcome::KeptLocal { error }
        }
        Decision::Discard => {
            revert(session, change);
            session.render();
            SyncOutcome::Discarded { error }
        }
        Decision::Defer => SyncOutcome::Deferred(PendingWrite { change, error }),
    }
}

fn revert(session: &mut MapSession, change: RemoteChange) {
    let outcome = match change {
        RemoteChange::Created { node_id, .. } => session.delete(&node_id).map(|_| ()),
        RemoteChange::Updated {
            node_id, previous, ..
        } => {
            if let Some(node) = session.tree_mut().find_mut(&node_id) {
                node.apply_patch(&previous);
                node.diverged = false;
            }
            Ok(())
        }
        RemoteChange::Deleted { parent_id, node } => {
            if session.tree().contains(&node.id) {
                Ok(())
            } else {
                session
                    .tree_mut()
                    .attach(&parent_id, node)
                    .map(|_| ())
                    .map_err(Into::into)
            }
        }
        RemoteChange::Reparented { node_id, from, .. } => {
            mark_diverged(session, &node_id, false);
            session.reparent(&node_id, &from).map(|_| ())
        }
    };
    if let Err(err) = outcome {
        warn!(error = %err, "could not roll back local change");
    }
}
