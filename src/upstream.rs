use std::collections::HashMap;
use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::convert::IssueRecord;
use crate::error::UpstreamError;

pub const DEFAULT_ENDPOINT: &str = "https://api.linear.app/graphql";
pub const DEFAULT_PAGE_SIZE: usize = 100;
/// Hard stop for pagination against a server that never reports the end.
pub const MAX_PAGES: usize = 100;

/// One page of records plus the cursor for the next one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordPage {
    pub records: Vec<IssueRecord>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

/// Paged read access to the tracker.
pub trait RecordSource {
    fn fetch_page(
        &self,
        cursor: Option<String>,
    ) -> impl Future<Output = Result<RecordPage, UpstreamError>> + Send;
}

/// Fields for a new upstream issue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewIssue {
    pub team_id: String,
    pub title: String,
    pub description: Option<String>,
    pub parent_id: Option<String>,
    pub project_id: Option<String>,
    pub state_id: Option<String>,
}

/// Partial update. `None` leaves a field alone; `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
}

impl IssueChanges {
    pub fn is_empty(&self) -> bool {
        *self == IssueChanges::default()
    }
}

/// Write access to the tracker.
pub trait IssueWriter {
    fn create_record(
        &self,
        issue: NewIssue,
    ) -> impl Future<Output = Result<IssueRecord, UpstreamError>> + Send;

    fn update_record(
        &self,
        id: &str,
        changes: IssueChanges,
    ) -> impl Future<Output = Result<IssueRecord, UpstreamError>> + Send;

    fn delete_record(&self, id: &str) -> impl Future<Output = Result<(), UpstreamError>> + Send;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub records: Vec<IssueRecord>,
    pub pages: usize,
    pub hit_ceiling: bool,
}

/// Pulls pages until the source reports no more, or `max_pages` is reached.
/// `on_progress` sees the running record count after every page.
pub async fn fetch_all<S: RecordSource>(
    source: &S,
    max_pages: usize,
    mut on_progress: impl FnMut(usize),
) -> Result<FetchSummary, UpstreamError> {
    let mut summary = FetchSummary::default();
    let mut cursor = None;
    loop {
        let page = source.fetch_page(cursor.take()).await?;
        summary.pages += 1;
        summary.records.extend(page.records);
        on_progress(summary.records.len());
        info!(
            page = summary.pages,
            total = summary.records.len(),
            "fetched page"
        );

        if !page.has_more {
            break;
        }
        if summary.pages >= max_pages {
            warn!(max_pages, "page ceiling reached, stopping pagination");
            summary.hit_ceiling = true;
            break;
        }
        cursor = page.next_cursor;
    }
    Ok(summary)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

/// Workflow states per team, used to turn a status label into a state id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateDirectory {
    teams: HashMap<String, Vec<WorkflowState>>,
}

impl StateDirectory {
    pub fn insert(&mut self, team_id: impl Into<String>, states: Vec<WorkflowState>) {
        self.teams.insert(team_id.into(), states);
    }

    pub fn states(&self, team_id: &str) -> &[WorkflowState] {
        self.teams.get(team_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Exact name match within the team.
    pub fn state_id(&self, team_id: &str, status: &str) -> Option<&str> {
        self.states(team_id)
            .iter()
            .find(|state| state.name == status)
            .map(|state| state.id.as_str())
    }
}

const ISSUES_QUERY: &str = r#"
query Issues($first: Int!, $after: String) {
  issues(first: $first, after: $after) {
    pageInfo { hasNextPage endCursor }
    nodes {
      id identifier title description
      parent { id }
      state { id name type }
      assignee { id name email }
      team { id name key }
      project { id name }
    }
  }
}
"#;

const ISSUE_FIELDS: &str = r#"
      id identifier title description
      parent { id }
      state { id name type }
      assignee { id name email }
      team { id name key }
      project { id name }
"#;

const STATES_QUERY: &str = r#"
query States {
  teams { nodes { id name states { nodes { id name type color } } } }
}
"#;

const DELETE_MUTATION: &str = r#"
mutation IssueDelete($id: String!) {
  issueDelete(id: $id) { success }
}
"#;

fn create_mutation() -> String {
    format!(
        r#"
mutation IssueCreate($input: IssueCreateInput!) {{
  issueCreate(input: $input) {{
    success
    issue {{ {ISSUE_FIELDS} }}
  }}
}}
"#
    )
}

fn update_mutation() -> String {
    format!(
        r#"
mutation IssueUpdate($id: String!, $input: IssueUpdateInput!) {{
  issueUpdate(id: $id, input: $input) {{
    success
    issue {{ {ISSUE_FIELDS} }}
  }}
}}
"#
    )
}

#[derive(Debug, Deserialize)]
struct GraphQlEnvelope {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<GraphQlErrorItem>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorItem {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    #[serde(default)]
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssuesPayload {
    page_info: PageInfo,
    #[serde(default)]
    nodes: Vec<IssueRecord>,
}

#[derive(Debug, Deserialize)]
struct MutationPayload {
    success: bool,
    #[serde(default)]
    issue: Option<IssueRecord>,
}

#[derive(Debug, Deserialize)]
struct Connection<T> {
    nodes: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct TeamStates {
    id: String,
    states: Connection<WorkflowState>,
}

/// Turns a raw GraphQL response body into its `data` member, surfacing the
/// first upstream error message.
pub fn unwrap_envelope(body: Value) -> Result<Value, UpstreamError> {
    let envelope: GraphQlEnvelope = serde_json::from_value(body)?;
    if let Some(errors) = envelope.errors.filter(|errors| !errors.is_empty()) {
        let message = errors
            .into_iter()
            .find_map(|error| error.message)
            .unwrap_or_else(|| "GraphQL error occurred".to_string());
        return Err(UpstreamError::GraphQl(message));
    }
    envelope
        .data
        .ok_or_else(|| UpstreamError::Decode("response has no data".to_string()))
}

/// Reads records saved from the tracker. Accepts a bare array, an
/// `issues` connection, or a whole GraphQL response.
pub fn parse_records(text: &str) -> Result<Vec<IssueRecord>, UpstreamError> {
    let mut value: Value = serde_json::from_str(text)?;
    if value.get("data").is_some() || value.get("errors").is_some() {
        value = unwrap_envelope(value)?;
    }
    if let Some(issues) = value.get_mut("issues") {
        value = issues.take();
    }
    if let Some(nodes) = value.get_mut("nodes") {
        value = nodes.take();
    }
    if !value.is_array() {
        return Err(UpstreamError::Decode(
            "expected an array of issues or an 'issues' connection".to_string(),
        ));
    }
    Ok(serde_json::from_value(value)?)
}

fn take_field<T: serde::de::DeserializeOwned>(mut data: Value, field: &str) -> Result<T, UpstreamError> {
    let value = data
        .get_mut(field)
        .map(Value::take)
        .ok_or_else(|| UpstreamError::Decode(format!("missing '{field}' in response")))?;
    Ok(serde_json::from_value(value)?)
}

fn mutation_issue(data: Value, field: &str) -> Result<IssueRecord, UpstreamError> {
    let payload: MutationPayload = take_field(data, field)?;
    if !payload.success {
        return Err(UpstreamError::Rejected(field.to_string()));
    }
    payload
        .issue
        .ok_or_else(|| UpstreamError::Decode(format!("'{field}' returned no issue")))
}

/// GraphQL client for the tracker API.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug, Clone)]
pub struct GraphQlClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
    page_size: usize,
}

#[cfg(not(target_arch = "wasm32"))]
impl GraphQlClient {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Result<Self, UpstreamError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(UpstreamError::MissingToken);
        }
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            token,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_http(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Posts one GraphQL document and returns its `data`.
    pub async fn execute(&self, query: &str, variables: Value) -> Result<Value, UpstreamError> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("Authorization", &self.token)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Http {
                status: status.as_u16(),
                message,
            });
        }
        let body: Value = response.json().await?;
        unwrap_envelope(body)
    }

    pub async fn workflow_states(&self) -> Result<StateDirectory, UpstreamError> {
        let data = self.execute(STATES_QUERY, json!({})).await?;
        let teams: Connection<TeamStates> = take_field(data, "teams")?;
        let mut directory = StateDirectory::default();
        for team in teams.nodes {
            directory.insert(team.id, team.states.nodes);
        }
        Ok(directory)
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl RecordSource for GraphQlClient {
    async fn fetch_page(&self, cursor: Option<String>) -> Result<RecordPage, UpstreamError> {
        let data = self
            .execute(
                ISSUES_QUERY,
                json!({ "first": self.page_size, "after": cursor }),
            )
            .await?;
        let payload: IssuesPayload = take_field(data, "issues")?;
        Ok(RecordPage {
            records: payload.nodes,
            has_more: payload.page_info.has_next_page,
            next_cursor: payload.page_info.end_cursor,
        })
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl IssueWriter for GraphQlClient {
    async fn create_record(&self, issue: NewIssue) -> Result<IssueRecord, UpstreamError> {
        let data = self
            .execute(&create_mutation(), json!({ "input": issue }))
            .await?;
        mutation_issue(data, "issueCreate")
    }

    async fn update_record(&self, id: &str, changes: IssueChanges) -> Result<IssueRecord, UpstreamError> {
        let data = self
            .execute(&update_mutation(), json!({ "id": id, "input": changes }))
            .await?;
        mutation_issue(data, "issueUpdate")
    }

    async fn delete_record(&self, id: &str) -> Result<(), UpstreamError> {
        let data = self.execute(DELETE_MUTATION, json!({ "id": id })).await?;
        let payload: MutationPayload = take_field(data, "issueDelete")?;
        if payload.success {
            Ok(())
        } else {
            Err(UpstreamError::Rejected("issueDelete".to_string()))
        }
    }
}
