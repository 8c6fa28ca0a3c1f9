use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{net::TcpListener, sync::RwLock};

pub const FIRST_BUILD_ID: u64 = 100;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    pub text: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    pub id: u64,
    pub build_type_id: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<Comment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
    #[serde(
        rename = "snapshot-dependencies",
        skip_serializing_if = "Option::is_none"
    )]
    pub snapshot_dependencies: Option<Value>,
    #[serde(
        rename = "artifact-dependencies",
        skip_serializing_if = "Option::is_none"
    )]
    pub artifact_dependencies: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub canceled: bool,
}

impl Build {
    pub fn new(build_type_id: &str, state: &str) -> Self {
        Self {
            build_type_id: build_type_id.to_string(),
            state: state.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Deserialize)]
pub struct BuildTypeInput {
    pub id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueBuild {
    pub build_type: BuildTypeInput,
    pub branch_name: Option<String>,
    pub comment: Option<Comment>,
    pub properties: Option<Value>,
    pub personal: Option<String>,
    #[serde(rename = "snapshot-dependencies")]
    pub snapshot_dependencies: Option<Value>,
    #[serde(rename = "artifact-dependencies")]
    pub artifact_dependencies: Option<Value>,
}

/// Cancel/stop payload. `readdIntoQueue` is a string on the wire, so a
/// native JSON boolean is rejected with 422.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopBuild {
    pub comment: Option<String>,
    pub readd_into_queue: String,
}

#[derive(Clone, Debug)]
pub struct Artifact {
    pub content_type: String,
    pub content: Vec<u8>,
}

/// In-memory build server state.
#[derive(Debug)]
pub struct MockState {
    token: Option<String>,
    next_id: u64,
    builds: BTreeMap<u64, Build>,
    artifacts: HashMap<(u64, String), Artifact>,
    last_stop_comment: Option<String>,
}

impl Default for MockState {
    fn default() -> Self {
        Self::new()
    }
}

impl MockState {
    pub fn new() -> Self {
        Self {
            token: None,
            next_id: FIRST_BUILD_ID,
            builds: BTreeMap::new(),
            artifacts: HashMap::new(),
            last_stop_comment: None,
        }
    }

    /// Require `Authorization: Bearer <token>` on every request.
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Insert a build, assigning the next id when `build.id` is 0.
    pub fn insert_build(&mut self, mut build: Build) -> u64 {
        if build.id == 0 {
            build.id = self.next_id;
        }
        self.next_id = self.next_id.max(build.id + 1);
        let id = build.id;
        self.builds.insert(id, build);
        id
    }

    pub fn set_state(&mut self, id: u64, state: &str) -> bool {
        match self.builds.get_mut(&id) {
            Some(build) => {
                build.state = state.to_string();
                true
            }
            None => false,
        }
    }

    pub fn add_artifact(&mut self, id: u64, path: &str, content_type: &str, content: &[u8]) {
        self.artifacts.insert(
            (id, path.to_string()),
            Artifact {
                content_type: content_type.to_string(),
                content: content.to_vec(),
            },
        );
    }

    pub fn build(&self, id: u64) -> Option<&Build> {
        self.builds.get(&id)
    }

    pub fn last_stop_comment(&self) -> Option<&str> {
        self.last_stop_comment.as_deref()
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let Some(token) = &self.token else {
            return Ok(());
        };
        let expected = format!("Bearer {token}");
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        if presented == Some(expected.as_str()) {
            Ok(())
        } else {
            Err((StatusCode::UNAUTHORIZED, "Authentication required".to_string()))
        }
    }
}

pub type Db = Arc<RwLock<MockState>>;

type ApiError = (StatusCode, String);

pub fn shared(state: MockState) -> Db {
    Arc::new(RwLock::new(state))
}

pub fn app() -> Router {
    app_with_state(shared(MockState::new()))
}

pub fn app_with_state(db: Db) -> Router {
    Router::new()
        .route("/app/rest/builds", get(list_builds))
        .route("/app/rest/builds/{locator}", get(get_build).post(stop_build))
        .route(
            "/app/rest/builds/{locator}/artifacts/content/{*path}",
            get(get_artifact),
        )
        .route("/app/rest/buildQueue", post(queue_build))
        .route("/app/rest/buildQueue/{locator}", post(cancel_queued_build))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

pub async fn run_with_state(listener: TcpListener, db: Db) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with_state(db)).await
}

fn parse_id_locator(locator: &str) -> Result<u64, ApiError> {
    let raw = locator.strip_prefix("id:").unwrap_or(locator);
    raw.parse().map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            format!("Unsupported build locator '{locator}'"),
        )
    })
}

fn nothing_found(locator: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        format!("Nothing is found by locator '{locator}'"),
    )
}

async fn get_build(
    State(db): State<Db>,
    headers: HeaderMap,
    Path(locator): Path<String>,
) -> Result<Json<Build>, ApiError> {
    let state = db.read().await;
    state.authorize(&headers)?;
    let id = parse_id_locator(&locator)?;
    state
        .builds
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| nothing_found(&locator))
}

#[derive(Default)]
struct ListFilter {
    build_type: Option<String>,
    branch: Option<String>,
    user: Option<String>,
    status: Option<String>,
    running: bool,
    canceled: bool,
    start: usize,
    count: Option<usize>,
}

fn parse_list_locator(locator: &str) -> Result<ListFilter, ApiError> {
    let mut filter = ListFilter::default();
    let bad = |dim: &str| {
        (
            StatusCode::BAD_REQUEST,
            format!("Invalid locator dimension '{dim}'"),
        )
    };
    for dim in split_dimensions(locator).into_iter().filter(|d| !d.is_empty()) {
        let (name, value) = dim.split_once(':').ok_or_else(|| bad(dim))?;
        let value = unwrap_nested(value);
        match name {
            "buildType" => filter.build_type = Some(value.to_string()),
            "branch" => filter.branch = Some(value.to_string()),
            "user" => filter.user = Some(value.to_string()),
            "status" => filter.status = Some(value.to_string()),
            "running" => filter.running = value == "true",
            "canceled" => filter.canceled = value == "true",
            "start" => filter.start = value.parse().map_err(|_| bad(dim))?,
            "count" => filter.count = Some(value.parse().map_err(|_| bad(dim))?),
            "lookupLimit" => {}
            _ => return Err(bad(dim)),
        }
    }
    Ok(filter)
}

/// Split a locator on commas that are not inside `(...)`.
fn split_dimensions(locator: &str) -> Vec<&str> {
    let mut dims = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in locator.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                dims.push(&locator[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    dims.push(&locator[start..]);
    dims
}

fn unwrap_nested(value: &str) -> &str {
    value
        .strip_prefix('(')
        .and_then(|v| v.strip_suffix(')'))
        .unwrap_or(value)
}

async fn list_builds(
    State(db): State<Db>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let state = db.read().await;
    state.authorize(&headers)?;
    let locator = params.get("locator").cloned().unwrap_or_default();
    let filter = parse_list_locator(&locator)?;

    if let Some(build_type) = &filter.build_type {
        if !state.builds.values().any(|b| &b.build_type_id == build_type) {
            return Err(nothing_found(&format!("buildType:{build_type}")));
        }
    }

    let matching: Vec<&Build> = state
        .builds
        .values()
        .rev()
        .filter(|b| filter.build_type.as_ref().is_none_or(|t| &b.build_type_id == t))
        .filter(|b| {
            filter
                .branch
                .as_ref()
                .is_none_or(|br| b.branch_name.as_ref() == Some(br))
        })
        .filter(|b| filter.user.as_ref().is_none_or(|u| b.triggered_by.as_ref() == Some(u)))
        .filter(|b| filter.status.as_ref().is_none_or(|s| b.status.as_ref() == Some(s)))
        .filter(|b| !filter.running || b.state == "running")
        .filter(|b| !filter.canceled || b.canceled)
        .collect();

    let total = matching.len();
    let count = filter.count.unwrap_or(100);
    let page: Vec<&Build> = matching.into_iter().skip(filter.start).take(count).collect();

    let mut body = serde_json::json!({
        "count": page.len(),
        "href": format!("/app/rest/builds?locator={locator}"),
        "build": page,
    });
    if filter.start + count < total {
        body["nextHref"] = Value::String(format!(
            "/app/rest/builds?locator=start:{},count:{count}",
            filter.start + count
        ));
    }
    Ok(Json(body))
}

async fn queue_build(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(input): Json<QueueBuild>,
) -> Result<Json<Build>, ApiError> {
    let mut state = db.write().await;
    state.authorize(&headers)?;
    if input.personal.as_deref().is_some_and(|p| p != "false" && p != "true") {
        return Err((
            StatusCode::BAD_REQUEST,
            "personal must be \"true\" or \"false\"".to_string(),
        ));
    }
    let build = Build {
        id: 0,
        build_type_id: input.build_type.id,
        state: "queued".to_string(),
        status: None,
        branch_name: input.branch_name,
        comment: input.comment,
        properties: input.properties,
        snapshot_dependencies: input.snapshot_dependencies,
        artifact_dependencies: input.artifact_dependencies,
        triggered_by: None,
        canceled: false,
    };
    let id = state.insert_build(build);
    Ok(Json(state.builds[&id].clone()))
}

/// Cancel a build that is still in the queue. Builds that already left the
/// queue are not addressable here, so they yield 404.
async fn cancel_queued_build(
    State(db): State<Db>,
    headers: HeaderMap,
    Path(locator): Path<String>,
    Json(input): Json<StopBuild>,
) -> Result<Json<Build>, ApiError> {
    let mut state = db.write().await;
    state.authorize(&headers)?;
    let id = parse_id_locator(&locator)?;
    state.last_stop_comment = input.comment;
    let build = state
        .builds
        .get_mut(&id)
        .filter(|b| b.state == "queued")
        .ok_or_else(|| nothing_found(&locator))?;
    if input.readd_into_queue != "true" {
        build.state = "finished".to_string();
        build.status = Some("UNKNOWN".to_string());
        build.canceled = true;
    }
    Ok(Json(build.clone()))
}

async fn stop_build(
    State(db): State<Db>,
    headers: HeaderMap,
    Path(locator): Path<String>,
    Json(input): Json<StopBuild>,
) -> Result<Json<Build>, ApiError> {
    let mut state = db.write().await;
    state.authorize(&headers)?;
    let id = parse_id_locator(&locator)?;
    state.last_stop_comment = input.comment;
    let build = state
        .builds
        .get_mut(&id)
        .ok_or_else(|| nothing_found(&locator))?;
    if build.state != "running" {
        return Err((
            StatusCode::CONFLICT,
            format!("Build {id} is {} and cannot be stopped", build.state),
        ));
    }
    if input.readd_into_queue == "true" {
        build.state = "queued".to_string();
    } else {
        build.state = "finished".to_string();
        build.status = Some("UNKNOWN".to_string());
        build.canceled = true;
    }
    Ok(Json(build.clone()))
}

async fn get_artifact(
    State(db): State<Db>,
    headers: HeaderMap,
    Path((locator, path)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let state = db.read().await;
    state.authorize(&headers)?;
    let id = parse_id_locator(&locator)?;
    let path = path.trim_start_matches('/').to_string();
    let artifact = state
        .artifacts
        .get(&(id, path.clone()))
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("No artifact '{path}' in build {id}")))?;
    Ok((
        [(header::CONTENT_TYPE, artifact.content_type.clone())],
        artifact.content.clone(),
    )
        .into_response())
}
