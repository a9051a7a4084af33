//! HTTP request handlers.

use super::AppState;
use crate::db::{BucketStatus, DbError, MonitoredTarget, StatusPeriod};
use crate::history::{buckets, status_at, uptime_percentage, Bucket};
use crate::probe::normalize_url;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

const DAY_SECS: i64 = 86_400;
const MAX_DAYS: i64 = 365;
const MIN_BUCKET_SECS: i64 = 60;
const MAX_BUCKETS: i64 = 10_000;

fn db_error(e: DbError) -> Response {
    match e {
        DbError::NotFound => (StatusCode::NOT_FOUND, "Target not found").into_response(),
        other => {
            tracing::error!("Store error: {}", other);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ============================================================================
// API: Targets
// ============================================================================

#[derive(Debug, Serialize)]
pub struct TargetsResponse {
    pub targets: Vec<MonitoredTarget>,
}

#[derive(Debug, Serialize)]
pub struct TargetResponse {
    pub target: MonitoredTarget,
}

fn target_response(target: MonitoredTarget) -> Json<TargetResponse> {
    Json(TargetResponse { target })
}

pub async fn handle_get_targets(State(state): State<AppState>) -> Response {
    match state.store.get_targets() {
        Ok(targets) => Json(TargetsResponse { targets }).into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_get_target(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.get_target(id) {
        Ok(target) => target_response(target).into_response(),
        Err(e) => db_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTargetRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub subscribers: Option<Vec<String>>,
}

pub async fn handle_create_target(
    State(state): State<AppState>,
    Json(req): Json<CreateTargetRequest>,
) -> Response {
    let name = req.name.trim();
    let url = req.url.trim();
    if name.is_empty() || url.is_empty() {
        return (StatusCode::BAD_REQUEST, "Name and URL required").into_response();
    }
    if reqwest::Url::parse(&normalize_url(url)).is_err() {
        return (StatusCode::BAD_REQUEST, "Invalid URL").into_response();
    }

    let owner = req.owner.unwrap_or_default().trim().to_string();
    let mut subscribers = req.subscribers.unwrap_or_default();
    // The owner is always subscribed; `add_target` drops the duplicate.
    if !owner.is_empty() {
        subscribers.insert(0, owner.clone());
    }

    let mut target = MonitoredTarget {
        id: 0,
        name: name.to_string(),
        url: url.to_string(),
        owner,
        subscribers,
        created_at: Utc::now(),
    };

    match state.store.add_target(&mut target) {
        Ok(_) => {
            tracing::info!("Registered target {} ({})", target.name, target.url);
            (StatusCode::CREATED, target_response(target)).into_response()
        }
        Err(e) => db_error(e),
    }
}

pub async fn handle_delete_target(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.delete_target(id) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => db_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SubscriberRequest {
    pub subscriber: String,
}

pub async fn handle_add_subscriber(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<SubscriberRequest>,
) -> Response {
    let subscriber = req.subscriber.trim();
    if subscriber.is_empty() {
        return (StatusCode::BAD_REQUEST, "Subscriber required").into_response();
    }

    match state.store.add_subscriber(id, subscriber) {
        Ok(target) => target_response(target).into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_remove_subscriber(
    State(state): State<AppState>,
    Path((id, subscriber)): Path<(i64, String)>,
) -> Response {
    match state.store.remove_subscriber(id, &subscriber) {
        Ok(target) => target_response(target).into_response(),
        Err(e) => db_error(e),
    }
}

// ============================================================================
// API: Status history
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryResponse {
    pub status_history: Vec<StatusPeriod>,
}

/// Load a target's history, answering 404 for unknown targets.
fn load_history(state: &AppState, id: i64) -> Result<Vec<StatusPeriod>, Response> {
    state.store.get_target(id).map_err(db_error)?;
    state.store.get_history(id).map_err(db_error)
}

pub async fn handle_status_history(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let mut history = match load_history(&state, id) {
        Ok(h) => h,
        Err(resp) => return resp,
    };
    history.sort_by_key(|p| p.from);

    Json(StatusHistoryResponse {
        status_history: history,
    })
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct StatusBlocksQuery {
    #[serde(default)]
    pub days: Option<i64>,
    #[serde(default)]
    pub bucket_secs: Option<i64>,
    #[serde(default)]
    pub end: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBlocksResponse {
    pub status_blocks: Vec<Bucket>,
    /// Percentage of online buckets among buckets with data.
    pub uptime: Option<f64>,
}

pub async fn handle_status_blocks(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<StatusBlocksQuery>,
) -> Response {
    let days = query.days.unwrap_or(30);
    if !(1..=MAX_DAYS).contains(&days) {
        return (StatusCode::BAD_REQUEST, "days must be between 1 and 365").into_response();
    }

    let bucket_secs = query.bucket_secs.unwrap_or(DAY_SECS);
    if bucket_secs < MIN_BUCKET_SECS {
        return (StatusCode::BAD_REQUEST, "bucket_secs must be at least 60").into_response();
    }

    let count = days * DAY_SECS / bucket_secs;
    if count == 0 || count > MAX_BUCKETS {
        return (StatusCode::BAD_REQUEST, "Too few or too many buckets").into_response();
    }

    let end = match query.end.as_deref() {
        Some(s) => match parse_time(s) {
            Some(t) => t,
            None => return (StatusCode::BAD_REQUEST, "Invalid end time").into_response(),
        },
        None => Utc::now(),
    };

    let history = match load_history(&state, id) {
        Ok(h) => h,
        Err(resp) => return resp,
    };

    let blocks = buckets(&history, end, ChronoDuration::seconds(bucket_secs), count as usize);
    let uptime = uptime_percentage(&blocks);

    Json(StatusBlocksResponse {
        status_blocks: blocks,
        uptime,
    })
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct StatusAtQuery {
    pub at: String,
}

#[derive(Debug, Serialize)]
pub struct StatusAtResponse {
    pub at: DateTime<Utc>,
    pub status: BucketStatus,
}

pub async fn handle_status_at(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<StatusAtQuery>,
) -> Response {
    let Some(at) = parse_time(&query.at) else {
        return (StatusCode::BAD_REQUEST, "Invalid time").into_response();
    };

    let history = match load_history(&state, id) {
        Ok(h) => h,
        Err(resp) => return resp,
    };

    Json(StatusAtResponse {
        at,
        status: status_at(&history, at),
    })
    .into_response()
}
