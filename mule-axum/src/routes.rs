use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use mule_broker::{BrokerError, Job, JobId, LeaseId, WorkerId};

use crate::{error::ApiError, state::AppState};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

#[derive(Debug, Deserialize)]
pub struct EnqueueBody {
    pub payload: String,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub job_id: JobId,
}

#[derive(Debug, Deserialize)]
pub struct PollBody {
    pub worker_id: String,
}

#[derive(Debug, Deserialize)]
pub struct LeaseUpdateBody {
    pub worker_id: String,
    pub job_id: String,
    pub lease_id: u64,
}

/// Parse a JSON request body, mapping any decode failure to a 400.
fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, BrokerError> {
    serde_json::from_slice(body).map_err(|err| BrokerError::InvalidRequest(err.to_string()))
}

pub async fn health() -> &'static str {
    "ok"
}

/// Accept a new job, deduplicated by the `Idempotency-Key` header.
///
/// The key is reserved before the body is even parsed, so a concurrent
/// duplicate gets a conflict rather than a second job; a parse failure
/// releases the reservation again.
pub async fn enqueue(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<EnqueueResponse>, ApiError> {
    let idem_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|key| !key.is_empty())
        .map(str::to_owned);

    if let Some(ref key) = idem_key {
        if let Some(existing) = state.broker.reserve_key(key)? {
            return Ok(Json(EnqueueResponse { job_id: existing }));
        }
    }

    let request: EnqueueBody = match parse_json(&body) {
        Ok(request) => request,
        Err(err) => {
            if let Some(ref key) = idem_key {
                state.broker.release_key(key);
            }
            return Err(err.into());
        }
    };

    let job_id = state.broker.enqueue(request.payload, idem_key.as_deref())?;
    Ok(Json(EnqueueResponse { job_id }))
}

/// Long-poll for work. Responds 204 when the deadline passes with nothing
/// eligible; the worker is expected to simply poll again.
pub async fn poll(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let request: PollBody = parse_json(&body)?;
    if request.worker_id.is_empty() {
        return Err(BrokerError::InvalidRequest("worker_id must not be empty".to_string()).into());
    }

    let worker = WorkerId::from(request.worker_id);
    match state.broker.poll(&worker).await? {
        Some(job) => Ok(Json(job).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

pub async fn ack(State(state): State<AppState>, body: Bytes) -> Result<StatusCode, ApiError> {
    let request = parse_lease_update(&body)?;
    state.broker.ack(
        &WorkerId::from(request.worker_id),
        &parse_job_id(&request.job_id)?,
        LeaseId::from(request.lease_id),
    )?;
    Ok(StatusCode::OK)
}

pub async fn fail(State(state): State<AppState>, body: Bytes) -> Result<StatusCode, ApiError> {
    let request = parse_lease_update(&body)?;
    state.broker.fail(
        &WorkerId::from(request.worker_id),
        &parse_job_id(&request.job_id)?,
        LeaseId::from(request.lease_id),
    )?;
    Ok(StatusCode::OK)
}

pub async fn list_jobs(State(state): State<AppState>) -> Json<HashMap<JobId, Job>> {
    Json(state.broker.snapshot_all())
}

pub async fn list_dead(State(state): State<AppState>) -> Json<HashMap<JobId, Job>> {
    Json(state.broker.snapshot_dead())
}

fn parse_lease_update(body: &[u8]) -> Result<LeaseUpdateBody, BrokerError> {
    let request: LeaseUpdateBody = parse_json(body)?;
    if request.worker_id.is_empty() || request.job_id.is_empty() {
        return Err(BrokerError::InvalidRequest(
            "worker_id and job_id must not be empty".to_string(),
        ));
    }
    Ok(request)
}

/// An id that does not even parse can never name a job, so the caller gets
/// the same answer as for any other unknown id.
fn parse_job_id(value: &str) -> Result<JobId, BrokerError> {
    value
        .parse()
        .map_err(|_| BrokerError::JobNotFound(value.to_string()))
}
