use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use snowcast::{
    Lease, LeaseTable, LesseeId, ReleaseOutcome, Request, Response, SequencerDefinition, execute,
};

use super::{error::ApiError, session::SessionRegistry};

/// Shared state of every handler.
pub struct AppState {
    pub table: LeaseTable,
    pub sessions: Arc<SessionRegistry>,
    pub default_max_logical_node_count: u32,
    pub default_backup_count: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AttachRequest {
    pub session_id: String,
    pub epoch_offset_millis: u64,
    #[serde(default)]
    pub max_logical_node_count: Option<u32>,
    #[serde(default)]
    pub backup_count: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AttachResponse {
    pub logical_node_id: u32,
    #[serde(flatten)]
    pub sequencer: SequencerView,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DetachRequest {
    pub session_id: String,
    pub logical_node_id: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DetachResponse {
    pub released: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DestroyResponse {
    pub destroyed: bool,
}

/// What a client needs to generate ids for a leased slot.
#[derive(Debug, Serialize, Deserialize)]
pub struct SequencerView {
    pub name: String,
    pub epoch_offset_millis: u64,
    pub max_logical_node_count: u32,
    pub backup_count: u16,
    pub node_bits: u32,
    pub counter_bits: u32,
}

impl From<&SequencerDefinition> for SequencerView {
    fn from(definition: &SequencerDefinition) -> Self {
        let layout = definition.layout();
        Self {
            name: definition.name().to_owned(),
            epoch_offset_millis: definition.epoch().unix_millis(),
            max_logical_node_count: definition.max_logical_node_count(),
            backup_count: definition.backup_count(),
            node_bits: layout.node_bits(),
            counter_bits: layout.counter_bits(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SequencerResponse {
    pub definition: SequencerView,
    pub leases: Vec<Lease>,
}

fn parse_session(raw: &str) -> Result<LesseeId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("malformed session id '{raw}'")))
}

fn live_session(state: &AppState, raw: &str) -> Result<LesseeId, ApiError> {
    let lessee = parse_session(raw)?;
    if state.sessions.is_alive(lessee) {
        Ok(lessee)
    } else {
        Err(ApiError::UnknownSession(raw.to_owned()))
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".into(),
    })
}

pub async fn open_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let lessee = state.sessions.open();
    (
        StatusCode::CREATED,
        Json(SessionResponse {
            session_id: lessee.to_string(),
        }),
    )
}

pub async fn keepalive(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let lessee = parse_session(&session_id)?;
    if state.sessions.keepalive(lessee) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::UnknownSession(session_id))
    }
}

pub async fn close_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let lessee = parse_session(&session_id)?;
    if state.sessions.close(lessee) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::UnknownSession(session_id))
    }
}

pub async fn attach(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    payload: Result<Json<AttachRequest>, JsonRejection>,
) -> Result<Json<AttachResponse>, ApiError> {
    let request = body(payload)?;
    let lessee = live_session(&state, &request.session_id)?;

    let response = execute(
        &state.table,
        Request::Attach {
            name: name.clone(),
            epoch_offset_millis: request.epoch_offset_millis,
            max_logical_node_count: request
                .max_logical_node_count
                .unwrap_or(state.default_max_logical_node_count),
            backup_count: request.backup_count.unwrap_or(state.default_backup_count),
            lessee,
        },
    )?;
    let (definition, logical_node_id) = match response {
        Response::Attached {
            definition,
            logical_node_id,
        } => (definition, logical_node_id),
        other => {
            return Err(ApiError::Snowcast(snowcast::Error::Storage(format!(
                "unexpected attach response {other:?}"
            ))));
        }
    };

    // The session may have expired while the lease was being taken; its
    // disconnect has already run, so this slot would never be released.
    if !state.sessions.is_alive(lessee) {
        state.table.release(&name, logical_node_id, lessee)?;
        return Err(ApiError::UnknownSession(request.session_id));
    }

    tracing::debug!(%lessee, sequencer = %name, logical_node_id, "attached");
    Ok(Json(AttachResponse {
        logical_node_id,
        sequencer: SequencerView::from(&definition),
    }))
}

pub async fn detach(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    payload: Result<Json<DetachRequest>, JsonRejection>,
) -> Result<Json<DetachResponse>, ApiError> {
    let request = body(payload)?;
    let lessee = parse_session(&request.session_id)?;

    let response = execute(
        &state.table,
        Request::Detach {
            name,
            logical_node_id: request.logical_node_id,
            lessee,
        },
    )?;
    let released = matches!(
        response,
        Response::Detached {
            outcome: ReleaseOutcome::Released
        }
    );
    Ok(Json(DetachResponse { released }))
}

pub async fn destroy(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<DestroyResponse>, ApiError> {
    let response = execute(&state.table, Request::Destroy { name })?;
    let destroyed = matches!(response, Response::Destroyed { existed: true });
    Ok(Json(DestroyResponse { destroyed }))
}

pub async fn get_sequencer(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<SequencerResponse>, ApiError> {
    let definition = state
        .table
        .definition(&name)?
        .ok_or_else(|| snowcast::Error::UnknownSequencer(name.clone()))?;
    let leases = state.table.leases(&name)?;

    Ok(Json(SequencerResponse {
        definition: SequencerView::from(&definition),
        leases,
    }))
}
