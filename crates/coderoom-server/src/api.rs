use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use coderoom_protocol::{
    CreateSessionResponse, ErrorBody, ExecuteRequest, ExecutionResult, HealthResponse,
    SessionLookupResponse,
};
use tracing::{debug, error, info};

use crate::server::AppState;

const SESSION_NOT_FOUND: &str = "Session not found";

/// GET /api/health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// POST /api/sessions - Create a session seeded with the default file.
pub async fn create_session(State(state): State<Arc<AppState>>) -> Json<CreateSessionResponse> {
    Json(CreateSessionResponse {
        session_id: state.registry.create_session(),
    })
}

/// GET /api/sessions/{id}
pub async fn session_info(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> (StatusCode, Json<SessionLookupResponse>) {
    match state.registry.session_info(&session_id).await {
        Ok(session) => (
            StatusCode::OK,
            Json(SessionLookupResponse {
                exists: true,
                session: Some(session),
                message: None,
            }),
        ),
        Err(_) => (
            StatusCode::NOT_FOUND,
            Json(SessionLookupResponse {
                exists: false,
                session: None,
                message: Some(SESSION_NOT_FOUND.to_string()),
            }),
        ),
    }
}

/// POST /api/execute - Run source and share the result with the session.
pub async fn execute(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<ExecutionResult>, (StatusCode, Json<ErrorBody>)> {
    if !state.registry.session_exists(&request.session_id) {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: SESSION_NOT_FOUND.to_string(),
            }),
        ));
    }

    info!(
        session_id = %request.session_id,
        language = %request.language,
        bytes = request.source.len(),
        "execution requested"
    );
    // Detached so a client that hangs up neither orphans the run nor skips
    // the broadcast.
    let task = tokio::spawn(async move {
        let result = state
            .orchestrator
            .execute(&request.language, &request.source)
            .await;

        // The session may have emptied out while the program ran.
        if let Err(e) = state
            .registry
            .publish_run_result(
                &request.session_id,
                request.participant_id.as_ref(),
                result.clone(),
            )
            .await
        {
            debug!(session_id = %request.session_id, error = %e, "run result not broadcast");
        }
        result
    });

    match task.await {
        Ok(result) => Ok(Json(result)),
        Err(e) => {
            error!(error = %e, "execution task failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: "Execution failed".to_string(),
                }),
            ))
        }
    }
}
