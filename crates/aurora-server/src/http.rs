use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};

use aurora_orchestrator::model::{ApprovalRecord, Breakpoint, Workflow};
use aurora_types::AuroraErrorKind;
use aurora_wire::{
    ApprovalRecordView, ApprovalRequest, ApprovalResponse, BreakpointView, DashboardStats,
    DashboardStatsQuery, PauseQuery, PendingApprovalEntry, PendingApprovalsQuery,
    PendingApprovalsResponse, PauseResponse, ResumeResponse, StartWorkflowRequest,
    StartWorkflowResponse, WorkflowState,
};

use crate::AppState;

/// Builds the router and serves it, blocking until shutdown (spec §6
/// External interfaces).
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(target: "aurora.server", %addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                futures::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}

fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/workflows", post(start_workflow))
        .route("/api/v1/workflows/pending-approvals", get(pending_approvals))
        .route("/api/v1/workflows/{id}/state", get(get_state))
        .route("/api/v1/workflows/{id}/approval", post(resolve_approval))
        .route("/api/v1/workflows/{id}/pause", post(pause_workflow))
        .route("/api/v1/workflows/{id}/resume", post(resume_workflow))
        .route("/api/v1/dashboard/stats", get(dashboard_stats))
        .route("/ws/workflows/{id}", get(ws_workflow))
        .layer(cors)
        .with_state(state)
}

/// Maps the spec's stable error kinds onto HTTP status codes (spec §7
/// Error handling: `ValidationError` is 4xx and not retried; the rest are
/// operator- or system-resolvable conditions surfaced with their own
/// codes).
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AuroraErrorKind::ValidationError(_) => StatusCode::BAD_REQUEST,
            AuroraErrorKind::ContextTooLarge(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AuroraErrorKind::BudgetExceeded(_) => StatusCode::PAYMENT_REQUIRED,
            AuroraErrorKind::TaskExhausted(_) => StatusCode::CONFLICT,
            AuroraErrorKind::SandboxUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AuroraErrorKind::CycleDetected(_) => StatusCode::BAD_REQUEST,
            AuroraErrorKind::DependencyFailed(_) => StatusCode::CONFLICT,
            AuroraErrorKind::StuckAgent(_) => StatusCode::CONFLICT,
            AuroraErrorKind::ConsensusRequired(_) => StatusCode::CONFLICT,
            AuroraErrorKind::Cancelled(_) => StatusCode::CONFLICT,
        };
        (status, Json(aurora_wire::ErrorResponse {
            kind: self.0.kind_name(),
            message: self.0.message(),
            context: None,
        }))
            .into_response()
    }
}

struct ApiError(AuroraErrorKind);

impl From<AuroraErrorKind> for ApiError {
    fn from(err: AuroraErrorKind) -> Self {
        ApiError(err)
    }
}

async fn start_workflow(
    State(state): State<AppState>,
    Json(req): Json<StartWorkflowRequest>,
) -> Result<Json<StartWorkflowResponse>, ApiError> {
    let workflow = state
        .orchestrator
        .start_workflow(&req.project_id, req.mode, req.description)
        .await?;
    Ok(Json(StartWorkflowResponse {
        workflow_id: workflow.id.0,
        status: workflow.status,
    }))
}

async fn get_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowState>, ApiError> {
    let workflow = state
        .orchestrator
        .get_state(&id)
        .await
        .ok_or_else(|| ApiError(AuroraErrorKind::ValidationError(format!("unknown workflow {id}"))))?;
    Ok(Json(to_workflow_state(&workflow)))
}

async fn pending_approvals(
    State(state): State<AppState>,
    Query(query): Query<PendingApprovalsQuery>,
) -> Json<PendingApprovalsResponse> {
    let pending: Vec<PendingApprovalEntry> = state
        .orchestrator
        .pending_approvals(query.project_id.as_deref())
        .await
        .iter()
        .filter_map(|wf| wf.breakpoint.as_ref().map(|bp| to_pending_entry(wf, bp)))
        .collect();
    let total = pending.len();
    Json(PendingApprovalsResponse { pending, total })
}

async fn resolve_approval(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ApprovalRequest>,
) -> Result<Json<ApprovalResponse>, ApiError> {
    let workflow = state
        .orchestrator
        .resolve_approval(&id, req.approved, req.reviewer_id, req.comments, req.modifications)
        .await?;
    Ok(Json(if req.approved {
        ApprovalResponse::Resumed {
            resumed_at: workflow.updated_at,
        }
    } else {
        ApprovalResponse::Rejected
    }))
}

async fn pause_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PauseQuery>,
) -> Result<Json<PauseResponse>, ApiError> {
    let workflow = state
        .orchestrator
        .pause(&id, query.reason.unwrap_or_else(|| "manual pause".to_string()))
        .await?;
    Ok(Json(PauseResponse {
        paused_at: workflow.updated_at,
    }))
}

async fn resume_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ResumeResponse>, ApiError> {
    let workflow = state.orchestrator.resume(&id).await?;
    Ok(Json(ResumeResponse {
        resumed_at: workflow.updated_at,
    }))
}

async fn dashboard_stats(
    State(state): State<AppState>,
    Query(query): Query<DashboardStatsQuery>,
) -> Json<DashboardStats> {
    let snapshot = state
        .orchestrator
        .dashboard_stats(query.project_id.as_deref(), query.period_days)
        .await;
    Json(DashboardStats {
        period_days: snapshot.period_days,
        total_workflows: snapshot.total_workflows,
        completed: snapshot.completed,
        failed: snapshot.failed,
        paused: snapshot.paused,
        total_cost: snapshot.total_cost,
        total_tasks: snapshot.total_tasks,
        tasks_succeeded: snapshot.tasks_succeeded,
        tasks_failed: snapshot.tasks_failed,
        average_attempts_per_task: snapshot.average_attempts_per_task,
    })
}

/// Upgrades to a WebSocket that pushes every `WorkflowEvent` committed for
/// this workflow, starting from the current snapshot if one exists (spec
/// §6 WebSocket: late subscribers get the latest snapshot, never a replay;
/// clients are expected to reconnect with bounded backoff on their side).
async fn ws_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_ws(socket, state, id))
}

async fn handle_ws(mut socket: WebSocket, state: AppState, workflow_id: String) {
    let (rx, latest) = state.orchestrator.event_bus().subscribe(&workflow_id).await;
    if let Some(event) = latest {
        if send_event(&mut socket, &event).await.is_err() {
            return;
        }
    }

    let mut stream = tokio_stream::wrappers::BroadcastStream::new(rx);
    loop {
        tokio::select! {
            next = stream.next() => {
                match next {
                    Some(Ok(event)) => {
                        if send_event(&mut socket, &event).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(_lagged)) => continue,
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}

async fn send_event(socket: &mut WebSocket, event: &aurora_wire::WorkflowEvent) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(event).unwrap_or_default();
    socket.send(WsMessage::Text(payload.into())).await
}

fn to_workflow_state(workflow: &Workflow) -> WorkflowState {
    WorkflowState {
        workflow_id: workflow.id.0.clone(),
        project_id: workflow.project_id.0.clone(),
        mode: workflow.mode,
        phase: workflow.phase,
        status: workflow.status,
        revision: workflow.revision,
        progress: workflow.progress,
        started_at: workflow.started_at,
        updated_at: workflow.updated_at,
        breakpoint: workflow.breakpoint.as_ref().map(to_breakpoint_view),
        approval_history: workflow.approval_history.iter().map(to_approval_view).collect(),
        budget_cap: workflow.budget_cap,
        actual_cost: workflow.actual_cost,
    }
}

fn to_breakpoint_view(bp: &Breakpoint) -> BreakpointView {
    BreakpointView {
        checkpoint_name: bp.checkpoint_name.clone(),
        reason: bp.reason.clone(),
        context: bp.context.clone(),
        created_at: bp.created_at,
        requires_approval: bp.requires_approval,
    }
}

fn to_approval_view(record: &ApprovalRecord) -> ApprovalRecordView {
    ApprovalRecordView {
        approval_id: record.approval_id.0.clone(),
        approved: record.approved,
        reviewer_id: record.reviewer_id.clone(),
        comments: record.comments.clone(),
        modifications: record.modifications.clone(),
        decided_at: record.decided_at,
    }
}

fn to_pending_entry(workflow: &Workflow, bp: &Breakpoint) -> PendingApprovalEntry {
    PendingApprovalEntry {
        workflow_id: workflow.id.0.clone(),
        project_id: workflow.project_id.0.clone(),
        checkpoint_name: bp.checkpoint_name.clone(),
        reason: bp.reason.clone(),
        created_at: bp.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aurora_core::event_bus::EventBus;
    use aurora_core::store::DurableStore;
    use aurora_orchestrator::{BudgetGovernor, OrchestratorService};
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn test_state() -> AppState {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(DurableStore::new(tmp.path()).unwrap());
        let orchestrator = Arc::new(OrchestratorService::new(
            store,
            EventBus::new(),
            BudgetGovernor::new(1_000.0, 10_000.0),
        ));
        AppState { orchestrator }
    }

    #[tokio::test]
    async fn start_workflow_then_fetch_state_round_trips() {
        let state = test_state();
        let state = state.await;
        let app = app_router(state.clone());

        let body = serde_json::json!({
            "project_id": "proj-1",
            "mode": "autonomous",
            "description": "build a todo API",
        });
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/api/v1/workflows")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let started: StartWorkflowResponse = serde_json::from_slice(&bytes).unwrap();

        let request = axum::http::Request::builder()
            .method("GET")
            .uri(format!("/api/v1/workflows/{}/state", started.workflow_id))
            .body(axum::body::Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_workflow_state_is_404_class_validation_error() {
        let state = test_state().await;
        let app = app_router(state);
        let request = axum::http::Request::builder()
            .method("GET")
            .uri("/api/v1/workflows/does-not-exist/state")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
