// HTTP API for the IOC correlation engine

use crate::correlate::{assemble_candidates, delete_evidence_with_recount, process_candidates};
use crate::db::{Database, EvidenceFile, StoredCase, StoredEvidence};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post, put},
    Router,
};
use ioc_core::{extract_indicators, Candidate, EngineError};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

pub struct AppState {
    pub db: Database,
}

pub type SharedState = Arc<AppState>;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn db_error(e: rusqlite::Error) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "message": format!("Database error: {}", e) })),
    )
}

fn not_found(what: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "message": format!("{} not found", what) })),
    )
}

fn engine_error(e: EngineError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match e {
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "message": e.to_string() })))
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct CreateCaseRequest {
    title: String,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvidenceRequest {
    case_id: String,
    title: String,
    content: String,
    source: String,
    observation_ts: i64,
    #[serde(default)]
    files: Vec<EvidenceFile>,
    /// Explicit candidates submitted alongside the evidence. Entries with
    /// an empty `threatValue` are ignored.
    #[serde(default)]
    observables: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CaseFilter {
    case_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExtractRequest {
    text: String,
}

// ============================================================================
// Case Endpoints (collaborator surface for the cases-count join)
// ============================================================================

async fn list_cases(State(state): State<SharedState>) -> impl IntoResponse {
    match state.db.list_cases() {
        Ok(cases) => (StatusCode::OK, Json(json!(cases))),
        Err(e) => db_error(e),
    }
}

async fn create_case(
    State(state): State<SharedState>,
    Json(req): Json<CreateCaseRequest>,
) -> impl IntoResponse {
    let now = now_ms();
    let case = StoredCase {
        id: uuid::Uuid::new_v4().to_string(),
        title: req.title,
        status: req.status.unwrap_or_else(|| "open".to_string()),
        created_at: now,
        updated_at: now,
    };
    match state.db.save_case(&case) {
        Ok(_) => {
            state
                .db
                .record_audit("create:case", json!({ "id": case.id }), Some(&case.id));
            (StatusCode::CREATED, Json(json!(case)))
        }
        Err(e) => db_error(e),
    }
}

async fn get_case(State(state): State<SharedState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.db.get_case(&id) {
        Ok(Some(case)) => (StatusCode::OK, Json(json!(case))),
        Ok(None) => not_found("Case"),
        Err(e) => db_error(e),
    }
}

async fn delete_case(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.db.delete_case(&id) {
        Ok(true) => {
            state
                .db
                .record_audit("delete:case", json!({ "id": id }), Some(&id));
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => not_found("Case").into_response(),
        Err(e) => db_error(e).into_response(),
    }
}

// ============================================================================
// Evidence Endpoints (ingestion boundary of the engine)
// ============================================================================

async fn list_evidence(
    State(state): State<SharedState>,
    Query(filter): Query<CaseFilter>,
) -> impl IntoResponse {
    match state.db.list_evidence(filter.case_id.as_deref()) {
        Ok(items) => (StatusCode::OK, Json(json!(items))),
        Err(e) => db_error(e),
    }
}

async fn create_evidence(
    State(state): State<SharedState>,
    Json(req): Json<EvidenceRequest>,
) -> impl IntoResponse {
    let now = now_ms();
    let evidence = StoredEvidence {
        id: uuid::Uuid::new_v4().to_string(),
        case_id: req.case_id,
        title: req.title,
        content: req.content,
        source: req.source,
        observation_ts: req.observation_ts,
        files: req.files,
        imported_at: now,
    };

    if let Err(e) = state.db.save_evidence(&evidence) {
        return db_error(e);
    }
    state.db.record_audit(
        "create:evidence",
        json!({ "id": evidence.id, "caseId": evidence.case_id }),
        Some(&evidence.case_id),
    );

    let candidates = assemble_candidates(
        &req.observables,
        &evidence.content,
        &evidence.files,
        &evidence.source,
        evidence.observation_ts,
    );
    match process_candidates(&state.db, &evidence.id, &candidates, now) {
        Ok(touched) => {
            tracing::info!(
                evidence_id = %evidence.id,
                observables = touched.len(),
                "Ingested evidence"
            );
            (StatusCode::CREATED, Json(json!(evidence)))
        }
        Err(e) => engine_error(e),
    }
}

async fn update_evidence(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<EvidenceRequest>,
) -> impl IntoResponse {
    let existing = match state.db.get_evidence(&id) {
        Ok(Some(ev)) => ev,
        Ok(None) => return not_found("Evidence"),
        Err(e) => return db_error(e),
    };

    let now = now_ms();
    let evidence = StoredEvidence {
        id,
        case_id: req.case_id,
        title: req.title,
        content: req.content,
        source: req.source,
        observation_ts: req.observation_ts,
        files: req.files,
        imported_at: existing.imported_at,
    };

    if let Err(e) = state.db.save_evidence(&evidence) {
        return db_error(e);
    }
    state.db.record_audit(
        "update:evidence",
        json!({ "id": evidence.id, "caseId": evidence.case_id }),
        Some(&evidence.case_id),
    );

    let candidates = assemble_candidates(
        &req.observables,
        &evidence.content,
        &evidence.files,
        &evidence.source,
        evidence.observation_ts,
    );
    match process_candidates(&state.db, &evidence.id, &candidates, now) {
        Ok(_) => (StatusCode::OK, Json(json!(evidence))),
        Err(e) => engine_error(e),
    }
}

async fn delete_evidence(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match delete_evidence_with_recount(&state.db, &id) {
        Ok(()) => {
            state
                .db
                .record_audit("delete:evidence", json!({ "id": id }), None);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => engine_error(e).into_response(),
    }
}

// ============================================================================
// Observable Endpoints
// ============================================================================

async fn list_observables(State(state): State<SharedState>) -> impl IntoResponse {
    match state.db.list_observables() {
        Ok(list) => (StatusCode::OK, Json(json!(list))),
        Err(e) => db_error(e),
    }
}

async fn delete_observable(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.db.delete_observable(&id) {
        Ok(true) => {
            state
                .db
                .record_audit("delete:observable", json!({ "id": id }), None);
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => not_found("Observable").into_response(),
        Err(e) => db_error(e).into_response(),
    }
}

/// Classifier as a service: returns raw `(value, type)` candidates for a
/// block of text without touching the store.
async fn extract_observables(Json(req): Json<ExtractRequest>) -> impl IntoResponse {
    Json(json!(extract_indicators(&req.text)))
}

// ============================================================================
// Audit & Health
// ============================================================================

async fn list_audit_logs(
    State(state): State<SharedState>,
    Query(filter): Query<CaseFilter>,
) -> impl IntoResponse {
    match state.db.list_audit_logs(filter.case_id.as_deref(), 50) {
        Ok(logs) => (StatusCode::OK, Json(json!(logs))),
        Err(e) => db_error(e),
    }
}

async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    match state.db.health_check() {
        Ok(_) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "message": e.to_string() })),
        ),
    }
}

// ============================================================================
// Router
// ============================================================================

pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        // Cases
        .route("/api/cases", get(list_cases).post(create_case))
        .route("/api/cases/:id", get(get_case).delete(delete_case))
        // Evidence
        .route("/api/evidence", get(list_evidence).post(create_evidence))
        .route(
            "/api/evidence/:id",
            put(update_evidence).delete(delete_evidence),
        )
        // Observables
        .route("/api/observables", get(list_observables))
        .route("/api/observables/extract", post(extract_observables))
        .route("/api/observables/:id", axum::routing::delete(delete_observable))
        // Audit trail
        .route("/api/audit-logs", get(list_audit_logs))
        .layer(cors)
        .with_state(state)
}
