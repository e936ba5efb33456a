//! Occurrence handlers: generation, listing and status changes

use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    Json,
};
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::scheduler::DEFAULT_HORIZON_DAYS;
use crate::{get_user_email, AppError, AppState, MAX_WINDOW_DAYS};
use outlay_core::models::{
    DateRange, GenerationReport, LifecycleResult, Occurrence, OccurrenceFilter, OccurrenceStatus,
};

/// Resolve an optional start/end pair into a bounded window
///
/// A missing start means today; a missing end means `days` (or the default
/// horizon) after the start.
fn resolve_window(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    days: Option<u32>,
) -> Result<DateRange, AppError> {
    let start = start.unwrap_or_else(|| Utc::now().date_naive());
    let end = match end {
        Some(end) => end,
        None => {
            let days = days.unwrap_or(DEFAULT_HORIZON_DAYS);
            DateRange::starting_at(start, days)
                .map_err(|e| AppError::bad_request(&e.to_string()))?
                .end
        }
    };

    if end < start {
        return Err(AppError::bad_request("end must not be before start"));
    }
    if end - start > Duration::days(MAX_WINDOW_DAYS) {
        return Err(AppError::bad_request(&format!(
            "Window may cover at most {} days",
            MAX_WINDOW_DAYS
        )));
    }

    DateRange::new(start, end).map_err(AppError::from_core)
}

/// Request body for a generation run
#[derive(Debug, Default, Deserialize)]
pub struct GenerateRequest {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    /// Window length when `end` is omitted
    pub days: Option<u32>,
    /// Restrict the run to one recurring expense
    pub expense_id: Option<i64>,
}

/// POST /api/occurrences/generate - Materialize pending occurrences
pub async fn generate_occurrences(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<GenerationReport>, AppError> {
    let user_email = get_user_email(request.headers());

    let body = axum::body::to_bytes(request.into_body(), 64 * 1024)
        .await
        .map_err(|_| AppError::bad_request("Request body too large"))?;
    let params: GenerateRequest = if body.is_empty() {
        GenerateRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::bad_request(&format!("Invalid request body: {}", e)))?
    };

    let window = resolve_window(params.start, params.end, params.days)?;
    let engine = state.engine.clone();

    let report = match params.expense_id {
        Some(expense_id) => {
            let generated = tokio::task::spawn_blocking(move || {
                engine.generate_for_expense(expense_id, window)
            })
            .await?
            .map_err(AppError::from_core)?;
            GenerationReport {
                window,
                expenses_processed: 1,
                generated,
                errors: vec![],
            }
        }
        None => tokio::task::spawn_blocking(move || engine.generate_occurrences(window))
            .await?
            .map_err(AppError::from_core)?,
    };

    state.db.log_audit(
        &user_email,
        "generate",
        Some("occurrence"),
        params.expense_id,
        Some(&format!(
            "window={}, generated={}, errors={}",
            window,
            report.generated.len(),
            report.errors.len()
        )),
    )?;

    Ok(Json(report))
}

/// Query params for listing occurrences
#[derive(Debug, Deserialize)]
pub struct ListOccurrencesQuery {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub days: Option<u32>,
    /// pending, completed or skipped
    pub status: Option<String>,
    pub expense_id: Option<i64>,
}

/// GET /api/occurrences - List occurrences in a window
pub async fn list_occurrences(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListOccurrencesQuery>,
    request: Request,
) -> Result<Json<Vec<Occurrence>>, AppError> {
    let user_email = get_user_email(request.headers());

    let status = query
        .status
        .as_deref()
        .map(str::parse::<OccurrenceStatus>)
        .transpose()
        .map_err(|e| AppError::bad_request(&e))?;
    let window = resolve_window(query.start, query.end, query.days)?;
    let filter = OccurrenceFilter {
        status,
        parent_expense_id: query.expense_id,
    };

    let occurrences = state
        .engine
        .list_occurrences(window, filter)
        .map_err(AppError::from_core)?;

    state.db.log_audit(
        &user_email,
        "list",
        Some("occurrence"),
        None,
        Some(&format!("window={}, count={}", window, occurrences.len())),
    )?;

    Ok(Json(occurrences))
}

/// GET /api/occurrences/:id - Get a single occurrence
pub async fn get_occurrence(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    request: Request,
) -> Result<Json<Occurrence>, AppError> {
    let user_email = get_user_email(request.headers());

    let occurrence = state
        .engine
        .get_occurrence(id)
        .map_err(AppError::from_core)?;

    state
        .db
        .log_audit(&user_email, "view", Some("occurrence"), Some(id), None)?;

    Ok(Json(occurrence))
}

/// Request body for a status change
#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

/// Response for a status change
#[derive(Serialize)]
pub struct UpdateStatusResponse {
    pub success: bool,
    #[serde(flatten)]
    pub result: LifecycleResult,
}

/// POST /api/occurrences/:id/status - Complete, skip or reset an occurrence
pub async fn update_occurrence_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    request: Request,
) -> Result<Json<UpdateStatusResponse>, AppError> {
    let user_email = get_user_email(request.headers());

    let body = axum::body::to_bytes(request.into_body(), 64 * 1024)
        .await
        .map_err(|_| AppError::bad_request("Request body too large"))?;
    let params: UpdateStatusRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request(&format!("Invalid request body: {}", e)))?;
    let status: OccurrenceStatus = params
        .status
        .parse()
        .map_err(|e: String| AppError::bad_request(&e))?;

    // Completion may wait briefly on a concurrent completer
    let engine = state.engine.clone();
    let result = tokio::task::spawn_blocking(move || engine.set_occurrence_status(id, status))
        .await?
        .map_err(AppError::from_core)?;

    state.db.log_audit(
        &user_email,
        match status {
            OccurrenceStatus::Completed => "complete",
            OccurrenceStatus::Skipped => "skip",
            OccurrenceStatus::Pending => "reset",
        },
        Some("occurrence"),
        Some(id),
        Some(&result.summary),
    )?;

    Ok(Json(UpdateStatusResponse {
        success: true,
        result,
    }))
}
