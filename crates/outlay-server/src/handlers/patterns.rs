//! Pattern validation and preview for the recurring expense form

use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{AppError, AppState};
use outlay_core::recurrence::{validate, PatternFields};
use outlay_core::ValidationError;

/// Most dates a preview may return
const MAX_PREVIEW_COUNT: usize = 100;

/// Result of validating a pattern
#[derive(Serialize)]
pub struct ValidatePatternResponse {
    pub valid: bool,
    pub description: Option<String>,
    pub errors: Vec<ValidationError>,
}

/// POST /api/patterns/validate - Validate a pattern without saving it
///
/// Always 200: problems are reported in the body so a form can show them all.
pub async fn validate_pattern(
    Json(fields): Json<PatternFields>,
) -> Result<Json<ValidatePatternResponse>, AppError> {
    let response = match validate(&fields) {
        Ok(pattern) => ValidatePatternResponse {
            valid: true,
            description: Some(pattern.describe()),
            errors: vec![],
        },
        Err(errors) => ValidatePatternResponse {
            valid: false,
            description: None,
            errors,
        },
    };

    Ok(Json(response))
}

/// Request body for a preview
#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub pattern: PatternFields,
    /// Dates strictly after this one (default: yesterday, so today is included)
    pub after: Option<NaiveDate>,
    #[serde(default = "default_preview_count")]
    pub count: usize,
}

fn default_preview_count() -> usize {
    5
}

/// Upcoming dates for a pattern
#[derive(Serialize)]
pub struct PreviewResponse {
    pub description: String,
    pub dates: Vec<NaiveDate>,
}

/// POST /api/patterns/preview - Next dates a pattern would produce
pub async fn preview_pattern(
    State(state): State<Arc<AppState>>,
    Json(params): Json<PreviewRequest>,
) -> Result<Json<PreviewResponse>, AppError> {
    let pattern = validate(&params.pattern)
        .map_err(|errors| AppError::from_core(outlay_core::Error::InvalidPattern(errors)))?;

    let after = match params.after {
        Some(after) => after,
        None => Utc::now()
            .date_naive()
            .pred_opt()
            .ok_or_else(|| AppError::internal("Date out of range"))?,
    };
    let count = params.count.clamp(1, MAX_PREVIEW_COUNT);

    let dates = state
        .engine
        .preview(&params.pattern, after, count)
        .map_err(AppError::from_core)?;

    Ok(Json(PreviewResponse {
        description: pattern.describe(),
        dates,
    }))
}
