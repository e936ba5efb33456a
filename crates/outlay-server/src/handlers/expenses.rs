//! Recurring expense handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{get_user_email, AppError, AppState};
use outlay_core::models::{Expense, NewRecurringExpense, Payment, RecurringExpense};
use outlay_core::recurrence::{validate, PatternFields};
use outlay_core::{Error, ExpenseRepository};

/// Request body for creating a recurring expense
#[derive(Debug, Deserialize)]
pub struct CreateRecurringExpenseRequest {
    pub item_name: String,
    pub category: Option<String>,
    pub total_amount: f64,
    pub pattern: PatternFields,
}

/// Response for creating a recurring expense
#[derive(Serialize)]
pub struct CreateRecurringExpenseResponse {
    pub id: i64,
    pub description: String,
}

/// GET /api/expenses/recurring - List recurring expense definitions
pub async fn list_recurring_expenses(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<Vec<RecurringExpense>>, AppError> {
    let user_email = get_user_email(request.headers());

    let expenses = state.db.list_recurring_expenses()?;

    state.db.log_audit(
        &user_email,
        "list",
        Some("recurring_expense"),
        None,
        Some(&format!("count={}", expenses.len())),
    )?;

    Ok(Json(expenses))
}

/// POST /api/expenses/recurring - Create a recurring expense
pub async fn create_recurring_expense(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<CreateRecurringExpenseResponse>, AppError> {
    let user_email = get_user_email(request.headers());

    let body = axum::body::to_bytes(request.into_body(), 64 * 1024)
        .await
        .map_err(|_| AppError::bad_request("Request body too large"))?;
    let params: CreateRecurringExpenseRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request(&format!("Invalid request body: {}", e)))?;

    let pattern = validate(&params.pattern)
        .map_err(|errors| AppError::from_core(Error::InvalidPattern(errors)))?;

    let id = state
        .db
        .create_recurring_expense(&NewRecurringExpense {
            item_name: params.item_name,
            category: params.category,
            total_amount: params.total_amount,
            pattern,
        })
        .map_err(AppError::from_core)?;

    let description = pattern.describe();
    state.db.log_audit(
        &user_email,
        "create",
        Some("recurring_expense"),
        Some(id),
        Some(&description),
    )?;

    Ok(Json(CreateRecurringExpenseResponse { id, description }))
}

/// An expense together with its payments
#[derive(Serialize)]
pub struct ExpenseDetail {
    #[serde(flatten)]
    pub expense: Expense,
    pub payments: Vec<Payment>,
}

/// GET /api/expenses/:id - Get an expense with its payments
pub async fn get_expense(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    request: Request,
) -> Result<Json<ExpenseDetail>, AppError> {
    let user_email = get_user_email(request.headers());

    let expense = state
        .db
        .get_expense(id)?
        .ok_or_else(|| AppError::not_found(&format!("Expense {} not found", id)))?;
    let payments = state.db.list_payments(id)?;

    state
        .db
        .log_audit(&user_email, "view", Some("expense"), Some(id), None)?;

    Ok(Json(ExpenseDetail { expense, payments }))
}

/// Response for a pattern update
#[derive(Serialize)]
pub struct UpdatePatternResponse {
    pub success: bool,
    pub description: String,
}

/// PUT /api/expenses/:id/pattern - Replace a recurring expense's pattern
pub async fn update_pattern(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    request: Request,
) -> Result<Json<UpdatePatternResponse>, AppError> {
    let user_email = get_user_email(request.headers());

    let body = axum::body::to_bytes(request.into_body(), 64 * 1024)
        .await
        .map_err(|_| AppError::bad_request("Request body too large"))?;
    let fields: PatternFields = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request(&format!("Invalid request body: {}", e)))?;

    let pattern = state
        .engine
        .save_pattern(id, &fields)
        .map_err(AppError::from_core)?;

    let description = pattern.describe();
    state.db.log_audit(
        &user_email,
        "update_pattern",
        Some("recurring_expense"),
        Some(id),
        Some(&description),
    )?;

    Ok(Json(UpdatePatternResponse {
        success: true,
        description,
    }))
}
