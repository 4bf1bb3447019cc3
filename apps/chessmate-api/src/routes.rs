use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chessmate_service::{Error as ServiceError, query::QueryOutcome};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/query", post(query))
		.with_state(state)
}

async fn health() -> Json<serde_json::Value> {
	Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
	pub question: String,
}

async fn query(
	State(state): State<AppState>,
	Json(payload): Json<QueryRequest>,
) -> Result<Json<QueryOutcome>, ApiError> {
	let outcome = state.pipeline.run(&payload.question).await?;

	Ok(Json(outcome))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
}

impl From<ServiceError> for ApiError {
	fn from(err: ServiceError) -> Self {
		let (status, error_code) = match &err {
			ServiceError::BadInput(_) => (StatusCode::BAD_REQUEST, "bad_request"),
			ServiceError::Unavailable(_) | ServiceError::Storage(_) =>
				(StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
			_ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
		};

		Self { status, error_code: error_code.to_string(), message: err.to_string() }
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorBody { error_code: self.error_code, message: self.message };

		(self.status, Json(body)).into_response()
	}
}
