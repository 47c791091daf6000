use axum::{
	Json, Router,
	extract::State,
	http::{HeaderMap, StatusCode, header::AUTHORIZATION},
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::Serialize;

use crate::state::AppState;
use mycelian_service::{Error as ServiceError, SearchRequest, SearchResponse};

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/v0/search", post(search))
		.with_state(state)
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn search(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(payload): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
	let api_key = bearer_token(&headers)?;
	let actor = state.authorizer.authorize(api_key).await?;
	let response = state.service.search(&actor.actor_id, payload).await?;

	Ok(Json(response))
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
	let value = headers
		.get(AUTHORIZATION)
		.and_then(|value| value.to_str().ok())
		.ok_or_else(|| {
			ApiError::new(
				StatusCode::UNAUTHORIZED,
				"Unauthorized: missing Authorization header",
			)
		})?;

	value
		.strip_prefix("Bearer ")
		.filter(|token| !token.is_empty())
		.ok_or_else(|| {
			ApiError::new(StatusCode::UNAUTHORIZED, "Unauthorized: expected a bearer token")
		})
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error: String,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	message: String,
}
impl ApiError {
	fn new(status: StatusCode, message: impl Into<String>) -> Self {
		Self { status, message: message.into() }
	}
}

impl From<ServiceError> for ApiError {
	fn from(err: ServiceError) -> Self {
		let status = match err {
			ServiceError::Validation { .. } => StatusCode::BAD_REQUEST,
			ServiceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
			ServiceError::EmbeddingUnavailable
			| ServiceError::SearchUnavailable
			| ServiceError::ContextSearchUnavailable
			| ServiceError::LatestContextUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
		};

		Self::new(status, err.to_string())
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		(self.status, Json(ErrorBody { error: self.message })).into_response()
	}
}
