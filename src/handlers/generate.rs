use axum::{
    extract::{rejection::JsonRejection, State},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::StreamExt;
use http::{header, HeaderName, HeaderValue};
use log::info;
use serde::Deserialize;
use serde_json::Value;
use std::convert::Infallible;

use crate::cancellable_sse::{spawn_relay, to_sse_event, RelayRequest};
use crate::error::ApiError;
use crate::services::prompts;
use crate::state::AppState;
use crate::types::{GenerationMode, GenerationRequest, MAX_INPUT_CHARS};

pub const STREAM_ID_HEADER: &str = "x-stream-id";

const BLANK_INPUT_MESSAGE: &str = "User input cannot be empty or only whitespace";

/// Raw request body. Fields stay untyped so a wrong type is reported as a 400
/// with a readable message instead of a deserialization rejection.
#[derive(Debug, Default, Deserialize)]
pub struct GenerateBody {
    #[serde(rename = "userInput")]
    pub user_input: Option<Value>,
    pub mode: Option<Value>,
}

impl GenerateBody {
    pub fn validate(self) -> Result<GenerationRequest, ApiError> {
        let user_input = match self.user_input {
            Some(Value::String(text)) => text,
            _ => {
                return Err(ApiError::InvalidInput(
                    "User input is required and must be a string".to_string(),
                ))
            }
        };
        if user_input.trim().is_empty() {
            return Err(ApiError::InvalidInput(BLANK_INPUT_MESSAGE.to_string()));
        }
        if user_input.chars().count() > MAX_INPUT_CHARS {
            return Err(ApiError::InvalidInput(format!(
                "User input must be {MAX_INPUT_CHARS} characters or less"
            )));
        }

        let mode = match self.mode {
            None | Some(Value::Null) => GenerationMode::default(),
            Some(Value::String(mode)) => GenerationMode::parse(&mode).ok_or_else(|| {
                ApiError::InvalidInput(format!("Unsupported mode: {mode}"))
            })?,
            Some(_) => return Err(ApiError::InvalidInput("Mode must be a string".to_string())),
        };

        Ok(GenerationRequest { user_input, mode })
    }
}

pub async fn generate(
    State(state): State<AppState>,
    payload: Result<Json<GenerateBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = payload.map_err(|e| ApiError::InvalidInput(e.body_text()))?;
    let request = body.validate()?;

    let generator = state.generator.clone().ok_or(ApiError::MissingApiKey)?;
    if state.references.is_empty() {
        return Err(ApiError::EmptyCorpus);
    }

    let selected = state.config.selection.select(
        &request.user_input,
        state.references.articles(),
        state.config.reference_limit,
    );
    let plan = prompts::plan(request.mode, &request.user_input, &selected);

    let stream_id = uuid::Uuid::new_v4().to_string();
    let stream_id_header = stream_id_header(&stream_id)?;
    tracing::info!(stream_id = %stream_id, mode = request.mode.as_str(), "starting generation");
    info!(
        "Generating ({}) with references: {:?}",
        request.mode.as_str(),
        selected.iter().map(|r| r.filename.as_str()).collect::<Vec<_>>()
    );

    let stream = spawn_relay(
        state.sse_state.clone(),
        RelayRequest {
            stream_id: stream_id.clone(),
            used_references: selected.iter().map(|r| r.summary()).collect(),
            policy: plan.policy,
            fragments: generator.generate(plan.prompt),
            timeout: state.config.generation_timeout,
        },
    );

    let events = stream.map(|event| Ok::<Event, Infallible>(to_sse_event(&event)));

    Ok((
        [
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (HeaderName::from_static(STREAM_ID_HEADER), stream_id_header),
        ],
        Sse::new(events),
    )
        .into_response())
}

fn stream_id_header(stream_id: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(stream_id)
        .map_err(|e| ApiError::Internal(format!("invalid stream id {stream_id:?}: {e}")))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::json!({
        "status": "API is running",
        "hasApiKey": state.generator.is_some(),
        "referencesCount": state.references.len(),
    }))
}
