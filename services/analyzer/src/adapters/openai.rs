//! services/analyzer/src/adapters/openai.rs
//!
//! Client construction, chat calls, reply parsing and error mapping shared by
//! the model-backed adapters.

use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use intent_core::{PortError, PortResult};
use serde::de::DeserializeOwned;

/// Builds the API client. The client's own retry loop is turned off: rate
/// limits and server errors are returned after a single request so the
/// pipeline's retry policy and shared rate limiter stay in charge.
pub fn openai_client(api_key: &str, base_url: Option<&str>) -> Client<OpenAIConfig> {
    let mut config = OpenAIConfig::new().with_api_key(api_key);
    if let Some(base_url) = base_url {
        config = config.with_api_base(base_url);
    }
    let single_attempt = backoff::ExponentialBackoffBuilder::new()
        .with_max_elapsed_time(Some(Duration::ZERO))
        .build();
    Client::with_config(config).with_backoff(single_attempt)
}

/// Sends one system + user prompt pair and returns the text of the first choice.
pub(crate) async fn chat_reply(
    client: &Client<OpenAIConfig>,
    model: &str,
    temperature: f32,
    system: String,
    user: String,
) -> PortResult<String> {
    let messages: Vec<ChatCompletionRequestMessage> = vec![
        ChatCompletionRequestSystemMessageArgs::default()
            .content(system)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?
            .into(),
        ChatCompletionRequestUserMessageArgs::default()
            .content(user)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?
            .into(),
    ];

    let request = CreateChatCompletionRequestArgs::default()
        .model(model)
        .messages(messages)
        .temperature(temperature)
        .n(1)
        .build()
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

    let response = client
        .chat()
        .create(request)
        .await
        .map_err(map_openai_error)?;

    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| PortError::InvalidResponse("LLM response contained no text content.".to_string()))
}

/// Parses a model reply into `T`. Tolerates markdown code fences and prose
/// around the JSON object.
pub fn parse_json_reply<T: DeserializeOwned>(content: &str) -> PortResult<T> {
    let trimmed = content.trim();
    let json = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => {
            return Err(PortError::InvalidResponse(format!(
                "no JSON object in reply: {}",
                truncate(trimmed, 200)
            )))
        }
    };
    serde_json::from_str::<T>(json).map_err(|e| PortError::InvalidResponse(e.to_string()))
}

/// Maps a client error onto the port's retry taxonomy.
pub fn map_openai_error(err: OpenAIError) -> PortError {
    match err {
        OpenAIError::ApiError(api) => classify_api_error(
            api.r#type.as_deref(),
            api.code.as_deref(),
            api.message,
        ),
        OpenAIError::Reqwest(e) => {
            let message = e.to_string();
            match e.status().map(|status| status.as_u16()) {
                Some(429) => PortError::RateLimited(message),
                Some(status) if status >= 500 => PortError::Unavailable(message),
                Some(_) => PortError::Unexpected(message),
                None if e.is_decode() => PortError::InvalidResponse(message),
                None if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() => {
                    PortError::Unavailable(message)
                }
                None => PortError::Unexpected(message),
            }
        }
        err @ OpenAIError::JSONDeserialize(..) => PortError::InvalidResponse(err.to_string()),
        other => PortError::Unexpected(other.to_string()),
    }
}

const RATE_LIMIT_MARKERS: [&str; 4] = ["rate_limit_exceeded", "rate_limit_error", "requests", "tokens"];
const UNAVAILABLE_MARKERS: [&str; 5] = [
    "server_error",
    "service_unavailable",
    "overloaded",
    "overloaded_error",
    "api_error",
];

/// Classifies an error body by its `type` and `code` fields. A body with
/// neither is a raw upstream failure (the client wraps 5xx bodies this way).
fn classify_api_error(kind: Option<&str>, code: Option<&str>, message: String) -> PortError {
    let is = |markers: &[&str]| {
        [kind, code]
            .into_iter()
            .flatten()
            .any(|value| markers.contains(&value))
    };

    if is(&["insufficient_quota"]) {
        return PortError::Unexpected(message);
    }
    if is(&RATE_LIMIT_MARKERS) {
        return PortError::RateLimited(message);
    }
    if is(&UNAVAILABLE_MARKERS) || (kind.is_none() && code.is_none()) {
        return PortError::Unavailable(message);
    }
    PortError::Unexpected(message)
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
