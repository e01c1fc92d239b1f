//! services/analyzer/src/adapters/recommendation_llm.rs
//!
//! Adapter for the operation recommendation LLM. It implements the
//! `OperationRecommendationService` port from the `core` crate.

use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use intent_core::{
    OperationRecommendation, OperationRecommendationService, PortError, PortResult,
    RecommendationRequest,
};
use std::fmt::Write;

use super::openai::{chat_reply, parse_json_reply};

const SYSTEM_INSTRUCTIONS: &str = r#"You are an operations strategist for a credit card app. Users in front of you were approved for a card but have not made their first transaction yet. For one classified session you suggest what the operations team can do so the user completes a first payment.

Reply with a single JSON object and nothing else. The object must match this schema:
{
  "online_solutions": ["string, an in-app action such as a push, popup, banner or guided flow"],
  "offline_solutions": ["string, an action outside the app such as a call, SMS or merchant campaign"],
  "priority": "High, Medium or Low",
  "targeted_message": "string, one short message addressed to the user"
}

Rules:
- Tie every solution to the intent and behaviors given. No generic marketing.
- Use High priority when the user is close to paying and one nudge could convert them.
- Keep `targeted_message` under 40 words."#;

pub const PRIORITIES: [&str; 3] = ["High", "Medium", "Low"];

#[derive(Clone)]
pub struct OpenAiRecommendationAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiRecommendationAdapter {
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

pub fn user_prompt(request: &RecommendationRequest) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "USER: {}", request.user_uuid);
    let _ = writeln!(prompt, "SESSION: {}", request.session_index);
    let _ = writeln!(prompt, "- intent: {}", request.intent);
    let _ = writeln!(
        prompt,
        "- category: {} ({})",
        request.intent_category.as_str(),
        request.intent_category.description()
    );
    let _ = writeln!(prompt, "- confidence: {:.2}", request.confidence_score);
    let _ = writeln!(prompt, "- key behaviors: {}", request.key_behaviors.join(", "));
    let _ = writeln!(prompt, "- reasoning: {}", request.reasoning);
    let _ = writeln!(prompt, "- predicted next action: {}", request.next_action_prediction);
    prompt
}

/// Parses the reply and normalizes the priority to one of [`PRIORITIES`].
pub fn parse_recommendation(content: &str) -> PortResult<OperationRecommendation> {
    let mut recommendation: OperationRecommendation = parse_json_reply(content)?;
    let priority = PRIORITIES
        .iter()
        .find(|known| known.eq_ignore_ascii_case(recommendation.priority.trim()))
        .ok_or_else(|| {
            PortError::InvalidResponse(format!("unknown priority '{}'", recommendation.priority))
        })?;
    recommendation.priority = priority.to_string();
    Ok(recommendation)
}

#[async_trait]
impl OperationRecommendationService for OpenAiRecommendationAdapter {
    async fn recommend_operation(
        &self,
        request: &RecommendationRequest,
    ) -> PortResult<OperationRecommendation> {
        let content = chat_reply(
            &self.client,
            &self.model,
            0.3,
            SYSTEM_INSTRUCTIONS.to_string(),
            user_prompt(request),
        )
        .await?;
        parse_recommendation(&content)
    }
}
