//! services/analyzer/src/adapters/intent_llm.rs
//!
//! This module contains the adapter for the intent classification LLM.
//! It implements the `IntentClassificationService` port from the `core` crate.

use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use intent_core::{
    ClassificationRequest, ClassifierOutput, IntentCategory, IntentClassificationService,
    PortResult,
};
use std::fmt::Write;

use super::openai::{chat_reply, parse_json_reply};

const SYSTEM_INSTRUCTIONS: &str = r#"You are a user behavior analyst for a credit card app. You receive one session of a user's in-app events, in time order, and decide what the user was trying to do.

How to read events:
- `show_*` events are things the app displayed. On their own they say nothing about intent.
- `click_*` events are the user's active responses and are the strongest evidence.
- `on_app_stop` means the user closed the app. Look at what was shown right before it.
- `extra_info` carries details such as voucher names, payment methods or popup types. Use it.

Classify the session into exactly one of these categories:
{taxonomy}

Reply with a single JSON object and nothing else. The object must match this schema:
{schema}

Rules:
- `confidence_score` is a number between 0.0 and 1.0.
- `key_behaviors` lists the event names that drove your decision, most important first.
- Base every statement on the events given. Do not guess beyond them."#;

const OUTPUT_SCHEMA: &str = r#"{
  "intent": "string, the user's main intent, specific about which product feature they are exploring",
  "intent_category": "string, one of the category names listed above",
  "confidence_score": "number between 0.0 and 1.0",
  "key_behaviors": ["string"],
  "reasoning": "string, how the events support the intent",
  "next_action_prediction": "string, the user's most likely next action"
}"#;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `IntentClassificationService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiIntentAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiIntentAdapter {
    /// Creates a new `OpenAiIntentAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

/// Renders the fixed system prompt with the taxonomy and output schema filled in.
pub fn system_prompt() -> String {
    let taxonomy = IntentCategory::ALL
        .iter()
        .map(|category| format!("- {}: {}", category.as_str(), category.description()))
        .collect::<Vec<_>>()
        .join("\n");
    SYSTEM_INSTRUCTIONS
        .replace("{taxonomy}", &taxonomy)
        .replace("{schema}", OUTPUT_SCHEMA)
}

/// Renders the user context and event sequence of one session.
pub fn user_prompt(request: &ClassificationRequest) -> String {
    let context = &request.context;
    let mut prompt = String::new();

    let _ = writeln!(prompt, "USER:");
    let _ = writeln!(prompt, "- user id: {}", context.user_uuid);
    let _ = writeln!(
        prompt,
        "- approved at: {}",
        context.approved_time.as_deref().unwrap_or("N/A")
    );
    let _ = writeln!(
        prompt,
        "- first payment at: {}",
        context.first_payment_time.as_deref().unwrap_or("N/A")
    );
    let _ = writeln!(prompt, "- session start: {}", context.first_action_time);
    let _ = writeln!(prompt, "- session end: {}", context.last_action_time);
    let _ = writeln!(prompt, "- events: {}", context.total_actions);
    let _ = writeln!(prompt, "- distinct event names: {}", context.unique_events);

    let _ = writeln!(prompt, "\nEVENTS (offset from session start):");
    for (i, step) in request.steps.iter().enumerate() {
        let _ = write!(
            prompt,
            "{}. +{}s {}",
            i + 1,
            step.offset_seconds,
            step.event_name
        );
        if let Some(extra) = &step.extra_info {
            let _ = write!(prompt, " | extra_info: {}", extra);
        }
        prompt.push('\n');
    }

    prompt
}

/// Parses the model's reply into the output schema.
pub fn parse_classifier_output(content: &str) -> PortResult<ClassifierOutput> {
    parse_json_reply(content)
}

//=========================================================================================
// `IntentClassificationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl IntentClassificationService for OpenAiIntentAdapter {
    /// Asks the model for the intent of one session and parses the JSON reply.
    async fn classify_session(&self, request: &ClassificationRequest) -> PortResult<ClassifierOutput> {
        let content = chat_reply(
            &self.client,
            &self.model,
            0.1,
            system_prompt(),
            user_prompt(request),
        )
        .await?;
        parse_classifier_output(&content)
    }
}
