//! crates/intent_core/src/ports.rs
//!
//! Defines the contracts between the pipeline and the external model services:
//! intent classification and operation recommendations. The core only sees the
//! traits; the service crate provides the model-backed adapters.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::domain::{IntentCategory, IntentRecord, OperationRecommendation, Session};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// Errors reported by a classification service adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Response did not match the output schema: {0}")]
    InvalidResponse(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

impl PortError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PortError::Unexpected(_))
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Request / Response Contract
//=========================================================================================

/// One event of a session as presented to the classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStep {
    pub event_name: String,
    /// Seconds since the first event of the session.
    pub offset_seconds: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_info: Option<String>,
}

/// Per-session user context sent alongside the event sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserContext {
    pub user_uuid: String,
    pub approved_time: Option<String>,
    pub first_payment_time: Option<String>,
    pub first_action_time: String,
    pub last_action_time: String,
    pub total_actions: usize,
    pub unique_events: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationRequest {
    pub session_index: usize,
    pub context: UserContext,
    pub steps: Vec<SessionStep>,
}

impl ClassificationRequest {
    pub fn from_session(session: &Session) -> Self {
        let started_at = session.started_at();
        let steps = session
            .events
            .iter()
            .map(|event| SessionStep {
                event_name: event.event_name.clone(),
                offset_seconds: started_at
                    .map(|start| (event.event_time - start).num_seconds())
                    .unwrap_or(0),
                extra_info: event
                    .extra_info
                    .as_ref()
                    .map(|info| info.trim())
                    .filter(|info| !info.is_empty())
                    .map(str::to_string),
            })
            .collect();

        let first = session.events.first();
        let unique_events = session
            .events
            .iter()
            .map(|e| e.event_name.as_str())
            .collect::<HashSet<_>>()
            .len();

        Self {
            session_index: session.session_index,
            context: UserContext {
                user_uuid: session.user_id.clone(),
                approved_time: first.and_then(|e| e.approved_time.clone()),
                first_payment_time: first.and_then(|e| e.first_payment_time.clone()),
                first_action_time: started_at.map(|t| t.to_string()).unwrap_or_default(),
                last_action_time: session.ended_at().map(|t| t.to_string()).unwrap_or_default(),
                total_actions: session.len(),
                unique_events,
            },
            steps,
        }
    }
}

/// The structured answer of the classification service, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierOutput {
    pub intent: String,
    pub intent_category: String,
    pub confidence_score: f64,
    #[serde(default)]
    pub key_behaviors: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub next_action_prediction: String,
}

impl ClassifierOutput {
    pub fn category(&self) -> Option<IntentCategory> {
        IntentCategory::from_label(&self.intent_category)
    }
}

/// What the recommendation service sees of one classified session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendationRequest {
    pub user_uuid: String,
    pub session_index: usize,
    pub intent: String,
    pub intent_category: IntentCategory,
    pub confidence_score: f64,
    pub key_behaviors: Vec<String>,
    pub reasoning: String,
    pub next_action_prediction: String,
}

impl RecommendationRequest {
    pub fn from_record(user_uuid: &str, record: &IntentRecord) -> Self {
        Self {
            user_uuid: user_uuid.to_string(),
            session_index: record.session_index,
            intent: record.intent.clone(),
            intent_category: record.intent_category,
            confidence_score: record.confidence_score,
            key_behaviors: record.key_behaviors.clone(),
            reasoning: record.reasoning.clone(),
            next_action_prediction: record.next_action_prediction.clone(),
        }
    }
}

//=========================================================================================
// Service Port (Trait)
//=========================================================================================

#[async_trait]
pub trait IntentClassificationService: Send + Sync {
    /// Classifies one session's event sequence into an intent.
    async fn classify_session(&self, request: &ClassificationRequest) -> PortResult<ClassifierOutput>;
}

#[async_trait]
pub trait OperationRecommendationService: Send + Sync {
    /// Suggests how the operations team could help the user towards a first transaction.
    async fn recommend_operation(
        &self,
        request: &RecommendationRequest,
    ) -> PortResult<OperationRecommendation>;
}
