//! services/analyzer/src/classifier.rs
//!
//! The Intent Classifier Client: turns one session into one `IntentRecord`,
//! retrying retryable service errors with exponential backoff and sharing a
//! rate limiter with every other in-flight call.

use std::sync::Arc;

use chrono::Utc;
use intent_core::{
    ClassificationRequest, ClassifierOutput, IntentCategory, IntentClassificationService,
    IntentRecord, PortError, PortResult, Session,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::rate_limit::RateLimiter;
use crate::retry::retry_port_call;
pub use crate::retry::{FailureReason, RetryPolicy};

/// One session could not be classified. The session is left out of the
/// user's result; nothing else is affected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Classification failed for user {user_id}, session {session_index} after {attempts} attempt(s): {reason}")]
pub struct ClassificationFailure {
    pub user_id: String,
    pub session_index: usize,
    pub attempts: u32,
    pub reason: FailureReason,
}

/// Clamps a reported confidence into [0, 1]. The flag is set when the
/// reported value was out of range or not a number.
pub fn clamp_confidence(score: f64) -> (f64, bool) {
    if !score.is_finite() {
        return (0.0, true);
    }
    if score < 0.0 {
        (0.0, true)
    } else if score > 1.0 {
        (1.0, true)
    } else {
        (score, false)
    }
}

#[derive(Clone)]
pub struct IntentClassifier {
    service: Arc<dyn IntentClassificationService>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl IntentClassifier {
    pub fn new(
        service: Arc<dyn IntentClassificationService>,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            service,
            limiter,
            policy: policy.normalized(),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Classifies a session, or reports why it could not be classified.
    pub async fn classify(
        &self,
        session: &Session,
        cancel: &CancellationToken,
    ) -> Result<IntentRecord, ClassificationFailure> {
        let request = ClassificationRequest::from_session(session);
        let label = format!(
            "Session {} of user {}",
            session.session_index, session.user_id
        );

        let request = &request;
        let service = &self.service;
        retry_port_call(self.policy, &self.limiter, cancel, &label, || async move {
            let output = service.classify_session(request).await?;
            to_record(session, output)
        })
        .await
        .map_err(|(attempts, reason)| ClassificationFailure {
            user_id: session.user_id.clone(),
            session_index: session.session_index,
            attempts,
            reason,
        })
    }
}

fn to_record(session: &Session, output: ClassifierOutput) -> PortResult<IntentRecord> {
    if output.intent.trim().is_empty() {
        return Err(PortError::InvalidResponse(
            "the `intent` field is empty".to_string(),
        ));
    }

    let intent_category = match output.category() {
        Some(category) => category,
        None => {
            warn!(
                "Unknown intent category '{}' for session {} of user {}; using exploration_intent",
                output.intent_category, session.session_index, session.user_id
            );
            IntentCategory::ExplorationIntent
        }
    };

    let (confidence_score, confidence_clamped) = clamp_confidence(output.confidence_score);
    if confidence_clamped {
        warn!(
            "Confidence {} for session {} of user {} is outside [0, 1]; clamped to {}",
            output.confidence_score, session.session_index, session.user_id, confidence_score
        );
    }

    debug!(
        "Session {} of user {} classified as {} ({:.2})",
        session.session_index, session.user_id, intent_category, confidence_score
    );

    Ok(IntentRecord {
        intent: output.intent,
        intent_category,
        confidence_score,
        key_behaviors: output.key_behaviors,
        reasoning: output.reasoning,
        next_action_prediction: output.next_action_prediction,
        session_index: session.session_index,
        session_size: session.len(),
        timestamp: Utc::now(),
        confidence_clamped,
        operation_recommendation: None,
    })
}
