//! services/analyzer/src/recommender.rs
//!
//! Adds an operation recommendation to every classified session of an
//! existing report. Sessions that already carry one are left alone, so the
//! pass can be re-run after an interruption without paying for work twice.

use std::sync::Arc;

use intent_core::{
    AnalysisReport, OperationRecommendationService, RecommendationRequest, UserResult,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::config::Config;
use crate::rate_limit::RateLimiter;
use crate::retry::{retry_port_call, FailureReason, RetryPolicy};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecommendationSummary {
    pub generated: usize,
    /// Sessions that already had a recommendation.
    pub skipped: usize,
    pub failed: usize,
    pub interrupted: bool,
}

impl RecommendationSummary {
    fn absorb(&mut self, other: RecommendationSummary) {
        self.generated += other.generated;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.interrupted |= other.interrupted;
    }
}

pub struct Recommender {
    service: Arc<dyn OperationRecommendationService>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl Recommender {
    pub fn new(
        service: Arc<dyn OperationRecommendationService>,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            service,
            limiter,
            policy: policy.normalized(),
        }
    }

    pub fn from_config(config: &Config, service: Arc<dyn OperationRecommendationService>) -> Self {
        Self::new(
            service,
            Arc::new(RateLimiter::new(
                config.rate_limit_max_requests,
                config.rate_limit_window,
            )),
            RetryPolicy {
                max_attempts: config.classifier_max_attempts,
                base_backoff: config.retry_base_backoff,
            },
        )
    }

    /// Walks the users in report order. `after_user` runs after every user
    /// that gained at least one recommendation, so callers can save progress.
    /// Stops early when `cancel` fires; whatever was generated is kept.
    pub async fn recommend_report<F, E>(
        &self,
        report: &mut AnalysisReport,
        cancel: &CancellationToken,
        mut after_user: F,
    ) -> Result<RecommendationSummary, E>
    where
        F: FnMut(&AnalysisReport) -> Result<(), E>,
    {
        let mut summary = RecommendationSummary::default();
        for position in 0..report.users.len() {
            let user = &mut report.users[position];
            let span = info_span!("recommend", user = %user.user_uuid);
            let user_summary = self.recommend_user(user, cancel).instrument(span).await;
            summary.absorb(user_summary);

            if user_summary.generated > 0 {
                after_user(report)?;
            }
            if user_summary.interrupted {
                warn!("Recommendation pass interrupted; remaining users left as they are");
                break;
            }
        }

        info!(
            "Recommendations: {} generated, {} already present, {} failed",
            summary.generated, summary.skipped, summary.failed
        );
        Ok(summary)
    }

    /// Recommends for the sessions of one user, one call at a time.
    pub async fn recommend_user(
        &self,
        user: &mut UserResult,
        cancel: &CancellationToken,
    ) -> RecommendationSummary {
        let mut summary = RecommendationSummary::default();
        let user_uuid = user.user_uuid.clone();

        for record in user.sessions.iter_mut() {
            if record.operation_recommendation.is_some() {
                summary.skipped += 1;
                continue;
            }

            let request = RecommendationRequest::from_record(&user_uuid, record);
            let label = format!(
                "Recommendation for session {} of user {}",
                record.session_index, user_uuid
            );
            let request = &request;
            let service = &self.service;
            let outcome = retry_port_call(self.policy, &self.limiter, cancel, &label, || async move {
                service.recommend_operation(request).await
            })
            .await;

            match outcome {
                Ok(recommendation) => {
                    record.operation_recommendation = Some(recommendation);
                    summary.generated += 1;
                }
                Err((_, FailureReason::Cancelled)) => {
                    summary.interrupted = true;
                    break;
                }
                // Already logged by the retry loop.
                Err((_, FailureReason::Service(_))) => summary.failed += 1,
            }
        }
        summary
    }
}
