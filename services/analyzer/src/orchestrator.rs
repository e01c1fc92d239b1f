//! services/analyzer/src/orchestrator.rs
//!
//! The Analysis Orchestrator. Partitions events by user, segments each user's
//! events into sessions and classifies every session through a bounded pool of
//! workers. Failures stay inside the session or user they happened in; a run
//! always ends with a (possibly partial) report.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use intent_core::{
    AnalysisReport, AnalysisRequest, Event, IntentClassificationService, IntentRecord,
    SegmentError, Session, SessionSegmenter, UserResult,
};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::classifier::{ClassificationFailure, FailureReason, IntentClassifier, RetryPolicy};
use crate::config::Config;
use crate::rate_limit::RateLimiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisOptions {
    pub session_timeout_minutes: u32,
    pub max_concurrency: usize,
    pub deadline: Option<Duration>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            session_timeout_minutes: intent_core::DEFAULT_SESSION_TIMEOUT_MINUTES,
            max_concurrency: 2,
            deadline: None,
        }
    }
}

impl AnalysisOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            session_timeout_minutes: config.session_timeout_minutes,
            max_concurrency: config.max_concurrency,
            deadline: config.analysis_deadline,
        }
    }
}

pub struct Analyzer {
    segmenter: SessionSegmenter,
    classifier: IntentClassifier,
    workers: Arc<Semaphore>,
    deadline: Option<Duration>,
}

impl Analyzer {
    pub fn new(classifier: IntentClassifier, options: AnalysisOptions) -> Self {
        Self {
            segmenter: SessionSegmenter::from_minutes(options.session_timeout_minutes),
            classifier,
            workers: Arc::new(Semaphore::new(options.max_concurrency.max(1))),
            deadline: options.deadline,
        }
    }

    /// Wires the classifier, its retry policy and the shared rate limiter from the config.
    pub fn from_config(config: &Config, service: Arc<dyn IntentClassificationService>) -> Self {
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit_max_requests,
            config.rate_limit_window,
        ));
        let classifier = IntentClassifier::new(
            service,
            limiter,
            RetryPolicy {
                max_attempts: config.classifier_max_attempts,
                base_backoff: config.retry_base_backoff,
            },
        );
        Self::new(classifier, AnalysisOptions::from_config(config))
    }

    pub async fn analyze(&self, events: Vec<Event>, request: &AnalysisRequest) -> AnalysisReport {
        self.analyze_with(events, request, &HashSet::new(), CancellationToken::new())
            .await
    }

    /// Runs a full analysis. Users in `completed` are skipped. Cancelling
    /// `cancel`, or reaching the configured deadline, stops all outstanding
    /// classification calls and returns what has been collected so far.
    pub async fn analyze_with(
        &self,
        events: Vec<Event>,
        request: &AnalysisRequest,
        completed: &HashSet<String>,
        cancel: CancellationToken,
    ) -> AnalysisReport {
        self.run(events, request, completed, cancel, None).await
    }

    /// Same as [`Analyzer::analyze_with`], and also sends every user's result
    /// on `progress` as soon as that user is finished.
    pub async fn analyze_with_progress(
        &self,
        events: Vec<Event>,
        request: &AnalysisRequest,
        completed: &HashSet<String>,
        cancel: CancellationToken,
        progress: mpsc::UnboundedSender<UserResult>,
    ) -> AnalysisReport {
        self.run(events, request, completed, cancel, Some(progress))
            .await
    }

    async fn run(
        &self,
        events: Vec<Event>,
        request: &AnalysisRequest,
        completed: &HashSet<String>,
        cancel: CancellationToken,
        progress: Option<mpsc::UnboundedSender<UserResult>>,
    ) -> AnalysisReport {
        let run_id = Uuid::new_v4();
        let span = info_span!("analysis_run", %run_id);

        async move {
            let started = Instant::now();
            let users = select_users(partition_by_user(events), request);
            let total_users = users.len();
            let users: Vec<(String, Vec<Event>)> = users
                .into_iter()
                .filter(|(user_id, _)| !completed.contains(user_id))
                .collect();
            if users.len() < total_users {
                info!("Skipping {} already analyzed users", total_users - users.len());
            }
            info!("Analyzing {} users", users.len());

            let deadline_timer = self.deadline.map(|deadline| {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(deadline).await;
                    warn!("Analysis deadline of {:?} reached; returning partial results", deadline);
                    cancel.cancel();
                })
            });

            let progress = progress.as_ref();
            let results = join_all(users.into_iter().map(|(user_id, events)| {
                let cancel = cancel.child_token();
                async move {
                    let result = self.analyze_user(user_id, events, cancel).await;
                    if let Some(progress) = progress {
                        // A closed receiver only means nobody is checkpointing.
                        let _ = progress.send(result.clone());
                    }
                    result
                }
            }))
            .await;

            if let Some(timer) = deadline_timer {
                timer.abort();
            }

            let report = AnalysisReport::new(results);
            let attempted: usize = report.users.iter().map(|u| u.total_sessions).sum();
            let classified: usize = report.users.iter().map(|u| u.sessions.len()).sum();
            info!(
                "Analysis finished: {} users, {}/{} sessions classified in {:?}",
                report.len(),
                classified,
                attempted,
                started.elapsed()
            );
            report
        }
        .instrument(span)
        .await
    }

    /// Analyzes a single user's events. Cancelling `cancel` only affects this user.
    pub async fn analyze_user(
        &self,
        user_id: String,
        mut events: Vec<Event>,
        cancel: CancellationToken,
    ) -> UserResult {
        let span = info_span!("user", user = %user_id);

        async move {
            let total_events = events.len();
            events.sort_by_key(|event| event.event_time);

            let sessions = match self.segmenter.segment(events) {
                Ok(sessions) => sessions,
                Err(SegmentError::EmptyInput) => {
                    warn!("No events for user {}; listing without sessions", user_id);
                    return UserResult::empty(user_id, 0);
                }
                Err(e) => {
                    error!("Could not segment events of user {}: {}", user_id, e);
                    return UserResult::empty(user_id, total_events);
                }
            };
            let total_sessions = sessions.len();
            info!("{} events in {} sessions", total_events, total_sessions);

            let started = Instant::now();
            let (sessions, cancelled_sessions) = self.classify_sessions(sessions, &cancel).await;
            if cancelled_sessions > 0 {
                warn!(
                    "Classified {}/{} sessions; {} cancelled, user stays incomplete",
                    sessions.len(),
                    total_sessions,
                    cancelled_sessions
                );
            } else {
                info!(
                    "Classified {}/{} sessions in {:?}",
                    sessions.len(),
                    total_sessions,
                    started.elapsed()
                );
            }

            UserResult {
                user_uuid: user_id,
                total_sessions,
                total_events,
                sessions,
                cancelled_sessions,
            }
        }
        .instrument(span)
        .await
    }

    /// Classifies every session on the worker pool. Returns the successful
    /// records ordered by `session_index` and the number of cancelled sessions.
    async fn classify_sessions(
        &self,
        sessions: Vec<Session>,
        cancel: &CancellationToken,
    ) -> (Vec<IntentRecord>, usize) {
        let mut tasks = Vec::with_capacity(sessions.len());
        for session in sessions {
            let classifier = self.classifier.clone();
            let workers = self.workers.clone();
            let cancel = cancel.clone();
            let session_index = session.session_index;
            let user_id = session.user_id.clone();
            let task = tokio::spawn(
                async move {
                    let permit = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        permit = workers.acquire_owned() => permit.ok(),
                    };
                    let Some(_permit) = permit else {
                        return Err(ClassificationFailure {
                            user_id: session.user_id.clone(),
                            session_index: session.session_index,
                            attempts: 0,
                            reason: FailureReason::Cancelled,
                        });
                    };
                    classifier.classify(&session, &cancel).await
                }
                .in_current_span(),
            );
            tasks.push((session_index, user_id, task));
        }

        let mut records = Vec::new();
        let mut cancelled = 0;
        for (session_index, user_id, task) in tasks {
            match task.await {
                Ok(Ok(record)) => records.push(record),
                // Service failures are already logged by the classifier.
                Ok(Err(failure)) => {
                    if failure.reason == FailureReason::Cancelled {
                        warn!("Session {} of user {} was cancelled", session_index, user_id);
                        cancelled += 1;
                    }
                }
                Err(e) => {
                    error!(
                        "Classification task for session {} of user {} failed to join: {}",
                        session_index, user_id, e
                    );
                }
            }
        }
        records.sort_by_key(|record| record.session_index);
        (records, cancelled)
    }
}

/// Groups events by user, keeping users in order of first appearance and
/// each user's events in input order.
pub fn partition_by_user(events: Vec<Event>) -> Vec<(String, Vec<Event>)> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut users: Vec<(String, Vec<Event>)> = Vec::new();

    for event in events {
        match positions.get(&event.user_id) {
            Some(&position) => users[position].1.push(event),
            None => {
                positions.insert(event.user_id.clone(), users.len());
                users.push((event.user_id.clone(), vec![event]));
            }
        }
    }
    users
}

/// Applies an `AnalysisRequest` to the partitioned users. A single requested
/// user that has no events is still returned, with an empty event list.
pub fn select_users(
    users: Vec<(String, Vec<Event>)>,
    request: &AnalysisRequest,
) -> Vec<(String, Vec<Event>)> {
    match request {
        AnalysisRequest::All => users,
        AnalysisRequest::First(n) => users.into_iter().take(*n).collect(),
        AnalysisRequest::Single(wanted) => {
            let found = users.into_iter().find(|(user_id, _)| user_id == wanted);
            vec![found.unwrap_or_else(|| (wanted.clone(), Vec::new()))]
        }
    }
}
