//! End-to-end runs of the analysis pipeline against a fake classification service.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use analyzer_lib::adapters::{load_report, read_events, write_report, ReportCheckpoint};
use analyzer_lib::classifier::{IntentClassifier, RetryPolicy};
use analyzer_lib::rate_limit::RateLimiter;
use analyzer_lib::{AnalysisOptions, Analyzer};
use async_trait::async_trait;
use intent_core::{
    AnalysisReport, AnalysisRequest, ClassificationRequest, ClassifierOutput, IntentCategory,
    IntentClassificationService, PortError, PortResult,
};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const LOG: &str = "\
user_uuid,approved_time,first_payment_time,event_time,event_name,extra_info
alice,2025/01/02 10:00,,2025/01/05 20:00,show_voucher_list,QRIS cashback
alice,2025/01/02 10:00,,2025/01/05 20:05,click_myvoucher_use,
bob,,,2025/01/05 09:00,show_limit_page,
alice,2025/01/02 10:00,,2025/01/05 20:40,show_pay_checkout,
alice,2025/01/02 10:00,,2025/01/05 20:45,click_pay_checkout_submit_btn,QRIS
bob,,,2025/01/05 09:02,click_limit_detail,
alice,2025/01/02 10:00,,2025/01/05 23:00,on_app_stop,
carol,,,2025/01/06 12:00,show_homepage,
";

enum Plan {
    Reply { delay: Duration, score: f64 },
    Fail(PortError),
}

/// Answers per (user, session index); unknown keys get an immediate reply.
#[derive(Default)]
struct FakeService {
    plans: HashMap<(String, usize), Plan>,
    calls: Mutex<Vec<(String, usize)>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeService {
    fn with(mut self, user: &str, session_index: usize, plan: Plan) -> Self {
        self.plans.insert((user.to_string(), session_index), plan);
        self
    }

    fn calls_for(&self, user: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == user)
            .count()
    }
}

#[async_trait]
impl IntentClassificationService for FakeService {
    async fn classify_session(&self, request: &ClassificationRequest) -> PortResult<ClassifierOutput> {
        let key = (request.context.user_uuid.clone(), request.session_index);
        self.calls.lock().unwrap().push(key.clone());

        let (delay, score) = match self.plans.get(&key) {
            Some(Plan::Fail(err)) => return Err(err.clone()),
            Some(Plan::Reply { delay, score }) => (*delay, *score),
            None => (Duration::ZERO, 0.7),
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(ClassifierOutput {
            intent: format!("intent of session {}", request.session_index),
            intent_category: "payment_intent".to_string(),
            confidence_score: score,
            key_behaviors: request
                .steps
                .iter()
                .map(|step| step.event_name.clone())
                .collect(),
            reasoning: format!("{} events", request.steps.len()),
            next_action_prediction: "pays".to_string(),
        })
    }
}

fn analyzer(service: FakeService, options: AnalysisOptions) -> (Analyzer, Arc<FakeService>) {
    let service = Arc::new(service);
    let classifier = IntentClassifier::new(
        service.clone(),
        Arc::new(RateLimiter::new(1_000, Duration::from_secs(60))),
        RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(100),
        },
    );
    (Analyzer::new(classifier, options), service)
}

fn indexes(report: &AnalysisReport, user: &str) -> Vec<usize> {
    report
        .get(user)
        .unwrap()
        .sessions
        .iter()
        .map(|record| record.session_index)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn csv_to_report_covers_every_user_in_order() {
    let events = read_events(LOG.as_bytes()).unwrap();
    let (analyzer, _) = analyzer(FakeService::default(), AnalysisOptions::default());

    let report = analyzer.analyze(events, &AnalysisRequest::All).await;

    let users: Vec<(&str, usize, usize)> = report
        .users
        .iter()
        .map(|u| (u.user_uuid.as_str(), u.total_events, u.total_sessions))
        .collect();
    assert_eq!(users, vec![("alice", 5, 3), ("bob", 2, 1), ("carol", 1, 1)]);
    assert_eq!(indexes(&report, "alice"), vec![0, 1, 2]);

    let alice = report.get("alice").unwrap();
    assert_eq!(
        alice.sessions[1].key_behaviors,
        vec!["show_pay_checkout".to_string(), "click_pay_checkout_submit_btn".to_string()]
    );
    assert_eq!(alice.sessions[1].session_size, 2);
    assert_eq!(alice.sessions[0].intent_category, IntentCategory::PaymentIntent);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("intent_result.json");
    write_report(&path, &report).unwrap();
    assert_eq!(load_report(&path).unwrap(), Some(report));
}

#[tokio::test(start_paused = true)]
async fn a_failing_session_is_omitted_without_failing_the_user() {
    let events = read_events(LOG.as_bytes()).unwrap();
    let service = FakeService::default().with(
        "alice",
        1,
        Plan::Fail(PortError::Unavailable("upstream down".to_string())),
    );
    let (analyzer, service) = analyzer(service, AnalysisOptions::default());

    let report = analyzer
        .analyze(events, &AnalysisRequest::Single("alice".to_string()))
        .await;

    let alice = report.get("alice").unwrap();
    assert_eq!(alice.total_sessions, 3);
    assert_eq!(indexes(&report, "alice"), vec![0, 2]);
    assert_eq!(alice.failed_sessions(), 1);
    // Two good sessions plus three attempts on the failing one.
    assert_eq!(service.calls_for("alice"), 5);
    assert_eq!(report.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn records_keep_session_order_when_calls_finish_out_of_order() {
    let events = read_events(LOG.as_bytes()).unwrap();
    let service = FakeService::default()
        .with("alice", 0, Plan::Reply { delay: Duration::from_secs(9), score: 0.5 })
        .with("alice", 1, Plan::Reply { delay: Duration::from_secs(5), score: 0.6 })
        .with("alice", 2, Plan::Reply { delay: Duration::from_secs(1), score: 0.9 });
    let options = AnalysisOptions {
        max_concurrency: 3,
        ..AnalysisOptions::default()
    };
    let (analyzer, _) = analyzer(service, options);

    let report = analyzer
        .analyze(events, &AnalysisRequest::Single("alice".to_string()))
        .await;

    assert_eq!(indexes(&report, "alice"), vec![0, 1, 2]);
    let scores: Vec<f64> = report
        .get("alice")
        .unwrap()
        .sessions
        .iter()
        .map(|record| record.confidence_score)
        .collect();
    assert_eq!(scores, vec![0.5, 0.6, 0.9]);
}

#[tokio::test(start_paused = true)]
async fn concurrent_calls_never_exceed_the_worker_limit() {
    let events = read_events(LOG.as_bytes()).unwrap();
    let slow = || Plan::Reply { delay: Duration::from_secs(2), score: 0.7 };
    let service = FakeService::default()
        .with("alice", 0, slow())
        .with("alice", 1, slow())
        .with("alice", 2, slow())
        .with("bob", 0, slow())
        .with("carol", 0, slow());
    let (analyzer, service) = analyzer(service, AnalysisOptions::default());

    let report = analyzer.analyze(events, &AnalysisRequest::All).await;

    assert_eq!(service.peak_in_flight.load(Ordering::SeqCst), 2);
    let classified: usize = report.users.iter().map(|u| u.sessions.len()).sum();
    assert_eq!(classified, 5);
}

#[tokio::test(start_paused = true)]
async fn deadline_returns_a_partial_report() {
    let events = read_events(LOG.as_bytes()).unwrap();
    let service = FakeService::default()
        .with("alice", 0, Plan::Reply { delay: Duration::from_secs(1), score: 0.7 })
        .with("alice", 1, Plan::Reply { delay: Duration::from_secs(600), score: 0.7 })
        .with("alice", 2, Plan::Reply { delay: Duration::from_secs(600), score: 0.7 });
    let options = AnalysisOptions {
        max_concurrency: 4,
        deadline: Some(Duration::from_secs(30)),
        ..AnalysisOptions::default()
    };
    let (analyzer, _) = analyzer(service, options);

    let started = tokio::time::Instant::now();
    let report = analyzer.analyze(events, &AnalysisRequest::All).await;

    assert!(started.elapsed() < Duration::from_secs(60));
    let alice = report.get("alice").unwrap();
    assert_eq!(alice.total_sessions, 3);
    assert_eq!(indexes(&report, "alice"), vec![0]);
    assert_eq!(alice.cancelled_sessions, 2);
    assert_eq!(alice.failed_sessions(), 0);
    assert_eq!(indexes(&report, "bob"), vec![0]);
    assert_eq!(indexes(&report, "carol"), vec![0]);
}

#[tokio::test(start_paused = true)]
async fn cancelling_one_user_leaves_the_others_untouched() {
    let events = read_events(LOG.as_bytes()).unwrap();
    let (analyzer, service) = analyzer(FakeService::default(), AnalysisOptions::default());
    let (alice_events, bob_events): (Vec<_>, Vec<_>) = events
        .into_iter()
        .filter(|e| e.user_id != "carol")
        .partition(|e| e.user_id == "alice");

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let (alice, bob) = tokio::join!(
        analyzer.analyze_user("alice".to_string(), alice_events, cancelled),
        analyzer.analyze_user("bob".to_string(), bob_events, CancellationToken::new()),
    );

    assert_eq!(alice.total_sessions, 3);
    assert!(alice.sessions.is_empty());
    assert_eq!(alice.cancelled_sessions, 3);
    assert!(!alice.is_complete());
    assert_eq!(service.calls_for("alice"), 0);
    assert_eq!(bob.sessions.len(), 1);
    assert!(bob.is_complete());
}

#[tokio::test(start_paused = true)]
async fn interrupted_users_are_analyzed_again_on_resume() {
    let events = read_events(LOG.as_bytes()).unwrap();
    let stuck = || Plan::Reply { delay: Duration::from_secs(600), score: 0.7 };
    let service = FakeService::default()
        .with("alice", 0, stuck())
        .with("alice", 1, stuck())
        .with("alice", 2, stuck());
    let options = AnalysisOptions {
        max_concurrency: 4,
        deadline: Some(Duration::from_secs(30)),
        ..AnalysisOptions::default()
    };
    let (interrupted, _) = analyzer(service, options);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("intent_result.json");
    let first_run = interrupted.analyze(events.clone(), &AnalysisRequest::All).await;
    write_report(&path, &first_run).unwrap();

    let previous = load_report(&path).unwrap().unwrap();
    let alice = previous.get("alice").unwrap();
    assert!(alice.sessions.is_empty());
    assert_eq!(alice.cancelled_sessions, 3);
    let completed = previous.completed_user_ids();
    assert_eq!(completed, HashSet::from(["bob".to_string(), "carol".to_string()]));

    let (resumed, service) = analyzer(FakeService::default(), AnalysisOptions::default());
    let second_run = resumed
        .analyze_with(events, &AnalysisRequest::All, &completed, CancellationToken::new())
        .await;
    assert_eq!(service.calls_for("alice"), 3);
    assert_eq!(service.calls_for("bob"), 0);

    let mut merged = previous;
    merged.merge(second_run);
    assert_eq!(indexes(&merged, "alice"), vec![0, 1, 2]);
    assert_eq!(merged.get("alice").unwrap().cancelled_sessions, 0);
    assert_eq!(merged.completed_user_ids().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn finished_users_reach_the_report_file_before_the_run_ends() {
    let events = read_events(LOG.as_bytes()).unwrap();
    let slow = || Plan::Reply { delay: Duration::from_secs(600), score: 0.7 };
    let service = FakeService::default()
        .with("alice", 0, slow())
        .with("alice", 1, slow())
        .with("alice", 2, slow());
    let options = AnalysisOptions {
        max_concurrency: 4,
        ..AnalysisOptions::default()
    };
    let (analyzer, _) = analyzer(service, options);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("intent_result.json");
    let mut checkpoint = ReportCheckpoint::new(&path, AnalysisReport::default());
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();

    let request = AnalysisRequest::First(2);
    let skip = HashSet::new();
    let run = analyzer.analyze_with_progress(
        events,
        &request,
        &skip,
        CancellationToken::new(),
        progress_tx,
    );
    let saving = async {
        let mut on_disk = Vec::new();
        while let Some(user) = progress_rx.recv().await {
            checkpoint.record(user).unwrap();
            let saved = load_report(&path).unwrap().unwrap();
            on_disk.push(
                saved
                    .users
                    .iter()
                    .map(|u| u.user_uuid.clone())
                    .collect::<Vec<_>>(),
            );
        }
        on_disk
    };
    let (report, on_disk) = tokio::join!(run, saving);

    assert_eq!(
        on_disk,
        vec![
            vec!["bob".to_string()],
            vec!["bob".to_string(), "alice".to_string()],
        ]
    );
    let finished = checkpoint.finish(report).unwrap();
    assert_eq!(indexes(&finished, "alice"), vec![0, 1, 2]);
    assert_eq!(load_report(&path).unwrap(), Some(finished));
}

#[tokio::test]
async fn unknown_single_user_is_listed_without_sessions() {
    let events = read_events(LOG.as_bytes()).unwrap();
    let (analyzer, service) = analyzer(FakeService::default(), AnalysisOptions::default());

    let report = analyzer
        .analyze(events, &AnalysisRequest::Single("dave".to_string()))
        .await;

    let dave = report.get("dave").unwrap();
    assert_eq!((dave.total_events, dave.total_sessions), (0, 0));
    assert!(dave.sessions.is_empty());
    assert!(service.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn first_n_and_resume_select_users() {
    let events = read_events(LOG.as_bytes()).unwrap();
    let (analyzer, _) = analyzer(FakeService::default(), AnalysisOptions::default());

    let first_two = analyzer
        .analyze(events.clone(), &AnalysisRequest::First(2))
        .await;
    assert_eq!(
        first_two.users.iter().map(|u| u.user_uuid.as_str()).collect::<Vec<_>>(),
        vec!["alice", "bob"]
    );

    let completed: HashSet<String> = first_two.user_ids();
    let rest = analyzer
        .analyze_with(events, &AnalysisRequest::All, &completed, CancellationToken::new())
        .await;
    assert_eq!(
        rest.users.iter().map(|u| u.user_uuid.as_str()).collect::<Vec<_>>(),
        vec!["carol"]
    );

    let mut merged = first_two;
    merged.merge(rest);
    assert_eq!(merged.len(), 3);
}

#[tokio::test]
async fn out_of_range_confidence_is_clamped_and_flagged() {
    let events = read_events(LOG.as_bytes()).unwrap();
    let service = FakeService::default().with(
        "bob",
        0,
        Plan::Reply { delay: Duration::ZERO, score: 1.7 },
    );
    let (analyzer, _) = analyzer(service, AnalysisOptions::default());

    let report = analyzer
        .analyze(events, &AnalysisRequest::Single("bob".to_string()))
        .await;

    let record = &report.get("bob").unwrap().sessions[0];
    assert_eq!(record.confidence_score, 1.0);
    assert!(record.confidence_clamped);
}
