//! crates/intent_core/src/domain.rs
//!
//! Defines the pure, core data structures of the analysis pipeline.
//! These structs know nothing about CSV files, HTTP or the model provider.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A single behavioral event recorded for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub user_id: String,
    pub event_time: NaiveDateTime,
    pub event_name: String,
    pub extra_info: Option<String>,
    // Pass-through context columns, copied verbatim from the input row.
    pub approved_time: Option<String>,
    pub first_payment_time: Option<String>,
}

impl Event {
    /// Creates an event without the optional context columns.
    pub fn new(
        user_id: impl Into<String>,
        event_time: NaiveDateTime,
        event_name: impl Into<String>,
        extra_info: Option<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            event_time,
            event_name: event_name.into(),
            extra_info,
            approved_time: None,
            first_payment_time: None,
        }
    }
}

/// A maximal run of one user's events with no inactivity gap above the timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub session_index: usize,
    pub events: Vec<Event>,
}

impl Session {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn started_at(&self) -> Option<NaiveDateTime> {
        self.events.first().map(|e| e.event_time)
    }

    pub fn ended_at(&self) -> Option<NaiveDateTime> {
        self.events.last().map(|e| e.event_time)
    }
}

/// The fixed taxonomy of intents the classification service may assign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    PaymentIntent,
    CreditLimitIntent,
    InstallmentIntent,
    VoucherIntent,
    MarketingIntent,
    ExplorationIntent,
}

impl IntentCategory {
    pub const ALL: [IntentCategory; 6] = [
        IntentCategory::PaymentIntent,
        IntentCategory::CreditLimitIntent,
        IntentCategory::InstallmentIntent,
        IntentCategory::VoucherIntent,
        IntentCategory::MarketingIntent,
        IntentCategory::ExplorationIntent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentCategory::PaymentIntent => "payment_intent",
            IntentCategory::CreditLimitIntent => "credit_limit_intent",
            IntentCategory::InstallmentIntent => "installment_intent",
            IntentCategory::VoucherIntent => "voucher_intent",
            IntentCategory::MarketingIntent => "marketing_intent",
            IntentCategory::ExplorationIntent => "exploration_intent",
        }
    }

    /// A one-line description used when presenting the taxonomy to the model.
    pub fn description(&self) -> &'static str {
        match self {
            IntentCategory::PaymentIntent => {
                "the user wants to make a payment (virtual account, QR payment, top-up, e-commerce checkout)"
            }
            IntentCategory::CreditLimitIntent => {
                "the user is checking or managing available credit limit or a temporary limit increase"
            }
            IntentCategory::InstallmentIntent => {
                "the user is looking at installment plans, tenors or installment checkout options"
            }
            IntentCategory::VoucherIntent => {
                "the user is seeking vouchers, coupons, membership benefits or new-user perks"
            }
            IntentCategory::MarketingIntent => {
                "the user engages with marketing campaigns, popups, banners, tasks or rewards"
            }
            IntentCategory::ExplorationIntent => {
                "the user is browsing or exploring product features without a clear goal"
            }
        }
    }

    /// Parses a label as returned by the model. Accepts the bare names
    /// (`payment`) as well as the suffixed ones (`payment_intent`).
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let bare = normalized.strip_suffix("_intent").unwrap_or(&normalized);
        match bare {
            "payment" => Some(IntentCategory::PaymentIntent),
            "credit_limit" | "limit" => Some(IntentCategory::CreditLimitIntent),
            "installment" => Some(IntentCategory::InstallmentIntent),
            "voucher" | "coupon" | "membership" => Some(IntentCategory::VoucherIntent),
            "marketing" => Some(IntentCategory::MarketingIntent),
            "exploration" | "browsing" => Some(IntentCategory::ExplorationIntent),
            _ => None,
        }
    }
}

impl fmt::Display for IntentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Suggested follow-up for the operations team, generated from a classified session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecommendation {
    #[serde(default)]
    pub online_solutions: Vec<String>,
    #[serde(default)]
    pub offline_solutions: Vec<String>,
    pub priority: String,
    pub targeted_message: String,
}

/// The classified intent of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentRecord {
    pub intent: String,
    pub intent_category: IntentCategory,
    pub confidence_score: f64,
    pub key_behaviors: Vec<String>,
    pub reasoning: String,
    pub next_action_prediction: String,
    pub session_index: usize,
    pub session_size: usize,
    pub timestamp: DateTime<Utc>,
    /// Set when the service reported a score outside [0, 1].
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub confidence_clamped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_recommendation: Option<OperationRecommendation>,
}

/// All classified sessions of a single user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserResult {
    pub user_uuid: String,
    /// Number of sessions attempted, not the number that succeeded.
    pub total_sessions: usize,
    #[serde(default)]
    pub total_events: usize,
    pub sessions: Vec<IntentRecord>,
    /// Sessions abandoned because the run was interrupted. A user with any is
    /// analyzed again on resume.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub cancelled_sessions: usize,
}

fn is_zero(value: &usize) -> bool {
    *value == 0
}

impl UserResult {
    pub fn empty(user_uuid: impl Into<String>, total_events: usize) -> Self {
        Self {
            user_uuid: user_uuid.into(),
            total_sessions: 0,
            total_events,
            sessions: Vec::new(),
            cancelled_sessions: 0,
        }
    }

    /// Number of sessions that were attempted and failed, not counting
    /// cancelled ones.
    pub fn failed_sessions(&self) -> usize {
        self.total_sessions
            .saturating_sub(self.sessions.len())
            .saturating_sub(self.cancelled_sessions)
    }

    /// Whether every session was run to an outcome.
    pub fn is_complete(&self) -> bool {
        self.cancelled_sessions == 0
    }
}

/// The final artifact of an analysis run. Serializes as a plain JSON array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalysisReport {
    pub users: Vec<UserResult>,
}

impl AnalysisReport {
    pub fn new(users: Vec<UserResult>) -> Self {
        Self { users }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn get(&self, user_uuid: &str) -> Option<&UserResult> {
        self.users.iter().find(|u| u.user_uuid == user_uuid)
    }

    pub fn user_ids(&self) -> HashSet<String> {
        self.users.iter().map(|u| u.user_uuid.clone()).collect()
    }

    /// Users that a resumed run can skip. Interrupted users are left out.
    pub fn completed_user_ids(&self) -> HashSet<String> {
        self.users
            .iter()
            .filter(|u| u.is_complete())
            .map(|u| u.user_uuid.clone())
            .collect()
    }

    /// Merges `other` into this report. Users already present are replaced in
    /// place; new users are appended in their order within `other`.
    pub fn merge(&mut self, other: AnalysisReport) {
        for incoming in other.users {
            match self
                .users
                .iter_mut()
                .find(|existing| existing.user_uuid == incoming.user_uuid)
            {
                Some(existing) => *existing = incoming,
                None => self.users.push(incoming),
            }
        }
    }
}

/// Which users an analysis run should cover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisRequest {
    Single(String),
    All,
    /// The first `n` users in order of first appearance.
    First(usize),
}
