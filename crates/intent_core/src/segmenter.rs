//! crates/intent_core/src/segmenter.rs
//!
//! Splits one user's time-ordered events into sessions using an
//! inactivity-timeout rule.

use chrono::{Duration, NaiveDateTime};

use crate::domain::{Event, Session};

pub const DEFAULT_SESSION_TIMEOUT_MINUTES: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SegmentError {
    #[error("no events to segment")]
    EmptyInput,
    #[error("events are not in time order: event {index} at {current} precedes {previous}")]
    Unsorted {
        index: usize,
        previous: NaiveDateTime,
        current: NaiveDateTime,
    },
}

/// Groups events into sessions. A gap strictly greater than the timeout
/// closes the current session; a gap equal to it does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSegmenter {
    timeout: Duration,
}

impl Default for SessionSegmenter {
    fn default() -> Self {
        Self::from_minutes(DEFAULT_SESSION_TIMEOUT_MINUTES)
    }
}

impl SessionSegmenter {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn from_minutes(minutes: u32) -> Self {
        Self::new(Duration::minutes(i64::from(minutes)))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Segments a single user's events. The caller is responsible for sorting;
    /// a negative gap is reported as [`SegmentError::Unsorted`] rather than fixed.
    pub fn segment(&self, events: Vec<Event>) -> Result<Vec<Session>, SegmentError> {
        let mut iter = events.into_iter().enumerate();
        let (_, first) = iter.next().ok_or(SegmentError::EmptyInput)?;
        let user_id = first.user_id.clone();

        let mut sessions = Vec::new();
        let mut previous = first.event_time;
        let mut current = vec![first];

        for (index, event) in iter {
            let gap = event.event_time - previous;
            if gap < Duration::zero() {
                return Err(SegmentError::Unsorted {
                    index,
                    previous,
                    current: event.event_time,
                });
            }
            previous = event.event_time;

            if gap > self.timeout {
                sessions.push(Session {
                    user_id: user_id.clone(),
                    session_index: sessions.len(),
                    events: std::mem::take(&mut current),
                });
            }
            current.push(event);
        }

        sessions.push(Session {
            user_id,
            session_index: sessions.len(),
            events: current,
        });
        Ok(sessions)
    }
}
