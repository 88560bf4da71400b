//! The per-submission Query record and its state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::cache::Fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryStatus {
    Pending,
    Running,
    Success,
    Failed,
    TimedOut,
    Cancelled,
}

impl QueryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueryStatus::Success | QueryStatus::Failed | QueryStatus::TimedOut | QueryStatus::Cancelled
        )
    }

    /// PENDING may move anywhere, RUNNING only to a terminal state
    pub fn can_transition_to(&self, next: QueryStatus) -> bool {
        match self {
            QueryStatus::Pending => next != QueryStatus::Pending,
            QueryStatus::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            QueryStatus::Pending => "PENDING",
            QueryStatus::Running => "RUNNING",
            QueryStatus::Success => "SUCCESS",
            QueryStatus::Failed => "FAILED",
            QueryStatus::TimedOut => "TIMED_OUT",
            QueryStatus::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Illegal query transition from {from} to {to}")]
pub struct TransitionError {
    pub from: QueryStatus,
    pub to: QueryStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    pub id: Uuid,
    /// Caller correlation id
    pub client_id: Option<String>,
    /// Rendered SQL, once known
    pub sql: Option<String>,
    pub status: QueryStatus,
    pub rows: usize,
    /// 0 - 100
    pub progress: u8,
    pub error: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Backend handle for the dispatched call
    pub tracking_handle: Option<String>,
    pub cache_key: Option<Fingerprint>,
    pub is_cached: bool,
}

impl Query {
    pub fn new(client_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_id,
            sql: None,
            status: QueryStatus::Pending,
            rows: 0,
            progress: 0,
            error: None,
            start_time: Utc::now(),
            end_time: None,
            tracking_handle: None,
            cache_key: None,
            is_cached: false,
        }
    }

    pub fn transition(&mut self, next: QueryStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.end_time = Some(Utc::now());
            if next == QueryStatus::Success {
                self.progress = 100;
            }
        }
        Ok(())
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }
}
