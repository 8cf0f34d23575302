//! Parsing of worker `/status` and `/current-frame` replies.
//!
//! Workers are loose about their JSON: fields come and go between kinds and
//! between states of one kind. Everything here is optional with defaults,
//! and parsing never fails.

use lookout_core::ActionPhase;
use lookout_worker::session::server_session_id;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A subject recognised by an authentication worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognizedSubject {
    #[serde(default, alias = "email", alias = "subjectId")]
    pub subject_id: String,
    #[serde(default, alias = "name", alias = "displayName")]
    pub display_name: String,
}

/// A normalised `/status` reply.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusReport {
    /// Worker-reported status, `"unknown"` when absent
    pub status: String,
    pub message: String,
    /// Capture progress in `0.0..=1.0`
    pub progress: f64,
    pub session_id: Option<String>,
    pub active: Option<bool>,
    /// Explicit result flag of a finished run
    pub success: Option<bool>,
    pub recognized: Option<Vec<RecognizedSubject>>,
    pub current_count: Option<u64>,
    pub max_count: Option<u64>,
}

/// Terminal verdict derived from a status reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub phase: ActionPhase,
    pub success: bool,
    pub message: String,
}

impl StatusReport {
    pub fn parse(payload: &Value) -> Self {
        let str_field = |name: &str| payload.get(name).and_then(Value::as_str).map(String::from);

        Self {
            status: str_field("status").unwrap_or_else(|| "unknown".to_string()),
            message: str_field("message").unwrap_or_default(),
            progress: payload
                .get("progress")
                .and_then(Value::as_f64)
                .map(|p| p.clamp(0.0, 1.0))
                .unwrap_or(0.0),
            session_id: server_session_id(payload),
            active: payload.get("active").and_then(Value::as_bool),
            success: payload.get("success").and_then(Value::as_bool),
            recognized: payload
                .get("recognized_users")
                .and_then(|users| parse_subjects(users)),
            current_count: payload.get("current_count").and_then(Value::as_u64),
            max_count: payload.get("max_count").and_then(Value::as_u64),
        }
    }

    /// The worker carries a finished run's result.
    pub fn has_result(&self) -> bool {
        self.success.is_some() && !self.message.is_empty()
    }

    /// Terminal verdict while the action is still polling.
    ///
    /// A result (`success` plus `message`) wins over the status string.
    pub fn verdict(&self) -> Option<Verdict> {
        if let Some(success) = self.success.filter(|_| self.has_result()) {
            return Some(Verdict {
                phase: if success {
                    ActionPhase::Completed
                } else {
                    ActionPhase::Failed
                },
                success,
                message: self.message.clone(),
            });
        }

        let (phase, success, fallback) = match self.status.as_str() {
            "completed" | "success" => (ActionPhase::Completed, true, "Completed"),
            "stopped" => (ActionPhase::Stopped, true, "Stopped"),
            "failed" | "error" => (ActionPhase::Failed, false, "Failed"),
            _ => return None,
        };
        Some(Verdict {
            phase,
            success,
            message: if self.message.is_empty() {
                fallback.to_string()
            } else {
                self.message.clone()
            },
        })
    }

    /// Terminal verdict after `/stop` has been issued.
    ///
    /// An idle or inactive worker counts as stopped here, since it will not
    /// produce a result on its own.
    pub fn verdict_after_stop(&self) -> Option<Verdict> {
        if let Some(verdict) = self.verdict() {
            return Some(verdict);
        }
        self.reports_inactive().then(|| self.stopped_verdict())
    }

    /// The worker says it is not running a capture.
    pub fn reports_inactive(&self) -> bool {
        self.active == Some(false) || matches!(self.status.as_str(), "idle" | "inactive")
    }

    /// The worker says a capture is in progress.
    pub fn reports_active(&self) -> bool {
        self.active == Some(true) || matches!(self.status.as_str(), "running" | "capturing")
    }

    /// `Stopped` verdict for a worker that ended without a result.
    pub fn stopped_verdict(&self) -> Verdict {
        Verdict {
            phase: ActionPhase::Stopped,
            success: true,
            message: if self.message.is_empty() {
                "Stopped".to_string()
            } else {
                self.message.clone()
            },
        }
    }
}

fn parse_subjects(users: &Value) -> Option<Vec<RecognizedSubject>> {
    let items = users.as_array()?;
    Some(
        items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(RecognizedSubject {
                    subject_id: s.clone(),
                    display_name: s.clone(),
                }),
                Value::Object(_) => serde_json::from_value(item.clone()).ok(),
                _ => None,
            })
            .collect(),
    )
}

/// A normalised `/current-frame` reply.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameReport {
    /// Base64-encoded image, absent between captures
    pub frame: Option<String>,
    pub active: bool,
    pub session_id: Option<String>,
    pub max_count: Option<u64>,
    pub current_count: Option<u64>,
}

impl FrameReport {
    pub fn parse(payload: &Value) -> Self {
        Self {
            frame: payload
                .get("frame")
                .and_then(Value::as_str)
                .filter(|f| !f.is_empty())
                .map(String::from),
            active: payload
                .get("active")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            session_id: server_session_id(payload),
            max_count: payload.get("max_count").and_then(Value::as_u64),
            current_count: payload.get("current_count").and_then(Value::as_u64),
        }
    }
}
