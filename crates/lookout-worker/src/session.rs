//! Session identity and stale-response filtering.
//!
//! Every user-visible action gets a fresh [`SessionId`]. A worker may also
//! issue its own `session_id`; the first one observed is pinned and any reply
//! carrying a different id is discarded. Once a session has settled into a
//! terminal state, nothing further is applied to it.

use chrono::{DateTime, Utc};
use lookout_core::WorkerKind;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static LAST_SESSION_ID: AtomicU64 = AtomicU64::new(0);

/// Locally generated session identifier.
///
/// Millisecond timestamp, bumped when two sessions are created within the
/// same millisecond so ids stay strictly increasing within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocate the next id.
    pub fn next() -> Self {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let mut prev = LAST_SESSION_ID.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev + 1);
            match LAST_SESSION_ID.compare_exchange_weak(
                prev,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Self(candidate),
                Err(actual) => prev = actual,
            }
        }
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Extract a worker-issued `session_id`, accepting numbers or strings.
pub fn server_session_id(payload: &Value) -> Option<String> {
    match payload.get("session_id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// What to do with an incoming reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Apply it to the session view
    Apply,
    /// Carries another session's id; discard
    Stale,
    /// The session is already terminal; discard
    Settled,
}

/// One user-visible action against one worker kind.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub kind: WorkerKind,
    pub created_at: DateTime<Utc>,
    server_session_id: Option<String>,
    settled: bool,
}

impl Session {
    pub fn new(kind: WorkerKind) -> Self {
        Self {
            id: SessionId::next(),
            kind,
            created_at: Utc::now(),
            server_session_id: None,
            settled: false,
        }
    }

    /// The pinned worker session id, if one has been observed.
    pub fn server_session_id(&self) -> Option<&str> {
        self.server_session_id.as_deref()
    }

    /// Pin `id` if nothing is pinned yet. Returns true when `id` is (now) pinned.
    pub fn adopt(&mut self, id: &str) -> bool {
        match &self.server_session_id {
            None => {
                self.server_session_id = Some(id.to_string());
                true
            }
            Some(pinned) => pinned == id,
        }
    }

    /// True when a reply with this id belongs to the session.
    pub fn accepts(&self, id: &str) -> bool {
        self.server_session_id
            .as_deref()
            .is_none_or(|pinned| pinned == id)
    }

    /// Decide whether a reply carrying `id` may be applied, pinning on first sight.
    pub fn admit(&mut self, id: Option<&str>) -> Admission {
        if self.settled {
            return Admission::Settled;
        }
        match id {
            None => Admission::Apply,
            Some(id) if self.adopt(id) => Admission::Apply,
            Some(_) => Admission::Stale,
        }
    }

    /// Mark the session terminal. Returns false if it already was.
    pub fn settle(&mut self) -> bool {
        !std::mem::replace(&mut self.settled, true)
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }
}
