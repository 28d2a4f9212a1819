use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, SystemTime};

use uuid::Uuid;

use crate::posts::Summary;

/// Name of the cookie carrying the session id
pub const SESSION_COOKIE: &str = "session";

const SESSION_DURATION: u64 = 24 * 60 * 60; // 24 hours in seconds

/// Where a visitor is in the single-page flow
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Form shown, no report yet
    AwaitingAnalysis,
    /// A report exists and can be viewed, downloaded, or reset
    AnalysisComplete {
        report: String,
        summary: Summary,
        email: String,
        email_sent: bool,
        created_at: chrono::DateTime<chrono::Local>,
    },
    /// Admin password was entered; code generation unlocked
    Admin { last_batch: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct Session {
    pub stage: Stage,
    pub expires_at: SystemTime,
}

/// In-memory session storage
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh session in `AwaitingAnalysis` and return its id
    pub fn create(&self) -> String {
        let session_id = Uuid::new_v4().to_string();
        self.set_stage(&session_id, Stage::AwaitingAnalysis);
        session_id
    }

    /// Current stage for a session, if it exists and has not expired
    pub fn stage(&self, session_id: &str) -> Option<Stage> {
        self.purge_expired();
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.get(session_id).map(|s| s.stage.clone())
    }

    /// Replace the stage, creating the session if needed and renewing its lifetime
    pub fn set_stage(&self, session_id: &str, stage: Stage) {
        let expires_at = SystemTime::now() + Duration::from_secs(SESSION_DURATION);
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.insert(session_id.to_string(), Session { stage, expires_at });
    }

    /// Go back to the empty form
    pub fn reset(&self, session_id: &str) {
        self.set_stage(session_id, Stage::AwaitingAnalysis);
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_expired(&self) {
        let now = SystemTime::now();
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.retain(|_, s| s.expires_at > now);
    }

    #[cfg(test)]
    fn expire(&self, session_id: &str) {
        let mut sessions = self.sessions.write().unwrap();
        if let Some(s) = sessions.get_mut(session_id) {
            s.expires_at = SystemTime::UNIX_EPOCH;
        }
    }
}
