//! In-memory remote double shared by engine and lifecycle tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::models::NewWalkSession;
use crate::remote::{RemoteError, RemoteResult, SessionRemote};

/// One recorded remote write
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    Insert {
        user_id: String,
    },
    Pause {
        session_id: String,
        user_id: String,
        paused_at: i64,
    },
    Resume {
        session_id: String,
        user_id: String,
        resumed_at: i64,
        pause_secs: i64,
    },
    Speed {
        session_id: String,
        user_id: String,
        speed_kmh: f64,
    },
    End {
        session_id: String,
        user_id: String,
        fields: serde_json::Map<String, serde_json::Value>,
    },
    Delete {
        session_id: String,
        user_id: String,
    },
}

/// Recording fake for [`SessionRemote`].
///
/// Inserted sessions get ids `srv-1`, `srv-2`, ... and become "known";
/// updates and deletes against unknown ids fail like the backend reporting
/// no matching row. Individual actions can be forced to fail by tag.
#[derive(Clone, Default)]
pub struct FakeRemote {
    calls: Arc<Mutex<Vec<RemoteCall>>>,
    failures: Arc<Mutex<HashSet<String>>>,
    known_sessions: Arc<Mutex<HashSet<String>>>,
    next_id: Arc<AtomicU64>,
}

impl FakeRemote {
    /// All remote writes observed so far, in call order
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Force every call of the tagged action to fail
    pub fn fail_action(&self, action: &str) {
        self.failures.lock().unwrap().insert(action.to_string());
    }

    /// Remove all forced failures
    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    /// Pretend the backend already has this session row
    pub fn add_known_session(&self, session_id: &str) {
        self.known_sessions
            .lock()
            .unwrap()
            .insert(session_id.to_string());
    }

    fn record(&self, call: RemoteCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_forced_failure(&self, action: &str) -> RemoteResult<()> {
        if self.failures.lock().unwrap().contains(action) {
            return Err(RemoteError::Api(format!("forced {action} failure (500)")));
        }
        Ok(())
    }

    fn check_known(&self, session_id: &str) -> RemoteResult<()> {
        if !self.known_sessions.lock().unwrap().contains(session_id) {
            return Err(RemoteError::SessionNotFound(session_id.to_string()));
        }
        Ok(())
    }
}

impl SessionRemote for FakeRemote {
    async fn insert_session(
        &self,
        user_id: &str,
        _session: &NewWalkSession,
    ) -> RemoteResult<String> {
        self.record(RemoteCall::Insert {
            user_id: user_id.to_string(),
        });
        self.check_forced_failure("insert")?;

        let server_id = format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.add_known_session(&server_id);
        Ok(server_id)
    }

    async fn pause_session(
        &self,
        session_id: &str,
        user_id: &str,
        paused_at: i64,
    ) -> RemoteResult<()> {
        self.record(RemoteCall::Pause {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            paused_at,
        });
        self.check_forced_failure("pause")?;
        self.check_known(session_id)
    }

    async fn resume_session(
        &self,
        session_id: &str,
        user_id: &str,
        resumed_at: i64,
        pause_secs: i64,
    ) -> RemoteResult<()> {
        self.record(RemoteCall::Resume {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            resumed_at,
            pause_secs,
        });
        self.check_forced_failure("resume")?;
        self.check_known(session_id)
    }

    async fn update_speed(
        &self,
        session_id: &str,
        user_id: &str,
        speed_kmh: f64,
    ) -> RemoteResult<()> {
        self.record(RemoteCall::Speed {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            speed_kmh,
        });
        self.check_forced_failure("update_speed")?;
        self.check_known(session_id)
    }

    async fn end_session(
        &self,
        session_id: &str,
        user_id: &str,
        fields: &serde_json::Map<String, serde_json::Value>,
    ) -> RemoteResult<()> {
        self.record(RemoteCall::End {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            fields: fields.clone(),
        });
        self.check_forced_failure("end")?;
        self.check_known(session_id)
    }

    async fn delete_session(&self, session_id: &str, user_id: &str) -> RemoteResult<()> {
        self.record(RemoteCall::Delete {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
        });
        self.check_forced_failure("cancel")?;
        self.check_known(session_id)
    }
}
