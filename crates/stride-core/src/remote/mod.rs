//! Remote write client for the walk session table.
//!
//! The backend exposes a PostgREST-style data API: inserts, filtered
//! updates, and deletes against `walk_sessions`, plus one RPC for the
//! atomic pause-total increment on resume. `SessionRemote` is the seam the
//! sync engine dispatches through; tests substitute an in-memory fake.

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

use crate::config::RemoteConfig;
use crate::models::{NewWalkSession, SessionState};
use crate::util::compact_text;

const REMOTE_HTTP_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Remote HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Remote API error: {0}")]
    Api(String),
    #[error("Invalid remote response payload: {0}")]
    InvalidPayload(String),
    #[error("No session matched id {0}")]
    SessionNotFound(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Remote writes for timed walk sessions, keyed by row id and owning user.
///
/// One method per queued action; each call is a single remote write.
#[allow(async_fn_in_trait)]
pub trait SessionRemote {
    /// Insert a new session row and return the server-assigned ID
    async fn insert_session(
        &self,
        user_id: &str,
        session: &NewWalkSession,
    ) -> RemoteResult<String>;

    /// Mark a session paused and stamp the pause start time
    async fn pause_session(
        &self,
        session_id: &str,
        user_id: &str,
        paused_at: i64,
    ) -> RemoteResult<()>;

    /// Mark a session active again, clearing the pause start
    ///
    /// Implementations must add `pause_secs` to the cumulative pause total
    /// in a single atomic statement on the backend; the caller never reads
    /// the current total first.
    async fn resume_session(
        &self,
        session_id: &str,
        user_id: &str,
        resumed_at: i64,
        pause_secs: i64,
    ) -> RemoteResult<()>;

    /// Update the session's walking speed
    async fn update_speed(
        &self,
        session_id: &str,
        user_id: &str,
        speed_kmh: f64,
    ) -> RemoteResult<()>;

    /// Apply an arbitrary set of field updates to the session row
    async fn end_session(
        &self,
        session_id: &str,
        user_id: &str,
        fields: &serde_json::Map<String, serde_json::Value>,
    ) -> RemoteResult<()>;

    /// Delete the session row
    async fn delete_session(&self, session_id: &str, user_id: &str) -> RemoteResult<()>;
}

/// HTTP implementation of `SessionRemote` against the managed REST backend
#[derive(Clone)]
pub struct HttpSessionRemote {
    config: RemoteConfig,
    client: reqwest::Client,
}

impl HttpSessionRemote {
    pub fn new(config: RemoteConfig) -> RemoteResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REMOTE_HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self { config, client })
    }

    fn table_url(&self) -> String {
        format!("{}/walk_sessions", self.config.rest_url())
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", self.config.api_key())
            .bearer_auth(self.config.access_token())
            .header("Accept", "application/json")
    }

    /// PATCH the filtered row, requiring at least one row to match
    async fn update_session(
        &self,
        session_id: &str,
        user_id: &str,
        body: &serde_json::Value,
    ) -> RemoteResult<()> {
        let url = format!(
            "{}?{}",
            self.table_url(),
            row_filter(session_id, user_id)
        );
        let response = self
            .request(reqwest::Method::PATCH, &url)
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await?;

        let rows = read_row_array(response).await?;
        if rows.is_empty() {
            return Err(RemoteError::SessionNotFound(session_id.to_string()));
        }
        Ok(())
    }
}

impl SessionRemote for HttpSessionRemote {
    async fn insert_session(
        &self,
        user_id: &str,
        session: &NewWalkSession,
    ) -> RemoteResult<String> {
        let body = json!({
            "user_id": user_id,
            "started_at": session.started_at,
            "status": "in_progress",
            "session_state": SessionState::Active.as_str(),
            "pause_total_secs": 0,
            "pause_started_at": null,
            "speed_kmh": session.speed_kmh,
        });

        let response = self
            .request(reqwest::Method::POST, &self.table_url())
            .header("Prefer", "return=representation")
            .json(&body)
            .send()
            .await?;

        let rows = read_row_array(response).await?;
        rows.into_iter()
            .next()
            .map(|row| row.id)
            .ok_or_else(|| {
                RemoteError::InvalidPayload("insert returned no rows".to_string())
            })
    }

    async fn pause_session(
        &self,
        session_id: &str,
        user_id: &str,
        paused_at: i64,
    ) -> RemoteResult<()> {
        let body = json!({
            "session_state": SessionState::Paused.as_str(),
            "pause_started_at": paused_at,
        });
        self.update_session(session_id, user_id, &body).await
    }

    async fn resume_session(
        &self,
        session_id: &str,
        user_id: &str,
        resumed_at: i64,
        pause_secs: i64,
    ) -> RemoteResult<()> {
        // The RPC runs `pause_total_secs = pause_total_secs + p_pause_secs`
        // server-side in one statement and returns the matched row count.
        let url = format!("{}/rpc/resume_walk_session", self.config.rest_url());
        let body = json!({
            "p_session_id": session_id,
            "p_user_id": user_id,
            "p_resumed_at": resumed_at,
            "p_pause_secs": pause_secs,
        });

        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Api(parse_api_error(status, &body)));
        }

        let matched = response
            .json::<i64>()
            .await
            .map_err(|error| RemoteError::InvalidPayload(error.to_string()))?;
        if matched == 0 {
            return Err(RemoteError::SessionNotFound(session_id.to_string()));
        }
        Ok(())
    }

    async fn update_speed(
        &self,
        session_id: &str,
        user_id: &str,
        speed_kmh: f64,
    ) -> RemoteResult<()> {
        self.update_session(session_id, user_id, &json!({ "speed_kmh": speed_kmh }))
            .await
    }

    async fn end_session(
        &self,
        session_id: &str,
        user_id: &str,
        fields: &serde_json::Map<String, serde_json::Value>,
    ) -> RemoteResult<()> {
        self.update_session(
            session_id,
            user_id,
            &serde_json::Value::Object(fields.clone()),
        )
        .await
    }

    async fn delete_session(&self, session_id: &str, user_id: &str) -> RemoteResult<()> {
        let url = format!(
            "{}?{}",
            self.table_url(),
            row_filter(session_id, user_id)
        );
        let response = self
            .request(reqwest::Method::DELETE, &url)
            .header("Prefer", "return=representation")
            .send()
            .await?;

        let rows = read_row_array(response).await?;
        if rows.is_empty() {
            return Err(RemoteError::SessionNotFound(session_id.to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct SessionRow {
    id: String,
}

/// Read a representation response, mapping non-success statuses to API errors
async fn read_row_array(response: reqwest::Response) -> RemoteResult<Vec<SessionRow>> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(RemoteError::Api(parse_api_error(status, &body)));
    }

    response
        .json::<Vec<SessionRow>>()
        .await
        .map_err(|error| RemoteError::InvalidPayload(error.to_string()))
}

fn row_filter(session_id: &str, user_id: &str) -> String {
    format!(
        "id=eq.{}&user_id=eq.{}",
        urlencoding::encode(session_id),
        urlencoding::encode(user_id)
    )
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", compact_text(trimmed), status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_api_error_prefers_message_field() {
        let body = r#"{"message": "new row violates row-level security", "code": "42501"}"#;
        let parsed = parse_api_error(StatusCode::FORBIDDEN, body);
        assert_eq!(parsed, "new row violates row-level security (403)");
    }

    #[test]
    fn parse_api_error_falls_back_to_error_field() {
        let body = r#"{"error": "invalid token"}"#;
        let parsed = parse_api_error(StatusCode::UNAUTHORIZED, body);
        assert_eq!(parsed, "invalid token (401)");
    }

    #[test]
    fn parse_api_error_handles_plain_bodies() {
        assert_eq!(
            parse_api_error(StatusCode::BAD_GATEWAY, ""),
            "HTTP 502"
        );
        assert_eq!(
            parse_api_error(StatusCode::BAD_GATEWAY, "upstream unreachable"),
            "upstream unreachable (502)"
        );
    }

    #[test]
    fn row_filter_encodes_values() {
        assert_eq!(
            row_filter("srv-42", "user-1"),
            "id=eq.srv-42&user_id=eq.user-1"
        );
        assert_eq!(
            row_filter("a b", "x&y"),
            "id=eq.a%20b&user_id=eq.x%26y"
        );
    }

    #[test]
    fn http_remote_builds_from_config() {
        let config = RemoteConfig::new("https://api.example.com/rest/v1", "key", "token").unwrap();
        let remote = HttpSessionRemote::new(config).unwrap();
        assert_eq!(
            remote.table_url(),
            "https://api.example.com/rest/v1/walk_sessions"
        );
    }
}
