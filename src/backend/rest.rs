//! Hosted backend over the PostgREST/GoTrue HTTP interface

use super::*;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct RestConfig {
    pub base_url: String,
    pub anon_key: String,
    pub timeout: Duration,
}

impl RestConfig {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            timeout: Duration::from_secs(15),
        }
    }
}

pub struct RestBackend {
    config: RestConfig,
    client: reqwest::Client,
    session: RwLock<Option<AuthSession>>,
}

/// GoTrue answer to signup and token refresh
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    user: TokenUser,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: PlayerId,
}

impl From<TokenResponse> for AuthSession {
    fn from(response: TokenResponse) -> Self {
        Self {
            user_id: response.user.id,
            access_token: response.access_token,
            refresh_token: response.refresh_token,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PostgrestError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: String,
}

/// Map an HTTP failure to a backend error. Postgres codes win over status.
pub(crate) fn map_error(status: u16, code: Option<&str>, message: &str) -> BackendError {
    match (code, status) {
        (Some("23505"), _) | (_, 409) => BackendError::UniqueViolation(message.to_string()),
        (Some("PGRST116"), _) | (_, 404) => BackendError::NotFound(message.to_string()),
        (_, 401) => BackendError::Unauthorized,
        (code, status) => BackendError::Rejected {
            code: code.map_or_else(|| status.to_string(), str::to_string),
            message: message.to_string(),
        },
    }
}

/// Total from a `Content-Range` header such as `0-0/12` or `*/0`
pub(crate) fn parse_content_range_total(header: &str) -> Option<u64> {
    header.rsplit_once('/')?.1.trim().parse().ok()
}

/// Procedures may answer with a row, a one-row array or null
fn first_row<T: DeserializeOwned>(value: serde_json::Value) -> BackendResult<Option<T>> {
    let row = match value {
        serde_json::Value::Array(rows) => rows.into_iter().next(),
        serde_json::Value::Null => None,
        other => Some(other),
    };
    row.map(|row| serde_json::from_value(row).map_err(|e| BackendError::Decode(e.to_string())))
        .transpose()
}

fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

impl RestBackend {
    pub fn new(config: RestConfig) -> BackendResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        Ok(Self {
            config,
            client,
            session: RwLock::new(None),
        })
    }

    async fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let token = self
            .session
            .read()
            .await
            .as_ref()
            .map_or_else(|| self.config.anon_key.clone(), |s| s.access_token.clone());

        self.client
            .request(method, format!("{}/{}", self.config.base_url, path))
            .header("apikey", &self.config.anon_key)
            .bearer_auth(token)
    }

    async fn table(&self, method: Method, table: &str) -> RequestBuilder {
        self.request(method, &format!("rest/v1/{}", table)).await
    }

    async fn rpc(&self, name: &str, args: serde_json::Value) -> BackendResult<serde_json::Value> {
        let request = self
            .request(Method::POST, &format!("rest/v1/rpc/{}", name))
            .await
            .json(&args);
        let response = Self::execute(request).await?;
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn execute(request: RequestBuilder) -> BackendResult<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let error: PostgrestError = serde_json::from_str(&body).unwrap_or_default();
        let message = if error.message.is_empty() {
            body
        } else {
            error.message
        };
        tracing::debug!("Backend request failed with {}: {}", status, message);
        Err(map_error(status.as_u16(), error.code.as_deref(), &message))
    }

    async fn fetch<T: DeserializeOwned>(request: RequestBuilder) -> BackendResult<T> {
        Self::execute(request)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    /// Insert one row and return its stored representation
    async fn insert_returning<B, T>(&self, table: &str, body: &B) -> BackendResult<T>
    where
        B: serde::Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self
            .table(Method::POST, table)
            .await
            .header("Prefer", "return=representation")
            .json(body);
        let rows: Vec<T> = Self::fetch(request).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::Decode(format!("empty insert result for {}", table)))
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn sign_in_anonymously(&self) -> BackendResult<AuthSession> {
        if let Some(session) = self.session.read().await.clone() {
            return Ok(session);
        }

        let request = self
            .request(Method::POST, "auth/v1/signup")
            .await
            .json(&serde_json::json!({}));
        let response: TokenResponse = Self::fetch(request).await?;
        let session = AuthSession::from(response);

        tracing::info!("Signed in anonymously as {}", session.user_id);
        *self.session.write().await = Some(session.clone());
        Ok(session)
    }

    /// Trade the stored refresh token for a fresh access token. Sessions
    /// without one are used as stored until the store rejects them.
    async fn restore_session(&self, stored: &AuthSession) -> BackendResult<AuthSession> {
        let session = match &stored.refresh_token {
            Some(refresh_token) => {
                let request = self
                    .request(Method::POST, "auth/v1/token")
                    .await
                    .query(&[("grant_type", "refresh_token")])
                    .json(&serde_json::json!({ "refresh_token": refresh_token }));
                let response: TokenResponse = Self::fetch(request).await.map_err(|e| match e {
                    BackendError::Rejected { .. } | BackendError::NotFound(_) => {
                        BackendError::Unauthorized
                    }
                    other => other,
                })?;
                AuthSession::from(response)
            }
            None => stored.clone(),
        };

        if session.user_id != stored.user_id {
            return Err(BackendError::Unauthorized);
        }
        tracing::info!("Resumed session for {}", session.user_id);
        *self.session.write().await = Some(session.clone());
        Ok(session)
    }

    async fn insert_room(&self, room: NewRoom) -> BackendResult<Room> {
        self.insert_returning("rooms", &room).await
    }

    async fn get_room(&self, room_id: &str) -> BackendResult<Room> {
        let request = self
            .table(Method::GET, "rooms")
            .await
            .query(&[("id", eq(room_id)), ("select", "*".to_string())]);
        let rows: Vec<Room> = Self::fetch(request).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::NotFound(format!("room {}", room_id)))
    }

    async fn update_room(&self, room_id: &str, patch: RoomPatch) -> BackendResult<()> {
        let request = self
            .table(Method::PATCH, "rooms")
            .await
            .query(&[("id", eq(room_id))])
            .json(&patch);
        Self::execute(request).await?;
        Ok(())
    }

    async fn lookup_room_by_code(&self, code: &str) -> BackendResult<serde_json::Value> {
        self.rpc("get_room_by_code", serde_json::json!({ "p_code": code }))
            .await
    }

    async fn find_room_by_code(&self, code: &str) -> BackendResult<Option<Room>> {
        let request = self
            .table(Method::GET, "rooms")
            .await
            .query(&[("code", eq(code)), ("limit", "1".to_string())]);
        let rows: Vec<Room> = Self::fetch(request).await?;
        Ok(rows.into_iter().next())
    }

    async fn list_members(&self, room_id: &str) -> BackendResult<Vec<RoomPlayer>> {
        let request = self
            .table(Method::GET, "room_players")
            .await
            .query(&[("room_id", eq(room_id)), ("order", "joined_at.asc".to_string())]);
        Self::fetch(request).await
    }

    async fn get_member(
        &self,
        room_id: &str,
        player_id: &str,
    ) -> BackendResult<Option<RoomPlayer>> {
        let request = self
            .table(Method::GET, "room_players")
            .await
            .query(&[("room_id", eq(room_id)), ("player_id", eq(player_id))]);
        let rows: Vec<RoomPlayer> = Self::fetch(request).await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_member(&self, member: NewMember) -> BackendResult<()> {
        let request = self
            .table(Method::POST, "room_players")
            .await
            .header("Prefer", "return=minimal")
            .json(&member);
        Self::execute(request).await?;
        Ok(())
    }

    async fn update_presence(
        &self,
        room_id: &str,
        player_id: &str,
        active: bool,
        seen_at: DateTime<Utc>,
    ) -> BackendResult<()> {
        let request = self
            .table(Method::PATCH, "room_players")
            .await
            .query(&[("room_id", eq(room_id)), ("player_id", eq(player_id))])
            .json(&serde_json::json!({ "is_active": active, "last_seen_at": seen_at }));
        Self::execute(request).await?;
        Ok(())
    }

    async fn reset_scores(&self, room_id: &str) -> BackendResult<()> {
        let request = self
            .table(Method::PATCH, "room_players")
            .await
            .query(&[("room_id", eq(room_id))])
            .json(&serde_json::json!({ "score": 0 }));
        Self::execute(request).await?;
        Ok(())
    }

    async fn count_rounds(&self, room_id: &str) -> BackendResult<u64> {
        let request = self
            .table(Method::GET, "rounds")
            .await
            .query(&[("room_id", eq(room_id)), ("select", "id".to_string())])
            .header("Prefer", "count=exact")
            .header("Range", "0-0");
        let response = Self::execute(request).await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(0);
        }
        response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| BackendError::Decode("missing Content-Range total".to_string()))
    }

    async fn latest_round(&self, room_id: &str) -> BackendResult<Option<Round>> {
        let request = self.table(Method::GET, "rounds").await.query(&[
            ("room_id", eq(room_id)),
            ("order", "started_at.desc".to_string()),
            ("limit", "1".to_string()),
        ]);
        let rows: Vec<Round> = Self::fetch(request).await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_round(&self, round: NewRound) -> BackendResult<Round> {
        self.insert_returning("rounds", &round).await
    }

    async fn advance_round(
        &self,
        round_id: &str,
        expected: RoundPhase,
        patch: RoundPatch,
    ) -> BackendResult<bool> {
        let request = self
            .table(Method::PATCH, "rounds")
            .await
            .query(&[("id", eq(round_id)), ("phase", eq(expected.as_str()))])
            .header("Prefer", "return=representation")
            .json(&patch);
        let rows: Vec<Round> = Self::fetch(request).await?;
        Ok(!rows.is_empty())
    }

    async fn pick_question(&self) -> BackendResult<Option<Question>> {
        let value = self.rpc("pick_question", serde_json::json!({})).await?;
        first_row(value)
    }

    async fn get_question(&self, question_id: &str) -> BackendResult<Option<Question>> {
        let request = self
            .table(Method::GET, "questions")
            .await
            .query(&[("id", eq(question_id))]);
        let rows: Vec<Question> = Self::fetch(request).await?;
        Ok(rows.into_iter().next())
    }

    async fn insert_answer(&self, answer: NewAnswer) -> BackendResult<Answer> {
        self.insert_returning("answers", &answer).await
    }

    async fn list_answers(&self, round_id: &str) -> BackendResult<Vec<Answer>> {
        let request = self
            .table(Method::GET, "answers")
            .await
            .query(&[("round_id", eq(round_id))]);
        Self::fetch(request).await
    }

    async fn insert_vote(&self, vote: NewVote) -> BackendResult<Vote> {
        self.insert_returning("votes", &vote).await
    }

    async fn list_votes(&self, round_id: &str) -> BackendResult<Vec<Vote>> {
        let request = self
            .table(Method::GET, "votes")
            .await
            .query(&[("round_id", eq(round_id))]);
        Self::fetch(request).await
    }

    async fn finalize_round(&self, round_id: &str) -> BackendResult<()> {
        self.rpc("finalize_round", serde_json::json!({ "p_round_id": round_id }))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_response_into_session() {
        let response: TokenResponse = serde_json::from_value(serde_json::json!({
            "access_token": "jwt",
            "refresh_token": "r1",
            "token_type": "bearer",
            "user": { "id": "u1", "aud": "authenticated" }
        }))
        .unwrap();
        assert_eq!(
            AuthSession::from(response),
            AuthSession {
                user_id: "u1".to_string(),
                access_token: "jwt".to_string(),
                refresh_token: Some("r1".to_string()),
            }
        );
    }

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            map_error(409, Some("23505"), "duplicate key"),
            BackendError::UniqueViolation(_)
        ));
        assert!(matches!(
            map_error(400, Some("23505"), "duplicate key"),
            BackendError::UniqueViolation(_)
        ));
        assert!(matches!(
            map_error(406, Some("PGRST116"), "no rows"),
            BackendError::NotFound(_)
        ));
        assert_eq!(map_error(401, None, "jwt expired"), BackendError::Unauthorized);
        assert_eq!(
            map_error(400, Some("P0001"), "round is not in voting"),
            BackendError::Rejected {
                code: "P0001".to_string(),
                message: "round is not in voting".to_string()
            }
        );
        assert_eq!(
            map_error(500, None, "boom"),
            BackendError::Rejected {
                code: "500".to_string(),
                message: "boom".to_string()
            }
        );
    }

    #[test]
    fn test_content_range_total() {
        assert_eq!(parse_content_range_total("0-0/12"), Some(12));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-0/*"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }

    #[test]
    fn test_first_row_shapes() {
        let q: Option<Question> =
            first_row(serde_json::json!([{ "id": "q1", "text": "Why?" }])).unwrap();
        assert_eq!(q.unwrap().id, "q1");

        let q: Option<Question> =
            first_row(serde_json::json!({ "id": "q2", "text": "How?" })).unwrap();
        assert_eq!(q.unwrap().id, "q2");

        let q: Option<Question> = first_row(serde_json::Value::Null).unwrap();
        assert!(q.is_none());

        let q: Option<Question> = first_row(serde_json::json!([])).unwrap();
        assert!(q.is_none());
    }

    #[test]
    fn test_config_trims_trailing_slash() {
        let config = RestConfig::new("https://example.test/", "anon");
        assert_eq!(config.base_url, "https://example.test");
    }
}
