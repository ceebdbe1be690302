//! Integration tests for the OAuth flow controller
//!
//! Covers authorization URL issuance, the happy-path callback, replay and
//! malformed callbacks, and failed code exchanges, against wiremock token
//! endpoints and an in-memory database.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use runsync::integrations::{
    AccessToken, ActivityFile, FileMetadata, IntegrationError, NewActivity, Provider,
    ProviderMetadata, TokenResponse, UploadDetails, pkce,
};
use runsync::models::{ConnectionStatus, ProviderName};
use runsync::oauth_flow::{CallbackParams, OAuthFlow};
use runsync::repositories::UserIntegrationRepository;
use sea_orm::{ConnectionTrait, DatabaseConnection};
use serde_json::{Value, json};
use url::Url;
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[path = "test_utils/mod.rs"]
mod test_utils;

struct Fixture {
    flow: OAuthFlow,
    repo: UserIntegrationRepository,
    db: Arc<DatabaseConnection>,
    server: MockServer,
}

async fn fixture() -> Fixture {
    let db = test_utils::setup_test_db_arc().await.unwrap();
    let repo = UserIntegrationRepository::new(Arc::clone(&db));
    Fixture {
        flow: OAuthFlow::new(repo.clone()),
        repo,
        db,
        server: MockServer::start().await,
    }
}

fn state_from(url: &Url) -> String {
    url.query_pairs()
        .find(|(key, _)| key == "state")
        .map(|(_, value)| value.into_owned())
        .expect("authorization URL carries a state")
}

fn callback(code: Option<&str>, state: Option<&str>) -> CallbackParams {
    CallbackParams {
        code: code.map(str::to_string),
        state: state.map(str::to_string),
        error: None,
    }
}

#[tokio::test]
async fn strava_callback_completes_connection() {
    let fx = fixture().await;
    let provider = test_utils::strava_provider(&fx.server.uri());
    let user_id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(query_param("grant_type", "authorization_code"))
        .and(query_param("code", "good-code"))
        .and(query_param("client_id", "strava-client"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "a1",
            "refresh_token": "r1",
            "expires_in": 3600,
            "expires_at": 1_700_000_000,
            "athlete_id": "X"
        })))
        .expect(1)
        .mount(&fx.server)
        .await;

    let url = fx
        .flow
        .authorization_url(provider.as_ref(), user_id)
        .await
        .unwrap();
    let state = state_from(&url);
    assert_eq!(state.len(), 43);

    let before = Utc::now();
    let record = fx
        .flow
        .handle_callback(provider.as_ref(), &callback(Some("good-code"), Some(&state)))
        .await
        .unwrap();

    assert_eq!(record.user_id, user_id);
    assert_eq!(record.status, ConnectionStatus::Completed);
    assert_eq!(record.access_token.as_deref(), Some("a1"));
    assert_eq!(record.refresh_token.as_deref(), Some("r1"));
    assert_eq!(
        serde_json::to_value(&record.metadata).unwrap(),
        json!({"athlete_id": "X"})
    );

    let expires_at = record.expires_at.unwrap();
    let drift = (expires_at.timestamp() - (before.timestamp() + 3600)).abs();
    assert!(drift <= 5, "expires_at should be about now + 3600s");
}

#[tokio::test]
async fn consumed_state_cannot_be_replayed() {
    let fx = fixture().await;
    let provider = test_utils::strava_provider(&fx.server.uri());

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "a1",
            "refresh_token": "r1",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&fx.server)
        .await;

    let url = fx
        .flow
        .authorization_url(provider.as_ref(), Uuid::new_v4())
        .await
        .unwrap();
    let state = state_from(&url);
    let params = callback(Some("code"), Some(&state));

    fx.flow
        .handle_callback(provider.as_ref(), &params)
        .await
        .unwrap();

    let replay = fx.flow.handle_callback(provider.as_ref(), &params).await;
    assert!(matches!(replay, Err(IntegrationError::RecordNotFound)));
}

#[tokio::test]
async fn callback_without_state_touches_nothing() {
    let fx = fixture().await;
    let provider = test_utils::strava_provider(&fx.server.uri());

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&fx.server)
        .await;

    let url = fx
        .flow
        .authorization_url(provider.as_ref(), Uuid::new_v4())
        .await
        .unwrap();
    let state = state_from(&url);
    let pending = fx
        .repo
        .find_pending_by_state(ProviderName::Strava, &state)
        .await
        .unwrap()
        .unwrap();

    let missing_state = fx
        .flow
        .handle_callback(provider.as_ref(), &callback(Some("code"), None))
        .await;
    assert!(matches!(
        missing_state,
        Err(IntegrationError::MissingParameter("state"))
    ));

    let missing_code = fx
        .flow
        .handle_callback(provider.as_ref(), &callback(None, Some(&state)))
        .await;
    assert!(matches!(
        missing_code,
        Err(IntegrationError::MissingParameter("code"))
    ));

    let unchanged = fx.repo.find_by_id(pending.id).await.unwrap().unwrap();
    assert_eq!(unchanged, pending);
}

#[tokio::test]
async fn unknown_state_is_rejected() {
    let fx = fixture().await;
    let provider = test_utils::strava_provider(&fx.server.uri());

    let result = fx
        .flow
        .handle_callback(
            provider.as_ref(),
            &callback(Some("code"), Some("forged-state")),
        )
        .await;

    assert!(matches!(result, Err(IntegrationError::RecordNotFound)));
}

#[tokio::test]
async fn state_is_scoped_to_its_provider() {
    let fx = fixture().await;
    let strava = test_utils::strava_provider(&fx.server.uri());
    let fitbit = test_utils::fitbit_provider(&fx.server.uri());

    let url = fx
        .flow
        .authorization_url(strava.as_ref(), Uuid::new_v4())
        .await
        .unwrap();
    let state = state_from(&url);

    let result = fx
        .flow
        .handle_callback(fitbit.as_ref(), &callback(Some("code"), Some(&state)))
        .await;

    assert!(matches!(result, Err(IntegrationError::RecordNotFound)));
}

#[tokio::test]
async fn failed_exchange_marks_record_failed() {
    let fx = fixture().await;
    let provider = test_utils::strava_provider(&fx.server.uri());

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"message": "Bad Request"})),
        )
        .expect(1)
        .mount(&fx.server)
        .await;

    let url = fx
        .flow
        .authorization_url(provider.as_ref(), Uuid::new_v4())
        .await
        .unwrap();
    let state = state_from(&url);
    let pending = fx
        .repo
        .find_pending_by_state(ProviderName::Strava, &state)
        .await
        .unwrap()
        .unwrap();
    let params = callback(Some("bad-code"), Some(&state));

    let err = fx
        .flow
        .handle_callback(provider.as_ref(), &params)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        IntegrationError::UpstreamExchange { status: 400, .. }
    ));

    let failed = fx.repo.find_by_id(pending.id).await.unwrap().unwrap();
    assert_eq!(failed.status, ConnectionStatus::Failed);
    assert!(failed.access_token.is_none());
    assert!(failed.metadata.error.as_deref().unwrap().contains("400"));

    // A failed attempt is terminal; its state cannot be reused.
    let retry = fx.flow.handle_callback(provider.as_ref(), &params).await;
    assert!(matches!(retry, Err(IntegrationError::RecordNotFound)));
}

#[tokio::test]
async fn fitbit_exchange_uses_state_as_pkce_verifier() {
    let fx = fixture().await;
    let provider = test_utils::fitbit_provider(&fx.server.uri());

    let url = fx
        .flow
        .authorization_url(provider.as_ref(), Uuid::new_v4())
        .await
        .unwrap();
    let state = state_from(&url);

    let challenge = url
        .query_pairs()
        .find(|(key, _)| key == "code_challenge")
        .map(|(_, value)| value.into_owned())
        .unwrap();
    assert_eq!(challenge, pkce::code_challenge(&state));
    assert!(url.query_pairs().any(|(k, v)| k == "code_challenge_method" && v == "S256"));

    let basic = format!("Basic {}", STANDARD.encode("fitbit-client:fitbit-secret"));
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(header("authorization", basic.as_str()))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains(format!("code_verifier={state}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fa1",
            "refresh_token": "fr1",
            "expires_in": 28800,
            "token_type": "Bearer",
            "user_id": "ABC123",
            "scope": "activity profile"
        })))
        .expect(1)
        .mount(&fx.server)
        .await;

    let record = fx
        .flow
        .handle_callback(provider.as_ref(), &callback(Some("fitbit-code"), Some(&state)))
        .await
        .unwrap();

    assert_eq!(record.provider_name, provider.name());
    assert_eq!(record.access_token.as_deref(), Some("fa1"));
    assert_eq!(record.metadata.user_id.as_deref(), Some("ABC123"));
    assert_eq!(record.metadata.token_type.as_deref(), Some("Bearer"));
    assert!(record.metadata.extra.is_empty());
}

#[tokio::test]
async fn each_authorization_url_gets_a_fresh_state() {
    let fx = fixture().await;
    let provider = test_utils::strava_provider(&fx.server.uri());
    let user_id = Uuid::new_v4();

    let first = state_from(
        &fx.flow
            .authorization_url(provider.as_ref(), user_id)
            .await
            .unwrap(),
    );
    let second = state_from(
        &fx.flow
            .authorization_url(provider.as_ref(), user_id)
            .await
            .unwrap(),
    );

    assert_ne!(first, second);
    for state in [&first, &second] {
        let record = fx
            .repo
            .find_pending_by_state(ProviderName::Strava, state)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.user_id, user_id);
        assert_eq!(record.status, ConnectionStatus::Pending);
    }
}

#[tokio::test]
async fn out_of_range_expiry_marks_record_failed() {
    let fx = fixture().await;
    let provider = test_utils::strava_provider(&fx.server.uri());

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "a1",
            "refresh_token": "r1",
            "expires_in": i64::MAX
        })))
        .expect(1)
        .mount(&fx.server)
        .await;

    let url = fx
        .flow
        .authorization_url(provider.as_ref(), Uuid::new_v4())
        .await
        .unwrap();
    let state = state_from(&url);
    let pending = fx
        .repo
        .find_pending_by_state(ProviderName::Strava, &state)
        .await
        .unwrap()
        .unwrap();

    let err = fx
        .flow
        .handle_callback(provider.as_ref(), &callback(Some("code"), Some(&state)))
        .await
        .unwrap_err();
    assert!(matches!(err, IntegrationError::MalformedResponse { .. }));

    let failed = fx.repo.find_by_id(pending.id).await.unwrap().unwrap();
    assert_eq!(failed.status, ConnectionStatus::Failed);
    assert!(failed.access_token.is_none());
    assert!(failed.metadata.error.as_deref().unwrap().contains("expires_in"));
}

/// Provider whose code exchange loses the database before failing upstream.
struct StorageLosingProvider {
    db: Arc<DatabaseConnection>,
}

impl StorageLosingProvider {
    fn unused<T>(&self) -> Result<T, IntegrationError> {
        Err(IntegrationError::NotSupported {
            provider: ProviderName::Strava,
            capability: "activities",
        })
    }
}

#[async_trait]
impl Provider for StorageLosingProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Strava
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: ProviderName::Strava,
            display_name: "Strava".into(),
            scopes: Vec::new(),
            supports_upload: false,
            supports_push: false,
        }
    }

    fn authorization_url(&self, state_token: &str) -> Result<Url, IntegrationError> {
        Ok(Url::parse(&format!("https://provider.example/authorize?state={state_token}")).unwrap())
    }

    async fn exchange_code_for_token(
        &self,
        _code: &str,
        _state_token: &str,
    ) -> Result<TokenResponse, IntegrationError> {
        self.db
            .execute_unprepared("DROP TABLE user_integrations")
            .await
            .unwrap();
        Err(IntegrationError::upstream(ProviderName::Strava, 503, "unavailable"))
    }

    async fn exchange_refresh_token_for_token(
        &self,
        _refresh_token: &str,
    ) -> Result<TokenResponse, IntegrationError> {
        self.unused()
    }

    async fn list_activities(
        &self,
        _token: &AccessToken,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>, IntegrationError> {
        self.unused()
    }

    async fn get_activity_details(
        &self,
        _token: &AccessToken,
        _activity_ref: &str,
    ) -> Result<Value, IntegrationError> {
        self.unused()
    }

    async fn get_activity_file(
        &self,
        _token: &AccessToken,
        _activity_ref: &str,
    ) -> Result<ActivityFile, IntegrationError> {
        self.unused()
    }

    async fn upload_activity(
        &self,
        _token: &AccessToken,
        _file: &ActivityFile,
        _file_metadata: Option<&FileMetadata>,
        _details: Option<&UploadDetails>,
    ) -> Result<Value, IntegrationError> {
        self.unused()
    }

    async fn push_activity(
        &self,
        _token: &AccessToken,
        _activity: &NewActivity,
    ) -> Result<Value, IntegrationError> {
        self.unused()
    }
}

#[tokio::test]
async fn exchange_error_survives_failed_bookkeeping() {
    let fx = fixture().await;
    let provider = StorageLosingProvider {
        db: Arc::clone(&fx.db),
    };

    let url = fx
        .flow
        .authorization_url(&provider, Uuid::new_v4())
        .await
        .unwrap();
    let state = state_from(&url);

    let err = fx
        .flow
        .handle_callback(&provider, &callback(Some("code"), Some(&state)))
        .await
        .unwrap_err();

    assert!(
        matches!(err, IntegrationError::UpstreamExchange { status: 503, .. }),
        "{err:?}"
    );
}
