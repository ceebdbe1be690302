//! Integration tests for cross-provider activity sync

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use runsync::integrations::{
    AccessToken, ActivityFile, FileMetadata, IntegrationError, NewActivity, Provider,
    ProviderMetadata, TokenResponse, UploadDetails,
};
use runsync::models::ProviderName;
use runsync::repositories::UserIntegrationRepository;
use runsync::sync::ActivitySyncer;
use runsync::token_guard::IntegrationSession;
use serde_json::{Value, json};
use url::Url;
use uuid::Uuid;

#[path = "test_utils/mod.rs"]
mod test_utils;

type Upload = (ActivityFile, Option<FileMetadata>, String);

/// In-memory provider double recording the calls made against it.
struct RecordingProvider {
    name: ProviderName,
    file: Option<ActivityFile>,
    upload_response: Value,
    file_requests: Mutex<Vec<String>>,
    uploads: Mutex<Vec<Upload>>,
}

impl RecordingProvider {
    fn source(name: ProviderName, file: ActivityFile) -> Arc<Self> {
        Arc::new(Self {
            name,
            file: Some(file),
            upload_response: Value::Null,
            file_requests: Mutex::default(),
            uploads: Mutex::default(),
        })
    }

    fn target(name: ProviderName, upload_response: Value) -> Arc<Self> {
        Arc::new(Self {
            name,
            file: None,
            upload_response,
            file_requests: Mutex::default(),
            uploads: Mutex::default(),
        })
    }
}

#[async_trait]
impl Provider for RecordingProvider {
    fn name(&self) -> ProviderName {
        self.name
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: self.name,
            display_name: self.name.to_string(),
            scopes: Vec::new(),
            supports_upload: true,
            supports_push: false,
        }
    }

    fn authorization_url(&self, _state_token: &str) -> Result<Url, IntegrationError> {
        Ok(Url::parse("https://provider.example/authorize").unwrap())
    }

    async fn exchange_code_for_token(
        &self,
        _code: &str,
        _state_token: &str,
    ) -> Result<TokenResponse, IntegrationError> {
        unreachable!("sync never exchanges codes")
    }

    async fn exchange_refresh_token_for_token(
        &self,
        _refresh_token: &str,
    ) -> Result<TokenResponse, IntegrationError> {
        TokenResponse::from_json(
            self.name,
            json!({"access_token": "refreshed", "refresh_token": "r2", "expires_in": 3600}),
        )
    }

    async fn list_activities(
        &self,
        _token: &AccessToken,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>, IntegrationError> {
        Ok(Vec::new())
    }

    async fn get_activity_details(
        &self,
        _token: &AccessToken,
        _activity_ref: &str,
    ) -> Result<Value, IntegrationError> {
        Ok(Value::Null)
    }

    async fn get_activity_file(
        &self,
        _token: &AccessToken,
        activity_ref: &str,
    ) -> Result<ActivityFile, IntegrationError> {
        self.file_requests
            .lock()
            .unwrap()
            .push(activity_ref.to_string());
        self.file
            .clone()
            .ok_or_else(|| IntegrationError::upstream(self.name, 404, "Record Not Found"))
    }

    async fn upload_activity(
        &self,
        token: &AccessToken,
        file: &ActivityFile,
        file_metadata: Option<&FileMetadata>,
        _details: Option<&UploadDetails>,
    ) -> Result<Value, IntegrationError> {
        self.uploads.lock().unwrap().push((
            file.clone(),
            file_metadata.cloned(),
            token.secret().to_string(),
        ));
        Ok(self.upload_response.clone())
    }

    async fn push_activity(
        &self,
        _token: &AccessToken,
        _activity: &NewActivity,
    ) -> Result<Value, IntegrationError> {
        Err(IntegrationError::NotSupported {
            provider: self.name,
            capability: "activity push",
        })
    }
}

async fn session_for(
    repo: &UserIntegrationRepository,
    provider: Arc<RecordingProvider>,
    user_id: Uuid,
    access_token: &str,
) -> IntegrationSession {
    test_utils::insert_fresh_connection(repo, user_id, provider.name, access_token)
        .await
        .unwrap();
    IntegrationSession::for_user(provider, repo.clone(), user_id)
        .await
        .unwrap()
}

fn tcx_file() -> ActivityFile {
    ActivityFile {
        content: b"<tcx/>".to_vec(),
        content_type: "application/xml".to_string(),
    }
}

#[tokio::test]
async fn sync_uploads_source_file_to_target() {
    let db = test_utils::setup_test_db_arc().await.unwrap();
    let repo = UserIntegrationRepository::new(db);
    let user_id = Uuid::new_v4();

    let source = RecordingProvider::source(ProviderName::Fitbit, tcx_file());
    let upload_response = json!({"id": 987, "status": "Your activity is still being processed."});
    let target = RecordingProvider::target(ProviderName::Strava, upload_response.clone());

    let source_session = session_for(&repo, Arc::clone(&source), user_id, "source-token").await;
    let target_session = session_for(&repo, Arc::clone(&target), user_id, "target-token").await;
    let source_id = source_session.connection().id;
    let target_id = target_session.connection().id;

    let response = ActivitySyncer::new(source_session, target_session)
        .sync("123")
        .await
        .unwrap();

    assert_eq!(response, upload_response);
    assert_eq!(*source.file_requests.lock().unwrap(), vec!["123".to_string()]);

    {
        let uploads = target.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        let (file, metadata, token) = &uploads[0];
        assert_eq!(file, &tcx_file());
        assert_eq!(
            metadata.as_ref(),
            Some(&FileMetadata {
                content_type: "application/xml".to_string()
            })
        );
        assert_eq!(token, "target-token");
    }

    for id in [source_id, target_id] {
        let record = repo.find_by_id(id).await.unwrap().unwrap();
        assert!(record.last_synced_at.is_some());
    }
}

#[tokio::test]
async fn source_failure_aborts_before_upload() {
    let db = test_utils::setup_test_db_arc().await.unwrap();
    let repo = UserIntegrationRepository::new(db);
    let user_id = Uuid::new_v4();

    let source = RecordingProvider::target(ProviderName::Fitbit, Value::Null);
    let target = RecordingProvider::target(ProviderName::Strava, json!({"id": 1}));

    let source_session = session_for(&repo, Arc::clone(&source), user_id, "source-token").await;
    let target_session = session_for(&repo, Arc::clone(&target), user_id, "target-token").await;
    let source_id = source_session.connection().id;

    let err = ActivitySyncer::new(source_session, target_session)
        .sync("missing")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        IntegrationError::UpstreamExchange { status: 404, .. }
    ));
    assert!(target.uploads.lock().unwrap().is_empty());

    let record = repo.find_by_id(source_id).await.unwrap().unwrap();
    assert!(record.last_synced_at.is_none());
}
