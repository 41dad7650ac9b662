//! Voice-biometrics backend client.
//!
//! The speaker service is consumed through the [`SpeakerGateway`] trait; the
//! HTTP implementation speaks multipart/JSON to the REST endpoints and
//! surfaces the server's `detail` text on failures. Bearer tokens come from
//! an external auth collaborator; this module never manages their lifecycle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::audio::clip::Clip;

/// Default request timeout for submissions.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport and service errors from the speaker backend.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The service answered with a non-success status.
    #[error("speaker service error (http {status}): {}", .detail.as_deref().unwrap_or("no detail"))]
    Api { status: u16, detail: Option<String> },

    /// The request never produced a usable response.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The configured base URL cannot be used.
    #[error("invalid base url: {0}")]
    BaseUrl(String),
}

impl GatewayError {
    /// Server-provided failure text, when the response carried one.
    pub fn detail(&self) -> Option<&str> {
        match self {
            GatewayError::Api { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}

/// Outcome of an identification request.
#[derive(Debug, Clone, PartialEq)]
pub enum IdentifyOutcome {
    Match {
        speaker_id: i64,
        speaker_alias: String,
        confidence: f64,
    },
    NoMatch,
}

/// One enrolled speaker, as listed by the service.
#[derive(Debug, Clone, Deserialize)]
pub struct Speaker {
    pub id: i64,
    pub alias: String,
    #[serde(default)]
    pub sample_count: Option<u32>,
}

/// Service availability, backing the banner in the console.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceStatus {
    pub available: bool,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Bearer-token collaborator; the gateway attaches whatever this yields.
pub trait TokenProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// Fixed token handed in at construction, or none for open deployments.
pub struct StaticToken(pub Option<String>);

impl TokenProvider for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Reads the token from an environment variable on every call.
pub struct EnvToken(pub &'static str);

impl TokenProvider for EnvToken {
    fn bearer_token(&self) -> Option<String> {
        std::env::var(self.0).ok().filter(|t| !t.is_empty())
    }
}

/// The speaker service, as the workflow sees it.
#[async_trait]
pub trait SpeakerGateway: Send + Sync {
    /// Attach a voice sample to a known speaker.
    async fn enroll(&self, speaker_id: i64, clip: &Clip) -> Result<String, GatewayError>;

    /// Match an unknown sample against all enrolled speakers.
    async fn identify(&self, clip: &Clip) -> Result<IdentifyOutcome, GatewayError>;

    /// Move all samples from `source` to `target` and retire `source`.
    async fn merge(
        &self,
        source_speaker_id: i64,
        target_speaker_id: i64,
    ) -> Result<String, GatewayError>;

    /// Collaborator read: all known speakers.
    async fn list_speakers(&self) -> Result<Vec<Speaker>, GatewayError>;

    /// Collaborator read: service availability.
    async fn service_status(&self) -> Result<ServiceStatus, GatewayError>;
}

// Wire types

#[derive(Deserialize)]
struct MessageBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct IdentifyBody {
    is_identified: bool,
    #[serde(default)]
    speaker_id: Option<i64>,
    #[serde(default)]
    speaker_alias: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

impl IdentifyBody {
    fn into_outcome(self) -> IdentifyOutcome {
        match (self.is_identified, self.speaker_id) {
            (true, Some(speaker_id)) => IdentifyOutcome::Match {
                speaker_id,
                speaker_alias: self.speaker_alias.unwrap_or_default(),
                confidence: self.confidence.unwrap_or(0.0),
            },
            // An affirmative flag without a speaker id reads as no match.
            _ => IdentifyOutcome::NoMatch,
        }
    }
}

#[derive(Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Serialize)]
struct MergeBody {
    source_speaker_id: i64,
    target_speaker_id: i64,
}

/// HTTP implementation of the speaker gateway.
pub struct HttpSpeakerGateway {
    http: reqwest::Client,
    base: Url,
    token: Arc<dyn TokenProvider>,
}

impl HttpSpeakerGateway {
    pub fn builder(base_url: impl Into<String>) -> HttpSpeakerGatewayBuilder {
        HttpSpeakerGatewayBuilder {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            token: None,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        self.base
            .join(path)
            .map_err(|e| GatewayError::BaseUrl(e.to_string()))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token.bearer_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn audio_part(clip: &Clip) -> Result<reqwest::multipart::Part, GatewayError> {
        let part = reqwest::multipart::Part::bytes(clip.as_bytes().to_vec())
            .file_name("sample.pcm")
            .mime_str(clip.media_type())?;
        Ok(part)
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, GatewayError> {
        let status = response.status();
        if status.is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let body: ErrorBody = response.json().await.unwrap_or_default();
            Err(GatewayError::Api {
                status: status.as_u16(),
                detail: body.detail,
            })
        }
    }
}

#[async_trait]
impl SpeakerGateway for HttpSpeakerGateway {
    async fn enroll(&self, speaker_id: i64, clip: &Clip) -> Result<String, GatewayError> {
        let url = self.endpoint(&format!("speakers/{speaker_id}/enroll"))?;
        let form = reqwest::multipart::Form::new().part("audio", Self::audio_part(clip)?);
        log::info!(
            "enrolling sample for speaker {} ({} bytes)",
            speaker_id,
            clip.len()
        );

        let response = self.authorize(self.http.post(url)).multipart(form).send().await?;
        Ok(Self::read::<MessageBody>(response).await?.message)
    }

    async fn identify(&self, clip: &Clip) -> Result<IdentifyOutcome, GatewayError> {
        let url = self.endpoint("speakers/identify")?;
        let form = reqwest::multipart::Form::new().part("audio", Self::audio_part(clip)?);
        log::info!("identifying sample ({} bytes)", clip.len());

        let response = self.authorize(self.http.post(url)).multipart(form).send().await?;
        Ok(Self::read::<IdentifyBody>(response).await?.into_outcome())
    }

    async fn merge(
        &self,
        source_speaker_id: i64,
        target_speaker_id: i64,
    ) -> Result<String, GatewayError> {
        let url = self.endpoint("speakers/merge")?;
        log::info!(
            "merging speaker {} into {}",
            source_speaker_id,
            target_speaker_id
        );

        let response = self
            .authorize(self.http.post(url))
            .json(&MergeBody {
                source_speaker_id,
                target_speaker_id,
            })
            .send()
            .await?;
        Ok(Self::read::<MessageBody>(response).await?.message)
    }

    async fn list_speakers(&self) -> Result<Vec<Speaker>, GatewayError> {
        let url = self.endpoint("speakers")?;
        let response = self.authorize(self.http.get(url)).send().await?;
        Self::read(response).await
    }

    async fn service_status(&self) -> Result<ServiceStatus, GatewayError> {
        let url = self.endpoint("speakers/status")?;
        let response = self.authorize(self.http.get(url)).send().await?;
        Self::read(response).await
    }
}

/// Builder for the HTTP gateway.
pub struct HttpSpeakerGatewayBuilder {
    base_url: String,
    timeout: Duration,
    token: Option<Arc<dyn TokenProvider>>,
}

impl HttpSpeakerGatewayBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn token(mut self, token: Arc<dyn TokenProvider>) -> Self {
        self.token = Some(token);
        self
    }

    pub fn build(self) -> Result<HttpSpeakerGateway, GatewayError> {
        // A trailing slash keeps Url::join from eating the last path segment.
        let mut base_url = self.base_url;
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        let base = Url::parse(&base_url).map_err(|e| GatewayError::BaseUrl(e.to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()?;

        Ok(HttpSpeakerGateway {
            http,
            base,
            token: self.token.unwrap_or_else(|| Arc::new(StaticToken(None))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify_body_maps_match() {
        let body: IdentifyBody = serde_json::from_str(
            r#"{"is_identified": true, "speaker_id": 7, "speaker_alias": "max", "confidence": 0.93}"#,
        )
        .unwrap();
        assert_eq!(
            body.into_outcome(),
            IdentifyOutcome::Match {
                speaker_id: 7,
                speaker_alias: "max".to_string(),
                confidence: 0.93,
            }
        );
    }

    #[test]
    fn test_identify_body_maps_no_match() {
        let body: IdentifyBody = serde_json::from_str(r#"{"is_identified": false}"#).unwrap();
        assert_eq!(body.into_outcome(), IdentifyOutcome::NoMatch);
    }

    #[test]
    fn test_identified_without_speaker_id_is_no_match() {
        let body: IdentifyBody = serde_json::from_str(r#"{"is_identified": true}"#).unwrap();
        assert_eq!(body.into_outcome(), IdentifyOutcome::NoMatch);
    }

    #[test]
    fn test_error_body_detail_is_optional() {
        let body: ErrorBody = serde_json::from_str(r#"{"detail": "bad audio"}"#).unwrap();
        assert_eq!(body.detail.as_deref(), Some("bad audio"));

        let body: ErrorBody = serde_json::from_str("{}").unwrap();
        assert!(body.detail.is_none());
    }

    #[test]
    fn test_builder_normalizes_base_url() {
        let gateway = HttpSpeakerGateway::builder("http://localhost:8080/api/v1")
            .build()
            .unwrap();
        let url = gateway.endpoint("speakers/identify").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/api/v1/speakers/identify");
    }

    #[test]
    fn test_builder_rejects_bad_base_url() {
        assert!(HttpSpeakerGateway::builder("not a url").build().is_err());
    }

    #[test]
    fn test_env_token_requires_non_empty_value() {
        let provider = EnvToken("VOICEBOOTH_TEST_TOKEN_UNSET");
        assert!(provider.bearer_token().is_none());
    }
}
