use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::ApiError;

const DEFAULT_API_BASE: &str = "https://api.x.com";

/// RFC 3986 unreserved characters — everything else gets percent-encoded.
const RFC3986: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'!')
    .add(b'#')
    .add(b'$')
    .add(b'%')
    .add(b'&')
    .add(b'\'')
    .add(b'(')
    .add(b')')
    .add(b'*')
    .add(b'+')
    .add(b',')
    .add(b'/')
    .add(b':')
    .add(b';')
    .add(b'=')
    .add(b'?')
    .add(b'@')
    .add(b'[')
    .add(b']');

type HmacSha1 = Hmac<sha1::Sha1>;

#[derive(Clone, Deserialize)]
pub struct Config {
    pub api_key: String,
    pub api_key_secret: String,
    pub access_token: String,
    pub access_token_secret: String,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"***REDACTED***")
            .field("api_key_secret", &"***REDACTED***")
            .field("access_token", &"***REDACTED***")
            .field("access_token_secret", &"***REDACTED***")
            .finish()
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.api_key.trim().is_empty() {
            return Err("'api_key' is empty in config".into());
        }
        if self.api_key_secret.trim().is_empty() {
            return Err("'api_key_secret' is empty in config".into());
        }
        if self.access_token.trim().is_empty() {
            return Err("'access_token' is empty in config".into());
        }
        if self.access_token_secret.trim().is_empty() {
            return Err("'access_token_secret' is empty in config".into());
        }
        Ok(())
    }
}

/// A published tweet as reported by the API.
#[derive(Debug, Clone)]
pub struct PublishedTweet {
    pub id: String,
    pub author_handle: String,
}

/// The slice of the X API the pipeline depends on: the chunked media upload
/// protocol plus the publish call. A trait so the pipeline can run against a
/// fake in tests.
#[async_trait]
pub trait SocialApi: Send + Sync {
    /// Register an upload session; returns the media id.
    async fn init_upload(&self, total_bytes: u64, content_type: &str) -> Result<String, ApiError>;
    /// Transfer one segment of the payload.
    async fn upload_chunk(
        &self,
        media_id: &str,
        bytes: Vec<u8>,
        segment_index: u32,
    ) -> Result<(), ApiError>;
    /// Commit the upload session so the media id becomes attachable.
    async fn finalize_upload(&self, media_id: &str) -> Result<(), ApiError>;
    /// Post a tweet, optionally with previously finalized media attached.
    async fn publish(&self, text: &str, media_ids: &[String]) -> Result<PublishedTweet, ApiError>;
}

pub struct XClient {
    config: Config,
    http: Client,
    api_base: String,
    cached_username: Mutex<Option<String>>,
}

#[derive(Serialize)]
struct TweetBody {
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    media: Option<TweetMedia>,
}

#[derive(Serialize)]
struct TweetMedia {
    media_ids: Vec<String>,
}

#[derive(Deserialize)]
struct TweetResponse {
    data: TweetData,
}

#[derive(Deserialize)]
struct TweetData {
    id: String,
}

#[derive(Deserialize)]
struct MediaResponse {
    data: MediaData,
}

#[derive(Deserialize)]
struct MediaData {
    id: String,
}

#[derive(Deserialize)]
struct MeResponse {
    data: MeData,
}

#[derive(Deserialize)]
struct MeData {
    username: String,
}

impl XClient {
    pub fn new(config: Config) -> Self {
        Self::with_api_base(config, DEFAULT_API_BASE)
    }

    /// Point the client at a different API host. Used by tests.
    pub fn with_api_base(config: Config, api_base: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        Self {
            config,
            http,
            api_base: api_base.into(),
            cached_username: Mutex::new(None),
        }
    }

    async fn ensure_username(&self) -> Result<String, ApiError> {
        {
            let cached = self.cached_username.lock().await;
            if let Some(ref username) = *cached {
                return Ok(username.clone());
            }
        }

        let url = format!("{}/2/users/me", self.api_base);
        let auth = self.oauth_header("GET", &url, &BTreeMap::new());
        let resp = self
            .http
            .get(&url)
            .header("Authorization", auth)
            .send()
            .await?;

        self.check_auth_error(&resp);
        if !resp.status().is_success() {
            return Err(api_error(resp, "").await);
        }

        let me: MeResponse = resp
            .json()
            .await
            .map_err(|e| ApiError::Protocol(format!("failed to parse users/me response: {e}")))?;

        let mut cached = self.cached_username.lock().await;
        *cached = Some(me.data.username.clone());
        Ok(me.data.username)
    }

    fn rate_limit_reset(resp: &reqwest::Response) -> String {
        if let Some(reset) = resp.headers().get("x-rate-limit-reset") {
            if let Ok(val) = reset.to_str() {
                return format!("Rate limit resets at timestamp {val}. ");
            }
        }
        String::new()
    }

    fn check_auth_error(&self, resp: &reqwest::Response) {
        if resp.status().as_u16() == 401 {
            tracing::error!(
                "Received 401 Unauthorized from X API. \
                 Your OAuth credentials may be revoked or invalid. \
                 Regenerate them at https://developer.x.com/"
            );
        }
    }

    // --- OAuth 1.0a ---

    fn oauth_header(
        &self,
        method: &str,
        url: &str,
        extra_params: &BTreeMap<String, String>,
    ) -> String {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            .to_string();

        let nonce = {
            let mut bytes = [0u8; 16];
            rand::thread_rng().fill(&mut bytes);
            hex::encode(bytes)
        };

        let mut params = BTreeMap::new();
        params.insert("oauth_consumer_key".into(), self.config.api_key.clone());
        params.insert("oauth_nonce".into(), nonce);
        params.insert("oauth_signature_method".into(), "HMAC-SHA1".into());
        params.insert("oauth_timestamp".into(), timestamp);
        params.insert("oauth_token".into(), self.config.access_token.clone());
        params.insert("oauth_version".into(), "1.0".into());

        for (k, v) in extra_params {
            params.insert(k.clone(), v.clone());
        }

        let base_string = Self::signature_base_string(method, url, &params);
        let signing_key = format!(
            "{}&{}",
            pct_encode(&self.config.api_key_secret),
            pct_encode(&self.config.access_token_secret)
        );

        let mut mac = HmacSha1::new_from_slice(signing_key.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(base_string.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());

        params.insert("oauth_signature".into(), signature);

        let header_parts: Vec<String> = params
            .iter()
            .filter(|(k, _)| k.starts_with("oauth_"))
            .map(|(k, v)| format!("{}=\"{}\"", pct_encode(k), pct_encode(v)))
            .collect();

        format!("OAuth {}", header_parts.join(", "))
    }

    fn signature_base_string(method: &str, url: &str, params: &BTreeMap<String, String>) -> String {
        let param_string: String = params
            .iter()
            .map(|(k, v)| format!("{}={}", pct_encode(k), pct_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        format!(
            "{}&{}&{}",
            method.to_uppercase(),
            pct_encode(url),
            pct_encode(&param_string)
        )
    }
}

#[async_trait]
impl SocialApi for XClient {
    async fn init_upload(&self, total_bytes: u64, content_type: &str) -> Result<String, ApiError> {
        let media_category = if content_type.starts_with("video/") {
            "tweet_video"
        } else if content_type == "image/gif" {
            "tweet_gif"
        } else {
            "tweet_image"
        };

        let body = serde_json::json!({
            "media_type": content_type,
            "total_bytes": total_bytes,
            "media_category": media_category,
        });

        let url = format!("{}/2/media/upload/initialize", self.api_base);
        let auth = self.oauth_header("POST", &url, &BTreeMap::new());
        let resp = self
            .http
            .post(&url)
            .header("Authorization", auth)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        self.check_auth_error(&resp);
        if !resp.status().is_success() {
            return Err(api_error(resp, "Media upload init").await);
        }

        let media: MediaResponse = resp
            .json()
            .await
            .map_err(|e| ApiError::Protocol(format!("no media id in initialize response: {e}")))?;
        Ok(media.data.id)
    }

    async fn upload_chunk(
        &self,
        media_id: &str,
        bytes: Vec<u8>,
        segment_index: u32,
    ) -> Result<(), ApiError> {
        let part = reqwest::multipart::Part::bytes(bytes);
        let form = reqwest::multipart::Form::new()
            .text("segment_index", segment_index.to_string())
            .part("media", part);

        // For multipart uploads, only OAuth params go in signature (no body params)
        let url = format!("{}/2/media/upload/{}/append", self.api_base, media_id);
        let auth = self.oauth_header("POST", &url, &BTreeMap::new());
        let resp = self
            .http
            .post(&url)
            .header("Authorization", auth)
            .multipart(form)
            .send()
            .await?;

        self.check_auth_error(&resp);
        if !resp.status().is_success() {
            return Err(api_error(resp, "Media upload append").await);
        }
        Ok(())
    }

    async fn finalize_upload(&self, media_id: &str) -> Result<(), ApiError> {
        let url = format!("{}/2/media/upload/{}/finalize", self.api_base, media_id);
        let auth = self.oauth_header("POST", &url, &BTreeMap::new());
        let resp = self
            .http
            .post(&url)
            .header("Authorization", auth)
            .send()
            .await?;

        self.check_auth_error(&resp);
        if !resp.status().is_success() {
            return Err(api_error(resp, "Media upload finalize").await);
        }
        Ok(())
    }

    async fn publish(&self, text: &str, media_ids: &[String]) -> Result<PublishedTweet, ApiError> {
        let username = self.ensure_username().await?;

        let body = TweetBody {
            text: text.to_string(),
            media: (!media_ids.is_empty()).then(|| TweetMedia {
                media_ids: media_ids.to_vec(),
            }),
        };

        let url = format!("{}/2/tweets", self.api_base);
        let auth = self.oauth_header("POST", &url, &BTreeMap::new());
        let resp = self
            .http
            .post(&url)
            .header("Authorization", auth)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        self.check_auth_error(&resp);
        let status = resp.status();
        if status.as_u16() == 429 {
            let reset = Self::rate_limit_reset(&resp);
            return Err(ApiError::Api {
                code: 429,
                message: format!(
                    "Rate limited (429). {reset}Try again later. Free tier allows ~17 tweets/24h."
                ),
            });
        }
        if !status.is_success() {
            return Err(api_error(resp, "").await);
        }

        let tweet: TweetResponse = resp
            .json()
            .await
            .map_err(|e| ApiError::Protocol(format!("failed to parse tweet response: {e}")))?;

        Ok(PublishedTweet {
            id: tweet.data.id,
            author_handle: username,
        })
    }
}

async fn api_error(resp: reqwest::Response, what: &str) -> ApiError {
    let code = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    let message = if what.is_empty() {
        body
    } else {
        format!("{what}: {body}")
    };
    ApiError::Api { code, message }
}

fn pct_encode(input: &str) -> String {
    utf8_percent_encode(input, RFC3986).to_string()
}

/// Hex encoding for nonce — avoids adding a full crate dependency.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes
            .as_ref()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}
