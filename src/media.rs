use std::time::Duration;

use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};

use crate::api::SocialApi;
use crate::error::PostError;

/// A media attachment that has been carried through the full upload
/// protocol; `media_id` is attachable to a publish call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedMedia {
    pub url: String,
    pub content_type: String,
    pub content_length: u64,
    pub media_id: String,
}

/// Runs the upload protocol for one media URL:
/// download → init → upload → finalize, strictly in that order. A failure at
/// any step fails the whole item with the originating error.
pub struct MediaUploader {
    http: Client,
}

impl MediaUploader {
    pub fn new() -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        Self { http }
    }

    pub async fn upload(&self, api: &dyn SocialApi, url: &str) -> Result<UploadedMedia, PostError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| PostError::Download {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        if !resp.status().is_success() {
            return Err(PostError::Download {
                url: url.to_string(),
                message: format!("status {}", resp.status()),
            });
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let payload = resp.bytes().await.map_err(|e| PostError::Download {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        let content_length = payload.len() as u64;

        let media_id = api.init_upload(content_length, &content_type).await?;
        // The payload always fits a single segment here.
        api.upload_chunk(&media_id, payload.to_vec(), 0).await?;
        api.finalize_upload(&media_id).await?;

        Ok(UploadedMedia {
            url: url.to_string(),
            content_type,
            content_length,
            media_id,
        })
    }
}

impl Default for MediaUploader {
    fn default() -> Self {
        Self::new()
    }
}
