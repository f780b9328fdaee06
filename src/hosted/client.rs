use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use url::Url;
use crate::config::CloudConfig;
use crate::queue::{upload_error_message, FileId, UploadResponse};
use super::errors::{HostedError, Result};
use super::progress_stream::{EventGate, ProgressStream};

/// Per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

const CHUNK_SIZE: usize = 64 * 1024;

/// Extra per-upload fields accepted by the hosted API.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Comma separated
    pub tags: Option<String>,
    /// `key=value|key=value`
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HostedClient {
    client: Client,
    upload_url: Url,
    upload_preset: String,
    folder: String,
    options: UploadOptions,
}

impl HostedClient {
    pub fn new(config: &CloudConfig, options: UploadOptions) -> Result<Self> {
        Self::with_timeout(config, options, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(config: &CloudConfig, options: UploadOptions, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            upload_url: config.upload_url()?,
            upload_preset: config.upload_preset.clone(),
            folder: config.folder.clone(),
            options,
        })
    }

    pub fn upload_url(&self) -> &Url {
        &self.upload_url
    }

    /// Text fields sent alongside `file`.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![("upload_preset", self.upload_preset.clone())];

        if !self.folder.is_empty() {
            fields.push(("folder", self.folder.clone()));
        }
        if let Some(tags) = self.options.tags.as_ref().filter(|t| !t.is_empty()) {
            fields.push(("tags", tags.clone()));
        }
        if let Some(context) = self.options.context.as_ref().filter(|c| !c.is_empty()) {
            fields.push(("context", context.clone()));
        }

        fields
    }

    /// POST one file as multipart, reporting progress as the body is consumed.
    pub async fn upload(
        &self,
        id: FileId,
        name: &str,
        mime_type: &str,
        data: Bytes,
        gate: Arc<EventGate>,
    ) -> Result<UploadResponse> {
        let total = data.len() as u64;
        let chunks: Vec<std::io::Result<Bytes>> = (0..data.len())
            .step_by(CHUNK_SIZE)
            .map(|start| Ok(data.slice(start..(start + CHUNK_SIZE).min(data.len()))))
            .collect();

        let stream = ProgressStream::new(futures::stream::iter(chunks), id, total, gate);
        let part = Part::stream_with_length(Body::wrap_stream(stream), total)
            .file_name(name.to_string())
            .mime_str(mime_type)?;

        let mut form = Form::new().part("file", part);
        for (key, value) in self.form_fields() {
            form = form.text(key, value);
        }

        let response = self.client
            .post(self.upload_url.clone())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = upload_error_message(&format!("Upload failed with status {}", status), Some(&body));
            return Err(HostedError::server_error(status.as_u16(), message, Some(body)));
        }

        parse_upload_response(&body)
    }
}

pub fn parse_upload_response(body: &str) -> Result<UploadResponse> {
    Ok(serde_json::from_str(body)?)
}
