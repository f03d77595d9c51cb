// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Speech-to-text for stored calls.
//!
//! The default provider speaks the AssemblyAI v2 protocol: upload the file, create a
//! transcript job for the returned URL, then poll the job until it settles.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use super::DispatchError;

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribes the audio file at `path`. `Ok(None)` means the provider produced no text.
    async fn transcribe(&self, path: &Path) -> Result<Option<String>, DispatchError>;
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    upload_url: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptJob {
    id: String,
    status: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct AssemblyAiTranscriber {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    poll_interval: Duration,
}

impl AssemblyAiTranscriber {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        api_key: String,
        poll_interval: Duration,
    ) -> Self {
        Self { client, base_url: base_url.trim_end_matches('/').to_string(), api_key, poll_interval }
    }

    async fn upload(&self, path: &Path) -> Result<String, DispatchError> {
        let audio = tokio::fs::read(path).await?;
        let response: UploadResponse = self
            .client
            .post(format!("{}/v2/upload", self.base_url))
            .header(reqwest::header::AUTHORIZATION, &self.api_key)
            .body(audio)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.upload_url)
    }

    async fn create_job(&self, audio_url: &str) -> Result<TranscriptJob, DispatchError> {
        Ok(self
            .client
            .post(format!("{}/v2/transcript", self.base_url))
            .header(reqwest::header::AUTHORIZATION, &self.api_key)
            .json(&serde_json::json!({ "audio_url": audio_url }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    async fn poll(&self, id: &str) -> Result<TranscriptJob, DispatchError> {
        Ok(self
            .client
            .get(format!("{}/v2/transcript/{id}", self.base_url))
            .header(reqwest::header::AUTHORIZATION, &self.api_key)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}

#[async_trait]
impl Transcriber for AssemblyAiTranscriber {
    async fn transcribe(&self, path: &Path) -> Result<Option<String>, DispatchError> {
        let audio_url = self.upload(path).await?;
        let mut job = self.create_job(&audio_url).await?;
        tracing::debug!(job_id = %job.id, "Transcription job created");

        // The caller bounds the total time spent here.
        loop {
            match job.status.as_str() {
                "completed" => return Ok(job.text.filter(|t| !t.trim().is_empty())),
                "error" => {
                    return Err(DispatchError::Provider(
                        job.error.unwrap_or_else(|| "transcription failed".to_string()),
                    ))
                },
                _ => {
                    tokio::time::sleep(self.poll_interval).await;
                    job = self.poll(&job.id).await?;
                },
            }
        }
    }
}
