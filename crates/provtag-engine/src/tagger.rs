//! Client for the WD14 tagger HTTP service.

use std::future::Future;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use provtag_contracts::blob::ImageBlob;
use provtag_contracts::inference::{InferenceResult, Thresholds};
use provtag_contracts::settings::Settings;
use reqwest::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::{Client as HttpClient, Response as HttpResponse};
use serde_json::Value;

pub trait TagInference: Send + Sync {
    fn infer(&self, blob: &ImageBlob) -> impl Future<Output = Result<InferenceResult>> + Send;
}

#[derive(Debug, Clone)]
pub struct WdTaggerClient {
    http: HttpClient,
    upload_url: String,
    token: String,
    thresholds: Thresholds,
}

impl WdTaggerClient {
    pub fn new(
        endpoint: &str,
        token: impl Into<String>,
        thresholds: Thresholds,
        timeout: Duration,
    ) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("failed building tagger HTTP client")?;
        Ok(Self {
            http,
            upload_url: upload_url(endpoint),
            token: token.into(),
            thresholds,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            &settings.tagger_endpoint,
            settings.tagger_token.clone(),
            settings.thresholds,
            settings.tagger_timeout,
        )
    }

    pub fn upload_url(&self) -> &str {
        &self.upload_url
    }

    fn form(&self, blob: &ImageBlob) -> Result<MultipartForm> {
        let format = blob.format();
        let file = MultipartPart::bytes(blob.bytes().to_vec())
            .file_name(format!("image.{}", format.extension()))
            .mime_str(format.mime_type())
            .context("invalid image MIME type")?;
        Ok(MultipartForm::new()
            .text("token", self.token.clone())
            .part("file", file)
            .text("general_threshold", self.thresholds.general.to_string())
            .text("character_threshold", self.thresholds.character.to_string()))
    }
}

impl TagInference for WdTaggerClient {
    async fn infer(&self, blob: &ImageBlob) -> Result<InferenceResult> {
        let form = self.form(blob)?;
        let response = self
            .http
            .post(&self.upload_url)
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("tagger request failed ({})", self.upload_url))?;
        let payload = response_json_or_error("tagger", response).await?;
        parse_tagger_payload(&payload)
    }
}

pub fn upload_url(endpoint: &str) -> String {
    let base = endpoint.trim().trim_end_matches('/');
    if base.ends_with("upload") {
        return format!("{base}/");
    }
    format!("{base}/upload/")
}

pub fn parse_tagger_payload(payload: &Value) -> Result<InferenceResult> {
    let general = payload
        .get("sorted_general_strings")
        .and_then(Value::as_str)
        .context("tagger response missing sorted_general_strings")?;
    let characters = payload
        .get("character_res")
        .and_then(Value::as_object)
        .context("tagger response missing character_res")?;
    Ok(InferenceResult::from_tag_string(
        general,
        characters.keys().cloned(),
    ))
}

async fn response_json_or_error(service: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .await
        .with_context(|| format!("{service} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{service} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{service} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
