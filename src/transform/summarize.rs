//! Summarization through an HTTP model endpoint.
//!
//! The endpoint speaks the Hugging Face inference protocol:
//! `POST {"inputs": "...", "parameters": {...}}` answered with
//! `[{"summary_text": "..."}]`.

use super::normalize::{decode_text, truncate_chars};
use super::{Document, DocumentTransform};
use crate::config::SummarizeConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Generation parameters sent with every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SummarizerOptions {
    pub max_length: usize,
    pub min_length: usize,
    pub do_sample: bool,
}

#[derive(Debug, Serialize)]
struct SummarizeRequest<'a> {
    inputs: &'a str,
    parameters: SummarizerOptions,
}

#[derive(Debug, Deserialize)]
struct SummaryItem {
    summary_text: String,
}

/// Client for a remote summarization model.
#[derive(Debug, Clone)]
pub struct HttpSummarizer {
    client: reqwest::Client,
    endpoint: String,
    bearer_token: Option<String>,
    options: SummarizerOptions,
    max_input_chars: Option<usize>,
}

impl HttpSummarizer {
    /// Build a summarizer from stage configuration.
    ///
    /// The bearer token, if any, is read from the variable named by `api_token_env`.
    pub fn from_config(config: &SummarizeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        let bearer_token = match &config.api_token_env {
            Some(var) => Some(
                std::env::var(var)
                    .with_context(|| format!("Summarizer token variable {} is not set", var))?,
            ),
            None => None,
        };

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            bearer_token,
            options: SummarizerOptions {
                max_length: config.max_length,
                min_length: config.min_length,
                do_sample: false,
            },
            max_input_chars: config.max_input_chars,
        })
    }

    /// Text actually sent to the model after decoding and the input cap.
    fn prepare_input(&self, body: &[u8]) -> String {
        let text = decode_text(body);
        match self.max_input_chars {
            Some(max) => truncate_chars(text, max),
            None => text,
        }
    }

    async fn summarize(&self, text: &str) -> Result<String> {
        let mut request = self.client.post(&self.endpoint).json(&SummarizeRequest {
            inputs: text,
            parameters: self.options,
        });
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Summarizer request to {} failed", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Summarizer returned {}: {}", status, body);
        }

        let payload = response
            .text()
            .await
            .context("Failed to read summarizer response")?;
        parse_summary(&payload)
    }
}

/// Extract the first summary from a model response.
fn parse_summary(payload: &str) -> Result<String> {
    let items: Vec<SummaryItem> =
        serde_json::from_str(payload).context("Malformed summarizer response")?;
    items
        .into_iter()
        .next()
        .map(|item| item.summary_text)
        .ok_or_else(|| anyhow::anyhow!("Summarizer returned no summaries"))
}

#[async_trait]
impl DocumentTransform for HttpSummarizer {
    fn name(&self) -> &str {
        "summarize"
    }

    async fn transform(&self, input: Document) -> Result<Document> {
        let text = self.prepare_input(&input.body);
        let summary = self.summarize(&text).await?;
        Ok(Document {
            body: Bytes::from(summary),
            metadata: input.metadata,
        })
    }
}
