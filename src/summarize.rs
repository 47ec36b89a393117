use crate::config::SummarizerConfig;
use crate::utils::truncate_chars;
use crate::TrackerError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

pub const SUMMARY_FAILED: &str = "요약 실패";

const SYSTEM_PROMPT: &str = "채용 공고 본문을 읽고 핵심 업무와 자격 요건을 한 문장으로 요약하세요.";

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

/// One-line posting summaries from an OpenAI-compatible chat endpoint.
pub struct Summarizer {
    client: reqwest::Client,
    api_key: String,
    config: SummarizerConfig,
}

impl Summarizer {
    pub fn new(api_key: String, config: SummarizerConfig) -> Result<Self, TrackerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            config,
        })
    }

    /// Never fails; any problem yields [`SUMMARY_FAILED`].
    pub async fn summarize(&self, body: &str) -> String {
        match self.request(body).await {
            Ok(Some(summary)) => summary,
            Ok(None) => {
                warn!("Summary response had no content");
                SUMMARY_FAILED.to_string()
            }
            Err(e) => {
                warn!("Summary request failed: {:?}", e);
                SUMMARY_FAILED.to_string()
            }
        }
    }

    async fn request(&self, body: &str) -> Result<Option<String>, TrackerError> {
        let input = truncate_chars(body, self.config.max_input_chars);
        let req = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &input,
                },
            ],
            temperature: 0.2,
        };

        let resp: ChatResponse = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(first_reply(resp))
    }
}

fn first_reply(resp: ChatResponse) -> Option<String> {
    resp.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
