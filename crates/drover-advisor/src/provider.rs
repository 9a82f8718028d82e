use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use drover_core::advisory::{Advisory, CompletionRequest};
use drover_core::errors::AdvisoryError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection details for an OpenAI-compatible chat completions API.
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: SecretString,
    pub timeout: Duration,
}

pub struct OpenAiAdvisory {
    client: Client,
    endpoint: String,
    model: String,
    api_key: SecretString,
    timeout: Duration,
}

impl OpenAiAdvisory {
    pub fn new(config: OpenAiConfig) -> Result<Self, AdvisoryError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.timeout)
            .build()
            .map_err(|e| AdvisoryError::NetworkError(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model,
            api_key: config.api_key,
            timeout: config.timeout,
        })
    }

    fn request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": request.prompt }],
            "max_tokens": request.max_tokens,
        });
        if request.json_object {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }

    fn map_send_error(&self, e: reqwest::Error) -> AdvisoryError {
        if e.is_timeout() {
            AdvisoryError::Timeout(self.timeout)
        } else {
            AdvisoryError::NetworkError(e.to_string())
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Pull the first choice's text out of a chat completions response body.
pub fn extract_content(body: &str) -> Result<String, AdvisoryError> {
    let completion: ChatCompletion = serde_json::from_str(body)
        .map_err(|e| AdvisoryError::MalformedResponse(e.to_string()))?;
    completion
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| AdvisoryError::MalformedResponse("no choices in response".into()))
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl Advisory for OpenAiAdvisory {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, request), fields(model = %self.model, json = request.json_object))]
    async fn complete(&self, request: &CompletionRequest) -> Result<String, AdvisoryError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = resp.status().as_u16();
        if status == 429 {
            return Err(AdvisoryError::RateLimited {
                retry_after: retry_after(resp.headers()),
            });
        }
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AdvisoryError::from_status(status, body));
        }

        let body = resp.text().await.map_err(|e| self.map_send_error(e))?;
        extract_content(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advisory() -> OpenAiAdvisory {
        OpenAiAdvisory::new(OpenAiConfig {
            base_url: "http://127.0.0.1:9/v1/".into(),
            model: "gpt-4o-mini".into(),
            api_key: SecretString::from("sk-test"),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn endpoint_joins_base_url() {
        assert_eq!(advisory().endpoint, "http://127.0.0.1:9/v1/chat/completions");
    }

    #[test]
    fn json_requests_set_response_format() {
        let adv = advisory();
        let body = adv.request_body(&CompletionRequest::json("tune", 150));
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["max_tokens"], 150);
        assert_eq!(body["messages"][0]["content"], "tune");

        let body = adv.request_body(&CompletionRequest::text("hi", 30));
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn extract_content_reads_first_choice() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"hello there"}}]}"#;
        assert_eq!(extract_content(body).unwrap(), "hello there");
    }

    #[test]
    fn extract_content_rejects_empty_choices() {
        let err = extract_content(r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(err, AdvisoryError::MalformedResponse(_)));
        let err = extract_content("<html>").unwrap_err();
        assert!(matches!(err, AdvisoryError::MalformedResponse(_)));
    }

    #[test]
    fn retry_after_header_parsed() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "12".parse().unwrap());
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(12)));
        headers.insert(reqwest::header::RETRY_AFTER, "soon".parse().unwrap());
        assert_eq!(retry_after(&headers), None);
    }

    #[tokio::test]
    async fn unreachable_server_is_network_error() {
        let err = advisory()
            .complete(&CompletionRequest::text("hi", 10))
            .await
            .unwrap_err();
        assert!(matches!(err, AdvisoryError::NetworkError(_) | AdvisoryError::Timeout(_)));
        assert!(!err.is_rate_limited());
    }
}
