//! OpenAI-compatible chat-completion client.
//!
//! [`OpenAIChatModel`] implements [`ChatModel`] against
//! `POST {base_url}/chat/completions`, which covers OpenAI itself as well as
//! the self-hosted gateways (vLLM, Ollama, LiteLLM) that speak the same API.
//! Streaming uses server-sent events: each `data:` line carries a
//! `choices[0].delta.content` fragment and the stream ends with
//! `data: [DONE]`.
//!
//! The API key is read from `LLM_API_KEY`, falling back to
//! `OPENAI_API_KEY`; gateways without auth work with neither set.

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use campus_assistant_core::error::ExternalError;
use campus_assistant_core::llm::{ChatModel, CompletionRequest, TokenSink};

use crate::config::LlmConfig;
use crate::http::{build_client, check_status, read_json, transport_error, Limiter};

const SERVICE: &str = "llm";

pub struct OpenAIChatModel {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
    limiter: Limiter,
}

impl OpenAIChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("LLM_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok();

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            client: build_client(config.timeout_secs)?,
            limiter: Limiter::new(SERVICE, config.max_concurrency),
        })
    }

    fn request_body(&self, request: &CompletionRequest, stream: bool) -> Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system.is_empty() {
            messages.push(json!({"role": "system", "content": request.system}));
        }
        for m in &request.messages {
            messages.push(json!({"role": m.role.as_str(), "content": m.content}));
        }

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
            "stream": stream,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, ExternalError> {
        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let response = req.send().await.map_err(|e| transport_error(SERVICE, e))?;
        check_status(SERVICE, response).await
    }
}

#[async_trait]
impl ChatModel for OpenAIChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ExternalError> {
        let _permit = self.limiter.acquire().await?;
        debug!(model = %self.model, messages = request.messages.len(), "chat completion");

        let response = self.send(&self.request_body(request, false)).await?;
        let json = read_json(SERVICE, response).await?;
        parse_completion(&json)
    }

    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
        sink: TokenSink<'_>,
    ) -> Result<String, ExternalError> {
        let _permit = self.limiter.acquire().await?;
        debug!(model = %self.model, messages = request.messages.len(), "streaming chat completion");

        let response = self.send(&self.request_body(request, true)).await?;
        let mut bytes = response.bytes_stream();
        let mut lines = SseLines::default();
        let mut text = String::new();

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| transport_error(SERVICE, e))?;
            for line in lines.push(&chunk)? {
                match parse_sse_line(&line)? {
                    SseEvent::Delta(fragment) => {
                        sink(&fragment);
                        text.push_str(&fragment);
                    }
                    SseEvent::Done => return Ok(text),
                    SseEvent::Skip => {}
                }
            }
        }

        if let Some(line) = lines.finish()? {
            if let SseEvent::Delta(fragment) = parse_sse_line(&line)? {
                sink(&fragment);
                text.push_str(&fragment);
            }
        }
        Ok(text)
    }
}

/// Splits a byte stream into lines.
///
/// Network chunks may end inside a multi-byte character, so bytes are
/// buffered and only complete lines are decoded.
#[derive(Debug, Default)]
struct SseLines {
    buffer: Vec<u8>,
}

impl SseLines {
    fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, ExternalError> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            lines.push(decode_line(&line)?);
        }
        Ok(lines)
    }

    /// The unterminated last line, if any.
    fn finish(&mut self) -> Result<Option<String>, ExternalError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&rest).map(Some)
    }
}

fn decode_line(bytes: &[u8]) -> Result<String, ExternalError> {
    std::str::from_utf8(bytes)
        .map(|line| line.trim().to_string())
        .map_err(|e| ExternalError::invalid(SERVICE, format!("stream is not valid UTF-8: {}", e)))
}

/// Extracts `choices[0].message.content`.
fn parse_completion(json: &Value) -> Result<String, ExternalError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ExternalError::invalid(SERVICE, "missing choices[0].message.content"))
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Delta(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> Result<SseEvent, ExternalError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseEvent::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseEvent::Done);
    }
    if data.is_empty() {
        return Ok(SseEvent::Skip);
    }
    let json: Value = serde_json::from_str(data)
        .map_err(|e| ExternalError::invalid(SERVICE, format!("bad stream event: {}", e)))?;
    match json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
    {
        Some(fragment) if !fragment.is_empty() => Ok(SseEvent::Delta(fragment.to_string())),
        _ => Ok(SseEvent::Skip),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_assistant_core::llm::ChatMessage;

    fn model() -> OpenAIChatModel {
        OpenAIChatModel {
            base_url: "http://localhost:1".to_string(),
            model: "gpt-test".to_string(),
            api_key: None,
            client: reqwest::Client::new(),
            limiter: Limiter::new(SERVICE, 1),
        }
    }

    #[test]
    fn test_request_body_prepends_system() {
        let req = CompletionRequest::new(
            "be brief",
            vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")],
        )
        .with_max_tokens(Some(64));
        let body = model().request_body(&req, false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][2]["content"], "hello");
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn test_request_body_without_system() {
        let req = CompletionRequest::new("", vec![ChatMessage::user("hi")]);
        let body = model().request_body(&req, true);
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn test_parse_completion() {
        let json = json!({"choices": [{"message": {"role": "assistant", "content": "Hallo"}}]});
        assert_eq!(parse_completion(&json).unwrap(), "Hallo");
        assert!(parse_completion(&json!({"choices": []})).is_err());
    }

    #[test]
    fn test_sse_lines_join_split_characters() {
        let event = "data: {\"choices\":[{\"delta\":{\"content\":\"Prüfung\"}}]}\n".as_bytes();
        let split = event.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut lines = SseLines::default();
        assert!(lines.push(&event[..split]).unwrap().is_empty());
        let out = lines.push(&event[split..]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(
            parse_sse_line(&out[0]).unwrap(),
            SseEvent::Delta("Prüfung".to_string())
        );
        assert_eq!(lines.finish().unwrap(), None);
    }

    #[test]
    fn test_sse_lines_unterminated_tail() {
        let mut lines = SseLines::default();
        assert_eq!(lines.push(b"data: a\r\ndata: b").unwrap(), vec!["data: a"]);
        assert_eq!(lines.finish().unwrap(), Some("data: b".to_string()));
    }

    #[test]
    fn test_sse_lines_reject_invalid_utf8() {
        let mut lines = SseLines::default();
        assert!(lines.push(&[b'd', 0xFF, b'\n']).is_err());
    }

    #[tokio::test]
    async fn test_streaming_keeps_characters_split_across_chunks() {
        use axum::{body::Body, routing::post, Router};
        use std::time::Duration;

        let first = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Die Prüfung\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\" ist schwer, Grüße\"}}]}\n\n",
            "data: [DONE]\n\n",
        )
        .as_bytes()
        .to_vec();
        // Cut inside "ü" and "ß".
        let cut_a = first.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let cut_b = first.iter().rposition(|&b| b == 0xC3).unwrap() + 1;
        let chunks = vec![
            first[..cut_a].to_vec(),
            first[cut_a..cut_b].to_vec(),
            first[cut_b..].to_vec(),
        ];

        let app = Router::new().route(
            "/v1/chat/completions",
            post(move || {
                let chunks = chunks.clone();
                async move {
                    let stream = futures::stream::iter(chunks).then(|chunk| async move {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, std::io::Error>(chunk)
                    });
                    Body::from_stream(stream)
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut model = model();
        model.base_url = format!("http://{}/v1", addr);
        let mut fragments: Vec<String> = Vec::new();
        let mut collect = |f: &str| fragments.push(f.to_string());
        let req = CompletionRequest::new("", vec![ChatMessage::user("Wie schwer?")]);
        let text = model.complete_streaming(&req, &mut collect).await.unwrap();

        assert_eq!(text, "Die Prüfung ist schwer, Grüße");
        assert_eq!(fragments, vec!["Die Prüfung", " ist schwer, Grüße"]);
    }

    #[test]
    fn test_parse_sse_lines() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#).unwrap(),
            SseEvent::Delta("Hi".to_string())
        );
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), SseEvent::Done);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), SseEvent::Skip);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            SseEvent::Skip
        );
        assert!(parse_sse_line("data: {not json").is_err());
    }
}
