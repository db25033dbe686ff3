//! External LLM provider streaming implementations.
//!
//! Each provider streams tokens via SSE from its API. OpenAI and Azure
//! OpenAI share one wire format. Anthropic uses a different one.

use std::pin::Pin;

use futures::Stream;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{debug, error};

use crate::types::{ChatMessage, ProviderConfig, ROLE_SYSTEM, ROLE_USER};
use docchat_core::{Error, Provider};

pub const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Boxed stream type for returning different stream implementations.
pub type BoxedStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// A single streamed token, the end marker, or a failure.
#[derive(Debug)]
pub enum StreamChunk {
    Token(String),
    Done { tokens_used: usize },
    Error(Error),
}

/// What one SSE data line means to the stream loop.
#[derive(Debug, PartialEq)]
pub(crate) enum LineEvent {
    Token(String),
    Done,
    Failed(String),
    Skip,
}

/// Stream tokens from the configured provider.
pub fn stream_llm(client: &Client, config: &ProviderConfig, messages: Vec<ChatMessage>) -> BoxedStream {
    match config.provider {
        Provider::OpenAI => {
            let request = client
                .post(OPENAI_CHAT_URL)
                .bearer_auth(&config.api_key)
                .json(&openai_body(Some(&config.model), &messages, config));
            Box::pin(stream_sse(request, config.provider, parse_openai_line))
        }
        Provider::AzureOpenAI => {
            let azure = config.azure.clone().unwrap_or_default();
            let url = format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                azure.base_url.trim_end_matches('/'),
                azure.deployment_name,
                azure.api_version
            );
            let request = client
                .post(url)
                .header("api-key", &azure.api_key)
                .json(&openai_body(None, &messages, config));
            Box::pin(stream_sse(request, config.provider, parse_openai_line))
        }
        Provider::Anthropic => {
            let request = client
                .post(ANTHROPIC_MESSAGES_URL)
                .header("x-api-key", &config.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&anthropic_body(&messages, config));
            Box::pin(stream_sse(request, config.provider, parse_anthropic_line))
        }
    }
}

fn openai_body(model: Option<&str>, messages: &[ChatMessage], config: &ProviderConfig) -> serde_json::Value {
    let msgs: Vec<serde_json::Value> = messages
        .iter()
        .map(|m| json!({"role": m.role, "content": m.content}))
        .collect();

    let mut body = json!({
        "messages": msgs,
        "temperature": config.temperature,
        "max_tokens": config.max_tokens,
        "stream": true,
    });
    if let Some(model) = model {
        body["model"] = json!(model);
    }
    body
}

/// Anthropic takes the system prompt separately and the conversation must
/// open with a user turn, so leading assistant messages (the greeting) are
/// dropped.
fn anthropic_body(messages: &[ChatMessage], config: &ProviderConfig) -> serde_json::Value {
    let system_msg: Option<String> = messages
        .iter()
        .filter(|m| m.role == ROLE_SYSTEM)
        .map(|m| m.content.clone())
        .reduce(|a, b| format!("{}\n\n{}", a, b));

    let conv_msgs: Vec<serde_json::Value> = messages
        .iter()
        .filter(|m| m.role != ROLE_SYSTEM)
        .skip_while(|m| m.role != ROLE_USER)
        .map(|m| json!({"role": m.role, "content": m.content}))
        .collect();

    let mut body = json!({
        "model": config.model,
        "messages": conv_msgs,
        "temperature": config.temperature,
        "max_tokens": config.max_tokens,
        "stream": true,
    });

    if let Some(sys) = system_msg {
        body["system"] = json!(sys);
    }
    body
}

/// Send the request and turn the SSE body into `StreamChunk`s.
fn stream_sse(
    request: RequestBuilder,
    provider: Provider,
    parse_line: fn(&str) -> LineEvent,
) -> impl Stream<Item = StreamChunk> + Send + 'static {
    async_stream::stream! {
        debug!("Streaming from {}", provider);

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                yield StreamChunk::Error(Error::Http(format!("Request failed: {}", e)));
                return;
            }
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            yield StreamChunk::Error(Error::Credential(provider.to_string()));
            return;
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            yield StreamChunk::Error(Error::Provider(format!("API error {}: {}", status, body)));
            return;
        }

        let mut stream = response.bytes_stream();
        // Raw bytes: a multi-byte character may straddle two network chunks.
        let mut buffer: Vec<u8> = Vec::new();
        let mut token_count = 0usize;

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    yield StreamChunk::Error(Error::Http(format!("Stream read error: {}", e)));
                    return;
                }
            };

            buffer.extend_from_slice(&bytes);

            // Process complete SSE lines
            while let Some(line_end) = buffer.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = buffer.drain(..=line_end).collect();
                let line = String::from_utf8_lossy(&raw).trim().to_string();

                match parse_line(&line) {
                    LineEvent::Token(text) => {
                        token_count += 1;
                        yield StreamChunk::Token(text);
                    }
                    LineEvent::Done => {
                        yield StreamChunk::Done { tokens_used: token_count };
                        return;
                    }
                    LineEvent::Failed(msg) => {
                        error!("{} stream error: {}", provider, msg);
                        yield StreamChunk::Error(Error::Provider(msg));
                        return;
                    }
                    LineEvent::Skip => {}
                }
            }
        }

        yield StreamChunk::Done { tokens_used: token_count };
    }
}

/// OpenAI-format SSE line: `data: {...choices[0].delta.content...}` or `data: [DONE]`.
pub(crate) fn parse_openai_line(line: &str) -> LineEvent {
    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
        return LineEvent::Skip;
    };
    if data == "[DONE]" {
        return LineEvent::Done;
    }
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(data) else {
        return LineEvent::Skip;
    };
    if let Some(msg) = parsed["error"]["message"].as_str() {
        return LineEvent::Failed(msg.to_string());
    }
    match parsed["choices"][0]["delta"]["content"].as_str() {
        Some(content) if !content.is_empty() => LineEvent::Token(content.to_string()),
        _ => LineEvent::Skip,
    }
}

/// Anthropic SSE line. `event:` lines are ignored, the `type` field of the
/// data payload carries the same information.
pub(crate) fn parse_anthropic_line(line: &str) -> LineEvent {
    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
        return LineEvent::Skip;
    };
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(data) else {
        return LineEvent::Skip;
    };
    match parsed["type"].as_str() {
        Some("content_block_delta") => match parsed["delta"]["text"].as_str() {
            Some(text) if !text.is_empty() => LineEvent::Token(text.to_string()),
            _ => LineEvent::Skip,
        },
        Some("message_stop") => LineEvent::Done,
        Some("error") => LineEvent::Failed(
            parsed["error"]["message"]
                .as_str()
                .unwrap_or("Unknown error")
                .to_string(),
        ),
        _ => LineEvent::Skip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one HTTP response, writing `parts` as separate chunked-encoding
    /// chunks with a pause between them. Returns the URL to post to.
    async fn serve_once(status: &'static str, parts: Vec<Vec<u8>>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = respond(listener, status, parts).await;
        });
        format!("http://{}/v1/chat/completions", addr)
    }

    async fn respond(listener: TcpListener, status: &str, parts: Vec<Vec<u8>>) -> std::io::Result<()> {
        let (mut socket, _) = listener.accept().await?;

        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await?;
            request.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&request).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .filter_map(|l| l.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if request.len() >= end + 4 + length {
                    break;
                }
            }
            if n == 0 {
                break;
            }
        }

        let head = format!(
            "HTTP/1.1 {}\r\nContent-Type: text/event-stream\r\nTransfer-Encoding: chunked\r\n\r\n",
            status
        );
        socket.write_all(head.as_bytes()).await?;
        for part in parts {
            socket.write_all(format!("{:x}\r\n", part.len()).as_bytes()).await?;
            socket.write_all(&part).await?;
            socket.write_all(b"\r\n").await?;
            socket.flush().await?;
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        }
        socket.write_all(b"0\r\n\r\n").await?;
        socket.flush().await
    }

    async fn collect(url: &str, provider: Provider) -> Vec<StreamChunk> {
        let client = Client::builder().no_proxy().build().unwrap();
        let request = client.post(url).json(&json!({"stream": true}));
        stream_sse(request, provider, parse_openai_line).collect().await
    }

    fn config(provider: Provider) -> ProviderConfig {
        ProviderConfig {
            provider,
            model: "m".into(),
            api_key: "k".into(),
            temperature: 0.2,
            max_tokens: 64,
            azure: None,
        }
    }

    #[test]
    fn test_parse_openai_lines() {
        assert_eq!(
            parse_openai_line(r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#),
            LineEvent::Token("Hel".into())
        );
        assert_eq!(parse_openai_line("data: [DONE]"), LineEvent::Done);
        assert_eq!(
            parse_openai_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            LineEvent::Skip
        );
        assert_eq!(parse_openai_line(": keep-alive"), LineEvent::Skip);
        assert_eq!(
            parse_openai_line(r#"data: {"error":{"message":"overloaded"}}"#),
            LineEvent::Failed("overloaded".into())
        );
    }

    #[tokio::test]
    async fn test_multibyte_character_split_across_chunks() {
        let payload = "data: {\"choices\":[{\"delta\":{\"content\":\"caf\u{e9}\"}}]}\n\ndata: [DONE]\n\n";
        let bytes = payload.as_bytes();
        let split = payload.find('\u{e9}').unwrap() + 1;
        assert!(!payload.is_char_boundary(split));

        let url = serve_once("200 OK", vec![bytes[..split].to_vec(), bytes[split..].to_vec()]).await;
        let chunks = collect(&url, Provider::OpenAI).await;

        let text: String = chunks
            .iter()
            .filter_map(|c| match c {
                StreamChunk::Token(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "caf\u{e9}");
        assert!(matches!(chunks.last(), Some(StreamChunk::Done { tokens_used: 1 })));
    }

    #[tokio::test]
    async fn test_unauthorized_response_is_credential_error() {
        for status in ["401 Unauthorized", "403 Forbidden"] {
            let url = serve_once(status, vec![b"{\"error\":\"bad key\"}".to_vec()]).await;
            let chunks = collect(&url, Provider::Anthropic).await;
            assert_eq!(chunks.len(), 1);
            assert!(
                matches!(&chunks[0], StreamChunk::Error(Error::Credential(name)) if name == "Anthropic"),
                "{:?}",
                chunks
            );
        }
    }

    #[test]
    fn test_parse_anthropic_lines() {
        assert_eq!(parse_anthropic_line("event: content_block_delta"), LineEvent::Skip);
        assert_eq!(
            parse_anthropic_line(
                r#"data: {"type":"content_block_delta","delta":{"type":"text_delta","text":"Hi"}}"#
            ),
            LineEvent::Token("Hi".into())
        );
        assert_eq!(parse_anthropic_line(r#"data: {"type":"message_stop"}"#), LineEvent::Done);
        assert_eq!(
            parse_anthropic_line(r#"data: {"type":"error","error":{"message":"bad"}}"#),
            LineEvent::Failed("bad".into())
        );
    }

    #[test]
    fn test_anthropic_body_drops_leading_greeting() {
        let messages = vec![
            ChatMessage::system("Be brief."),
            ChatMessage::assistant("Hello!"),
            ChatMessage::user("What is Rust?"),
        ];
        let body = anthropic_body(&messages, &config(Provider::Anthropic));
        assert_eq!(body["system"], "Be brief.");
        let msgs = body["messages"].as_array().unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["role"], "user");
    }

    #[test]
    fn test_openai_body_model_optional() {
        let messages = vec![ChatMessage::user("hi")];
        let cfg = config(Provider::OpenAI);
        assert_eq!(openai_body(Some("gpt-4o"), &messages, &cfg)["model"], "gpt-4o");
        assert!(openai_body(None, &messages, &cfg).get("model").is_none());
        assert_eq!(openai_body(None, &messages, &cfg)["stream"], true);
    }
}
