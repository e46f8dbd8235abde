//! OpenAI-compatible chat-completions LLM stage.
//!
//! Works against any server implementing the OpenAI chat completions API
//! (Ollama, vLLM, llama.cpp server, hosted providers). Responses stream via
//! Server-Sent Events so synthesis starts on the first delta. Conversation
//! history is kept per session, in memory only, for the session's lifetime.

use crate::error::{EngineError, Result};
use crate::frames::{Frame, FrameKind, TextChunk};
use crate::handler::{Capability, Handler, HandlerDescriptor, SessionId};
use crate::handlers::{param_str, param_str_required, param_u64};
use crate::registry::FactoryContext;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info};

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a voice assistant in a real-time conversation. Keep replies short and speakable.";

/// One message in a session's conversation history.
#[derive(Debug, Clone, serde::Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Default)]
struct SessionState {
    /// Partial user input accumulated until a final chunk arrives.
    pending: String,
    history: Vec<ChatMessage>,
}

/// Accumulates raw response bytes and yields complete lines.
///
/// Network chunk boundaries are arbitrary; decoding per chunk would tear
/// multibyte characters apart. Bytes stay raw until a full line has arrived.
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&raw).trim().to_owned());
        }
        lines
    }
}

/// Chat-completions client stage.
pub struct OpenAiChatLlm {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
    system_prompt: String,
    max_history_messages: usize,
    sessions: Mutex<HashMap<SessionId, SessionState>>,
}

/// Build an [`OpenAiChatLlm`].
///
/// Parameters: `api_url` (required), `api_model`, `api_key`,
/// `system_prompt`, `max_history_messages`.
pub fn factory(ctx: &FactoryContext<'_>) -> Result<Arc<dyn Handler>> {
    let api_url = param_str_required(ctx, "api_url")?;
    let base = api_url.strip_suffix("/v1").unwrap_or(&api_url);
    let url = format!("{}/v1/chat/completions", base.trim_end_matches('/'));
    Ok(Arc::new(OpenAiChatLlm {
        client: reqwest::Client::new(),
        url,
        model: param_str(ctx, "api_model", "default")?,
        api_key: param_str(ctx, "api_key", "")?,
        system_prompt: param_str(ctx, "system_prompt", DEFAULT_SYSTEM_PROMPT)?,
        max_history_messages: param_u64(ctx, "max_history_messages", 16)? as usize,
        sessions: Mutex::new(HashMap::new()),
    }))
}

impl OpenAiChatLlm {
    /// Messages for one request: system prompt, trimmed history, user turn.
    fn request_messages(&self, session: SessionId, user_input: &str) -> Result<Vec<ChatMessage>> {
        let sessions = self
            .sessions
            .lock()
            .map_err(|_| EngineError::Handler("llm state poisoned".to_owned()))?;
        let mut messages = vec![ChatMessage {
            role: "system",
            content: self.system_prompt.clone(),
        }];
        if let Some(state) = sessions.get(&session) {
            messages.extend(state.history.iter().cloned());
        }
        messages.push(ChatMessage {
            role: "user",
            content: user_input.to_owned(),
        });
        Ok(messages)
    }

    fn record_turn(&self, session: SessionId, user_input: &str, reply: &str) -> Result<()> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| EngineError::Handler("llm state poisoned".to_owned()))?;
        let state = sessions.entry(session).or_default();
        state.history.push(ChatMessage {
            role: "user",
            content: user_input.to_owned(),
        });
        if !reply.is_empty() {
            state.history.push(ChatMessage {
                role: "assistant",
                content: reply.to_owned(),
            });
        }
        let max = self.max_history_messages;
        if max > 0 && state.history.len() > max {
            let drain_end = state.history.len() - max;
            state.history.drain(..drain_end);
        }
        Ok(())
    }

    /// Stream one completion, forwarding deltas as non-final text chunks.
    /// Returns the full reply text.
    async fn generate(
        &self,
        session: SessionId,
        user_input: &str,
        out: &mpsc::Sender<Frame>,
    ) -> Result<String> {
        let messages = self.request_messages(session, user_input)?;
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });

        let started = Instant::now();
        let mut request = self.client.post(&self.url).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| EngineError::Handler(format!("chat completions request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(EngineError::Handler(format!(
                "chat completions returned {}",
                response.status()
            )));
        }

        let mut stream = response.bytes_stream();
        let mut lines = LineBuffer::new();
        let mut reply = String::new();
        let mut done = false;

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| EngineError::Handler(format!("stream read failed: {e}")))?;

            for line in lines.push(&chunk) {
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    done = true;
                    break;
                }
                let event: serde_json::Value = serde_json::from_str(data)
                    .map_err(|e| EngineError::Handler(format!("bad SSE event: {e}")))?;
                if let Some(content) = event["choices"][0]["delta"]["content"].as_str() {
                    if !content.is_empty() {
                        reply.push_str(content);
                        out.send(Frame::Text(TextChunk {
                            text: content.to_owned(),
                            is_final: false,
                        }))
                        .await
                        .map_err(|_| EngineError::Channel("llm output closed".to_owned()))?;
                    }
                }
                if event["choices"][0]["finish_reason"].as_str() == Some("stop") {
                    done = true;
                    break;
                }
            }
            if done {
                break;
            }
        }

        info!(
            %session,
            chars = reply.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "completion finished"
        );
        Ok(reply)
    }
}

#[async_trait]
impl Handler for OpenAiChatLlm {
    fn descriptor(&self) -> HandlerDescriptor {
        HandlerDescriptor {
            capability: Capability::Llm,
            inputs: &[FrameKind::Text],
            output: FrameKind::Text,
        }
    }

    async fn process(
        &self,
        session: SessionId,
        input: Frame,
        out: &mpsc::Sender<Frame>,
    ) -> Result<()> {
        let Frame::Text(chunk) = input else {
            return Err(EngineError::Handler("llm expects text".to_owned()));
        };

        let user_input = {
            let mut sessions = self
                .sessions
                .lock()
                .map_err(|_| EngineError::Handler("llm state poisoned".to_owned()))?;
            let state = sessions.entry(session).or_default();
            if !state.pending.is_empty() && !chunk.text.is_empty() {
                state.pending.push(' ');
            }
            state.pending.push_str(chunk.text.trim());
            if !chunk.is_final {
                return Ok(());
            }
            std::mem::take(&mut state.pending)
        };
        if user_input.is_empty() {
            return Ok(());
        }

        debug!(%session, "generating reply to: {user_input}");
        let reply = self.generate(session, &user_input, out).await?;
        self.record_turn(session, &user_input, &reply)?;

        // End-of-response marker for downstream stages.
        out.send(Frame::Text(TextChunk {
            text: String::new(),
            is_final: true,
        }))
        .await
        .map_err(|_| EngineError::Channel("llm output closed".to_owned()))
    }

    async fn finish(&self, session: SessionId, _out: &mpsc::Sender<Frame>) -> Result<()> {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(&session);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse_body(deltas: &[&str]) -> String {
        let mut body = String::new();
        for delta in deltas {
            body.push_str(&format!(
                "data: {}\n\n",
                serde_json::json!({"choices": [{"delta": {"content": delta}}]})
            ));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    async fn handler_for(server: &MockServer) -> Arc<dyn Handler> {
        let table: toml::Table = format!("api_url = \"{}\"", server.uri()).parse().unwrap();
        let ctx = FactoryContext {
            name: "llm",
            model_root: std::path::Path::new("models"),
            params: &table,
        };
        factory(&ctx).unwrap()
    }

    #[tokio::test]
    async fn streams_deltas_then_final_marker() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&["Hel", "lo!"])))
            .mount(&server)
            .await;

        let llm = handler_for(&server).await;
        let (tx, mut rx) = mpsc::channel(16);
        llm.process(SessionId(1), Frame::Text(TextChunk::whole("hi")), &tx)
            .await
            .unwrap();

        let mut text = String::new();
        let mut saw_final = false;
        while let Ok(Frame::Text(chunk)) = rx.try_recv() {
            text.push_str(&chunk.text);
            saw_final |= chunk.is_final;
        }
        assert_eq!(text, "Hello!");
        assert!(saw_final);
    }

    #[tokio::test]
    async fn second_turn_carries_history() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&["ok"])))
            .mount(&server)
            .await;

        let llm = handler_for(&server).await;
        let (tx, mut rx) = mpsc::channel(16);
        llm.process(SessionId(7), Frame::Text(TextChunk::whole("first")), &tx)
            .await
            .unwrap();
        llm.process(SessionId(7), Frame::Text(TextChunk::whole("second")), &tx)
            .await
            .unwrap();
        while rx.try_recv().is_ok() {}

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        let second: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
        let roles: Vec<&str> = second["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        // system, first user turn, assistant reply, second user turn
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
    }

    #[tokio::test]
    async fn server_error_is_a_handler_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let llm = handler_for(&server).await;
        let (tx, _rx) = mpsc::channel(16);
        let err = llm
            .process(SessionId(2), Frame::Text(TextChunk::whole("hi")), &tx)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Handler(_)));
    }

    #[test]
    fn missing_api_url_fails_factory() {
        let table = toml::Table::new();
        let ctx = FactoryContext {
            name: "llm",
            model_root: std::path::Path::new("models"),
            params: &table,
        };
        let err = factory(&ctx).unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameter { .. }));
    }

    #[test]
    fn multibyte_character_split_across_chunks_decodes_intact() {
        let mut lines = LineBuffer::new();
        let bytes = "data: caf\u{e9}\n".as_bytes();
        // Split inside the two-byte character, as a TCP chunk boundary may.
        let split = bytes.len() - 2;
        assert!(lines.push(&bytes[..split]).is_empty());
        assert_eq!(lines.push(&bytes[split..]), vec!["data: caf\u{e9}"]);
    }

    #[test]
    fn line_buffer_yields_every_complete_line() {
        let mut lines = LineBuffer::new();
        assert_eq!(lines.push(b"data: a\n\ndata: b\ndata: c"), vec!["data: a", "", "data: b"]);
        assert_eq!(lines.push(b"\n"), vec!["data: c"]);
    }

    #[test]
    fn v1_suffix_is_not_doubled() {
        let table: toml::Table = "api_url = \"http://localhost:11434/v1\"".parse().unwrap();
        let ctx = FactoryContext {
            name: "llm",
            model_root: std::path::Path::new("models"),
            params: &table,
        };
        // Construction succeeding is enough; the URL is private. The SSE
        // tests above cover the bare-URL case end to end.
        assert!(factory(&ctx).is_ok());
    }
}
