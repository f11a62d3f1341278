//! SSE translation — converts three upstream streaming dialects into a
//! uniform OpenAI `chat.completion.chunk` event stream.
//!
//! OpenAI-compatible upstreams (`openai`, `openrouter`, `dashscope`,
//! `deepseek`, `xai`, `groq`, `anthropic` once schema-translated, plain
//! `google`/`antigravity` are not OpenAI-compatible) are forwarded byte for
//! byte — see [`Dialect::PassThrough`]. Everything else goes through
//! [`StreamTranslator`], which buffers raw bytes, normalizes line endings,
//! slices complete `\n\n`-delimited events, and dispatches each one by
//! shape. The translator never reorders events; it may coalesce one
//! upstream event into several downstream chunks but never the reverse.

use bytes::Bytes;
use serde_json::{json, Value};

/// Which wire dialect an upstream speaks, and therefore how its SSE stream
/// must be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Already OpenAI-shaped SSE; forwarded verbatim.
    PassThrough,
    /// Google/Antigravity `generateContent`/`streamGenerateContent` events.
    Gemini,
    /// Codex's Responses API event stream.
    ResponsesApi,
}

/// Resolve the streaming dialect for a provider id.
pub fn dialect_for(provider_id: &str) -> Dialect {
    match provider_id {
        "google" | "antigravity" => Dialect::Gemini,
        "codex" => Dialect::ResponsesApi,
        _ => Dialect::PassThrough,
    }
}

/// Usage accumulated from a streamed response, for request-stat recording.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// One fully-formed downstream event: either a `data: <json>\n\n` chunk or
/// the terminating `data: [DONE]\n\n` marker.
#[derive(Debug, Clone, PartialEq)]
pub enum Emitted {
    Chunk(Value),
    Done,
}

impl Emitted {
    /// Render as wire-ready SSE bytes.
    pub fn to_sse(&self) -> String {
        match self {
            Self::Chunk(v) => format!("data: {}\n\n", v),
            Self::Done => "data: [DONE]\n\n".to_string(),
        }
    }
}

fn openai_chunk(model: &str, content: &str, finish_reason: Option<&str>) -> Value {
    json!({
        "object": "chat.completion.chunk",
        "model": model,
        "choices": [{
            "index": 0,
            "delta": { "content": content },
            "finish_reason": finish_reason,
        }],
    })
}

fn error_chunk(model: &str, message: &str) -> Value {
    openai_chunk(model, &format!("\n\n[Error: {message}]"), Some("stop"))
}

/// Accumulates raw upstream bytes and emits OpenAI-shaped chunks for
/// dialects that aren't already OpenAI SSE.
pub struct StreamTranslator {
    dialect: Dialect,
    model: String,
    buf: Vec<u8>,
    pub usage: StreamUsage,
    done: bool,
}

impl StreamTranslator {
    pub fn new(dialect: Dialect, model: impl Into<String>) -> Self {
        Self { dialect, model: model.into(), buf: Vec::new(), usage: StreamUsage::default(), done: false }
    }

    /// Feed a chunk of raw upstream bytes, returning every downstream event
    /// that became ready. Call repeatedly as more bytes arrive; call
    /// [`Self::finish`] once the upstream stream ends.
    pub fn push(&mut self, bytes: &Bytes) -> Vec<Emitted> {
        if self.done {
            return Vec::new();
        }
        self.buf.extend_from_slice(bytes);
        self.drain_events()
    }

    pub fn finish(&mut self) -> Vec<Emitted> {
        let mut out = self.drain_events();
        if !self.done {
            out.push(Emitted::Done);
            self.done = true;
        }
        out
    }

    fn drain_events(&mut self) -> Vec<Emitted> {
        let mut out = Vec::new();
        loop {
            // Normalize \r\n -> \n in place before searching for the boundary.
            normalize_crlf(&mut self.buf);
            let boundary = find_double_newline(&self.buf);
            let Some(idx) = boundary else { break };
            let event_bytes: Vec<u8> = self.buf.drain(..idx + 2).collect();
            let event_text = String::from_utf8_lossy(&event_bytes).into_owned();
            self.handle_event(&event_text, &mut out);
            if self.done {
                break;
            }
        }
        out
    }

    fn handle_event(&mut self, event_text: &str, out: &mut Vec<Emitted>) {
        let data: String = event_text
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|v| v.trim_start())
            .collect::<Vec<_>>()
            .join("\n");
        if data.is_empty() {
            return;
        }
        if data == "[DONE]" {
            out.push(Emitted::Done);
            self.done = true;
            return;
        }
        let parsed: Value = match serde_json::from_str(&data) {
            Ok(v) => v,
            Err(_) => return,
        };

        match self.dialect {
            Dialect::PassThrough => {
                // Opportunistic token accounting only; bytes themselves are
                // forwarded by the caller, not re-emitted here.
                if let Some(usage) = parsed.get("usage") {
                    self.accumulate_openai_usage(usage);
                }
            }
            Dialect::Gemini => self.handle_gemini_event(&parsed, out),
            Dialect::ResponsesApi => self.handle_responses_event(&parsed, out),
        }
    }

    fn accumulate_openai_usage(&mut self, usage: &Value) {
        self.usage.prompt_tokens = usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(self.usage.prompt_tokens);
        self.usage.completion_tokens =
            usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(self.usage.completion_tokens);
        self.usage.total_tokens = usage.get("total_tokens").and_then(Value::as_u64).unwrap_or(self.usage.total_tokens);
    }

    fn handle_gemini_event(&mut self, event: &Value, out: &mut Vec<Emitted>) {
        if let Some(err) = event.get("error") {
            let message = err.get("message").and_then(Value::as_str).unwrap_or("upstream error");
            out.push(Emitted::Chunk(error_chunk(&self.model, message)));
            out.push(Emitted::Done);
            self.done = true;
            return;
        }

        let candidates = event.get("candidates").or_else(|| event.pointer("/response/candidates"));
        let Some(candidates) = candidates.and_then(Value::as_array) else { return };

        let mut text = String::new();
        let mut finish_reason: Option<&str> = None;
        for candidate in candidates {
            if let Some(parts) = candidate.pointer("/content/parts").and_then(Value::as_array) {
                for part in parts {
                    if part.get("thoughtSignature").is_some() {
                        continue;
                    }
                    if let Some(t) = part.get("text").and_then(Value::as_str) {
                        text.push_str(t);
                    }
                }
            }
            if let Some(fr) = candidate.get("finishReason").and_then(Value::as_str) {
                finish_reason = Some(fr);
            }
        }

        let is_stop = finish_reason == Some("STOP");
        out.push(Emitted::Chunk(openai_chunk(&self.model, &text, if is_stop { Some("stop") } else { None })));

        if let Some(usage) = event.pointer("/response/usageMetadata") {
            self.usage.prompt_tokens = usage.get("promptTokenCount").and_then(Value::as_u64).unwrap_or_default();
            self.usage.completion_tokens = usage.get("candidatesTokenCount").and_then(Value::as_u64).unwrap_or_default();
            self.usage.total_tokens = usage.get("totalTokenCount").and_then(Value::as_u64).unwrap_or_default();
        }

        if is_stop {
            out.push(Emitted::Done);
            self.done = true;
        }
    }

    fn handle_responses_event(&mut self, event: &Value, out: &mut Vec<Emitted>) {
        let event_type = event.get("type").and_then(Value::as_str).unwrap_or("");

        if event_type == "error" || event_type == "response.failed" || event.get("error").is_some() {
            let message = event
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("upstream error");
            out.push(Emitted::Chunk(error_chunk(&self.model, message)));
            out.push(Emitted::Done);
            self.done = true;
            return;
        }

        match event_type {
            "response.output_text.delta" => {
                if let Some(delta) = event.get("delta").and_then(Value::as_str) {
                    out.push(Emitted::Chunk(openai_chunk(&self.model, delta, None)));
                }
            }
            "response.completed" | "response.done" => {
                if let Some(usage) = event.pointer("/response/usage") {
                    self.usage.prompt_tokens = usage.get("input_tokens").and_then(Value::as_u64).unwrap_or_default();
                    self.usage.completion_tokens = usage.get("output_tokens").and_then(Value::as_u64).unwrap_or_default();
                    self.usage.total_tokens = usage.get("total_tokens").and_then(Value::as_u64).unwrap_or_default();
                }
                out.push(Emitted::Chunk(openai_chunk(&self.model, "", Some("stop"))));
                out.push(Emitted::Done);
                self.done = true;
            }
            _ => {
                // Unknown event types are silently discarded.
            }
        }
    }
}

fn normalize_crlf(buf: &mut Vec<u8>) {
    if !buf.contains(&b'\r') {
        return;
    }
    let mut out = Vec::with_capacity(buf.len());
    let mut i = 0;
    while i < buf.len() {
        if buf[i] == b'\r' && buf.get(i + 1) == Some(&b'\n') {
            out.push(b'\n');
            i += 2;
        } else {
            out.push(buf[i]);
            i += 1;
        }
    }
    *buf = out;
}

fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}
