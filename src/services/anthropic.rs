use anyhow::{anyhow, bail};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use log::{debug, info};
use reqwest::Client;
use serde_json::Value;
use std::collections::VecDeque;

use crate::config::AppConfig;

pub const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Ordered text fragments from the model. An `Err` item ends the sequence
/// abnormally.
pub type FragmentStream = BoxStream<'static, anyhow::Result<String>>;

/// A generative backend. The request is only sent once the stream is polled.
pub trait TextGenerator: Send + Sync {
    fn generate(&self, prompt: String) -> FragmentStream;
}

#[derive(Clone)]
pub struct AnthropicService {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    streaming: bool,
    endpoint: String,
}

impl AnthropicService {
    pub fn new(api_key: String, config: &AppConfig) -> Self {
        AnthropicService {
            client: Client::new(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            streaming: config.streaming,
            endpoint: MESSAGES_URL.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn request_body(&self, prompt: &str, stream: bool) -> Value {
        serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "stream": stream,
            "messages": [
                {
                    "role": "user",
                    "content": prompt,
                }
            ],
        })
    }

    async fn send(&self, prompt: &str, stream: bool) -> anyhow::Result<reqwest::Response> {
        debug!("Sending prompt to Anthropic API (stream: {stream}, model: {})", self.model);

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", self.api_key.to_string())
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(&self.request_body(prompt, stream))
            .send()
            .await
            .map_err(|e| anyhow!("Failed to send message: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Anthropic API returned {status}: {body}");
        }
        Ok(response)
    }

    pub async fn open_stream(&self, prompt: &str) -> anyhow::Result<FragmentStream> {
        let response = self.send(prompt, true).await?;
        let bytes = response
            .bytes_stream()
            .map_err(|e| anyhow!("Failed to process stream: {}", e))
            .boxed();
        Ok(decode_event_stream(bytes).boxed())
    }

    /// Non-streaming request; returns the whole text at once.
    pub async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let response = self.send(prompt, false).await?;
        let parsed: Value = response.json().await?;
        let text = extract_message_text(&parsed)?;
        info!("Received {} chars from non-streaming request", text.len());
        Ok(text)
    }
}

impl TextGenerator for AnthropicService {
    fn generate(&self, prompt: String) -> FragmentStream {
        let service = self.clone();
        if self.streaming {
            stream::once(async move { service.open_stream(&prompt).await })
                .try_flatten()
                .boxed()
        } else {
            // The whole reply arrives as a single fragment.
            stream::once(async move { service.complete(&prompt).await }).boxed()
        }
    }
}

fn extract_message_text(message: &Value) -> anyhow::Result<String> {
    let first = message["content"]
        .as_array()
        .and_then(|blocks| blocks.first())
        .ok_or_else(|| anyhow!("Anthropic response has no content"))?;

    match (first["type"].as_str(), first["text"].as_str()) {
        (Some("text"), Some(text)) => Ok(text.to_string()),
        _ => bail!("Unexpected response type from Anthropic API"),
    }
}

/// Turns the Messages API event stream into text fragments.
///
/// Raw bytes are buffered until a full line is available, so chunk
/// boundaries inside a line or inside a multi-byte character are harmless.
#[derive(Debug, Default)]
pub struct EventDecoder {
    buffer: Vec<u8>,
    stopped: bool,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once `message_stop` has been seen.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<anyhow::Result<String>> {
        self.buffer.extend_from_slice(bytes);

        let mut out = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if self.stopped {
                continue;
            }
            match String::from_utf8(line) {
                Ok(line) => {
                    if let Some(item) = self.decode_line(line.trim()) {
                        out.push(item);
                    }
                }
                Err(e) => out.push(Err(anyhow!("Failed to convert bytes to string: {}", e))),
            }
        }
        out
    }

    fn decode_line(&mut self, line: &str) -> Option<anyhow::Result<String>> {
        let json_str = line.strip_prefix("data:")?.trim_start();
        let parsed: Value = match serde_json::from_str(json_str) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("Skipping unparseable stream line ({e}): {json_str}");
                return None;
            }
        };

        match parsed["type"].as_str() {
            Some("content_block_delta") if parsed["delta"]["type"] == "text_delta" => {
                parsed["delta"]["text"].as_str().map(|text| Ok(text.to_string()))
            }
            Some("message_stop") => {
                debug!("Received message_stop event");
                self.stopped = true;
                None
            }
            Some("error") => {
                let message = parsed["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown error");
                Some(Err(anyhow!("Anthropic stream error: {message}")))
            }
            _ => None,
        }
    }
}

struct DecodeState<B> {
    bytes: BoxStream<'static, anyhow::Result<B>>,
    decoder: EventDecoder,
    ready: VecDeque<anyhow::Result<String>>,
    done: bool,
}

/// Decodes an upstream byte stream. Ends after `message_stop`, after the
/// first error, or with an error if the bytes run out before `message_stop`.
pub fn decode_event_stream<B>(
    bytes: BoxStream<'static, anyhow::Result<B>>,
) -> impl futures::Stream<Item = anyhow::Result<String>> + Send
where
    B: AsRef<[u8]> + Send + 'static,
{
    let state = DecodeState {
        bytes,
        decoder: EventDecoder::new(),
        ready: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.ready.pop_front() {
                if item.is_err() {
                    state.ready.clear();
                    state.done = true;
                }
                return Some((item, state));
            }
            if state.done {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    state.ready.extend(state.decoder.push(chunk.as_ref()));
                    if state.decoder.is_stopped() {
                        state.done = true;
                    }
                }
                Some(Err(e)) => {
                    state.done = true;
                    state.ready.push_back(Err(e));
                }
                None => {
                    state.done = true;
                    if !state.decoder.is_stopped() {
                        state
                            .ready
                            .push_back(Err(anyhow!("Stream closed before message_stop")));
                    }
                }
            }
        }
    })
}
