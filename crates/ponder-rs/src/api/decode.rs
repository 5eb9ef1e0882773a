//! Response decoders for the provider envelopes the backends understand.
//!
//! - [`decode_event_stream`]: server-sent-event bodies from the ChatGLM2
//!   gateway. Only `data:` lines after the `event: finish` marker count.
//! - [`decode_delimited`]: JSON bodies from the GLM3/GLM4 gateway, where the
//!   assistant text sits between two fixed markers.
//! - [`decode_chat_completion`]: OpenAI-style chat completion bodies from the
//!   hosted API and locally served models.
//!
//! The marker-based decoders never fail: a body they cannot read yields an
//! empty segment list and a warning carrying the raw payload.

use crate::UsageInfo;
use crate::error::{DispatchError, Result};
use serde::Deserialize;
use tracing::{trace, warn};

/// Line that opens the useful part of a gateway event stream.
pub const FINISH_EVENT: &str = "event: finish";

/// Prefix of an SSE data line.
pub const DATA_PREFIX: &str = "data: ";

/// Marker introducing the assistant content in a GLM chat envelope.
pub const CONTENT_OPEN: &str = "\"content\":\"";

/// Marker terminating the assistant content in a GLM chat envelope.
pub const CONTENT_CLOSE: &str = "\",\"role\":\"assistant\"";

/// Which decoder a gateway payload variant needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
    /// `event:` / `data:` stream (ChatGLM2).
    EventStream,
    /// Chat envelope returned for GLM4 models.
    DelimitedA,
    /// Chat envelope returned for GLM3 models. Same markers as `DelimitedA`.
    DelimitedB,
}

impl Envelope {
    pub fn decode(self, raw: &str) -> Vec<String> {
        match self {
            Envelope::EventStream => decode_event_stream(raw),
            Envelope::DelimitedA | Envelope::DelimitedB => decode_delimited(raw),
        }
    }
}

/// Split text into newline-delimited segments. Empty text has no segments.
pub fn split_lines(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    text.split('\n').map(str::to_string).collect()
}

/// Extract data payloads that follow the `event: finish` line.
pub fn decode_event_stream(raw: &str) -> Vec<String> {
    let mut extracted = Vec::new();
    let mut after_finish = false;

    for line in raw.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with(FINISH_EVENT) {
            after_finish = true;
        } else if after_finish
            && let Some(payload) = line.strip_prefix(DATA_PREFIX)
            && !payload.is_empty()
        {
            extracted.push(payload.to_string());
        }
    }

    if !after_finish {
        warn!("event stream has no `{FINISH_EVENT}` marker; raw payload: {raw}");
    }
    extracted
}

/// Extract the assistant content between [`CONTENT_OPEN`] and
/// [`CONTENT_CLOSE`] and split it into lines.
pub fn decode_delimited(raw: &str) -> Vec<String> {
    let Some((_, rest)) = raw.split_once(CONTENT_OPEN) else {
        warn!("reply has no content marker; raw payload: {raw}");
        return Vec::new();
    };
    let Some((content, _)) = rest.split_once(CONTENT_CLOSE) else {
        warn!("reply content is not terminated; raw payload: {raw}");
        return Vec::new();
    };
    split_lines(&unescape_json_fragment(content))
}

/// Resolve JSON string escapes (`\n`, `\"`, `\uXXXX`) in a fragment cut
/// out of a JSON document. Falls back to the raw fragment.
fn unescape_json_fragment(fragment: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{fragment}\"")).unwrap_or_else(|e| {
        trace!("content fragment is not a valid JSON string ({e}); using it verbatim");
        fragment.to_string()
    })
}

// ── Chat completion envelope ───────────────────────────────────────

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

/// Decoded chat completion: one content string per returned choice.
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub contents: Vec<String>,
    pub usage: Option<UsageInfo>,
}

/// Parse an OpenAI-style chat completion body.
pub fn decode_chat_completion(text: &str) -> Result<ChatCompletion> {
    let parsed: RawChatResponse = serde_json::from_str(text)
        .map_err(|e| DispatchError::decode(format!("invalid chat completion JSON: {e}")))?;

    if let Some(err) = parsed.error {
        return Err(DispatchError::decode(format!("provider error: {}", err.message)));
    }

    let choices = parsed
        .choices
        .filter(|c| !c.is_empty())
        .ok_or_else(|| DispatchError::decode("response has no choices"))?;

    Ok(ChatCompletion {
        contents: choices
            .into_iter()
            .map(|c| c.message.content.unwrap_or_default())
            .collect(),
        usage: parsed.usage,
    })
}
