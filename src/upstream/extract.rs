//! Normalizes provider response bodies into plain text.
//!
//! Each supported body shape is a typed decode, tried in a fixed order:
//!
//! 1. top-level `output_text`
//! 2. `output[]` assistant messages, text parts joined with `\n`
//! 3. `output[]` web search calls with no assistant message (fallback notice)
//! 4. legacy `choices[0].message.content`
//!
//! The first non-empty result wins, so a real answer always beats a tool trace.

use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
struct DirectText {
    output_text: String,
}

#[derive(Deserialize)]
struct OutputList {
    output: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputItem {
    Message {
        #[serde(default)]
        role: String,
        #[serde(default)]
        content: Vec<Value>,
    },
    WebSearchCall {
        #[serde(default)]
        action: Option<SearchAction>,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct SearchAction {
    #[serde(default)]
    query: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    OutputText { text: String },
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct LegacyCompletion {
    choices: Vec<LegacyChoice>,
}

#[derive(Deserialize)]
struct LegacyChoice {
    message: LegacyMessage,
}

#[derive(Deserialize)]
struct LegacyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct JobHeader {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// What the client needs from one response body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseEnvelope {
    /// Job id, present for asynchronous submissions.
    pub id: Option<String>,
    /// Raw job status as reported by the provider.
    pub status: Option<String>,
    /// Extracted text, empty when none was found.
    pub text: String,
}

/// Parse a body into its job header and extracted text.
pub fn parse_envelope(raw: &str) -> ResponseEnvelope {
    let Ok(value) = serde_json::from_str::<Value>(raw) else {
        return ResponseEnvelope::default();
    };

    let header = JobHeader::deserialize(&value).unwrap_or_default();
    ResponseEnvelope {
        id: header.id.filter(|id| !id.is_empty()),
        status: header.status,
        text: extract_from_value(&value),
    }
}

/// Extract the answer text from a raw body; empty when nothing usable exists.
pub fn extract_text(raw: &str) -> String {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => extract_from_value(&value),
        Err(_) => String::new(),
    }
}

fn extract_from_value(value: &Value) -> String {
    if let Ok(direct) = DirectText::deserialize(value) {
        if is_present(&direct.output_text) {
            return direct.output_text;
        }
    }

    if let Ok(list) = OutputList::deserialize(value) {
        let items: Vec<OutputItem> = list
            .output
            .iter()
            .filter_map(|item| OutputItem::deserialize(item).ok())
            .collect();

        if let Some(text) = assistant_text(&items) {
            return text;
        }
        if let Some(text) = web_search_fallback(&items) {
            return text;
        }
    }

    LegacyCompletion::deserialize(value)
        .ok()
        .and_then(|legacy| legacy.choices.into_iter().next())
        .and_then(|choice| choice.message.content)
        .filter(|content| is_present(content))
        .unwrap_or_default()
}

/// Text of every assistant message, or `None` when there is none.
fn assistant_text(items: &[OutputItem]) -> Option<String> {
    let parts: Vec<String> = items
        .iter()
        .filter_map(|item| match item {
            OutputItem::Message { role, content } if role == "assistant" => Some(content),
            _ => None,
        })
        .flatten()
        .filter_map(|part| ContentPart::deserialize(part).ok())
        .filter_map(|part| match part {
            ContentPart::OutputText { text } | ContentPart::Text { text } => Some(text),
            ContentPart::Other => None,
        })
        .filter(|text| is_present(text))
        .collect();

    let text = parts.join("\n");
    is_present(&text).then_some(text)
}

/// Only consulted when no assistant message exists, even an empty one.
fn web_search_fallback(items: &[OutputItem]) -> Option<String> {
    let has_assistant = items
        .iter()
        .any(|item| matches!(item, OutputItem::Message { role, .. } if role == "assistant"));
    if has_assistant {
        return None;
    }

    items
        .iter()
        .rev()
        .find_map(|item| match item {
            OutputItem::WebSearchCall { action: Some(SearchAction { query: Some(query) }) }
                if is_present(query) =>
            {
                Some(query.as_str())
            }
            _ => None,
        })
        .map(|query| {
            format!("Model did not provide a final answer. Last web search: \"{query}\"")
        })
}

fn is_present(text: &str) -> bool {
    !text.trim().is_empty()
}
