//! Request body for the Responses API.

use serde::Serialize;

use crate::capabilities::ModelCapabilities;

/// Hosted tool type used for web search.
pub const WEB_SEARCH_TOOL: &str = "web_search_preview";

/// Optional payload fields that adaptive retry may strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionalField {
    Temperature,
    /// `tools` together with its `tool_choice`.
    Tools,
}

impl OptionalField {
    pub const ALL: [OptionalField; 2] = [OptionalField::Temperature, OptionalField::Tools];

    pub fn name(self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Tools => "tools",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Tool {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

/// Submission payload. Unset optional fields are omitted from the JSON.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Payload {
    pub model: String,
    pub input: String,
    pub max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<&'static str>,
}

impl Payload {
    /// Build the payload for `model` given what it is known to accept.
    pub fn build(
        model: &str,
        input: String,
        web_search: bool,
        capabilities: ModelCapabilities,
        max_output_tokens: u32,
        temperature: f32,
    ) -> Self {
        let with_tools = web_search && capabilities.supports_web_search;
        if web_search && !with_tools {
            tracing::debug!(model, "web search requested but not supported, omitting tools");
        }

        Self {
            model: model.to_string(),
            input,
            max_output_tokens,
            temperature: capabilities.supports_temperature.then_some(temperature),
            tools: with_tools.then(|| vec![Tool { kind: WEB_SEARCH_TOOL }]),
            tool_choice: with_tools.then_some("auto"),
        }
    }

    pub fn has(&self, field: OptionalField) -> bool {
        match field {
            OptionalField::Temperature => self.temperature.is_some(),
            OptionalField::Tools => self.tools.is_some() || self.tool_choice.is_some(),
        }
    }

    /// Remove `field`. Returns false when it was not set.
    pub fn strip(&mut self, field: OptionalField) -> bool {
        if !self.has(field) {
            return false;
        }
        match field {
            OptionalField::Temperature => self.temperature = None,
            OptionalField::Tools => {
                self.tools = None;
                self.tool_choice = None;
            }
        }
        true
    }
}

/// Join the system and user prompts into the single `input` string.
pub fn combine_prompts(system_prompt: &str, user_prompt: &str) -> String {
    let system_prompt = system_prompt.trim();
    if system_prompt.is_empty() {
        user_prompt.to_string()
    } else {
        format!("{system_prompt}\n\n{user_prompt}")
    }
}
