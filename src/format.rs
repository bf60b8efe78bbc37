//! Render answers in the client's requested format.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::Serialize;

use crate::error::ProxyError;

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    Json,
    Xml,
    Csv,
    #[default]
    Text,
}

impl OutputFormat {
    /// Parse a MIME type (parameters ignored) or short name.
    pub fn parse(value: &str) -> Option<Self> {
        let essence = value.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            "application/json" | "json" => Some(Self::Json),
            "application/xml" | "text/xml" | "xml" => Some(Self::Xml),
            "text/csv" | "application/csv" | "csv" => Some(Self::Csv),
            "text/plain" | "text" | "txt" | "plain" => Some(Self::Text),
            _ => None,
        }
    }

    /// First recognized entry of an `Accept` header.
    pub fn from_accept(header: &str) -> Option<Self> {
        header.split(',').find_map(Self::parse)
    }

    /// Explicit `format` parameter first, then `Accept`, then plain text.
    pub fn negotiate(requested: Option<&str>, accept: Option<&str>) -> Self {
        requested
            .and_then(Self::parse)
            .or_else(|| accept.and_then(Self::from_accept))
            .unwrap_or_default()
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Xml => "application/xml",
            Self::Csv => "text/csv; charset=utf-8",
            Self::Text => "text/plain; charset=utf-8",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Xml => "xml",
            Self::Csv => "csv",
            Self::Text => "text",
        }
    }
}

#[derive(Serialize)]
struct JsonAnswer<'a> {
    prompt: &'a str,
    response: &'a str,
    created: String,
}

/// Render `text` (the answer to `prompt`) as a body plus its content type.
pub fn render(
    text: &str,
    prompt: &str,
    format: OutputFormat,
) -> Result<(String, &'static str), ProxyError> {
    let body = match format {
        OutputFormat::Json => render_json(text, prompt)?,
        OutputFormat::Xml => render_xml(text, prompt)?,
        OutputFormat::Csv => render_csv(text, prompt),
        OutputFormat::Text => text.to_string(),
    };
    Ok((body, format.content_type()))
}

fn render_json(text: &str, prompt: &str) -> Result<String, ProxyError> {
    let answer = JsonAnswer {
        prompt,
        response: text,
        created: chrono::Utc::now().to_rfc3339(),
    };
    serde_json::to_string(&answer)
        .map_err(|e| ProxyError::Internal(format!("failed to encode JSON: {e}")))
}

fn render_xml(text: &str, prompt: &str) -> Result<String, ProxyError> {
    let mut writer = Writer::new(Vec::new());

    let events = [
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
        Event::Start(BytesStart::new("response")),
        Event::Start(BytesStart::new("prompt")),
        Event::Text(BytesText::new(prompt)),
        Event::End(BytesEnd::new("prompt")),
        Event::Start(BytesStart::new("text")),
        Event::Text(BytesText::new(text)),
        Event::End(BytesEnd::new("text")),
        Event::End(BytesEnd::new("response")),
    ];
    for event in events {
        writer
            .write_event(event)
            .map_err(|e| ProxyError::Internal(format!("failed to write XML: {e}")))?;
    }

    String::from_utf8(writer.into_inner())
        .map_err(|e| ProxyError::Internal(format!("XML output is not UTF-8: {e}")))
}

fn render_csv(text: &str, prompt: &str) -> String {
    format!("prompt,response\r\n{},{}\r\n", csv_field(prompt), csv_field(text))
}

/// Quote a field when it holds a delimiter, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_mime_types_and_short_names() {
        assert_eq!(OutputFormat::parse("application/json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::parse("JSON"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::parse("text/xml"), Some(OutputFormat::Xml));
        assert_eq!(OutputFormat::parse("text/csv; charset=utf-8"), Some(OutputFormat::Csv));
        assert_eq!(OutputFormat::parse("txt"), Some(OutputFormat::Text));
        assert_eq!(OutputFormat::parse("text/html"), None);
    }

    #[test]
    fn explicit_format_beats_accept_header() {
        assert_eq!(
            OutputFormat::negotiate(Some("xml"), Some("application/json")),
            OutputFormat::Xml
        );
        assert_eq!(
            OutputFormat::negotiate(None, Some("text/html, application/json;q=0.9")),
            OutputFormat::Json
        );
        assert_eq!(OutputFormat::negotiate(Some("yaml"), Some("*/*")), OutputFormat::Text);
        assert_eq!(OutputFormat::negotiate(None, None), OutputFormat::Text);
    }

    #[test]
    fn renders_plain_text_verbatim() {
        let (body, content_type) = render("Hi <there>", "q", OutputFormat::Text).unwrap();
        assert_eq!(body, "Hi <there>");
        assert_eq!(content_type, "text/plain; charset=utf-8");
    }

    #[test]
    fn renders_json_object() {
        let (body, content_type) = render("Paris", "Capital of France?", OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert_eq!(content_type, "application/json");
        assert_eq!(value["prompt"], "Capital of France?");
        assert_eq!(value["response"], "Paris");
        assert!(chrono::DateTime::parse_from_rfc3339(value["created"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn renders_escaped_xml() {
        let (body, content_type) = render("a < b & c", "compare", OutputFormat::Xml).unwrap();
        assert_eq!(content_type, "application/xml");
        assert_eq!(
            body,
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><response><prompt>compare</prompt><text>a &lt; b &amp; c</text></response>"
        );
    }

    #[test]
    fn renders_csv_with_quoting() {
        let (body, content_type) =
            render("line one\nsaid \"hi\"", "plain, with comma", OutputFormat::Csv).unwrap();
        assert_eq!(content_type, "text/csv; charset=utf-8");
        assert_eq!(
            body,
            "prompt,response\r\n\"plain, with comma\",\"line one\nsaid \"\"hi\"\"\"\r\n"
        );
    }

    #[test]
    fn csv_leaves_simple_fields_unquoted() {
        let (body, _) = render("fine", "simple", OutputFormat::Csv).unwrap();
        assert_eq!(body, "prompt,response\r\nsimple,fine\r\n");
    }
}
