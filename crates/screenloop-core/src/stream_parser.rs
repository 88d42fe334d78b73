//! Agent stream event decoding for `--output-format stream-json` output.
//!
//! The agent emits newline-delimited JSON records. Each line decodes into one
//! [`AgentEvent`]; lines that are not JSON at all become
//! [`AgentEvent::Unparseable`] instead of an error, so a noisy stream can
//! never abort an iteration.

use crate::text::truncate_with_ellipsis;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Deserializer};

/// Maximum characters of a tool-use input shown on the console.
pub const TOOL_INPUT_PREVIEW_CHARS: usize = 200;

/// Maximum characters of a result text shown on the console.
pub const RESULT_PREVIEW_CHARS: usize = 500;

/// One decoded line of agent output.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// An assistant turn with its text and tool-use blocks.
    AssistantMessage { content: Vec<ContentBlock> },
    /// The final record of an agent run.
    Result(ResultEvent),
    /// Valid JSON of any other kind (system, user, unknown types).
    Other,
    /// Not valid JSON.
    Unparseable,
}

/// A content block inside an assistant message.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text(String),
    ToolUse {
        name: String,
        input: serde_json::Value,
    },
}

/// Payload of a `result` record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultEvent {
    pub result: Option<String>,
    pub cost_usd: Option<f64>,
    pub duration_ms: Option<u64>,
}

/// Console projection of an event.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayLine {
    /// Assistant prose.
    Dialogue(String),
    /// Tool invocation with a bounded argument preview.
    ToolCall { name: String, input_preview: String },
    /// Final result text, truncated.
    Result(String),
    /// Cost and duration of a run that produced no result text.
    Metrics {
        cost_usd: f64,
        duration_ms: Option<u64>,
    },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawEvent {
    Assistant {
        #[serde(default)]
        message: Option<RawMessage>,
    },
    Result {
        #[serde(default)]
        result: Option<String>,
        #[serde(default, deserialize_with = "lenient")]
        cost_usd: Option<f64>,
        #[serde(default, deserialize_with = "lenient")]
        total_cost_usd: Option<f64>,
        #[serde(default, deserialize_with = "lenient")]
        duration_ms: Option<u64>,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    content: Vec<RawBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

/// Metrics of an unexpected type decode as absent rather than failing the
/// whole record, which would lose its result text.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

impl From<RawEvent> for AgentEvent {
    fn from(raw: RawEvent) -> Self {
        match raw {
            RawEvent::Assistant { message } => {
                let content = message
                    .map(|m| m.content)
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|block| match block {
                        RawBlock::Text { text } => Some(ContentBlock::Text(text)),
                        RawBlock::ToolUse { name, input } => {
                            Some(ContentBlock::ToolUse { name, input })
                        }
                        RawBlock::Other => None,
                    })
                    .collect();
                AgentEvent::AssistantMessage { content }
            }
            RawEvent::Result {
                result,
                cost_usd,
                total_cost_usd,
                duration_ms,
            } => AgentEvent::Result(ResultEvent {
                result,
                cost_usd: cost_usd.or(total_cost_usd),
                duration_ms,
            }),
            RawEvent::Other => AgentEvent::Other,
        }
    }
}

/// Stateless decoder for agent output lines.
pub struct EventStreamParser;

impl EventStreamParser {
    /// Decodes one line. Never fails: non-JSON input yields `Unparseable`.
    pub fn parse(line: &str) -> AgentEvent {
        match serde_json::from_str::<RawEvent>(line) {
            Ok(raw) => raw.into(),
            // Valid JSON whose shape we don't model is still a structured record.
            Err(_) if serde_json::from_str::<IgnoredAny>(line).is_ok() => AgentEvent::Other,
            Err(_) => AgentEvent::Unparseable,
        }
    }
}

impl AgentEvent {
    /// Text that counts toward completion-marker detection.
    ///
    /// Assistant text blocks are concatenated; tool-use blocks contribute
    /// nothing. A result record contributes its result text.
    pub fn extracted_text(&self) -> String {
        match self {
            AgentEvent::AssistantMessage { content } => content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text(text) => Some(text.as_str()),
                    ContentBlock::ToolUse { .. } => None,
                })
                .collect(),
            AgentEvent::Result(result) => result.result.clone().unwrap_or_default(),
            AgentEvent::Other | AgentEvent::Unparseable => String::new(),
        }
    }

    /// Human-readable lines for the console. Empty for other kinds.
    pub fn render(&self) -> Vec<DisplayLine> {
        match self {
            AgentEvent::AssistantMessage { content } => content
                .iter()
                .map(|block| match block {
                    ContentBlock::Text(text) => DisplayLine::Dialogue(text.clone()),
                    ContentBlock::ToolUse { name, input } => DisplayLine::ToolCall {
                        name: name.clone(),
                        input_preview: truncate_with_ellipsis(
                            &input.to_string(),
                            TOOL_INPUT_PREVIEW_CHARS,
                        ),
                    },
                })
                .collect(),
            AgentEvent::Result(result) => match (&result.result, result.cost_usd) {
                (Some(text), _) if !text.is_empty() => {
                    vec![DisplayLine::Result(truncate_with_ellipsis(
                        text,
                        RESULT_PREVIEW_CHARS,
                    ))]
                }
                (_, Some(cost_usd)) => vec![DisplayLine::Metrics {
                    cost_usd,
                    duration_ms: result.duration_ms,
                }],
                _ => Vec::new(),
            },
            AgentEvent::Other | AgentEvent::Unparseable => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assistant_text_and_tool_use() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Reading"},{"type":"tool_use","id":"t1","name":"Read","input":{"file_path":"src/lib.rs"}}]}}"#;

        let event = EventStreamParser::parse(line);

        let AgentEvent::AssistantMessage { content } = &event else {
            panic!("expected assistant message, got {event:?}");
        };
        assert_eq!(content.len(), 2);
        assert_eq!(content[0], ContentBlock::Text("Reading".into()));
        match &content[1] {
            ContentBlock::ToolUse { name, input } => {
                assert_eq!(name, "Read");
                assert_eq!(input["file_path"], "src/lib.rs");
            }
            ContentBlock::Text(_) => panic!("expected tool use"),
        }
    }

    #[test]
    fn test_unknown_content_blocks_are_dropped() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"thinking","thinking":"hmm"},{"type":"text","text":"ok"}]}}"#;

        assert_eq!(
            EventStreamParser::parse(line),
            AgentEvent::AssistantMessage {
                content: vec![ContentBlock::Text("ok".into())]
            }
        );
    }

    #[test]
    fn test_parse_result_with_either_cost_field() {
        let legacy = r#"{"type":"result","result":"done","cost_usd":0.5,"duration_ms":1200}"#;
        let current = r#"{"type":"result","subtype":"success","total_cost_usd":0.25,"duration_ms":900,"is_error":false}"#;

        assert_eq!(
            EventStreamParser::parse(legacy),
            AgentEvent::Result(ResultEvent {
                result: Some("done".into()),
                cost_usd: Some(0.5),
                duration_ms: Some(1200),
            })
        );
        assert_eq!(
            EventStreamParser::parse(current),
            AgentEvent::Result(ResultEvent {
                result: None,
                cost_usd: Some(0.25),
                duration_ms: Some(900),
            })
        );
    }

    #[test]
    fn test_bad_metric_types_keep_result_text() {
        let line = r#"{"type":"result","result":"ok <promise>COMPLETE</promise>","duration_ms":1234.5,"cost_usd":"free"}"#;

        let event = EventStreamParser::parse(line);

        assert_eq!(
            event,
            AgentEvent::Result(ResultEvent {
                result: Some("ok <promise>COMPLETE</promise>".into()),
                cost_usd: None,
                duration_ms: None,
            })
        );
        assert!(event.extracted_text().contains("<promise>COMPLETE</promise>"));
    }

    #[test]
    fn test_other_json_is_not_unparseable() {
        assert_eq!(
            EventStreamParser::parse(r#"{"type":"system","session_id":"abc"}"#),
            AgentEvent::Other
        );
        assert_eq!(EventStreamParser::parse(r#"{"no_type":true}"#), AgentEvent::Other);
        assert_eq!(EventStreamParser::parse("[1, 2, 3]"), AgentEvent::Other);
        assert_eq!(EventStreamParser::parse("42"), AgentEvent::Other);
    }

    #[test]
    fn test_non_json_is_unparseable() {
        assert_eq!(EventStreamParser::parse(""), AgentEvent::Unparseable);
        assert_eq!(EventStreamParser::parse("   "), AgentEvent::Unparseable);
        assert_eq!(
            EventStreamParser::parse("Error: something went wrong"),
            AgentEvent::Unparseable
        );
        assert_eq!(EventStreamParser::parse("{not json}"), AgentEvent::Unparseable);
        assert_eq!(
            EventStreamParser::parse(r#"{"type":"assistant""#),
            AgentEvent::Unparseable
        );
    }

    #[test]
    fn test_extracted_text_skips_tool_use() {
        let event = AgentEvent::AssistantMessage {
            content: vec![
                ContentBlock::Text("<promise>".into()),
                ContentBlock::ToolUse {
                    name: "Bash".into(),
                    input: serde_json::json!({"command": "echo COMPLETE"}),
                },
                ContentBlock::Text("COMPLETE</promise>".into()),
            ],
        };

        assert_eq!(event.extracted_text(), "<promise>COMPLETE</promise>");
    }

    #[test]
    fn test_extracted_text_from_result_and_other() {
        let result = AgentEvent::Result(ResultEvent {
            result: Some("all done".into()),
            ..ResultEvent::default()
        });

        assert_eq!(result.extracted_text(), "all done");
        assert_eq!(AgentEvent::Result(ResultEvent::default()).extracted_text(), "");
        assert_eq!(AgentEvent::Other.extracted_text(), "");
        assert_eq!(AgentEvent::Unparseable.extracted_text(), "");
    }

    #[test]
    fn test_render_tool_call_preview_is_bounded() {
        let long = "x".repeat(500);
        let event = AgentEvent::AssistantMessage {
            content: vec![ContentBlock::ToolUse {
                name: "Write".into(),
                input: serde_json::json!({ "content": long }),
            }],
        };

        let lines = event.render();

        let [DisplayLine::ToolCall { name, input_preview }] = lines.as_slice() else {
            panic!("expected one tool call line, got {lines:?}");
        };
        assert_eq!(name, "Write");
        assert!(input_preview.ends_with("..."));
        assert_eq!(
            input_preview.chars().count(),
            TOOL_INPUT_PREVIEW_CHARS + 3
        );
    }

    #[test]
    fn test_render_result_prefers_text_over_metrics() {
        let with_text = AgentEvent::Result(ResultEvent {
            result: Some("finished".into()),
            cost_usd: Some(0.1),
            duration_ms: Some(10),
        });
        let metrics_only = AgentEvent::Result(ResultEvent {
            result: None,
            cost_usd: Some(0.1),
            duration_ms: Some(10),
        });

        assert_eq!(
            with_text.render(),
            vec![DisplayLine::Result("finished".into())]
        );
        assert_eq!(
            metrics_only.render(),
            vec![DisplayLine::Metrics {
                cost_usd: 0.1,
                duration_ms: Some(10)
            }]
        );
        assert!(AgentEvent::Result(ResultEvent::default()).render().is_empty());
        assert!(AgentEvent::Other.render().is_empty());
    }
}
