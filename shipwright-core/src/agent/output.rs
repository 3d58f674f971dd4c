//! Output streaming and parsing for Claude Code JSON stream format

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

use crate::{Error, Result};

/// A message from the Claude Code stream-json output
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// System message at the start
    System {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },

    /// Assistant output (text and tool calls)
    Assistant {
        #[serde(default)]
        message: AssistantMessage,
    },

    /// Tool results fed back to the assistant
    User {
        #[serde(default)]
        message: serde_json::Value,
    },

    /// Final result
    Result {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        duration_ms: Option<u64>,
        #[serde(default)]
        total_cost_usd: Option<f64>,
    },
}

/// Assistant message content
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: MessageContent,
}

/// Content is a bare string in older CLI versions and a block list in newer ones
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
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

impl AssistantMessage {
    /// Concatenated text blocks
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    /// Tool calls made in this message
    pub fn tool_uses(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        let blocks: &[ContentBlock] = match &self.content {
            MessageContent::Blocks(blocks) => blocks,
            MessageContent::Text(_) => &[],
        };
        blocks.iter().filter_map(|b| match b {
            ContentBlock::ToolUse { name, input } => Some((name.as_str(), input)),
            _ => None,
        })
    }
}

/// Handler for processing stream messages
pub trait StreamHandler: Send {
    /// Called with every non-empty line before it is parsed
    fn on_raw_line(&mut self, _line: &str) {}

    /// Called when a system message is received
    fn on_system(&mut self, _subtype: Option<&str>, _session_id: Option<&str>) {}

    /// Called when assistant text is received
    fn on_assistant_text(&mut self, text: &str);

    /// Called when the assistant uses a tool
    fn on_tool_use(&mut self, _tool: &str, _input: &serde_json::Value) {}

    /// Called when the stream completes
    fn on_complete(&mut self, _result: Option<&str>, _is_error: bool, _duration_ms: Option<u64>) {}

    /// Called when a parse error occurs (allows handler to skip malformed lines)
    fn on_parse_error(&mut self, _line: &str, _error: &serde_json::Error) {}
}

/// Keeps the raw transcript and the final answer of one invocation
#[derive(Debug, Default)]
pub struct CollectingHandler {
    /// Every line received, for the on-disk transcript
    pub raw_lines: Vec<String>,
    /// Assistant text in arrival order
    pub assistant_text: String,
    /// Text of the final `result` message
    pub result: Option<String>,
    pub is_error: bool,
    pub completed: bool,
    pub tool_uses: usize,
}

impl CollectingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Final answer, falling back to the assistant text when there was no result message
    pub fn final_text(&self) -> &str {
        match &self.result {
            Some(result) if !result.trim().is_empty() => result,
            _ => &self.assistant_text,
        }
    }

    /// Raw transcript in JSONL form
    pub fn transcript(&self) -> String {
        let mut out = self.raw_lines.join("\n");
        if !out.is_empty() {
            out.push('\n');
        }
        out
    }
}

impl StreamHandler for CollectingHandler {
    fn on_raw_line(&mut self, line: &str) {
        self.raw_lines.push(line.to_string());
    }

    fn on_assistant_text(&mut self, text: &str) {
        if !self.assistant_text.is_empty() && !text.is_empty() {
            self.assistant_text.push('\n');
        }
        self.assistant_text.push_str(text);
    }

    fn on_tool_use(&mut self, tool: &str, _input: &serde_json::Value) {
        self.tool_uses += 1;
        debug!(tool, "Agent tool use");
    }

    fn on_complete(&mut self, result: Option<&str>, is_error: bool, duration_ms: Option<u64>) {
        self.result = result.map(str::to_string);
        self.is_error = is_error;
        self.completed = true;
        debug!(is_error, duration_ms, tool_uses = self.tool_uses, "Agent stream complete");
    }

    fn on_parse_error(&mut self, line: &str, error: &serde_json::Error) {
        debug!(%error, len = line.len(), "Skipping unparseable stream line");
    }
}

/// Stream output from a Claude Code process
pub struct OutputStreamer<R> {
    reader: R,
}

impl<R: AsyncBufRead + Unpin> OutputStreamer<R> {
    /// Create a new output streamer over a buffered reader (usually child stdout)
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Stream output, calling the handler for each message
    ///
    /// Returns when the stream ends (process closes stdout)
    pub async fn stream<H: StreamHandler>(&mut self, handler: &mut H) -> Result<()> {
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = self.reader.read_line(&mut line).await.map_err(Error::Io)?;

            if bytes_read == 0 {
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            handler.on_raw_line(trimmed);
            match serde_json::from_str::<StreamMessage>(trimmed) {
                Ok(msg) => Self::dispatch_message(handler, msg),
                Err(e) => handler.on_parse_error(trimmed, &e),
            }
        }

        Ok(())
    }

    fn dispatch_message<H: StreamHandler>(handler: &mut H, msg: StreamMessage) {
        match msg {
            StreamMessage::System {
                subtype,
                session_id,
            } => {
                handler.on_system(subtype.as_deref(), session_id.as_deref());
            }
            StreamMessage::Assistant { message } => {
                for (tool, input) in message.tool_uses() {
                    handler.on_tool_use(tool, input);
                }
                let text = message.text();
                if !text.is_empty() {
                    handler.on_assistant_text(&text);
                }
            }
            StreamMessage::User { .. } => {}
            StreamMessage::Result {
                is_error,
                result,
                duration_ms,
                ..
            } => {
                handler.on_complete(result.as_deref(), is_error, duration_ms);
            }
        }
    }
}
