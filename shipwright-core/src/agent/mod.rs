//! Agent module: spawning coding agents, reading their output, and the
//! templates that tell them what to do

mod backends;
mod output;
mod prompts;
mod result;
mod runtime;
mod spawn;

pub use backends::{Backend, ClaudeBackend};
pub use output::{CollectingHandler, OutputStreamer, StreamHandler, StreamMessage};
pub use prompts::{PromptContext, TemplateName, TemplateSet};
pub use result::{AgentOutput, AgentStatus};
pub use runtime::{AgentRequest, AgentRuntime, CliRuntime, RAW_OUTPUT_FILE};
pub use spawn::AgentHandle;
