pub mod agent;
pub mod embedding;

pub use agent::{AgentError, AgentReply, AgentUsage, AgentVerdict};
pub use embedding::EmbedError;
