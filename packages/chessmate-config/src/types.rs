use serde::Serialize;

#[derive(Clone, Debug)]
pub struct Config {
	pub database: Database,
	pub qdrant: Qdrant,
	pub embedding: Embedding,
	pub ingest: Ingest,
	pub agent: Option<Agent>,
}

#[derive(Clone, Debug)]
pub struct Database {
	pub url: String,
	pub pool_max_conns: u32,
}

#[derive(Clone, Debug)]
pub struct Qdrant {
	pub url: String,
	pub collection: String,
	pub vector_dim: u32,
	pub timeout_ms: u64,
}

#[derive(Clone, Debug)]
pub struct Embedding {
	pub api_base: String,
	pub api_key: Option<String>,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub batch_size: usize,
	pub timeout_ms: u64,
}

#[derive(Clone, Debug)]
pub struct Ingest {
	/// Admission threshold for the pending embedding queue. Zero or negative
	/// disables the check.
	pub max_pending_embeddings: i64,
}

#[derive(Clone, Debug)]
pub struct Agent {
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub reasoning_effort: ReasoningEffort,
	pub verbosity: Option<String>,
	pub max_concurrency: usize,
	pub weight: f32,
	pub cache_capacity: usize,
	pub timeout_ms: u64,
	pub cost: AgentCost,
}

#[derive(Debug, Clone, Copy)]
pub struct AgentCost {
	pub input_per_1k: f64,
	pub output_per_1k: f64,
	pub reasoning_per_1k: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningEffort {
	Minimal,
	Low,
	Medium,
	High,
}
impl ReasoningEffort {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Minimal => "minimal",
			Self::Low => "low",
			Self::Medium => "medium",
			Self::High => "high",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"minimal" => Some(Self::Minimal),
			"low" => Some(Self::Low),
			"medium" => Some(Self::Medium),
			"high" => Some(Self::High),
			_ => None,
		}
	}
}
