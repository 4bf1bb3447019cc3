mod types;

use std::env;

use color_eyre::eyre;

pub use types::{
	Agent, AgentCost, Config, Database, Embedding, Ingest, Qdrant, ReasoningEffort,
};

pub const DEFAULT_MAX_PENDING_EMBEDDINGS: i64 = 250_000;
pub const DEFAULT_EMBED_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_AGENT_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_VECTOR_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_AGENT_MAX_CONCURRENCY: usize = 4;
pub const DEFAULT_AGENT_WEIGHT: f32 = 0.5;
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 16;

/// Assembles the configuration from the process environment.
///
/// `DATABASE_URL` is the only hard requirement; everything else falls back to
/// a default. The agent section exists only when `AGENT_API_KEY` is set.
pub fn load() -> color_eyre::Result<Config> {
	let database = Database {
		url: require("DATABASE_URL")?,
		pool_max_conns: parse_or("CHESSMATE_POOL_MAX_CONNS", 16)?,
	};
	let qdrant = Qdrant {
		url: var("QDRANT_URL").unwrap_or_else(|| "http://127.0.0.1:6334".to_string()),
		collection: var("CHESSMATE_COLLECTION").unwrap_or_else(|| "chessmate_positions".to_string()),
		vector_dim: parse_or("CHESSMATE_VECTOR_DIM", 1_536)?,
		timeout_ms: DEFAULT_VECTOR_TIMEOUT_MS,
	};
	let embedding = Embedding {
		api_base: var("CHESSMATE_EMBED_API_BASE")
			.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
		api_key: var("OPENAI_API_KEY"),
		path: "/embeddings".to_string(),
		model: var("CHESSMATE_EMBED_MODEL")
			.unwrap_or_else(|| "text-embedding-3-small".to_string()),
		dimensions: parse_or("CHESSMATE_VECTOR_DIM", 1_536)?,
		batch_size: DEFAULT_EMBED_BATCH_SIZE,
		timeout_ms: DEFAULT_EMBED_TIMEOUT_MS,
	};
	let ingest = Ingest {
		max_pending_embeddings: parse_or(
			"CHESSMATE_MAX_PENDING_EMBEDDINGS",
			DEFAULT_MAX_PENDING_EMBEDDINGS,
		)?,
	};
	let agent = load_agent()?;
	let cfg = Config { database, qdrant, embedding, ingest, agent };

	validate(&cfg)?;

	Ok(cfg)
}

/// Pool sizing rule: one connection per worker loop, one per HTTP handler,
/// plus two for janitor and admission reads.
pub fn pool_conns_for(workers: u32, http_handlers: u32) -> u32 {
	workers + http_handlers + 2
}

fn load_agent() -> color_eyre::Result<Option<Agent>> {
	let Some(api_key) = var("AGENT_API_KEY") else {
		return Ok(None);
	};
	let reasoning_effort = match var("AGENT_REASONING_EFFORT") {
		Some(raw) => ReasoningEffort::parse(&raw).ok_or_else(|| {
			eyre::eyre!("AGENT_REASONING_EFFORT must be one of minimal, low, medium, or high.")
		})?,
		None => ReasoningEffort::Medium,
	};

	Ok(Some(Agent {
		api_base: var("AGENT_API_BASE").unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
		api_key,
		path: "/chat/completions".to_string(),
		model: var("AGENT_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
		reasoning_effort,
		verbosity: var("AGENT_VERBOSITY"),
		max_concurrency: parse_or("AGENT_MAX_CONCURRENCY", DEFAULT_AGENT_MAX_CONCURRENCY)?,
		weight: parse_or("AGENT_WEIGHT", DEFAULT_AGENT_WEIGHT)?,
		cache_capacity: parse_or("AGENT_CACHE_CAPACITY", 0)?,
		timeout_ms: DEFAULT_AGENT_TIMEOUT_MS,
		cost: AgentCost {
			input_per_1k: parse_or("AGENT_COST_INPUT_PER_1K", 0.0)?,
			output_per_1k: parse_or("AGENT_COST_OUTPUT_PER_1K", 0.0)?,
			reasoning_per_1k: parse_or("AGENT_COST_REASONING_PER_1K", 0.0)?,
		},
	}))
}

pub fn validate(cfg: &Config) -> color_eyre::Result<()> {
	if cfg.database.pool_max_conns == 0 {
		return Err(eyre::eyre!("CHESSMATE_POOL_MAX_CONNS must be greater than zero."));
	}
	if cfg.qdrant.vector_dim == 0 {
		return Err(eyre::eyre!("CHESSMATE_VECTOR_DIM must be greater than zero."));
	}
	if cfg.embedding.dimensions != cfg.qdrant.vector_dim {
		return Err(eyre::eyre!("Embedding dimensions must match the vector store dimension."));
	}
	if cfg.embedding.batch_size == 0 || cfg.embedding.batch_size > 16 {
		return Err(eyre::eyre!("Embedding batch size must be between 1 and 16."));
	}
	if let Some(agent) = cfg.agent.as_ref() {
		if agent.max_concurrency == 0 {
			return Err(eyre::eyre!("AGENT_MAX_CONCURRENCY must be greater than zero."));
		}
		if !agent.weight.is_finite() || !(0.0..=1.0).contains(&agent.weight) {
			return Err(eyre::eyre!("AGENT_WEIGHT must be in the range 0.0-1.0."));
		}
	}

	Ok(())
}

fn var(name: &str) -> Option<String> {
	env::var(name).ok().map(|raw| raw.trim().to_string()).filter(|raw| !raw.is_empty())
}

fn require(name: &str) -> color_eyre::Result<String> {
	var(name).ok_or_else(|| eyre::eyre!("{name} must be set."))
}

fn parse_or<T>(name: &str, default: T) -> color_eyre::Result<T>
where
	T: std::str::FromStr,
{
	match var(name) {
		Some(raw) =>
			raw.parse().map_err(|_| eyre::eyre!("{name} has an unparseable value: {raw:?}.")),
		None => Ok(default),
	}
}
