//! Capability seams between the pipeline and its external collaborators.
//! Production implementations wrap the storage and provider crates; tests
//! substitute deterministic fakes.

use async_trait::async_trait;
use chessmate_providers::{AgentError, AgentReply, agent, embedding};
use chessmate_storage::{
	db::Db,
	games,
	models::{GameDetail, GameQuery, GameSummary},
	qdrant::{SearchFilter, VectorHit, VectorStore},
};

use crate::{Error, Result};

#[async_trait]
pub trait GameSearch: Send + Sync {
	async fn search_games(&self, query: &GameQuery) -> Result<Vec<GameSummary>>;
	async fn games_with_pgn(&self, ids: &[i64]) -> Result<Vec<GameDetail>>;
}

#[async_trait]
pub trait VectorSearch: Send + Sync {
	async fn search(
		&self,
		vector: Vec<f32>,
		filter: &SearchFilter,
		limit: u64,
	) -> Result<Vec<VectorHit>>;
}

#[async_trait]
pub trait QueryEmbedder: Send + Sync {
	async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
}

#[async_trait]
pub trait AgentClient: Send + Sync {
	async fn evaluate(&self, prompt: &str) -> std::result::Result<AgentReply, AgentError>;
}

#[async_trait]
impl GameSearch for Db {
	async fn search_games(&self, query: &GameQuery) -> Result<Vec<GameSummary>> {
		Ok(games::search_games(&self.pool, query).await?)
	}

	async fn games_with_pgn(&self, ids: &[i64]) -> Result<Vec<GameDetail>> {
		Ok(games::fetch_games_with_pgn(&self.pool, ids).await?)
	}
}

#[async_trait]
impl VectorSearch for VectorStore {
	async fn search(
		&self,
		vector: Vec<f32>,
		filter: &SearchFilter,
		limit: u64,
	) -> Result<Vec<VectorHit>> {
		VectorStore::search(self, vector, filter, limit)
			.await
			.map_err(|err| Error::Unavailable(err.to_string()))
	}
}

/// Embeds query text through the configured embedding provider.
pub struct HttpQueryEmbedder {
	pub cfg: chessmate_config::Embedding,
}
#[async_trait]
impl QueryEmbedder for HttpQueryEmbedder {
	async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
		let mut vectors = embedding::embed(&self.cfg, std::slice::from_ref(&text.to_string()))
			.await
			.map_err(|err| Error::Unavailable(err.to_string()))?;

		vectors
			.pop()
			.ok_or_else(|| Error::Unavailable("embedder returned no vectors".to_string()))
	}
}

/// Offline stand-in: buckets each keyword into one of eight dimensions and
/// L2-normalizes. Deliberately shaped like a vector so the executor code
/// path does not care which embedder is wired in.
pub struct HashQueryEmbedder;

impl HashQueryEmbedder {
	pub const DIMENSIONS: usize = 8;
}
#[async_trait]
impl QueryEmbedder for HashQueryEmbedder {
	async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
		let mut vector = vec![0.0_f32; Self::DIMENSIONS];

		for token in text.split_whitespace() {
			let bucket = chessmate_storage::qdrant::stable_point_id(token) as usize
				% Self::DIMENSIONS;

			vector[bucket] += 1.0;
		}

		let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();

		if norm > 0.0 {
			for value in &mut vector {
				*value /= norm;
			}
		}

		Ok(vector)
	}
}

pub struct HttpAgentClient {
	pub cfg: chessmate_config::Agent,
}
#[async_trait]
impl AgentClient for HttpAgentClient {
	async fn evaluate(&self, prompt: &str) -> std::result::Result<AgentReply, AgentError> {
		agent::evaluate(&self.cfg, prompt).await
	}
}
