use std::sync::Arc;

use chessmate_chess::OpeningCatalogue;
use chessmate_service::{
	agent::AgentEvaluator,
	query::QueryPipeline,
	traits::{HashQueryEmbedder, HttpAgentClient, HttpQueryEmbedder, QueryEmbedder},
};
use chessmate_storage::{db::Db, qdrant::VectorStore};

#[derive(Clone)]
pub struct AppState {
	pub pipeline: Arc<QueryPipeline>,
}
impl AppState {
	pub async fn new(cfg: chessmate_config::Config) -> color_eyre::Result<Self> {
		let db = Arc::new(Db::connect(&cfg.database).await?);

		db.ensure_schema().await?;

		let vectors = Arc::new(VectorStore::new(&cfg.qdrant)?);
		// Without an embedder credential the query vector falls back to the
		// keyword-bucket hash.
		let embedder: Arc<dyn QueryEmbedder> = if cfg.embedding.api_key.is_some() {
			Arc::new(HttpQueryEmbedder { cfg: cfg.embedding })
		} else {
			Arc::new(HashQueryEmbedder)
		};
		let agent = cfg.agent.map(|agent_cfg| {
			let client = Arc::new(HttpAgentClient { cfg: agent_cfg.clone() });

			AgentEvaluator::new(agent_cfg, client)
		});
		let pipeline = QueryPipeline {
			games: db,
			vectors,
			embedder,
			agent,
			catalogue: Arc::new(OpeningCatalogue::new()),
		};

		Ok(Self { pipeline: Arc::new(pipeline) })
	}
}
