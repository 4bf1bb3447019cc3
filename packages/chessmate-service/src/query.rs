use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use chessmate_chess::{OpeningCatalogue, normalize};
use chessmate_storage::{
	models::{GameQuery, GameSummary},
	qdrant::{SearchFilter, stable_point_id},
};
use serde::Serialize;

use crate::{
	Error, Result,
	agent::{AgentEvaluator, AgentTotals},
	intent::{self, Plan},
	traits::{GameSearch, QueryEmbedder, VectorSearch},
};

pub const VECTOR_SEARCH_LIMIT: u64 = 100;
pub const VECTOR_WEIGHT: f32 = 0.7;
pub const KEYWORD_WEIGHT: f32 = 0.3;
pub const VECTOR_UNAVAILABLE_WARNING: &str = "Vector search unavailable";

// Ply windows the phase filters translate to on the vector side.
const OPENING_PLIES: (i32, i32) = (1, 20);
const MIDDLEGAME_PLIES: (i32, i32) = (21, 60);
const ENDGAME_PLIES: (i32, i32) = (61, 500);

#[derive(Debug, Clone, Serialize)]
pub struct ScoredResult {
	pub game_id: i64,
	pub white_name: String,
	pub black_name: String,
	pub white_rating: Option<i32>,
	pub black_rating: Option<i32>,
	pub event: Option<String>,
	pub played_on: Option<String>,
	pub result: String,
	pub eco_code: Option<String>,
	pub opening_slug: Option<String>,
	pub opening_name: Option<String>,
	pub vector_score: f32,
	pub keyword_score: f32,
	pub total_score: f32,
	pub agent_score: Option<f32>,
	pub themes: Vec<String>,
	pub explanation: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QueryOutcome {
	pub plan: Plan,
	pub results: Vec<ScoredResult>,
	pub warnings: Vec<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub agent: Option<AgentTotals>,
}

/// The hybrid query pipeline: metadata overfetch, filtered vector lookup,
/// weighted fusion, optional agent re-rank.
pub struct QueryPipeline {
	pub games: Arc<dyn GameSearch>,
	pub vectors: Arc<dyn VectorSearch>,
	pub embedder: Arc<dyn QueryEmbedder>,
	pub agent: Option<AgentEvaluator>,
	pub catalogue: Arc<OpeningCatalogue>,
}
impl QueryPipeline {
	pub async fn run(&self, question: &str) -> Result<QueryOutcome> {
		if question.trim().is_empty() {
			return Err(Error::BadInput("question is empty".to_string()));
		}

		let plan = intent::analyse(&self.catalogue, question);

		self.execute(plan).await
	}

	pub async fn execute(&self, plan: Plan) -> Result<QueryOutcome> {
		let mut warnings = Vec::new();
		// A metadata failure fails the whole query.
		let summaries = self
			.games
			.search_games(&game_query(&plan))
			.await
			.map_err(|err| Error::Unavailable(err.to_string()))?;
		// A vector-side failure only degrades it.
		let hits_by_game = match self.vector_hits(&plan).await {
			Ok(hits) => Some(hits),
			Err(err) => {
				tracing::warn!(error = %err, "Vector search degraded to keyword-only scoring.");
				warnings.push(VECTOR_UNAVAILABLE_WARNING.to_string());

				None
			},
		};
		let mut results = fuse(&plan, summaries, hits_by_game.as_ref());

		results.truncate(plan.limit);

		let agent = match self.agent.as_ref() {
			Some(evaluator) if !results.is_empty() => {
				let ids: Vec<i64> = results.iter().map(|result| result.game_id).collect();
				let details = self.games.games_with_pgn(&ids).await?;
				let pgns: HashMap<i64, String> =
					details.into_iter().map(|detail| (detail.id, detail.pgn)).collect();
				let fingerprint = stable_point_id(&plan.render(&self.catalogue));
				let totals = evaluator
					.evaluate_candidates(&plan, fingerprint, &mut results, &pgns, &mut warnings)
					.await;

				sort_results(&mut results);
				results.truncate(plan.limit);

				Some(totals)
			},
			_ => None,
		};

		Ok(QueryOutcome { plan, results, warnings, agent })
	}

	async fn vector_hits(&self, plan: &Plan) -> Result<HashMap<i64, f32>> {
		let vector = self.embedder.embed_query(&plan.cleaned_text).await?;
		let filter = vector_filter(plan);
		let hits = self.vectors.search(vector, &filter, VECTOR_SEARCH_LIMIT).await?;
		let mut best: HashMap<i64, f32> = HashMap::new();

		for hit in hits {
			let entry = best.entry(hit.game_id).or_insert(hit.score);

			*entry = entry.max(hit.score);
		}

		Ok(best)
	}
}

fn game_query(plan: &Plan) -> GameQuery {
	GameQuery {
		opening_slugs: plan.opening_slugs(),
		eco_ranges: plan.eco_ranges(),
		result: None,
		white_min: plan.rating.white_min.map(|min| min as i32),
		black_min: plan.rating.black_min.map(|min| min as i32),
		max_rating_delta: plan.rating.max_rating_delta.map(|delta| delta as i32),
		limit: plan.limit as i64,
	}
}

fn vector_filter(plan: &Plan) -> SearchFilter {
	let ply_range = plan.phases().first().map(|phase| match *phase {
		"opening" => OPENING_PLIES,
		"middlegame" => MIDDLEGAME_PLIES,
		_ => ENDGAME_PLIES,
	});

	SearchFilter {
		opening_slugs: plan.opening_slugs(),
		result: None,
		white_elo_min: plan.rating.white_min.map(|min| min as i32),
		black_elo_min: plan.rating.black_min.map(|min| min as i32),
		ply_range,
	}
}

/// Weighted fusion over the metadata candidates. `hits_by_game` is `None`
/// when the vector store is down; the weights then collapse to keyword-only
/// and every vector score reads zero.
fn fuse(
	plan: &Plan,
	summaries: Vec<GameSummary>,
	hits_by_game: Option<&HashMap<i64, f32>>,
) -> Vec<ScoredResult> {
	let (vector_weight, keyword_weight) = match hits_by_game {
		Some(_) => (VECTOR_WEIGHT, KEYWORD_WEIGHT),
		None => (0.0, 1.0),
	};
	let mut results: Vec<ScoredResult> = summaries
		.into_iter()
		.map(|summary| {
			let tokens = summary_tokens(&summary);
			let overlap =
				plan.keywords.iter().filter(|keyword| tokens.contains(keyword.as_str())).count();
			let keyword_score = overlap as f32 / plan.keywords.len().max(1) as f32;
			let vector_score = match hits_by_game {
				Some(hits) => match hits.get(&summary.id) {
					Some(score) => score.clamp(0.0, 1.0),
					None => fallback_vector_score(overlap),
				},
				None => 0.0,
			};
			let total_score = vector_weight * vector_score + keyword_weight * keyword_score;

			ScoredResult {
				game_id: summary.id,
				white_name: summary.white_name,
				black_name: summary.black_name,
				white_rating: summary.white_rating,
				black_rating: summary.black_rating,
				event: summary.event,
				played_on: summary.played_on.map(|date| date.to_string()),
				result: summary.result,
				eco_code: summary.eco_code,
				opening_slug: summary.opening_slug,
				opening_name: summary.opening_name,
				vector_score,
				keyword_score,
				total_score,
				agent_score: None,
				themes: Vec::new(),
				explanation: None,
			}
		})
		.collect();

	sort_results(&mut results);

	results
}

/// Heuristic stand-in when a metadata candidate has no vector hit.
fn fallback_vector_score(keyword_overlap: usize) -> f32 {
	(0.5 + 0.01 * keyword_overlap as f32).min(0.7)
}

/// Stable sort: score descending, then most recent, then lowest game id.
pub(crate) fn sort_results(results: &mut [ScoredResult]) {
	results.sort_by(|a, b| {
		cmp_f32_desc(a.total_score, b.total_score)
			.then_with(|| match (&a.played_on, &b.played_on) {
				(Some(left), Some(right)) => right.cmp(left),
				(Some(_), None) => Ordering::Less,
				(None, Some(_)) => Ordering::Greater,
				(None, None) => Ordering::Equal,
			})
			.then_with(|| a.game_id.cmp(&b.game_id))
	});
}

fn cmp_f32_desc(a: f32, b: f32) -> Ordering {
	match (a.is_nan(), b.is_nan()) {
		(true, true) => Ordering::Equal,
		(true, false) => Ordering::Greater,
		(false, true) => Ordering::Less,
		(false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
	}
}

/// Token set a game exposes to keyword matching: player names, opening
/// name, event.
fn summary_tokens(summary: &GameSummary) -> std::collections::HashSet<String> {
	let mut text = String::new();

	text.push_str(&summary.white_name);
	text.push(' ');
	text.push_str(&summary.black_name);

	if let Some(opening_name) = &summary.opening_name {
		text.push(' ');
		text.push_str(opening_name);
	}
	if let Some(event) = &summary.event {
		text.push(' ');
		text.push_str(event);
	}

	normalize(&text).split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
	use async_trait::async_trait;
	use chessmate_storage::models::GameDetail;
	use chessmate_storage::qdrant::VectorHit;

	use super::*;
	use crate::traits::HashQueryEmbedder;

	struct FakeGames {
		summaries: Vec<GameSummary>,
	}
	#[async_trait]
	impl GameSearch for FakeGames {
		async fn search_games(&self, _query: &GameQuery) -> Result<Vec<GameSummary>> {
			Ok(self.summaries.clone())
		}

		async fn games_with_pgn(&self, ids: &[i64]) -> Result<Vec<GameDetail>> {
			Ok(ids.iter().map(|id| GameDetail { id: *id, pgn: "1. e4 1-0".to_string() }).collect())
		}
	}

	struct FailingGames;
	#[async_trait]
	impl GameSearch for FailingGames {
		async fn search_games(&self, _query: &GameQuery) -> Result<Vec<GameSummary>> {
			Err(Error::Unavailable("metadata store is down".to_string()))
		}

		async fn games_with_pgn(&self, _ids: &[i64]) -> Result<Vec<GameDetail>> {
			Err(Error::Unavailable("metadata store is down".to_string()))
		}
	}

	struct FakeVectors {
		hits: Vec<VectorHit>,
	}
	#[async_trait]
	impl VectorSearch for FakeVectors {
		async fn search(
			&self,
			_vector: Vec<f32>,
			_filter: &SearchFilter,
			_limit: u64,
		) -> Result<Vec<VectorHit>> {
			Ok(self.hits.clone())
		}
	}

	struct DownVectors;
	#[async_trait]
	impl VectorSearch for DownVectors {
		async fn search(
			&self,
			_vector: Vec<f32>,
			_filter: &SearchFilter,
			_limit: u64,
		) -> Result<Vec<VectorHit>> {
			Err(Error::Unavailable("connection refused".to_string()))
		}
	}

	fn summary(id: i64, white: &str, black: &str, event: &str) -> GameSummary {
		GameSummary {
			id,
			white_name: white.to_string(),
			black_name: black.to_string(),
			white_rating: Some(2700),
			black_rating: Some(2650),
			event: Some(event.to_string()),
			played_on: None,
			result: "1-0".to_string(),
			eco_code: None,
			opening_slug: None,
			opening_name: None,
		}
	}

	fn pipeline(games: Arc<dyn GameSearch>, vectors: Arc<dyn VectorSearch>) -> QueryPipeline {
		QueryPipeline {
			games,
			vectors,
			embedder: Arc::new(HashQueryEmbedder),
			agent: None,
			catalogue: Arc::new(OpeningCatalogue::new()),
		}
	}

	// Metadata returns A and B; the vector store scores A at 0.9 and some
	// game C at 0.95. Keywords strongly match A and barely B. A must lead
	// with 0.7 * 0.9 + 0.3 * 0.8 and C must not appear at all.
	#[tokio::test]
	async fn fuses_metadata_and_vector_scores() {
		let game_a = summary(
			1,
			"Tal Adams Polgar Shirov",
			"Kasparov",
			"attacking masterpieces collection",
		);
		let game_b = summary(2, "Petrosian", "Smyslov", "candidates");
		let games = Arc::new(FakeGames { summaries: vec![game_a, game_b] });
		let vectors = Arc::new(FakeVectors {
			hits: vec![
				VectorHit { id: 11, score: 0.9, game_id: 1 },
				VectorHit { id: 12, score: 0.95, game_id: 3 },
			],
		});
		let outcome = pipeline(games, vectors)
			.run("find 2 games tal adams polgar shirov petrosian")
			.await
			.expect("query succeeds");

		assert_eq!(outcome.results.len(), 2);
		assert_eq!(outcome.results[0].game_id, 1);
		assert_eq!(outcome.results[1].game_id, 2);
		assert!(outcome.results.iter().all(|result| result.game_id != 3));

		let top = &outcome.results[0];

		assert!((top.vector_score - 0.9).abs() < 1e-6);
		assert!((top.keyword_score - 0.8).abs() < 1e-6);
		assert!((top.total_score - 0.87).abs() < 1e-6);

		let second = &outcome.results[1];

		// No vector hit for B: the capped heuristic stands in.
		assert!((second.vector_score - 0.51).abs() < 1e-6);
		assert!((second.keyword_score - 0.2).abs() < 1e-6);
		assert!(second.total_score < top.total_score);
		assert!(outcome.warnings.is_empty());
	}

	#[tokio::test]
	async fn vector_outage_degrades_to_keyword_only() {
		let games = Arc::new(FakeGames {
			summaries: vec![
				summary(1, "Carlsen", "Nepomniachtchi", "wc match"),
				summary(2, "Ding", "Gukesh", "wc match"),
			],
		});
		let outcome = pipeline(games, Arc::new(DownVectors))
			.run("find 2 carlsen games")
			.await
			.expect("degraded query still succeeds");

		assert!(outcome.warnings.iter().any(|w| w == VECTOR_UNAVAILABLE_WARNING));
		assert!(outcome.results.iter().all(|result| result.vector_score == 0.0));
		assert_eq!(outcome.results[0].game_id, 1);
		assert!(outcome.results[0].total_score > outcome.results[1].total_score);
	}

	#[tokio::test]
	async fn metadata_failure_fails_the_query() {
		let outcome =
			pipeline(Arc::new(FailingGames), Arc::new(DownVectors)).run("any games").await;

		assert!(matches!(outcome, Err(Error::Unavailable(_))));
	}

	#[tokio::test]
	async fn empty_question_is_bad_input() {
		let games = Arc::new(FakeGames { summaries: Vec::new() });
		let outcome = pipeline(games, Arc::new(DownVectors)).run("   ").await;

		assert!(matches!(outcome, Err(Error::BadInput(_))));
	}

	#[tokio::test]
	async fn results_truncate_to_the_plan_limit() {
		let summaries: Vec<GameSummary> = (1..=30)
			.map(|id| summary(id, "White", "Black", "open"))
			.collect();
		let games = Arc::new(FakeGames { summaries });
		let vectors = Arc::new(FakeVectors { hits: Vec::new() });
		let outcome =
			pipeline(games, vectors).run("find 4 games").await.expect("query succeeds");

		assert_eq!(outcome.results.len(), 4);
		// Equal scores: ties break toward the lowest game id.
		assert_eq!(outcome.results[0].game_id, 1);
	}
}
