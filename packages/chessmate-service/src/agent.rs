use std::{
	collections::HashMap,
	sync::{Arc, Mutex},
	time::{Duration, Instant},
};

use chessmate_providers::{AgentUsage, AgentVerdict};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;

use crate::{intent::Plan, query::ScoredResult, traits::AgentClient};

const ATTEMPTS: u32 = 3;
const BASE_RETRY_DELAY_MS: u64 = 250;
const MAX_PGN_CHARS: usize = 4_000;

/// Per-query aggregate over all agent calls.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AgentTotals {
	pub calls: u64,
	pub cache_hits: u64,
	pub input_tokens: u64,
	pub output_tokens: u64,
	pub reasoning_tokens: u64,
	pub cost_usd: f64,
}

/// Bounded-concurrency re-ranker over the post-fusion top results.
pub struct AgentEvaluator {
	cfg: chessmate_config::Agent,
	client: Arc<dyn AgentClient>,
	semaphore: Arc<Semaphore>,
	cache: Option<Mutex<VerdictCache>>,
}
impl AgentEvaluator {
	pub fn new(cfg: chessmate_config::Agent, client: Arc<dyn AgentClient>) -> Self {
		let semaphore = Arc::new(Semaphore::new(cfg.max_concurrency));
		let cache = (cfg.cache_capacity > 0)
			.then(|| Mutex::new(VerdictCache::new(cfg.cache_capacity)));

		Self { cfg, client, semaphore, cache }
	}

	/// Scores each candidate through the agent and folds the verdicts into
	/// `total_score` as `(1 - w) * total + w * agent`. Failures after the
	/// retry budget leave the candidate's fusion score untouched and add a
	/// warning.
	pub async fn evaluate_candidates(
		&self,
		plan: &Plan,
		plan_fingerprint: u64,
		candidates: &mut [ScoredResult],
		pgns: &HashMap<i64, String>,
		warnings: &mut Vec<String>,
	) -> AgentTotals {
		let mut totals = AgentTotals::default();
		let mut cached = Vec::new();
		let mut pending = Vec::new();

		for (index, candidate) in candidates.iter().enumerate() {
			let key = self.cache_key(plan_fingerprint, candidate.game_id);

			match self.cache_get(&key) {
				Some(verdict) => {
					totals.cache_hits += 1;
					cached.push((index, verdict));
				},
				None => pending.push((
					index,
					key,
					candidate.game_id,
					self.prompt_for(plan, candidate, pgns),
				)),
			}
		}
		for (index, verdict) in cached {
			apply_verdict(&self.cfg, &mut candidates[index], &verdict);
		}

		let calls = pending.into_iter().map(|(index, key, game_id, prompt)| {
			let client = Arc::clone(&self.client);
			let semaphore = Arc::clone(&self.semaphore);

			async move {
				let _permit = semaphore.acquire().await;
				let started = Instant::now();
				let outcome = call_with_retries(client.as_ref(), &prompt, game_id).await;

				(index, key, game_id, started.elapsed(), outcome)
			}
		});

		for (index, key, game_id, latency, outcome) in join_all(calls).await {
			match outcome {
				Ok(reply) => {
					let cost = estimated_cost(&self.cfg.cost, &reply.usage);

					tracing::info!(
						target: "agent-telemetry",
						game_id,
						latency_ms = latency.as_millis() as u64,
						input_tokens = reply.usage.input_tokens,
						output_tokens = reply.usage.output_tokens,
						reasoning_tokens = reply.usage.reasoning_tokens,
						reasoning_effort = self.cfg.reasoning_effort.as_str(),
						estimated_cost = cost,
						"Agent call finished."
					);

					totals.calls += 1;
					totals.input_tokens += reply.usage.input_tokens;
					totals.output_tokens += reply.usage.output_tokens;
					totals.reasoning_tokens += reply.usage.reasoning_tokens;
					totals.cost_usd += cost;

					if reply.malformed {
						warnings.push(format!(
							"Agent returned malformed JSON for game {game_id}; using a neutral score"
						));
					} else {
						self.cache_put(key, reply.verdict.clone());
					}

					apply_verdict(&self.cfg, &mut candidates[index], &reply.verdict);
				},
				Err(err) => {
					warnings.push(format!("Agent evaluation failed for game {game_id}: {err}"));
				},
			}
		}

		totals
	}

	fn prompt_for(
		&self,
		plan: &Plan,
		candidate: &ScoredResult,
		pgns: &HashMap<i64, String>,
	) -> String {
		let filters = plan
			.filters
			.iter()
			.map(|filter| format!("{:?}={}", filter.field, filter.value))
			.collect::<Vec<_>>()
			.join(", ");
		let pgn = pgns.get(&candidate.game_id).map(String::as_str).unwrap_or("");
		let pgn = truncate_pgn(pgn);

		format!(
			"Question: {question}\nFilters: {filters}\nCandidate: {white} vs {black}, \
			 result {result}.\nPGN (may be truncated):\n{pgn}",
			question = plan.cleaned_text,
			filters = if filters.is_empty() { "none".to_string() } else { filters },
			white = candidate.white_name,
			black = candidate.black_name,
			result = candidate.result,
		)
	}

	fn cache_key(&self, plan_fingerprint: u64, game_id: i64) -> CacheKey {
		CacheKey {
			model: self.cfg.model.clone(),
			reasoning_effort: self.cfg.reasoning_effort.as_str(),
			plan_fingerprint,
			game_id,
		}
	}

	fn cache_get(&self, key: &CacheKey) -> Option<AgentVerdict> {
		let cache = self.cache.as_ref()?;
		let mut cache = cache.lock().unwrap_or_else(|err| err.into_inner());

		cache.get(key)
	}

	fn cache_put(&self, key: CacheKey, verdict: AgentVerdict) {
		if let Some(cache) = self.cache.as_ref() {
			let mut cache = cache.lock().unwrap_or_else(|err| err.into_inner());

			cache.put(key, verdict);
		}
	}
}

async fn call_with_retries(
	client: &dyn AgentClient,
	prompt: &str,
	game_id: i64,
) -> Result<chessmate_providers::AgentReply, chessmate_providers::AgentError> {
	let mut attempt = 1;

	loop {
		match client.evaluate(prompt).await {
			Ok(reply) => return Ok(reply),
			Err(err) if err.is_retryable() && attempt < ATTEMPTS => {
				tokio::time::sleep(retry_delay(attempt, game_id)).await;
				attempt += 1;
			},
			Err(err) => return Err(err),
		}
	}
}

/// Exponential backoff with a per-game jitter derived from the id, so
/// concurrent retries do not stampede in lockstep.
fn retry_delay(attempt: u32, game_id: i64) -> Duration {
	let base = BASE_RETRY_DELAY_MS << (attempt - 1);
	let jitter = (game_id as u64).wrapping_mul(2_654_435_761) % BASE_RETRY_DELAY_MS;

	Duration::from_millis(base + jitter)
}

fn apply_verdict(
	cfg: &chessmate_config::Agent,
	candidate: &mut ScoredResult,
	verdict: &AgentVerdict,
) {
	let weight = cfg.weight;

	candidate.agent_score = Some(verdict.score);
	candidate.total_score = (1.0 - weight) * candidate.total_score + weight * verdict.score;
	candidate.themes = verdict.themes.clone();
	candidate.explanation = verdict.explanation.clone();
}

fn truncate_pgn(pgn: &str) -> &str {
	if pgn.len() <= MAX_PGN_CHARS {
		return pgn;
	}

	let mut end = MAX_PGN_CHARS;

	while !pgn.is_char_boundary(end) {
		end -= 1;
	}

	&pgn[..end]
}

fn estimated_cost(cost: &chessmate_config::AgentCost, usage: &AgentUsage) -> f64 {
	let per_1k = |tokens: u64, rate: f64| tokens as f64 / 1_000.0 * rate;

	per_1k(usage.input_tokens, cost.input_per_1k)
		+ per_1k(usage.output_tokens, cost.output_per_1k)
		+ per_1k(usage.reasoning_tokens, cost.reasoning_per_1k)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
	model: String,
	reasoning_effort: &'static str,
	plan_fingerprint: u64,
	game_id: i64,
}

/// Minimal LRU: a map plus a monotonic use tick; eviction scans for the
/// stalest entry. Capacities here are small enough that the scan never
/// matters.
struct VerdictCache {
	capacity: usize,
	tick: u64,
	entries: HashMap<CacheKey, (u64, AgentVerdict)>,
}
impl VerdictCache {
	fn new(capacity: usize) -> Self {
		Self { capacity, tick: 0, entries: HashMap::new() }
	}

	fn get(&mut self, key: &CacheKey) -> Option<AgentVerdict> {
		self.tick += 1;

		let tick = self.tick;
		let (last_used, verdict) = self.entries.get_mut(key)?;

		*last_used = tick;

		Some(verdict.clone())
	}

	fn put(&mut self, key: CacheKey, verdict: AgentVerdict) {
		self.tick += 1;

		if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
			let stalest = self
				.entries
				.iter()
				.min_by_key(|(_, (last_used, _))| *last_used)
				.map(|(key, _)| key.clone());

			if let Some(stalest) = stalest {
				self.entries.remove(&stalest);
			}
		}

		self.entries.insert(key, (self.tick, verdict));
	}
}
