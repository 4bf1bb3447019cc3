use std::{collections::HashMap, sync::Arc, time::Duration};

use chessmate_storage::{
	db::Db,
	games, jobs,
	models::{EmbeddingJob, PositionPayloadRow},
	qdrant::{VectorStore, stable_point_id, vector_id_string},
};
use time::OffsetDateTime;
use tokio::sync::watch;

use crate::Result;

/// Claims older than this are treated as abandoned by a crashed worker.
pub const IN_PROGRESS_TIMEOUT: time::Duration = time::Duration::minutes(15);
pub const CLAIM_BATCH_SIZE: i64 = 16;
const PRUNE_BATCH: i64 = 500;

/// N cooperating claim loops in one process. All coordination goes through
/// the job table; loops share nothing else mutable.
pub struct WorkerPool {
	pub db: Arc<Db>,
	pub vectors: Arc<VectorStore>,
	pub embedding: chessmate_config::Embedding,
	pub poll_sleep: Duration,
}
impl WorkerPool {
	/// Runs `workers` loops until a termination signal arrives; in-flight
	/// batches finish naturally.
	pub async fn run(self: Arc<Self>, workers: usize) -> Result<()> {
		self.vectors.ensure_collection().await?;
		self.startup_sweep().await?;

		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		let mut handles = Vec::with_capacity(workers);

		for worker_id in 0..workers {
			let state = Arc::clone(&self);
			let shutdown = shutdown_rx.clone();

			handles.push(tokio::spawn(worker_loop(state, worker_id, shutdown)));
		}

		tokio::signal::ctrl_c().await.ok();
		tracing::info!("Termination signal received; draining worker loops.");
		shutdown_tx.send(true).ok();

		for handle in handles {
			handle.await.ok();
		}

		Ok(())
	}

	/// Janitor reclaim plus queue reconciliation, once per worker start.
	async fn startup_sweep(&self) -> Result<()> {
		let cutoff = OffsetDateTime::now_utc() - IN_PROGRESS_TIMEOUT;
		let reclaimed = jobs::reclaim_stalled(&self.db.pool, cutoff).await?;

		if reclaimed > 0 {
			tracing::warn!(reclaimed, "Reclaimed stalled in-progress jobs.");
		}

		let mut pruned = 0_u64;

		loop {
			let batch = jobs::prune_completed_against_positions(&self.db.pool, PRUNE_BATCH).await?;

			pruned += batch;

			if batch == 0 {
				break;
			}
		}

		if pruned > 0 {
			tracing::info!(pruned, "Pruned jobs for already-embedded positions.");
		}

		Ok(())
	}

	/// One claim-embed-settle cycle; returns how many jobs were claimed.
	async fn process_batch(&self, worker_id: usize) -> Result<usize> {
		let claimed = jobs::claim(&self.db.pool, CLAIM_BATCH_SIZE).await?;

		if claimed.is_empty() {
			return Ok(0);
		}

		let position_ids: Vec<i64> = claimed.iter().map(|job| job.position_id).collect();
		let payloads: HashMap<i64, PositionPayloadRow> =
			games::position_payloads(&self.db.pool, &position_ids)
				.await?
				.into_iter()
				.map(|row| (row.position_id, row))
				.collect();
		let fens: Vec<String> = claimed.iter().map(|job| job.fen.clone()).collect();
		let vectors = match chessmate_providers::embedding::embed(&self.embedding, &fens).await {
			Ok(vectors) => vectors,
			Err(err) => {
				// A whole-batch failure re-queues every claimed job; the
				// poll sleep is the backoff.
				tracing::warn!(worker_id, error = %err, "Embedding batch failed.");

				for job in &claimed {
					jobs::fail(&self.db.pool, job.id, &err.to_string(), true).await?;
				}

				return Ok(claimed.len());
			},
		};

		for (job, vector) in claimed.iter().zip(vectors) {
			if let Err(err) = self.settle_job(job, vector, &payloads).await {
				tracing::error!(worker_id, job_id = job.id, error = %err, "Job settle failed.");
			}
		}

		Ok(claimed.len())
	}

	async fn settle_job(
		&self,
		job: &EmbeddingJob,
		vector: Vec<f32>,
		payloads: &HashMap<i64, PositionPayloadRow>,
	) -> Result<()> {
		let Some(payload) = payloads.get(&job.position_id) else {
			// The owning game is gone; there is nothing to embed for.
			jobs::fail(&self.db.pool, job.id, "position row missing", false).await?;

			return Ok(());
		};

		if vector.len() != self.vectors.vector_dim as usize {
			jobs::fail(
				&self.db.pool,
				job.id,
				&format!(
					"embedding dimension {} does not match configured {}",
					vector.len(),
					self.vectors.vector_dim
				),
				true,
			)
			.await?;

			return Ok(());
		}

		let point_id = stable_point_id(&job.fen);

		if let Err(err) = self.vectors.upsert_point(point_id, vector, payload).await {
			jobs::fail(&self.db.pool, job.id, &err.to_string(), true).await?;

			return Ok(());
		}

		let mut tx = self.db.pool.begin().await.map_err(chessmate_storage::Error::from)?;

		jobs::complete(&mut tx, job.id, job.position_id, &vector_id_string(point_id)).await?;
		tx.commit().await.map_err(chessmate_storage::Error::from)?;

		Ok(())
	}
}

async fn worker_loop(state: Arc<WorkerPool>, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
	tracing::info!(worker_id, "Worker loop started.");

	loop {
		if *shutdown.borrow() {
			break;
		}

		let idle = match state.process_batch(worker_id).await {
			Ok(claimed) => claimed == 0,
			Err(err) => {
				tracing::error!(worker_id, error = %err, "Worker batch failed.");

				true
			},
		};

		if idle {
			tokio::select! {
				_ = tokio::time::sleep(state.poll_sleep) => {},
				_ = shutdown.changed() => {},
			}
		}
	}

	tracing::info!(worker_id, "Worker loop stopped.");
}
