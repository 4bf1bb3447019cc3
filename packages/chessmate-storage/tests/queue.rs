use std::collections::HashSet;

use chessmate_storage::{
	db::Db,
	games, jobs,
	models::{JobStatus, NewGame, NewPosition},
};
use time::{Duration, OffsetDateTime};

async fn connect(dsn: &str) -> Db {
	let cfg = chessmate_config::Database { url: dsn.to_string(), pool_max_conns: 4 };
	let db = Db::connect(&cfg).await.expect("Failed to connect to Postgres.");

	db.ensure_schema().await.expect("Failed to ensure schema.");

	db
}

/// Seeds one game with `count` positions and a pending job per position.
async fn seed_jobs(db: &Db, count: i32) -> Vec<i64> {
	let mut conn = db.pool.acquire().await.expect("Failed to acquire connection.");
	let white = games::upsert_player(&mut *conn, "Kasparov, Garry", None, Some(2851))
		.await
		.expect("Failed to upsert white.");
	let black = games::upsert_player(&mut *conn, "Karpov, Anatoly", None, Some(2780))
		.await
		.expect("Failed to upsert black.");
	let game_id = games::insert_game(
		&mut conn,
		&NewGame {
			white_id: white,
			black_id: black,
			event: Some("Test Event"),
			site: None,
			round: None,
			played_on: None,
			result: "1-0",
			eco_code: Some("E97"),
			opening_slug: Some("kings_indian_defense"),
			opening_name: Some("King's Indian Defense"),
			white_rating: Some(2851),
			black_rating: Some(2780),
			pgn: "1. e4 1-0",
		},
	)
	.await
	.expect("Failed to insert game.");
	let positions: Vec<NewPosition> = (1..=count)
		.map(|ply| NewPosition {
			ply,
			move_number: (ply + 1) / 2,
			side_to_move: if ply % 2 == 1 { "white" } else { "black" },
			san: "e4",
			fen: "rnbqkbnr/pppppppp/8/8/4P3/8/PPPPPPPP/RNBQKBNR b KQkq - 0 1",
		})
		.collect();
	let position_ids = games::insert_positions(&mut conn, game_id, &positions)
		.await
		.expect("Failed to insert positions.");

	for (position_id, position) in position_ids.iter().zip(&positions) {
		jobs::enqueue(&mut *conn, *position_id, position.fen)
			.await
			.expect("Failed to enqueue job.");
	}

	position_ids
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set CHESSMATE_PG_DSN to run."]
async fn claim_transitions_jobs_and_counts_attempts() {
	let Some(base_dsn) = chessmate_testkit::env_dsn() else {
		eprintln!("Skipping; set CHESSMATE_PG_DSN to run this test.");
		return;
	};
	let test_db =
		chessmate_testkit::TestDatabase::new(&base_dsn).await.expect("Failed to create test db.");
	let db = connect(test_db.dsn()).await;

	seed_jobs(&db, 3).await;

	let first = jobs::claim(&db.pool, 2).await.expect("Failed to claim.");

	assert_eq!(first.len(), 2);
	assert!(first.iter().all(|job| job.status == "in_progress" && job.attempts == 1));
	assert!(first.iter().all(|job| job.started_at.is_some()));

	let second = jobs::claim(&db.pool, 2).await.expect("Failed to claim.");

	assert_eq!(second.len(), 1);
	assert!(jobs::claim(&db.pool, 2).await.expect("Failed to claim.").is_empty());

	let counts = jobs::count_by_status(&db.pool).await.expect("Failed to count.");

	assert_eq!(counts.get(&JobStatus::InProgress), Some(&3));
	test_db.cleanup().await.expect("Failed to cleanup.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set CHESSMATE_PG_DSN to run."]
async fn concurrent_claims_return_disjoint_jobs() {
	let Some(base_dsn) = chessmate_testkit::env_dsn() else {
		eprintln!("Skipping; set CHESSMATE_PG_DSN to run this test.");
		return;
	};
	let test_db =
		chessmate_testkit::TestDatabase::new(&base_dsn).await.expect("Failed to create test db.");
	let db = connect(test_db.dsn()).await;

	seed_jobs(&db, 24).await;

	let (left, right) =
		tokio::join!(jobs::claim(&db.pool, 16), jobs::claim(&db.pool, 16));
	let left = left.expect("Left claim failed.");
	let right = right.expect("Right claim failed.");
	let left_ids: HashSet<i64> = left.iter().map(|job| job.id).collect();
	let right_ids: HashSet<i64> = right.iter().map(|job| job.id).collect();

	assert_eq!(left.len() + right.len(), 24);
	assert!(left_ids.is_disjoint(&right_ids));
	test_db.cleanup().await.expect("Failed to cleanup.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set CHESSMATE_PG_DSN to run."]
async fn retryable_failures_requeue_until_attempts_run_out() {
	let Some(base_dsn) = chessmate_testkit::env_dsn() else {
		eprintln!("Skipping; set CHESSMATE_PG_DSN to run this test.");
		return;
	};
	let test_db =
		chessmate_testkit::TestDatabase::new(&base_dsn).await.expect("Failed to create test db.");
	let db = connect(test_db.dsn()).await;

	seed_jobs(&db, 1).await;

	for attempt in 1..=jobs::MAX_ATTEMPTS {
		let claimed = jobs::claim(&db.pool, 1).await.expect("Failed to claim.");

		assert_eq!(claimed.len(), 1, "attempt {attempt} should find the job pending");
		assert_eq!(claimed[0].attempts, attempt);

		let status = jobs::fail(&db.pool, claimed[0].id, "embedder 429", true)
			.await
			.expect("Failed to fail job.");
		let expected =
			if attempt < jobs::MAX_ATTEMPTS { JobStatus::Pending } else { JobStatus::Failed };

		assert_eq!(status, expected);
	}

	// A sixth attempt is impossible: nothing is claimable.
	assert!(jobs::claim(&db.pool, 1).await.expect("Failed to claim.").is_empty());
	test_db.cleanup().await.expect("Failed to cleanup.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set CHESSMATE_PG_DSN to run."]
async fn complete_settles_job_and_position_together() {
	let Some(base_dsn) = chessmate_testkit::env_dsn() else {
		eprintln!("Skipping; set CHESSMATE_PG_DSN to run this test.");
		return;
	};
	let test_db =
		chessmate_testkit::TestDatabase::new(&base_dsn).await.expect("Failed to create test db.");
	let db = connect(test_db.dsn()).await;
	let position_ids = seed_jobs(&db, 1).await;
	let claimed = jobs::claim(&db.pool, 1).await.expect("Failed to claim.");
	let mut tx = db.pool.begin().await.expect("Failed to begin.");

	jobs::complete(&mut tx, claimed[0].id, claimed[0].position_id, "00ff00ff00ff00ff")
		.await
		.expect("Failed to complete.");
	tx.commit().await.expect("Failed to commit.");

	let payloads = games::position_payloads(&db.pool, &position_ids)
		.await
		.expect("Failed to read payloads.");

	assert_eq!(payloads.len(), 1);

	let counts = jobs::count_by_status(&db.pool).await.expect("Failed to count.");

	assert_eq!(counts.get(&JobStatus::Completed), Some(&1));
	test_db.cleanup().await.expect("Failed to cleanup.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set CHESSMATE_PG_DSN to run."]
async fn prune_completes_pending_jobs_for_embedded_positions() {
	let Some(base_dsn) = chessmate_testkit::env_dsn() else {
		eprintln!("Skipping; set CHESSMATE_PG_DSN to run this test.");
		return;
	};
	let test_db =
		chessmate_testkit::TestDatabase::new(&base_dsn).await.expect("Failed to create test db.");
	let db = connect(test_db.dsn()).await;
	let position_ids = seed_jobs(&db, 2).await;

	games::set_vector_id(&db.pool, position_ids[0], "00ff00ff00ff00ff")
		.await
		.expect("Failed to set vector id.");

	let pruned =
		jobs::prune_completed_against_positions(&db.pool, 100).await.expect("Failed to prune.");

	assert_eq!(pruned, 1);

	let counts = jobs::count_by_status(&db.pool).await.expect("Failed to count.");

	assert_eq!(counts.get(&JobStatus::Completed), Some(&1));
	assert_eq!(counts.get(&JobStatus::Pending), Some(&1));
	test_db.cleanup().await.expect("Failed to cleanup.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set CHESSMATE_PG_DSN to run."]
async fn janitor_reclaims_stalled_in_progress_jobs() {
	let Some(base_dsn) = chessmate_testkit::env_dsn() else {
		eprintln!("Skipping; set CHESSMATE_PG_DSN to run this test.");
		return;
	};
	let test_db =
		chessmate_testkit::TestDatabase::new(&base_dsn).await.expect("Failed to create test db.");
	let db = connect(test_db.dsn()).await;

	seed_jobs(&db, 1).await;
	jobs::claim(&db.pool, 1).await.expect("Failed to claim.");

	// Nothing is older than a 15-minute cutoff yet.
	let cutoff = OffsetDateTime::now_utc() - Duration::minutes(15);

	assert_eq!(jobs::reclaim_stalled(&db.pool, cutoff).await.expect("Failed to reclaim."), 0);

	// A cutoff in the future treats the claim as stalled.
	let cutoff = OffsetDateTime::now_utc() + Duration::minutes(1);

	assert_eq!(jobs::reclaim_stalled(&db.pool, cutoff).await.expect("Failed to reclaim."), 1);

	let reclaimed = jobs::claim(&db.pool, 1).await.expect("Failed to claim.");

	assert_eq!(reclaimed.len(), 1);
	assert_eq!(reclaimed[0].attempts, 2);
	test_db.cleanup().await.expect("Failed to cleanup.");
}
