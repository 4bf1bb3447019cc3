use axum::{
	body::{self, Body},
	http::{Request, StatusCode},
};
use chessmate_api::{routes, state::AppState};
use chessmate_config::{Config, Database, Embedding, Ingest, Qdrant};
use tower::util::ServiceExt;

fn test_config(dsn: String, qdrant_url: String, collection: String) -> Config {
	Config {
		database: Database { url: dsn, pool_max_conns: 2 },
		qdrant: Qdrant { url: qdrant_url, collection, vector_dim: 8, timeout_ms: 1_000 },
		embedding: Embedding {
			api_base: "http://127.0.0.1:1".to_string(),
			api_key: None,
			path: "/embeddings".to_string(),
			model: "test".to_string(),
			dimensions: 8,
			batch_size: 16,
			timeout_ms: 1_000,
		},
		ingest: Ingest { max_pending_embeddings: 0 },
		agent: None,
	}
}

async fn test_env() -> Option<(chessmate_testkit::TestDatabase, String, String)> {
	let Some(base_dsn) = chessmate_testkit::env_dsn() else {
		eprintln!("Skipping HTTP tests; set CHESSMATE_PG_DSN to run this test.");

		return None;
	};
	let Some(qdrant_url) = chessmate_testkit::env_qdrant_url() else {
		eprintln!("Skipping HTTP tests; set CHESSMATE_QDRANT_URL to run this test.");

		return None;
	};
	let mut test_db = chessmate_testkit::TestDatabase::new(&base_dsn)
		.await
		.expect("Failed to create test database.");
	let collection = test_db.collection_name("chessmate_http");

	Some((test_db, qdrant_url, collection))
}

#[tokio::test]
#[ignore = "Requires external Postgres and Qdrant. Set CHESSMATE_PG_DSN and CHESSMATE_QDRANT_URL to run."]
async fn health_reports_ok() {
	let Some((test_db, qdrant_url, collection)) = test_env().await else {
		return;
	};
	let config = test_config(test_db.dsn().to_string(), qdrant_url, collection);
	let state = AppState::new(config).await.expect("Failed to initialize app state.");
	let app = routes::router(state);
	let response = app
		.oneshot(
			Request::builder().uri("/health").body(Body::empty()).expect("Failed to build request."),
		)
		.await
		.expect("Failed to call /health.");

	assert_eq!(response.status(), StatusCode::OK);

	let bytes = body::to_bytes(response.into_body(), usize::MAX)
		.await
		.expect("Failed to read response body.");
	let json: serde_json::Value = serde_json::from_slice(&bytes).expect("Failed to parse body.");

	assert_eq!(json["status"], "ok");
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres and Qdrant. Set CHESSMATE_PG_DSN and CHESSMATE_QDRANT_URL to run."]
async fn empty_question_is_a_bad_request() {
	let Some((test_db, qdrant_url, collection)) = test_env().await else {
		return;
	};
	let config = test_config(test_db.dsn().to_string(), qdrant_url, collection);
	let state = AppState::new(config).await.expect("Failed to initialize app state.");
	let app = routes::router(state);
	let response = app
		.oneshot(
			Request::builder()
				.method("POST")
				.uri("/query")
				.header("content-type", "application/json")
				.body(Body::from(r#"{"question": "   "}"#))
				.expect("Failed to build request."),
		)
		.await
		.expect("Failed to call /query.");

	assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres and Qdrant. Set CHESSMATE_PG_DSN and CHESSMATE_QDRANT_URL to run."]
async fn query_degrades_without_a_vector_store() {
	let Some((test_db, _, collection)) = test_env().await else {
		return;
	};
	// An unreachable Qdrant endpoint: the query must still answer, warning
	// that vector search is unavailable.
	let config =
		test_config(test_db.dsn().to_string(), "http://127.0.0.1:1".to_string(), collection);
	let state = AppState::new(config).await.expect("Failed to initialize app state.");
	let app = routes::router(state);
	let response = app
		.oneshot(
			Request::builder()
				.method("POST")
				.uri("/query")
				.header("content-type", "application/json")
				.body(Body::from(r#"{"question": "find 3 sicilian games"}"#))
				.expect("Failed to build request."),
		)
		.await
		.expect("Failed to call /query.");

	assert_eq!(response.status(), StatusCode::OK);

	let bytes = body::to_bytes(response.into_body(), usize::MAX)
		.await
		.expect("Failed to read response body.");
	let json: serde_json::Value = serde_json::from_slice(&bytes).expect("Failed to parse body.");

	assert_eq!(json["plan"]["limit"], 3);
	assert!(
		json["warnings"]
			.as_array()
			.expect("warnings array")
			.iter()
			.any(|warning| warning == "Vector search unavailable")
	);
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
