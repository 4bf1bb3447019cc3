use std::{
	fs::File,
	io::BufReader,
	path::{Path, PathBuf},
	process::ExitCode,
	sync::Arc,
	time::Duration,
};

use clap::{Parser, Subcommand};
use chessmate_chess::{GameStream, OpeningCatalogue, parse_game, precheck_game};
use chessmate_service::{
	agent::AgentEvaluator,
	ingest,
	query::QueryPipeline,
	traits::{HashQueryEmbedder, HttpAgentClient, HttpQueryEmbedder, QueryEmbedder},
	worker::WorkerPool,
};
use chessmate_storage::{db::Db, qdrant::VectorStore};

const EXIT_USER_ERROR: u8 = 1;
const EXIT_INFRA_ERROR: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "chessmate", version, about = "Natural-language chess game search")]
struct Cli {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
	/// Ingest a PGN file into the metadata store and embedding queue
	Ingest {
		pgn_path: PathBuf,
	},
	/// Ask a natural-language question about the stored games
	Query {
		question: String,
	},
	/// Run the embedding worker pool until interrupted
	EmbeddingWorker {
		/// Number of cooperating claim loops
		#[arg(long, default_value_t = 1)]
		workers: usize,
		/// Seconds to sleep when the queue is empty
		#[arg(long, default_value_t = 1.0)]
		poll_sleep: f64,
	},
	/// Print one FEN per ply for every game in a PGN file
	Fen {
		pgn_path: PathBuf,
	},
	/// Report games in a bulk dump that ingestion would skip
	TwicPrecheck {
		pgn_path: PathBuf,
	},
}

#[tokio::main]
async fn main() -> ExitCode {
	if let Err(err) = color_eyre::install() {
		eprintln!("{err}");

		return ExitCode::from(EXIT_INFRA_ERROR);
	}

	init_tracing();

	let cli = Cli::parse();

	match run(cli).await {
		Ok(()) => ExitCode::SUCCESS,
		Err(report) => {
			eprintln!("Error: {report}");

			ExitCode::from(exit_code_for(&report))
		},
	}
}

fn exit_code_for(report: &color_eyre::Report) -> u8 {
	if let Some(err) = report.downcast_ref::<chessmate_service::Error>() {
		return if err.is_user_error() { EXIT_USER_ERROR } else { EXIT_INFRA_ERROR };
	}
	if report.downcast_ref::<std::io::Error>().is_some() {
		return EXIT_USER_ERROR;
	}

	EXIT_INFRA_ERROR
}

async fn run(cli: Cli) -> color_eyre::Result<()> {
	match cli.command {
		Commands::Ingest { pgn_path } => run_ingest(&pgn_path).await,
		Commands::Query { question } => run_query(&question).await,
		Commands::EmbeddingWorker { workers, poll_sleep } =>
			run_worker(workers, poll_sleep).await,
		Commands::Fen { pgn_path } => run_fen(&pgn_path),
		Commands::TwicPrecheck { pgn_path } => run_precheck(&pgn_path),
	}
}

async fn run_ingest(pgn_path: &Path) -> color_eyre::Result<()> {
	let cfg = chessmate_config::load()?;
	let db = Db::connect(&cfg.database).await?;

	db.ensure_schema().await?;

	let reader = BufReader::new(File::open(pgn_path)?);
	let catalogue = OpeningCatalogue::new();
	let report = ingest::ingest_pgn(
		&db,
		&catalogue,
		reader,
		cfg.ingest.max_pending_embeddings,
		|game_id, positions| println!("Stored game {game_id} with {positions} positions"),
	)
	.await?;

	println!(
		"Ingested {} games ({} skipped); {} positions queued for embedding",
		report.games_stored, report.games_skipped, report.jobs_enqueued
	);

	Ok(())
}

async fn run_query(question: &str) -> color_eyre::Result<()> {
	if let Ok(api_url) = std::env::var("CHESSMATE_API_URL")
		&& !api_url.trim().is_empty()
	{
		return run_remote_query(api_url.trim(), question).await;
	}

	let cfg = chessmate_config::load()?;
	let db = Arc::new(Db::connect(&cfg.database).await?);

	db.ensure_schema().await?;

	let vectors = Arc::new(VectorStore::new(&cfg.qdrant)?);
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
	let outcome = pipeline.run(question).await?;

	for warning in &outcome.warnings {
		eprintln!("warning: {warning}");
	}
	for (rank, result) in outcome.results.iter().enumerate() {
		println!(
			"{}. {} vs {} [{}] {} (score {:.3})",
			rank + 1,
			result.white_name,
			result.black_name,
			result.opening_name.as_deref().unwrap_or(result.eco_code.as_deref().unwrap_or("?")),
			result.result,
			result.total_score,
		);

		if let Some(explanation) = &result.explanation {
			println!("   {explanation}");
		}
	}
	if let Some(agent) = &outcome.agent {
		println!(
			"agent: {} calls, {} input tokens, {} output tokens, ${:.4}",
			agent.calls, agent.input_tokens, agent.output_tokens, agent.cost_usd
		);
	}

	Ok(())
}

async fn run_remote_query(api_url: &str, question: &str) -> color_eyre::Result<()> {
	let client = reqwest::Client::new();
	let response = client
		.post(format!("{api_url}/query"))
		.json(&serde_json::json!({ "question": question }))
		.send()
		.await?
		.error_for_status()?;
	let body: serde_json::Value = response.json().await?;

	println!("{}", serde_json::to_string_pretty(&body)?);

	Ok(())
}

async fn run_worker(workers: usize, poll_sleep: f64) -> color_eyre::Result<()> {
	let mut cfg = chessmate_config::load()?;

	if cfg.embedding.api_key.is_none() {
		return Err(color_eyre::eyre::eyre!("OPENAI_API_KEY must be set for embedding-worker."));
	}

	cfg.database.pool_max_conns = chessmate_config::pool_conns_for(workers as u32, 0);

	let db = Arc::new(Db::connect(&cfg.database).await?);

	db.ensure_schema().await?;

	let pool = Arc::new(WorkerPool {
		db,
		vectors: Arc::new(VectorStore::new(&cfg.qdrant)?),
		embedding: cfg.embedding,
		poll_sleep: Duration::from_secs_f64(poll_sleep.max(0.0)),
	});

	tracing::info!(workers, "Starting embedding worker pool.");
	pool.run(workers.max(1)).await?;

	Ok(())
}

fn run_fen(pgn_path: &Path) -> color_eyre::Result<()> {
	let reader = BufReader::new(File::open(pgn_path)?);

	for raw in GameStream::new(reader) {
		let raw = raw?;

		match parse_game(&raw) {
			Ok(parsed) =>
				for snapshot in &parsed.snapshots {
					println!("{}", snapshot.fen);
				},
			Err(err) => eprintln!(
				"warning: skipping game ({} vs {}): {err}",
				raw.tag("White").unwrap_or("?"),
				raw.tag("Black").unwrap_or("?")
			),
		}
	}

	Ok(())
}

fn run_precheck(pgn_path: &Path) -> color_eyre::Result<()> {
	let reader = BufReader::new(File::open(pgn_path)?);
	let mut total = 0_u64;
	let mut offending = 0_u64;

	for (index, raw) in GameStream::new(reader).enumerate() {
		let raw = raw?;
		let mut issues: Vec<String> =
			precheck_game(&raw).iter().map(ToString::to_string).collect();

		// The replay catches what the tag scan cannot.
		if issues.is_empty()
			&& let Err(err) = parse_game(&raw)
		{
			issues.push(err.to_string());
		}

		total += 1;

		if !issues.is_empty() {
			offending += 1;
			println!(
				"game {} ({} vs {}): {}",
				index + 1,
				raw.tag("White").unwrap_or("?"),
				raw.tag("Black").unwrap_or("?"),
				issues.join("; ")
			);
		}
	}

	println!("{offending} of {total} games would be skipped");

	Ok(())
}

fn init_tracing() {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).init();
}
