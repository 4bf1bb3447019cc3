use std::net::SocketAddr;

use chessmate_api::{routes, state::AppState};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;
	init_tracing();

	let config = chessmate_config::load()?;
	let state = AppState::new(config).await?;
	let http_addr: SocketAddr = std::env::var("CHESSMATE_HTTP_BIND")
		.unwrap_or_else(|_| "127.0.0.1:8080".to_string())
		.parse()?;
	let app = routes::router(state);
	let listener = tokio::net::TcpListener::bind(http_addr).await?;

	tracing::info!(%http_addr, "HTTP server listening.");
	axum::serve(listener, app).await?;

	Ok(())
}

fn init_tracing() {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).init();
}
