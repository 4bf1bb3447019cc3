use std::collections::HashMap;

use sqlx::{PgConnection, PgExecutor, QueryBuilder, Row};

use crate::{
	Error, Result,
	models::{GameDetail, GameQuery, GameSummary, NewGame, NewPosition, PositionPayloadRow},
};

const SUMMARY_COLUMNS: &str = "\
g.id, w.display_name AS white_name, b.display_name AS black_name, g.white_rating, \
g.black_rating, g.event, g.played_on, g.result, g.eco_code, g.opening_slug, g.opening_name";

/// Idempotent on `(display_name, federation_id)`; an existing player's peak
/// rating is only ever raised.
pub async fn upsert_player<'e, E>(
	executor: E,
	name: &str,
	federation_id: Option<&str>,
	peak_rating: Option<i32>,
) -> Result<i64>
where
	E: PgExecutor<'e>,
{
	let row = sqlx::query(
		"\
INSERT INTO players (display_name, federation_id, peak_rating)
VALUES ($1, $2, $3)
ON CONFLICT (display_name, federation_id) DO UPDATE
SET peak_rating = GREATEST(players.peak_rating, EXCLUDED.peak_rating)
RETURNING id",
	)
	.bind(name)
	.bind(federation_id)
	.bind(peak_rating)
	.fetch_one(executor)
	.await?;

	Ok(row.try_get("id")?)
}

/// Fails with `DuplicateGame` when the same five-tuple already exists with a
/// byte-identical PGN; otherwise inserts.
pub async fn insert_game(conn: &mut PgConnection, game: &NewGame<'_>) -> Result<i64> {
	let existing = sqlx::query(
		"\
SELECT id, pgn
FROM games
WHERE white_id = $1
	AND black_id = $2
	AND played_on IS NOT DISTINCT FROM $3
	AND event IS NOT DISTINCT FROM $4
	AND round IS NOT DISTINCT FROM $5",
	)
	.bind(game.white_id)
	.bind(game.black_id)
	.bind(game.played_on)
	.bind(game.event)
	.bind(game.round)
	.fetch_all(&mut *conn)
	.await?;

	for row in existing {
		if row.try_get::<String, _>("pgn")? == game.pgn {
			return Err(Error::DuplicateGame(row.try_get("id")?));
		}
	}

	let row = sqlx::query(
		"\
INSERT INTO games (
	white_id,
	black_id,
	event,
	site,
	round,
	played_on,
	result,
	eco_code,
	opening_slug,
	opening_name,
	white_rating,
	black_rating,
	pgn
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
RETURNING id",
	)
	.bind(game.white_id)
	.bind(game.black_id)
	.bind(game.event)
	.bind(game.site)
	.bind(game.round)
	.bind(game.played_on)
	.bind(game.result)
	.bind(game.eco_code)
	.bind(game.opening_slug)
	.bind(game.opening_name)
	.bind(game.white_rating)
	.bind(game.black_rating)
	.bind(game.pgn)
	.fetch_one(&mut *conn)
	.await?;

	Ok(row.try_get("id")?)
}

/// One multi-row insert; run inside the per-game transaction so a game never
/// commits with a partial position set. Returned ids follow input order.
pub async fn insert_positions(
	conn: &mut PgConnection,
	game_id: i64,
	positions: &[NewPosition<'_>],
) -> Result<Vec<i64>> {
	if positions.is_empty() {
		return Ok(Vec::new());
	}

	let mut builder = QueryBuilder::new(
		"INSERT INTO positions (game_id, ply, move_number, side_to_move, san, fen) ",
	);

	builder.push_values(positions, |mut b, position| {
		b.push_bind(game_id)
			.push_bind(position.ply)
			.push_bind(position.move_number)
			.push_bind(position.side_to_move)
			.push_bind(position.san)
			.push_bind(position.fen);
	});
	builder.push(" RETURNING id");

	let rows = builder.build().fetch_all(conn).await?;
	let mut ids = Vec::with_capacity(rows.len());

	for row in rows {
		ids.push(row.try_get("id")?);
	}

	Ok(ids)
}

/// Applies the metadata predicates and overfetches `max(limit * 10, 50)`
/// rows, newest first.
pub async fn search_games<'e, E>(executor: E, query: &GameQuery) -> Result<Vec<GameSummary>>
where
	E: PgExecutor<'e>,
{
	let mut builder = QueryBuilder::new(format!(
		"\
SELECT {SUMMARY_COLUMNS}
FROM games g
JOIN players w ON w.id = g.white_id
JOIN players b ON b.id = g.black_id
WHERE TRUE"
	));

	if !query.opening_slugs.is_empty() || !query.eco_ranges.is_empty() {
		builder.push(" AND (FALSE");

		for slug in &query.opening_slugs {
			builder.push(" OR g.opening_slug = ").push_bind(slug);
		}
		for (start, end) in &query.eco_ranges {
			builder
				.push(" OR g.eco_code BETWEEN ")
				.push_bind(start)
				.push(" AND ")
				.push_bind(end);
		}

		builder.push(")");
	}
	if let Some(result) = &query.result {
		builder.push(" AND g.result = ").push_bind(result);
	}
	if let Some(white_min) = query.white_min {
		builder.push(" AND g.white_rating >= ").push_bind(white_min);
	}
	if let Some(black_min) = query.black_min {
		builder.push(" AND g.black_rating >= ").push_bind(black_min);
	}
	if let Some(delta) = query.max_rating_delta {
		builder
			.push(" AND g.white_rating IS NOT NULL AND g.black_rating IS NOT NULL")
			.push(" AND ABS(g.white_rating - g.black_rating) <= ")
			.push_bind(delta);
	}

	builder.push(" ORDER BY g.played_on DESC NULLS LAST, g.id ASC LIMIT ");
	builder.push_bind(query.overfetch());

	Ok(builder.build_query_as::<GameSummary>().fetch_all(executor).await?)
}

/// Fetches full game rows, preserving the order of the input ids.
pub async fn fetch_games_with_pgn<'e, E>(executor: E, ids: &[i64]) -> Result<Vec<GameDetail>>
where
	E: PgExecutor<'e>,
{
	if ids.is_empty() {
		return Ok(Vec::new());
	}

	let rows = sqlx::query_as::<_, GameDetail>("SELECT id, pgn FROM games WHERE id = ANY($1)")
		.bind(ids)
		.fetch_all(executor)
		.await?;
	let mut by_id: HashMap<i64, GameDetail> =
		rows.into_iter().map(|detail| (detail.id, detail)).collect();

	Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
}

/// Idempotent; the worker recomputes the same deterministic id on a retry.
pub async fn set_vector_id<'e, E>(executor: E, position_id: i64, vector_id: &str) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query("UPDATE positions SET vector_id = $2 WHERE id = $1")
		.bind(position_id)
		.bind(vector_id)
		.execute(executor)
		.await?;

	Ok(())
}

/// One joined read per worker batch; every field of the vector payload comes
/// back per position.
pub async fn position_payloads<'e, E>(
	executor: E,
	position_ids: &[i64],
) -> Result<Vec<PositionPayloadRow>>
where
	E: PgExecutor<'e>,
{
	if position_ids.is_empty() {
		return Ok(Vec::new());
	}

	Ok(sqlx::query_as::<_, PositionPayloadRow>(
		"\
SELECT
	p.id AS position_id,
	p.game_id,
	p.ply,
	p.fen,
	w.display_name AS white_name,
	b.display_name AS black_name,
	g.white_rating AS white_elo,
	g.black_rating AS black_elo,
	g.opening_slug,
	g.eco_code,
	g.result
FROM positions p
JOIN games g ON g.id = p.game_id
JOIN players w ON w.id = g.white_id
JOIN players b ON b.id = g.black_id
WHERE p.id = ANY($1)",
	)
	.bind(position_ids)
	.fetch_all(executor)
	.await?)
}
