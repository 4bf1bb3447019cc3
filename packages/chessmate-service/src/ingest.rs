use std::io::BufRead;

use chessmate_chess::{
	EcoCode, GameStream, OpeningCatalogue, ParsedGame, PgnError, RawGame, parse_game,
};
use chessmate_storage::{
	db::Db,
	games, jobs,
	models::{JobStatus, NewGame, NewPosition},
};
use time::{Date, Month};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct IngestReport {
	pub games_stored: u64,
	pub games_skipped: u64,
	pub positions: u64,
	pub jobs_enqueued: u64,
}

/// Streams a PGN source into the metadata store and the embedding queue.
///
/// Each game commits in its own transaction (players, game, positions,
/// jobs), so a reader never observes a partial game. Per-game parse failures
/// are logged and skipped; a saturated pending queue aborts the run with the
/// number of games already committed.
pub async fn ingest_pgn<R: BufRead>(
	db: &Db,
	catalogue: &OpeningCatalogue,
	reader: R,
	max_pending: i64,
	mut on_stored: impl FnMut(i64, u64),
) -> Result<IngestReport> {
	let mut report = IngestReport::default();

	for raw in GameStream::new(reader) {
		let raw = raw?;

		if max_pending > 0 {
			let counts = jobs::count_by_status(&db.pool).await?;
			let pending = counts.get(&JobStatus::Pending).copied().unwrap_or(0);

			if pending > max_pending {
				return Err(Error::QueueSaturated {
					pending,
					games_stored: report.games_stored,
				});
			}
		}

		let parsed = match parse_game(&raw) {
			Ok(parsed) => parsed,
			Err(
				err @ (PgnError::NoMoves
				| PgnError::IllegalMove { .. }
				| PgnError::InvalidFen(_)
				| PgnError::UnterminatedComment),
			) => {
				tracing::warn!(
					error = %err,
					white = raw.tag("White").unwrap_or("?"),
					black = raw.tag("Black").unwrap_or("?"),
					"Skipping unparseable game."
				);
				report.games_skipped += 1;

				continue;
			},
			Err(err) => return Err(err.into()),
		};

		match store_game(db, catalogue, &raw, &parsed).await {
			Ok((game_id, positions)) => {
				report.games_stored += 1;
				report.positions += positions;
				report.jobs_enqueued += positions;
				on_stored(game_id, positions);
			},
			Err(Error::Storage(chessmate_storage::Error::DuplicateGame(existing))) => {
				tracing::warn!(existing_id = existing, "Skipping duplicate game.");
				report.games_skipped += 1;
			},
			Err(Error::BadInput(reason)) => {
				tracing::warn!(reason, "Skipping malformed game.");
				report.games_skipped += 1;
			},
			Err(err) => return Err(err),
		}
	}

	tracing::info!(
		games_stored = report.games_stored,
		games_skipped = report.games_skipped,
		positions = report.positions,
		"Ingest run finished."
	);

	Ok(report)
}

async fn store_game(
	db: &Db,
	catalogue: &OpeningCatalogue,
	raw: &RawGame,
	parsed: &ParsedGame,
) -> Result<(i64, u64)> {
	let (Some(white), Some(black)) = (player_name(raw, "White"), player_name(raw, "Black"))
	else {
		return Err(Error::BadInput("game is missing a player tag".to_string()));
	};
	let white_rating = rating_tag(raw, "WhiteElo");
	let black_rating = rating_tag(raw, "BlackElo");
	let eco_code = raw.tag("ECO").filter(|code| EcoCode::parse(code).is_some());
	let opening_name = raw.tag("Opening").map(str::trim).filter(|name| !name.is_empty());
	let opening_slug = eco_code
		.and_then(|code| catalogue.slug_for_eco(code))
		.or_else(|| {
			opening_name
				.and_then(|name| catalogue.filters_for_text(name).first().map(|hit| hit.slug))
		});
	let mut tx = db.pool.begin().await.map_err(chessmate_storage::Error::from)?;
	let white_id = games::upsert_player(
		&mut *tx,
		&white,
		raw.tag("WhiteFideId"),
		white_rating,
	)
	.await?;
	let black_id = games::upsert_player(
		&mut *tx,
		&black,
		raw.tag("BlackFideId"),
		black_rating,
	)
	.await?;
	let game_id = games::insert_game(
		&mut tx,
		&NewGame {
			white_id,
			black_id,
			event: non_empty_tag(raw, "Event"),
			site: non_empty_tag(raw, "Site"),
			round: non_empty_tag(raw, "Round"),
			played_on: date_tag(raw),
			result: parsed.result.as_str(),
			eco_code,
			opening_slug,
			opening_name,
			white_rating,
			black_rating,
			pgn: &raw.raw,
		},
	)
	.await?;
	let new_positions: Vec<NewPosition> = parsed
		.snapshots
		.iter()
		.map(|snapshot| NewPosition {
			ply: snapshot.ply as i32,
			move_number: snapshot.move_number as i32,
			side_to_move: snapshot.side_to_move.as_str(),
			san: &snapshot.san,
			fen: &snapshot.fen,
		})
		.collect();
	let position_ids = games::insert_positions(&mut tx, game_id, &new_positions).await?;

	for (position_id, snapshot) in position_ids.iter().zip(&parsed.snapshots) {
		jobs::enqueue(&mut *tx, *position_id, &snapshot.fen).await?;
	}

	tx.commit().await.map_err(chessmate_storage::Error::from)?;

	Ok((game_id, position_ids.len() as u64))
}

fn player_name(raw: &RawGame, tag: &str) -> Option<String> {
	raw.tag(tag)
		.map(|name| name.split_whitespace().collect::<Vec<_>>().join(" "))
		.filter(|name| !name.is_empty() && name != "?")
}

fn non_empty_tag<'a>(raw: &'a RawGame, tag: &str) -> Option<&'a str> {
	raw.tag(tag).map(str::trim).filter(|value| !value.is_empty() && *value != "?")
}

fn rating_tag(raw: &RawGame, tag: &str) -> Option<i32> {
	raw.tag(tag).and_then(|value| value.parse().ok()).filter(|rating| *rating > 0)
}

/// PGN dates are `YYYY.MM.DD` with `?` placeholders for unknown fields.
fn date_tag(raw: &RawGame) -> Option<Date> {
	let value = raw.tag("Date")?;
	let mut fields = value.split('.');
	let year: i32 = fields.next()?.parse().ok()?;
	let month: u8 = fields.next()?.parse().ok()?;
	let day: u8 = fields.next()?.parse().ok()?;

	Date::from_calendar_date(year, Month::try_from(month).ok()?, day).ok()
}
