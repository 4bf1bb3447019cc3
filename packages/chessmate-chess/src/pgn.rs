use std::io::{BufRead, ErrorKind};

use cozy_chess::{Board, Color};

use crate::{error::PgnError, san::resolve_san};

/// The colour that played a ply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
	White,
	Black,
}
impl Side {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::White => "white",
			Self::Black => "black",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameResult {
	WhiteWins,
	BlackWins,
	Draw,
	Unknown,
}
impl GameResult {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::WhiteWins => "1-0",
			Self::BlackWins => "0-1",
			Self::Draw => "1/2-1/2",
			Self::Unknown => "*",
		}
	}

	pub fn from_token(token: &str) -> Option<Self> {
		match token {
			"1-0" => Some(Self::WhiteWins),
			"0-1" => Some(Self::BlackWins),
			"1/2-1/2" | "½-½" => Some(Self::Draw),
			"*" => Some(Self::Unknown),
			_ => None,
		}
	}
}

/// One game cut out of a PGN stream, tags split but movetext unparsed.
#[derive(Debug, Clone)]
pub struct RawGame {
	pub tags: Vec<(String, String)>,
	pub movetext: String,
	/// The game's original text, stored verbatim alongside the parsed form.
	pub raw: String,
}
impl RawGame {
	pub fn tag(&self, name: &str) -> Option<&str> {
		self.tags.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionSnapshot {
	/// 1-based half-move index.
	pub ply: u32,
	pub move_number: u32,
	pub side_to_move: Side,
	pub san: String,
	/// Six-field FEN of the position after the move.
	pub fen: String,
}

#[derive(Debug)]
pub struct ParsedGame {
	pub snapshots: Vec<PositionSnapshot>,
	pub result: GameResult,
}

/// Streams games out of a PGN byte source.
///
/// Games are delimited by the blank line after a movetext section, or by a
/// tag section starting while movetext is open. Invalid UTF-8 surfaces as
/// `BadEncoding` and ends the stream; per-game parse errors do not.
pub struct GameStream<R> {
	reader: R,
	pushback: Option<String>,
	first_line: bool,
	finished: bool,
}
impl<R: BufRead> GameStream<R> {
	pub fn new(reader: R) -> Self {
		Self { reader, pushback: None, first_line: true, finished: false }
	}

	fn next_line(&mut self) -> Result<Option<String>, PgnError> {
		if let Some(line) = self.pushback.take() {
			return Ok(Some(line));
		}

		let mut line = String::new();
		let read = self.reader.read_line(&mut line).map_err(|err| {
			if err.kind() == ErrorKind::InvalidData { PgnError::BadEncoding } else { err.into() }
		})?;

		if read == 0 {
			return Ok(None);
		}
		if self.first_line {
			self.first_line = false;

			if let Some(stripped) = line.strip_prefix('\u{feff}') {
				line = stripped.to_string();
			}
		}

		Ok(Some(line))
	}

	fn next_raw(&mut self) -> Result<Option<RawGame>, PgnError> {
		let mut tags = Vec::new();
		let mut movetext = String::new();
		let mut raw = String::new();
		let mut in_moves = false;

		while let Some(line) = self.next_line()? {
			let trimmed = line.trim();

			if trimmed.is_empty() {
				if in_moves {
					break;
				}

				continue;
			}
			if trimmed.starts_with('[') && in_moves {
				self.pushback = Some(line);

				break;
			}

			raw.push_str(trimmed);
			raw.push('\n');

			if trimmed.starts_with('[') {
				if let Some((key, value)) = parse_tag(trimmed) {
					tags.push((key, value));
				}
			} else {
				in_moves = true;
				movetext.push_str(trimmed);
				movetext.push('\n');
			}
		}

		if tags.is_empty() && movetext.trim().is_empty() {
			return Ok(None);
		}

		Ok(Some(RawGame { tags, movetext, raw }))
	}
}
impl<R: BufRead> Iterator for GameStream<R> {
	type Item = Result<RawGame, PgnError>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.finished {
			return None;
		}

		match self.next_raw() {
			Ok(Some(game)) => Some(Ok(game)),
			Ok(None) => {
				self.finished = true;

				None
			},
			Err(err) => {
				self.finished = true;

				Some(Err(err))
			},
		}
	}
}

/// Replays a raw game's movetext and yields one snapshot per ply.
///
/// Comments, variations, and numeric annotation glyphs are discarded. A
/// `FEN` tag seeds the starting position. Illegal SAN aborts this game only.
pub fn parse_game(raw: &RawGame) -> Result<ParsedGame, PgnError> {
	let mut board = match raw.tag("FEN") {
		Some(fen) =>
			fen.parse::<Board>().map_err(|_| PgnError::InvalidFen(fen.to_string()))?,
		None => Board::default(),
	};
	let mut move_number = raw
		.tag("FEN")
		.and_then(|fen| fen.split_whitespace().nth(5))
		.and_then(|field| field.parse::<u32>().ok())
		.unwrap_or(1);
	let mut result = raw.tag("Result").and_then(GameResult::from_token);
	let mut snapshots = Vec::new();
	let mut ply = 0_u32;
	let mut chars = raw.movetext.chars().peekable();
	let mut variation_depth = 0_usize;

	while let Some(c) = chars.next() {
		match c {
			'{' => {
				let mut closed = false;

				for inner in chars.by_ref() {
					if inner == '}' {
						closed = true;

						break;
					}
				}

				if !closed {
					return Err(PgnError::UnterminatedComment);
				}
			},
			'(' => variation_depth += 1,
			')' => variation_depth = variation_depth.saturating_sub(1),
			';' => {
				for inner in chars.by_ref() {
					if inner == '\n' {
						break;
					}
				}
			},
			'$' => {
				while chars.peek().is_some_and(char::is_ascii_digit) {
					chars.next();
				}
			},
			c if c.is_whitespace() => {},
			c => {
				let mut token = String::new();

				token.push(c);

				while let Some(&next) = chars.peek() {
					if next.is_whitespace() || matches!(next, '{' | '}' | '(' | ')' | ';') {
						break;
					}

					token.push(next);
					chars.next();
				}

				if variation_depth > 0 {
					continue;
				}
				if let Some(token_result) = GameResult::from_token(&token) {
					result.get_or_insert(token_result);

					continue;
				}

				let Some(san) = strip_move_number(&token) else {
					continue;
				};
				let mover = board.side_to_move();
				let mv = resolve_san(&board, san)
					.map_err(|_| PgnError::IllegalMove { ply: ply + 1, san: san.to_string() })?;

				board.play(mv);
				ply += 1;
				snapshots.push(PositionSnapshot {
					ply,
					move_number,
					side_to_move: if mover == Color::White { Side::White } else { Side::Black },
					san: san.to_string(),
					fen: board.to_string(),
				});

				if mover == Color::Black {
					move_number += 1;
				}
			},
		}
	}

	if snapshots.is_empty() {
		return Err(PgnError::NoMoves);
	}

	Ok(ParsedGame { snapshots, result: result.unwrap_or(GameResult::Unknown) })
}

/// Splits a possible `12.` / `12...` prefix off a token; `None` means the
/// token was only a move number.
fn strip_move_number(token: &str) -> Option<&str> {
	// Zero-notation castling starts with a digit but is a move.
	if token.starts_with("0-0") || token.starts_with("O-O") {
		return Some(token);
	}

	let san = token.trim_start_matches(|c: char| c.is_ascii_digit() || c == '.');

	if san.is_empty() { None } else { Some(san) }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrecheckIssue {
	#[error("Missing or invalid Result tag")]
	MissingResult,
	#[error("Missing White or Black player tag")]
	MissingPlayers,
	#[error("Movetext contains no moves")]
	EmptyMovetext,
}

/// Classifies a raw game without replaying its moves. Used by the
/// `twic-precheck` CLI pass over bulk game dumps.
pub fn precheck_game(raw: &RawGame) -> Vec<PrecheckIssue> {
	let mut issues = Vec::new();

	if raw.tag("Result").and_then(GameResult::from_token).is_none() {
		issues.push(PrecheckIssue::MissingResult);
	}
	if raw.tag("White").is_none() || raw.tag("Black").is_none() {
		issues.push(PrecheckIssue::MissingPlayers);
	}

	let has_moves = raw
		.movetext
		.split_whitespace()
		.filter(|token| GameResult::from_token(token).is_none())
		.any(|token| strip_move_number(token).is_some());

	if !has_moves {
		issues.push(PrecheckIssue::EmptyMovetext);
	}

	issues
}

fn parse_tag(line: &str) -> Option<(String, String)> {
	let inner = line.strip_prefix('[')?.strip_suffix(']')?;
	let (key, rest) = inner.split_once(char::is_whitespace)?;
	let quoted = rest.trim();
	let value = quoted.strip_prefix('"')?.strip_suffix('"')?;
	let value = value.replace("\\\"", "\"").replace("\\\\", "\\");

	Some((key.to_string(), value))
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use super::*;

	const RUY: &str = "\
[Event \"Test Match\"]
[White \"Kasparov, Garry\"]
[Black \"Karpov, Anatoly\"]
[Result \"1-0\"]

1. e4 e5 2. Nf3 {main line} Nc6 3. Bb5 a6 $1 (3... Nf6 4. O-O) 4. Ba4 Nf6
5. O-O 1-0

[Event \"Second\"]
[Result \"0-1\"]

1. d4 d5 0-1
";

	fn stream(text: &str) -> GameStream<Cursor<&[u8]>> {
		GameStream::new(Cursor::new(text.as_bytes()))
	}

	#[test]
	fn splits_concatenated_games() {
		let games: Vec<_> = stream(RUY).collect::<Result<_, _>>().expect("clean stream");

		assert_eq!(games.len(), 2);
		assert_eq!(games[0].tag("White"), Some("Kasparov, Garry"));
		assert_eq!(games[1].tag("Event"), Some("Second"));
	}

	#[test]
	fn replays_moves_and_skips_comments_variations_and_nags() {
		let games: Vec<_> = stream(RUY).collect::<Result<_, _>>().expect("clean stream");
		let parsed = parse_game(&games[0]).expect("parseable game");

		assert_eq!(parsed.result, GameResult::WhiteWins);
		assert_eq!(parsed.snapshots.len(), 9);
		assert_eq!(parsed.snapshots[0].san, "e4");
		assert_eq!(parsed.snapshots[8].san, "O-O");
		assert!(
			parsed.snapshots[0]
				.fen
				.starts_with("rnbqkbnr/pppppppp/8/8/4P3/8/PPPPPPPP/RNBQKBNR b")
		);
	}

	#[test]
	fn side_to_move_flips_each_ply_and_move_numbers_advance() {
		let games: Vec<_> = stream(RUY).collect::<Result<_, _>>().expect("clean stream");
		let parsed = parse_game(&games[0]).expect("parseable game");

		for snapshot in &parsed.snapshots {
			let expected =
				if snapshot.ply % 2 == 1 { Side::White } else { Side::Black };

			assert_eq!(snapshot.side_to_move, expected, "ply {}", snapshot.ply);
			assert_eq!(snapshot.move_number, snapshot.ply.div_ceil(2));
		}
	}

	#[test]
	fn game_without_moves_fails_but_stream_continues() {
		let text = "\
[Event \"Empty\"]
[Result \"*\"]

*

[Event \"Real\"]
[Result \"1-0\"]

1. e4 1-0
";
		let games: Vec<_> = stream(text).collect::<Result<_, _>>().expect("clean stream");

		assert_eq!(games.len(), 2);
		assert!(matches!(parse_game(&games[0]), Err(PgnError::NoMoves)));
		assert_eq!(parse_game(&games[1]).expect("second game parses").snapshots.len(), 1);
	}

	#[test]
	fn illegal_san_reports_the_failing_ply() {
		let text = "[Result \"*\"]\n\n1. e4 e5 2. Ke2 Qh4 3. Nc6 *\n";
		let games: Vec<_> = stream(text).collect::<Result<_, _>>().expect("clean stream");

		match parse_game(&games[0]) {
			Err(PgnError::IllegalMove { ply, san }) => {
				assert_eq!(ply, 5);
				assert_eq!(san, "Nc6");
			},
			other => panic!("expected IllegalMove, got {other:?}"),
		}
	}

	#[test]
	fn fen_tag_seeds_the_starting_position() {
		let text = "\
[FEN \"8/4P1k1/8/8/8/8/2K5/8 w - - 0 40\"]
[Result \"1-0\"]

40. e8=Q 1-0
";
		let games: Vec<_> = stream(text).collect::<Result<_, _>>().expect("clean stream");
		let parsed = parse_game(&games[0]).expect("promotion game");

		assert_eq!(parsed.snapshots[0].move_number, 40);
		assert!(parsed.snapshots[0].fen.starts_with("4Q3/6k1/8/8/8/8/2K5/8 b"));
	}

	#[test]
	fn invalid_utf8_is_bad_encoding() {
		let bytes: &[u8] = b"[Event \"x\"]\n\n1. e4 \xff\xfe 1-0\n";
		let mut games = GameStream::new(Cursor::new(bytes));

		assert!(matches!(games.next(), Some(Err(PgnError::BadEncoding))));
		assert!(games.next().is_none());
	}

	#[test]
	fn precheck_flags_offending_games() {
		let text = "[Event \"x\"]\n\n*\n";
		let games: Vec<_> = stream(text).collect::<Result<_, _>>().expect("clean stream");
		let issues = precheck_game(&games[0]);

		assert!(issues.contains(&PrecheckIssue::MissingResult));
		assert!(issues.contains(&PrecheckIssue::MissingPlayers));
		assert!(issues.contains(&PrecheckIssue::EmptyMovetext));
	}
}
