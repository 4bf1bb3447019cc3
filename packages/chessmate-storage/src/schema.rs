pub fn render_schema() -> String {
	expand_includes(include_str!("../../../sql/init.sql"))
}

fn expand_includes(sql: &str) -> String {
	let mut out = String::new();

	for line in sql.lines() {
		let trimmed = line.trim();

		if let Some(path) = trimmed.strip_prefix("\\ir ") {
			match path.trim() {
				"tables/001_players.sql" =>
					out.push_str(include_str!("../../../sql/tables/001_players.sql")),
				"tables/002_games.sql" =>
					out.push_str(include_str!("../../../sql/tables/002_games.sql")),
				"tables/003_positions.sql" =>
					out.push_str(include_str!("../../../sql/tables/003_positions.sql")),
				"tables/004_embedding_jobs.sql" =>
					out.push_str(include_str!("../../../sql/tables/004_embedding_jobs.sql")),
				_ => out.push_str(line),
			}
		} else {
			out.push_str(line);
		}

		out.push('\n');
	}

	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn schema_expands_every_include() {
		let sql = render_schema();

		assert!(!sql.contains("\\ir "));
		assert!(sql.contains("CREATE TABLE IF NOT EXISTS players"));
		assert!(sql.contains("CREATE TABLE IF NOT EXISTS embedding_jobs"));
	}
}
