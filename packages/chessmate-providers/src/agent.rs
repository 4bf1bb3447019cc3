use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
	#[error("Agent request failed: {0}")]
	Transport(String),
	#[error("Agent rate limited")]
	RateLimited,
	#[error("Agent rejected the request: {0}")]
	Rejected(String),
}
impl AgentError {
	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::Transport(_) | Self::RateLimited)
	}
}

/// The structured judgement the agent returns for one candidate game.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentVerdict {
	pub score: f32,
	#[serde(default)]
	pub themes: Vec<String>,
	#[serde(default)]
	pub explanation: Option<String>,
}
impl AgentVerdict {
	/// Stand-in for an answer that did not parse.
	pub fn neutral() -> Self {
		Self { score: 0.5, themes: Vec::new(), explanation: None }
	}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AgentUsage {
	pub input_tokens: u64,
	pub output_tokens: u64,
	pub reasoning_tokens: u64,
}

#[derive(Debug)]
pub struct AgentReply {
	pub verdict: AgentVerdict,
	pub usage: AgentUsage,
	/// The response arrived but its content was not the expected JSON
	/// object; the verdict is neutral and the caller should warn.
	pub malformed: bool,
}

/// One chat-completion evaluation call. Transport-level failures surface as
/// errors for the caller's retry loop; malformed content is tolerated with a
/// neutral verdict.
pub async fn evaluate(cfg: &chessmate_config::Agent, prompt: &str) -> Result<AgentReply, AgentError> {
	let client = Client::builder()
		.timeout(Duration::from_millis(cfg.timeout_ms))
		.build()
		.map_err(|err| AgentError::Transport(err.to_string()))?;
	let url = format!("{}{}", cfg.api_base, cfg.path);
	let mut body = serde_json::json!({
		"model": cfg.model,
		"reasoning_effort": cfg.reasoning_effort.as_str(),
		"response_format": { "type": "json_object" },
		"messages": [
			{
				"role": "system",
				"content": "You judge how well a chess game matches a request. \
					Reply with a JSON object: {\"score\": 0.0-1.0, \"themes\": [..], \
					\"explanation\": \"..\"}.",
			},
			{ "role": "user", "content": prompt },
		],
	});

	if let Some(verbosity) = cfg.verbosity.as_deref() {
		body["verbosity"] = Value::String(verbosity.to_string());
	}

	let res = client
		.post(url)
		.bearer_auth(&cfg.api_key)
		.json(&body)
		.send()
		.await
		.map_err(|err| AgentError::Transport(err.to_string()))?;
	let status = res.status();

	if status == StatusCode::TOO_MANY_REQUESTS {
		return Err(AgentError::RateLimited);
	}
	if status.is_server_error() {
		return Err(AgentError::Transport(format!("agent returned {status}")));
	}
	if !status.is_success() {
		return Err(AgentError::Rejected(format!("agent returned {status}")));
	}

	let json: Value =
		res.json().await.map_err(|err| AgentError::Transport(err.to_string()))?;

	Ok(parse_reply(&json))
}

fn parse_reply(json: &Value) -> AgentReply {
	let usage = parse_usage(json);
	let content = json
		.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.and_then(|choice| choice.get("message"))
		.and_then(|msg| msg.get("content"))
		.and_then(|c| c.as_str());
	let verdict = content.and_then(|content| serde_json::from_str::<AgentVerdict>(content).ok());

	match verdict {
		Some(mut verdict) => {
			verdict.score = verdict.score.clamp(0.0, 1.0);

			AgentReply { verdict, usage, malformed: false }
		},
		None => AgentReply { verdict: AgentVerdict::neutral(), usage, malformed: true },
	}
}

fn parse_usage(json: &Value) -> AgentUsage {
	let usage = json.get("usage");
	let read = |key: &str| {
		usage.and_then(|usage| usage.get(key)).and_then(|v| v.as_u64()).unwrap_or(0)
	};

	AgentUsage {
		input_tokens: read("prompt_tokens"),
		output_tokens: read("completion_tokens"),
		reasoning_tokens: usage
			.and_then(|usage| usage.get("completion_tokens_details"))
			.and_then(|details| details.get("reasoning_tokens"))
			.and_then(|v| v.as_u64())
			.unwrap_or(0),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_verdict_and_usage() {
		let json = serde_json::json!({
			"choices": [
				{ "message": { "content": "{\"score\": 0.8, \"themes\": [\"king_attack\"], \"explanation\": \"Sharp attack.\"}" } }
			],
			"usage": {
				"prompt_tokens": 420,
				"completion_tokens": 37,
				"completion_tokens_details": { "reasoning_tokens": 120 }
			}
		});
		let reply = parse_reply(&json);

		assert!(!reply.malformed);
		assert!((reply.verdict.score - 0.8).abs() < f32::EPSILON);
		assert_eq!(reply.verdict.themes, vec!["king_attack".to_string()]);
		assert_eq!(reply.usage.input_tokens, 420);
		assert_eq!(reply.usage.reasoning_tokens, 120);
	}

	#[test]
	fn malformed_content_falls_back_to_neutral() {
		let json = serde_json::json!({
			"choices": [ { "message": { "content": "not json at all" } } ],
			"usage": { "prompt_tokens": 10, "completion_tokens": 3 }
		});
		let reply = parse_reply(&json);

		assert!(reply.malformed);
		assert!((reply.verdict.score - 0.5).abs() < f32::EPSILON);
		assert_eq!(reply.usage.input_tokens, 10);
	}

	#[test]
	fn out_of_range_scores_are_clamped() {
		let json = serde_json::json!({
			"choices": [ { "message": { "content": "{\"score\": 7.5}" } } ]
		});
		let reply = parse_reply(&json);

		assert!((reply.verdict.score - 1.0).abs() < f32::EPSILON);
	}
}
