//! Outcome of a simulated processing attempt.
//!
//! The processing handler draws once per attempt. Production uses a fresh
//! random draw; tests inject a fixed or scripted sequence.

use rand::Rng;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Source of processing outcomes. `true` means success.
pub trait OutcomeSource: Send + Sync {
	fn draw(&self) -> bool;
}

/// Independent Bernoulli draw per attempt.
#[derive(Debug, Clone, Copy)]
pub struct RandomOutcome {
	success_probability: f64,
}

impl RandomOutcome {
	pub fn new(success_probability: f64) -> Self {
		Self {
			success_probability: success_probability.clamp(0.0, 1.0),
		}
	}
}

impl Default for RandomOutcome {
	fn default() -> Self {
		Self::new(0.5)
	}
}

impl OutcomeSource for RandomOutcome {
	fn draw(&self) -> bool {
		rand::rng().random_bool(self.success_probability)
	}
}

/// Always the same outcome.
#[derive(Debug, Clone, Copy)]
pub struct FixedOutcome(pub bool);

impl OutcomeSource for FixedOutcome {
	fn draw(&self) -> bool {
		self.0
	}
}

/// Replays a scripted sequence, then repeats `fallback`.
#[derive(Debug)]
pub struct ScriptedOutcome {
	script: Mutex<VecDeque<bool>>,
	fallback: bool,
}

impl ScriptedOutcome {
	pub fn new(script: impl IntoIterator<Item = bool>, fallback: bool) -> Self {
		Self {
			script: Mutex::new(script.into_iter().collect()),
			fallback,
		}
	}
}

impl OutcomeSource for ScriptedOutcome {
	fn draw(&self) -> bool {
		match self.script.lock() {
			Ok(mut script) => script.pop_front().unwrap_or(self.fallback),
			Err(_) => self.fallback,
		}
	}
}
