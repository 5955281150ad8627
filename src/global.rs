use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};

use crate::config::Config;
use crate::signal;

pub type AliasTable = BTreeMap<String, String>;

/// Everything the prompt loop and the builtins share. Only the control
/// thread touches it; stage processes work on their forked copy.
pub struct State {
	pub name: String,
	pub aliases: AliasTable,
	pub config: Config,
	pub relay: &'static signal::Relay,
}

impl State {
	pub fn new(name: String, config: Config) -> State {
		State { name: name, aliases: AliasTable::new(), config: config, relay: &signal::RELAY }
	}

	/// A state with its own relay, so tests never touch the process-wide slot.
	pub fn detached(name: &str, config: Config) -> State {
		let relay: &'static signal::Relay = Box::leak(Box::new(signal::Relay::new()));
		State { name: name.to_string(), aliases: AliasTable::new(), config: config, relay: relay }
	}

	#[cfg(test)]
	pub fn for_tests() -> State {
		State::detached("ish", Config::default())
	}

	pub fn report(&self, e: &dyn fmt::Display) {
		tracing::debug!(error = %e, "reporting error");
		let mut stderr = io::stderr();
		let _ = writeln!(stderr, "{}: {}", self.name, e);
		let _ = stderr.flush();
	}
}
