use std::time::Duration;

use clap::ValueEnum;

/// How the job tracker waits for a foreground pipeline.
#[derive(Debug, PartialEq, Eq, Clone, Copy, ValueEnum)]
pub enum WaitStrategy {
	/// Block on pidfds until a stage exits or a terminal signal arrives.
	Event,
	/// Non-blocking `waitpid` on every stage, sleeping `poll_interval` between rounds.
	Poll,
}

#[derive(Debug, Clone)]
pub struct Config {
	pub wait: WaitStrategy,
	pub poll_interval: Duration,
	pub show_prompt: bool,
}

impl Default for Config {
	fn default() -> Config {
		Config {
			wait: WaitStrategy::Event,
			poll_interval: Duration::from_millis(1),
			show_prompt: true,
		}
	}
}
