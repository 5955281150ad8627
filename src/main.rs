use std::io::{self, BufRead, Write};
use std::process;
use std::time::Duration;

use clap::Parser;
use nix::unistd;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use ish::config::{Config, WaitStrategy};
use ish::{eval, expand, global, parser, prompt, signal};

/// ish - a small shell with pipelines, redirects and background jobs
#[derive(Parser)]
#[command(name = "ish")]
#[command(version, about, long_about = None)]
struct Cli {
	/// Run one command line and exit
	#[arg(short = 'c', long = "command", value_name = "LINE")]
	command: Option<String>,

	/// How to wait for foreground jobs
	#[arg(long, value_enum, default_value = "event")]
	wait: WaitStrategy,

	/// Interval between checks when waiting by polling
	#[arg(long, value_name = "MS", default_value_t = 1)]
	poll_interval_ms: u64,

	/// Never print a prompt
	#[arg(long)]
	no_prompt: bool,
}

impl Cli {
	fn config(&self) -> Config {
		Config {
			wait: self.wait,
			poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
			show_prompt: !self.no_prompt && unistd::isatty(libc::STDIN_FILENO).unwrap_or(false),
		}
	}
}

fn init_logging() {
	let filter = tracing_subscriber::EnvFilter::try_from_env("ISH_LOG")
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(io::stderr)
		.with_target(false)
		.init();
}

fn run_line(state: &mut global::State, line: &[u8]) {
	let cmdline = match parser::parse(line) {
		Ok(Some(cmdline)) => cmdline,
		Ok(None) => return,
		Err(e) => return state.report(&e),
	};
	match expand::expand(&cmdline) {
		Ok(cmdline) => { eval::eval(state, &cmdline); },
		Err(e) => state.report(&e),
	}
}

/// Prints what the relay recorded while the last line ran.
fn report_notices(state: &global::State) {
	let mut stdout = io::stdout();
	for notice in state.relay.take_notices() {
		if let Some(msg) = notice.message() {
			let _ = writeln!(stdout, "{}", msg);
		}
	}
	let _ = stdout.flush();
}

/// Terminal input: line editing and history, with the prompt drawn by the
/// editor. Ctrl-C at the prompt drops the line being typed.
fn edit_lines(state: &mut global::State) -> rustyline::Result<()> {
	let mut editor = DefaultEditor::new()?;
	loop {
		match editor.readline(&prompt::prompt()) {
			Ok(line) => {
				if !line.trim().is_empty() {
					editor.add_history_entry(line.as_str())?;
				}
				run_line(state, line.as_bytes());
			},
			Err(ReadlineError::Interrupted) => {},
			Err(ReadlineError::Eof) => break,
			Err(e) => return Err(e),
		}
		report_notices(state);
	}
	Ok(())
}

/// Piped input: one command line per input line, no prompt.
fn read_lines(state: &mut global::State) {
	let stdin = io::stdin();
	let mut stdin_locked = stdin.lock();
	loop {
		let mut line: Vec<u8> = vec![];
		match stdin_locked.read_until(b'\n', &mut line) {
			Ok(0) => break,
			Ok(_) => run_line(state, &line),
			Err(e) => {
				state.report(&e);
				process::exit(1);
			},
		}
		report_notices(state);
	}
}

fn main() {
	let cli = Cli::parse();
	init_logging();

	let name = std::env::args().next().unwrap_or_else(|| "ish".to_string());
	let mut state = global::State::new(name, cli.config());
	if let Err(e) = signal::install() {
		state.report(&e);
	}

	if let Some(ref line) = cli.command {
		run_line(&mut state, line.as_bytes());
		report_notices(&state);
		return;
	}

	if state.config.show_prompt {
		if let Err(e) = edit_lines(&mut state) {
			state.report(&e);
			process::exit(1);
		}
		println!();
	} else {
		read_lines(&mut state);
	}
}
