//! Commands implemented inside the shell.
//!
//! Every builtin runs twice per stage: once in the shell process itself
//! (`Mode::Local`) so that `cd`, `alias` and `unalias` change the shell's
//! own state, and once in the forked stage process (`Mode::NonLocal`) where
//! its output goes through the stage's redirects and pipes. Only the
//! non-local run writes anything.

use std::env;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;

use nix::sys::signal::{self, Signal};
use nix::unistd::{self, Pid};

use crate::global;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Builtin { Cd, Pwd, Kill, Alias, Unalias }

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Mode { Local, NonLocal }

impl Builtin {
	pub fn from_name(name: &str) -> Option<Builtin> {
		match name {
			"cd" => Some(Builtin::Cd),
			"pwd" => Some(Builtin::Pwd),
			"kill" => Some(Builtin::Kill),
			"alias" => Some(Builtin::Alias),
			"unalias" => Some(Builtin::Unalias),
			_ => None,
		}
	}

	pub fn name(self) -> &'static str {
		match self {
			Builtin::Cd => "cd",
			Builtin::Pwd => "pwd",
			Builtin::Kill => "kill",
			Builtin::Alias => "alias",
			Builtin::Unalias => "unalias",
		}
	}

	/// Runs the builtin and returns its exit status.
	pub fn run<O: Write, E: Write>(self, state: &mut global::State, args: &[String], mode: Mode,
	                               out: &mut O, err: &mut E) -> u8 {
		let mut io = BuiltinIo { name: self.name(), mode: mode, out: out, err: err };
		match self {
			Builtin::Cd => builtin_cd(args, &mut io),
			Builtin::Pwd => builtin_pwd(args, &mut io),
			Builtin::Kill => builtin_kill(args, &mut io),
			Builtin::Alias => builtin_alias(state, args, &mut io),
			Builtin::Unalias => builtin_unalias(state, args, &mut io),
		}
	}
}

struct BuiltinIo<'a, O: Write, E: Write> {
	name: &'static str,
	mode: Mode,
	out: &'a mut O,
	err: &'a mut E,
}

impl<'a, O: Write, E: Write> BuiltinIo<'a, O, E> {
	fn is_local(&self) -> bool {
		self.mode == Mode::Local
	}

	fn fail(&mut self, msg: &str) -> u8 {
		if !self.is_local() {
			let _ = writeln!(self.err, "{}: {}", self.name, msg);
			let _ = self.err.flush();
		}
		1
	}

	fn print(&mut self, line: &str) {
		if !self.is_local() {
			let _ = writeln!(self.out, "{}", line);
			let _ = self.out.flush();
		}
	}
}

fn builtin_cd<O: Write, E: Write>(args: &[String], io: &mut BuiltinIo<O, E>) -> u8 {
	let target: PathBuf = match args.len() {
		0 => match env::var_os("HOME") {
			Some(home) => home.into(),
			None => return io.fail("HOME not set"),
		},
		1 => PathBuf::from(&args[0]),
		_ => return io.fail("Too many arguments"),
	};
	match unistd::chdir(target.as_path()) {
		Ok(()) => 0,
		Err(e) => io.fail(e.desc()),
	}
}

fn builtin_pwd<O: Write, E: Write>(args: &[String], io: &mut BuiltinIo<O, E>) -> u8 {
	if io.is_local() {
		return 0;
	}
	if !args.is_empty() {
		return io.fail("Too many arguments");
	}
	match env::current_dir() {
		Ok(cwd) => {
			io.print(&cwd.to_string_lossy());
			0
		},
		Err(e) => io.fail(&e.to_string()),
	}
}

/// Accepts `9`, `-9`, `KILL`, `-KILL` and `SIGKILL`. `Some(None)` is
/// signal 0, which only checks that the process exists.
pub fn parse_signal(s: &str) -> Option<Option<Signal>> {
	let s = s.strip_prefix('-').unwrap_or(s);
	if let Ok(n) = s.parse::<i32>() {
		if n == 0 {
			return Some(None);
		}
		return Signal::try_from(n).ok().map(Some);
	}
	let upper = s.to_ascii_uppercase();
	let name = if upper.starts_with("SIG") { upper } else { format!("SIG{}", upper) };
	Signal::from_str(&name).ok().map(Some)
}

fn builtin_kill<O: Write, E: Write>(args: &[String], io: &mut BuiltinIo<O, E>) -> u8 {
	if io.is_local() {
		return 0;
	}
	const USAGE: &str = "Usage: kill [signo] pid";
	let (sig, pid) = match args.len() {
		1 => (Some(Some(Signal::SIGTERM)), &args[0]),
		2 => (parse_signal(&args[0]), &args[1]),
		_ => return io.fail(USAGE),
	};
	let (sig, pid) = match (sig, pid.parse::<i32>()) {
		(Some(sig), Ok(pid)) => (sig, Pid::from_raw(pid)),
		_ => return io.fail(USAGE),
	};
	match signal::kill(pid, sig) {
		Ok(()) => 0,
		Err(e) => io.fail(e.desc()),
	}
}

fn builtin_alias<O: Write, E: Write>(state: &mut global::State, args: &[String], io: &mut BuiltinIo<O, E>) -> u8 {
	if args.is_empty() {
		let listing: Vec<String> = state.aliases.iter().map(|(k, v)| format!("{}='{}'", k, v)).collect();
		for line in listing {
			io.print(&line);
		}
		return 0;
	}
	let mut status = 0;
	for arg in args {
		match arg.find('=') {
			Some(eq) if eq > 0 => {
				state.aliases.insert(arg[.. eq].to_string(), arg[eq + 1 ..].to_string());
			},
			_ => {
				let found = state.aliases.get(arg.as_str()).map(|v| format!("{}='{}'", arg, v));
				match found {
					Some(line) => io.print(&line),
					None => { status = io.fail(&format!("{}: Not found", arg)); },
				}
			},
		}
	}
	status
}

fn builtin_unalias<O: Write, E: Write>(state: &mut global::State, args: &[String], io: &mut BuiltinIo<O, E>) -> u8 {
	if args.is_empty() {
		return io.fail("Usage: unalias name [name ...]");
	}
	let mut status = 0;
	for arg in args {
		if state.aliases.remove(arg.as_str()).is_none() {
			status = io.fail(&format!("{}: Not found", arg));
		}
	}
	status
}

#[cfg(test)]
mod tests {
	use super::*;

	fn run(state: &mut global::State, line: &str, mode: Mode) -> (u8, String, String) {
		let mut words = line.split_whitespace().map(String::from);
		let builtin = Builtin::from_name(&words.next().unwrap()).unwrap();
		let args: Vec<String> = words.collect();
		let mut out = Vec::new();
		let mut err = Vec::new();
		let status = builtin.run(state, &args, mode, &mut out, &mut err);
		(status, String::from_utf8(out).unwrap(), String::from_utf8(err).unwrap())
	}

	#[test]
	fn classifies_only_the_closed_set() {
		for name in &["cd", "pwd", "kill", "alias", "unalias"] {
			assert_eq!(Builtin::from_name(name).map(|b| b.name()), Some(*name));
		}
		assert_eq!(Builtin::from_name("ls"), None);
		assert_eq!(Builtin::from_name("rehash"), None);
	}

	#[test]
	fn alias_set_query_and_unalias() {
		let mut state = global::State::for_tests();
		assert_eq!(run(&mut state, "alias foo=ls", Mode::Local).0, 0);
		assert_eq!(run(&mut state, "alias foo", Mode::NonLocal), (0, "foo='ls'\n".into(), String::new()));

		assert_eq!(run(&mut state, "unalias foo", Mode::Local).0, 0);
		let (status, out, err) = run(&mut state, "alias foo", Mode::NonLocal);
		assert_eq!((status, out.as_str()), (1, ""));
		assert_eq!(err, "alias: foo: Not found\n");
	}

	#[test]
	fn alias_listing_is_sorted_and_local_is_silent() {
		let mut state = global::State::for_tests();
		run(&mut state, "alias zz=echo aa=cat", Mode::Local);
		assert_eq!(run(&mut state, "alias", Mode::Local).1, "");
		assert_eq!(run(&mut state, "alias", Mode::NonLocal).1, "aa='cat'\nzz='echo'\n");
		// a leading '=' is a query, not an assignment
		let (status, _, err) = run(&mut state, "alias =x", Mode::NonLocal);
		assert_eq!((status, err.as_str()), (1, "alias: =x: Not found\n"));
	}

	#[test]
	fn unalias_reports_each_missing_name() {
		let mut state = global::State::for_tests();
		run(&mut state, "alias a=b", Mode::Local);
		let (status, _, err) = run(&mut state, "unalias x a y", Mode::NonLocal);
		assert_eq!(status, 1);
		assert_eq!(err, "unalias: x: Not found\nunalias: y: Not found\n");
		assert!(state.aliases.is_empty());

		let (_, _, err) = run(&mut state, "unalias", Mode::NonLocal);
		assert_eq!(err, "unalias: Usage: unalias name [name ...]\n");
		assert_eq!(run(&mut state, "unalias", Mode::Local), (1, String::new(), String::new()));
	}

	#[test]
	fn cd_with_too_many_arguments_stays_put() {
		let mut state = global::State::for_tests();
		let before = env::current_dir().unwrap();
		let (status, _, err) = run(&mut state, "cd a b", Mode::NonLocal);
		assert_eq!(status, 1);
		assert_eq!(err, "cd: Too many arguments\n");
		assert_eq!(env::current_dir().unwrap(), before);
	}

	#[test]
	fn pwd_rejects_arguments() {
		let mut state = global::State::for_tests();
		assert_eq!(run(&mut state, "pwd x", Mode::NonLocal).2, "pwd: Too many arguments\n");
		let cwd = env::current_dir().unwrap();
		assert_eq!(run(&mut state, "pwd", Mode::NonLocal).1, format!("{}\n", cwd.display()));
	}

	#[test]
	fn kill_usage_and_signal_names() {
		let mut state = global::State::for_tests();
		let usage = "kill: Usage: kill [signo] pid\n";
		assert_eq!(run(&mut state, "kill", Mode::NonLocal).2, usage);
		assert_eq!(run(&mut state, "kill 1 2 3", Mode::NonLocal).2, usage);
		assert_eq!(run(&mut state, "kill x", Mode::NonLocal).2, usage);
		assert_eq!(run(&mut state, "kill BOGUS 1", Mode::NonLocal).2, usage);

		assert_eq!(parse_signal("9"), Some(Some(Signal::SIGKILL)));
		assert_eq!(parse_signal("-INT"), Some(Some(Signal::SIGINT)));
		assert_eq!(parse_signal("sigterm"), Some(Some(Signal::SIGTERM)));
		assert_eq!(parse_signal("0"), Some(None));
		assert_eq!(parse_signal("999"), None);
	}

	#[test]
	fn kill_delivers_to_a_child() {
		let mut state = global::State::for_tests();
		let mut child = std::process::Command::new("sleep").arg("5").spawn().unwrap();
		let line = format!("kill INT {}", child.id());
		assert_eq!(run(&mut state, &line, Mode::NonLocal).0, 0);
		use std::os::unix::process::ExitStatusExt;
		assert_eq!(child.wait().unwrap().signal(), Some(libc::SIGINT));
	}
}
