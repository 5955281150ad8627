//! Turns one stage string into something the launcher can run.

use std::ffi::CString;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::builtin::Builtin;
use crate::error::{ExecError, ResolutionError};
use crate::global::AliasTable;
use crate::search::Search;

/// Longest interpreter line the kernel will honour.
const SHEBANG_MAX: u64 = 256;

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Resolved {
	Builtin(Builtin),
	External(PathBuf),
}

/// What `execv` is called with in the stage process.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Exec {
	pub path: CString,
	pub argv: Vec<CString>,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Program {
	Builtin(Builtin),
	External(Exec),
}

/// A fully resolved stage, built before any process is forked.
#[derive(Debug, Clone)]
pub struct Invocation {
	pub name: String,
	pub args: Vec<String>,
	pub program: Program,
}

/// Replaces the first word by its alias, once. Multi-word aliases push
/// their extra words in front of the original arguments.
pub fn expand_alias(words: Vec<String>, aliases: &AliasTable) -> Vec<String> {
	let mut words = words.into_iter();
	let first = match words.next() {
		Some(w) => w,
		None => return vec![],
	};
	let mut expanded: Vec<String> = match aliases.get(&first) {
		Some(value) => value.split_whitespace().map(String::from).collect(),
		None => vec![first],
	};
	expanded.extend(words);
	expanded
}

pub fn resolve(token: &str, search: &Search) -> Result<Resolved, ResolutionError> {
	if let Some(builtin) = Builtin::from_name(token) {
		return Ok(Resolved::Builtin(builtin));
	}
	search.lookup(token).map(Resolved::External).ok_or_else(|| ResolutionError::NotFound(token.to_string()))
}

/// Reads the `#!` line of `path`, returning the interpreter and its optional
/// single argument. Unreadable files are treated as plain executables.
pub fn interpreter_line(path: &Path) -> Option<(String, Option<String>)> {
	let file = match File::open(path) {
		Ok(f) => f,
		Err(e) => {
			tracing::warn!(path = %path.display(), error = %e, "cannot inspect program");
			return None;
		},
	};
	let mut line = Vec::new();
	if let Err(e) = BufReader::new(file).take(SHEBANG_MAX).read_until(b'\n', &mut line) {
		tracing::warn!(path = %path.display(), error = %e, "cannot inspect program");
		return None;
	}
	let rest = line.strip_prefix(b"#!")?;
	let rest = String::from_utf8_lossy(rest);
	let rest = rest.trim();
	let mut parts = rest.splitn(2, |c: char| c == ' ' || c == '\t');
	let interpreter = parts.next().filter(|s| !s.is_empty())?.to_string();
	let arg = parts.next().map(str::trim).filter(|s| !s.is_empty()).map(String::from);
	Some((interpreter, arg))
}

fn cstring(path: &Path) -> Result<CString, ExecError> {
	Ok(CString::new(path.as_os_str().as_bytes())?)
}

fn external(name: &str, path: &Path, args: &[String], search: &Search) -> Result<Exec, ExecError> {
	let mut argv: Vec<CString> = Vec::with_capacity(args.len() + 3);
	let exec_path = match interpreter_line(path) {
		Some((interpreter, arg)) => {
			let interpreter_path = search.lookup(&interpreter).ok_or_else(|| ResolutionError::BadInterpreter {
				script: path.to_path_buf(),
				interpreter: interpreter.clone(),
			})?;
			argv.push(cstring(&interpreter_path)?);
			if let Some(arg) = arg {
				argv.push(CString::new(arg)?);
			}
			argv.push(cstring(path)?);
			interpreter_path
		},
		None => {
			argv.push(CString::new(name)?);
			path.to_path_buf()
		},
	};
	for arg in args {
		argv.push(CString::new(arg.as_str())?);
	}
	Ok(Exec { path: cstring(&exec_path)?, argv: argv })
}

/// Expands aliases in `stage`, classifies its program, and for external
/// programs builds the final `execv` arguments.
pub fn prepare(stage: &str, aliases: &AliasTable, search: &Search) -> Result<Invocation, ExecError> {
	let typed: Vec<String> = stage.split_whitespace().map(String::from).collect();
	let first = typed.first().cloned().unwrap_or_default();
	let mut words = expand_alias(typed, aliases).into_iter();
	// an alias with an empty value leaves nothing to run
	let name = words.next().ok_or(ResolutionError::NotFound(first))?;
	let args: Vec<String> = words.collect();
	let program = match resolve(&name, search)? {
		Resolved::Builtin(b) => Program::Builtin(b),
		Resolved::External(path) => Program::External(external(&name, &path, &args, search)?),
	};
	tracing::debug!(stage = stage, program = ?program, "resolved stage");
	Ok(Invocation { name: name, args: args, program: program })
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use std::io::Write;

	fn aliases(pairs: &[(&str, &str)]) -> AliasTable {
		pairs.iter().map(|&(k, v)| (k.to_string(), v.to_string())).collect()
	}

	fn words(s: &str) -> Vec<String> {
		s.split_whitespace().map(String::from).collect()
	}

	fn c(s: &str) -> CString {
		CString::new(s).unwrap()
	}

	#[test]
	fn alias_expands_once() {
		let table = aliases(&[("ll", "ls -l"), ("a", "b"), ("b", "c")]);
		assert_eq!(expand_alias(words("ll /tmp"), &table), words("ls -l /tmp"));
		assert_eq!(expand_alias(words("a x"), &table), words("b x"));
		assert_eq!(expand_alias(words("x a"), &table), words("x a"));
	}

	#[test]
	fn empty_alias_reports_the_typed_name() {
		let table = aliases(&[("x", "")]);
		let search = Search::new("/bin:/usr/bin");
		match prepare("x", &table, &search) {
			Err(ExecError::Resolution(ResolutionError::NotFound(name))) => assert_eq!(name, "x"),
			other => panic!("{:?}", other.map(|i| i.name)),
		}
	}

	#[test]
	fn self_referencing_alias_does_not_loop() {
		let table = aliases(&[("ls", "ls -F")]);
		assert_eq!(expand_alias(words("ls"), &table), words("ls -F"));
	}

	#[test]
	fn builtins_shadow_path() {
		let dir = tempfile::tempdir().unwrap();
		fs::File::create(dir.path().join("cd")).unwrap();
		let search = Search::new(dir.path());
		assert_eq!(resolve("cd", &search).unwrap(), Resolved::Builtin(Builtin::Cd));
		match resolve("nope", &search) {
			Err(ResolutionError::NotFound(name)) => assert_eq!(name, "nope"),
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn alias_can_name_a_builtin() {
		let table = aliases(&[("here", "pwd")]);
		let inv = prepare("here", &table, &Search::new("")).unwrap();
		assert_eq!(inv.program, Program::Builtin(Builtin::Pwd));
		assert!(inv.args.is_empty());
	}

	#[test]
	fn direct_program_argv() {
		let dir = tempfile::tempdir().unwrap();
		let tool = dir.path().join("tool");
		fs::write(&tool, b"\x7fELF...").unwrap();
		let inv = prepare("tool -x y", &AliasTable::new(), &Search::new(dir.path())).unwrap();
		let expected = Exec { path: c(tool.to_str().unwrap()), argv: vec![c("tool"), c("-x"), c("y")] };
		assert_eq!(inv.program, Program::External(expected));
	}

	#[test]
	fn script_runs_through_interpreter() {
		let dir = tempfile::tempdir().unwrap();
		let interp = dir.path().join("interp");
		fs::File::create(&interp).unwrap();
		let script = dir.path().join("script");
		let mut f = fs::File::create(&script).unwrap();
		writeln!(f, "#! interp  -e \necho hi").unwrap();

		let inv = prepare("script arg", &AliasTable::new(), &Search::new(dir.path())).unwrap();
		let interp = interp.to_str().unwrap();
		let expected = Exec {
			path: c(interp),
			argv: vec![c(interp), c("-e"), c(script.to_str().unwrap()), c("arg")],
		};
		assert_eq!(inv.program, Program::External(expected));
	}

	#[test]
	fn unresolvable_interpreter_is_bad_interpreter() {
		let dir = tempfile::tempdir().unwrap();
		let script = dir.path().join("script");
		fs::write(&script, b"#!/no/such/interpreter\n").unwrap();
		match prepare(script.to_str().unwrap(), &AliasTable::new(), &Search::new("")) {
			Err(ExecError::Resolution(ResolutionError::BadInterpreter { interpreter, .. })) => {
				assert_eq!(interpreter, "/no/such/interpreter");
			},
			other => panic!("unexpected {:?}", other),
		}
	}

	#[test]
	fn interpreter_line_parsing() {
		let dir = tempfile::tempdir().unwrap();
		let file = dir.path().join("f");
		fs::write(&file, b"#!/usr/bin/env python3\n").unwrap();
		assert_eq!(interpreter_line(&file), Some(("/usr/bin/env".into(), Some("python3".into()))));
		fs::write(&file, b"#!\n").unwrap();
		assert_eq!(interpreter_line(&file), None);
		fs::write(&file, b"plain text").unwrap();
		assert_eq!(interpreter_line(&file), None);
	}
}
