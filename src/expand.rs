//! Word expansion of a parsed command line: a leading `~`, `$NAME` and
//! `${NAME}` variables, then filename wildcards.
//!
//! Runs before alias expansion, so alias values are taken literally.

use std::env;
use std::path::{Path, PathBuf};

use glob::MatchOptions;

use crate::error::ExpandError;
use crate::types::CmdLine;

type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn from_env(name: &str) -> Option<String> {
	env::var_os(name).map(|v| v.to_string_lossy().into_owned())
}

/// Expands every word of every stage and both redirect targets.
pub fn expand(cmdline: &CmdLine) -> Result<CmdLine, ExpandError> {
	expand_with(cmdline, &from_env)
}

fn expand_with(cmdline: &CmdLine, lookup: Lookup) -> Result<CmdLine, ExpandError> {
	let mut pipeline = Vec::with_capacity(cmdline.pipeline.len());
	for stage in cmdline.pipeline.iter() {
		let mut words = vec![];
		for word in stage.split_whitespace() {
			words.extend(expand_word(word, lookup)?);
		}
		if words.is_empty() {
			return Err(ExpandError::EmptyCommand);
		}
		pipeline.push(words.join(" "));
	}
	let redirect = |path: &Option<PathBuf>| match *path {
		Some(ref path) => expand_redirect(path, lookup).map(Some),
		None => Ok(None),
	};
	Ok(CmdLine {
		pipeline: pipeline,
		input_redirect: redirect(&cmdline.input_redirect)?,
		output_redirect: redirect(&cmdline.output_redirect)?,
		is_background: cmdline.is_background,
	})
}

/// A redirect target must stay a single word.
fn expand_redirect(path: &Path, lookup: Lookup) -> Result<PathBuf, ExpandError> {
	let word = match path.to_str() {
		Some(word) => word,
		None => return Ok(path.to_path_buf()),
	};
	let mut fields = expand_word(word, lookup)?;
	if fields.len() != 1 {
		return Err(ExpandError::AmbiguousRedirect(word.to_string()));
	}
	Ok(PathBuf::from(fields.remove(0)))
}

fn expand_word(word: &str, lookup: Lookup) -> Result<Vec<String>, ExpandError> {
	let word = substitute(&tilde(word, lookup), lookup);
	let mut expanded = vec![];
	// unquoted substitutions split into fields like any other whitespace
	for field in word.split_whitespace() {
		expanded.extend(wildcard(field)?);
	}
	Ok(expanded)
}

fn tilde(word: &str, lookup: Lookup) -> String {
	let rest = match word.strip_prefix('~') {
		Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
		_ => return word.to_string(),
	};
	match lookup("HOME") {
		Some(home) => format!("{}{}", home, rest),
		None => word.to_string(),
	}
}

fn is_name_char(c: char) -> bool {
	c == '_' || c.is_ascii_alphanumeric()
}

/// Replaces `$NAME` and `${NAME}`. Unset variables become empty; a `$` not
/// followed by a name is kept.
fn substitute(word: &str, lookup: Lookup) -> String {
	let mut out = String::with_capacity(word.len());
	let mut rest = word;
	while let Some(at) = rest.find('$') {
		out.push_str(&rest[.. at]);
		let after = &rest[at + 1 ..];
		let (name, tail) = if let Some(braced) = after.strip_prefix('{') {
			match braced.find('}') {
				Some(end) => (&braced[.. end], &braced[end + 1 ..]),
				None => ("", after),
			}
		} else {
			let end = after.find(|c: char| !is_name_char(c)).unwrap_or(after.len());
			(&after[.. end], &after[end ..])
		};
		if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
			out.push('$');
			rest = after;
			continue;
		}
		if let Some(value) = lookup(name) {
			out.push_str(&value);
		}
		rest = tail;
	}
	out.push_str(rest);
	out
}

fn has_wildcard(word: &str) -> bool {
	word.contains(|c: char| matches!(c, '*' | '?' | '['))
}

/// Sorted matches of a wildcard pattern, or the word itself when nothing
/// matches. Hidden entries only match a pattern that spells out the dot.
fn wildcard(word: &str) -> Result<Vec<String>, ExpandError> {
	if !has_wildcard(word) {
		return Ok(vec![word.to_string()]);
	}
	let options = MatchOptions { require_literal_leading_dot: true, ..MatchOptions::new() };
	let paths = glob::glob_with(word, options)?;
	let matches: Vec<String> = paths.flatten().map(|p| p.to_string_lossy().into_owned()).collect();
	if matches.is_empty() {
		Ok(vec![word.to_string()])
	} else {
		Ok(matches)
	}
}
