use std::{ffi, io};
use std::path::PathBuf;

use thiserror::Error;

/// A stage whose program could not be turned into something runnable.
#[derive(Debug, Error)]
pub enum ResolutionError {
	#[error("{0}: Command not found")]
	NotFound(String),
	#[error("{}: {interpreter}: Bad interpreter", script.display())]
	BadInterpreter { script: PathBuf, interpreter: String },
}

#[derive(Debug, Error)]
pub enum ExecError {
	#[error(transparent)]
	Resolution(#[from] ResolutionError),
	#[error("fork failed: {0}")]
	Launch(#[source] nix::Error),
	#[error("{}: {source}", path.display())]
	Redirect {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
	#[error("wait failed: {0}")]
	Wait(#[source] nix::Error),
	#[error("Nul char error: {0}")]
	Nul(#[from] ffi::NulError),
	#[error("{0}")]
	Nix(#[from] nix::Error),
}

/// A word of a parsed line that could not be expanded.
#[derive(Debug, Error)]
pub enum ExpandError {
	#[error("Expansion error: {0}")]
	Pattern(#[from] glob::PatternError),
	#[error("Expansion error: {0}: ambiguous redirect")]
	AmbiguousRedirect(String),
	#[error("Expansion error: empty command")]
	EmptyCommand,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
	#[error("empty command")]
	EmptyCommand,
	#[error("empty redirect")]
	EmptyRedirect,
	#[error("input redirect is only allowed on the first command")]
	MisplacedInput,
	#[error("output redirect is only allowed on the last command")]
	MisplacedOutput,
	#[error("duplicate redirect")]
	DuplicateRedirect,
	#[error("unexpected '{0}'")]
	Unexpected(char),
}
