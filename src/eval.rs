use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::path::Path;

use nix::fcntl::OFlag;
use nix::unistd::{self, Pid};

use crate::error::ExecError;
use crate::global;
use crate::job;
use crate::launch::{self, StageInput, StageOutput};
use crate::resolve::{self, Invocation};
use crate::search::Search;
use crate::types::CmdLine;

/// Permission bits for files created by an output redirect, before umask.
const REDIRECT_MODE: u32 = 0o666;

#[derive(Debug, PartialEq, Eq)]
pub enum EvalResult {
	/// The foreground pipeline ran to completion.
	Done,
	Background(Vec<Pid>),
	/// A terminal stop interrupted the wait on this pid.
	Stopped(Pid),
	/// Nothing was launched.
	Aborted,
}

struct Redirects {
	input: Option<File>,
	output: Option<File>,
}

impl Redirects {
	fn open(cmdline: &CmdLine) -> Result<Redirects, ExecError> {
		fn redirect_err(path: &Path) -> impl FnOnce(io::Error) -> ExecError + '_ {
			move |source| ExecError::Redirect { path: path.to_path_buf(), source: source }
		}
		let input = match cmdline.input_redirect {
			Some(ref path) => Some(File::open(path).map_err(redirect_err(path))?),
			None => None,
		};
		let output = match cmdline.output_redirect {
			Some(ref path) => Some(
				OpenOptions::new().write(true).create(true).truncate(true).mode(REDIRECT_MODE)
					.open(path).map_err(redirect_err(path))?
			),
			None => None,
		};
		Ok(Redirects { input: input, output: output })
	}

	fn fds(&self) -> Vec<RawFd> {
		self.input.iter().chain(self.output.iter()).map(|f| f.as_raw_fd()).collect()
	}
}

/// Forks every stage, wiring stage `i`'s output to stage `i + 1`'s input.
///
/// Each pipe end is owned by exactly one stage. Right after a stage is
/// forked the parent drops the ends it handed over, and the child closes
/// the one end it was given but does not own, so a reader sees end of
/// input as soon as its writer exits. On a launch failure the remaining
/// stages are skipped; the stages already running are returned for waiting.
fn spawn_stages(state: &mut global::State, invocations: &[Invocation], redirects: &Redirects, is_background: bool,
                job: &mut job::Job) -> Result<(), ExecError> {
	let first_input = match redirects.input {
		Some(ref f) => StageInput::Fd(f.as_raw_fd()),
		None if is_background => StageInput::Detached,
		None => StageInput::Inherit,
	};
	let last_output = match redirects.output {
		Some(ref f) => StageOutput::Fd(f.as_raw_fd()),
		None => StageOutput::Inherit,
	};
	let boundary = redirects.fds();

	let last = invocations.len() - 1;
	let mut prev_read: Option<OwnedFd> = None;
	for (i, invocation) in invocations.iter().enumerate() {
		let pipe = if i == last { None } else { Some(unistd::pipe2(OFlag::O_CLOEXEC)?) };

		let input = match prev_read {
			Some(ref fd) => StageInput::Fd(fd.as_raw_fd()),
			None => first_input,
		};
		let output = match pipe {
			Some((_, ref write)) => StageOutput::Fd(write.as_raw_fd()),
			None => last_output,
		};
		let mut obsolete: Vec<RawFd> = boundary.iter().cloned()
			.filter(|&fd| StageInput::Fd(fd) != input && StageOutput::Fd(fd) != output)
			.collect();
		if let Some((ref read, _)) = pipe {
			obsolete.push(read.as_raw_fd());
		}

		let launched = launch::launch(state, invocation, input, output, &obsolete);

		drop(prev_read.take());
		prev_read = pipe.map(|(read, _write)| read);

		job.push(launched?);
	}
	Ok(())
}

/// Runs one command line to completion (foreground) or dispatches it
/// (background). Every failure is reported on stderr; none is fatal.
pub fn eval(state: &mut global::State, cmdline: &CmdLine) -> EvalResult {
	if cmdline.pipeline.is_empty() {
		return EvalResult::Aborted;
	}
	tracing::debug!(cmdline = %cmdline, "evaluating");

	// Every stage is resolved before anything is forked, so an unknown
	// command anywhere aborts the whole pipeline.
	let search = Search::from_env();
	let invocations: Result<Vec<Invocation>, ExecError> = cmdline.pipeline.iter()
		.map(|stage| resolve::prepare(stage, &state.aliases, &search))
		.collect();
	let invocations = match invocations {
		Ok(v) => v,
		Err(e) => {
			state.report(&e);
			return EvalResult::Aborted;
		},
	};

	let redirects = match Redirects::open(cmdline) {
		Ok(r) => r,
		Err(e) => {
			state.report(&e);
			return EvalResult::Aborted;
		},
	};

	let mut job = job::Job::new(invocations.len());
	if let Err(e) = spawn_stages(state, &invocations, &redirects, cmdline.is_background, &mut job) {
		state.report(&e);
	}
	drop(redirects);

	if job.is_empty() {
		EvalResult::Aborted
	} else if cmdline.is_background {
		EvalResult::Background(job.background(&mut io::stdout()))
	} else {
		match job.wait(state) {
			job::WaitOutcome::Completed => EvalResult::Done,
			job::WaitOutcome::Stopped(pid) => EvalResult::Stopped(pid),
		}
	}
}
