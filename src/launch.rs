use std::fs::File;
use std::io::{self, Write};
use std::mem::ManuallyDrop;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};

use nix::errno::Errno;
use nix::pty;
use nix::unistd::{self, ForkResult, Pid};

use crate::builtin::Mode;
use crate::error::ExecError;
use crate::global;
use crate::resolve::{Invocation, Program};
use crate::signal;

/// Where a stage reads from.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum StageInput {
	/// Keep the shell's standard input.
	Inherit,
	Fd(RawFd),
	/// A fresh pseudo terminal nobody writes to, for background stages
	/// with no input of their own.
	Detached,
}

/// Where a stage writes to.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum StageOutput {
	Inherit,
	Fd(RawFd),
}

fn move_fd(fd: RawFd, target: RawFd) -> nix::Result<()> {
	if fd != target {
		unistd::dup2(fd, target)?;
		unistd::close(fd)?;
	}
	Ok(())
}

fn attach_detached_stdin() -> nix::Result<()> {
	let pty = pty::openpty(None, None)?;
	unistd::dup2(pty.slave.as_raw_fd(), libc::STDIN_FILENO)?;
	// The master stays open for the life of the stage so reads block
	// instead of failing with EIO.
	let _ = pty.master.into_raw_fd();
	Ok(())
}

fn wire_stage(input: StageInput, output: StageOutput, obsolete: &[RawFd]) -> nix::Result<()> {
	match input {
		StageInput::Inherit => {},
		StageInput::Fd(fd) => move_fd(fd, libc::STDIN_FILENO)?,
		StageInput::Detached => attach_detached_stdin()?,
	}
	if let StageOutput::Fd(fd) = output {
		move_fd(fd, libc::STDOUT_FILENO)?;
	}
	for &fd in obsolete {
		unistd::close(fd)?;
	}
	Ok(())
}

/// Standard descriptor as a `File` that is never closed. A forked child
/// must not take the locks behind `io::stdout()`, another thread of the
/// parent may have held them at fork time.
fn raw_stdio(fd: RawFd) -> ManuallyDrop<File> {
	// SAFETY: the descriptor stays open for the rest of the process and
	// ManuallyDrop keeps this handle from closing it.
	ManuallyDrop::new(unsafe { File::from_raw_fd(fd) })
}

/// Runs in the forked stage process and never returns.
fn exec_stage(state: &mut global::State, invocation: &Invocation, input: StageInput, output: StageOutput,
              obsolete: &[RawFd]) -> ! {
	let mut stderr = raw_stdio(libc::STDERR_FILENO);
	let status = match signal::reset_in_child().and_then(|()| wire_stage(input, output, obsolete)) {
		Err(e) => {
			let _ = writeln!(stderr, "{}: {}", state.name, e.desc());
			1
		},
		Ok(()) => match invocation.program {
			Program::Builtin(builtin) => {
				let mut stdout = raw_stdio(libc::STDOUT_FILENO);
				builtin.run(state, &invocation.args, Mode::NonLocal, &mut *stdout, &mut *stderr) as i32
			},
			Program::External(ref exec) => {
				let e = match unistd::execv(&exec.path, &exec.argv) {
					Err(e) => e,
					Ok(never) => match never {},
				};
				let _ = writeln!(stderr, "{}: {}: {}", state.name, invocation.name, e.desc());
				if e == Errno::ENOENT { 127 } else { 126 }
			},
		},
	};
	// SAFETY: _exit skips the parent's atexit handlers and buffers, which
	// this forked copy must not run.
	unsafe { libc::_exit(status) }
}

/// Forks one pipeline stage.
///
/// In the child, `input` and `output` become standard input and output and
/// every descriptor in `obsolete` is closed before anything else happens.
/// A builtin runs in the child for its output and, right after the fork,
/// once more in the shell itself so that its state changes stick.
pub fn launch(state: &mut global::State, invocation: &Invocation, input: StageInput, output: StageOutput,
              obsolete: &[RawFd]) -> Result<Pid, ExecError> {
	// SAFETY: the child only rewires descriptors, resets signal
	// dispositions and then execs or runs a builtin before _exit.
	match unsafe { unistd::fork() }.map_err(ExecError::Launch)? {
		ForkResult::Parent { child } => {
			tracing::debug!(pid = %child, stage = %invocation.name, ?input, ?output, "launched stage");
			if let Program::Builtin(builtin) = invocation.program {
				builtin.run(state, &invocation.args, Mode::Local, &mut io::sink(), &mut io::sink());
			}
			Ok(child)
		},
		ForkResult::Child => exec_stage(state, invocation, input, output, obsolete),
	}
}
