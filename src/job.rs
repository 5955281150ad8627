use std::io::Write;
use std::os::unix::io::{AsFd, OwnedFd};
use std::thread;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags};
use nix::sys::signal::{self, SigSet, SigmaskHow};
use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::config::WaitStrategy;
use crate::error::ExecError;
use crate::global;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum State { Running, Completed }

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Proccess {
	pub pid: Pid,
	pub state: State,
}

/// How a foreground wait ended.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum WaitOutcome {
	Completed,
	/// A terminal stop arrived; the job was left running unobserved.
	Stopped(Pid),
}

/// The processes of one pipeline, in stage order.
#[derive(Debug, Default)]
pub struct Job {
	pub proccesses: Vec<Proccess>,
}

impl Job {
	pub fn new(size_hint: usize) -> Job {
		Job { proccesses: Vec::with_capacity(size_hint) }
	}

	pub fn push(&mut self, pid: Pid) {
		self.proccesses.push(Proccess { pid: pid, state: State::Running });
	}

	pub fn is_empty(&self) -> bool {
		self.proccesses.is_empty()
	}

	pub fn pids(&self) -> Vec<Pid> {
		self.proccesses.iter().map(|pr| pr.pid).collect()
	}

	/// The pid terminal signals are forwarded to.
	pub fn last_pid(&self) -> Option<Pid> {
		self.proccesses.last().map(|pr| pr.pid)
	}

	pub fn state(&self) -> State {
		if self.proccesses.iter().all(|pr| pr.state == State::Completed) {
			State::Completed
		} else {
			State::Running
		}
	}

	/// Blocks until every stage has completed or a terminal stop arrives.
	/// The foreground slot holds the last stage's pid for the duration.
	pub fn wait(&mut self, state: &global::State) -> WaitOutcome {
		let fg = match self.last_pid() {
			Some(pid) => pid,
			None => return WaitOutcome::Completed,
		};
		state.relay.set_foreground(fg);
		tracing::debug!(pids = ?self.pids(), strategy = ?state.config.wait, "waiting for foreground job");
		let outcome = match state.config.wait {
			WaitStrategy::Event => self.wait_event(state, fg),
			WaitStrategy::Poll => self.wait_poll(state, fg),
		};
		state.relay.clear_foreground();
		outcome
	}

	/// Reports every pid and returns without waiting. Exit statuses of
	/// background stages are never collected.
	pub fn background<W: Write>(self, out: &mut W) -> Vec<Pid> {
		let pids = self.pids();
		for pid in &pids {
			let _ = writeln!(out, "Sent to background: {}", pid);
		}
		let _ = out.flush();
		pids
	}

	fn running(&mut self) -> impl Iterator<Item = &mut Proccess> {
		self.proccesses.iter_mut().filter(|pr| pr.state == State::Running)
	}

	fn wait_poll(&mut self, state: &global::State, fg: Pid) -> WaitOutcome {
		loop {
			for pr in self.running() {
				if let Err(e) = pr.try_reap() {
					// dropped from tracking so a persistent failure cannot spin forever
					state.report(&ExecError::Wait(e));
					pr.state = State::Completed;
				}
			}
			if self.state() == State::Completed {
				return WaitOutcome::Completed;
			}
			if state.relay.stopped(fg) {
				return WaitOutcome::Stopped(fg);
			}
			thread::sleep(state.config.poll_interval);
		}
	}

	fn wait_event(&mut self, state: &global::State, fg: Pid) -> WaitOutcome {
		let mut fds: Vec<(usize, OwnedFd)> = Vec::with_capacity(self.proccesses.len());
		for (i, pr) in self.proccesses.iter_mut().enumerate() {
			match pidfd::open(pr.pid) {
				Ok(fd) => fds.push((i, fd)),
				// already gone; reap in case it is a zombie
				Err(Errno::ESRCH) => { let _ = pr.try_reap(); pr.state = State::Completed; },
				Err(e) => {
					tracing::warn!(error = %e, "pidfd unavailable, falling back to polling");
					return self.wait_poll(state, fg);
				},
			}
		}

		// Relayed signals stay blocked except inside ppoll, so a stop that
		// arrives between the check and the wait still interrupts the wait.
		let mask = match MaskGuard::block(crate::signal::relayed_set()) {
			Ok(guard) => guard,
			Err(e) => {
				state.report(&ExecError::Wait(e));
				return self.wait_poll(state, fg);
			},
		};
		loop {
			if fds.is_empty() {
				return WaitOutcome::Completed;
			}
			if state.relay.stopped(fg) {
				return WaitOutcome::Stopped(fg);
			}
			let ready: Vec<usize> = {
				let mut pfds: Vec<PollFd> = fds.iter().map(|(_, fd)| PollFd::new(fd.as_fd(), PollFlags::POLLIN)).collect();
				match nix::poll::ppoll(&mut pfds, None, Some(mask.previous)) {
					Ok(_) => pfds.iter().enumerate()
						.filter(|&(_, p)| p.revents().map_or(false, |r| !r.is_empty()))
						.map(|(k, _)| k)
						.collect(),
					Err(Errno::EINTR) => vec![],
					Err(e) => {
						state.report(&ExecError::Wait(e));
						drop(pfds);
						drop(fds);
						drop(mask);
						return self.wait_poll(state, fg);
					},
				}
			};
			for &k in ready.iter().rev() {
				let (i, _fd) = fds.remove(k);
				let pr = &mut self.proccesses[i];
				if let Err(e) = pr.try_reap() {
					state.report(&ExecError::Wait(e));
				}
				pr.state = State::Completed;
			}
		}
	}
}

impl Proccess {
	/// Non-blocking status check. "No such child" counts as completed:
	/// with child-termination ignored the kernel reaps stages itself.
	fn try_reap(&mut self) -> nix::Result<()> {
		match wait::waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
			Ok(WaitStatus::StillAlive) | Err(Errno::EINTR) => Ok(()),
			Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) | Err(Errno::ECHILD) => {
				self.state = State::Completed;
				Ok(())
			},
			Ok(_) => Ok(()),
			Err(e) => Err(e),
		}
	}
}

/// Blocks a signal set for its lifetime, restoring the previous mask on drop.
struct MaskGuard {
	previous: SigSet,
}

impl MaskGuard {
	fn block(set: SigSet) -> nix::Result<MaskGuard> {
		let mut previous = SigSet::empty();
		signal::sigprocmask(SigmaskHow::SIG_BLOCK, Some(&set), Some(&mut previous))?;
		Ok(MaskGuard { previous: previous })
	}
}

impl Drop for MaskGuard {
	fn drop(&mut self) {
		let _ = signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(&self.previous), None);
	}
}

#[cfg(target_os = "linux")]
mod pidfd {
	use std::os::unix::io::{FromRawFd, OwnedFd, RawFd};

	use nix::errno::Errno;
	use nix::unistd::Pid;

	pub fn open(pid: Pid) -> nix::Result<OwnedFd> {
		// SAFETY: pidfd_open takes no pointers.
		let fd = unsafe { libc::syscall(libc::SYS_pidfd_open, pid.as_raw(), 0) };
		if fd < 0 {
			return Err(Errno::last());
		}
		// SAFETY: the kernel just handed us this descriptor.
		Ok(unsafe { OwnedFd::from_raw_fd(fd as RawFd) })
	}
}

#[cfg(not(target_os = "linux"))]
mod pidfd {
	use std::os::unix::io::OwnedFd;

	use nix::errno::Errno;
	use nix::unistd::Pid;

	pub fn open(_: Pid) -> nix::Result<OwnedFd> {
		Err(Errno::ENOSYS)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::process::Command;
	use std::time::{Duration, Instant};

	use crate::config::Config;

	fn spawn(args: &[&str]) -> Pid {
		let child = Command::new(args[0]).args(&args[1..]).spawn().unwrap();
		Pid::from_raw(child.id() as i32)
	}

	fn state_with(wait: WaitStrategy) -> global::State {
		global::State::detached("ish", Config { wait: wait, ..Config::default() })
	}

	#[test]
	fn waits_for_every_stage() {
		for &strategy in &[WaitStrategy::Event, WaitStrategy::Poll] {
			let state = state_with(strategy);
			let mut job = Job::new(2);
			job.push(spawn(&["sleep", "0.2"]));
			job.push(spawn(&["true"]));
			let start = Instant::now();
			assert_eq!(job.wait(&state), WaitOutcome::Completed);
			assert!(start.elapsed() >= Duration::from_millis(200), "{:?}", strategy);
			assert_eq!(job.state(), State::Completed);
			assert_eq!(state.relay.foreground(), None);
		}
	}

	#[test]
	fn foreground_slot_holds_last_stage() {
		let state = state_with(WaitStrategy::Poll);
		let mut job = Job::new(2);
		let first = spawn(&["sleep", "0.3"]);
		let last = spawn(&["sleep", "0.3"]);
		job.push(first);
		job.push(last);
		let relay = state.relay;
		let watcher = thread::spawn(move || {
			thread::sleep(Duration::from_millis(100));
			relay.foreground()
		});
		job.wait(&state);
		assert_eq!(watcher.join().unwrap(), Some(last));
	}

	#[test]
	fn unknown_child_counts_as_completed() {
		let state = state_with(WaitStrategy::Poll);
		let mut job = Job::new(1);
		// pid 1 exists but is not our child
		job.push(Pid::from_raw(1));
		assert_eq!(job.wait(&state), WaitOutcome::Completed);
	}

	#[test]
	fn stop_notice_ends_the_wait() {
		// polling only: the event strategy wakes on real signal delivery,
		// and a real SIGTSTP would stop the test binary itself
		let state = state_with(WaitStrategy::Poll);
		let pid = spawn(&["sleep", "5"]);
		let mut job = Job::new(1);
		job.push(pid);
		let relay = state.relay;
		let stopper = thread::spawn(move || {
			thread::sleep(Duration::from_millis(100));
			relay.on_signal(nix::sys::signal::Signal::SIGTSTP);
		});
		assert_eq!(job.wait(&state), WaitOutcome::Stopped(pid));
		stopper.join().unwrap();
		assert_eq!(relay.take_notices(), vec![crate::signal::Notice::Stop(Some(pid))]);
		let _ = wait::waitpid(pid, Some(WaitPidFlag::WUNTRACED));
		let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGKILL);
		let _ = wait::waitpid(pid, None);
	}

	#[test]
	fn stop_with_empty_slot_does_not_end_a_later_wait() {
		for &strategy in &[WaitStrategy::Event, WaitStrategy::Poll] {
			let state = state_with(strategy);
			state.relay.on_signal(nix::sys::signal::Signal::SIGTSTP);
			let mut job = Job::new(1);
			job.push(spawn(&["sleep", "0.3"]));
			let start = Instant::now();
			assert_eq!(job.wait(&state), WaitOutcome::Completed, "{:?}", strategy);
			assert!(start.elapsed() >= Duration::from_millis(300), "{:?}", strategy);
			assert_eq!(state.relay.take_notices(), vec![crate::signal::Notice::Stop(None)]);
		}
	}

	#[test]
	fn background_reports_without_waiting() {
		let pid = spawn(&["sleep", "5"]);
		let mut job = Job::new(1);
		job.push(pid);
		let mut out = Vec::new();
		let start = Instant::now();
		assert_eq!(job.background(&mut out), vec![pid]);
		assert!(start.elapsed() < Duration::from_millis(100));
		assert_eq!(String::from_utf8(out).unwrap(), format!("Sent to background: {}\n", pid));
		let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGKILL);
		let _ = wait::waitpid(pid, None);
	}
}
