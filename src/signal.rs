//! Forwarding of terminal signals to the foreground job.
//!
//! The handler may run at any point of the control thread, so everything it
//! reads or writes is a single atomic word.

use std::sync::atomic::{AtomicI32, Ordering};

use libc::c_int;
use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Pid;

const NO_JOB: i32 = 0;

/// Signals that are relayed to the foreground job.
pub const RELAYED: [Signal; 3] = [Signal::SIGINT, Signal::SIGTSTP, Signal::SIGQUIT];

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Notice {
	Interrupt(Option<Pid>),
	Stop(Option<Pid>),
	Quit(Option<Pid>),
}

impl Notice {
	/// The line printed by the prompt loop, if any. Nothing is printed when
	/// no foreground job received the signal.
	pub fn message(&self) -> Option<String> {
		match *self {
			Notice::Interrupt(Some(_)) => Some(String::new()),
			Notice::Stop(Some(pid)) => Some(format!("Sent to background: {}", pid)),
			Notice::Quit(Some(_)) => Some("Quit (core dumped)".to_string()),
			_ => None,
		}
	}
}

#[derive(Debug)]
pub struct Relay {
	foreground: AtomicI32,
	interrupt: AtomicI32,
	stop: AtomicI32,
	quit: AtomicI32,
	stopped: AtomicI32,
}

/// Pids recorded with a notice; `PENDING_NO_JOB` marks a notice raised
/// while the slot was empty.
const NO_NOTICE: i32 = 0;
const PENDING_NO_JOB: i32 = -1;

pub static RELAY: Relay = Relay::new();

impl Relay {
	pub const fn new() -> Relay {
		Relay {
			foreground: AtomicI32::new(NO_JOB),
			interrupt: AtomicI32::new(NO_NOTICE),
			stop: AtomicI32::new(NO_NOTICE),
			quit: AtomicI32::new(NO_NOTICE),
			stopped: AtomicI32::new(NO_JOB),
		}
	}

	pub fn set_foreground(&self, pid: Pid) {
		self.foreground.store(pid.as_raw(), Ordering::SeqCst);
	}

	pub fn clear_foreground(&self) {
		self.foreground.store(NO_JOB, Ordering::SeqCst);
	}

	pub fn foreground(&self) -> Option<Pid> {
		match self.foreground.load(Ordering::SeqCst) {
			pid if pid > 0 => Some(Pid::from_raw(pid)),
			_ => None,
		}
	}

	/// Body of the signal handler. Forwards `sig` to the foreground job, if
	/// there is one, and records the notice. Async-signal-safe.
	pub fn on_signal(&self, sig: Signal) {
		let pid = self.foreground();
		if let Some(pid) = pid {
			let _ = signal::kill(pid, sig);
		}
		let recorded = pid.map_or(PENDING_NO_JOB, Pid::as_raw);
		match sig {
			Signal::SIGINT => self.interrupt.store(recorded, Ordering::SeqCst),
			Signal::SIGTSTP => {
				self.stop.store(recorded, Ordering::SeqCst);
				if let Some(pid) = pid {
					self.stopped.store(pid.as_raw(), Ordering::SeqCst);
				}
			},
			Signal::SIGQUIT => self.quit.store(recorded, Ordering::SeqCst),
			_ => {},
		}
	}

	/// True once a terminal stop has been forwarded to `pid`, until the
	/// prompt loop takes the notice. A stop raised with no foreground job
	/// stops nobody.
	pub fn stopped(&self, pid: Pid) -> bool {
		self.stopped.load(Ordering::SeqCst) == pid.as_raw()
	}

	/// Drains the recorded notices in interrupt, stop, quit order.
	pub fn take_notices(&self) -> Vec<Notice> {
		fn take(cell: &AtomicI32) -> Option<Option<Pid>> {
			match cell.swap(NO_NOTICE, Ordering::SeqCst) {
				NO_NOTICE => None,
				PENDING_NO_JOB => Some(None),
				pid => Some(Some(Pid::from_raw(pid))),
			}
		}
		self.stopped.store(NO_JOB, Ordering::SeqCst);
		let mut notices = Vec::new();
		if let Some(pid) = take(&self.interrupt) {
			notices.push(Notice::Interrupt(pid));
		}
		if let Some(pid) = take(&self.stop) {
			notices.push(Notice::Stop(pid));
		}
		if let Some(pid) = take(&self.quit) {
			notices.push(Notice::Quit(pid));
		}
		notices
	}
}

/// Runs the relay for one delivered signal and leaves `errno` as the
/// interrupted code saw it. The forwarding `kill(2)` may fail with ESRCH
/// when the job has just exited.
fn relay_preserving_errno(relay: &Relay, signo: c_int) {
	let saved = Errno::last_raw();
	if let Ok(sig) = Signal::try_from(signo) {
		relay.on_signal(sig);
	}
	Errno::set_raw(saved);
}

extern "C" fn handle_signal(signo: c_int) {
	relay_preserving_errno(&RELAY, signo);
}

/// Installs the relay handlers and sets child-termination to ignored, so
/// finished background stages are reaped by the kernel.
///
/// Handlers are installed without `SA_RESTART`: a blocking wait must
/// return early when a terminal signal arrives.
pub fn install() -> nix::Result<()> {
	let relay = SigAction::new(SigHandler::Handler(handle_signal), SaFlags::empty(), SigSet::empty());
	for &sig in RELAYED.iter() {
		// SAFETY: the handler only touches atomics and calls kill(2).
		unsafe { signal::sigaction(sig, &relay)?; }
	}
	let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
	// SAFETY: ignoring a signal installs no code.
	unsafe { signal::sigaction(Signal::SIGCHLD, &ignore)?; }
	Ok(())
}

/// Restores default dispositions in a freshly forked stage process.
pub fn reset_in_child() -> nix::Result<()> {
	let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
	for &sig in RELAYED.iter().chain([Signal::SIGCHLD].iter()) {
		// SAFETY: restoring the default disposition installs no code.
		unsafe { signal::sigaction(sig, &default)?; }
	}
	Ok(())
}

/// The relayed signals as a set, for masking around a blocking wait.
pub fn relayed_set() -> SigSet {
	let mut set = SigSet::empty();
	for &sig in RELAYED.iter() {
		set.add(sig);
	}
	set
}
