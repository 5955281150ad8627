use std::env;

use nix::unistd::{self, User};

const MAX_PATH_DEPTH: usize = 2;

/// Keeps the last `MAX_PATH_DEPTH` components of `cwd`, marking a cut with `...`.
pub fn abbreviate(cwd: &str) -> String {
	let parts: Vec<&str> = cwd.split('/').filter(|p| !p.is_empty()).collect();
	if parts.len() <= MAX_PATH_DEPTH {
		return cwd.to_string();
	}
	format!(".../{}", parts[parts.len() - MAX_PATH_DEPTH ..].join("/"))
}

fn user_and_host() -> Option<String> {
	let user = User::from_uid(unistd::getuid()).ok()??;
	match unistd::gethostname() {
		Ok(host) => Some(format!("{}@{}", user.name, host.to_string_lossy())),
		Err(_) => Some(user.name),
	}
}

/// `<user@host ...dir/sub>$ `
pub fn prompt() -> String {
	let cwd = match env::current_dir() {
		Ok(cwd) => abbreviate(&cwd.to_string_lossy()),
		Err(_) => "???".to_string(),
	};
	match user_and_host() {
		Some(who) => format!("<{} {}>$ ", who, cwd),
		None => format!("<{}>$ ", cwd),
	}
}
