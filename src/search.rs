use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::{env, fs, io};

const PATH_KEY: &str = "PATH";

/// Looks programs up in the directories of a PATH value, in order.
///
/// Only directory entries are compared by name; whether the match is
/// actually executable is left for `execv` to find out.
pub struct Search {
	dirs: Vec<PathBuf>,
}

impl Search {
	pub fn from_env() -> Search {
		Search::new(env::var_os(PATH_KEY).unwrap_or_default())
	}

	pub fn new<S: AsRef<OsStr>>(path: S) -> Search {
		let dirs = env::split_paths(path.as_ref()).filter(|d| !d.as_os_str().is_empty()).collect();
		Search { dirs: dirs }
	}

	fn scan_dir(dir: &Path, name: &OsStr) -> io::Result<Option<PathBuf>> {
		for entry in fs::read_dir(dir)? {
			let e = entry?;
			if e.file_name().as_os_str() == name {
				return Ok(Some(e.path()));
			}
		}
		Ok(None)
	}

	/// Returns the first PATH entry named `prog`. Names containing a slash
	/// are taken as paths and returned unchanged if they exist.
	pub fn lookup(&self, prog: &str) -> Option<PathBuf> {
		if prog.contains('/') {
			let path = PathBuf::from(prog);
			return if path.exists() { Some(path) } else { None };
		}
		let name = OsString::from(prog);
		for dir in &self.dirs {
			// unreadable directories are skipped, same as a missing one
			if let Ok(Some(found)) = Search::scan_dir(dir, &name) {
				return Some(found);
			}
		}
		None
	}
}
