use std::fmt;
use std::path::PathBuf;

/// One parsed command line: the pipeline stages plus its boundary redirects.
///
/// `input_redirect` only ever feeds the first stage and `output_redirect`
/// only ever receives the last stage's output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CmdLine {
	pub pipeline: Vec<String>,
	pub input_redirect: Option<PathBuf>,
	pub output_redirect: Option<PathBuf>,
	pub is_background: bool,
}

impl CmdLine {
	pub fn single(stage: &str) -> CmdLine {
		CmdLine { pipeline: vec![stage.to_string()], ..CmdLine::default() }
	}
}

impl fmt::Display for CmdLine {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let mut stages = self.pipeline.iter();
		if let Some(first) = stages.next() {
			write!(f, "{}", first)?;
		}
		if let Some(ref input) = self.input_redirect {
			write!(f, " < {}", input.display())?;
		}
		for stage in stages {
			write!(f, " | {}", stage)?;
		}
		if let Some(ref output) = self.output_redirect {
			write!(f, " > {}", output.display())?;
		}
		if self.is_background {
			write!(f, " &")?;
		}
		Ok(())
	}
}
