use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use crate::error::ParseError;
use crate::types::CmdLine;

type ParseResult<T> = Result<T, ParseError>;

struct Parser<'a> {
	line: &'a [u8],
	i: usize,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum RedirectType { Input, Output }

struct Stage<'a> {
	words: Vec<&'a [u8]>,
	input: Option<&'a [u8]>,
	output: Option<&'a [u8]>,
}

impl<'a> Parser<'a> {
	fn proceed_while<F>(&mut self, f: F) where F: Fn(u8) -> bool {
		while let Some(c) = self.line.get(self.i) {
			if !f(*c) { break; }
			self.i += 1;
		}
	}

	fn is_whitespace(c: u8) -> bool {
		matches!(c, b' ' | b'\t' | b'\n' | b'\r')
	}

	fn is_letter(c: u8) -> bool {
		match c {
			b'>' | b'<' | b'&' | b'|' => false,
			_ => !Parser::is_whitespace(c),
		}
	}

	fn skip_whitespaces(&mut self) {
		self.proceed_while(Parser::is_whitespace);
	}

	fn read_word(&mut self) -> &'a [u8] {
		let orig = self.i;
		self.proceed_while(Parser::is_letter);
		&self.line[orig .. self.i]
	}

	fn parse_redirect(&mut self) -> ParseResult<Option<(RedirectType, &'a [u8])>> {
		let typ = match self.line.get(self.i) {
			Some(&b'<') => RedirectType::Input,
			Some(&b'>') => RedirectType::Output,
			_ => return Ok(None),
		};
		self.i += 1;
		self.skip_whitespaces();
		let target = self.read_word();
		if target.is_empty() {
			return Err(ParseError::EmptyRedirect);
		}
		Ok(Some((typ, target)))
	}

	fn parse_stage(&mut self) -> ParseResult<Stage<'a>> {
		let mut stage = Stage { words: vec![], input: None, output: None };
		loop {
			self.skip_whitespaces();
			if let Some((typ, target)) = self.parse_redirect()? {
				let slot = match typ {
					RedirectType::Input => &mut stage.input,
					RedirectType::Output => &mut stage.output,
				};
				if slot.is_some() {
					return Err(ParseError::DuplicateRedirect);
				}
				*slot = Some(target);
				continue;
			}
			let word = self.read_word();
			if word.is_empty() {
				break;
			}
			stage.words.push(word);
		}
		if stage.words.is_empty() {
			return Err(ParseError::EmptyCommand);
		}
		Ok(stage)
	}

	fn parse_cmdline(&mut self) -> ParseResult<CmdLine> {
		let mut stages: Vec<Stage<'a>> = vec![];
		let mut is_background = false;

		loop {
			stages.push(self.parse_stage()?);
			match self.line.get(self.i) {
				Some(&b'|') => { self.i += 1; },
				Some(&b'&') => {
					self.i += 1;
					is_background = true;
					self.skip_whitespaces();
					if let Some(&c) = self.line.get(self.i) {
						return Err(ParseError::Unexpected(c as char));
					}
					break;
				},
				None => { break; },
				Some(&c) => { return Err(ParseError::Unexpected(c as char)); },
			}
		}

		let last = stages.len() - 1;
		let mut cmdline = CmdLine { is_background: is_background, ..CmdLine::default() };
		for (i, stage) in stages.into_iter().enumerate() {
			if let Some(input) = stage.input {
				if i != 0 {
					return Err(ParseError::MisplacedInput);
				}
				cmdline.input_redirect = Some(to_path(input));
			}
			if let Some(output) = stage.output {
				if i != last {
					return Err(ParseError::MisplacedOutput);
				}
				cmdline.output_redirect = Some(to_path(output));
			}
			let words: Vec<String> = stage.words.iter().map(|w| String::from_utf8_lossy(w).into_owned()).collect();
			cmdline.pipeline.push(words.join(" "));
		}
		Ok(cmdline)
	}
}

fn to_path(bytes: &[u8]) -> PathBuf {
	PathBuf::from(OsStr::from_bytes(bytes))
}

/// Parses one input line. Blank lines produce `Ok(None)`.
pub fn parse(line: &[u8]) -> ParseResult<Option<CmdLine>> {
	let mut parser = Parser { line: line, i: 0 };
	parser.skip_whitespaces();
	if parser.i == line.len() {
		return Ok(None);
	}
	parser.parse_cmdline().map(Some)
}
