use regex::RegexBuilder;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::{MuxError, Result};
use crate::lock;
use crate::rolling::RollingBuffer;

/// Receives child output, one line per call, without the trailing newline.
pub trait OutputSink: Send + Sync {
	fn line(&self, process: &str, line: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
	pub process: String,
	pub line: String,
}

impl fmt::Display for OutputLine {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} | {}", self.process, self.line)
	}
}

/// Logs every output line and keeps the most recent ones of every process.
#[derive(Clone)]
pub struct OutputCapture {
	ring: Arc<Mutex<RollingBuffer<OutputLine>>>,
}

impl OutputCapture {
	pub fn new(max_lines: usize) -> Self {
		Self {
			ring: Arc::new(Mutex::new(RollingBuffer::new(max_lines))),
		}
	}

	pub fn snapshot(&self) -> Vec<OutputLine> {
		lock(&self.ring).iter().cloned().collect()
	}

	/// Buffered lines, rendered as `process | line`, that match the regex
	/// `pattern`. An all-lowercase pattern matches case-insensitively.
	pub fn lastlog(&self, pattern: &str) -> Result<Vec<OutputLine>> {
		let regex = RegexBuilder::new(pattern)
			.case_insensitive(pattern == pattern.to_lowercase())
			.build()
			.map_err(|source| MuxError::InvalidPattern {
				pattern: pattern.to_string(),
				source,
			})?;
		Ok(lock(&self.ring)
			.iter()
			.filter(|l| regex.is_match(&l.to_string()))
			.cloned()
			.collect())
	}
}

impl OutputSink for OutputCapture {
	fn line(&self, process: &str, line: &str) {
		tracing::info!(target: "process", process, "{}", line);
		let entry = OutputLine {
			process: process.to_string(),
			line: line.to_string(),
		};
		lock(&self.ring).push(entry);
	}
}
