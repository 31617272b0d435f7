use thiserror::Error;

#[derive(Debug, Error)]
pub enum MuxError {
	#[error("{command}: {message}")]
	Configuration { command: String, message: String },

	#[error("failed to spawn {name}: {source}")]
	Spawn {
		name: String,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to write to {name}: {source}")]
	Input {
		name: String,
		#[source]
		source: std::io::Error,
	},

	#[error("already have process for {name}: {pid}")]
	AlreadyRunning { name: String, pid: u32 },

	#[error("{0}: process already started")]
	AlreadyStarted(String),

	#[error("no process for {0}")]
	UnknownName(String),

	#[error("{0}: not running")]
	NotRunning(String),

	#[error("invalid signal: {0}")]
	InvalidSignal(String),

	#[error("invalid pattern {pattern:?}: {source}")]
	InvalidPattern {
		pattern: String,
		#[source]
		source: regex::Error,
	},
}

impl MuxError {
	pub fn configuration(command: impl Into<String>, message: impl Into<String>) -> Self {
		MuxError::Configuration {
			command: command.into(),
			message: message.into(),
		}
	}
}

pub type Result<T> = std::result::Result<T, MuxError>;
