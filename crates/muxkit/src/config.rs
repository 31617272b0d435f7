use nix::sys::signal::Signal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{MuxError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
	#[serde(default)]
	pub escalation: EscalationConfig,
	#[serde(default)]
	pub env: EnvScrubConfig,
	#[serde(default = "default_mark_period")]
	pub mark_period_secs: u64,
	#[serde(default = "default_shutdown_timeout")]
	pub shutdown_timeout_secs: u64,
	#[serde(default = "default_buffer_lines")]
	pub buffer_lines: usize,
}

impl Default for SupervisorConfig {
	fn default() -> Self {
		Self {
			escalation: EscalationConfig::default(),
			env: EnvScrubConfig::default(),
			mark_period_secs: default_mark_period(),
			shutdown_timeout_secs: default_shutdown_timeout(),
			buffer_lines: default_buffer_lines(),
		}
	}
}

impl SupervisorConfig {
	pub fn mark_period(&self) -> Duration {
		Duration::from_secs(self.mark_period_secs.max(1))
	}

	pub fn shutdown_timeout(&self) -> Duration {
		Duration::from_secs(self.shutdown_timeout_secs)
	}
}

fn default_mark_period() -> u64 {
	60
}
fn default_shutdown_timeout() -> u64 {
	30
}
fn default_buffer_lines() -> usize {
	10_000
}

/// Signals sent, in order, when a process has to be brought down, and how
/// long to wait for it to be reaped after each one.
#[derive(Debug, Clone, Deserialize)]
pub struct EscalationConfig {
	#[serde(default = "default_signals")]
	pub signals: Vec<String>,
	#[serde(default = "default_retries")]
	pub retries: u32,
	#[serde(default = "default_interval_ms")]
	pub interval_ms: u64,
}

impl Default for EscalationConfig {
	fn default() -> Self {
		Self {
			signals: default_signals(),
			retries: default_retries(),
			interval_ms: default_interval_ms(),
		}
	}
}

fn default_signals() -> Vec<String> {
	vec!["INT".into(), "TERM".into(), "KILL".into()]
}
fn default_retries() -> u32 {
	20
}
fn default_interval_ms() -> u64 {
	100
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationPolicy {
	pub signals: Vec<Signal>,
	pub retries: u32,
	pub interval: Duration,
}

impl EscalationPolicy {
	/// Worst-case time spent waiting for a single signal to take effect.
	pub fn cycle(&self) -> Duration {
		self.interval * self.retries
	}
}

impl Default for EscalationPolicy {
	fn default() -> Self {
		Self {
			signals: vec![Signal::SIGINT, Signal::SIGTERM, Signal::SIGKILL],
			retries: default_retries(),
			interval: Duration::from_millis(default_interval_ms()),
		}
	}
}

impl TryFrom<&EscalationConfig> for EscalationPolicy {
	type Error = MuxError;

	fn try_from(config: &EscalationConfig) -> Result<Self> {
		let signals = config
			.signals
			.iter()
			.map(|s| parse_signal(s))
			.collect::<Result<Vec<_>>>()?;
		Ok(Self {
			signals,
			retries: config.retries,
			interval: Duration::from_millis(config.interval_ms),
		})
	}
}

/// Accepts `INT`, `SIGINT` or `sigint`.
pub fn parse_signal(name: &str) -> Result<Signal> {
	let upper = name.trim().to_ascii_uppercase();
	let full = if upper.starts_with("SIG") {
		upper
	} else {
		format!("SIG{}", upper)
	};
	Signal::from_str(&full).map_err(|_| MuxError::InvalidSignal(name.to_string()))
}

/// Variables of the supervisor's own environment that children must not
/// inherit (toolchain and package-manager pins).
#[derive(Debug, Clone, Deserialize)]
pub struct EnvScrubConfig {
	#[serde(default = "default_strip_prefixes")]
	pub strip_prefixes: Vec<String>,
	#[serde(default = "default_strip_names")]
	pub strip_names: Vec<String>,
}

impl Default for EnvScrubConfig {
	fn default() -> Self {
		Self {
			strip_prefixes: default_strip_prefixes(),
			strip_names: default_strip_names(),
		}
	}
}

fn default_strip_prefixes() -> Vec<String> {
	vec!["BUNDLE_".into(), "GEM_".into()]
}
fn default_strip_names() -> Vec<String> {
	vec!["RUBY".into(), "RUSTUP_TOOLCHAIN".into()]
}
