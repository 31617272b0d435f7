use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitClassification {
	NormalExit(i32),
	Signaled { name: String, number: i32 },
	/// The child was reaped but its status could not be read.
	ReapFailed,
	/// Every escalation signal was sent and the child was never reaped.
	Unreaped,
}

impl ExitClassification {
	pub fn is_success(&self) -> bool {
		matches!(self, ExitClassification::NormalExit(0))
	}
}

impl fmt::Display for ExitClassification {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ExitClassification::NormalExit(code) => write!(f, "exited {}", code),
			ExitClassification::Signaled { name, number } => {
				write!(f, "exited with uncaught signal {} ({})", name, number)
			}
			ExitClassification::ReapFailed => write!(f, "exit status unavailable"),
			ExitClassification::Unreaped => write!(f, "could not be killed"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
	Spawning,
	Running,
	/// Index into the escalation signal list currently in effect.
	Stopping(usize),
	Exited(ExitClassification),
}

impl ProcessState {
	pub fn is_running(&self) -> bool {
		matches!(self, ProcessState::Running | ProcessState::Stopping(_))
	}

	pub fn is_exited(&self) -> bool {
		matches!(self, ProcessState::Exited(_))
	}
}

/// Point-in-time resource usage read from the OS process table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessStats {
	pub rss_bytes: Option<u64>,
	pub elapsed: Option<Duration>,
	pub cpu_time: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activity {
	Running {
		pid: u32,
		stats: ProcessStats,
	},
	Down {
		since: Duration,
	},
	Pending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
	pub name: String,
	pub activity: Activity,
}

impl StatusRow {
	pub fn pid(&self) -> Option<u32> {
		match &self.activity {
			Activity::Running { pid, .. } => Some(*pid),
			_ => None,
		}
	}
}
