//! Process-table queries and the human formatting used by status output.

use chrono::{DateTime, Utc};
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::types::ProcessStats;

/// Best-effort stats for `pid`; every field is `None` once the pid is gone.
pub fn query(pid: u32) -> ProcessStats {
	let mut system = System::new();
	let target = Pid::from_u32(pid);
	system.refresh_processes_specifics(
		ProcessesToUpdate::Some(&[target]),
		true,
		ProcessRefreshKind::everything(),
	);
	match system.process(target) {
		Some(process) => ProcessStats {
			rss_bytes: Some(process.memory()),
			elapsed: Some(Duration::from_secs(process.run_time())),
			cpu_time: Some(Duration::from_millis(process.accumulated_cpu_time())),
		},
		None => ProcessStats::default(),
	}
}

pub fn pretty_seconds(secs: u64) -> String {
	if secs < 60 {
		format!("{} s", secs)
	} else if secs < 60 * 60 {
		format!("{} min", secs / 60)
	} else if secs < 60 * 60 * 24 {
		format!("{} hr", secs / 60 / 60)
	} else {
		format!("{:.1} days", secs as f64 / 60.0 / 60.0 / 24.0)
	}
}

pub fn pretty_bytes(bytes: u64) -> String {
	if bytes < 1024 {
		format!("{}B", bytes)
	} else if bytes < 1024 * 1024 {
		format!("{} kiB", bytes / 1024)
	} else if bytes < 1024 * 1024 * 1024 {
		format!("{} MiB", bytes / 1024 / 1024)
	} else {
		format!("{:.2} GiB", bytes as f64 / (1024u64.pow(3)) as f64)
	}
}

/// `ps`-style duration: `mm:ss`, `hh:mm:ss` or `dd-hh:mm:ss`.
pub fn clock(duration: Duration) -> String {
	let secs = duration.as_secs();
	let (days, rem) = (secs / 86400, secs % 86400);
	let (hours, rem) = (rem / 3600, rem % 3600);
	let (minutes, seconds) = (rem / 60, rem % 60);
	if days > 0 {
		format!("{:02}-{:02}:{:02}:{:02}", days, hours, minutes, seconds)
	} else if hours > 0 {
		format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
	} else {
		format!("{:02}:{:02}", minutes, seconds)
	}
}

/// `at` as `YYYY-MM-DD HH:MM`.
pub fn stamp(at: DateTime<Utc>) -> String {
	at.format("%Y-%m-%d %H:%M").to_string()
}

/// Current UTC time, as [`stamp`] renders it.
pub fn now_stamp() -> String {
	stamp(Utc::now())
}
