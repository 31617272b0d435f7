use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::unix::AsyncFd;
use tokio::process::Child;
use tokio::sync::{oneshot, Notify};

use crate::command::CommandSpec;
use crate::config::{EnvScrubConfig, EscalationPolicy, SupervisorConfig};
use crate::env::effective_env;
use crate::error::{MuxError, Result};
use crate::events::EventNotifier;
use crate::lock;
use crate::output::OutputSink;
use crate::pty::{self, PtyChild};
use crate::stats;
use crate::types::{ExitClassification, ProcessState, ProcessStats};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessEvent {
	Exited,
}

/// Everything a process needs from its owner besides the command itself.
#[derive(Clone)]
pub struct ProcessContext {
	pub escalation: EscalationPolicy,
	pub env: EnvScrubConfig,
	pub sink: Arc<dyn OutputSink>,
}

impl ProcessContext {
	pub fn from_config(config: &SupervisorConfig, sink: Arc<dyn OutputSink>) -> Result<Self> {
		Ok(Self {
			escalation: EscalationPolicy::try_from(&config.escalation)?,
			env: config.env.clone(),
			sink,
		})
	}
}

/// One incarnation of a command. Started at most once; a restart builds a
/// new `SupervisedProcess`.
pub struct SupervisedProcess {
	id: u64,
	spec: Arc<CommandSpec>,
	context: ProcessContext,
	events: EventNotifier<ProcessEvent>,
	stop_requested: Notify,
	inner: Mutex<Inner>,
}

struct Inner {
	started: bool,
	state: ProcessState,
	pid: Option<u32>,
	started_at: Option<Instant>,
	input: Option<File>,
}

enum Wake {
	Exited(io::Result<ExitStatus>),
	OutputClosed,
	StopRequested,
}

impl SupervisedProcess {
	pub fn new(spec: Arc<CommandSpec>, context: ProcessContext) -> Arc<Self> {
		Arc::new(Self {
			id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
			spec,
			context,
			events: EventNotifier::new(),
			stop_requested: Notify::new(),
			inner: Mutex::new(Inner {
				started: false,
				state: ProcessState::Spawning,
				pid: None,
				started_at: None,
				input: None,
			}),
		})
	}

	/// Serial number distinguishing incarnations of the same name.
	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn name(&self) -> &str {
		self.spec.name()
	}

	pub fn spec(&self) -> &Arc<CommandSpec> {
		&self.spec
	}

	pub fn pid(&self) -> Option<u32> {
		lock(&self.inner).pid
	}

	pub fn state(&self) -> ProcessState {
		lock(&self.inner).state.clone()
	}

	pub fn is_exited(&self) -> bool {
		lock(&self.inner).state.is_exited()
	}

	pub fn exit_classification(&self) -> Option<ExitClassification> {
		match &lock(&self.inner).state {
			ProcessState::Exited(c) => Some(c.clone()),
			_ => None,
		}
	}

	pub fn events(&self) -> &EventNotifier<ProcessEvent> {
		&self.events
	}

	/// Run `handler` once the process has exited. Returns `false` if it
	/// already has, in which case the handler is dropped uncalled.
	pub fn on_exit<F>(&self, handler: F) -> bool
	where
		F: FnOnce() + Send + 'static,
	{
		self.events.once(ProcessEvent::Exited, handler)
	}

	/// Spawn the command on a fresh pty. Must be called from within a tokio
	/// runtime.
	pub fn start(self: &Arc<Self>) -> Result<u32> {
		let mut inner = lock(&self.inner);
		if inner.started {
			return Err(MuxError::AlreadyStarted(self.name().to_string()));
		}

		let env = effective_env(
			std::env::vars_os().filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?))),
			&self.context.env,
			self.spec.env(),
		);

		let name = self.name();
		tracing::info!(process = name, "in {}", self.spec.dir().display());
		if !self.spec.env().is_empty() {
			let mut pairs: Vec<String> = self
				.spec
				.env()
				.iter()
				.map(|(k, v)| format!("{}={}", k, v))
				.collect();
			pairs.sort();
			tracing::info!(process = name, "with {}", pairs.join(" "));
		}
		tracing::info!(process = name, "{}", self.spec.commandline());

		let spawn_error = |source: io::Error| MuxError::Spawn {
			name: name.to_string(),
			source,
		};
		let PtyChild { mut child, pid, master } =
			pty::spawn(self.spec.commandline(), self.spec.dir(), &env).map_err(spawn_error)?;

		let attached = master.try_clone().and_then(|input| Ok((input, AsyncFd::new(master)?)));
		let (input, reader) = match attached {
			Ok(parts) => parts,
			Err(e) => {
				let _ = child.start_kill();
				return Err(spawn_error(e));
			}
		};

		inner.started = true;
		inner.pid = Some(pid);
		inner.started_at = Some(Instant::now());
		inner.input = Some(input);
		inner.state = ProcessState::Running;
		drop(inner);

		tracing::info!(process = name, "started process {}", pid);

		let (closed_tx, closed_rx) = oneshot::channel();
		tokio::spawn(forward_output(
			reader,
			name.to_string(),
			Arc::clone(&self.context.sink),
			closed_tx,
		));
		tokio::spawn(Arc::clone(self).monitor(child, pid, closed_rx));

		Ok(pid)
	}

	/// Begin signal escalation. Does nothing unless the process is running.
	pub fn stop(&self) {
		if lock(&self.inner).state.is_running() {
			self.stop_requested.notify_one();
		}
	}

	pub fn uptime(&self) -> Option<Duration> {
		let inner = lock(&self.inner);
		match inner.state {
			ProcessState::Running | ProcessState::Stopping(_) => inner.started_at.map(|t| t.elapsed()),
			_ => None,
		}
	}

	/// Best-effort resource usage; empty once the process is gone.
	pub fn stats(&self) -> ProcessStats {
		let pid = {
			let inner = lock(&self.inner);
			if !inner.state.is_running() {
				return ProcessStats::default();
			}
			inner.pid
		};
		pid.map(stats::query).unwrap_or_default()
	}

	/// Write raw bytes to the process's terminal.
	pub fn send_input(&self, bytes: &[u8]) -> Result<()> {
		let mut inner = lock(&self.inner);
		let input = inner
			.input
			.as_mut()
			.ok_or_else(|| MuxError::NotRunning(self.name().to_string()))?;
		input.write_all(bytes).map_err(|source| MuxError::Input {
			name: self.name().to_string(),
			source,
		})
	}

	/// Resolves once the process has exited. Never resolves for a process
	/// that is not started.
	pub async fn wait(&self) -> ExitClassification {
		let (tx, rx) = oneshot::channel();
		if self.on_exit(move || {
			let _ = tx.send(());
		}) {
			let _ = rx.await;
		}
		self.exit_classification()
			.unwrap_or(ExitClassification::ReapFailed)
	}

	async fn monitor(self: Arc<Self>, mut child: Child, pid: u32, mut closed: oneshot::Receiver<()>) {
		let wake = tokio::select! {
			status = child.wait() => Wake::Exited(status),
			_ = &mut closed => Wake::OutputClosed,
			_ = self.stop_requested.notified() => Wake::StopRequested,
		};

		let classification = match wake {
			Wake::Exited(Ok(status)) => classify(status),
			Wake::Exited(Err(e)) => {
				tracing::warn!(process = self.name(), "wait failed: {}", e);
				ExitClassification::ReapFailed
			}
			Wake::OutputClosed => match child.try_wait() {
				Ok(Some(status)) => classify(status),
				// the slave closes just before the exit becomes reapable
				Ok(None) => {
					let grace = self.context.escalation.interval;
					let waited = tokio::time::timeout(grace, child.wait()).await;
					match waited {
						Ok(Ok(status)) => classify(status),
						_ => self.escalate(&mut child, pid).await,
					}
				}
				Err(e) => {
					tracing::warn!(process = self.name(), "wait failed: {}", e);
					ExitClassification::ReapFailed
				}
			},
			Wake::StopRequested => self.escalate(&mut child, pid).await,
		};

		self.finish(pid, classification);
	}

	async fn escalate(&self, child: &mut Child, pid: u32) -> ExitClassification {
		let policy = &self.context.escalation;
		let target = Pid::from_raw(pid as i32);

		for (level, signal) in policy.signals.iter().enumerate() {
			match child.try_wait() {
				Ok(Some(status)) => return classify(status),
				Ok(None) => {}
				Err(_) => return ExitClassification::ReapFailed,
			}

			lock(&self.inner).state = ProcessState::Stopping(level);
			tracing::info!(process = self.name(), "sending {} to {}", signal.as_str(), pid);
			let _ = kill(target, *signal);

			for _ in 0..policy.retries {
				tokio::time::sleep(policy.interval).await;
				match child.try_wait() {
					Ok(Some(status)) => return classify(status),
					Ok(None) => {}
					Err(e) => {
						tracing::warn!(process = self.name(), "wait failed: {}", e);
						return ExitClassification::ReapFailed;
					}
				}
			}
		}

		ExitClassification::Unreaped
	}

	fn finish(&self, pid: u32, classification: ExitClassification) {
		match &classification {
			ExitClassification::NormalExit(0) => {
				tracing::info!(process = self.name(), "process {} {}", pid, classification)
			}
			ExitClassification::Unreaped => {
				tracing::error!(process = self.name(), "process {} {}", pid, classification)
			}
			_ => tracing::warn!(process = self.name(), "process {} {}", pid, classification),
		}

		{
			let mut inner = lock(&self.inner);
			inner.state = ProcessState::Exited(classification);
			inner.input = None;
		}
		self.events.fire_final(ProcessEvent::Exited);
	}
}

impl std::fmt::Debug for SupervisedProcess {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let inner = lock(&self.inner);
		f.debug_struct("SupervisedProcess")
			.field("id", &self.id)
			.field("name", &self.name())
			.field("pid", &inner.pid)
			.field("state", &inner.state)
			.finish()
	}
}

fn classify(status: ExitStatus) -> ExitClassification {
	if let Some(code) = status.code() {
		return ExitClassification::NormalExit(code);
	}
	match status.signal() {
		Some(number) => ExitClassification::Signaled {
			name: Signal::try_from(number)
				.map(|s| s.as_str().to_string())
				.unwrap_or_else(|_| format!("signal {}", number)),
			number,
		},
		None => ExitClassification::ReapFailed,
	}
}

async fn forward_output(
	master: AsyncFd<File>,
	name: String,
	sink: Arc<dyn OutputSink>,
	closed: oneshot::Sender<()>,
) {
	let mut pending: Vec<u8> = Vec::new();
	let mut buf = [0u8; 4096];

	loop {
		let mut guard = match master.readable().await {
			Ok(guard) => guard,
			Err(_) => break,
		};
		let read = guard.try_io(|fd| {
			let mut file: &File = fd.get_ref();
			file.read(&mut buf)
		});
		match read {
			Ok(Ok(0)) => break,
			Ok(Ok(n)) => {
				pending.extend_from_slice(&buf[..n]);
				while let Some(end) = pending.iter().position(|&b| b == b'\n') {
					let line: Vec<u8> = pending.drain(..=end).collect();
					emit(sink.as_ref(), &name, &line[..end]);
				}
			}
			Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
			// EIO once every holder of the slave side is gone
			Ok(Err(_)) => break,
			Err(_would_block) => continue,
		}
	}

	if !pending.is_empty() {
		emit(sink.as_ref(), &name, &pending);
	}
	let _ = closed.send(());
}

fn emit(sink: &dyn OutputSink, name: &str, raw: &[u8]) {
	let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
	sink.line(name, &String::from_utf8_lossy(raw));
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn classify_exit_codes_and_signals() {
		assert_eq!(
			classify(ExitStatus::from_raw(3 << 8)),
			ExitClassification::NormalExit(3)
		);
		assert_eq!(
			classify(ExitStatus::from_raw(9)),
			ExitClassification::Signaled {
				name: "SIGKILL".into(),
				number: 9
			}
		);
	}

	struct Lines(Mutex<Vec<String>>);

	impl OutputSink for Lines {
		fn line(&self, _process: &str, line: &str) {
			self.0.lock().unwrap().push(line.to_string());
		}
	}

	#[test]
	fn emit_strips_carriage_return() {
		let sink = Lines(Mutex::new(Vec::new()));
		emit(&sink, "p", b"hello\r");
		emit(&sink, "p", b"bare");
		assert_eq!(*sink.0.lock().unwrap(), vec!["hello", "bare"]);
	}
}
