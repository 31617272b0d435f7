use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;
use tokio::sync::oneshot;

use crate::command::CommandSpec;
use crate::error::{MuxError, Result};
use crate::events::EventNotifier;
use crate::lock;
use crate::process::{ProcessContext, SupervisedProcess};
use crate::stats::{clock, pretty_bytes, pretty_seconds};
use crate::types::{Activity, StatusRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSetEvent {
	/// The last active process exited.
	Stopped,
}

type Callback = Box<dyn FnOnce() + Send>;

/// Named commands and the processes currently running them.
pub struct CommandSet {
	context: ProcessContext,
	state: Mutex<State>,
	events: EventNotifier<CommandSetEvent>,
}

#[derive(Default)]
struct State {
	order: Vec<String>,
	commands: HashMap<String, Arc<CommandSpec>>,
	processes: HashMap<String, Arc<SupervisedProcess>>,
	stopped_at: HashMap<String, Instant>,
	max_width: usize,
}

impl State {
	fn active(&self, name: &str) -> Option<&Arc<SupervisedProcess>> {
		self.processes.get(name).filter(|p| !p.is_exited())
	}
}

impl CommandSet {
	pub fn new(context: ProcessContext) -> Arc<Self> {
		Arc::new(Self {
			context,
			state: Mutex::new(State::default()),
			events: EventNotifier::new(),
		})
	}

	pub fn context(&self) -> &ProcessContext {
		&self.context
	}

	pub fn events(&self) -> &EventNotifier<CommandSetEvent> {
		&self.events
	}

	/// Store `spec`, suffixing its name (`foo2`, `foo3`, ...) if already
	/// taken. Returns the name it was stored under.
	pub fn add(&self, spec: CommandSpec) -> String {
		let mut state = lock(&self.state);
		let base = spec.name().to_string();
		let mut name = base.clone();
		let mut n = 2;
		while state.commands.contains_key(&name) {
			name = format!("{}{}", base, n);
			n += 1;
		}

		state.max_width = state.max_width.max(name.len());
		state.order.push(name.clone());
		state.commands.insert(name.clone(), Arc::new(spec.with_name(name.clone())));
		name
	}

	pub fn add_and_start(self: &Arc<Self>, spec: CommandSpec) -> Result<Arc<SupervisedProcess>> {
		let name = self.add(spec);
		self.start(&name)
	}

	pub fn start(self: &Arc<Self>, name: &str) -> Result<Arc<SupervisedProcess>> {
		let mut state = lock(&self.state);
		let spec = state
			.commands
			.get(name)
			.cloned()
			.ok_or_else(|| MuxError::UnknownName(name.to_string()))?;
		if let Some(existing) = state.active(name) {
			return Err(MuxError::AlreadyRunning {
				name: name.to_string(),
				pid: existing.pid().unwrap_or(0),
			});
		}

		let process = SupervisedProcess::new(spec, self.context.clone());
		self.watch(&process);
		state.processes.insert(name.to_string(), Arc::clone(&process));
		if let Err(e) = process.start() {
			state.processes.remove(name);
			return Err(e);
		}
		Ok(process)
	}

	fn watch(self: &Arc<Self>, process: &Arc<SupervisedProcess>) {
		let set: Weak<Self> = Arc::downgrade(self);
		let name = process.name().to_string();
		let id = process.id();
		process.on_exit(move || {
			if let Some(set) = set.upgrade() {
				set.process_exited(&name, id);
			}
		});
	}

	fn process_exited(&self, name: &str, id: u64) {
		let all_stopped = {
			let mut state = lock(&self.state);
			if state.processes.get(name).is_some_and(|p| p.id() == id) {
				state.processes.remove(name);
			}
			if state.commands.contains_key(name) && state.active(name).is_none() {
				state.stopped_at.insert(name.to_string(), Instant::now());
			}
			state.processes.values().all(|p| p.is_exited())
		};
		if all_stopped {
			self.events.fire(CommandSetEvent::Stopped);
		}
	}

	/// Ask the process under `name` to stop. It is forgotten immediately,
	/// without waiting for it to exit.
	pub fn stop(&self, name: &str) -> Result<()> {
		let process = lock(&self.state)
			.processes
			.remove(name)
			.filter(|p| !p.is_exited())
			.ok_or_else(|| MuxError::NotRunning(name.to_string()))?;
		process.stop();
		Ok(())
	}

	/// Stop the active process and start a new one once it has exited, or
	/// just start `name` if nothing is running.
	pub fn restart(self: &Arc<Self>, name: &str) -> Result<()> {
		let active = {
			let state = lock(&self.state);
			if !state.commands.contains_key(name) {
				return Err(MuxError::UnknownName(name.to_string()));
			}
			state.active(name).cloned()
		};

		let Some(process) = active else {
			return self.start(name).map(|_| ());
		};

		let set = Arc::downgrade(self);
		let again = name.to_string();
		let registered = process.on_exit(move || {
			if let Some(set) = set.upgrade() {
				if let Err(e) = set.start(&again) {
					tracing::error!(process = again.as_str(), "restart failed: {}", e);
				}
			}
		});
		if registered {
			process.stop();
			Ok(())
		} else {
			self.start(name).map(|_| ())
		}
	}

	/// Stop (if running) and forget `name`. Unknown names are ignored.
	pub fn remove(&self, name: &str) {
		let process = {
			let mut state = lock(&self.state);
			state.order.retain(|n| n != name);
			state.commands.remove(name);
			state.stopped_at.remove(name);
			state.max_width = state.order.iter().map(String::len).max().unwrap_or(0);
			state.processes.remove(name)
		};
		if let Some(process) = process {
			process.stop();
		}
	}

	/// Signal every active process; returns without waiting.
	pub fn stop_all(&self) {
		for process in self.active() {
			process.stop();
		}
	}

	pub fn is_stopped(&self) -> bool {
		lock(&self.state).processes.values().all(|p| p.is_exited())
	}

	pub fn contains(&self, name: &str) -> bool {
		lock(&self.state).commands.contains_key(name)
	}

	pub fn get(&self, name: &str) -> Option<Arc<CommandSpec>> {
		lock(&self.state).commands.get(name).cloned()
	}

	pub fn names(&self) -> Vec<String> {
		lock(&self.state).order.clone()
	}

	pub fn process(&self, name: &str) -> Option<Arc<SupervisedProcess>> {
		lock(&self.state).active(name).cloned()
	}

	pub fn active(&self) -> Vec<Arc<SupervisedProcess>> {
		lock(&self.state)
			.processes
			.values()
			.filter(|p| !p.is_exited())
			.cloned()
			.collect()
	}

	pub fn max_width(&self) -> usize {
		lock(&self.state).max_width
	}

	pub fn count(&self) -> String {
		let state = lock(&self.state);
		let running = state.processes.values().filter(|p| !p.is_exited()).count();
		format!("{} commands with {} running", state.commands.len(), running)
	}

	/// Call `callback` exactly once, after every one of `processes` has
	/// exited. An empty slice calls back immediately.
	pub fn join<F>(processes: &[Arc<SupervisedProcess>], callback: F)
	where
		F: FnOnce() + Send + 'static,
	{
		if processes.is_empty() {
			callback();
			return;
		}

		let remaining = Arc::new(AtomicUsize::new(processes.len()));
		let callback: Arc<Mutex<Option<Callback>>> = Arc::new(Mutex::new(Some(Box::new(callback))));
		for process in processes {
			let (r, c) = (Arc::clone(&remaining), Arc::clone(&callback));
			if !process.on_exit(move || arrive(&r, &c)) {
				arrive(&remaining, &callback);
			}
		}
	}

	pub fn join_active<F>(&self, callback: F)
	where
		F: FnOnce() + Send + 'static,
	{
		Self::join(&self.active(), callback);
	}

	pub async fn wait_all(processes: &[Arc<SupervisedProcess>]) {
		let (tx, rx) = oneshot::channel();
		Self::join(processes, move || {
			let _ = tx.send(());
		});
		let _ = rx.await;
	}

	/// One row per known name, in the order they were added.
	pub fn status(&self) -> Vec<StatusRow> {
		let entries: Vec<_> = {
			let state = lock(&self.state);
			state
				.order
				.iter()
				.map(|name| {
					(
						name.clone(),
						state.active(name).cloned(),
						state.stopped_at.get(name).copied(),
					)
				})
				.collect()
		};

		entries
			.into_iter()
			.map(|(name, process, stopped_at)| {
				let activity = match (process, stopped_at) {
					(Some(process), _) => match process.pid() {
						Some(pid) => Activity::Running {
							pid,
							stats: process.stats(),
						},
						None => Activity::Pending,
					},
					(None, Some(at)) => Activity::Down { since: at.elapsed() },
					(None, None) => Activity::Pending,
				};
				StatusRow { name, activity }
			})
			.collect()
	}
}

fn arrive(remaining: &AtomicUsize, callback: &Mutex<Option<Callback>>) {
	if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
		let callback = lock(callback).take();
		if let Some(f) = callback {
			f();
		}
	}
}

pub fn format_status(rows: &[StatusRow], width: usize) -> String {
	let width = width.max(4);
	let mut lines = vec![format!(
		"{:<width$} {:>7} {:>10} {:>11} {:>11}",
		"NAME", "PID", "RSS", "TIME", "CPUTIME"
	)];
	for row in rows {
		let line = match &row.activity {
			Activity::Running { pid, stats } => format!(
				"{:<width$} {:>7} {:>10} {:>11} {:>11}",
				row.name,
				pid,
				stats.rss_bytes.map(pretty_bytes).unwrap_or_else(|| "-".into()),
				stats.elapsed.map(clock).unwrap_or_else(|| "-".into()),
				stats.cpu_time.map(clock).unwrap_or_else(|| "-".into()),
			),
			Activity::Down { since } => format!(
				"{:<width$} {:>7} down {}",
				row.name,
				"-",
				pretty_seconds(since.as_secs())
			),
			Activity::Pending => format!("{:<width$} {:>7} (pending)", row.name, "-"),
		};
		lines.push(line.trim_end().to_string());
	}
	lines.join("\n")
}
