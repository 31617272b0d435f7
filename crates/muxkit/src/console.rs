use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::command::{CommandOptions, CommandSpec};
use crate::config::SupervisorConfig;
use crate::error::Result;
use crate::lock;
use crate::output::{OutputCapture, OutputLine};
use crate::process::{ProcessContext, SupervisedProcess};
use crate::registry::{format_status, CommandSet, CommandSetEvent};
use crate::run_with::FilterRegistry;
use crate::sequence::{self, Sequence, Step};
use crate::stats::now_stamp;
use crate::types::StatusRow;

/// The surface a shell or init file drives: builds commands from option
/// maps, owns the current [`CommandSet`] and the captured output.
pub struct Console {
	config: SupervisorConfig,
	context: ProcessContext,
	capture: OutputCapture,
	filters: FilterRegistry,
	state: Mutex<State>,
}

struct State {
	defaults: CommandOptions,
	base_dir: Option<PathBuf>,
	set: Arc<CommandSet>,
	sequences: Vec<Sequence>,
}

impl Console {
	pub fn new(config: SupervisorConfig) -> Result<Arc<Self>> {
		Self::with_filters(config, FilterRegistry::default())
	}

	pub fn with_filters(config: SupervisorConfig, filters: FilterRegistry) -> Result<Arc<Self>> {
		let capture = OutputCapture::new(config.buffer_lines);
		let context = ProcessContext::from_config(&config, Arc::new(capture.clone()))?;
		let set = CommandSet::new(context.clone());
		Ok(Arc::new(Self {
			config,
			context,
			capture,
			filters,
			state: Mutex::new(State {
				defaults: CommandOptions::default(),
				base_dir: None,
				set,
				sequences: Vec::new(),
			}),
		}))
	}

	pub fn config(&self) -> &SupervisorConfig {
		&self.config
	}

	pub fn set(&self) -> Arc<CommandSet> {
		Arc::clone(&lock(&self.state).set)
	}

	pub fn capture(&self) -> &OutputCapture {
		&self.capture
	}

	pub fn default_options(&self) -> CommandOptions {
		lock(&self.state).defaults.clone()
	}

	pub fn set_default_options(&self, defaults: CommandOptions) {
		lock(&self.state).defaults = defaults;
	}

	/// Run `f` with `defaults` layered over the current defaults, then put
	/// the previous ones back.
	pub fn with_defaults<R>(&self, defaults: CommandOptions, f: impl FnOnce(&Self) -> R) -> R {
		let previous = {
			let mut state = lock(&self.state);
			let merged = defaults.merged_over(&state.defaults);
			std::mem::replace(&mut state.defaults, merged)
		};
		let result = f(self);
		lock(&self.state).defaults = previous;
		result
	}

	pub fn base_dir(&self) -> Option<PathBuf> {
		lock(&self.state).base_dir.clone()
	}

	/// Run `f` with relative `chdir`s resolved against `dir`.
	pub fn with_base_dir<R>(&self, dir: impl Into<PathBuf>, f: impl FnOnce(&Self) -> R) -> R {
		let previous = lock(&self.state).base_dir.replace(dir.into());
		let result = f(self);
		lock(&self.state).base_dir = previous;
		result
	}

	/// Register every command of `plan` without starting anything. Commands
	/// that are `noop` or fail to build are left out of the returned plan.
	pub fn add(&self, plan: Vec<Step<CommandOptions>>) -> Vec<Step<String>> {
		plan.into_iter()
			.filter_map(|step| step.filter_map(|options| self.add_one(options)))
			.collect()
	}

	pub fn add_one(&self, options: CommandOptions) -> Option<String> {
		let (merged, base_dir, set) = {
			let state = lock(&self.state);
			(
				options.merged_over(&state.defaults),
				state.base_dir.clone(),
				Arc::clone(&state.set),
			)
		};

		match CommandSpec::build(&merged, base_dir.as_deref(), &self.filters) {
			Ok(Some(spec)) => Some(set.add(spec)),
			Ok(None) => None,
			Err(e) => {
				tracing::error!("{}; not added", e);
				None
			}
		}
	}

	/// Add `plan` and run it step by step.
	pub fn run(&self, plan: Vec<Step<CommandOptions>>) -> Sequence {
		let steps = self.add(plan);
		let set = self.set();
		let sequence = sequence::run(&set, steps);
		let mut state = lock(&self.state);
		state.sequences.retain(|s| !s.is_finished());
		state.sequences.push(sequence.clone());
		sequence
	}

	pub fn start(&self, name: &str) -> Result<Arc<SupervisedProcess>> {
		tracing::info!(process = name, "starting");
		self.set().start(name)
	}

	pub fn stop(&self, name: &str) -> Result<()> {
		tracing::info!(process = name, "stopping");
		self.set().stop(name)
	}

	pub fn restart(&self, name: &str) -> Result<()> {
		tracing::info!(process = name, "restarting");
		self.set().restart(name)
	}

	pub fn remove(&self, name: &str) {
		tracing::info!(process = name, "removing");
		self.set().remove(name)
	}

	pub fn status(&self) -> Vec<StatusRow> {
		self.set().status()
	}

	pub fn status_table(&self) -> String {
		let set = self.set();
		format_status(&set.status(), set.max_width())
	}

	pub fn count(&self) -> String {
		self.set().count()
	}

	pub fn lastlog(&self, pattern: &str) -> Result<Vec<OutputLine>> {
		self.capture.lastlog(pattern)
	}

	/// Replace the command set with an empty one, then stop and wait for
	/// everything the old one was running.
	pub async fn reset(&self) {
		let old = {
			let mut state = lock(&self.state);
			for sequence in state.sequences.drain(..) {
				sequence.cancel();
			}
			std::mem::replace(&mut state.set, CommandSet::new(self.context.clone()))
		};
		let active = old.active();
		old.stop_all();
		if tokio::time::timeout(self.config.shutdown_timeout(), CommandSet::wait_all(&active))
			.await
			.is_err()
		{
			tracing::error!("could not halt all processes; giving up");
		}
	}

	/// Log `"<time> have N commands with M running"` every mark period for
	/// as long as the console is alive.
	pub fn spawn_mark_timer(self: &Arc<Self>) -> JoinHandle<()> {
		let console: Weak<Self> = Arc::downgrade(self);
		let period = self.config.mark_period();
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(period);
			ticker.tick().await;
			loop {
				ticker.tick().await;
				let Some(console) = console.upgrade() else {
					break;
				};
				tracing::info!("{} have {}", now_stamp(), console.count());
			}
		})
	}

	/// Stop every process and wait, at most the shutdown timeout, for the
	/// set to report that nothing is running.
	pub async fn shutdown(&self) {
		let set = {
			let mut state = lock(&self.state);
			for sequence in state.sequences.drain(..) {
				sequence.cancel();
			}
			Arc::clone(&state.set)
		};

		if set.is_stopped() {
			return;
		}
		let (tx, rx) = oneshot::channel();
		set.events().once(CommandSetEvent::Stopped, move || {
			let _ = tx.send(());
		});
		// the last exit may have landed before the handler was in place
		if set.is_stopped() {
			return;
		}

		tracing::info!("stopping {}", set.count());
		set.stop_all();
		if tokio::time::timeout(self.config.shutdown_timeout(), rx)
			.await
			.is_err()
		{
			tracing::error!("could not halt all processes; giving up");
		}
	}
}

impl std::fmt::Debug for Console {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Console")
			.field("base_dir", &self.base_dir())
			.field("count", &self.count())
			.finish()
	}
}

/// Directory an init file's relative paths are resolved against.
pub fn base_dir_of(file: &Path) -> PathBuf {
	match file.parent() {
		Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
		_ => PathBuf::from("."),
	}
}
