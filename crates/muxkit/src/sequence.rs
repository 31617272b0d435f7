//! Run steps of a plan one after another. A step is a single name or a
//! group of names started together; the next step starts once every process
//! of the current one has exited.

use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::lock;
use crate::registry::CommandSet;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Step<T = String> {
	Single(T),
	Parallel(Vec<T>),
}

impl<T> Step<T> {
	pub fn into_vec(self) -> Vec<T> {
		match self {
			Step::Single(item) => vec![item],
			Step::Parallel(items) => items,
		}
	}

	/// Apply `f` to every item, dropping those it rejects. A step left with
	/// nothing is dropped too.
	pub fn filter_map<U, F>(self, mut f: F) -> Option<Step<U>>
	where
		F: FnMut(T) -> Option<U>,
	{
		match self {
			Step::Single(item) => f(item).map(Step::Single),
			Step::Parallel(items) => {
				let kept: Vec<U> = items.into_iter().filter_map(f).collect();
				if kept.is_empty() {
					None
				} else {
					Some(Step::Parallel(kept))
				}
			}
		}
	}
}

impl From<&str> for Step<String> {
	fn from(name: &str) -> Self {
		Step::Single(name.to_string())
	}
}

impl From<&[&str]> for Step<String> {
	fn from(names: &[&str]) -> Self {
		Step::Parallel(names.iter().map(|n| n.to_string()).collect())
	}
}

struct Runner {
	set: Arc<CommandSet>,
	remaining: Mutex<VecDeque<Step<String>>>,
	cancelled: AtomicBool,
	done: watch::Sender<bool>,
}

/// Handle to a running plan.
#[derive(Clone)]
pub struct Sequence {
	runner: Arc<Runner>,
	finished: watch::Receiver<bool>,
}

impl Sequence {
	/// Resolves once the last step's processes have exited or the sequence
	/// was cancelled.
	pub async fn finished(&self) {
		let mut finished = self.finished.clone();
		let _ = finished.wait_for(|done| *done).await;
	}

	pub fn is_finished(&self) -> bool {
		*self.finished.borrow()
	}

	/// Start no further steps. Processes already running are left alone.
	pub fn cancel(&self) {
		self.runner.cancelled.store(true, Ordering::SeqCst);
		lock(&self.runner.remaining).clear();
		let _ = self.runner.done.send(true);
	}
}

/// Start the first step of `plan` now and every later step once the one
/// before it has finished. Must be called from within a tokio runtime.
pub fn run(set: &Arc<CommandSet>, plan: Vec<Step<String>>) -> Sequence {
	let (done, finished) = watch::channel(false);
	let runner = Arc::new(Runner {
		set: Arc::clone(set),
		remaining: Mutex::new(plan.into()),
		cancelled: AtomicBool::new(false),
		done,
	});
	advance(Arc::clone(&runner));
	Sequence { runner, finished }
}

fn advance(runner: Arc<Runner>) {
	if runner.cancelled.load(Ordering::SeqCst) {
		return;
	}
	let Some(step) = lock(&runner.remaining).pop_front() else {
		let _ = runner.done.send(true);
		return;
	};

	let names = step.into_vec();
	let mut started = Vec::with_capacity(names.len());
	for name in &names {
		match runner.set.start(name) {
			Ok(process) => started.push(process),
			Err(e) => tracing::error!(process = name.as_str(), "{}", e),
		}
	}

	let next = Arc::clone(&runner);
	CommandSet::join(&started, move || {
		tokio::spawn(async move { step_done(next, names) });
	});
}

fn step_done(runner: Arc<Runner>, names: Vec<String>) {
	if runner.cancelled.load(Ordering::SeqCst) {
		return;
	}
	if lock(&runner.remaining).is_empty() {
		let _ = runner.done.send(true);
		return;
	}
	for name in &names {
		runner.set.remove(name);
	}
	advance(runner);
}
