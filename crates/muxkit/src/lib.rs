//! # muxkit
//!
//! Supervise many named commands, each running in its own pseudo-terminal.
//!
//! Commands are described with [`CommandOptions`], expanded into immutable
//! [`CommandSpec`]s, stored in a [`CommandSet`] and started as
//! [`SupervisedProcess`]es. Stopping a process escalates through a configurable
//! list of signals until it is reaped. [`sequence::run`] starts steps of a
//! plan one after another, and [`Console`] ties it all together for a shell or
//! init file.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use muxkit::{CommandOptions, Console, Step, SupervisorConfig};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let console = Console::new(SupervisorConfig::default()).unwrap();
//!
//! let plan = vec![
//!     Step::Single(CommandOptions::new("bin/rake db:migrate").named("migrate")),
//!     Step::Parallel(vec![
//!         CommandOptions::new("bin/rails server").named("web"),
//!         CommandOptions::new("bin/worker"),
//!     ]),
//! ];
//! console.run(plan);
//!
//! tokio::signal::ctrl_c().await.unwrap();
//! console.shutdown().await;
//! # }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod command;
pub mod config;
pub mod console;
pub mod env;
pub mod error;
pub mod events;
pub mod output;
pub mod process;
pub mod pty;
pub mod registry;
pub mod rolling;
pub mod run_with;
pub mod sequence;
pub mod stats;
pub mod types;

pub use command::{auto_name, CommandOptions, CommandSpec};
pub use config::{EnvScrubConfig, EscalationConfig, EscalationPolicy, SupervisorConfig};
pub use console::Console;
pub use error::{MuxError, Result};
pub use events::EventNotifier;
pub use output::{OutputCapture, OutputLine, OutputSink};
pub use process::{ProcessContext, ProcessEvent, SupervisedProcess};
pub use registry::{format_status, CommandSet, CommandSetEvent};
pub use rolling::RollingBuffer;
pub use run_with::{Filter, FilterRegistry, SpecDraft};
pub use sequence::{Sequence, Step};
pub use types::*;

/// A poisoned lock only means a handler panicked; the state is still usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
