//! The TOML init file:
//!
//! ```toml
//! [supervisor]
//! shutdown_timeout_secs = 10
//!
//! [defaults]
//! chdir = "app"
//! run_with = [":bundle_exec"]
//!
//! [[add]]
//! command = "bin/console"
//!
//! [[run]]
//! name = "web"
//! command = "bin/rails server"
//!
//! [[sequence]]
//! steps = [
//!     { command = "bin/rake db:migrate" },
//!     [{ command = "bin/worker" }, { command = "bin/clock" }],
//! ]
//! ```

use muxkit::{CommandOptions, Console, MuxError, Sequence, Step, SupervisorConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InitError {
	#[error("cannot read {}: {source}", .path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("cannot parse {}: {source}", .path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error(transparent)]
	Mux(#[from] MuxError),
}

#[derive(Debug, Default, Deserialize)]
pub struct InitFile {
	#[serde(default)]
	pub supervisor: SupervisorConfig,
	#[serde(default)]
	pub defaults: CommandOptions,
	/// Registered but not started.
	#[serde(default)]
	pub add: Vec<CommandOptions>,
	/// Started one after another, each once the previous has exited.
	#[serde(default)]
	pub run: Vec<CommandOptions>,
	#[serde(default)]
	pub sequence: Vec<SequenceSection>,
}

#[derive(Debug, Deserialize)]
pub struct SequenceSection {
	pub steps: Vec<Step<CommandOptions>>,
}

pub fn load(path: &Path) -> Result<InitFile, InitError> {
	let content = std::fs::read_to_string(path).map_err(|source| InitError::Read {
		path: path.to_path_buf(),
		source,
	})?;
	toml::from_str(&content).map_err(|source| InitError::Parse {
		path: path.to_path_buf(),
		source,
	})
}

impl InitFile {
	/// Register and launch everything the file describes. Relative `chdir`s
	/// resolve against `base_dir`.
	pub fn apply(self, console: &Console, base_dir: &Path) -> Vec<Sequence> {
		let InitFile {
			defaults,
			add,
			run,
			sequence,
			..
		} = self;

		console.with_base_dir(base_dir, |console| {
			console.with_defaults(defaults, |console| {
				console.add(add.into_iter().map(Step::Single).collect());

				let mut sequences = Vec::new();
				if !run.is_empty() {
					sequences.push(console.run(run.into_iter().map(Step::Single).collect()));
				}
				for section in sequence {
					sequences.push(console.run(section.steps));
				}
				sequences
			})
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use muxkit::Filter;

	#[test]
	fn empty_file_uses_defaults() {
		let init: InitFile = toml::from_str("").unwrap();
		assert!(init.add.is_empty());
		assert!(init.run.is_empty());
		assert_eq!(init.supervisor.shutdown_timeout_secs, 30);
		assert_eq!(init.supervisor.escalation.signals, vec!["INT", "TERM", "KILL"]);
	}

	#[test]
	fn parses_every_section() {
		let init: InitFile = toml::from_str(
			r#"
			[supervisor]
			mark_period_secs = 5
			buffer_lines = 200

			[supervisor.escalation]
			signals = ["TERM", "KILL"]
			retries = 10

			[defaults]
			chdir = "app"
			run_with = [":bundle_exec", "nice"]
			env = { RAILS_ENV = "development" }

			[[add]]
			command = "bin/console"
			noop = true

			[[run]]
			name = "web"
			command = "bin/rails server"

			[[sequence]]
			steps = [
				{ command = "bin/rake db:migrate" },
				[{ command = "bin/worker" }, { command = "bin/clock", ruby = "3.3.0" }],
			]
			"#,
		)
		.unwrap();

		assert_eq!(init.supervisor.mark_period_secs, 5);
		assert_eq!(init.supervisor.buffer_lines, 200);
		assert_eq!(init.supervisor.escalation.signals, vec!["TERM", "KILL"]);
		assert_eq!(init.supervisor.escalation.interval_ms, 100);

		assert_eq!(init.defaults.chdir, Some(PathBuf::from("app")));
		assert_eq!(
			init.defaults.run_with,
			Some(vec![Filter::transform("bundle_exec"), Filter::literal("nice")])
		);
		assert_eq!(init.defaults.env.as_ref().unwrap()["RAILS_ENV"], "development");

		assert_eq!(init.add[0].noop, Some(true));
		assert_eq!(init.run[0].name.as_deref(), Some("web"));

		let steps = &init.sequence[0].steps;
		assert_eq!(steps.len(), 2);
		assert!(matches!(&steps[0], Step::Single(o) if o.command.as_deref() == Some("bin/rake db:migrate")));
		match &steps[1] {
			Step::Parallel(group) => {
				assert_eq!(group.len(), 2);
				assert_eq!(group[1].ruby.as_deref(), Some("3.3.0"));
			}
			other => panic!("expected a parallel step, got {:?}", other),
		}
	}

	#[test]
	fn apply_registers_with_defaults_and_base_dir() {
		let init: InitFile = toml::from_str(
			r#"
			[defaults]
			chdir = "app"

			[[add]]
			name = "console"
			command = "bin/console"

			[[add]]
			command = "ignored"
			noop = true
			"#,
		)
		.unwrap();

		let console = Console::new(SupervisorConfig::default()).unwrap();
		let sequences = init.apply(&console, Path::new("/srv/site"));
		assert!(sequences.is_empty());

		let set = console.set();
		assert_eq!(set.names(), vec!["console"]);
		assert_eq!(set.get("console").unwrap().dir(), Path::new("/srv/site/app"));
		assert_eq!(console.default_options(), CommandOptions::default());
		assert_eq!(console.base_dir(), None);
	}

	#[test]
	fn missing_file_is_a_read_error() {
		let err = load(Path::new("/nonexistent/console-mux/init.toml")).unwrap_err();
		assert!(matches!(err, InitError::Read { .. }));
		assert!(err.to_string().contains("/nonexistent/console-mux/init.toml"));
	}

	#[test]
	fn bad_toml_is_a_parse_error() {
		let path = std::env::temp_dir().join(format!("console-mux-bad-{}.toml", std::process::id()));
		std::fs::write(&path, "[[run]\ncommand = 1").unwrap();
		let err = load(&path).unwrap_err();
		assert!(matches!(err, InitError::Parse { .. }));
		let _ = std::fs::remove_file(&path);
	}
}
