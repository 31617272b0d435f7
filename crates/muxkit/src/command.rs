use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{MuxError, Result};
use crate::run_with::{Filter, FilterRegistry, SpecDraft};

/// Raw, user-supplied description of a command before defaults and filters
/// are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CommandOptions {
	pub name: Option<String>,
	pub command: Option<String>,
	pub chdir: Option<PathBuf>,
	pub env: Option<HashMap<String, String>>,
	pub run_with: Option<Vec<Filter>>,
	pub ruby: Option<String>,
	pub noop: Option<bool>,
}

impl CommandOptions {
	pub fn new(command: impl Into<String>) -> Self {
		Self {
			command: Some(command.into()),
			..Self::default()
		}
	}

	pub fn named(mut self, name: impl Into<String>) -> Self {
		self.name = Some(name.into());
		self
	}

	pub fn chdir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.chdir = Some(dir.into());
		self
	}

	pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.env
			.get_or_insert_with(HashMap::new)
			.insert(key.into(), value.into());
		self
	}

	pub fn run_with(mut self, filter: impl Into<Filter>) -> Self {
		self.run_with.get_or_insert_with(Vec::new).push(filter.into());
		self
	}

	/// Layer these options over `defaults`. Set fields replace the default
	/// wholesale; `env` maps are not merged key by key.
	pub fn merged_over(&self, defaults: &CommandOptions) -> CommandOptions {
		CommandOptions {
			name: self.name.clone().or_else(|| defaults.name.clone()),
			command: self.command.clone().or_else(|| defaults.command.clone()),
			chdir: self.chdir.clone().or_else(|| defaults.chdir.clone()),
			env: self.env.clone().or_else(|| defaults.env.clone()),
			run_with: self.run_with.clone().or_else(|| defaults.run_with.clone()),
			ruby: self.ruby.clone().or_else(|| defaults.ruby.clone()),
			noop: self.noop.or(defaults.noop),
		}
	}
}

/// A fully expanded, immutable launch description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
	name: String,
	command: String,
	commandline: String,
	dir: PathBuf,
	env: HashMap<String, String>,
	options: CommandOptions,
}

impl CommandSpec {
	/// Returns `Ok(None)` for `noop` commands, which callers skip.
	pub fn build(
		options: &CommandOptions,
		base_dir: Option<&Path>,
		filters: &FilterRegistry,
	) -> Result<Option<CommandSpec>> {
		if options.noop.unwrap_or(false) {
			return Ok(None);
		}

		let command = match options.command.as_deref().map(str::trim) {
			Some(c) if !c.is_empty() => c.to_string(),
			_ => {
				let label = options.name.clone().unwrap_or_else(|| "(unnamed)".into());
				return Err(MuxError::configuration(label, "missing command"));
			}
		};

		// need not be unique; a CommandSet suffixes it if required
		let name = options
			.name
			.clone()
			.filter(|n| !n.is_empty())
			.unwrap_or_else(|| auto_name(&command));

		let mut env = options.env.clone().unwrap_or_default();
		let run_with = options.run_with.clone().unwrap_or_default();
		let mut commandline = command.clone();
		for filter in run_with.iter().rev() {
			commandline = match filter {
				Filter::Literal(prefix) => format!("{} {}", prefix, commandline),
				Filter::Transform(id) => {
					let transform = filters.get(id).ok_or_else(|| {
						MuxError::configuration(&command, format!("unknown filter {}", filter))
					})?;
					let mut draft = SpecDraft {
						options,
						env: &mut env,
					};
					transform(&mut draft, &commandline)
				}
			};
		}

		Ok(Some(CommandSpec {
			name,
			command,
			commandline,
			dir: resolve_dir(options.chdir.as_deref(), base_dir),
			env,
			options: options.clone(),
		}))
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub(crate) fn with_name(mut self, name: String) -> Self {
		self.name = name;
		self
	}

	pub fn command(&self) -> &str {
		&self.command
	}

	pub fn commandline(&self) -> &str {
		&self.commandline
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	pub fn env(&self) -> &HashMap<String, String> {
		&self.env
	}

	pub fn options(&self) -> &CommandOptions {
		&self.options
	}
}

impl fmt::Display for CommandSpec {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.commandline)
	}
}

fn resolve_dir(chdir: Option<&Path>, base_dir: Option<&Path>) -> PathBuf {
	let dir = chdir.unwrap_or_else(|| Path::new("."));
	match base_dir {
		Some(base) if dir.is_relative() => base.join(dir),
		_ => dir.to_path_buf(),
	}
}

/// Derive a name from a command string: the basename of its first word with
/// one trailing `.ext` removed.
pub fn auto_name(command: &str) -> String {
	let first = command.split_whitespace().next().unwrap_or("");
	let base = Path::new(first)
		.file_name()
		.map(|b| b.to_string_lossy().into_owned())
		.unwrap_or_else(|| first.to_string());
	chop_file_extension(&base).to_string()
}

fn chop_file_extension(name: &str) -> &str {
	match name.rfind('.') {
		Some(i) if i > 0 => {
			let ext = &name[i + 1..];
			if !ext.is_empty() && ext.chars().all(|c| c.is_alphanumeric() || c == '_') {
				&name[..i]
			} else {
				name
			}
		}
		_ => name,
	}
}
