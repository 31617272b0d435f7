//! Commandline filters.
//!
//! A command's `run_with` list wraps its commandline, last filter first. A
//! literal filter is prepended verbatim; a named transform is looked up here
//! and may also adjust the command's environment.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

use crate::command::CommandOptions;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum Filter {
	Literal(String),
	Transform(String),
}

impl Filter {
	pub fn literal(prefix: impl Into<String>) -> Self {
		Filter::Literal(prefix.into())
	}

	pub fn transform(id: impl Into<String>) -> Self {
		Filter::Transform(id.into())
	}
}

/// `":name"` names a transform, anything else is a literal prefix.
impl From<String> for Filter {
	fn from(raw: String) -> Self {
		match raw.strip_prefix(':') {
			Some(id) if !id.is_empty() => Filter::Transform(id.to_string()),
			_ => Filter::Literal(raw),
		}
	}
}

impl From<&str> for Filter {
	fn from(raw: &str) -> Self {
		Filter::from(raw.to_string())
	}
}

impl fmt::Display for Filter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Filter::Literal(prefix) => write!(f, "{}", prefix),
			Filter::Transform(id) => write!(f, ":{}", id),
		}
	}
}

/// The part of a command under construction that a transform may look at
/// and change.
pub struct SpecDraft<'a> {
	pub options: &'a CommandOptions,
	pub env: &'a mut HashMap<String, String>,
}

pub type Transform = Arc<dyn Fn(&mut SpecDraft<'_>, &str) -> String + Send + Sync>;

#[derive(Clone)]
pub struct FilterRegistry {
	transforms: HashMap<String, Transform>,
}

impl FilterRegistry {
	pub fn empty() -> Self {
		Self {
			transforms: HashMap::new(),
		}
	}

	pub fn register<F>(&mut self, id: impl Into<String>, transform: F)
	where
		F: Fn(&mut SpecDraft<'_>, &str) -> String + Send + Sync + 'static,
	{
		self.transforms.insert(id.into(), Arc::new(transform));
	}

	pub fn get(&self, id: &str) -> Option<&Transform> {
		self.transforms.get(id)
	}

	pub fn ids(&self) -> Vec<&str> {
		let mut ids: Vec<&str> = self.transforms.keys().map(String::as_str).collect();
		ids.sort_unstable();
		ids
	}
}

impl Default for FilterRegistry {
	fn default() -> Self {
		let mut registry = Self::empty();
		registry.register("rvm_shell", rvm_shell);
		registry.register("rbenv", rbenv);
		registry.register("bundle_exec", bundle_exec);
		registry
	}
}

fn rvm_shell(draft: &mut SpecDraft<'_>, commandline: &str) -> String {
	match &draft.options.ruby {
		Some(ruby) => format!("rvm-shell '{}' -c '{}'", ruby, commandline),
		None => format!("rvm-shell -c '{}'", commandline),
	}
}

/// Pins the ruby version through `RBENV_VERSION` and drops rbenv version
/// directories the supervisor itself may have been launched with from `PATH`.
fn rbenv(draft: &mut SpecDraft<'_>, commandline: &str) -> String {
	if let Some(ruby) = &draft.options.ruby {
		draft.env.insert("RBENV_VERSION".into(), ruby.clone());
	}
	let path = std::env::var("PATH").unwrap_or_default();
	draft.env.insert("PATH".into(), strip_rbenv_versions(&path));
	commandline.to_string()
}

fn strip_rbenv_versions(path: &str) -> String {
	path.split(':')
		.filter(|p| !p.contains(".rbenv/versions"))
		.collect::<Vec<_>>()
		.join(":")
}

fn bundle_exec(_draft: &mut SpecDraft<'_>, commandline: &str) -> String {
	format!("bundle exec {}", commandline)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn colon_prefix_selects_transform() {
		assert_eq!(Filter::from(":rbenv"), Filter::transform("rbenv"));
		assert_eq!(Filter::from("nice -n 5"), Filter::literal("nice -n 5"));
		assert_eq!(Filter::from(":"), Filter::literal(":"));
		assert_eq!(Filter::transform("rbenv").to_string(), ":rbenv");
	}

	#[test]
	fn builtins_are_registered() {
		assert_eq!(
			FilterRegistry::default().ids(),
			vec!["bundle_exec", "rbenv", "rvm_shell"]
		);
	}

	#[test]
	fn rvm_shell_quotes_ruby_and_command() {
		let options = CommandOptions {
			ruby: Some("2.7".into()),
			..CommandOptions::default()
		};
		let mut env = HashMap::new();
		let mut draft = SpecDraft {
			options: &options,
			env: &mut env,
		};
		assert_eq!(rvm_shell(&mut draft, "rake"), "rvm-shell '2.7' -c 'rake'");
	}

	#[test]
	fn rbenv_path_cleanup() {
		assert_eq!(
			strip_rbenv_versions("/home/me/.rbenv/versions/3.1/bin:/usr/bin:/bin"),
			"/usr/bin:/bin"
		);
	}
}
