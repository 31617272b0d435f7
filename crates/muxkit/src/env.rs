use std::collections::HashMap;

use crate::config::EnvScrubConfig;

/// Build the environment a child is spawned with: `base` minus the scrubbed
/// variables, then `overrides` on top.
pub fn effective_env<I>(
	base: I,
	scrub: &EnvScrubConfig,
	overrides: &HashMap<String, String>,
) -> HashMap<String, String>
where
	I: IntoIterator<Item = (String, String)>,
{
	let mut env: HashMap<String, String> = base
		.into_iter()
		.filter(|(key, _)| !is_scrubbed(key, scrub))
		.collect();
	for (key, value) in overrides {
		env.insert(key.clone(), value.clone());
	}
	env
}

pub fn is_scrubbed(key: &str, scrub: &EnvScrubConfig) -> bool {
	scrub.strip_names.iter().any(|n| n == key)
		|| scrub.strip_prefixes.iter().any(|p| key.starts_with(p.as_str()))
}
