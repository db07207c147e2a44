//! Configuration file support.
//!
//! A `.kapply.yaml` may sit in the manifest directory or any of its parents;
//! the nearest one wins. It adjusts the kind order and registers additional
//! custom resources. Everything is optional.

use std::{
	fs,
	path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::{
	k8s::{
		strategy::{CustomResource, StrategyTable},
		ResourceScope,
	},
	order::KindOrder,
};

/// The name of the config file kapply looks for
pub const CONFIG_FILE_NAME: &str = ".kapply.yaml";

/// Namespace used for namespaced kinds that don't declare one.
pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config file: {}", .path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse config file: {}", .path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: serde_yaml::Error,
	},

	#[error("custom resource {kind} has an empty plural")]
	EmptyPlural { kind: String },
}

/// Root structure of `.kapply.yaml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct KapplyConfig {
	/// Replaces the built-in kind order entirely.
	#[serde(default)]
	pub kind_order: Option<Vec<String>>,

	/// Kinds applied after everything in the kind order.
	#[serde(default)]
	pub append_kinds: Vec<String>,

	/// Additional custom resources, addressed by group/version/plural.
	#[serde(default)]
	pub custom_resources: Vec<CustomResourceConfig>,

	/// Namespace for namespaced kinds without `metadata.namespace`.
	#[serde(default)]
	pub default_namespace: Option<String>,
}

/// One custom resource entry.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CustomResourceConfig {
	pub kind: String,
	/// Lowercase plural resource name, e.g. `certificates`.
	pub plural: String,
	#[serde(default)]
	pub scope: ResourceScope,
}

impl KapplyConfig {
	/// Load config by searching from the given directory upward
	pub fn load_from_directory(start_dir: &Path) -> Result<Option<Self>, ConfigError> {
		match find_config_file(start_dir) {
			Some(path) => Self::load_from_file(&path).map(Some),
			None => Ok(None),
		}
	}

	/// Load config from a specific file path
	pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
		let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		let config = Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
			path: path.to_path_buf(),
			source,
		})?;
		debug!(path = %path.display(), "loaded config file");
		Ok(config)
	}

	pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
		// An empty file is a valid, empty config
		if content.trim().is_empty() {
			return Ok(Self::default());
		}
		serde_yaml::from_str(content)
	}

	/// The kind order this config describes.
	pub fn kind_order(&self) -> KindOrder {
		let mut order = match &self.kind_order {
			Some(kinds) => KindOrder::new(kinds.iter().cloned()),
			None => KindOrder::default(),
		};
		order.extend(self.append_kinds.iter().cloned());
		order
	}

	/// Built-in strategies plus the configured custom resources.
	pub fn strategy_table(&self) -> Result<StrategyTable, ConfigError> {
		let mut table = StrategyTable::builtin();
		for custom in &self.custom_resources {
			if custom.plural.trim().is_empty() {
				return Err(ConfigError::EmptyPlural {
					kind: custom.kind.clone(),
				});
			}
			table.register_custom(CustomResource::new(
				custom.kind.clone(),
				custom.plural.clone(),
				custom.scope,
			));
		}
		Ok(table)
	}

	pub fn default_namespace(&self) -> &str {
		self.default_namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
	}
}

/// Search for a config file starting from `start_dir` and walking up to the filesystem root
pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
	let start = start_dir
		.canonicalize()
		.unwrap_or_else(|_| start_dir.to_path_buf());

	start
		.ancestors()
		.map(|dir| dir.join(CONFIG_FILE_NAME))
		.find(|candidate| candidate.is_file())
}
