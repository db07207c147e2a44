//! Command handlers and the pipeline stages they share.

use std::{
	io::Write,
	path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::Args;
use tracing::{debug, instrument};

use crate::{
	config::{KapplyConfig, DEFAULT_NAMESPACE},
	loader,
	manifest::{parse_documents, ParsedManifests},
	order::{classify, KindGroups, KindOrder},
	report::{OutputFormat, Reporter},
};

pub use self::{
	apply::{apply_directory, ApplyOpts},
	plan::{plan_directory, PlanOpts},
};

pub mod apply;
pub mod plan;

/// Arguments shared by every command that reads a manifest tree.
#[derive(Args, Debug, Clone)]
pub struct ManifestArgs {
	/// Directory containing the manifests
	pub path: PathBuf,

	/// Config file to use instead of searching for .kapply.yaml
	#[arg(long)]
	pub config: Option<PathBuf>,

	/// Namespace for namespaced resources that don't declare one
	#[arg(short = 'n', long)]
	pub namespace: Option<String>,

	/// How to report the run on stdout
	#[arg(short = 'o', long, value_enum, default_value_t)]
	pub output: OutputFormat,
}

impl ManifestArgs {
	/// The explicit config file, or the nearest `.kapply.yaml` above the
	/// manifest root, or the built-in defaults.
	pub fn resolve_config(&self) -> Result<KapplyConfig> {
		match &self.config {
			Some(path) => KapplyConfig::load_from_file(path)
				.with_context(|| format!("loading config from {}", path.display())),
			None => Ok(KapplyConfig::load_from_directory(&self.path)
				.context("loading config")?
				.unwrap_or_default()),
		}
	}
}

/// Namespace for namespaced kinds that don't declare one: the CLI override,
/// then the config file, then the kubeconfig context, then `default`.
pub(crate) fn default_namespace(
	config: &KapplyConfig,
	namespace: Option<&str>,
	context_namespace: Option<&str>,
) -> String {
	namespace
		.or(config.default_namespace.as_deref())
		.or(context_namespace)
		.unwrap_or(DEFAULT_NAMESPACE)
		.to_string()
}

/// Load, parse and classify every manifest under `root`.
///
/// Incomplete documents and unknown kinds are reported as warnings; read and
/// syntax errors abort.
#[instrument(skip_all, fields(root = %root.display()))]
pub(crate) fn collect_documents<O: Write, E: Write>(
	root: &Path,
	order: &KindOrder,
	reporter: &mut Reporter<O, E>,
) -> Result<KindGroups> {
	let mut parsed = ParsedManifests::default();

	for raw in loader::load(root).with_context(|| format!("loading manifests from {}", root.display()))? {
		let raw = raw.context("reading manifest")?;
		let manifests = parse_documents(&raw.content, Some(raw.path))?;
		parsed.extend(manifests);
	}
	debug!(
		documents = parsed.documents.len(),
		incomplete = parsed.incomplete.len(),
		"parsed manifests"
	);

	for incomplete in &parsed.incomplete {
		reporter.incomplete(incomplete)?;
	}

	let classified = classify(order, parsed.documents);
	for doc in &classified.unknown {
		reporter.unknown_kind(doc)?;
	}

	Ok(classified.groups)
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	#[rstest]
	#[case(Some("cli"), Some("config"), Some("context"), "cli")]
	#[case(None, Some("config"), Some("context"), "config")]
	#[case(None, None, Some("context"), "context")]
	#[case(None, None, None, "default")]
	fn test_default_namespace_precedence(
		#[case] cli: Option<&str>,
		#[case] configured: Option<&str>,
		#[case] context: Option<&str>,
		#[case] expected: &str,
	) {
		let config = KapplyConfig {
			default_namespace: configured.map(str::to_string),
			..Default::default()
		};
		assert_eq!(default_namespace(&config, cli, context), expected);
	}
}
