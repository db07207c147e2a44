//! Plan command handler.
//!
//! Shows what `apply` would do, in order, without talking to a cluster.

use std::{
	io::{self, Write},
	path::{Path, PathBuf},
};

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tracing::instrument;

use super::{collect_documents, default_namespace, ManifestArgs};
use crate::{
	config::KapplyConfig,
	k8s::ResourceScope,
	report::{OutputFormat, Reporter},
};

#[derive(Args, Debug)]
pub struct PlanArgs {
	#[command(flatten)]
	pub manifests: ManifestArgs,
}

pub fn run<O: Write, E: Write>(args: PlanArgs, out: O, err: E) -> Result<()> {
	let opts = PlanOpts {
		config: args.manifests.resolve_config()?,
		namespace: args.manifests.namespace.clone(),
		format: args.manifests.output,
	};
	plan_directory(&args.manifests.path, opts, out, err)?;
	Ok(())
}

#[derive(Debug, Default)]
pub struct PlanOpts {
	pub config: KapplyConfig,
	/// Overrides the config's default namespace.
	pub namespace: Option<String>,
	pub format: OutputFormat,
}

/// One document in apply order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedResource {
	pub kind: String,
	pub name: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub namespace: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub source: Option<PathBuf>,
	/// False when no strategy is registered; `apply` would skip it.
	pub applicable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Plan {
	pub resources: Vec<PlannedResource>,
	pub warnings: usize,
}

/// Work out the apply order for the manifests under `root`.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn plan_directory<O: Write, E: Write>(root: &Path, opts: PlanOpts, mut out: O, err: E) -> Result<Plan> {
	let strategies = opts.config.strategy_table()?;
	let order = opts.config.kind_order();
	let fallback_namespace = default_namespace(&opts.config, opts.namespace.as_deref(), None);

	let mut reporter = Reporter::new(io::sink(), err, opts.format);
	let groups = collect_documents(root, &order, &mut reporter)?;

	let resources: Vec<_> = groups
		.documents()
		.map(|doc| {
			let strategy = strategies.get(&doc.kind);
			let namespace = match strategy.map(|s| s.scope()) {
				Some(ResourceScope::ClusterWide) => None,
				_ => Some(doc.namespace.clone().unwrap_or_else(|| fallback_namespace.clone())),
			};
			PlannedResource {
				kind: doc.kind.clone(),
				name: doc.name.clone(),
				namespace,
				source: doc.source.clone(),
				applicable: strategy.is_some(),
			}
		})
		.collect();

	let plan = Plan {
		resources,
		warnings: reporter.report().warnings,
	};

	match opts.format {
		OutputFormat::Text => {
			for (i, resource) in plan.resources.iter().enumerate() {
				write!(out, "{:>3}. {}", i + 1, resource.kind)?;
				match &resource.namespace {
					Some(ns) => write!(out, " {}/{}", ns, resource.name)?,
					None => write!(out, " {}", resource.name)?,
				}
				if let Some(source) = &resource.source {
					write!(out, " ({})", source.display())?;
				}
				if !resource.applicable {
					write!(out, " [no apply strategy]")?;
				}
				writeln!(out)?;
			}
			writeln!(
				out,
				"{} resource(s) in apply order, {} warning(s)",
				plan.resources.len(),
				plan.warnings
			)?;
		}
		OutputFormat::Json => {
			serde_json::to_writer_pretty(&mut out, &plan)?;
			writeln!(out)?;
		}
	}
	out.flush()?;

	Ok(plan)
}
