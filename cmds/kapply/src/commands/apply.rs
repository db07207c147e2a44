//! Apply command handler.
//!
//! Loads the manifest tree, connects to the cluster and reconciles every
//! document in kind order.

use std::{
	io::Write,
	path::{Path, PathBuf},
	time::Duration,
};

use anyhow::{bail, Context, Result};
use clap::Args;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::{collect_documents, default_namespace, ManifestArgs};
use crate::{
	config::KapplyConfig,
	k8s::client::ClusterConnection,
	reconcile::Reconciler,
	report::{OutputFormat, Reporter, RunReport},
};

#[derive(Args, Debug)]
pub struct ApplyArgs {
	#[command(flatten)]
	pub manifests: ManifestArgs,

	/// Path to the kubeconfig file
	#[arg(long)]
	pub kubeconfig: Option<PathBuf>,

	/// Kubeconfig context to use
	#[arg(long)]
	pub context: Option<String>,

	/// Give up after this many seconds; the document in flight is finished
	#[arg(long, value_name = "SECONDS")]
	pub deadline: Option<u64>,
}

/// Run the apply command.
pub fn run<O: Write, E: Write>(runtime: &Runtime, args: ApplyArgs, out: O, err: E) -> Result<()> {
	let config = args.manifests.resolve_config()?;

	runtime.block_on(async {
		let cancel = CancellationToken::new();
		spawn_cancel_triggers(&cancel, args.deadline.map(Duration::from_secs));

		let connection = connect_or_cancel(args.kubeconfig.as_deref(), args.context.as_deref(), &cancel).await?;
		debug!(
			cluster = %connection.cluster_identifier(),
			server_version = %format!("{}.{}", connection.server_version().major, connection.server_version().minor),
			"connected to cluster"
		);

		let opts = ApplyOpts {
			config,
			namespace: args.manifests.namespace.clone(),
			format: args.manifests.output,
			cancel,
		};
		apply_directory(&args.manifests.path, &connection, opts, out, err).await?;
		Ok(())
	})
}

/// Connect to the cluster, unless `cancel` fires first.
async fn connect_or_cancel(
	kubeconfig: Option<&Path>,
	context: Option<&str>,
	cancel: &CancellationToken,
) -> Result<ClusterConnection> {
	tokio::select! {
		biased;
		() = cancel.cancelled() => bail!("run cancelled while connecting to the cluster"),
		connection = ClusterConnection::connect(kubeconfig, context) => {
			connection.context("connecting to Kubernetes cluster")
		}
	}
}

/// Cancel `cancel` on Ctrl-C, and after `deadline` if one is given.
fn spawn_cancel_triggers(cancel: &CancellationToken, deadline: Option<Duration>) {
	let on_signal = cancel.clone();
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			warn!("interrupted, stopping after the current document");
			on_signal.cancel();
		}
	});

	if let Some(deadline) = deadline {
		let on_deadline = cancel.clone();
		tokio::spawn(async move {
			tokio::time::sleep(deadline).await;
			warn!(deadline_secs = deadline.as_secs(), "deadline reached, stopping after the current document");
			on_deadline.cancel();
		});
	}
}

/// Options for an apply run.
#[derive(Debug, Default)]
pub struct ApplyOpts {
	pub config: KapplyConfig,
	/// Overrides the config's and the kubeconfig context's default namespace.
	pub namespace: Option<String>,
	pub format: OutputFormat,
	pub cancel: CancellationToken,
}

/// Apply every manifest under `root` to the cluster behind `connection`.
///
/// Progress goes to `out`, warnings and failures to `err`. Returns the run
/// report; a failed or cancelled run is an error, after its partial report
/// has been written.
#[instrument(skip_all, fields(root = %root.display(), cluster = %connection.cluster_identifier()))]
pub async fn apply_directory<O: Write, E: Write>(
	root: &Path,
	connection: &ClusterConnection,
	opts: ApplyOpts,
	out: O,
	err: E,
) -> Result<RunReport> {
	let strategies = opts.config.strategy_table()?;
	let order = opts.config.kind_order();
	let namespace = default_namespace(
		&opts.config,
		opts.namespace.as_deref(),
		Some(connection.default_namespace()),
	);

	let mut reporter = Reporter::new(out, err, opts.format);
	let groups = collect_documents(root, &order, &mut reporter)?;
	// Loading is synchronous; give a Ctrl-C or deadline that fired meanwhile
	// a chance to cancel before the first document.
	tokio::task::yield_now().await;

	let reconciler = Reconciler::new(connection.client().clone(), &strategies, namespace)
		.with_cancellation(opts.cancel);

	match reconciler.reconcile_all(&groups, &mut reporter).await {
		Ok(()) => Ok(reporter.finish(true)?),
		Err(e) => {
			reporter.finish(false)?;
			Err(e).with_context(|| format!("applying manifests from {}", root.display()))
		}
	}
}
