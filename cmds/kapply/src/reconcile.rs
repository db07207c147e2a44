//! Create-or-patch reconciliation.
//!
//! Each document is read back from the cluster: absent objects are created,
//! present ones patched with the document body, or left alone for kinds whose
//! strategy is create-only. Documents are handled strictly one at a time in
//! the order [`KindGroups`] yields them. The first failure stops the run.
//!
//! There is no resourceVersion precondition between the read and the write;
//! a concurrent writer can slip in between and the last write wins.

use std::{error::Error as _, fmt};

use kube::Client;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::{
	k8s::{
		strategy::{KindStrategy, StrategyError, StrategyTable, UpdatePolicy},
		ResourceScope,
	},
	manifest::ManifestDocument,
	order::KindGroups,
	report::Reporter,
};

/// What happened to one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "kebab-case")]
pub enum Outcome {
	Created,
	Patched,
	/// The object exists and its kind is never patched.
	NoOpExists,
	Skipped(SkipReason),
	Failed(String),
}

impl Outcome {
	pub const SKIPPED_LABEL: &'static str = "skipped";

	/// Short machine-readable label.
	pub fn label(&self) -> &'static str {
		match self {
			Outcome::Created => "created",
			Outcome::Patched => "patched",
			Outcome::NoOpExists => "exists",
			Outcome::Skipped(_) => Self::SKIPPED_LABEL,
			Outcome::Failed(_) => "failed",
		}
	}

	pub fn reason(&self) -> Option<String> {
		match self {
			Outcome::Skipped(reason) => Some(reason.to_string()),
			Outcome::Failed(reason) => Some(reason.clone()),
			_ => None,
		}
	}
}

impl fmt::Display for Outcome {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Outcome::Created => write!(f, "created"),
			Outcome::Patched => write!(f, "patched"),
			Outcome::NoOpExists => write!(f, "already exists, skipped"),
			Outcome::Skipped(reason) => write!(f, "skipped: {reason}"),
			Outcome::Failed(reason) => write!(f, "failed: {reason}"),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
	/// The kind is in the order but nothing knows how to apply it.
	NoStrategy,
}

impl fmt::Display for SkipReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SkipReason::NoStrategy => write!(f, "no apply strategy for kind"),
		}
	}
}

/// The API call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
	Read,
	Create,
	Update,
}

impl fmt::Display for Operation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Operation::Read => write!(f, "read"),
			Operation::Create => write!(f, "create"),
			Operation::Update => write!(f, "update"),
		}
	}
}

#[derive(Debug, Error)]
pub enum ReconcileError {
	#[error("failed to {op} {kind} {}", target(.namespace.as_deref(), .name))]
	Api {
		op: Operation,
		kind: String,
		name: String,
		namespace: Option<String>,
		#[source]
		source: StrategyError,
	},

	#[error("run cancelled with {remaining} document(s) not applied")]
	Cancelled { remaining: usize },

	#[error("failed to write report")]
	Report(#[from] std::io::Error),
}

fn target(namespace: Option<&str>, name: &str) -> String {
	match namespace {
		Some(ns) => format!("{ns}/{name}"),
		None => name.to_string(),
	}
}

/// Human-readable cause of a failure: the error's sources joined together.
fn failure_reason(error: &ReconcileError) -> String {
	let mut parts = Vec::new();
	let mut current = error.source();
	while let Some(cause) = current {
		parts.push(cause.to_string());
		current = cause.source();
	}
	if parts.is_empty() {
		error.to_string()
	} else {
		parts.join(": ")
	}
}

/// Applies grouped documents to a cluster.
pub struct Reconciler<'a> {
	client: Client,
	strategies: &'a StrategyTable,
	default_namespace: String,
	cancel: CancellationToken,
}

impl<'a> Reconciler<'a> {
	pub fn new(client: Client, strategies: &'a StrategyTable, default_namespace: impl Into<String>) -> Self {
		Self {
			client,
			strategies,
			default_namespace: default_namespace.into(),
			cancel: CancellationToken::new(),
		}
	}

	/// Stop before the next document once `cancel` fires.
	pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
		self.cancel = cancel;
		self
	}

	/// Namespace a document is applied in, `None` for cluster-wide kinds.
	pub fn target_namespace(&self, doc: &ManifestDocument, scope: ResourceScope) -> Option<String> {
		match scope {
			ResourceScope::ClusterWide => {
				if let Some(ns) = &doc.namespace {
					debug!(kind = %doc.kind, name = %doc.name, namespace = %ns, "ignoring namespace on cluster-wide kind");
				}
				None
			}
			ResourceScope::Namespaced => Some(
				doc.namespace
					.clone()
					.unwrap_or_else(|| self.default_namespace.clone()),
			),
		}
	}

	/// Apply every document in `groups`, recording each outcome in `reporter`.
	///
	/// Stops at the first failure, which is recorded before it is returned.
	#[instrument(skip_all, fields(documents = groups.len()))]
	pub async fn reconcile_all<O, E>(
		&self,
		groups: &KindGroups,
		reporter: &mut Reporter<O, E>,
	) -> Result<(), ReconcileError>
	where
		O: std::io::Write,
		E: std::io::Write,
	{
		let total = groups.len();

		for (done, doc) in groups.documents().enumerate() {
			if self.cancel.is_cancelled() {
				return Err(ReconcileError::Cancelled {
					remaining: total - done,
				});
			}

			let Some(strategy) = self.strategies.get(&doc.kind) else {
				let namespace = doc.namespace.as_deref().or(Some(&self.default_namespace));
				reporter.record(doc, namespace, &Outcome::Skipped(SkipReason::NoStrategy))?;
				continue;
			};

			let namespace = self.target_namespace(doc, strategy.scope());
			match self.apply(strategy, doc, namespace.as_deref()).await {
				Ok(outcome) => reporter.record(doc, namespace.as_deref(), &outcome)?,
				Err(e) => {
					reporter.record(doc, namespace.as_deref(), &Outcome::Failed(failure_reason(&e)))?;
					return Err(e);
				}
			}
		}

		Ok(())
	}

	#[instrument(skip_all, fields(kind = %doc.kind, name = %doc.name, namespace = namespace.unwrap_or("")))]
	async fn apply(
		&self,
		strategy: &dyn KindStrategy,
		doc: &ManifestDocument,
		namespace: Option<&str>,
	) -> Result<Outcome, ReconcileError> {
		let fail = |op: Operation| {
			move |source: StrategyError| ReconcileError::Api {
				op,
				kind: doc.kind.clone(),
				name: doc.name.clone(),
				namespace: namespace.map(str::to_string),
				source,
			}
		};

		let live = strategy
			.get(&self.client, doc, namespace)
			.await
			.map_err(fail(Operation::Read))?;

		match (live, strategy.update_policy()) {
			(None, _) => {
				strategy
					.create(&self.client, doc, namespace)
					.await
					.map_err(fail(Operation::Create))?;
				Ok(Outcome::Created)
			}
			(Some(_), UpdatePolicy::CreateOnly) => Ok(Outcome::NoOpExists),
			(Some(_), UpdatePolicy::Patch) => {
				strategy
					.update(&self.client, doc, namespace)
					.await
					.map_err(fail(Operation::Update))?;
				Ok(Outcome::Patched)
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use kube::Config;
	use serde_json::json;

	use super::*;
	use crate::{
		order::{classify, KindOrder},
		report::OutputFormat,
	};

	fn doc(kind: &str, name: &str, namespace: Option<&str>) -> ManifestDocument {
		let mut metadata = json!({"name": name});
		if let Some(ns) = namespace {
			metadata["namespace"] = json!(ns);
		}
		ManifestDocument::from_value(
			json!({"apiVersion": "v1", "kind": kind, "metadata": metadata}),
			None,
		)
		.unwrap()
	}

	fn offline_client() -> Client {
		let config = Config::new("http://127.0.0.1:9".parse().unwrap());
		Client::try_from(config).unwrap()
	}

	#[tokio::test]
	async fn test_target_namespace() {
		let table = StrategyTable::builtin();
		let reconciler = Reconciler::new(offline_client(), &table, "apps");

		assert_eq!(
			reconciler.target_namespace(&doc("ConfigMap", "cfg", None), ResourceScope::Namespaced),
			Some("apps".to_string())
		);
		assert_eq!(
			reconciler.target_namespace(&doc("ConfigMap", "cfg", Some("team-a")), ResourceScope::Namespaced),
			Some("team-a".to_string())
		);
		assert_eq!(
			reconciler.target_namespace(&doc("ClusterRole", "view", Some("team-a")), ResourceScope::ClusterWide),
			None
		);
	}

	#[tokio::test]
	async fn test_cancelled_before_first_document() {
		let table = StrategyTable::builtin();
		let cancel = CancellationToken::new();
		cancel.cancel();
		let reconciler = Reconciler::new(offline_client(), &table, "default").with_cancellation(cancel);

		let classified = classify(
			&KindOrder::default(),
			vec![doc("Namespace", "a", None), doc("ConfigMap", "b", None)],
		);
		let (mut out, mut err) = (Vec::new(), Vec::new());
		let mut reporter = Reporter::new(&mut out, &mut err, OutputFormat::Text);

		let result = reconciler.reconcile_all(&classified.groups, &mut reporter).await;
		assert_matches!(result, Err(ReconcileError::Cancelled { remaining: 2 }));
		assert!(reporter.report().resources.is_empty());
	}

	#[tokio::test]
	async fn test_kind_without_strategy_is_skipped() {
		let table = StrategyTable::default();
		let reconciler = Reconciler::new(offline_client(), &table, "default");

		let classified = classify(&KindOrder::new(["Widget"]), vec![doc("Widget", "w", None)]);
		let (mut out, mut err) = (Vec::new(), Vec::new());
		let mut reporter = Reporter::new(&mut out, &mut err, OutputFormat::Text);

		reconciler
			.reconcile_all(&classified.groups, &mut reporter)
			.await
			.unwrap();
		let report = reporter.finish(true).unwrap();
		assert_eq!(report.outcomes(), vec![("Widget", "w", "skipped")]);
		assert_eq!(report.warnings, 1);
	}

	#[test]
	fn test_outcome_display() {
		assert_eq!(Outcome::Created.to_string(), "created");
		assert_eq!(Outcome::NoOpExists.to_string(), "already exists, skipped");
		assert_eq!(
			Outcome::Skipped(SkipReason::NoStrategy).to_string(),
			"skipped: no apply strategy for kind"
		);
		assert_eq!(Outcome::NoOpExists.label(), "exists");
		assert_eq!(
			serde_json::to_value(Outcome::Failed("boom".into())).unwrap(),
			json!({"outcome": "failed", "reason": "boom"})
		);
	}

	#[test]
	fn test_error_message() {
		let err = ReconcileError::Api {
			op: Operation::Create,
			kind: "Secret".to_string(),
			name: "creds".to_string(),
			namespace: Some("prod".to_string()),
			source: StrategyError::InvalidBody {
				kind: "Secret".to_string(),
				source: serde_json::from_str::<u8>("x").unwrap_err(),
			},
		};
		assert_eq!(err.to_string(), "failed to create Secret prod/creds");
		assert!(failure_reason(&err).starts_with("manifest does not match the Secret schema: "));
	}
}
