//! Run reporting.
//!
//! Progress lines go to one writer, warnings and failures to another, so
//! callers can tell "clean" from "clean with caveats" by watching stderr.
//! Every line is mirrored as a structured `tracing` event at debug level, so
//! the default log filter never repeats it.

use std::{fmt, io::Write, path::Path};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
	manifest::{IncompleteDocument, ManifestDocument},
	reconcile::Outcome,
};

/// How the run is reported on the progress writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
	/// One human-readable line per resource.
	#[default]
	Text,

	/// A single JSON document describing the whole run, written at the end.
	Json,
}

impl fmt::Display for OutputFormat {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			OutputFormat::Text => write!(f, "text"),
			OutputFormat::Json => write!(f, "json"),
		}
	}
}

/// Outcome of one resource, as it appears in the JSON report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
	pub kind: String,
	pub name: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub namespace: Option<String>,
	pub outcome: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
}

/// Everything that happened during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
	pub resources: Vec<ResourceRecord>,
	pub warnings: usize,
	/// False when the run stopped on a fatal error.
	pub completed: bool,
}

impl RunReport {
	/// Number of resources whose outcome has the given label.
	pub fn count(&self, outcome: &str) -> usize {
		self.resources
			.iter()
			.filter(|r| r.outcome == outcome)
			.count()
	}

	/// `(kind, name, outcome)` triples in the order they were recorded.
	pub fn outcomes(&self) -> Vec<(&str, &str, &str)> {
		self.resources
			.iter()
			.map(|r| (r.kind.as_str(), r.name.as_str(), r.outcome.as_str()))
			.collect()
	}
}

/// Collects outcomes and writes them as they happen.
pub struct Reporter<O, E> {
	out: O,
	err: E,
	format: OutputFormat,
	report: RunReport,
}

impl<O: Write, E: Write> Reporter<O, E> {
	pub fn new(out: O, err: E, format: OutputFormat) -> Self {
		Self {
			out,
			err,
			format,
			report: RunReport::default(),
		}
	}

	/// Record the outcome for one document.
	///
	/// `namespace` is the namespace the document was applied in, `None` for
	/// cluster-wide kinds.
	pub fn record(
		&mut self,
		doc: &ManifestDocument,
		namespace: Option<&str>,
		outcome: &Outcome,
	) -> std::io::Result<()> {
		let target = Target {
			kind: &doc.kind,
			name: &doc.name,
			namespace,
		};

		match outcome {
			Outcome::Created | Outcome::Patched | Outcome::NoOpExists => {
				debug!(
					kind = %doc.kind,
					name = %doc.name,
					namespace = namespace.unwrap_or(""),
					outcome = outcome.label(),
					"reconciled resource"
				);
				if self.format == OutputFormat::Text {
					writeln!(self.out, "{target} {outcome}")?;
				}
			}
			Outcome::Skipped(reason) => {
				debug!(
					kind = %doc.kind,
					name = %doc.name,
					namespace = namespace.unwrap_or(""),
					reason = %reason,
					"skipped resource"
				);
				self.report.warnings += 1;
				writeln!(self.err, "warning: {target} {outcome}")?;
			}
			Outcome::Failed(reason) => {
				debug!(
					kind = %doc.kind,
					name = %doc.name,
					namespace = namespace.unwrap_or(""),
					reason = %reason,
					"failed to reconcile resource"
				);
				writeln!(self.err, "error: {target} {outcome}")?;
			}
		}

		self.report.resources.push(ResourceRecord {
			kind: doc.kind.clone(),
			name: doc.name.clone(),
			namespace: namespace.map(str::to_string),
			outcome: outcome.label().to_string(),
			reason: outcome.reason(),
		});
		Ok(())
	}

	/// Warn about a document whose kind is not in the kind order.
	pub fn unknown_kind(&mut self, doc: &ManifestDocument) -> std::io::Result<()> {
		debug!(
			kind = %doc.kind,
			name = %doc.name,
			source = %display_source(doc.source.as_deref()),
			"kind not in kind order, skipping"
		);
		self.report.warnings += 1;
		writeln!(
			self.err,
			"warning: resource of kind '{}' ({}) in {} is not in the kind order, skipping",
			doc.kind,
			doc.display_ref(),
			display_source(doc.source.as_deref()),
		)
	}

	/// Warn about a document that lacks the fields needed to route it.
	pub fn incomplete(&mut self, doc: &IncompleteDocument) -> std::io::Result<()> {
		let missing = doc.missing.join(", ");
		debug!(
			index = doc.index,
			source = %display_source(doc.source.as_deref()),
			missing = %missing,
			"incomplete document, skipping"
		);
		self.report.warnings += 1;

		let identity = match (&doc.kind, &doc.name) {
			(Some(kind), Some(name)) => format!(" ({kind}/{name})"),
			(Some(kind), None) => format!(" ({kind})"),
			(None, Some(name)) => format!(" ({name})"),
			(None, None) => String::new(),
		};
		writeln!(
			self.err,
			"warning: document {}{} in {} is missing {}, skipping",
			doc.index,
			identity,
			display_source(doc.source.as_deref()),
			missing,
		)
	}

	/// The report so far.
	pub fn report(&self) -> &RunReport {
		&self.report
	}

	/// Write the closing summary (or the JSON report) and hand back the
	/// report.
	pub fn finish(mut self, completed: bool) -> std::io::Result<RunReport> {
		self.report.completed = completed;

		match self.format {
			OutputFormat::Text => {
				if completed {
					writeln!(
						self.out,
						"{} created, {} patched, {} unchanged, {} skipped, {} warning(s)",
						self.report.count(Outcome::Created.label()),
						self.report.count(Outcome::Patched.label()),
						self.report.count(Outcome::NoOpExists.label()),
						self.report.count(Outcome::SKIPPED_LABEL),
						self.report.warnings,
					)?;
				}
			}
			OutputFormat::Json => {
				serde_json::to_writer_pretty(&mut self.out, &self.report)?;
				writeln!(self.out)?;
			}
		}
		self.out.flush()?;
		self.err.flush()?;
		Ok(self.report)
	}
}

struct Target<'a> {
	kind: &'a str,
	name: &'a str,
	namespace: Option<&'a str>,
}

impl fmt::Display for Target<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.namespace {
			Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
			None => write!(f, "{} {}", self.kind, self.name),
		}
	}
}

fn display_source(source: Option<&Path>) -> String {
	source.map_or_else(|| "<inline>".to_string(), |p| p.display().to_string())
}

#[cfg(test)]
mod tests {
	use std::sync::{Arc, Mutex};

	use serde_json::json;
	use tracing_subscriber::EnvFilter;

	use super::*;
	use crate::reconcile::SkipReason;

	fn doc(kind: &str, name: &str, namespace: Option<&str>) -> ManifestDocument {
		let mut metadata = json!({"name": name});
		if let Some(ns) = namespace {
			metadata["namespace"] = json!(ns);
		}
		ManifestDocument::from_value(
			json!({"apiVersion": "v1", "kind": kind, "metadata": metadata}),
			Some("manifests/app.yaml".into()),
		)
		.unwrap()
	}

	fn text(buf: &[u8]) -> &str {
		std::str::from_utf8(buf).unwrap()
	}

	#[test]
	fn test_progress_and_warnings_use_separate_writers() {
		let (mut out, mut err) = (Vec::new(), Vec::new());
		let mut reporter = Reporter::new(&mut out, &mut err, OutputFormat::Text);

		reporter
			.record(&doc("Namespace", "team-a", None), None, &Outcome::Created)
			.unwrap();
		reporter
			.record(
				&doc("ConfigMap", "cfg", Some("team-a")),
				Some("team-a"),
				&Outcome::Patched,
			)
			.unwrap();
		reporter
			.record(&doc("Namespace", "team-b", None), None, &Outcome::NoOpExists)
			.unwrap();
		reporter
			.record(
				&doc("StatefulSet", "db", None),
				Some("default"),
				&Outcome::Skipped(SkipReason::NoStrategy),
			)
			.unwrap();
		reporter.unknown_kind(&doc("Role", "reader", Some("team-a"))).unwrap();
		let report = reporter.finish(true).unwrap();

		assert_eq!(
			text(&out),
			"Namespace team-a created\n\
			 ConfigMap team-a/cfg patched\n\
			 Namespace team-b already exists, skipped\n\
			 1 created, 1 patched, 1 unchanged, 1 skipped, 2 warning(s)\n"
		);
		assert_eq!(
			text(&err),
			"warning: StatefulSet default/db skipped: no apply strategy for kind\n\
			 warning: resource of kind 'Role' (Role/team-a/reader) in manifests/app.yaml is not in the kind order, skipping\n"
		);
		assert_eq!(report.warnings, 2);
		assert!(report.completed);
	}

	#[derive(Clone, Default)]
	struct LogBuffer(Arc<Mutex<Vec<u8>>>);

	impl Write for LogBuffer {
		fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
			self.0.lock().unwrap().extend_from_slice(buf);
			Ok(buf.len())
		}

		fn flush(&mut self) -> std::io::Result<()> {
			Ok(())
		}
	}

	#[test]
	fn test_default_log_level_does_not_repeat_lines() {
		let logs = LogBuffer::default();
		let subscriber = tracing_subscriber::fmt()
			.with_env_filter(EnvFilter::new("info"))
			.with_writer({
				let logs = logs.clone();
				move || logs.clone()
			})
			.finish();

		let (mut out, mut err) = (Vec::new(), Vec::new());
		tracing::subscriber::with_default(subscriber, || {
			let mut reporter = Reporter::new(&mut out, &mut err, OutputFormat::Text);
			reporter
				.record(&doc("Secret", "creds", None), Some("default"), &Outcome::Created)
				.unwrap();
			reporter.unknown_kind(&doc("Role", "reader", None)).unwrap();
			reporter.finish(true).unwrap();
		});

		let logged = logs.0.lock().unwrap().clone();
		assert!(logged.is_empty(), "{}", text(&logged));
		assert_eq!(text(&err).lines().count(), 1);
	}

	#[test]
	fn test_incomplete_warning() {
		let (mut out, mut err) = (Vec::new(), Vec::new());
		let mut reporter = Reporter::new(&mut out, &mut err, OutputFormat::Text);

		reporter
			.incomplete(&IncompleteDocument {
				index: 2,
				source: Some("a.yaml".into()),
				missing: vec!["kind", "apiVersion"],
				kind: None,
				name: Some("orphan".to_string()),
			})
			.unwrap();

		assert_eq!(reporter.report().warnings, 1);
		assert_eq!(
			text(&err),
			"warning: document 2 (orphan) in a.yaml is missing kind, apiVersion, skipping\n"
		);
		assert!(out.is_empty());
	}

	#[test]
	fn test_failure_goes_to_error_writer() {
		let (mut out, mut err) = (Vec::new(), Vec::new());
		let mut reporter = Reporter::new(&mut out, &mut err, OutputFormat::Text);

		reporter
			.record(
				&doc("Secret", "creds", Some("prod")),
				Some("prod"),
				&Outcome::Failed("forbidden".to_string()),
			)
			.unwrap();
		let report = reporter.finish(false).unwrap();

		assert!(out.is_empty());
		assert_eq!(text(&err), "error: Secret prod/creds failed: forbidden\n");
		assert!(!report.completed);
		assert_eq!(report.outcomes(), vec![("Secret", "creds", "failed")]);
	}

	#[test]
	fn test_json_report() {
		let (mut out, mut err) = (Vec::new(), Vec::new());
		let mut reporter = Reporter::new(&mut out, &mut err, OutputFormat::Json);

		reporter
			.record(&doc("Namespace", "team-a", None), None, &Outcome::Created)
			.unwrap();
		reporter
			.record(
				&doc("Secret", "creds", Some("team-a")),
				Some("team-a"),
				&Outcome::Patched,
			)
			.unwrap();
		reporter.finish(true).unwrap();

		let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
		assert_eq!(
			value,
			json!({
				"resources": [
					{"kind": "Namespace", "name": "team-a", "outcome": "created"},
					{"kind": "Secret", "name": "creds", "namespace": "team-a", "outcome": "patched"},
				],
				"warnings": 0,
				"completed": true,
			})
		);
		assert!(err.is_empty());
	}
}
