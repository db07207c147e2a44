//! Manifest parsing.
//!
//! Turns raw YAML text into [`ManifestDocument`]s. Syntax errors are fatal;
//! documents that parse but lack the fields needed for routing are set aside
//! as [`IncompleteDocument`]s so the caller can warn about them.

use std::{fmt, path::PathBuf};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{instrument, trace};

#[derive(Debug, Error)]
#[error("parsing document {index} of {}", source_display(.source_path))]
pub struct ParseError {
	/// Zero-based position of the document within its file.
	pub index: usize,
	pub source_path: Option<PathBuf>,
	#[source]
	pub source: serde_yaml::Error,
}

fn source_display(path: &Option<PathBuf>) -> String {
	path.as_ref()
		.map_or_else(|| "<inline>".to_string(), |p| p.display().to_string())
}

/// One unit of desired state, ready to be classified and reconciled.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestDocument {
	pub kind: String,
	pub api_version: String,
	pub name: String,
	/// `metadata.namespace`, if the document declares one.
	pub namespace: Option<String>,
	/// The full manifest, including everything not extracted above.
	pub body: Value,
	/// File the document was read from.
	pub source: Option<PathBuf>,
}

impl ManifestDocument {
	/// Extract routing fields from a manifest value.
	///
	/// Returns the list of missing required fields when the value cannot be
	/// routed.
	pub fn from_value(body: Value, source: Option<PathBuf>) -> Result<Self, Vec<&'static str>> {
		let kind = non_empty_str(body.get("kind"));
		let api_version = non_empty_str(body.get("apiVersion"));
		let name = non_empty_str(body.pointer("/metadata/name"));

		let missing: Vec<&'static str> = [
			("kind", kind.is_none()),
			("apiVersion", api_version.is_none()),
			("metadata.name", name.is_none()),
		]
		.into_iter()
		.filter_map(|(field, absent)| absent.then_some(field))
		.collect();

		let (Some(kind), Some(api_version), Some(name)) = (kind, api_version, name) else {
			return Err(missing);
		};

		let namespace = non_empty_str(body.pointer("/metadata/namespace"));

		Ok(Self {
			kind,
			api_version,
			name,
			namespace,
			body,
			source,
		})
	}

	/// `kind/name`, or `kind/namespace/name` when a namespace is set.
	pub fn display_ref(&self) -> DocumentRef<'_> {
		DocumentRef(self)
	}
}

pub struct DocumentRef<'a>(&'a ManifestDocument);

impl fmt::Display for DocumentRef<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.0.namespace {
			Some(ns) => write!(f, "{}/{}/{}", self.0.kind, ns, self.0.name),
			None => write!(f, "{}/{}", self.0.kind, self.0.name),
		}
	}
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
	value
		.and_then(Value::as_str)
		.filter(|s| !s.is_empty())
		.map(str::to_string)
}

/// A document that parsed but cannot be routed.
#[derive(Debug, Clone, PartialEq)]
pub struct IncompleteDocument {
	/// Zero-based position of the document within its file.
	pub index: usize,
	pub source: Option<PathBuf>,
	pub missing: Vec<&'static str>,
	/// Whatever identity the document did carry, for diagnostics.
	pub kind: Option<String>,
	pub name: Option<String>,
}

/// Result of parsing one file.
#[derive(Debug, Default)]
pub struct ParsedManifests {
	pub documents: Vec<ManifestDocument>,
	pub incomplete: Vec<IncompleteDocument>,
}

impl ParsedManifests {
	pub fn extend(&mut self, other: ParsedManifests) {
		self.documents.extend(other.documents);
		self.incomplete.extend(other.incomplete);
	}
}

/// Parse a (possibly multi-document) YAML string.
///
/// Empty documents are skipped. A document of kind `List` contributes each
/// of its `items` instead of itself.
#[instrument(skip_all, fields(source = %source_display(&source)))]
pub fn parse_documents(raw: &str, source: Option<PathBuf>) -> Result<ParsedManifests, ParseError> {
	let mut parsed = ParsedManifests::default();

	for (index, doc) in serde_yaml::Deserializer::from_str(raw).enumerate() {
		let value = Value::deserialize(doc).map_err(|e| ParseError {
			index,
			source_path: source.clone(),
			source: e,
		})?;

		if value.is_null() {
			trace!(index, "skipping empty document");
			continue;
		}

		for item in flatten_lists(value) {
			route(item, index, &source, &mut parsed);
		}
	}

	Ok(parsed)
}

fn flatten_lists(value: Value) -> Vec<Value> {
	let is_list = value.get("kind").and_then(Value::as_str) == Some("List")
		&& value.get("items").is_some_and(Value::is_array);
	if !is_list {
		return vec![value];
	}

	match value {
		Value::Object(mut map) => match map.remove("items") {
			Some(Value::Array(items)) => items
				.into_iter()
				.filter(|item| !item.is_null())
				.flat_map(flatten_lists)
				.collect(),
			_ => Vec::new(),
		},
		_ => Vec::new(),
	}
}

fn route(value: Value, index: usize, source: &Option<PathBuf>, parsed: &mut ParsedManifests) {
	let kind = non_empty_str(value.get("kind"));
	let name = non_empty_str(value.pointer("/metadata/name"));

	match ManifestDocument::from_value(value, source.clone()) {
		Ok(doc) => {
			trace!(kind = %doc.kind, name = %doc.name, "parsed document");
			parsed.documents.push(doc);
		}
		Err(missing) => parsed.incomplete.push(IncompleteDocument {
			index,
			source: source.clone(),
			missing,
			kind,
			name,
		}),
	}
}

#[cfg(test)]
mod tests {
	use indoc::indoc;
	use serde_json::json;

	use super::*;

	#[test]
	fn test_parse_multi_document() {
		let raw = indoc! {"
			apiVersion: v1
			kind: Namespace
			metadata:
			  name: team-a
			---
			apiVersion: v1
			kind: ConfigMap
			metadata:
			  name: cfg
			  namespace: team-a
			data:
			  key: value
		"};

		let parsed = parse_documents(raw, None).unwrap();
		assert!(parsed.incomplete.is_empty());
		assert_eq!(parsed.documents.len(), 2);

		let ns = &parsed.documents[0];
		assert_eq!(ns.kind, "Namespace");
		assert_eq!(ns.api_version, "v1");
		assert_eq!(ns.name, "team-a");
		assert_eq!(ns.namespace, None);

		let cm = &parsed.documents[1];
		assert_eq!(cm.kind, "ConfigMap");
		assert_eq!(cm.namespace.as_deref(), Some("team-a"));
		assert_eq!(cm.body["data"], json!({"key": "value"}));
	}

	#[test]
	fn test_parse_skips_empty_documents() {
		let raw = indoc! {"
			---
			apiVersion: v1
			kind: Secret
			metadata:
			  name: creds
			---
			---
		"};

		let parsed = parse_documents(raw, None).unwrap();
		assert_eq!(parsed.documents.len(), 1);
		assert!(parsed.incomplete.is_empty());
	}

	#[test]
	fn test_parse_empty_input() {
		let parsed = parse_documents("", None).unwrap();
		assert!(parsed.documents.is_empty());
		assert!(parsed.incomplete.is_empty());
	}

	#[test]
	fn test_document_with_name_but_no_kind_is_dropped() {
		let raw = indoc! {"
			apiVersion: v1
			metadata:
			  name: orphan
		"};

		let parsed = parse_documents(raw, Some(PathBuf::from("orphan.yaml"))).unwrap();
		assert!(parsed.documents.is_empty());
		assert_eq!(
			parsed.incomplete,
			vec![IncompleteDocument {
				index: 0,
				source: Some(PathBuf::from("orphan.yaml")),
				missing: vec!["kind"],
				kind: None,
				name: Some("orphan".to_string()),
			}]
		);
	}

	#[test]
	fn test_missing_fields_are_listed() {
		let raw = indoc! {"
			kind: Deployment
			metadata:
			  name: ''
		"};

		let parsed = parse_documents(raw, None).unwrap();
		assert!(parsed.documents.is_empty());
		assert_eq!(parsed.incomplete[0].missing, vec!["apiVersion", "metadata.name"]);
		assert_eq!(parsed.incomplete[0].kind.as_deref(), Some("Deployment"));
	}

	#[test]
	fn test_non_mapping_document_is_incomplete() {
		let parsed = parse_documents("- just\n- a list\n", None).unwrap();
		assert!(parsed.documents.is_empty());
		assert_eq!(
			parsed.incomplete[0].missing,
			vec!["kind", "apiVersion", "metadata.name"]
		);
	}

	#[test]
	fn test_top_level_namespace_field_is_ignored() {
		let raw = indoc! {"
			apiVersion: v1
			kind: ConfigMap
			namespace: elsewhere
			metadata:
			  name: cfg
		"};

		let parsed = parse_documents(raw, None).unwrap();
		assert_eq!(parsed.documents[0].namespace, None);
	}

	#[test]
	fn test_syntax_error_is_fatal() {
		let raw = indoc! {"
			apiVersion: v1
			kind: ConfigMap
			metadata:
			  name: ok
			---
			kind: [unterminated
		"};

		let err = parse_documents(raw, Some(PathBuf::from("bad.yaml"))).unwrap_err();
		assert_eq!(err.index, 1);
		assert_eq!(err.to_string(), "parsing document 1 of bad.yaml");
	}

	#[test]
	fn test_list_items_are_expanded() {
		let raw = indoc! {"
			apiVersion: v1
			kind: List
			items:
			  - apiVersion: v1
			    kind: ServiceAccount
			    metadata:
			      name: runner
			      namespace: ci
			  - apiVersion: v1
			    kind: Service
			    metadata: {}
		"};

		let parsed = parse_documents(raw, None).unwrap();
		assert_eq!(parsed.documents.len(), 1);
		assert_eq!(parsed.documents[0].kind, "ServiceAccount");
		assert_eq!(parsed.incomplete.len(), 1);
		assert_eq!(parsed.incomplete[0].kind.as_deref(), Some("Service"));
	}

	#[test]
	fn test_display_ref() {
		let doc = ManifestDocument::from_value(
			json!({"apiVersion": "v1", "kind": "Secret", "metadata": {"name": "s", "namespace": "ns"}}),
			None,
		)
		.unwrap();
		assert_eq!(doc.display_ref().to_string(), "Secret/ns/s");

		let doc = ManifestDocument::from_value(
			json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "ns"}}),
			None,
		)
		.unwrap();
		assert_eq!(doc.display_ref().to_string(), "Namespace/ns");
	}
}
