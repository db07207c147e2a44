//! Kind ordering and grouping.
//!
//! Documents are bucketed by kind; buckets are applied in the order of a
//! [`KindOrder`], documents within a bucket in discovery order. The order is
//! policy handed in by the caller, [`KindOrder::default`] being the sequence
//! below.

use indexmap::IndexMap;
use tracing::{debug, instrument, warn};

use crate::manifest::ManifestDocument;

/// Default application order.
///
/// Namespaces come before anything namespaced, config and secret data before
/// the workloads that mount them, RBAC before the workloads that assume it,
/// and issuers last since ingress is expected to exist by then.
pub const DEFAULT_KIND_ORDER: &[&str] = &[
	"Namespace",
	"ConfigMap",
	"Secret",
	"SealedSecret",
	"PersistentVolume",
	"PersistentVolumeClaim",
	"ServiceAccount",
	"ClusterRole",
	"ClusterRoleBinding",
	"Deployment",
	"DaemonSet",
	"Service",
	"Ingress",
	"ClusterIssuer",
];

/// Ordered, duplicate-free list of the kinds that will be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindOrder {
	kinds: Vec<String>,
}

impl Default for KindOrder {
	fn default() -> Self {
		Self::new(DEFAULT_KIND_ORDER.iter().copied())
	}
}

impl KindOrder {
	/// Build an order from a sequence of kinds; later duplicates are ignored.
	pub fn new<I, S>(kinds: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let mut order = Self { kinds: Vec::new() };
		order.extend(kinds);
		order
	}

	/// Append kinds after the current last one.
	pub fn extend<I, S>(&mut self, kinds: I)
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		for kind in kinds {
			let kind = kind.into();
			if self.contains(&kind) {
				warn!(kind = %kind, "kind listed twice in kind order, keeping first position");
				continue;
			}
			self.kinds.push(kind);
		}
	}

	pub fn contains(&self, kind: &str) -> bool {
		self.position(kind).is_some()
	}

	pub fn position(&self, kind: &str) -> Option<usize> {
		self.kinds.iter().position(|k| k == kind)
	}

	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.kinds.iter().map(String::as_str)
	}

	pub fn len(&self) -> usize {
		self.kinds.len()
	}

	pub fn is_empty(&self) -> bool {
		self.kinds.is_empty()
	}
}

/// Documents bucketed by kind, buckets in [`KindOrder`] order.
#[derive(Debug, Clone, Default)]
pub struct KindGroups {
	groups: IndexMap<String, Vec<ManifestDocument>>,
}

impl KindGroups {
	/// Empty bucket for every kind in `order`.
	pub fn new(order: &KindOrder) -> Self {
		Self {
			groups: order.iter().map(|k| (k.to_string(), Vec::new())).collect(),
		}
	}

	/// File a document into its bucket, handing it back if its kind has none.
	pub fn insert(&mut self, doc: ManifestDocument) -> Result<(), ManifestDocument> {
		match self.groups.get_mut(&doc.kind) {
			Some(bucket) => {
				bucket.push(doc);
				Ok(())
			}
			None => Err(doc),
		}
	}

	/// Buckets in apply order, empty ones included.
	pub fn iter(&self) -> impl Iterator<Item = (&str, &[ManifestDocument])> {
		self.groups.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
	}

	/// Every document in apply order.
	pub fn documents(&self) -> impl Iterator<Item = &ManifestDocument> {
		self.groups.values().flatten()
	}

	pub fn get(&self, kind: &str) -> Option<&[ManifestDocument]> {
		self.groups.get(kind).map(Vec::as_slice)
	}

	/// Number of documents across all buckets.
	pub fn len(&self) -> usize {
		self.groups.values().map(Vec::len).sum()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Outcome of classifying a set of documents.
#[derive(Debug, Default)]
pub struct Classified {
	pub groups: KindGroups,
	/// Documents whose kind is not in the order, in discovery order.
	pub unknown: Vec<ManifestDocument>,
}

/// Bucket `documents` by kind according to `order`.
#[instrument(skip_all, fields(kinds = order.len()))]
pub fn classify<I>(order: &KindOrder, documents: I) -> Classified
where
	I: IntoIterator<Item = ManifestDocument>,
{
	let mut classified = Classified {
		groups: KindGroups::new(order),
		unknown: Vec::new(),
	};

	for doc in documents {
		if let Err(doc) = classified.groups.insert(doc) {
			classified.unknown.push(doc);
		}
	}

	debug!(
		grouped = classified.groups.len(),
		unknown = classified.unknown.len(),
		"classified documents"
	);
	classified
}
