//! Kubernetes API access.
//!
//! Connection setup lives in [`client`]; the per-kind read/create/update
//! operations the reconciler dispatches to live in [`strategy`].

pub mod client;
pub mod strategy;

use kube::core::GroupVersionKind;
use serde::{Deserialize, Serialize};

/// Kubernetes API resource scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResourceScope {
	/// Resource is namespaced (e.g., Deployment, ConfigMap).
	#[default]
	Namespaced,

	/// Resource is cluster-wide (e.g., Namespace, ClusterRole).
	#[serde(alias = "Cluster")]
	ClusterWide,
}

impl ResourceScope {
	pub fn is_cluster_wide(self) -> bool {
		self == ResourceScope::ClusterWide
	}
}

/// Split an apiVersion into `(group, version)`.
///
/// Core kinds carry a bare version (`v1`), which maps to the empty group.
pub fn split_api_version(api_version: &str) -> (&str, &str) {
	api_version.split_once('/').unwrap_or(("", api_version))
}

/// Create a GroupVersionKind from an apiVersion string and kind.
pub fn gvk_from_api_version(api_version: &str, kind: &str) -> GroupVersionKind {
	let (group, version) = split_api_version(api_version);
	GroupVersionKind::gvk(group, version, kind)
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	#[rstest]
	#[case("certmanager.example.io/v1", "certmanager.example.io", "v1")]
	#[case("bitnami.com/v1alpha1", "bitnami.com", "v1alpha1")]
	#[case("apps/v1", "apps", "v1")]
	#[case("v1", "", "v1")]
	fn test_split_api_version(#[case] api_version: &str, #[case] group: &str, #[case] version: &str) {
		assert_eq!(split_api_version(api_version), (group, version));
	}

	#[test]
	fn test_gvk_from_api_version() {
		let gvk = gvk_from_api_version("cert-manager.io/v1", "ClusterIssuer");
		assert_eq!(gvk.group, "cert-manager.io");
		assert_eq!(gvk.version, "v1");
		assert_eq!(gvk.kind, "ClusterIssuer");
	}

	#[test]
	fn test_scope_deserializes_short_alias() {
		let scope: ResourceScope = serde_json::from_str("\"Cluster\"").unwrap();
		assert_eq!(scope, ResourceScope::ClusterWide);
		let scope: ResourceScope = serde_json::from_str("\"Namespaced\"").unwrap();
		assert_eq!(scope, ResourceScope::Namespaced);
	}
}
