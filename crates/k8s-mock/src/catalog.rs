//! Resource types the mock server knows how to address.

/// One servable resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockResourceType {
	/// `group/version`, or just `version` for the core group.
	pub api_version: String,
	pub kind: String,
	/// Lowercase plural used in URLs.
	pub plural: String,
	pub namespaced: bool,
}

impl MockResourceType {
	pub fn namespaced(api_version: &str, kind: &str, plural: &str) -> Self {
		Self {
			api_version: api_version.to_string(),
			kind: kind.to_string(),
			plural: plural.to_string(),
			namespaced: true,
		}
	}

	pub fn cluster_scoped(api_version: &str, kind: &str, plural: &str) -> Self {
		Self {
			namespaced: false,
			..Self::namespaced(api_version, kind, plural)
		}
	}

	/// Collection path for objects of this type, e.g.
	/// `/apis/apps/v1/namespaces/web/deployments`.
	pub fn collection_path(&self, namespace: Option<&str>) -> String {
		let prefix = if self.api_version.contains('/') {
			format!("/apis/{}", self.api_version)
		} else {
			format!("/api/{}", self.api_version)
		};
		match (self.namespaced, namespace) {
			(true, ns) => format!("{}/namespaces/{}/{}", prefix, ns.unwrap_or("default"), self.plural),
			(false, _) => format!("{}/{}", prefix, self.plural),
		}
	}
}

/// The set of resource types a mock cluster serves.
#[derive(Debug, Clone)]
pub struct ResourceCatalog {
	pub types: Vec<MockResourceType>,
}

impl Default for ResourceCatalog {
	fn default() -> Self {
		use MockResourceType as T;

		Self {
			types: vec![
				T::cluster_scoped("v1", "Namespace", "namespaces"),
				T::namespaced("v1", "ConfigMap", "configmaps"),
				T::namespaced("v1", "Secret", "secrets"),
				T::cluster_scoped("v1", "PersistentVolume", "persistentvolumes"),
				T::namespaced("v1", "PersistentVolumeClaim", "persistentvolumeclaims"),
				T::namespaced("v1", "ServiceAccount", "serviceaccounts"),
				T::namespaced("v1", "Service", "services"),
				T::namespaced("apps/v1", "Deployment", "deployments"),
				T::namespaced("apps/v1", "DaemonSet", "daemonsets"),
				T::namespaced("apps/v1", "StatefulSet", "statefulsets"),
				T::namespaced("batch/v1", "Job", "jobs"),
				T::namespaced("batch/v1", "CronJob", "cronjobs"),
				T::namespaced("networking.k8s.io/v1", "Ingress", "ingresses"),
				T::cluster_scoped("rbac.authorization.k8s.io/v1", "ClusterRole", "clusterroles"),
				T::cluster_scoped(
					"rbac.authorization.k8s.io/v1",
					"ClusterRoleBinding",
					"clusterrolebindings",
				),
				T::namespaced("rbac.authorization.k8s.io/v1", "Role", "roles"),
				T::namespaced("rbac.authorization.k8s.io/v1", "RoleBinding", "rolebindings"),
				T::cluster_scoped("storage.k8s.io/v1", "StorageClass", "storageclasses"),
				T::namespaced("bitnami.com/v1alpha1", "SealedSecret", "sealedsecrets"),
				T::cluster_scoped("cert-manager.io/v1", "ClusterIssuer", "clusterissuers"),
			],
		}
	}
}

impl ResourceCatalog {
	pub fn find(&self, api_version: &str, kind: &str) -> Option<&MockResourceType> {
		self.types
			.iter()
			.find(|t| t.api_version == api_version && t.kind == kind)
	}

	/// Storage key `(collection path, name)` for a manifest.
	pub fn key_for(&self, manifest: &serde_json::Value) -> Option<(String, String)> {
		let api_version = manifest.get("apiVersion")?.as_str()?;
		let kind = manifest.get("kind")?.as_str()?;
		let name = manifest.pointer("/metadata/name")?.as_str()?;
		let namespace = manifest
			.pointer("/metadata/namespace")
			.and_then(serde_json::Value::as_str);

		let ty = self.find(api_version, kind)?;
		Some((ty.collection_path(namespace), name.to_string()))
	}
}
