//! Per-kind apply strategies.
//!
//! Every kind the reconciler can apply is registered in a [`StrategyTable`]
//! as a [`KindStrategy`]: built-in kinds are addressed through their
//! `k8s-openapi` types, custom resources through a generic
//! group/version/plural adapter built from the document's own `apiVersion`.
//! Either way the document body goes to the server as written.

use std::{collections::BTreeMap, fmt::Debug, marker::PhantomData};

use async_trait::async_trait;
use k8s_openapi::{
	api::{
		apps::v1::{DaemonSet, Deployment, StatefulSet},
		batch::v1::{CronJob, Job},
		core::v1::{
			ConfigMap, Namespace, PersistentVolume, PersistentVolumeClaim, Secret, Service,
			ServiceAccount,
		},
		networking::v1::Ingress,
		rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding},
		storage::v1::StorageClass,
	},
	apimachinery::pkg::apis::meta::v1::ObjectMeta,
	ClusterResourceScope, NamespaceResourceScope,
};
use kube::{
	api::{Api, DynamicObject, Patch, PatchParams, PostParams},
	discovery::ApiResource,
	Client, Resource,
};
use thiserror::Error;
use tracing::trace;

use super::{gvk_from_api_version, ResourceScope};
use crate::manifest::ManifestDocument;

/// Field manager recorded on everything this tool writes.
pub const FIELD_MANAGER: &str = "kapply";

#[derive(Debug, Error)]
pub enum StrategyError {
	#[error(transparent)]
	Api(Box<kube::Error>),

	#[error("manifest does not match the {kind} schema")]
	InvalidBody {
		kind: String,
		#[source]
		source: serde_json::Error,
	},
}

impl From<kube::Error> for StrategyError {
	fn from(e: kube::Error) -> Self {
		StrategyError::Api(Box::new(e))
	}
}

/// What to do when the resource already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePolicy {
	/// Patch the live object with the document body.
	Patch,
	/// Leave the live object untouched.
	CreateOnly,
}

/// The operations the reconciler needs for one kind.
///
/// `namespace` is `Some` for namespaced kinds and `None` for cluster-wide
/// ones; the reconciler resolves it from [`KindStrategy::scope`] before
/// calling in.
#[async_trait]
pub trait KindStrategy: Send + Sync {
	fn scope(&self) -> ResourceScope;

	fn update_policy(&self) -> UpdatePolicy {
		UpdatePolicy::Patch
	}

	/// Read the live object's metadata, `None` if it does not exist.
	async fn get(
		&self,
		client: &Client,
		doc: &ManifestDocument,
		namespace: Option<&str>,
	) -> Result<Option<ObjectMeta>, StrategyError>;

	async fn create(
		&self,
		client: &Client,
		doc: &ManifestDocument,
		namespace: Option<&str>,
	) -> Result<(), StrategyError>;

	async fn update(
		&self,
		client: &Client,
		doc: &ManifestDocument,
		namespace: Option<&str>,
	) -> Result<(), StrategyError>;
}

fn post_params() -> PostParams {
	PostParams {
		field_manager: Some(FIELD_MANAGER.to_string()),
		..Default::default()
	}
}

fn patch_params() -> PatchParams {
	PatchParams {
		field_manager: Some(FIELD_MANAGER.to_string()),
		..Default::default()
	}
}

fn dynamic_api(
	client: &Client,
	resource: &ApiResource,
	scope: ResourceScope,
	namespace: Option<&str>,
) -> Api<DynamicObject> {
	match (scope, namespace) {
		(ResourceScope::Namespaced, Some(ns)) => Api::namespaced_with(client.clone(), ns, resource),
		(ResourceScope::Namespaced, None) => Api::default_namespaced_with(client.clone(), resource),
		(ResourceScope::ClusterWide, _) => Api::all_with(client.clone(), resource),
	}
}

/// The document body as sent to the API server, unknown fields included.
fn dynamic_body(doc: &ManifestDocument) -> Result<DynamicObject, StrategyError> {
	serde_json::from_value(doc.body.clone()).map_err(|source| StrategyError::InvalidBody {
		kind: doc.kind.clone(),
		source,
	})
}

/// Strategy for a kind with a compiled-in `k8s-openapi` type.
///
/// `K` only fixes the URL and scope; bodies are sent untouched, so fields
/// outside the compiled-in schema still reach the server.
pub struct Typed<K> {
	scope: ResourceScope,
	policy: UpdatePolicy,
	resource: ApiResource,
	_kind: PhantomData<fn() -> K>,
}

impl<K> Typed<K>
where
	K: Resource<DynamicType = ()>,
{
	fn with_scope(scope: ResourceScope) -> Self {
		Self {
			scope,
			policy: UpdatePolicy::Patch,
			resource: ApiResource::erase::<K>(&()),
			_kind: PhantomData,
		}
	}

	pub fn namespaced() -> Self
	where
		K: Resource<Scope = NamespaceResourceScope>,
	{
		Self::with_scope(ResourceScope::Namespaced)
	}

	pub fn cluster_wide() -> Self
	where
		K: Resource<Scope = ClusterResourceScope>,
	{
		Self::with_scope(ResourceScope::ClusterWide)
	}

	/// Never patch existing objects of this kind.
	pub fn create_only(mut self) -> Self {
		self.policy = UpdatePolicy::CreateOnly;
		self
	}

	pub fn api_resource(&self) -> &ApiResource {
		&self.resource
	}

	fn api(&self, client: &Client, namespace: Option<&str>) -> Api<DynamicObject> {
		dynamic_api(client, &self.resource, self.scope, namespace)
	}
}

#[async_trait]
impl<K> KindStrategy for Typed<K>
where
	K: Resource<DynamicType = ()> + Send + Sync + 'static,
{
	fn scope(&self) -> ResourceScope {
		self.scope
	}

	fn update_policy(&self) -> UpdatePolicy {
		self.policy
	}

	async fn get(
		&self,
		client: &Client,
		doc: &ManifestDocument,
		namespace: Option<&str>,
	) -> Result<Option<ObjectMeta>, StrategyError> {
		let existing = self.api(client, namespace).get_opt(&doc.name).await?;
		Ok(existing.map(|obj| obj.metadata))
	}

	async fn create(
		&self,
		client: &Client,
		doc: &ManifestDocument,
		namespace: Option<&str>,
	) -> Result<(), StrategyError> {
		let obj = dynamic_body(doc)?;
		self.api(client, namespace).create(&post_params(), &obj).await?;
		Ok(())
	}

	async fn update(
		&self,
		client: &Client,
		doc: &ManifestDocument,
		namespace: Option<&str>,
	) -> Result<(), StrategyError> {
		self.api(client, namespace)
			.patch(&doc.name, &patch_params(), &Patch::Strategic(&doc.body))
			.await?;
		Ok(())
	}
}

/// Strategy for a custom resource addressed by group/version/plural.
///
/// Group and version come from each document's `apiVersion`, so one entry
/// serves every version of the resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomResource {
	kind: String,
	plural: String,
	scope: ResourceScope,
}

impl CustomResource {
	pub fn new(kind: impl Into<String>, plural: impl Into<String>, scope: ResourceScope) -> Self {
		Self {
			kind: kind.into(),
			plural: plural.into(),
			scope,
		}
	}

	pub fn kind(&self) -> &str {
		&self.kind
	}

	pub fn plural(&self) -> &str {
		&self.plural
	}

	/// API resource for a document with the given `apiVersion`.
	pub fn api_resource(&self, api_version: &str) -> ApiResource {
		let gvk = gvk_from_api_version(api_version, &self.kind);
		ApiResource::from_gvk_with_plural(&gvk, &self.plural)
	}

	fn api(&self, client: &Client, doc: &ManifestDocument, namespace: Option<&str>) -> Api<DynamicObject> {
		let ar = self.api_resource(&doc.api_version);
		trace!(group = %ar.group, version = %ar.version, plural = %ar.plural, "custom resource api");
		dynamic_api(client, &ar, self.scope, namespace)
	}
}

#[async_trait]
impl KindStrategy for CustomResource {
	fn scope(&self) -> ResourceScope {
		self.scope
	}

	async fn get(
		&self,
		client: &Client,
		doc: &ManifestDocument,
		namespace: Option<&str>,
	) -> Result<Option<ObjectMeta>, StrategyError> {
		let existing = self.api(client, doc, namespace).get_opt(&doc.name).await?;
		Ok(existing.map(|obj| obj.metadata))
	}

	async fn create(
		&self,
		client: &Client,
		doc: &ManifestDocument,
		namespace: Option<&str>,
	) -> Result<(), StrategyError> {
		let obj = dynamic_body(doc)?;
		self.api(client, doc, namespace)
			.create(&post_params(), &obj)
			.await?;
		Ok(())
	}

	async fn update(
		&self,
		client: &Client,
		doc: &ManifestDocument,
		namespace: Option<&str>,
	) -> Result<(), StrategyError> {
		// Custom resources don't support strategic merge
		self.api(client, doc, namespace)
			.patch(&doc.name, &patch_params(), &Patch::Merge(&doc.body))
			.await?;
		Ok(())
	}
}

/// Kind name → apply strategy.
#[derive(Default)]
pub struct StrategyTable {
	strategies: BTreeMap<String, Box<dyn KindStrategy>>,
}

impl StrategyTable {
	/// Table with every built-in strategy and the bundled custom resources.
	pub fn builtin() -> Self {
		let mut table = Self::default();
		table
			.register("Namespace", Typed::<Namespace>::cluster_wide().create_only())
			.register("ConfigMap", Typed::<ConfigMap>::namespaced())
			.register("Secret", Typed::<Secret>::namespaced())
			.register("PersistentVolume", Typed::<PersistentVolume>::cluster_wide())
			.register(
				"PersistentVolumeClaim",
				Typed::<PersistentVolumeClaim>::namespaced(),
			)
			.register("ServiceAccount", Typed::<ServiceAccount>::namespaced())
			.register("ClusterRole", Typed::<ClusterRole>::cluster_wide())
			.register(
				"ClusterRoleBinding",
				Typed::<ClusterRoleBinding>::cluster_wide(),
			)
			.register("Deployment", Typed::<Deployment>::namespaced())
			.register("DaemonSet", Typed::<DaemonSet>::namespaced())
			.register("Service", Typed::<Service>::namespaced())
			.register("Ingress", Typed::<Ingress>::namespaced())
			// Not in the default order; reachable once configuration adds them
			.register("StatefulSet", Typed::<StatefulSet>::namespaced())
			.register("Role", Typed::<Role>::namespaced())
			.register("RoleBinding", Typed::<RoleBinding>::namespaced())
			.register("Job", Typed::<Job>::namespaced())
			.register("CronJob", Typed::<CronJob>::namespaced())
			.register("StorageClass", Typed::<StorageClass>::cluster_wide());

		table
			.register_custom(CustomResource::new(
				"SealedSecret",
				"sealedsecrets",
				ResourceScope::Namespaced,
			))
			.register_custom(CustomResource::new(
				"ClusterIssuer",
				"clusterissuers",
				ResourceScope::ClusterWide,
			));
		table
	}

	/// Register (or replace) the strategy for `kind`.
	pub fn register(
		&mut self,
		kind: impl Into<String>,
		strategy: impl KindStrategy + 'static,
	) -> &mut Self {
		self.strategies.insert(kind.into(), Box::new(strategy));
		self
	}

	pub fn register_custom(&mut self, custom: CustomResource) -> &mut Self {
		let kind = custom.kind.clone();
		self.register(kind, custom)
	}

	pub fn get(&self, kind: &str) -> Option<&dyn KindStrategy> {
		self.strategies.get(kind).map(Box::as_ref)
	}

	pub fn contains(&self, kind: &str) -> bool {
		self.strategies.contains_key(kind)
	}

	pub fn kinds(&self) -> impl Iterator<Item = &str> {
		self.strategies.keys().map(String::as_str)
	}
}

impl Debug for StrategyTable {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("StrategyTable")
			.field("kinds", &self.strategies.keys().collect::<Vec<_>>())
			.finish()
	}
}
