//! The HTTP side of the mock cluster, built on wiremock.

use std::{
	collections::HashMap,
	sync::{Arc, RwLock},
};

use bon::Builder;
use kube::config::{
	AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
use serde_json::{json, Value};
use tracing::{debug, trace};
use wiremock::{
	matchers::{method, path, path_regex},
	Mock, MockServer, Request, ResponseTemplate,
};

use crate::{
	catalog::ResourceCatalog,
	helpers::{merge_patch, split_object_path, status, strip_directives},
};

const NAMESPACES_PATH: &str = "/api/v1/namespaces";

/// Stored objects keyed by `(collection path, name)`.
#[derive(Debug, Default)]
struct Store {
	objects: HashMap<(String, String), Value>,
	revision: u64,
}

impl Store {
	fn insert(&mut self, key: (String, String), mut object: Value) -> Value {
		self.revision += 1;
		if let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) {
			metadata.insert("resourceVersion".into(), json!(self.revision.to_string()));
		}
		self.objects.insert(key, object.clone());
		object
	}
}

type SharedStore = Arc<RwLock<Store>>;

/// A canned failure for one method and path.
#[derive(Debug, Clone)]
pub struct Rejection {
	pub method: String,
	/// Exact request path, without query string.
	pub path: String,
	pub status: u16,
	pub reason: String,
}

impl Rejection {
	pub fn new(method: &str, path: &str, status: u16, reason: &str) -> Self {
		Self {
			method: method.to_string(),
			path: path.to_string(),
			status,
			reason: reason.to_string(),
		}
	}

	/// `403 Forbidden` for `method` on `path`.
	pub fn forbidden(method: &str, path: &str) -> Self {
		Self::new(method, path, 403, "Forbidden")
	}
}

/// A mock cluster, configured before it starts.
#[derive(Builder)]
pub struct MockCluster {
	#[builder(default)]
	catalog: ResourceCatalog,
	/// Objects present when the server starts. The `default` namespace is
	/// always present.
	#[builder(default)]
	resources: Vec<Value>,
	#[builder(default)]
	rejections: Vec<Rejection>,
}

/// A request the server received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
	pub method: String,
	pub path: String,
}

/// A running mock cluster.
pub struct RunningMockCluster {
	server: MockServer,
	store: SharedStore,
}

impl MockCluster {
	pub async fn start(self) -> RunningMockCluster {
		let server = MockServer::start().await;
		debug!(uri = %server.uri(), "started mock cluster");

		let mut store = Store::default();
		store.insert(
			(NAMESPACES_PATH.to_string(), "default".to_string()),
			json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "default"}}),
		);
		for manifest in self.resources {
			match self.catalog.key_for(&manifest) {
				Some(key) => {
					trace!(collection = %key.0, name = %key.1, "preloading object");
					store.insert(key, manifest);
				}
				None => debug!(manifest = %manifest, "no resource type for preloaded object, ignoring"),
			}
		}
		let store = Arc::new(RwLock::new(store));

		mount_version(&server).await;
		for rejection in &self.rejections {
			mount_rejection(&server, rejection).await;
		}
		mount_objects(&server, &store).await;

		RunningMockCluster { server, store }
	}
}

impl RunningMockCluster {
	pub fn uri(&self) -> String {
		self.server.uri()
	}

	/// Kubeconfig with a single context, `mock-context`, pointing here.
	pub fn kubeconfig(&self) -> Kubeconfig {
		self.kubeconfig_with_context("mock-context")
	}

	pub fn kubeconfig_with_context(&self, context_name: &str) -> Kubeconfig {
		let cluster_name = "mock-cluster";
		let user_name = "mock-user";

		Kubeconfig {
			clusters: vec![NamedCluster {
				name: cluster_name.to_string(),
				cluster: Some(Cluster {
					server: Some(self.uri()),
					insecure_skip_tls_verify: Some(true),
					..Default::default()
				}),
			}],
			contexts: vec![NamedContext {
				name: context_name.to_string(),
				context: Some(Context {
					cluster: cluster_name.to_string(),
					user: Some(user_name.to_string()),
					namespace: Some("default".to_string()),
					..Default::default()
				}),
			}],
			auth_infos: vec![NamedAuthInfo {
				name: user_name.to_string(),
				auth_info: Some(AuthInfo::default()),
			}],
			current_context: Some(context_name.to_string()),
			..Default::default()
		}
	}

	/// The stored object at `collection`/`name`, e.g.
	/// `object("/api/v1/namespaces/web/configmaps", "cfg")`.
	pub fn object(&self, collection: &str, name: &str) -> Option<Value> {
		let store = self.store.read().unwrap();
		store
			.objects
			.get(&(collection.to_string(), name.to_string()))
			.cloned()
	}

	/// Every request received so far, in arrival order.
	pub async fn requests(&self) -> Vec<RecordedRequest> {
		self.server
			.received_requests()
			.await
			.unwrap_or_default()
			.into_iter()
			.map(|req| RecordedRequest {
				method: req.method.as_str().to_string(),
				path: req.url.path().to_string(),
			})
			.collect()
	}

	/// Requests that could change state (anything but GET).
	pub async fn writes(&self) -> Vec<RecordedRequest> {
		self.requests()
			.await
			.into_iter()
			.filter(|r| r.method != "GET")
			.collect()
	}
}

async fn mount_version(server: &MockServer) {
	Mock::given(method("GET"))
		.and(path("/version"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"major": "1",
			"minor": "31",
			"gitVersion": "v1.31.0",
			"gitCommit": "fake",
			"gitTreeState": "clean",
			"buildDate": "2024-08-13T00:00:00Z",
			"goVersion": "go1.22.5",
			"compiler": "gc",
			"platform": "linux/amd64"
		})))
		.mount(server)
		.await;
}

async fn mount_rejection(server: &MockServer, rejection: &Rejection) {
	let message = format!("{} {} rejected by mock cluster", rejection.method, rejection.path);
	Mock::given(method(rejection.method.as_str()))
		.and(path(rejection.path.as_str()))
		.respond_with(
			ResponseTemplate::new(rejection.status).set_body_json(status(
				rejection.status,
				&rejection.reason,
				&message,
			)),
		)
		.with_priority(1)
		.mount(server)
		.await;
}

/// Namespace a collection path lives in, if it is namespaced.
fn namespace_of(collection: &str) -> Option<&str> {
	let (_, rest) = collection.split_once("/namespaces/")?;
	let (namespace, _) = rest.split_once('/')?;
	Some(namespace)
}

fn not_found(resource: &str, name: &str) -> ResponseTemplate {
	ResponseTemplate::new(404).set_body_json(status(
		404,
		"NotFound",
		&format!("{resource} \"{name}\" not found"),
	))
}

async fn mount_objects(server: &MockServer, store: &SharedStore) {
	let get_store = Arc::clone(store);
	Mock::given(method("GET"))
		.and(path_regex(r"^/apis?/.+"))
		.respond_with(move |req: &Request| {
			let (collection, name) = split_object_path(req.url.path());
			let store = get_store.read().unwrap();
			match store.objects.get(&(collection.clone(), name.clone())) {
				Some(object) => ResponseTemplate::new(200).set_body_json(object),
				None => not_found(&collection, &name),
			}
		})
		.mount(server)
		.await;

	let post_store = Arc::clone(store);
	Mock::given(method("POST"))
		.and(path_regex(r"^/apis?/.+"))
		.respond_with(move |req: &Request| {
			let collection = req.url.path().trim_end_matches('/').to_string();
			let Ok(body) = serde_json::from_slice::<Value>(&req.body) else {
				return ResponseTemplate::new(400).set_body_json(status(400, "BadRequest", "invalid JSON body"));
			};
			let Some(name) = body.pointer("/metadata/name").and_then(Value::as_str) else {
				return ResponseTemplate::new(422).set_body_json(status(422, "Invalid", "metadata.name is required"));
			};
			let key = (collection, name.to_string());

			let mut store = post_store.write().unwrap();
			if let Some(namespace) = namespace_of(&key.0) {
				if !store
					.objects
					.contains_key(&(NAMESPACES_PATH.to_string(), namespace.to_string()))
				{
					return not_found("namespaces", namespace);
				}
			}
			if store.objects.contains_key(&key) {
				return ResponseTemplate::new(409).set_body_json(status(
					409,
					"AlreadyExists",
					&format!("{} \"{}\" already exists", key.0, key.1),
				));
			}

			let stored = store.insert(key, body);
			ResponseTemplate::new(201).set_body_json(stored)
		})
		.mount(server)
		.await;

	let patch_store = Arc::clone(store);
	Mock::given(method("PATCH"))
		.and(path_regex(r"^/apis?/.+"))
		.respond_with(move |req: &Request| {
			let key = split_object_path(req.url.path());
			let Ok(patch) = serde_json::from_slice::<Value>(&req.body) else {
				return ResponseTemplate::new(400).set_body_json(status(400, "BadRequest", "invalid JSON body"));
			};

			let mut store = patch_store.write().unwrap();
			let Some(existing) = store.objects.get(&key).cloned() else {
				return not_found(&key.0, &key.1);
			};
			let patched = strip_directives(merge_patch(existing, patch));
			let stored = store.insert(key, patched);
			ResponseTemplate::new(200).set_body_json(stored)
		})
		.mount(server)
		.await;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_namespace_of() {
		assert_eq!(namespace_of("/api/v1/namespaces/web/configmaps"), Some("web"));
		assert_eq!(namespace_of("/apis/apps/v1/namespaces/a/deployments"), Some("a"));
		assert_eq!(namespace_of("/api/v1/namespaces"), None);
		assert_eq!(namespace_of("/apis/rbac.authorization.k8s.io/v1/clusterroles"), None);
	}

	#[tokio::test]
	async fn test_preloaded_objects_and_default_namespace() {
		let cluster = MockCluster::builder()
			.resources(vec![json!({
				"apiVersion": "v1",
				"kind": "Secret",
				"metadata": {"name": "creds", "namespace": "default"}
			})])
			.build()
			.start()
			.await;

		assert!(cluster.object(NAMESPACES_PATH, "default").is_some());
		let secret = cluster
			.object("/api/v1/namespaces/default/secrets", "creds")
			.unwrap();
		assert_eq!(secret["metadata"]["resourceVersion"], "2");
		assert!(cluster.requests().await.is_empty());
	}
}
