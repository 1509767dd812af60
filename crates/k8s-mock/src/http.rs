//! Mock Kubernetes API server over HTTP, built on wiremock.
//!
//! Serves version, discovery and a small in-memory object store. Objects can
//! be read, listed by label selector, created and patched (strategic, merge
//! and server-side apply). Dry-run requests are answered without touching the
//! store.

use std::{
	collections::BTreeMap,
	sync::{Arc, PoisonError, RwLock},
};

use bon::Builder;
use kube::config::{
	AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
use serde_json::{json, Value};
use tracing::{debug, trace};
use wiremock::{
	matchers::{header_regex, method, path, path_regex},
	Mock, MockServer, Request, ResponseTemplate,
};

use super::{
	discovery::{DiscoveryMode, MockApiResource, MockDiscovery},
	helpers::{matches_selector, merge_json, strip_strategic_merge_directives},
};

const AGGREGATED_DISCOVERY_CONTENT_TYPE: &str =
	"application/json;g=apidiscovery.k8s.io;v=v2;as=APIGroupDiscoveryList";

const APPLY_PATCH: &str = "application/apply-patch+yaml";
const STRATEGIC_MERGE_PATCH: &str = "application/strategic-merge-patch+json";

/// Where an object lives in the API.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObjectKey {
	pub group_version: String,
	pub plural: String,
	pub namespace: Option<String>,
	pub name: String,
}

type SharedObjects = Arc<RwLock<BTreeMap<ObjectKey, Value>>>;

/// A mock Kubernetes API server.
#[derive(Builder)]
pub struct HttpMockK8sServer {
	/// `gitVersion` reported by `/version`.
	#[builder(into, default = "v1.28.0".to_string())]
	version: String,

	#[builder(default)]
	discovery_mode: DiscoveryMode,

	/// Objects present at startup. Their paths are derived from
	/// `apiVersion` and `kind`; objects of unknown types are skipped.
	#[builder(default)]
	resources: Vec<Value>,

	/// Answer strategic merge patches with 415, like servers do for
	/// custom resources.
	#[builder(default)]
	reject_strategic_merge: bool,
}

/// A started [`HttpMockK8sServer`].
pub struct RunningHttpMockK8sServer {
	server: MockServer,
	objects: SharedObjects,
}

impl HttpMockK8sServer {
	pub async fn start(self) -> RunningHttpMockK8sServer {
		let server = MockServer::start().await;
		let discovery = Arc::new(MockDiscovery::default());
		debug!(uri = %server.uri(), version = %self.version, "started mock API server");

		let mut objects = BTreeMap::new();
		objects.insert(
			ObjectKey {
				group_version: "v1".to_string(),
				plural: "namespaces".to_string(),
				namespace: None,
				name: "default".to_string(),
			},
			json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "default"}}),
		);
		for manifest in self.resources {
			match key_for_manifest(&manifest, &discovery) {
				Some(key) => {
					trace!(?key, "registered object");
					objects.insert(key, manifest);
				}
				None => debug!("skipping object of unknown type"),
			}
		}
		let objects = Arc::new(RwLock::new(objects));

		mount_version(&server, &self.version).await;
		mount_discovery(&server, &discovery, self.discovery_mode).await;
		mount_objects(&server, &objects, &discovery, self.reject_strategic_merge).await;

		RunningHttpMockK8sServer { server, objects }
	}
}

impl RunningHttpMockK8sServer {
	/// Base URI, e.g. `http://127.0.0.1:12345`.
	pub fn uri(&self) -> String {
		self.server.uri()
	}

	/// Kubeconfig with a single context `mock-context` for cluster `mock-cluster`.
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

	/// The stored object at an API path such as
	/// `/apis/apps/v1/namespaces/prod/deployments/api`.
	pub fn object(&self, api_path: &str) -> Option<Value> {
		let parsed = ApiPath::parse(api_path)?;
		let key = parsed.key(parsed.name.clone()?);
		self.objects
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.get(&key)
			.cloned()
	}

	/// Requests received so far, oldest first.
	pub async fn requests(&self) -> Vec<Request> {
		self.server.received_requests().await.unwrap_or_default()
	}
}

/// A parsed resource path.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ApiPath {
	group_version: String,
	namespace: Option<String>,
	plural: String,
	name: Option<String>,
}

impl ApiPath {
	/// Parse `/api/{v}/...` or `/apis/{g}/{v}/...` into its parts.
	fn parse(path: &str) -> Option<Self> {
		let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
		let (group_version, rest) = match segments.as_slice() {
			["api", version, rest @ ..] => (version.to_string(), rest),
			["apis", group, version, rest @ ..] => (format!("{}/{}", group, version), rest),
			_ => return None,
		};

		let (namespace, plural, name) = match rest {
			["namespaces", ns, plural, name] => (Some(*ns), *plural, Some(*name)),
			["namespaces", ns, plural] => (Some(*ns), *plural, None),
			[plural, name] => (None, *plural, Some(*name)),
			[plural] => (None, *plural, None),
			_ => return None,
		};

		Some(Self {
			group_version,
			namespace: namespace.map(str::to_string),
			plural: plural.to_string(),
			name: name.map(str::to_string),
		})
	}

	fn key(&self, name: String) -> ObjectKey {
		ObjectKey {
			group_version: self.group_version.clone(),
			plural: self.plural.clone(),
			namespace: self.namespace.clone(),
			name,
		}
	}

	/// Whether a list request on this path covers `key`.
	fn lists(&self, key: &ObjectKey) -> bool {
		key.group_version == self.group_version
			&& key.plural == self.plural
			&& (self.namespace.is_none() || key.namespace == self.namespace)
	}
}

fn key_for_manifest(manifest: &Value, discovery: &MockDiscovery) -> Option<ObjectKey> {
	let api_version = manifest.get("apiVersion")?.as_str()?;
	let kind = manifest.get("kind")?.as_str()?;
	let name = manifest.pointer("/metadata/name")?.as_str()?;
	let resource = discovery.find_kind(api_version, kind)?;

	let namespace = resource.namespaced.then(|| {
		manifest
			.pointer("/metadata/namespace")
			.and_then(Value::as_str)
			.unwrap_or("default")
			.to_string()
	});

	Some(ObjectKey {
		group_version: api_version.to_string(),
		plural: resource.name.clone(),
		namespace,
		name: name.to_string(),
	})
}

fn query_param(req: &Request, key: &str) -> Option<String> {
	req.url
		.query_pairs()
		.find(|(k, _)| k == key)
		.map(|(_, v)| v.into_owned())
}

fn is_dry_run(req: &Request) -> bool {
	query_param(req, "dryRun").is_some()
}

fn content_type(req: &Request) -> &str {
	req.headers
		.get("content-type")
		.and_then(|v| v.to_str().ok())
		.unwrap_or_default()
}

fn status(code: u16, reason: &str, message: String) -> ResponseTemplate {
	ResponseTemplate::new(code).set_body_json(json!({
		"kind": "Status",
		"apiVersion": "v1",
		"metadata": {},
		"status": "Failure",
		"message": message,
		"reason": reason,
		"code": code
	}))
}

fn not_found(plural: &str, name: &str) -> ResponseTemplate {
	status(404, "NotFound", format!("{} \"{}\" not found", plural, name))
}

async fn mount_version(server: &MockServer, version: &str) {
	let mut parts = version.trim_start_matches('v').split('.');
	let major = parts.next().unwrap_or_default().to_string();
	let minor = parts.next().unwrap_or_default().to_string();

	Mock::given(method("GET"))
		.and(path("/version"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"major": major,
			"minor": minor,
			"gitVersion": version,
			"gitCommit": "fake",
			"gitTreeState": "clean",
			"buildDate": "2024-01-01T00:00:00Z",
			"goVersion": "go1.21.0",
			"compiler": "gc",
			"platform": "linux/amd64"
		})))
		.mount(server)
		.await;
}

fn aggregated_group(group_version: &str, resources: &[MockApiResource]) -> Value {
	let (group, version) = group_version
		.split_once('/')
		.unwrap_or(("", group_version));
	let resources: Vec<_> = resources
		.iter()
		.map(|r| {
			json!({
				"resource": r.name,
				"responseKind": {"group": group, "version": version, "kind": r.kind},
				"scope": r.scope(),
				"verbs": r.verbs,
			})
		})
		.collect();

	json!({
		"metadata": {"name": group},
		"versions": [{
			"version": version,
			"resources": resources,
			"freshness": "Current"
		}]
	})
}

fn resource_list(group_version: &str, resources: &[MockApiResource]) -> Value {
	let resources: Vec<_> = resources
		.iter()
		.map(|r| {
			json!({
				"name": r.name,
				"singularName": "",
				"namespaced": r.namespaced,
				"kind": r.kind,
				"verbs": r.verbs,
			})
		})
		.collect();

	json!({
		"kind": "APIResourceList",
		"apiVersion": "v1",
		"groupVersion": group_version,
		"resources": resources
	})
}

async fn mount_discovery(server: &MockServer, discovery: &MockDiscovery, mode: DiscoveryMode) {
	// aggregated discovery is mounted first so it wins over the legacy endpoints
	match mode {
		DiscoveryMode::Aggregated => {
			let core = json!({
				"kind": "APIGroupDiscoveryList",
				"apiVersion": "apidiscovery.k8s.io/v2",
				"items": [aggregated_group("v1", discovery.core())]
			});
			let named: Vec<_> = discovery
				.named_groups()
				.map(|(gv, rs)| aggregated_group(gv, rs))
				.collect();
			let apis = json!({
				"kind": "APIGroupDiscoveryList",
				"apiVersion": "apidiscovery.k8s.io/v2",
				"items": named
			});

			for (endpoint, body) in [("/api", core), ("/apis", apis)] {
				// set_body_json would overwrite the content type
				Mock::given(method("GET"))
					.and(path(endpoint))
					.and(header_regex("accept", "apidiscovery"))
					.respond_with(
						ResponseTemplate::new(200)
							.set_body_raw(body.to_string(), AGGREGATED_DISCOVERY_CONTENT_TYPE),
					)
					.mount(server)
					.await;
			}
		}
		DiscoveryMode::Legacy => {
			for endpoint in ["/api", "/apis"] {
				Mock::given(method("GET"))
					.and(path(endpoint))
					.and(header_regex("accept", "apidiscovery"))
					.respond_with(ResponseTemplate::new(406))
					.mount(server)
					.await;
			}
		}
	}

	Mock::given(method("GET"))
		.and(path("/api"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"kind": "APIVersions",
			"versions": ["v1"],
			"serverAddressByClientCIDRs": []
		})))
		.mount(server)
		.await;

	let groups: Vec<_> = discovery
		.named_groups()
		.map(|(gv, _)| {
			let (group, version) = gv.split_once('/').unwrap_or(("", gv));
			json!({
				"name": group,
				"versions": [{"groupVersion": gv, "version": version}],
				"preferredVersion": {"groupVersion": gv, "version": version}
			})
		})
		.collect();

	Mock::given(method("GET"))
		.and(path("/apis"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"kind": "APIGroupList",
			"apiVersion": "v1",
			"groups": groups
		})))
		.mount(server)
		.await;

	Mock::given(method("GET"))
		.and(path("/api/v1"))
		.respond_with(ResponseTemplate::new(200).set_body_json(resource_list("v1", discovery.core())))
		.mount(server)
		.await;

	for (gv, rs) in discovery.named_groups() {
		Mock::given(method("GET"))
			.and(path(format!("/apis/{}", gv)))
			.respond_with(ResponseTemplate::new(200).set_body_json(resource_list(gv, rs)))
			.mount(server)
			.await;
	}
}

async fn mount_objects(
	server: &MockServer,
	objects: &SharedObjects,
	discovery: &Arc<MockDiscovery>,
	reject_strategic_merge: bool,
) {
	let store = Arc::clone(objects);
	let types = Arc::clone(discovery);
	Mock::given(method("GET"))
		.and(path_regex(r"^/apis?/"))
		.respond_with(move |req: &Request| {
			let Some(parsed) = ApiPath::parse(req.url.path()) else {
				return status(404, "NotFound", format!("no route for {}", req.url.path()));
			};
			let objects = store.read().unwrap_or_else(PoisonError::into_inner);

			if let Some(name) = &parsed.name {
				return match objects.get(&parsed.key(name.clone())) {
					Some(object) => ResponseTemplate::new(200).set_body_json(object),
					None => not_found(&parsed.plural, name),
				};
			}

			let selector = query_param(req, "labelSelector").unwrap_or_default();
			// list items come back without type meta, like from a real server
			let items: Vec<Value> = objects
				.iter()
				.filter(|(key, object)| parsed.lists(key) && matches_selector(object, &selector))
				.map(|(_, object)| {
					let mut item = object.clone();
					if let Some(map) = item.as_object_mut() {
						map.remove("apiVersion");
						map.remove("kind");
					}
					item
				})
				.collect();
			trace!(path = %req.url.path(), %selector, count = items.len(), "list");

			let kind = types
				.find_plural(&parsed.group_version, &parsed.plural)
				.map(|r| format!("{}List", r.kind))
				.unwrap_or_else(|| "List".to_string());
			ResponseTemplate::new(200).set_body_json(json!({
				"kind": kind,
				"apiVersion": parsed.group_version,
				"metadata": {"resourceVersion": "1"},
				"items": items
			}))
		})
		.mount(server)
		.await;

	let store = Arc::clone(objects);
	Mock::given(method("POST"))
		.and(path_regex(r"^/apis?/"))
		.respond_with(move |req: &Request| {
			let Some(parsed) = ApiPath::parse(req.url.path()) else {
				return status(404, "NotFound", format!("no route for {}", req.url.path()));
			};
			let body: Value = match serde_json::from_slice(&req.body) {
				Ok(body) => body,
				Err(e) => return status(400, "BadRequest", e.to_string()),
			};
			let Some(name) = body.pointer("/metadata/name").and_then(Value::as_str) else {
				return status(422, "Invalid", "metadata.name: Required value".to_string());
			};

			let key = parsed.key(name.to_string());
			let mut objects = store.write().unwrap_or_else(PoisonError::into_inner);
			if objects.contains_key(&key) {
				return status(
					409,
					"AlreadyExists",
					format!("{} \"{}\" already exists", parsed.plural, name),
				);
			}
			if !is_dry_run(req) {
				objects.insert(key, body.clone());
			}
			ResponseTemplate::new(201).set_body_json(body)
		})
		.mount(server)
		.await;

	let store = Arc::clone(objects);
	Mock::given(method("PATCH"))
		.and(path_regex(r"^/apis?/"))
		.respond_with(move |req: &Request| {
			let Some(parsed) = ApiPath::parse(req.url.path()) else {
				return status(404, "NotFound", format!("no route for {}", req.url.path()));
			};
			let Some(name) = parsed.name.clone() else {
				return status(405, "MethodNotAllowed", "PATCH needs a name".to_string());
			};

			let patch_type = content_type(req);
			if reject_strategic_merge && patch_type.starts_with(STRATEGIC_MERGE_PATCH) {
				return status(
					415,
					"UnsupportedMediaType",
					format!("the body of the request was in an unknown format: {}", patch_type),
				);
			}
			let is_apply = patch_type.starts_with(APPLY_PATCH);

			let patch: Value = match serde_json::from_slice(&req.body) {
				Ok(patch) => patch,
				Err(e) => return status(400, "BadRequest", e.to_string()),
			};

			let key = parsed.key(name.clone());
			let mut objects = store.write().unwrap_or_else(PoisonError::into_inner);
			let merged = match objects.get(&key) {
				Some(existing) => merge_json(existing.clone(), patch),
				// server-side apply creates missing objects
				None if is_apply => patch,
				None => return not_found(&parsed.plural, &name),
			};
			let merged = strip_strategic_merge_directives(merged);

			if !is_dry_run(req) {
				objects.insert(key, merged.clone());
			}
			ResponseTemplate::new(200).set_body_json(merged)
		})
		.mount(server)
		.await;
}
