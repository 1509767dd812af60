//! [`ClusterClient`] backed by kube-rs.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::{
	api::{Api, DynamicObject, ListParams, Patch, PatchParams, PostParams},
	discovery::ApiResource,
};
use serde_json::Value;
use tokio::{
	sync::{OnceCell, Semaphore},
	task::JoinSet,
};
use tracing::instrument;

use super::{
	connection::ClusterConnection,
	discovery::{builtin, gvk_from_api_version, ApiResourceCache},
	label_selector, ApplyOpts, ApplyStrategy, ClientError, ClusterClient, ClusterInfo,
};
use crate::{
	diff::{self, ensure_annotations, strip_kubectl_fields, DiffStatus, NameStyle, ResourceDiff},
	manifest::{Manifest, ManifestList},
	spec::Spec,
	version::ServerVersion,
	yaml, ResourceScope,
};

/// Maximum concurrent API operations for parallel diffing.
const MAX_CONCURRENT_DIFF_OPS: usize = 8;

/// Field manager recorded on server-side applied fields.
const FIELD_MANAGER: &str = "tanka";

/// A resource type resolved to its API endpoint.
#[derive(Debug, Clone)]
struct Resolved {
	api_resource: ApiResource,
	scope: ResourceScope,
}

/// Cluster client talking to a real API server.
///
/// Clones share the connection and the discovery cache.
#[derive(Clone)]
pub struct KubeClient {
	connection: ClusterConnection,
	api_cache: Arc<OnceCell<ApiResourceCache>>,
}

impl KubeClient {
	pub fn new(connection: ClusterConnection) -> Self {
		Self {
			connection,
			api_cache: Arc::new(OnceCell::new()),
		}
	}

	/// Connect to the cluster an environment points at, using `$KUBECONFIG`.
	pub async fn from_spec(spec: &Spec) -> Result<Self, ClientError> {
		Ok(Self::new(ClusterConnection::from_spec(spec).await?))
	}

	pub fn connection(&self) -> &ClusterConnection {
		&self.connection
	}

	/// Discovery results, fetched on first use.
	async fn api_cache(&self) -> Result<&ApiResourceCache, ClientError> {
		let cache = self
			.api_cache
			.get_or_try_init(|| ApiResourceCache::build(self.connection.client()))
			.await?;
		Ok(cache)
	}

	/// Resolve a kind to its endpoint. An empty `api_version` picks the
	/// built-in or server-preferred version.
	async fn resolve(&self, api_version: &str, kind: &str) -> Result<Resolved, ClientError> {
		if let Some(b) = builtin(kind) {
			if api_version.is_empty() || api_version == b.api_version() {
				return Ok(Resolved {
					api_resource: b.api_resource(kind),
					scope: b.scope,
				});
			}
		}

		let cache = self.api_cache().await?;
		let found = if api_version.is_empty() {
			cache.lookup_kind(kind)
		} else {
			cache.lookup(&gvk_from_api_version(api_version, kind))
		};

		found
			.map(|d| Resolved {
				api_resource: d.api_resource.clone(),
				scope: d.scope,
			})
			.ok_or_else(|| {
				if api_version.is_empty() {
					ClientError::UnknownKind(kind.to_string())
				} else {
					ClientError::UnknownKind(format!("{}/{}", api_version, kind))
				}
			})
	}

	/// Namespace a request for `resolved` goes to, `None` for cluster-scoped kinds.
	fn target_namespace(&self, resolved: &Resolved, namespace: &str) -> Option<String> {
		match resolved.scope {
			ResourceScope::ClusterWide => None,
			ResourceScope::Namespaced if namespace.is_empty() => {
				Some(self.connection.client().default_namespace().to_string())
			}
			ResourceScope::Namespaced => Some(namespace.to_string()),
		}
	}

	fn dynamic_api(&self, ar: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
		let client = self.connection.client().clone();
		match namespace {
			Some(ns) => Api::namespaced_with(client, ns, ar),
			None => Api::all_with(client, ar),
		}
	}

	#[instrument(skip(self))]
	async fn namespace_exists(&self, name: &str) -> Result<bool, ClientError> {
		let api: Api<Namespace> = Api::all(self.connection.client().clone());
		let found = api
			.get_opt(name)
			.await
			.map_err(|e| request_error("checking", "Namespace", name, e))?;
		Ok(found.is_some())
	}

	/// Diff a single manifest using a server-side dry run.
	///
	/// Existing resources are dry-run patched (strategic merge, falling back
	/// to a JSON merge patch for kinds that don't support it). Missing ones
	/// are dry-run created so the diff shows server defaults.
	#[instrument(skip_all, fields(kind = %manifest.kind(), name = %manifest.metadata().name()))]
	async fn diff_manifest(&self, manifest: &Manifest) -> Result<ResourceDiff, ClientError> {
		let kind = manifest.kind();
		let name = manifest.metadata().name();
		let resolved = self.resolve(manifest.api_version(), kind).await?;
		let namespace = self.target_namespace(&resolved, manifest.metadata().namespace());

		let mut result = ResourceDiff {
			api_version: resolved.api_resource.api_version.clone(),
			kind: kind.to_string(),
			namespace: namespace.clone(),
			name: name.to_string(),
			status: DiffStatus::Unchanged,
			current_yaml: String::new(),
			desired_yaml: String::new(),
		};

		if let Some(ns) = &namespace {
			if !self.namespace_exists(ns).await? {
				result.status = DiffStatus::SoonAdded;
				result.desired_yaml = to_yaml(&manifest.to_value())?;
				return Ok(result);
			}
		}

		let api = self.dynamic_api(&resolved.api_resource, namespace.as_deref());
		let current = api
			.get_opt(name)
			.await
			.map_err(|e| request_error("fetching", kind, name, e))?;

		let Some(current) = current else {
			let obj: DynamicObject =
				serde_json::from_value(manifest.to_value()).map_err(ClientError::Conversion)?;
			let created = api
				.create(
					&PostParams {
						dry_run: true,
						..Default::default()
					},
					&obj,
				)
				.await
				.map_err(|e| request_error("dry-run creating", kind, name, e))?;

			result.status = DiffStatus::Added;
			result.desired_yaml = object_to_yaml(&created)?;
			return Ok(result);
		};

		let params = PatchParams {
			dry_run: true,
			..Default::default()
		};
		let desired = ensure_annotations(&manifest.to_value());
		let merged = match api.patch(name, &params, &Patch::Strategic(&desired)).await {
			Ok(merged) => merged,
			Err(kube::Error::Api(ref err)) if err.code == 415 => api
				.patch(name, &params, &Patch::Merge(&desired))
				.await
				.map_err(|e| request_error("dry-run patching", kind, name, e))?,
			Err(e) => return Err(request_error("dry-run patching", kind, name, e)),
		};

		result.current_yaml = object_to_yaml(&current)?;
		result.desired_yaml = object_to_yaml(&merged)?;
		if result.current_yaml != result.desired_yaml {
			result.status = DiffStatus::Modified;
		}
		Ok(result)
	}

	#[instrument(skip_all, fields(kind = %manifest.kind(), name = %manifest.metadata().name(), strategy = %opts.strategy))]
	async fn apply_manifest(&self, manifest: &Manifest, opts: &ApplyOpts) -> Result<(), ClientError> {
		let kind = manifest.kind();
		let name = manifest.metadata().name();
		let resolved = self.resolve(manifest.api_version(), kind).await?;
		let namespace = self.target_namespace(&resolved, manifest.metadata().namespace());
		let api = self.dynamic_api(&resolved.api_resource, namespace.as_deref());
		let desired = ensure_annotations(&manifest.to_value());

		match opts.strategy {
			ApplyStrategy::Server => {
				let params = PatchParams {
					field_manager: Some(FIELD_MANAGER.to_string()),
					force: opts.force,
					..Default::default()
				};
				api.patch(name, &params, &Patch::Apply(&desired))
					.await
					.map_err(|e| request_error("applying", kind, name, e))?;
			}
			ApplyStrategy::Client => {
				let params = PatchParams::default();
				match api.patch(name, &params, &Patch::Strategic(&desired)).await {
					Ok(_) => {}
					Err(kube::Error::Api(ref err)) if err.code == 415 => {
						api.patch(name, &params, &Patch::Merge(&desired))
							.await
							.map_err(|e| request_error("applying", kind, name, e))?;
					}
					Err(kube::Error::Api(ref err)) if err.code == 404 => {
						let obj: DynamicObject =
							serde_json::from_value(desired).map_err(ClientError::Conversion)?;
						api.create(&PostParams::default(), &obj)
							.await
							.map_err(|e| request_error("creating", kind, name, e))?;
					}
					Err(e) => return Err(request_error("applying", kind, name, e)),
				}
			}
		}

		tracing::debug!("applied");
		Ok(())
	}
}

#[async_trait]
impl ClusterClient for KubeClient {
	#[instrument(skip_all)]
	async fn info(&self) -> Result<ClusterInfo, ClientError> {
		let info = self
			.connection
			.client()
			.apiserver_version()
			.await
			.map_err(|e| ClientError::ServerVersion(Box::new(e)))?;

		Ok(ClusterInfo {
			server_version: ServerVersion::from_info(&info)?,
			cluster: self.connection.cluster().clone(),
			context: self.connection.context().to_string(),
		})
	}

	#[instrument(skip(self))]
	async fn get(
		&self,
		namespace: &str,
		kind: &str,
		name: &str,
	) -> Result<Option<Manifest>, ClientError> {
		let resolved = self.resolve("", kind).await?;
		let namespace = self.target_namespace(&resolved, namespace);
		let api = self.dynamic_api(&resolved.api_resource, namespace.as_deref());

		api.get_opt(name)
			.await
			.map_err(|e| request_error("fetching", kind, name, e))?
			.map(|obj| to_manifest(obj, &resolved.api_resource))
			.transpose()
	}

	#[instrument(skip(self, labels), fields(selector = %label_selector(labels)))]
	async fn get_by_labels(
		&self,
		namespace: &str,
		kind: &str,
		labels: &BTreeMap<String, String>,
	) -> Result<ManifestList, ClientError> {
		let resolved = self.resolve("", kind).await?;
		let namespace = match resolved.scope {
			ResourceScope::Namespaced if !namespace.is_empty() => Some(namespace),
			_ => None,
		};
		let api = self.dynamic_api(&resolved.api_resource, namespace);

		let params = ListParams::default().labels(&label_selector(labels));
		let list = api
			.list(&params)
			.await
			.map_err(|e| request_error("listing", kind, "*", e))?;

		tracing::debug!(count = list.items.len(), "listed resources");
		list.items
			.into_iter()
			.map(|obj| to_manifest(obj, &resolved.api_resource))
			.collect()
	}

	#[instrument(skip_all, fields(manifest_count = state.len()))]
	async fn diff_server_side(&self, state: &ManifestList) -> Result<Option<String>, ClientError> {
		let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_DIFF_OPS));
		let mut join_set = JoinSet::new();

		for manifest in state.iter().cloned() {
			let client = self.clone();
			let sem = semaphore.clone();
			join_set.spawn(async move {
				let _permit = sem.acquire_owned().await;
				client.diff_manifest(&manifest).await
			});
		}

		let mut diffs = Vec::with_capacity(state.len());
		while let Some(result) = join_set.join_next().await {
			diffs.push(result.map_err(ClientError::TaskPanicked)??);
		}

		Ok(diff::render(diffs, NameStyle::Native))
	}

	#[instrument(skip_all, fields(manifest_count = state.len(), strategy = %opts.strategy))]
	async fn apply_server_side(
		&self,
		state: &ManifestList,
		opts: &ApplyOpts,
	) -> Result<(), ClientError> {
		for manifest in state {
			self.apply_manifest(manifest, opts).await?;
		}
		Ok(())
	}
}

fn request_error(op: &'static str, kind: &str, name: &str, source: kube::Error) -> ClientError {
	ClientError::Request {
		op,
		kind: kind.to_string(),
		name: name.to_string(),
		source: Box::new(source),
	}
}

/// Convert a fetched object into a manifest.
///
/// List responses leave out `apiVersion` and `kind` on their items.
fn to_manifest(obj: DynamicObject, ar: &ApiResource) -> Result<Manifest, ClientError> {
	let mut value = serde_json::to_value(obj).map_err(ClientError::Conversion)?;
	if let Value::Object(map) = &mut value {
		map.insert("apiVersion".to_string(), Value::String(ar.api_version.clone()));
		map.insert("kind".to_string(), Value::String(ar.kind.clone()));
	}
	Ok(Manifest::try_from(value)?)
}

fn to_yaml(value: &Value) -> Result<String, ClientError> {
	yaml::to_yaml(value).map_err(ClientError::Yaml)
}

fn object_to_yaml(obj: &DynamicObject) -> Result<String, ClientError> {
	let value = serde_json::to_value(obj).map_err(ClientError::Conversion)?;
	to_yaml(&strip_kubectl_fields(&value))
}
