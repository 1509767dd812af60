//! In-memory cluster for exercising the engine without an API server.

#![allow(dead_code)]

use std::{
	collections::{BTreeMap, HashSet},
	sync::{Arc, Mutex},
};

use async_trait::async_trait;
use rtk_k8s::{
	client::ClusterRef,
	confirm::{Confirm, ConfirmError},
	ApplyOpts, ClientError, ClusterClient, ClusterInfo, Environment, Manifest, ManifestList,
	LABEL_ENVIRONMENT,
};
use serde_json::{json, Value};

/// A cluster holding a fixed set of objects.
///
/// Records every call it receives and can be told to fail or hang on
/// `get_by_labels` for specific kinds.
pub struct FakeCluster {
	version: String,
	objects: Vec<Manifest>,
	failing_kinds: HashSet<String>,
	hanging_kinds: HashSet<String>,
	server_diff: Option<String>,
	fail_info: bool,
	pub label_queries: Mutex<Vec<(String, String, BTreeMap<String, String>)>>,
	pub get_calls: Mutex<Vec<(String, String, String)>>,
	pub server_diff_calls: Mutex<usize>,
	pub applied: Mutex<Vec<(ManifestList, ApplyOpts)>>,
}

impl FakeCluster {
	pub fn new(version: &str) -> Self {
		Self {
			version: version.to_string(),
			objects: Vec::new(),
			failing_kinds: HashSet::new(),
			hanging_kinds: HashSet::new(),
			server_diff: None,
			fail_info: false,
			label_queries: Mutex::new(Vec::new()),
			get_calls: Mutex::new(Vec::new()),
			server_diff_calls: Mutex::new(0),
			applied: Mutex::new(Vec::new()),
		}
	}

	pub fn with_objects(mut self, objects: impl IntoIterator<Item = Manifest>) -> Self {
		self.objects.extend(objects);
		self
	}

	pub fn failing(mut self, kind: &str) -> Self {
		self.failing_kinds.insert(kind.to_string());
		self
	}

	pub fn hanging(mut self, kind: &str) -> Self {
		self.hanging_kinds.insert(kind.to_string());
		self
	}

	/// What `diff_server_side` returns.
	pub fn with_server_diff(mut self, diff: Option<&str>) -> Self {
		self.server_diff = diff.map(str::to_string);
		self
	}

	pub fn failing_info(mut self) -> Self {
		self.fail_info = true;
		self
	}

	pub fn queried_kinds(&self) -> Vec<String> {
		let mut kinds: Vec<_> = self
			.label_queries
			.lock()
			.unwrap()
			.iter()
			.map(|(_, kind, _)| kind.clone())
			.collect();
		kinds.sort();
		kinds
	}

	pub fn applied_count(&self) -> usize {
		self.applied.lock().unwrap().len()
	}
}

fn matches_namespace(object: &Manifest, namespace: &str) -> bool {
	let object_ns = object.metadata().namespace();
	namespace.is_empty() || object_ns.is_empty() || object_ns == namespace
}

#[async_trait]
impl ClusterClient for FakeCluster {
	async fn info(&self) -> Result<ClusterInfo, ClientError> {
		if self.fail_info {
			return Err(ClientError::UnknownKind("version".to_string()));
		}
		Ok(ClusterInfo {
			server_version: self.version.parse()?,
			cluster: ClusterRef {
				name: "fake-cluster".to_string(),
				server: "https://fake:6443".to_string(),
			},
			context: "fake-context".to_string(),
		})
	}

	async fn get(
		&self,
		namespace: &str,
		kind: &str,
		name: &str,
	) -> Result<Option<Manifest>, ClientError> {
		self.get_calls.lock().unwrap().push((
			namespace.to_string(),
			kind.to_string(),
			name.to_string(),
		));
		Ok(self
			.objects
			.iter()
			.find(|o| {
				o.kind() == kind && o.metadata().name() == name && matches_namespace(o, namespace)
			})
			.cloned())
	}

	async fn get_by_labels(
		&self,
		namespace: &str,
		kind: &str,
		labels: &BTreeMap<String, String>,
	) -> Result<ManifestList, ClientError> {
		self.label_queries.lock().unwrap().push((
			namespace.to_string(),
			kind.to_string(),
			labels.clone(),
		));

		if self.hanging_kinds.contains(kind) {
			std::future::pending::<()>().await;
		}
		if self.failing_kinds.contains(kind) {
			return Err(ClientError::UnknownKind(kind.to_string()));
		}

		Ok(self
			.objects
			.iter()
			.filter(|o| o.kind() == kind && matches_namespace(o, namespace))
			.filter(|o| {
				let have = o.metadata().labels();
				labels
					.iter()
					.all(|(k, v)| have.get(k.as_str()) == Some(&v.as_str()))
			})
			.cloned()
			.collect())
	}

	async fn diff_server_side(&self, _state: &ManifestList) -> Result<Option<String>, ClientError> {
		*self.server_diff_calls.lock().unwrap() += 1;
		Ok(self.server_diff.clone())
	}

	async fn apply_server_side(
		&self,
		state: &ManifestList,
		opts: &ApplyOpts,
	) -> Result<(), ClientError> {
		self.applied
			.lock()
			.unwrap()
			.push((state.clone(), opts.clone()));
		Ok(())
	}
}

/// Answers every confirmation with a fixed string and remembers the prompts.
pub struct Answer {
	answer: String,
	pub prompts: Mutex<Vec<String>>,
}

impl Answer {
	pub fn new(answer: &str) -> Arc<Self> {
		Arc::new(Self {
			answer: answer.to_string(),
			prompts: Mutex::new(Vec::new()),
		})
	}
}

impl Confirm for Answer {
	fn confirm(&self, message: &str, approve: &str) -> Result<(), ConfirmError> {
		self.prompts.lock().unwrap().push(message.to_string());
		if self.answer == approve {
			Ok(())
		} else {
			Err(ConfirmError::NotConfirmed)
		}
	}
}

pub fn env(name: &str, namespace: &str) -> Environment {
	let mut env = Environment::new();
	env.metadata.name = Some(name.to_string());
	env.metadata.namespace = Some(format!("environments/{}/main.jsonnet", name));
	env.spec.namespace = namespace.to_string();
	env
}

pub fn manifest(value: Value) -> Manifest {
	Manifest::try_from(value).unwrap()
}

/// A Deployment labelled as part of `env`.
pub fn deployment(env: &Environment, name: &str, namespace: &str) -> Manifest {
	labelled(env, "apps/v1", "Deployment", name, namespace)
}

pub fn labelled(
	env: &Environment,
	api_version: &str,
	kind: &str,
	name: &str,
	namespace: &str,
) -> Manifest {
	let mut metadata = json!({"name": name, "labels": {}});
	metadata["labels"][LABEL_ENVIRONMENT] = json!(env.name_label());
	if !namespace.is_empty() {
		metadata["namespace"] = json!(namespace);
	}
	manifest(json!({
		"apiVersion": api_version,
		"kind": kind,
		"metadata": metadata,
	}))
}

pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}
