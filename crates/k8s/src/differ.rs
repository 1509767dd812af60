//! Diff strategies.
//!
//! A strategy compares a desired [`ManifestList`] to the cluster and returns
//! the differences in unified diff format, or `None` when there are none.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::instrument;

use crate::{
	client::{ClientError, ClusterClient},
	diff::{self, filter_to_manifest_fields, DiffStatus, NameStyle, ResourceDiff},
	error::Error,
	manifest::{Manifest, ManifestList},
	version::ServerVersion,
	yaml,
};

/// Server-side dry-run diff.
pub const NATIVE: &str = "native";
/// Client-side diff of the fields a manifest sets.
pub const SUBSET: &str = "subset";

/// Oldest server version supporting server-side dry run.
pub const NATIVE_MIN_VERSION: ServerVersion = ServerVersion::new(1, 13, 0);

/// Maximum concurrent `get` requests issued by [`SubsetDiffer`].
const MAX_CONCURRENT_GETS: usize = 8;

/// Strategy used when the environment doesn't name one.
pub fn default_strategy(version: &ServerVersion) -> &'static str {
	if *version < NATIVE_MIN_VERSION {
		SUBSET
	} else {
		NATIVE
	}
}

#[async_trait]
pub trait Differ: Send + Sync {
	async fn diff(&self, state: &ManifestList) -> Result<Option<String>, ClientError>;
}

/// Delegates to the cluster's own diff ([`ClusterClient::diff_server_side`]).
pub struct NativeDiffer {
	client: Arc<dyn ClusterClient>,
}

impl NativeDiffer {
	pub fn new(client: Arc<dyn ClusterClient>) -> Self {
		Self { client }
	}
}

#[async_trait]
impl Differ for NativeDiffer {
	#[instrument(skip_all, fields(strategy = NATIVE, manifest_count = state.len()))]
	async fn diff(&self, state: &ManifestList) -> Result<Option<String>, ClientError> {
		self.client.diff_server_side(state).await
	}
}

/// Fetches each resource and diffs only the fields present in its manifest.
///
/// Works against servers without dry-run support. Anything the server adds
/// (status, defaults, generated metadata) is invisible to this strategy.
pub struct SubsetDiffer {
	client: Arc<dyn ClusterClient>,
}

impl SubsetDiffer {
	pub fn new(client: Arc<dyn ClusterClient>) -> Self {
		Self { client }
	}
}

async fn subset_diff(
	client: Arc<dyn ClusterClient>,
	manifest: Manifest,
) -> Result<ResourceDiff, ClientError> {
	let metadata = manifest.metadata();
	let live = client
		.get(metadata.namespace(), manifest.kind(), metadata.name())
		.await?;

	let desired = manifest.to_value();
	let desired_yaml = yaml::to_yaml(&desired).map_err(ClientError::Yaml)?;
	let (status, current_yaml) = match live {
		None => (DiffStatus::Added, String::new()),
		Some(live) => {
			let filtered = filter_to_manifest_fields(&live.to_value(), &desired);
			let current_yaml = yaml::to_yaml(&filtered).map_err(ClientError::Yaml)?;
			let status = if current_yaml == desired_yaml {
				DiffStatus::Unchanged
			} else {
				DiffStatus::Modified
			};
			(status, current_yaml)
		}
	};

	let namespace = metadata.namespace();
	Ok(ResourceDiff {
		api_version: manifest.api_version().to_string(),
		kind: manifest.kind().to_string(),
		namespace: (!namespace.is_empty()).then(|| namespace.to_string()),
		name: metadata.name().to_string(),
		status,
		current_yaml,
		desired_yaml,
	})
}

#[async_trait]
impl Differ for SubsetDiffer {
	#[instrument(skip_all, fields(strategy = SUBSET, manifest_count = state.len()))]
	async fn diff(&self, state: &ManifestList) -> Result<Option<String>, ClientError> {
		let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_GETS));
		let mut join_set = JoinSet::new();

		for manifest in state.iter().cloned() {
			let client = self.client.clone();
			let sem = semaphore.clone();
			join_set.spawn(async move {
				let _permit = sem.acquire_owned().await;
				subset_diff(client, manifest).await
			});
		}

		let mut diffs = Vec::with_capacity(state.len());
		while let Some(result) = join_set.join_next().await {
			diffs.push(result.map_err(ClientError::TaskPanicked)??);
		}

		Ok(diff::render(diffs, NameStyle::Subset))
	}
}

/// The closed set of diff strategies, keyed by name.
pub struct DifferRegistry {
	differs: BTreeMap<&'static str, Arc<dyn Differ>>,
}

impl DifferRegistry {
	/// Register the built-in strategies against `client`.
	pub fn new(client: Arc<dyn ClusterClient>) -> Self {
		let mut differs: BTreeMap<&'static str, Arc<dyn Differ>> = BTreeMap::new();
		differs.insert(NATIVE, Arc::new(NativeDiffer::new(client.clone())));
		differs.insert(SUBSET, Arc::new(SubsetDiffer::new(client)));
		Self { differs }
	}

	pub fn get(&self, name: &str) -> Option<&Arc<dyn Differ>> {
		self.differs.get(name)
	}

	pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
		self.differs.keys().copied()
	}

	/// Pick a strategy: a non-empty `requested` name wins over `default`.
	pub fn select(&self, requested: Option<&str>, default: &str) -> Result<&Arc<dyn Differ>, Error> {
		let name = requested.filter(|n| !n.is_empty()).unwrap_or(default);
		self.get(name)
			.ok_or_else(|| Error::UnknownStrategy(name.to_string()))
	}
}
