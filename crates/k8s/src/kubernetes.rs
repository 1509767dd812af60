//! The reconciliation engine.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use bon::Builder;
use tracing::instrument;

use crate::{
	client::{ApplyOpts, ClusterClient, ClusterInfo, KubeClient},
	confirm::{Confirm, Prompt},
	differ::{default_strategy, DifferRegistry},
	diffstat::diffstat,
	error::Error,
	manifest::ManifestList,
	orphans::{default_kinds, OrphanDetector},
	spec::Environment,
	LABEL_ENVIRONMENT,
};

/// Answer the operator has to type to approve an apply.
const APPROVE: &str = "yes";

/// Options for [`Kubernetes::diff`].
#[derive(Debug, Clone, Default)]
pub struct DiffOpts {
	/// Reduce the diff to a `diffstat(1)` histogram.
	pub summarize: bool,

	/// Strategy for this call, overriding the environment's.
	pub strategy: Option<String>,
}

/// Engine tuning beyond what the environment configures.
#[derive(Builder)]
pub struct EngineOptions {
	/// Kinds searched for orphaned resources.
	#[builder(default = default_kinds())]
	orphan_kinds: Vec<String>,

	/// Give up on orphan detection after this long. Unbounded if unset.
	orphan_timeout: Option<Duration>,

	/// Asks for approval before applying.
	#[builder(default = Arc::new(Prompt))]
	confirm: Arc<dyn Confirm>,
}

impl Default for EngineOptions {
	fn default() -> Self {
		Self::builder().build()
	}
}

/// Diff, apply and orphan detection for one environment against one cluster.
pub struct Kubernetes {
	env: Environment,
	client: Arc<dyn ClusterClient>,
	info: ClusterInfo,
	diff_strategy: String,
	differs: DifferRegistry,
	orphans: OrphanDetector,
	confirm: Arc<dyn Confirm>,
}

impl std::fmt::Debug for Kubernetes {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Kubernetes")
			.field("env", &self.env.metadata.name)
			.field("info", &self.info)
			.field("diff_strategy", &self.diff_strategy)
			.finish_non_exhaustive()
	}
}

impl Kubernetes {
	/// Connect to the cluster configured in `env` using `$KUBECONFIG`.
	#[instrument(skip_all, fields(env = env.metadata.name.as_deref().unwrap_or_default()))]
	pub async fn new(env: Environment, options: EngineOptions) -> Result<Self, Error> {
		let client = KubeClient::from_spec(&env.spec)
			.await
			.map_err(Error::ClientUnavailable)?;
		Self::with_client(env, Arc::new(client), options).await
	}

	/// Build the engine on top of an existing client.
	///
	/// Queries the cluster info once. If the environment doesn't name a diff
	/// strategy, one is picked from the server version.
	#[instrument(skip_all, fields(env = env.metadata.name.as_deref().unwrap_or_default()))]
	pub async fn with_client(
		env: Environment,
		client: Arc<dyn ClusterClient>,
		options: EngineOptions,
	) -> Result<Self, Error> {
		let info = client.info().await.map_err(Error::InfoUnavailable)?;

		let diff_strategy = match env.spec.diff_strategy.as_deref() {
			Some(name) if !name.is_empty() => name.to_string(),
			_ => default_strategy(&info.server_version).to_string(),
		};
		tracing::debug!(
			server_version = %info.server_version,
			context = %info.context,
			diff_strategy = %diff_strategy,
			"connected to cluster"
		);

		Ok(Self {
			differs: DifferRegistry::new(client.clone()),
			orphans: OrphanDetector::new(
				client.clone(),
				options.orphan_kinds,
				options.orphan_timeout,
			),
			confirm: options.confirm,
			env,
			client,
			info,
			diff_strategy,
		})
	}

	pub fn env(&self) -> &Environment {
		&self.env
	}

	/// Cluster info captured when the engine was created.
	pub fn info(&self) -> &ClusterInfo {
		&self.info
	}

	/// Strategy used by [`Kubernetes::diff`] unless overridden per call.
	pub fn diff_strategy(&self) -> &str {
		&self.diff_strategy
	}

	/// Differences between `state` and the cluster, `None` if there are none.
	#[instrument(skip_all, fields(manifest_count = state.len(), strategy = opts.strategy.as_deref().unwrap_or(self.diff_strategy.as_str())))]
	pub async fn diff(&self, state: &ManifestList, opts: &DiffOpts) -> Result<Option<String>, Error> {
		let differ = self
			.differs
			.select(opts.strategy.as_deref(), &self.diff_strategy)?;

		let Some(diff) = differ.diff(state).await.map_err(Error::Diff)? else {
			return Ok(None);
		};

		if opts.summarize {
			return Ok(Some(diffstat(&diff)?));
		}
		Ok(Some(diff))
	}

	/// Resources labelled as part of this environment that `state` doesn't contain.
	pub async fn orphaned(&self, state: &ManifestList) -> Result<ManifestList, Error> {
		let labels = BTreeMap::from([(LABEL_ENVIRONMENT.to_string(), self.env.name_label())]);
		self.orphans
			.orphaned(state, &self.env.spec.namespace, labels)
			.await
	}

	/// Push `state` to the cluster.
	///
	/// Orphans are reported, not deleted. Unless `opts.auto_approve` is set the
	/// operator has to confirm first; nothing is changed if they don't.
	#[instrument(skip_all, fields(manifest_count = state.len(), auto_approve = opts.auto_approve))]
	pub async fn apply(&self, state: &ManifestList, opts: &ApplyOpts) -> Result<(), Error> {
		let orphaned = self.orphaned(state).await?;
		for manifest in &orphaned {
			tracing::warn!(resource = %manifest.identifier(), "resource is no longer part of the environment");
		}

		if !opts.auto_approve {
			self.confirm
				.confirm(&self.confirmation_message(&orphaned), APPROVE)?;
		}

		self.client
			.apply_server_side(state, opts)
			.await
			.map_err(Error::Apply)
	}

	fn confirmation_message(&self, orphaned: &ManifestList) -> String {
		let mut lines = vec![format!(
			"Applying to namespace '{}' of cluster '{}' at '{}' using context '{}'.",
			self.env.spec.namespace,
			self.info.cluster.name,
			self.info.cluster.server,
			self.info.context,
		)];

		if !orphaned.is_empty() {
			lines.push(format!(
				"{} resource(s) are no longer part of this environment and will be left in place:",
				orphaned.len()
			));
			let mut ids: Vec<_> = orphaned.iter().map(|m| m.identifier()).collect();
			ids.sort();
			lines.extend(ids.into_iter().map(|id| format!("  - {id}")));
		}

		lines.join("\n")
	}
}
