//! Detection of live resources that are no longer part of the desired state.
//!
//! Every kind in the catalog is queried concurrently for resources carrying
//! the environment's label. Whatever comes back with an identity unknown to
//! the desired state is an orphan.

use std::{
	collections::{BTreeMap, HashSet},
	sync::Arc,
	time::Duration,
};

use tokio::task::JoinSet;
use tracing::instrument;

use crate::{
	client::ClusterClient,
	error::Error,
	manifest::{Identifier, Manifest, ManifestList},
};

/// Kinds searched for orphans unless configured otherwise.
///
/// Same set `kubectl apply --prune` uses when no allowlist is given.
pub const DEFAULT_KINDS: &[&str] = &[
	// core
	"ConfigMap",
	"Endpoints",
	"Namespace",
	"PersistentVolumeClaim",
	"PersistentVolume",
	"Pod",
	"ReplicationController",
	"Secret",
	"ServiceAccount",
	"Service",
	// apps
	"DaemonSet",
	"Deployment",
	"ReplicaSet",
	"StatefulSet",
	// batch
	"Job",
	"CronJob",
	// networking
	"Ingress",
	// rbac
	"ClusterRole",
	"ClusterRoleBinding",
	"Role",
	"RoleBinding",
];

pub fn default_kinds() -> Vec<String> {
	DEFAULT_KINDS.iter().map(|k| k.to_string()).collect()
}

type Outcome = Result<ManifestList, Error>;

pub struct OrphanDetector {
	client: Arc<dyn ClusterClient>,
	kinds: Vec<String>,
	timeout: Option<Duration>,
}

impl OrphanDetector {
	pub fn new(client: Arc<dyn ClusterClient>, kinds: Vec<String>, timeout: Option<Duration>) -> Self {
		Self {
			client,
			kinds,
			timeout,
		}
	}

	pub fn kinds(&self) -> &[String] {
		&self.kinds
	}

	/// List resources in `namespace` matching `labels` whose identity is not in `state`.
	///
	/// All kinds are queried to completion. If any query fails, the orphans
	/// found by the others are discarded and the last failure observed is
	/// returned. Result order is unspecified.
	#[instrument(skip_all, fields(namespace = %namespace, kinds = self.kinds.len()))]
	pub async fn orphaned(
		&self,
		state: &ManifestList,
		namespace: &str,
		labels: BTreeMap<String, String>,
	) -> Result<ManifestList, Error> {
		let known: HashSet<Identifier> = state.iter().map(Manifest::identifier).collect();
		let labels = Arc::new(labels);

		let mut join_set = JoinSet::new();
		for kind in &self.kinds {
			let client = self.client.clone();
			let labels = labels.clone();
			let namespace = namespace.to_string();
			let kind = kind.clone();

			join_set.spawn(async move {
				client
					.get_by_labels(&namespace, &kind, &labels)
					.await
					.map_err(|source| Error::CategoryQueryFailed {
						category: kind,
						source,
					})
			});
		}

		// dropping the set on timeout aborts the remaining queries
		match self.timeout {
			Some(timeout) => tokio::time::timeout(timeout, collect(&mut join_set, &known))
				.await
				.map_err(|_| Error::Timeout(timeout))?,
			None => collect(&mut join_set, &known).await,
		}
	}
}

async fn collect(join_set: &mut JoinSet<Outcome>, known: &HashSet<Identifier>) -> Outcome {
	let mut orphaned = ManifestList::new();
	let mut last_err = None;

	while let Some(outcome) = join_set.join_next().await {
		match outcome {
			Ok(Ok(list)) => {
				orphaned.extend(
					list.into_iter()
						.filter(|m| !known.contains(&m.identifier())),
				);
			}
			Ok(Err(err)) => {
				tracing::warn!(error = %err, "orphan query failed");
				last_err = Some(err);
			}
			Err(err) => last_err = Some(Error::TaskPanicked(err)),
		}
	}

	match last_err {
		Some(err) => Err(err),
		None => {
			tracing::debug!(count = orphaned.len(), "collected orphans");
			Ok(orphaned)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_kinds() {
		let kinds = default_kinds();
		assert_eq!(kinds.len(), 21);
		assert_eq!(kinds.iter().collect::<HashSet<_>>().len(), 21);
		assert!(kinds.contains(&"ClusterRoleBinding".to_string()));
	}
}
