//! Access to the cluster.
//!
//! The reconciliation core only talks to the cluster through [`ClusterClient`].
//! [`KubeClient`] implements it on top of kube-rs.

use std::{collections::BTreeMap, fmt};

use async_trait::async_trait;

use crate::{
	manifest::{ManifestError, ManifestList},
	version::{ServerVersion, VersionError},
	Manifest,
};

pub mod connection;
pub mod discovery;
mod kube_client;

pub use connection::{ClusterConnection, ConnectionError};
pub use kube_client::KubeClient;

/// Errors returned by a [`ClusterClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
	#[error("connecting to cluster")]
	Connection(#[from] ConnectionError),

	#[error("building API resource cache")]
	Discovery(#[from] discovery::DiscoveryError),

	#[error("the server doesn't have a resource type \"{0}\"")]
	UnknownKind(String),

	#[error("{op} {kind}/{name}")]
	Request {
		op: &'static str,
		kind: String,
		name: String,
		#[source]
		source: Box<kube::Error>,
	},

	#[error("querying server version")]
	ServerVersion(#[source] Box<kube::Error>),

	#[error("reading server version")]
	Version(#[from] VersionError),

	#[error("invalid manifest returned by the cluster")]
	Manifest(#[from] ManifestError),

	#[error("converting resource")]
	Conversion(#[source] serde_json::Error),

	#[error("converting resource to YAML")]
	Yaml(#[source] serde_saphyr::ser_error::Error),

	#[error("diff task panicked")]
	TaskPanicked(#[source] tokio::task::JoinError),
}

/// Cluster the client is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClusterRef {
	/// Name of the cluster entry in kubeconfig.
	pub name: String,
	/// API server URL.
	pub server: String,
}

/// Snapshot of what the client knows about its cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInfo {
	pub server_version: ServerVersion,
	pub cluster: ClusterRef,
	/// Name of the kubeconfig context in use.
	pub context: String,
}

/// Apply strategy for resource updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplyStrategy {
	/// Client-side apply using PATCH with strategic merge.
	#[default]
	Client,

	/// Server-side apply using PATCH with Apply.
	Server,
}

impl fmt::Display for ApplyStrategy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ApplyStrategy::Client => write!(f, "client"),
			ApplyStrategy::Server => write!(f, "server"),
		}
	}
}

/// Options for the apply operation.
#[derive(Debug, Clone, Default)]
pub struct ApplyOpts {
	/// Skip the interactive confirmation.
	pub auto_approve: bool,
	/// Take ownership of conflicting fields (server-side apply).
	pub force: bool,
	pub strategy: ApplyStrategy,
}

/// Read and write access to a cluster.
///
/// Implementations must be safe to share between concurrently running queries.
#[async_trait]
pub trait ClusterClient: Send + Sync {
	/// Server version and kubeconfig identity of the cluster.
	async fn info(&self) -> Result<ClusterInfo, ClientError>;

	/// Fetch a single resource. `namespace` is ignored for cluster-scoped kinds.
	async fn get(
		&self,
		namespace: &str,
		kind: &str,
		name: &str,
	) -> Result<Option<Manifest>, ClientError>;

	/// List all resources of `kind` carrying every label in `labels`.
	///
	/// An empty `namespace` lists across all namespaces.
	async fn get_by_labels(
		&self,
		namespace: &str,
		kind: &str,
		labels: &BTreeMap<String, String>,
	) -> Result<ManifestList, ClientError>;

	/// Let the server compute the diff of `state` against the cluster.
	///
	/// `Ok(None)` means nothing would change.
	async fn diff_server_side(&self, state: &ManifestList) -> Result<Option<String>, ClientError>;

	/// Push `state` to the cluster.
	async fn apply_server_side(
		&self,
		state: &ManifestList,
		opts: &ApplyOpts,
	) -> Result<(), ClientError>;
}

/// Render a label map as a label selector (`a=b,c=d`).
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
	labels
		.iter()
		.map(|(k, v)| format!("{}={}", k, v))
		.collect::<Vec<_>>()
		.join(",")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_label_selector() {
		let labels: BTreeMap<_, _> = [
			("tanka.dev/environment".to_string(), "abc".to_string()),
			("app".to_string(), "api".to_string()),
		]
		.into_iter()
		.collect();

		assert_eq!(label_selector(&labels), "app=api,tanka.dev/environment=abc");
		assert_eq!(label_selector(&BTreeMap::new()), "");
	}
}
