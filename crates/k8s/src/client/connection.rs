//! Kubernetes cluster connection management.

use std::time::Duration;

use kube::{
	config::{KubeConfigOptions, Kubeconfig, KubeconfigError},
	Client, Config,
};
use thiserror::Error;
use tracing::instrument;

use super::ClusterRef;
use crate::spec::Spec;

/// Default timeout for Kubernetes API requests.
const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur when connecting to a Kubernetes cluster.
#[derive(Debug, Error)]
pub enum ConnectionError {
	#[error(
		"your Environment's spec.json seems incomplete:\n  \
		 * spec.apiServer|spec.contextNames: No Kubernetes cluster endpoint or context names specified. \
		 Please specify one."
	)]
	IncompleteSpec,

	#[error("contextNames is empty")]
	EmptyContextNames,

	#[error(
		"no cluster that matches the apiServer `{0}` was found. Please check your $KUBECONFIG"
	)]
	ClusterNotFound(String),

	#[error("no context using cluster `{0}` was found. Please check your $KUBECONFIG")]
	ContextNotFoundForCluster(String),

	#[error("no context named `{0:?}` was found. Please check your $KUBECONFIG")]
	ContextNotFound(Vec<String>),

	#[error(transparent)]
	Kubeconfig(#[from] KubeconfigError),

	#[error(transparent)]
	Kube(#[from] kube::Error),
}

/// A kube client bound to the kubeconfig context selected by an environment.
#[derive(Clone)]
pub struct ClusterConnection {
	client: Client,
	context: String,
	cluster: ClusterRef,
}

impl std::fmt::Debug for ClusterConnection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ClusterConnection")
			.field("context", &self.context)
			.field("cluster", &self.cluster)
			.finish_non_exhaustive()
	}
}

impl ClusterConnection {
	/// Connect to a cluster using the environment spec.
	///
	/// Exactly one of `spec.apiServer` or `spec.contextNames` must be set:
	/// - `spec.apiServer`: searches kubeconfig for a cluster with matching server URL,
	///   then finds and uses a context that references that cluster
	/// - `spec.contextNames`: uses the first matching context name from kubeconfig
	#[instrument(skip_all)]
	pub async fn from_spec(spec: &Spec) -> Result<Self, ConnectionError> {
		let kubeconfig = Kubeconfig::read()?;
		Self::from_spec_with_kubeconfig(spec, kubeconfig).await
	}

	/// Connect to a cluster using the environment spec and a provided kubeconfig.
	#[instrument(skip_all)]
	pub async fn from_spec_with_kubeconfig(
		spec: &Spec,
		kubeconfig: Kubeconfig,
	) -> Result<Self, ConnectionError> {
		let context = if let Some(api_server) = &spec.api_server {
			let context = find_context_for_api_server(&kubeconfig, api_server)?;
			tracing::debug!(context = %context, api_server = %api_server, "found context for apiServer");
			context
		} else if let Some(context_names) = &spec.context_names {
			if context_names.is_empty() {
				return Err(ConnectionError::EmptyContextNames);
			}
			let context = find_first_matching_context(&kubeconfig, context_names)?;
			tracing::debug!(context = %context, "using context from contextNames");
			context
		} else {
			return Err(ConnectionError::IncompleteSpec);
		};

		let cluster = cluster_for_context(&kubeconfig, &context);

		let mut config = Config::from_custom_kubeconfig(
			kubeconfig,
			&KubeConfigOptions {
				context: Some(context.clone()),
				..Default::default()
			},
		)
		.await?;
		config.read_timeout = Some(DEFAULT_API_TIMEOUT);

		Ok(Self {
			client: Client::try_from(config)?,
			context,
			cluster,
		})
	}

	/// Wrap an existing client, e.g. one talking to a mock service.
	pub fn from_client(client: Client, context: String, cluster: ClusterRef) -> Self {
		Self {
			client,
			context,
			cluster,
		}
	}

	pub fn client(&self) -> &Client {
		&self.client
	}

	/// Name of the kubeconfig context in use.
	pub fn context(&self) -> &str {
		&self.context
	}

	pub fn cluster(&self) -> &ClusterRef {
		&self.cluster
	}
}

/// Find a kubeconfig context that uses a cluster with the given API server URL.
fn find_context_for_api_server(
	kubeconfig: &Kubeconfig,
	api_server: &str,
) -> Result<String, ConnectionError> {
	let matching_cluster = kubeconfig
		.clusters
		.iter()
		.find(|c| {
			c.cluster
				.as_ref()
				.is_some_and(|cluster| cluster.server.as_deref() == Some(api_server))
		})
		.ok_or_else(|| ConnectionError::ClusterNotFound(api_server.to_string()))?;

	let cluster_name = &matching_cluster.name;

	let matching_context = kubeconfig
		.contexts
		.iter()
		.find(|c| {
			c.context
				.as_ref()
				.is_some_and(|ctx| ctx.cluster.as_str() == cluster_name)
		})
		.ok_or_else(|| ConnectionError::ContextNotFoundForCluster(cluster_name.clone()))?;

	Ok(matching_context.name.clone())
}

/// Find the first context from the list that exists in kubeconfig.
fn find_first_matching_context(
	kubeconfig: &Kubeconfig,
	context_names: &[String],
) -> Result<String, ConnectionError> {
	for name in context_names {
		if kubeconfig.contexts.iter().any(|c| &c.name == name) {
			return Ok(name.clone());
		}
	}

	Err(ConnectionError::ContextNotFound(context_names.to_vec()))
}

/// Resolve the cluster name and server URL a context points at.
///
/// Missing entries resolve to empty strings; kube fails on them later anyway.
fn cluster_for_context(kubeconfig: &Kubeconfig, context: &str) -> ClusterRef {
	let name = kubeconfig
		.contexts
		.iter()
		.find(|c| c.name == context)
		.and_then(|c| c.context.as_ref())
		.map(|ctx| ctx.cluster.clone())
		.unwrap_or_default();

	let server = kubeconfig
		.clusters
		.iter()
		.find(|c| c.name == name)
		.and_then(|c| c.cluster.as_ref())
		.and_then(|c| c.server.clone())
		.unwrap_or_default();

	ClusterRef { name, server }
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use kube::config::{Cluster, Context, NamedCluster, NamedContext};

	use super::*;

	fn kubeconfig() -> Kubeconfig {
		Kubeconfig {
			clusters: vec![NamedCluster {
				name: "prod-cluster".to_string(),
				cluster: Some(Cluster {
					server: Some("https://prod:6443".to_string()),
					..Default::default()
				}),
			}],
			contexts: vec![NamedContext {
				name: "prod-admin".to_string(),
				context: Some(Context {
					cluster: "prod-cluster".to_string(),
					..Default::default()
				}),
			}],
			..Default::default()
		}
	}

	#[tokio::test]
	async fn test_connect_no_cluster_specified_errors() {
		let result =
			ClusterConnection::from_spec_with_kubeconfig(&Spec::default(), Kubeconfig::default())
				.await;
		let err = assert_matches!(result, Err(e @ ConnectionError::IncompleteSpec) => e);
		assert!(err.to_string().ends_with("Please specify one."), "{err}");
	}

	#[tokio::test]
	async fn test_connect_empty_context_names_errors() {
		let spec = Spec {
			context_names: Some(vec![]),
			..Spec::default()
		};
		let result = ClusterConnection::from_spec_with_kubeconfig(&spec, kubeconfig()).await;
		assert_matches!(result, Err(ConnectionError::EmptyContextNames));
	}

	#[tokio::test]
	async fn test_connect_context_not_found() {
		let spec = Spec {
			context_names: Some(vec!["nonexistent".to_string()]),
			..Spec::default()
		};
		let result = ClusterConnection::from_spec_with_kubeconfig(&spec, kubeconfig()).await;
		assert_matches!(
			result,
			Err(ConnectionError::ContextNotFound(contexts)) if contexts == vec!["nonexistent"]
		);
	}

	#[tokio::test]
	async fn test_connect_api_server_not_found() {
		let spec = Spec {
			api_server: Some("https://unknown:6443".to_string()),
			..Spec::default()
		};
		let result = ClusterConnection::from_spec_with_kubeconfig(&spec, kubeconfig()).await;
		assert_matches!(
			result,
			Err(ConnectionError::ClusterNotFound(server)) if server == "https://unknown:6443"
		);
	}

	#[test]
	fn test_find_context_for_api_server() {
		assert_eq!(
			find_context_for_api_server(&kubeconfig(), "https://prod:6443").unwrap(),
			"prod-admin"
		);
	}

	#[test]
	fn test_cluster_for_context() {
		assert_eq!(
			cluster_for_context(&kubeconfig(), "prod-admin"),
			ClusterRef {
				name: "prod-cluster".to_string(),
				server: "https://prod:6443".to_string(),
			}
		);
		assert_eq!(
			cluster_for_context(&kubeconfig(), "missing"),
			ClusterRef::default()
		);
	}
}
