//! Kubernetes API resource resolution.
//!
//! Built-in kinds resolve from a static table, without talking to the cluster.
//! Everything else (CRDs, aggregated APIs) is looked up in an
//! [`ApiResourceCache`] built from the cluster's discovery API.

use std::collections::HashMap;

use kube::{
	core::GroupVersionKind,
	discovery::{ApiResource, Scope},
	Client, Discovery,
};
use phf::phf_map;
use thiserror::Error;
use tracing::instrument;

use crate::ResourceScope;

/// Errors that can occur during API resource discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
	#[error("full API discovery failed")]
	FullDiscovery(#[source] kube::Error),
}

/// Location of a built-in resource type in the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinKind {
	pub group: &'static str,
	pub version: &'static str,
	pub plural: &'static str,
	pub scope: ResourceScope,
}

const fn namespaced(group: &'static str, version: &'static str, plural: &'static str) -> BuiltinKind {
	BuiltinKind {
		group,
		version,
		plural,
		scope: ResourceScope::Namespaced,
	}
}

const fn cluster_wide(
	group: &'static str,
	version: &'static str,
	plural: &'static str,
) -> BuiltinKind {
	BuiltinKind {
		group,
		version,
		plural,
		scope: ResourceScope::ClusterWide,
	}
}

static BUILTIN_KINDS: phf::Map<&'static str, BuiltinKind> = phf_map! {
	// core
	"ConfigMap" => namespaced("", "v1", "configmaps"),
	"Endpoints" => namespaced("", "v1", "endpoints"),
	"LimitRange" => namespaced("", "v1", "limitranges"),
	"Namespace" => cluster_wide("", "v1", "namespaces"),
	"Node" => cluster_wide("", "v1", "nodes"),
	"PersistentVolume" => cluster_wide("", "v1", "persistentvolumes"),
	"PersistentVolumeClaim" => namespaced("", "v1", "persistentvolumeclaims"),
	"Pod" => namespaced("", "v1", "pods"),
	"ReplicationController" => namespaced("", "v1", "replicationcontrollers"),
	"ResourceQuota" => namespaced("", "v1", "resourcequotas"),
	"Secret" => namespaced("", "v1", "secrets"),
	"Service" => namespaced("", "v1", "services"),
	"ServiceAccount" => namespaced("", "v1", "serviceaccounts"),
	// apps
	"DaemonSet" => namespaced("apps", "v1", "daemonsets"),
	"Deployment" => namespaced("apps", "v1", "deployments"),
	"ReplicaSet" => namespaced("apps", "v1", "replicasets"),
	"StatefulSet" => namespaced("apps", "v1", "statefulsets"),
	// batch
	"CronJob" => namespaced("batch", "v1", "cronjobs"),
	"Job" => namespaced("batch", "v1", "jobs"),
	// networking
	"Ingress" => namespaced("networking.k8s.io", "v1", "ingresses"),
	"IngressClass" => cluster_wide("networking.k8s.io", "v1", "ingressclasses"),
	"NetworkPolicy" => namespaced("networking.k8s.io", "v1", "networkpolicies"),
	// rbac
	"ClusterRole" => cluster_wide("rbac.authorization.k8s.io", "v1", "clusterroles"),
	"ClusterRoleBinding" => cluster_wide("rbac.authorization.k8s.io", "v1", "clusterrolebindings"),
	"Role" => namespaced("rbac.authorization.k8s.io", "v1", "roles"),
	"RoleBinding" => namespaced("rbac.authorization.k8s.io", "v1", "rolebindings"),
	// misc
	"CustomResourceDefinition" => cluster_wide("apiextensions.k8s.io", "v1", "customresourcedefinitions"),
	"HorizontalPodAutoscaler" => namespaced("autoscaling", "v2", "horizontalpodautoscalers"),
	"PodDisruptionBudget" => namespaced("policy", "v1", "poddisruptionbudgets"),
	"PriorityClass" => cluster_wide("scheduling.k8s.io", "v1", "priorityclasses"),
	"StorageClass" => cluster_wide("storage.k8s.io", "v1", "storageclasses"),
	"MutatingWebhookConfiguration" => cluster_wide("admissionregistration.k8s.io", "v1", "mutatingwebhookconfigurations"),
	"ValidatingWebhookConfiguration" => cluster_wide("admissionregistration.k8s.io", "v1", "validatingwebhookconfigurations"),
};

/// Look up a built-in kind.
pub fn builtin(kind: &str) -> Option<&'static BuiltinKind> {
	BUILTIN_KINDS.get(kind)
}

/// Scope of a built-in kind, `None` for kinds that need discovery.
pub fn builtin_scope(kind: &str) -> Option<ResourceScope> {
	builtin(kind).map(|b| b.scope)
}

impl BuiltinKind {
	pub fn api_version(&self) -> String {
		if self.group.is_empty() {
			self.version.to_string()
		} else {
			format!("{}/{}", self.group, self.version)
		}
	}

	pub fn api_resource(&self, kind: &str) -> ApiResource {
		ApiResource::from_gvk_with_plural(
			&GroupVersionKind::gvk(self.group, self.version, kind),
			self.plural,
		)
	}
}

/// Split an `apiVersion` into group and version.
pub fn gvk_from_api_version(api_version: &str, kind: &str) -> GroupVersionKind {
	let (group, version) = match api_version.split_once('/') {
		Some((g, v)) => (g, v),
		None => ("", api_version),
	};
	GroupVersionKind::gvk(group, version, kind)
}

/// Discovered API resource with scope.
#[derive(Debug, Clone)]
pub struct DiscoveredResource {
	/// The kube ApiResource for making API calls.
	pub api_resource: ApiResource,
	/// Whether this resource is namespaced or cluster-wide.
	pub scope: ResourceScope,
}

/// Cached API resource discovery results.
///
/// Built by querying the cluster's discovery API once. Resources are indexed
/// both by exact group/version/kind and by bare kind; the latter resolves to
/// the version the server recommends.
#[derive(Clone, Default)]
pub struct ApiResourceCache {
	by_gvk: HashMap<GroupVersionKind, DiscoveredResource>,
	by_kind: HashMap<String, DiscoveredResource>,
}

impl ApiResourceCache {
	/// Build the cache by querying the cluster's discovery API.
	///
	/// Uses the Aggregated Discovery API (K8s 1.26+) which requires only 2 API calls,
	/// and falls back to full discovery on older clusters.
	#[instrument(skip_all)]
	pub async fn build(client: &Client) -> Result<Self, DiscoveryError> {
		match Discovery::new(client.clone()).run_aggregated().await {
			Ok(discovery) => {
				tracing::debug!("using aggregated discovery");
				Ok(Self::from_discovery(&discovery))
			}
			Err(e) => {
				tracing::debug!(error = %e, "aggregated discovery not available, using full discovery");
				let discovery = Discovery::new(client.clone())
					.run()
					.await
					.map_err(DiscoveryError::FullDiscovery)?;
				Ok(Self::from_discovery(&discovery))
			}
		}
	}

	fn from_discovery(discovery: &Discovery) -> Self {
		let mut cache = Self::default();

		for group in discovery.groups() {
			for (ar, caps) in group.recommended_resources() {
				cache
					.by_kind
					.entry(ar.kind.clone())
					.or_insert_with(|| discovered(ar.clone(), &caps.scope));
			}
			// all versions, so manifests pinned to an older version still resolve
			for ver in group.versions() {
				for (ar, caps) in group.versioned_resources(ver) {
					let gvk = GroupVersionKind::gvk(&ar.group, &ar.version, &ar.kind);
					cache.by_gvk.insert(gvk, discovered(ar, &caps.scope));
				}
			}
		}

		cache
	}

	/// Look up a resource by its GroupVersionKind.
	pub fn lookup(&self, gvk: &GroupVersionKind) -> Option<&DiscoveredResource> {
		self.by_gvk.get(gvk)
	}

	/// Look up the server's preferred version of a kind.
	pub fn lookup_kind(&self, kind: &str) -> Option<&DiscoveredResource> {
		self.by_kind.get(kind)
	}

	pub fn len(&self) -> usize {
		self.by_gvk.len()
	}

	pub fn is_empty(&self) -> bool {
		self.by_gvk.is_empty()
	}

	#[cfg(test)]
	fn insert(&mut self, resource: DiscoveredResource) {
		let ar = &resource.api_resource;
		let gvk = GroupVersionKind::gvk(&ar.group, &ar.version, &ar.kind);
		self.by_kind
			.entry(ar.kind.clone())
			.or_insert_with(|| resource.clone());
		self.by_gvk.insert(gvk, resource);
	}
}

fn discovered(api_resource: ApiResource, scope: &Scope) -> DiscoveredResource {
	let scope = match scope {
		Scope::Namespaced => ResourceScope::Namespaced,
		Scope::Cluster => ResourceScope::ClusterWide,
	};
	DiscoveredResource {
		api_resource,
		scope,
	}
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	const ORPHAN_KINDS: &[&str] = &[
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
		"DaemonSet",
		"Deployment",
		"ReplicaSet",
		"StatefulSet",
		"Job",
		"CronJob",
		"Ingress",
		"ClusterRole",
		"ClusterRoleBinding",
		"Role",
		"RoleBinding",
	];

	#[test]
	fn test_default_orphan_kinds_are_builtin() {
		for kind in ORPHAN_KINDS {
			assert!(builtin(kind).is_some(), "{kind} missing from builtin table");
		}
	}

	#[rstest]
	#[case("Deployment", Some(ResourceScope::Namespaced))]
	#[case("ConfigMap", Some(ResourceScope::Namespaced))]
	#[case("Namespace", Some(ResourceScope::ClusterWide))]
	#[case("ClusterRoleBinding", Some(ResourceScope::ClusterWide))]
	#[case("PersistentVolume", Some(ResourceScope::ClusterWide))]
	#[case("Certificate", None)]
	fn test_builtin_scope(#[case] kind: &str, #[case] expected: Option<ResourceScope>) {
		assert_eq!(builtin_scope(kind), expected);
	}

	#[test]
	fn test_builtin_api_resource() {
		let deploy = builtin("Deployment").unwrap();
		assert_eq!(deploy.api_version(), "apps/v1");

		let ar = deploy.api_resource("Deployment");
		assert_eq!(ar.group, "apps");
		assert_eq!(ar.version, "v1");
		assert_eq!(ar.plural, "deployments");

		assert_eq!(builtin("Service").unwrap().api_version(), "v1");
	}

	#[rstest]
	#[case("apps/v1", "apps", "v1")]
	#[case("v1", "", "v1")]
	#[case("cert-manager.io/v1", "cert-manager.io", "v1")]
	fn test_gvk_from_api_version(#[case] api_version: &str, #[case] group: &str, #[case] version: &str) {
		let gvk = gvk_from_api_version(api_version, "Thing");
		assert_eq!(gvk.group, group);
		assert_eq!(gvk.version, version);
		assert_eq!(gvk.kind, "Thing");
		assert_eq!(gvk.api_version(), api_version);
	}

	#[test]
	fn test_cache_lookup() {
		let mut cache = ApiResourceCache::default();
		assert!(cache.is_empty());

		let gvk = GroupVersionKind::gvk("cert-manager.io", "v1", "Certificate");
		cache.insert(DiscoveredResource {
			api_resource: ApiResource::from_gvk_with_plural(&gvk, "certificates"),
			scope: ResourceScope::Namespaced,
		});

		assert_eq!(cache.len(), 1);
		assert_eq!(
			cache.lookup(&gvk).map(|r| r.api_resource.plural.as_str()),
			Some("certificates")
		);
		assert_eq!(
			cache.lookup_kind("Certificate").map(|r| r.scope),
			Some(ResourceScope::Namespaced)
		);
		assert!(cache
			.lookup(&GroupVersionKind::gvk("cert-manager.io", "v1alpha1", "Certificate"))
			.is_none());
	}
}
