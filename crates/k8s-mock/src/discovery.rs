//! Resource types served by the mock API server.

use std::collections::BTreeMap;

/// How the mock answers discovery requests.
#[derive(Clone, Copy, Debug, Default)]
pub enum DiscoveryMode {
	/// Serve aggregated discovery (`APIGroupDiscoveryList`).
	#[default]
	Aggregated,
	/// Answer aggregated discovery with 406 so clients fall back to the
	/// per-group endpoints.
	Legacy,
}

/// Resource types known to the mock, keyed by group version.
pub struct MockDiscovery {
	pub groups: BTreeMap<String, Vec<MockApiResource>>,
}

impl Default for MockDiscovery {
	fn default() -> Self {
		use MockApiResource as R;

		let groups = BTreeMap::from([
			(
				"v1".to_string(),
				vec![
					R::namespaced("configmaps", "ConfigMap"),
					R::namespaced("endpoints", "Endpoints"),
					R::namespaced("persistentvolumeclaims", "PersistentVolumeClaim"),
					R::namespaced("pods", "Pod"),
					R::namespaced("replicationcontrollers", "ReplicationController"),
					R::namespaced("secrets", "Secret"),
					R::namespaced("serviceaccounts", "ServiceAccount"),
					R::namespaced("services", "Service"),
					R::cluster_scoped("namespaces", "Namespace"),
					R::cluster_scoped("persistentvolumes", "PersistentVolume"),
				],
			),
			(
				"apps/v1".to_string(),
				vec![
					R::namespaced("daemonsets", "DaemonSet"),
					R::namespaced("deployments", "Deployment"),
					R::namespaced("replicasets", "ReplicaSet"),
					R::namespaced("statefulsets", "StatefulSet"),
				],
			),
			(
				"batch/v1".to_string(),
				vec![
					R::namespaced("cronjobs", "CronJob"),
					R::namespaced("jobs", "Job"),
				],
			),
			(
				"networking.k8s.io/v1".to_string(),
				vec![R::namespaced("ingresses", "Ingress")],
			),
			(
				"rbac.authorization.k8s.io/v1".to_string(),
				vec![
					R::namespaced("rolebindings", "RoleBinding"),
					R::namespaced("roles", "Role"),
					R::cluster_scoped("clusterrolebindings", "ClusterRoleBinding"),
					R::cluster_scoped("clusterroles", "ClusterRole"),
				],
			),
			// a custom resource, only reachable through discovery
			(
				"monitoring.coreos.com/v1".to_string(),
				vec![R::namespaced("servicemonitors", "ServiceMonitor")],
			),
		]);

		Self { groups }
	}
}

impl MockDiscovery {
	/// Find the resource type serving `kind` in `group_version`.
	pub fn find_kind(&self, group_version: &str, kind: &str) -> Option<&MockApiResource> {
		self.groups.get(group_version)?.iter().find(|r| r.kind == kind)
	}

	/// Find the resource type behind a plural path segment.
	pub fn find_plural(&self, group_version: &str, plural: &str) -> Option<&MockApiResource> {
		self.groups
			.get(group_version)?
			.iter()
			.find(|r| r.name == plural)
	}

	/// Groups other than the core group.
	pub fn named_groups(&self) -> impl Iterator<Item = (&str, &[MockApiResource])> {
		self.groups
			.iter()
			.filter(|(gv, _)| gv.contains('/'))
			.map(|(gv, rs)| (gv.as_str(), rs.as_slice()))
	}

	pub fn core(&self) -> &[MockApiResource] {
		self.groups.get("v1").map(Vec::as_slice).unwrap_or_default()
	}
}

/// A resource type in the mock's discovery data.
pub struct MockApiResource {
	/// Plural name used in paths.
	pub name: String,
	pub kind: String,
	pub namespaced: bool,
	pub verbs: Vec<String>,
}

const VERBS: &[&str] = &["create", "delete", "get", "list", "patch", "update", "watch"];

impl MockApiResource {
	pub fn namespaced(name: &str, kind: &str) -> Self {
		Self::new(name, kind, true)
	}

	pub fn cluster_scoped(name: &str, kind: &str) -> Self {
		Self::new(name, kind, false)
	}

	fn new(name: &str, kind: &str, namespaced: bool) -> Self {
		Self {
			name: name.to_string(),
			kind: kind.to_string(),
			namespaced,
			verbs: VERBS.iter().map(|v| v.to_string()).collect(),
		}
	}

	pub fn scope(&self) -> &'static str {
		if self.namespaced {
			"Namespaced"
		} else {
			"Cluster"
		}
	}
}
