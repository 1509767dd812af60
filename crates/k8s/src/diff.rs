//! Per-resource diff results and their unified-diff rendering.
//!
//! Both the server-side (native) strategy and the client-side subset strategy
//! produce [`ResourceDiff`]s; [`render`] turns a batch of them into the text a
//! diff strategy returns.

use std::fmt;

use serde_json::{Map, Value};
use similar::TextDiff;

/// Status of a single resource comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffStatus {
	/// Resource is identical in cluster and manifest.
	Unchanged,

	/// Resource exists but differs.
	Modified,

	/// Resource doesn't exist in cluster (will be created).
	Added,

	/// Namespace doesn't exist yet, so resource comparison is deferred.
	SoonAdded,
}

impl DiffStatus {
	pub fn has_changes(&self) -> bool {
		!matches!(self, DiffStatus::Unchanged)
	}
}

impl fmt::Display for DiffStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DiffStatus::Unchanged => write!(f, "unchanged"),
			DiffStatus::Modified => write!(f, "modified"),
			DiffStatus::Added => write!(f, "added"),
			DiffStatus::SoonAdded => write!(f, "soon-added"),
		}
	}
}

/// How file names in diff headers are formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameStyle {
	/// `group.version.kind.namespace.name`, as `kubectl diff` prints them.
	Native,
	/// `apiVersion.kind.namespace.name` with `/` replaced by `-`.
	Subset,
}

/// Result of diffing a single resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDiff {
	pub api_version: String,
	pub kind: String,
	/// `None` for cluster-scoped resources.
	pub namespace: Option<String>,
	pub name: String,
	pub status: DiffStatus,
	/// Current state YAML (empty string if resource doesn't exist).
	pub current_yaml: String,
	pub desired_yaml: String,
}

impl ResourceDiff {
	pub fn has_changes(&self) -> bool {
		self.status.has_changes()
	}

	/// File name used in diff headers.
	///
	/// Namespace is always included (empty for cluster-scoped resources).
	pub fn display_name(&self, style: NameStyle) -> String {
		let ns = self.namespace.as_deref().unwrap_or("");
		match style {
			NameStyle::Native => {
				let (group, version) = match self.api_version.split_once('/') {
					Some((g, v)) => (g, v),
					None => ("", self.api_version.as_str()),
				};
				let group_prefix = if group.is_empty() {
					String::new()
				} else {
					format!("{}.", group)
				};
				format!("{}{}.{}.{}.{}", group_prefix, version, self.kind, ns, self.name)
			}
			NameStyle::Subset => format!(
				"{}.{}.{}.{}",
				self.api_version.replace('/', "-"),
				self.kind,
				ns,
				self.name
			),
		}
	}

	/// Unified diff between current and desired state.
	pub fn unified_diff(&self, style: NameStyle) -> String {
		let name = self.display_name(style);
		let (old_header, new_header) = match self.status {
			DiffStatus::Added | DiffStatus::SoonAdded => {
				("/dev/null".to_string(), format!("b/{}", name))
			}
			_ => (format!("a/{}", name), format!("b/{}", name)),
		};

		TextDiff::from_lines(&self.current_yaml, &self.desired_yaml)
			.unified_diff()
			.context_radius(3)
			.header(&old_header, &new_header)
			.to_string()
	}
}

/// Concatenate the diffs of all changed resources in a stable order.
///
/// Returns `None` when no resource has changes.
pub fn render(mut diffs: Vec<ResourceDiff>, style: NameStyle) -> Option<String> {
	diffs.retain(ResourceDiff::has_changes);
	if diffs.is_empty() {
		return None;
	}

	diffs.sort_by(|a, b| {
		a.api_version
			.cmp(&b.api_version)
			.then_with(|| a.kind.cmp(&b.kind))
			.then_with(|| a.namespace.cmp(&b.namespace))
			.then_with(|| a.name.cmp(&b.name))
	});

	Some(diffs.iter().map(|d| d.unified_diff(style)).collect())
}

/// Ensure `metadata.annotations` exists.
///
/// kubectl always sends an annotations object with patches, even when empty.
pub fn ensure_annotations(manifest: &Value) -> Value {
	let mut manifest = manifest.clone();
	if let Some(Value::Object(metadata)) = manifest.get_mut("metadata") {
		metadata
			.entry("annotations")
			.or_insert_with(|| Value::Object(Map::new()));
	}
	manifest
}

/// Server-populated fields hidden from diffs, as with
/// `kubectl diff --show-managed-fields=false`.
const STRIP_FIELDS: &[&str] = &["managedFields"];

/// Strip managed fields and empty annotations for cleaner diffs.
pub fn strip_kubectl_fields(value: &Value) -> Value {
	match value {
		Value::Object(map) => {
			let mut cleaned = Map::new();
			for (k, v) in map {
				if STRIP_FIELDS.contains(&k.as_str()) {
					continue;
				}
				if k == "annotations" && v.as_object().is_some_and(Map::is_empty) {
					continue;
				}
				cleaned.insert(k.clone(), strip_kubectl_fields(v));
			}
			Value::Object(cleaned)
		}
		Value::Array(items) => Value::Array(items.iter().map(strip_kubectl_fields).collect()),
		other => other.clone(),
	}
}

/// Reduce a live object to the fields present in the manifest.
///
/// Server-managed fields (`status`, injected defaults, ...) are dropped, so a
/// partial manifest diffs cleanly against the full object the cluster returns.
/// Arrays are compared index by index; extra manifest elements are kept as-is.
pub fn filter_to_manifest_fields(live: &Value, manifest: &Value) -> Value {
	match (live, manifest) {
		(Value::Object(live), Value::Object(manifest)) => Value::Object(
			manifest
				.iter()
				.filter_map(|(key, m)| {
					live.get(key)
						.map(|l| (key.clone(), filter_to_manifest_fields(l, m)))
				})
				.collect(),
		),
		(Value::Array(live), Value::Array(manifest)) => Value::Array(
			manifest
				.iter()
				.enumerate()
				.map(|(i, m)| match live.get(i) {
					Some(l) => filter_to_manifest_fields(l, m),
					None => m.clone(),
				})
				.collect(),
		),
		(live, _) => live.clone(),
	}
}

#[cfg(test)]
mod tests {
	use rstest::rstest;
	use serde_json::json;

	use super::*;

	fn resource(api_version: &str, kind: &str, namespace: Option<&str>, name: &str) -> ResourceDiff {
		ResourceDiff {
			api_version: api_version.to_string(),
			kind: kind.to_string(),
			namespace: namespace.map(str::to_string),
			name: name.to_string(),
			status: DiffStatus::Modified,
			current_yaml: "old\n".to_string(),
			desired_yaml: "new\n".to_string(),
		}
	}

	#[rstest]
	#[case(
		resource("v1", "ConfigMap", Some("default"), "my-config"),
		"v1.ConfigMap.default.my-config",
		"v1.ConfigMap.default.my-config"
	)]
	#[case(
		resource("apps/v1", "Deployment", Some("kube-system"), "coredns"),
		"apps.v1.Deployment.kube-system.coredns",
		"apps-v1.Deployment.kube-system.coredns"
	)]
	#[case(
		resource("v1", "Namespace", None, "production"),
		"v1.Namespace..production",
		"v1.Namespace..production"
	)]
	#[case(
		resource("monitoring.coreos.com/v1", "ServiceMonitor", Some("obs"), "api"),
		"monitoring.coreos.com.v1.ServiceMonitor.obs.api",
		"monitoring.coreos.com-v1.ServiceMonitor.obs.api"
	)]
	fn test_display_name(
		#[case] diff: ResourceDiff,
		#[case] native: &str,
		#[case] subset: &str,
	) {
		assert_eq!(diff.display_name(NameStyle::Native), native);
		assert_eq!(diff.display_name(NameStyle::Subset), subset);
	}

	#[test]
	fn test_unified_diff_headers() {
		let diff = resource("apps/v1", "Deployment", Some("default"), "test");

		let text = diff.unified_diff(NameStyle::Native);
		let patch = patch::Patch::from_single(&text).expect("valid unified diff");
		assert_eq!(patch.old.path, "a/apps.v1.Deployment.default.test");
		assert_eq!(patch.new.path, "b/apps.v1.Deployment.default.test");

		let text = diff.unified_diff(NameStyle::Subset);
		let patch = patch::Patch::from_single(&text).expect("valid unified diff");
		assert_eq!(patch.old.path, "a/apps-v1.Deployment.default.test");
	}

	#[test]
	fn test_unified_diff_added_uses_dev_null() {
		let mut diff = resource("v1", "ConfigMap", Some("default"), "c");
		diff.status = DiffStatus::Added;
		diff.current_yaml = String::new();

		let text = diff.unified_diff(NameStyle::Native);
		assert!(text.starts_with("--- /dev/null\n+++ b/v1.ConfigMap.default.c\n"));
	}

	#[test]
	fn test_render_skips_unchanged_and_sorts() {
		let mut unchanged = resource("v1", "ConfigMap", Some("default"), "same");
		unchanged.status = DiffStatus::Unchanged;
		let worker = resource("apps/v1", "Deployment", Some("default"), "worker");
		let api = resource("apps/v1", "Deployment", Some("default"), "api");

		let text = render(vec![unchanged, worker, api], NameStyle::Native).unwrap();
		let api_at = text.find("Deployment.default.api").unwrap();
		let worker_at = text.find("Deployment.default.worker").unwrap();
		assert!(api_at < worker_at);
		assert!(!text.contains("same"));
	}

	#[test]
	fn test_render_without_changes_is_none() {
		let mut unchanged = resource("v1", "ConfigMap", Some("default"), "same");
		unchanged.status = DiffStatus::Unchanged;

		assert_eq!(render(vec![unchanged], NameStyle::Native), None);
		assert_eq!(render(vec![], NameStyle::Subset), None);
	}

	#[test]
	fn test_ensure_annotations() {
		let manifest = json!({"kind": "ConfigMap", "metadata": {"name": "c"}});
		assert_eq!(
			ensure_annotations(&manifest).pointer("/metadata/annotations"),
			Some(&json!({}))
		);

		let annotated = json!({"metadata": {"name": "c", "annotations": {"a": "b"}}});
		assert_eq!(ensure_annotations(&annotated), annotated);
	}

	#[test]
	fn test_strip_kubectl_fields() {
		let value = json!({
			"apiVersion": "v1",
			"kind": "ConfigMap",
			"metadata": {
				"name": "test",
				"resourceVersion": "12345",
				"uid": "abc-123",
				"managedFields": [{"manager": "tanka"}],
				"annotations": {}
			},
			"data": {"key": "value"}
		});

		assert_eq!(
			strip_kubectl_fields(&value),
			json!({
				"apiVersion": "v1",
				"kind": "ConfigMap",
				"metadata": {
					"name": "test",
					"resourceVersion": "12345",
					"uid": "abc-123"
				},
				"data": {"key": "value"}
			})
		);
	}

	#[test]
	fn test_strip_kubectl_fields_keeps_annotations() {
		let value = json!({"metadata": {"name": "test", "annotations": {"key": "value"}}});
		assert_eq!(strip_kubectl_fields(&value), value);
	}

	#[test]
	fn test_filter_to_manifest_fields() {
		let live = json!({
			"apiVersion": "v1",
			"kind": "ConfigMap",
			"metadata": {
				"name": "test",
				"namespace": "default",
				"uid": "abc",
				"labels": {"app": "test", "added-by-controller": "true"}
			},
			"data": {"key1": "value1", "key2": "value2"},
			"status": {}
		});
		let manifest = json!({
			"apiVersion": "v1",
			"kind": "ConfigMap",
			"metadata": {"name": "test", "labels": {"app": "test"}},
			"data": {"key1": "changed", "key3": "new"}
		});

		assert_eq!(
			filter_to_manifest_fields(&live, &manifest),
			json!({
				"apiVersion": "v1",
				"kind": "ConfigMap",
				"metadata": {"name": "test", "labels": {"app": "test"}},
				"data": {"key1": "value1"}
			})
		);
	}

	#[test]
	fn test_filter_to_manifest_fields_arrays() {
		let live = json!({"ports": [{"port": 80, "protocol": "TCP"}]});
		let manifest = json!({"ports": [{"port": 8080}, {"port": 9090}]});

		assert_eq!(
			filter_to_manifest_fields(&live, &manifest),
			json!({"ports": [{"port": 80}, {"port": 9090}]})
		);
	}
}
