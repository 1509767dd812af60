//! Environment configuration (`spec.json`, `tanka.dev/v1alpha1`).

use std::{collections::BTreeMap, fs, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
	client::discovery::builtin_scope, manifest::ManifestList, ResourceScope, LABEL_ENVIRONMENT,
};

/// Errors that can occur while loading an environment.
#[derive(Debug, Error)]
pub enum SpecError {
	#[error("reading {path}")]
	Read {
		path: String,
		#[source]
		source: std::io::Error,
	},

	#[error("parsing {path}")]
	Parse {
		path: String,
		#[source]
		source: serde_json::Error,
	},
}

/// Environment represents a Tanka environment (tanka.dev/v1alpha1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
	pub api_version: String,
	pub kind: String,
	pub metadata: Metadata,
	pub spec: Spec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub namespace: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none", default)]
	pub labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spec {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub api_server: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub context_names: Option<Vec<String>>,
	#[serde(default = "default_namespace")]
	pub namespace: String,
	/// Name of the default diff strategy. Chosen from the server version if unset.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub diff_strategy: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub apply_strategy: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub inject_labels: Option<bool>,
}

fn default_namespace() -> String {
	"default".to_string()
}

impl Default for Spec {
	fn default() -> Self {
		Self {
			api_server: None,
			context_names: None,
			namespace: default_namespace(),
			diff_strategy: None,
			apply_strategy: None,
			inject_labels: None,
		}
	}
}

impl Environment {
	/// Create a new default environment
	pub fn new() -> Self {
		Self {
			api_version: "tanka.dev/v1alpha1".to_string(),
			kind: "Environment".to_string(),
			metadata: Metadata {
				name: None,
				namespace: None,
				labels: Some(BTreeMap::new()),
			},
			spec: Spec::default(),
		}
	}

	/// Load an environment from a `spec.json` file.
	pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SpecError> {
		let path = path.as_ref();
		let content = fs::read_to_string(path).map_err(|source| SpecError::Read {
			path: path.display().to_string(),
			source,
		})?;
		serde_json::from_str(&content).map_err(|source| SpecError::Parse {
			path: path.display().to_string(),
			source,
		})
	}

	/// Value of the [`LABEL_ENVIRONMENT`] label for resources of this environment.
	///
	/// First 48 hex characters of `sha256("<name>:<namespace>")` over the
	/// environment's metadata.
	pub fn name_label(&self) -> String {
		use sha2::{Digest, Sha256};

		let name = self.metadata.name.as_deref().unwrap_or("");
		let namespace = self.metadata.namespace.as_deref().unwrap_or("");

		let mut hasher = Sha256::new();
		hasher.update(format!("{}:{}", name, namespace).as_bytes());
		let hex = format!("{:x}", hasher.finalize());
		hex.chars().take(48).collect()
	}

	/// Bring manifests into the shape the cluster will report them back in.
	///
	/// Manifests without a namespace get `spec.namespace`, unless they are of a
	/// known cluster-scoped kind. With `spec.injectLabels`, every manifest is
	/// tagged with [`LABEL_ENVIRONMENT`].
	pub fn process(&self, manifests: &mut ManifestList) {
		let inject = self.spec.inject_labels.unwrap_or(false);
		let label = inject.then(|| self.name_label());

		for manifest in manifests {
			let cluster_wide = builtin_scope(manifest.kind()) == Some(ResourceScope::ClusterWide);
			if manifest.metadata().namespace().is_empty() && !cluster_wide {
				manifest.set_namespace(&self.spec.namespace);
			}
			if let Some(label) = &label {
				manifest.set_label(LABEL_ENVIRONMENT, label);
			}
		}
	}
}

impl Default for Environment {
	fn default() -> Self {
		Self::new()
	}
}
