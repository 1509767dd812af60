//! Manifests and their identities.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors produced when a JSON value is not a valid manifest.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
	#[error("manifest must be an object, got {0}")]
	NotAnObject(&'static str),

	#[error("manifest missing kind")]
	MissingKind,

	#[error("manifest {kind} missing metadata.name")]
	MissingName { kind: String },
}

/// Ordered collection of manifests.
///
/// No uniqueness is enforced; consumers that need it build their own
/// [`Identifier`] sets.
pub type ManifestList = Vec<Manifest>;

/// Uniquely identifies a resource within a cluster, independent of its content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier {
	pub kind: String,
	pub name: String,
	pub namespace: String,
}

impl Identifier {
	pub fn new(
		kind: impl Into<String>,
		name: impl Into<String>,
		namespace: impl Into<String>,
	) -> Self {
		Self {
			kind: kind.into(),
			name: name.into(),
			namespace: namespace.into(),
		}
	}
}

impl fmt::Display for Identifier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.namespace.is_empty() {
			write!(f, "{}/{}", self.kind, self.name)
		} else {
			write!(f, "{}/{}/{}", self.namespace, self.kind, self.name)
		}
	}
}

/// A single Kubernetes resource definition.
///
/// `kind` and `metadata.name` are guaranteed to be present; everything else is
/// carried as opaque JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Manifest(Map<String, Value>);

impl Manifest {
	pub fn kind(&self) -> &str {
		self.0.get("kind").and_then(Value::as_str).unwrap_or_default()
	}

	/// The `apiVersion`, empty if unset.
	pub fn api_version(&self) -> &str {
		self.0
			.get("apiVersion")
			.and_then(Value::as_str)
			.unwrap_or_default()
	}

	pub fn metadata(&self) -> Metadata<'_> {
		Metadata(self.0.get("metadata").and_then(Value::as_object))
	}

	/// The identity of this manifest.
	pub fn identifier(&self) -> Identifier {
		let metadata = self.metadata();
		Identifier::new(self.kind(), metadata.name(), metadata.namespace())
	}

	pub fn as_object(&self) -> &Map<String, Value> {
		&self.0
	}

	/// Mutable access to `metadata`, which construction guarantees is an object.
	fn metadata_mut(&mut self) -> Option<&mut Map<String, Value>> {
		self.0.get_mut("metadata").and_then(Value::as_object_mut)
	}

	/// Set `metadata.namespace`.
	pub fn set_namespace(&mut self, namespace: &str) {
		if let Some(metadata) = self.metadata_mut() {
			metadata.insert("namespace".to_string(), Value::String(namespace.to_string()));
		}
	}

	/// Set a single label, creating `metadata.labels` if needed.
	pub fn set_label(&mut self, key: &str, value: &str) {
		let Some(metadata) = self.metadata_mut() else {
			return;
		};
		let labels = metadata
			.entry("labels")
			.or_insert_with(|| Value::Object(Map::new()));
		if !labels.is_object() {
			*labels = Value::Object(Map::new());
		}
		if let Value::Object(labels) = labels {
			labels.insert(key.to_string(), Value::String(value.to_string()));
		}
	}

	pub fn to_value(&self) -> Value {
		Value::Object(self.0.clone())
	}

	pub fn into_value(self) -> Value {
		Value::Object(self.0)
	}
}

impl TryFrom<Value> for Manifest {
	type Error = ManifestError;

	fn try_from(value: Value) -> Result<Self, Self::Error> {
		let map = match value {
			Value::Object(map) => map,
			Value::Null => return Err(ManifestError::NotAnObject("null")),
			Value::Bool(_) => return Err(ManifestError::NotAnObject("bool")),
			Value::Number(_) => return Err(ManifestError::NotAnObject("number")),
			Value::String(_) => return Err(ManifestError::NotAnObject("string")),
			Value::Array(_) => return Err(ManifestError::NotAnObject("array")),
		};

		let kind = match map.get("kind").and_then(Value::as_str) {
			Some(kind) if !kind.is_empty() => kind.to_string(),
			_ => return Err(ManifestError::MissingKind),
		};

		let has_name = map
			.get("metadata")
			.and_then(|m| m.get("name"))
			.and_then(Value::as_str)
			.is_some_and(|n| !n.is_empty());
		if !has_name {
			return Err(ManifestError::MissingName { kind });
		}

		Ok(Self(map))
	}
}

impl From<Manifest> for Value {
	fn from(manifest: Manifest) -> Self {
		manifest.into_value()
	}
}

/// Read-only view of a manifest's `metadata`.
#[derive(Debug, Clone, Copy)]
pub struct Metadata<'a>(Option<&'a Map<String, Value>>);

impl<'a> Metadata<'a> {
	fn str_field(&self, key: &str) -> &'a str {
		self.0
			.and_then(|m| m.get(key))
			.and_then(Value::as_str)
			.unwrap_or_default()
	}

	pub fn name(&self) -> &'a str {
		self.str_field("name")
	}

	/// Empty for cluster-scoped resources and manifests relying on a default.
	pub fn namespace(&self) -> &'a str {
		self.str_field("namespace")
	}

	/// String-valued labels. Non-string values are skipped.
	pub fn labels(&self) -> BTreeMap<&'a str, &'a str> {
		self.0
			.and_then(|m| m.get("labels"))
			.and_then(Value::as_object)
			.map(|labels| {
				labels
					.iter()
					.filter_map(|(k, v)| Some((k.as_str(), v.as_str()?)))
					.collect()
			})
			.unwrap_or_default()
	}
}
