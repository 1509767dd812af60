//! Point-in-time reconciliation of a Tanka environment against a Kubernetes cluster.
//!
//! The [`Kubernetes`] engine answers three questions about a desired set of
//! manifests: how it differs from the cluster ([`Kubernetes::diff`]), how to push
//! it ([`Kubernetes::apply`]), and which labelled resources in the cluster are no
//! longer part of it ([`Kubernetes::orphaned`]).
//!
//! All cluster access goes through the [`ClusterClient`] trait. [`KubeClient`] is
//! the kube-rs backed implementation.

pub mod client;
pub mod confirm;
pub mod diff;
pub mod differ;
pub mod diffstat;
pub mod error;
pub mod kubernetes;
pub mod manifest;
pub mod orphans;
pub mod spec;
pub mod version;
mod yaml;

pub use client::{ApplyOpts, ApplyStrategy, ClientError, ClusterClient, ClusterInfo, KubeClient};
pub use error::Error;
pub use kubernetes::{DiffOpts, EngineOptions, Kubernetes};
pub use manifest::{Identifier, Manifest, ManifestList};
pub use spec::Environment;

/// Label marking a resource as belonging to an environment.
///
/// The value is the environment's name label, see [`Environment::name_label`].
pub const LABEL_ENVIRONMENT: &str = "tanka.dev/environment";

/// Kubernetes API resource scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceScope {
	/// Resource is namespaced (e.g., Deployment, ConfigMap).
	Namespaced,

	/// Resource is cluster-wide (e.g., Namespace, ClusterRole).
	ClusterWide,
}
