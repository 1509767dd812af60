//! Mock Kubernetes API server for tests.
//!
//! Runs a real HTTP server, so clients connect through an ordinary kubeconfig.

pub mod discovery;
mod helpers;
pub mod http;

pub use discovery::{DiscoveryMode, MockApiResource, MockDiscovery};
pub use http::{HttpMockK8sServer, ObjectKey, RunningHttpMockK8sServer};
