//! In-memory Kubernetes API server for tests.
//!
//! Serves get/create/patch for the resource types in a [`ResourceCatalog`]
//! over real HTTP, so clients connect through an ordinary kubeconfig.

pub mod catalog;
mod helpers;
pub mod server;

pub use catalog::{MockResourceType, ResourceCatalog};
pub use server::{MockCluster, Rejection, RecordedRequest, RunningMockCluster};
