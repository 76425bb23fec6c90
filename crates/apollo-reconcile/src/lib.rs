//! Convergence engine for Apollo operator instances
//!
//! Each reconcile pass turns one instance into its desired objects and drives
//! the cluster toward them:
//!
//! - **Desired**: pure builders from an instance spec to owned objects
//! - **Converge**: create, patch or recreate objects of one kind
//! - **Collect**: delete owned objects that are no longer desired
//! - **Task**: ordered per-kind steps with bail/continue policies
//! - **Dispatch**: the fixed task table of each instance variant

#![deny(missing_docs)]

pub mod context;
pub mod converge;
mod defaults;
pub mod desired;
pub mod dispatch;
pub mod instance;
pub mod resource;
pub mod status;
pub mod store;
pub mod task;

#[cfg(test)]
mod testing;

pub use context::ReconcileContext;
pub use dispatch::Dispatcher;
pub use instance::{Instance, Owner};
pub use status::{KubeStatusWriter, StatusWriter};
pub use store::{KubeStore, ResourceStore, Stores};
