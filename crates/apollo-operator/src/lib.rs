//! Kubernetes operator for the Apollo configuration platform

#![deny(missing_docs)]

/// Reconcile and error-policy entry points
pub mod controller;
/// Controller construction for the three instance kinds
pub mod controller_runner;
/// CRD generation and installation
pub mod crds;
