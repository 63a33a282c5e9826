//! Harvest module - release reconciliation against upstream sources.
//!
//! This module provides the core of the release harvester:
//! - **Traits**: [`ContentFetcher`], [`ArtifactInspector`], [`StateStore`],
//!   [`CatalogPublisher`] collaborator contracts
//! - **Formats**: ground-truth inspectors such as [`formats::DpkgInspector`]
//! - **Errors**: Standardized error types for each collaborator
//! - **Pipeline**: The per-package engine via [`pipeline::Reconciler`]

pub mod formats;
pub mod pipeline;
pub mod traits;

// Re-export commonly used types
pub use traits::{
    ArtifactInspector, CatalogError, CatalogPublisher, ContentFetcher, FetchedContent,
    InspectError, StateStore, StoreError, TransferError,
};

pub use pipeline::{unchanged_by, ReconcileError, ReconcileOutcome, Reconciler, Tier};
