//! Shared configuration library for Vantage.
//!
//! Centralizes worker-daemon configuration models, defaults, and
//! environment-driven loading so the worker binary and operational tooling
//! share a single source of truth.

pub mod models;

pub use models::{
    CredentialsConfig, ReclaimConfig, WorkerConfig, WorkerConfigSource,
    WorkerTuningConfig,
};
