//! Flux HSI - wearable payloads to Human State Indicator records
//!
//! Flux transforms raw wearable vendor data into HSI-compliant signals through a
//! deterministic pipeline: vendor adaptation → normalization → feature derivation
//! → baseline computation → HSI encoding.
//!
//! Stateless conversions score each payload against its own days. A
//! [`FluxProcessor`] keeps rolling per-device baselines across calls and can
//! save and restore them. Both are exposed to C through [`ffi`].

pub mod adapters;
pub mod baseline;
pub mod config;
pub mod encoder;
pub mod error;
pub mod features;
pub mod normalizer;
pub mod pipeline;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use baseline::{BaselineSignal, BaselineStore};
pub use config::{ConfigError, FluxConfig, ProcessorConfig};
pub use error::{ComputeError, ErrorKind};
pub use pipeline::{garmin_to_hsi_daily, validate_request, whoop_to_hsi_daily, FluxProcessor};
pub use types::Vendor;

/// Flux version embedded in all HSI payloads
pub const FLUX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for HSI payloads
pub const PRODUCER_NAME: &str = "flux-hsi";
