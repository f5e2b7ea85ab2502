//! # PlantVision
//!
//! HTTP inference server for object-detection models trained on crop
//! images. Callers upload an image, pick a model by name and get back the
//! bounding boxes the model found above a confidence threshold.
//!
//! ## Modules
//!
//! - `registry`: discovery, loading and atomic reload of models from a directory
//! - `validate`: checks on inbound `/predict` requests
//! - `pipeline`: temporary upload handling, detection and result normalization
//! - `detector`: the detection engine interface and its TorchScript backend
//! - `routes`: the axum HTTP interface
//!
//! ## Models directory
//!
//! ```text
//! models/
//!   lettuce/
//!     best.pt
//!     classes.json
//!   spinach/
//!     best.pt
//!     classes.json
//! ```

pub mod config;
pub mod detector;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod registry;
pub mod routes;
pub mod state;
pub mod validate;

pub use config::ServerConfig;
pub use detector::{Detector, ModelLoader};
pub use registry::ModelRegistry;
pub use routes::router;
pub use state::{AppState, SharedState};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
