//! # Cascade inference
//!
//! Two-stage classification of medical images. A router model picks the
//! clinical domain of an image; that domain's model then picks the
//! diagnostic class.
//!
//! ## Key Components
//!
//! - `Preprocessor`: bytes to normalized `[1, 1, H, W]` tensor
//! - `Catalog`: domain order and per-domain class lists
//! - `ModelRegistry`: the router plus one classifier per domain, validated at load
//! - `CascadeEngine`: runs both stages and assembles a `Classification`
//!
//! Everything here is immutable once built. The engine is shared between
//! threads behind an `Arc` without locking.

pub mod catalog;
pub mod classifier;
pub mod engine;
pub mod error;
pub mod ops;
pub mod preprocess;
pub mod registry;
pub mod resnet;

pub use catalog::{Catalog, Domain};
pub use classifier::{argmax, Classifier, ExclusiveClassifier, Serialized};
pub use engine::{CascadeEngine, Classification};
pub use error::{CascadeError, Result};
pub use preprocess::{ImageTensor, Preprocessor};
pub use registry::{ArtifactNaming, ModelDetails, ModelRegistry, ModelRole};
pub use resnet::ResNetClassifier;
