//! Two-stage medical image classification.
//!
//! A router model assigns an image to a clinical domain, then the domain's
//! own model assigns the diagnostic class. See [`inference::CascadeEngine`].

pub mod config;
pub mod display;
pub mod gguf;
pub mod inference;
pub mod logging;
pub mod server;
