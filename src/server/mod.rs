//! HTTP boundary around the cascade engine.
//!
//! The handlers only move bytes in and JSON out; all classification logic
//! stays in [`crate::inference`].

mod routes;
mod server;
pub mod types;

pub use server::{router, ApiServer};
