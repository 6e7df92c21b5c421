//! Container engine module
//!
//! Per-host engine access over the Docker API:
//! - Bollard client bound to a tunnel socket or a direct TCP endpoint
//! - Engine error types
//! - The [`ContainerEngine`] capability used by cluster code
//! - Image presence checks and pulls for helper containers

mod client;
pub mod container;
mod engine;
mod error;
pub mod image;

pub use client::{DEFAULT_TIMEOUT_SECS, DockerClient, ENGINE_API_VERSION};
pub use engine::{
    ContainerEngine, ContainerSpec, ContainerState, ContainerStatus, HelperOutput, HelperSpec,
};
pub use error::EngineError;
pub use image::{ensure_image, image_exists, pull_image};
