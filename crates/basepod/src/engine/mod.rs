//! Engine adapter — uniform API over the container engine.
//!
//! [`EngineOps`] is the capability set the rest of the platform consumes.
//! `client.rs` holds the bollard-backed [`DockerEngine`] struct; domain
//! methods live in sibling modules (`container`, `image`, `exec`) which add
//! `impl DockerEngine` blocks. `live.rs` wires those methods into the trait.
//! `fake.rs` provides a deterministic in-memory double for tests.

pub mod client;
pub mod container;
pub mod exec;
pub mod fake;
pub mod image;
pub mod live;
pub mod ops;
pub mod stream;

pub use client::{DockerEngine, EngineError};
pub use fake::FakeEngine;
pub use ops::{
    ContainerDetails, CreateContainerOpts, EngineOps, ExecSession, ExecSpec, ExecStatus,
    ImageDetails, LogChunk, PortPublish, StatsSample,
};

/// The shared user-defined bridge network every app container joins.
pub const APP_NETWORK: &str = "basepod";

/// Label carrying the app name on every managed container.
pub const LABEL_APP: &str = "basepod.app";
/// Label carrying the app id on every managed container.
pub const LABEL_APP_ID: &str = "basepod.app.id";
