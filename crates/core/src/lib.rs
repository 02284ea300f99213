//! Small utilities shared between the gateway library and its binary.
//!
//! Mirrors the role `agent-core` plays in the project this gateway is
//! patterned after: a place for cross-cutting helpers that don't belong to
//! any single subsystem.

pub mod bow;
pub mod telemetry;
pub mod version;

pub mod prelude {
    pub use std::sync::Arc;
    pub use std::time::Duration;

    pub use tracing::{debug, error, info, trace, warn};
}
