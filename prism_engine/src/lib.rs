/*!
# Prism Engine

Core traits and types for the Prism rendering engine.

This crate provides the platform-agnostic API a retained-mode scene graph
uses to drive a rendering backend. Backend implementations (the Vulkan
backend lives in `prism_engine_renderer_vulkan`) provide concrete types for
the traits defined here.

## Architecture

- **SceneRenderer**: per-frame bind/state/draw command interface
- **Geometry / Texture / Program**: GPU resource traits
- **error / log**: shared error taxonomy and logging subsystem
*/

// Internal modules
mod error;
mod engine;
pub mod log;
pub mod render;

// Main prism namespace module
pub mod prism {
    // Error types
    pub use crate::error::{PrismError as Error, PrismResult as Result};

    // Engine-wide services (logger installation)
    pub use crate::engine::Engine;

    // Logging sub-module (types only, NOT macros)
    pub mod log {
        pub use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};
        // Note: engine_* macros are NOT re-exported here - they live at crate root
    }

    // Render sub-module with all rendering types
    pub mod render {
        pub use crate::render::*;
    }
}

// Re-export math library at crate root
pub use glam;
