//! Error types for the Prism engine
//!
//! This module defines the error types used throughout the engine,
//! including rendering, initialization, and resource management.

use std::fmt;

/// Result type for Prism engine operations
pub type PrismResult<T> = Result<T, PrismError>;

/// Prism engine errors
#[derive(Debug, Clone)]
pub enum PrismError {
    /// Backend-specific error (Vulkan, etc.)
    BackendError(String),

    /// Out of GPU memory
    OutOfMemory,

    /// Invalid resource (texture, buffer, shader, etc.)
    InvalidResource(String),

    /// Initialization failed (engine, renderer, subsystems)
    InitializationFailed(String),

    /// Shader compilation failed (contains the compiler's diagnostic text verbatim)
    ShaderCompilation(String),

    /// A pre-sized GPU buffer ring is full. This is a sizing bug to fix at
    /// build time, not a transient condition to retry.
    CapacityExhausted(String),
}

impl fmt::Display for PrismError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrismError::BackendError(msg) => write!(f, "Backend error: {}", msg),
            PrismError::OutOfMemory => write!(f, "Out of GPU memory"),
            PrismError::InvalidResource(msg) => write!(f, "Invalid resource: {}", msg),
            PrismError::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            PrismError::ShaderCompilation(msg) => write!(f, "Shader compilation failed: {}", msg),
            PrismError::CapacityExhausted(msg) => write!(f, "Capacity exhausted: {}", msg),
        }
    }
}

impl std::error::Error for PrismError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
