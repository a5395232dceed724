//! Unit tests for error.rs
//!
//! Tests all Error variants and their implementations (Display, Debug, Clone, std::error::Error).

use crate::error::PrismError as Error;

// ============================================================================
// ERROR DISPLAY TESTS
// ============================================================================

#[test]
fn test_backend_error_display() {
    let err = Error::BackendError("Vulkan initialization failed".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Backend error"));
    assert!(display.contains("Vulkan initialization failed"));
}

#[test]
fn test_out_of_memory_display() {
    let err = Error::OutOfMemory;
    let display = format!("{}", err);
    assert_eq!(display, "Out of GPU memory");
}

#[test]
fn test_invalid_resource_display() {
    let err = Error::InvalidResource("Texture not found".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Invalid resource"));
    assert!(display.contains("Texture not found"));
}

#[test]
fn test_initialization_failed_display() {
    let err = Error::InitializationFailed("Surface creation failed".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Initialization failed"));
    assert!(display.contains("Surface creation failed"));
}

#[test]
fn test_shader_compilation_display_is_verbatim() {
    // Compiler diagnostics must survive unchanged in the message.
    let diagnostic = "shader.frag:12: error: 'vec5' : undeclared identifier";
    let err = Error::ShaderCompilation(diagnostic.to_string());
    let display = format!("{}", err);
    assert!(display.contains(diagnostic));
}

#[test]
fn test_capacity_exhausted_display() {
    let err = Error::CapacityExhausted("uniform ring full (64 KiB)".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Capacity exhausted"));
    assert!(display.contains("uniform ring full"));
}

// ============================================================================
// ERROR TRAIT IMPLEMENTATIONS
// ============================================================================

#[test]
fn test_error_is_std_error() {
    let err = Error::OutOfMemory;
    // Verify Error implements std::error::Error trait
    let _: &dyn std::error::Error = &err;
}

#[test]
fn test_error_debug() {
    let err1 = Error::BackendError("test".to_string());
    assert!(format!("{:?}", err1).contains("BackendError"));

    let err2 = Error::CapacityExhausted("ring".to_string());
    assert!(format!("{:?}", err2).contains("CapacityExhausted"));

    let err3 = Error::ShaderCompilation("diag".to_string());
    assert!(format!("{:?}", err3).contains("ShaderCompilation"));
}

#[test]
fn test_error_clone() {
    let err = Error::InvalidResource("geometry".to_string());
    let cloned = err.clone();
    assert_eq!(format!("{}", err), format!("{}", cloned));
}
