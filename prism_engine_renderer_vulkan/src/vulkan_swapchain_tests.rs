//! Unit tests for the swapchain's device-free pieces
//!
//! Outcome classification, surface configuration selection and rebuild
//! bookkeeping hold no GPU objects, so they are tested directly.

use super::*;
use prism_engine::prism::Error;

// ============================================================================
// OUTCOME CLASSIFICATION
// ============================================================================

#[test]
fn test_acquire_success_carries_index_and_suboptimal_flag() {
    let outcome = classify_acquire(Ok((3, false))).unwrap();
    assert_eq!(outcome, AcquireOutcome::Ready { image_index: 3, suboptimal: false });

    let outcome = classify_acquire(Ok((0, true))).unwrap();
    assert_eq!(outcome, AcquireOutcome::Ready { image_index: 0, suboptimal: true });
}

#[test]
fn test_acquire_out_of_date_is_an_outcome_not_an_error() {
    let outcome = classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap();
    assert_eq!(outcome, AcquireOutcome::OutOfDate);
}

#[test]
fn test_acquire_timeout_and_not_ready_both_skip_the_frame() {
    assert_eq!(classify_acquire(Err(vk::Result::TIMEOUT)).unwrap(), AcquireOutcome::Timeout);
    assert_eq!(classify_acquire(Err(vk::Result::NOT_READY)).unwrap(), AcquireOutcome::Timeout);
}

#[test]
fn test_acquire_device_loss_is_a_hard_error() {
    let result = classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST));
    assert!(matches!(result, Err(Error::BackendError(_))));
}

#[test]
fn test_present_suboptimal_and_out_of_date_request_recreation() {
    assert_eq!(classify_present(Ok(false)).unwrap(), PresentOutcome::Presented);
    assert_eq!(classify_present(Ok(true)).unwrap(), PresentOutcome::NeedsRecreate);
    assert_eq!(
        classify_present(Err(vk::Result::SUBOPTIMAL_KHR)).unwrap(),
        PresentOutcome::NeedsRecreate
    );
    assert_eq!(
        classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
        PresentOutcome::NeedsRecreate
    );
}

#[test]
fn test_present_device_loss_is_a_hard_error() {
    let result = classify_present(Err(vk::Result::ERROR_DEVICE_LOST));
    assert!(matches!(result, Err(Error::BackendError(_))));
}

// ============================================================================
// SURFACE CONFIGURATION SELECTION
// ============================================================================

fn surface_format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
    vk::SurfaceFormatKHR { format, color_space }
}

#[test]
fn test_srgb_formats_are_preferred() {
    let formats = [
        surface_format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        surface_format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
    ];
    assert_eq!(pick_surface_format(&formats).format, vk::Format::B8G8R8A8_SRGB);
}

#[test]
fn test_first_format_is_the_fallback() {
    let formats = [
        surface_format(vk::Format::R5G6B5_UNORM_PACK16, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        surface_format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
    ];
    assert_eq!(pick_surface_format(&formats).format, vk::Format::R5G6B5_UNORM_PACK16);
}

#[test]
fn test_surface_fixed_extent_wins_over_window_size() {
    let mut capabilities = vk::SurfaceCapabilitiesKHR::default();
    capabilities.current_extent = vk::Extent2D { width: 800, height: 600 };

    let extent = select_extent(&capabilities, 1920, 1080);
    assert_eq!(extent, vk::Extent2D { width: 800, height: 600 });
}

#[test]
fn test_window_driven_extent_clamps_to_surface_limits() {
    let mut capabilities = vk::SurfaceCapabilitiesKHR::default();
    capabilities.current_extent = vk::Extent2D { width: u32::MAX, height: u32::MAX };
    capabilities.min_image_extent = vk::Extent2D { width: 64, height: 64 };
    capabilities.max_image_extent = vk::Extent2D { width: 1024, height: 1024 };

    assert_eq!(select_extent(&capabilities, 4096, 32), vk::Extent2D { width: 1024, height: 64 });
    assert_eq!(select_extent(&capabilities, 640, 480), vk::Extent2D { width: 640, height: 480 });
}

#[test]
fn test_image_count_is_min_plus_one_within_the_cap() {
    let mut capabilities = vk::SurfaceCapabilitiesKHR::default();
    capabilities.min_image_count = 2;
    capabilities.max_image_count = 0;
    assert_eq!(select_image_count(&capabilities), 3);

    capabilities.max_image_count = 2;
    assert_eq!(select_image_count(&capabilities), 2);
}

// ============================================================================
// REBUILD BOOKKEEPING
// ============================================================================

#[test]
fn test_rebuild_request_survives_a_failed_rebuild() {
    let mut tracker = RebuildTracker::default();
    assert!(!tracker.pending());

    tracker.request();
    assert!(tracker.pending());

    // A failed attempt keeps the request so the next frame retries
    tracker.note_rebuild(false);
    assert!(tracker.pending());

    tracker.note_rebuild(true);
    assert!(!tracker.pending());
}

#[test]
fn test_rebuild_success_without_a_request_is_harmless() {
    let mut tracker = RebuildTracker::default();
    tracker.note_rebuild(true);
    assert!(!tracker.pending());
}
