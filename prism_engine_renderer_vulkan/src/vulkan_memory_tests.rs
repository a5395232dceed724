//! Unit tests for the host-write flush alignment helper

use super::align_flush_range;

// ============================================================================
// FLUSH RANGE ALIGNMENT TESTS
// ============================================================================

#[test]
fn test_aligned_range_passes_through() {
    let (start, len) = align_flush_range(256, 256, 64, 4096);
    assert_eq!(start, 256);
    assert_eq!(len, 256);
}

#[test]
fn test_start_rounds_down_end_rounds_up() {
    // Write of 10 bytes at offset 100 with a 64-byte atom must cover [64, 128)
    let (start, len) = align_flush_range(100, 10, 64, 4096);
    assert_eq!(start, 64);
    assert_eq!(len, 64);
    assert!(start <= 100);
    assert!(start + len >= 110);
}

#[test]
fn test_range_spanning_atom_boundary() {
    let (start, len) = align_flush_range(60, 10, 64, 4096);
    assert_eq!(start, 0);
    assert_eq!(len, 128);
}

#[test]
fn test_end_clamped_to_allocation_size() {
    // Allocation ends mid-atom: the rounded-up end must not exceed it
    let (start, len) = align_flush_range(96, 4, 64, 100);
    assert_eq!(start, 64);
    assert_eq!(start + len, 100);
}

#[test]
fn test_atom_of_one_is_identity() {
    let (start, len) = align_flush_range(13, 7, 1, 4096);
    assert_eq!(start, 13);
    assert_eq!(len, 7);
}
