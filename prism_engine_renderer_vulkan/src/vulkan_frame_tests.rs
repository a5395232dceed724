//! Unit tests for frame lane bookkeeping

use super::{FrameLanes, LaneBegin};

// ============================================================================
// LANE CYCLING TESTS
// ============================================================================

#[test]
fn test_lanes_alternate_with_two_in_flight() {
    let mut lanes = FrameLanes::new(2);

    for expected in [0usize, 1, 0, 1, 0] {
        let begin = lanes.begin();
        assert_eq!(begin.lane, expected);
        lanes.mark_submitted();
    }
}

#[test]
fn test_first_frames_need_no_wait() {
    let mut lanes = FrameLanes::new(2);

    assert_eq!(lanes.begin(), LaneBegin { lane: 0, needs_wait: false });
    lanes.mark_submitted();
    assert_eq!(lanes.begin(), LaneBegin { lane: 1, needs_wait: false });
    lanes.mark_submitted();

    // Third frame revisits lane 0, which now has a submission in flight
    assert_eq!(lanes.begin(), LaneBegin { lane: 0, needs_wait: true });
}

#[test]
fn test_fence_waits_lag_frame_count_by_lane_count() {
    let mut lanes = FrameLanes::new(2);

    let frames = 10;
    for _ in 0..frames {
        lanes.begin();
        lanes.mark_submitted();
    }

    assert_eq!(lanes.fence_waits(), frames - 2);
}

#[test]
fn test_aborted_frame_keeps_the_lane_and_skips_the_next_wait() {
    let mut lanes = FrameLanes::new(2);

    lanes.begin();
    lanes.mark_submitted();
    lanes.begin();
    lanes.mark_submitted();

    // Acquire timed out: the wait already happened in begin, but nothing
    // was submitted, so the lane must not be waited on again
    let begin = lanes.begin();
    assert_eq!(begin.lane, 0);
    assert!(begin.needs_wait);
    lanes.abort();

    let retry = lanes.begin();
    assert_eq!(retry.lane, 0);
    assert!(!retry.needs_wait);
}

#[test]
fn test_submitted_lanes_tracks_outstanding_work() {
    let mut lanes = FrameLanes::new(2);
    assert_eq!(lanes.submitted_lanes().count(), 0);

    lanes.begin();
    lanes.mark_submitted();
    assert_eq!(lanes.submitted_lanes().collect::<Vec<_>>(), vec![0]);

    lanes.begin();
    lanes.mark_submitted();
    assert_eq!(lanes.submitted_lanes().collect::<Vec<_>>(), vec![0, 1]);

    // Re-beginning lane 0 consumes its outstanding submission
    lanes.begin();
    assert_eq!(lanes.submitted_lanes().collect::<Vec<_>>(), vec![1]);
}

#[test]
fn test_single_lane_waits_every_frame_after_the_first() {
    let mut lanes = FrameLanes::new(1);

    lanes.begin();
    lanes.mark_submitted();

    for _ in 0..5 {
        assert!(lanes.begin().needs_wait);
        lanes.mark_submitted();
    }
    assert_eq!(lanes.fence_waits(), 5);
}
