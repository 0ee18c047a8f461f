//! Target selection over one tick's detections.
//!
//! Both functions are pure; the detection list is small (bounded by the
//! detector's per-frame output), so linear scans are fine.

use std::collections::BTreeSet;

use crate::detection::{Detection, TrackId};

/// Returns the first detection whose id matches the locked target.
///
/// Returns `None` when no target is locked or the target is absent.
pub fn select_by_id(detections: &[Detection], target_id: Option<TrackId>) -> Option<&Detection> {
    let target_id = target_id?;
    detections.iter().find(|d| d.id == target_id)
}

/// Sorted, de-duplicated ids present this tick (for client selection UIs).
pub fn available_ids(detections: &[Detection]) -> BTreeSet<TrackId> {
    detections.iter().map(|d| d.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BBox;

    fn det(id: TrackId, confidence: f32) -> Detection {
        Detection::new(id, "person", confidence, BBox::new(0.0, 0.0, 10.0, 10.0))
    }

    #[test]
    fn test_select_returns_first_match() {
        let dets = vec![det(3, 0.4), det(5, 0.9), det(5, 0.2)];
        let found = select_by_id(&dets, Some(5));
        assert_eq!(found.map(|d| d.confidence), Some(0.9));
    }

    #[test]
    fn test_select_without_target() {
        let dets = vec![det(1, 0.5)];
        assert!(select_by_id(&dets, None).is_none());
    }

    #[test]
    fn test_select_absent_target() {
        let dets = vec![det(1, 0.5)];
        assert!(select_by_id(&dets, Some(2)).is_none());
        assert!(select_by_id(&[], Some(2)).is_none());
    }

    #[test]
    fn test_available_ids_sorted_and_unique() {
        let dets = vec![det(9, 0.1), det(2, 0.1), det(9, 0.3), det(4, 0.2)];
        let ids: Vec<_> = available_ids(&dets).into_iter().collect();
        assert_eq!(ids, vec![2, 4, 9]);
    }
}
