//! Per-category summary of a detection list.

use std::collections::HashMap;

use crate::detection::Detection;

/// Collapse detections to one entry per category, keeping the most confident.
///
/// Categories are compared case-insensitively. Output follows the order in
/// which each category first appears; on equal confidence the earlier
/// detection is kept.
pub fn aggregate(detections: &[Detection]) -> Vec<Detection> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut best: Vec<Detection> = Vec::new();

    for detection in detections {
        let key = detection.category.id();
        match slots.get(&key) {
            Some(&slot) => {
                if detection.confidence > best[slot].confidence {
                    best[slot] = detection.clone();
                }
            }
            None => {
                slots.insert(key, best.len());
                best.push(detection.clone());
            }
        }
    }
    best
}
