use std::collections::BTreeMap;

use crate::models::frame::FrameRecord;

/// Classes listed in the summary line.
const SUMMARY_TOP_CLASSES: usize = 5;

/// Normalized area of the detected region, zeroed for frames without a
/// qualifying detection.
pub fn frame_score(record: &FrameRecord) -> f64 {
    let image_area = record.image_width * record.image_height;
    if record.has_detection == 0 || image_area <= 0.0 {
        return 0.0;
    }
    f64::from(record.has_detection) * (record.box_width * record.box_height) / image_area
}

/// Mean frame score over all records; 0 for an empty set.
pub fn aggregate_score(records: &[FrameRecord]) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    let total: f64 = records.iter().map(frame_score).sum();
    total / records.len() as f64
}

/// Confident detections per class across all records.
pub fn count_detections(records: &[FrameRecord]) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for class in records.iter().flat_map(|r| &r.detected_classes) {
        *counts.entry(class.clone()).or_insert(0) += 1;
    }
    counts
}

/// "Objects detected: a: 3, b: 1" for the most frequent classes, or
/// "No objects detected".
pub fn detection_summary(counts: &BTreeMap<String, u64>) -> String {
    if counts.is_empty() {
        return "No objects detected".to_string();
    }
    let mut ranked: Vec<(&String, &u64)> = counts.iter().collect();
    // Stable sort keeps equal counts in name order.
    ranked.sort_by(|a, b| b.1.cmp(a.1));
    let listed: Vec<String> = ranked
        .into_iter()
        .take(SUMMARY_TOP_CLASSES)
        .map(|(name, count)| format!("{name}: {count}"))
        .collect();
    format!("Objects detected: {}", listed.join(", "))
}
