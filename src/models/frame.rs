/// Normalized inference output for one sampled frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    /// 1 when the top prediction cleared the confidence threshold, else 0.
    pub has_detection: u8,
    pub box_width: f64,
    pub box_height: f64,
    pub image_width: f64,
    pub image_height: f64,
    /// Class of every prediction above the confidence threshold.
    pub detected_classes: Vec<String>,
}
