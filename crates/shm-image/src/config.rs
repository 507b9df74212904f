use std::path::PathBuf;

use crate::layout::{DEFAULT_SEGMENT_NAME, OutputShape, SegmentLayout};
use crate::wait::WaitPolicy;

/// Default directory holding `img{index}.ppm` inputs.
pub const DEFAULT_IMAGE_DIR: &str = "imgs";

/// Default number of images in a session.
pub const DEFAULT_IMAGE_COUNT: usize = 10;

/// Configuration for the requestor side.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name of the shared memory segment to attach to.
    pub segment_name: String,
    pub layout: SegmentLayout,
    /// Directory with the input images.
    pub image_dir: PathBuf,
    /// Indices `0..image_count` are exchanged.
    pub image_count: usize,
    /// Dimensions of the processor's answers; must match what it serves.
    pub output_shape: OutputShape,
    pub wait: WaitPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            segment_name: DEFAULT_SEGMENT_NAME.to_string(),
            layout: SegmentLayout::default(),
            image_dir: PathBuf::from(DEFAULT_IMAGE_DIR),
            image_count: DEFAULT_IMAGE_COUNT,
            output_shape: OutputShape::RowsByOne,
            wait: WaitPolicy::default(),
        }
    }
}

/// Configuration for the processor side.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Name of the shared memory segment to create.
    pub segment_name: String,
    pub layout: SegmentLayout,
    /// Waits for requests are unbounded by default.
    pub wait: WaitPolicy,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            segment_name: DEFAULT_SEGMENT_NAME.to_string(),
            layout: SegmentLayout::default(),
            wait: WaitPolicy::default().forever(),
        }
    }
}
