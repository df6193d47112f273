//! Narration text segmentation and sequential playback.

pub mod pipeline;
pub mod segmenter;

pub use pipeline::{NarrationPipeline, NarrationSummary, PipelineEvent, SegmentSignal};
pub use segmenter::split_segments;
