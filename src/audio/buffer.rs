use std::sync::Arc;

use super::ChannelLayout;

/// Interleaved 32-bit samples tagged with their channel layout.
///
/// The sample storage is reference counted so pipeline stages can share a
/// buffer without copying it.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Arc<[i32]>,
    layout: ChannelLayout,
}

impl AudioBuffer {
    pub fn new(samples: impl Into<Arc<[i32]>>, layout: ChannelLayout) -> Self {
        Self {
            samples: samples.into(),
            layout,
        }
    }

    /// No samples, no layout
    pub fn empty() -> Self {
        Self::new(Vec::new(), ChannelLayout::invalid())
    }

    pub fn silence(sample_frames: usize, layout: ChannelLayout) -> Self {
        let len = sample_frames * layout.num_channels();
        Self::new(vec![0; len], layout)
    }

    /// Same samples, different channel labels
    pub fn relabel(&self, layout: ChannelLayout) -> Self {
        Self {
            samples: Arc::clone(&self.samples),
            layout,
        }
    }

    pub fn samples(&self) -> &[i32] {
        &self.samples
    }

    pub fn layout(&self) -> &ChannelLayout {
        &self.layout
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of sample frames (one sample per channel)
    pub fn sample_frames(&self) -> usize {
        match self.layout.num_channels() {
            0 => 0,
            n => self.samples.len() / n,
        }
    }
}

impl Default for AudioBuffer {
    fn default() -> Self {
        Self::empty()
    }
}
