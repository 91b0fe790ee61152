//! Per-channel compositing with a fixed-depth pipeline.

pub mod audio;
pub mod image;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::HeapRb;
use tracing::{debug, error, trace};

use crate::audio::{AudioBuffer, MixConfigRepository};
use crate::concurrency::Deferred;
use crate::error::{Error, Result};
use crate::format::ChannelFormat;
use crate::frame::{Frame, FrameTag, FrameTransform, PixelFormatDesc};

pub use audio::AudioMixer;
pub use image::{CpuImageMixer, ImageMixer};

/// Composites in flight before the first one is handed out
pub const PIPELINE_DEPTH: usize = 3;

/// A composite whose image is still being rendered
struct Pending {
    image: Deferred<Bytes>,
    desc: PixelFormatDesc,
    audio: AudioBuffer,
}

/// Turns one tick's layer frames into one output frame.
///
/// Output lags input by the pipeline depth: the first `depth - 1` calls
/// return [`Frame::Empty`] while the image mixer works ahead.
///
/// Each frame is drawn under `root ∘ layer ∘ frame`: the channel-wide root
/// transform, then the transform set for its layer index, then its own.
pub struct Mixer {
    name: String,
    audio: AudioMixer,
    image: Box<dyn ImageMixer>,
    pipeline: HeapRb<Pending>,
    depth: usize,
    root: FrameTransform,
    transforms: BTreeMap<i32, FrameTransform>,
}

impl Mixer {
    pub fn new(
        name: impl Into<String>,
        image: Box<dyn ImageMixer>,
        mix_configs: Arc<MixConfigRepository>,
    ) -> Self {
        Self {
            name: name.into(),
            audio: AudioMixer::new(mix_configs),
            image,
            pipeline: HeapRb::new(PIPELINE_DEPTH),
            depth: PIPELINE_DEPTH,
            root: FrameTransform::default(),
            transforms: BTreeMap::new(),
        }
    }

    pub fn with_depth(mut self, depth: usize) -> Result<Self> {
        if depth == 0 {
            return Err(Error::InvalidArgument("mixer depth must be at least 1".into()));
        }
        self.pipeline = HeapRb::new(depth);
        self.depth = depth;
        Ok(self)
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn master_volume(&self) -> f64 {
        self.audio.master_volume()
    }

    pub fn set_master_volume(&mut self, volume: f64) {
        debug!("{}: master volume {}", self.name, volume);
        self.audio.set_master_volume(volume);
    }

    pub fn root_transform(&self) -> FrameTransform {
        self.root
    }

    pub fn set_root_transform(&mut self, transform: FrameTransform) {
        debug!("{}: root transform {:?}", self.name, transform);
        self.root = transform;
    }

    /// Transform of `layer`; the identity if none was set
    pub fn layer_transform(&self, layer: i32) -> FrameTransform {
        self.transforms.get(&layer).copied().unwrap_or_default()
    }

    pub fn set_layer_transform(&mut self, layer: i32, transform: FrameTransform) {
        debug!("{}: layer {} transform {:?}", self.name, layer, transform);
        if transform == FrameTransform::default() {
            self.transforms.remove(&layer);
        } else {
            self.transforms.insert(layer, transform);
        }
    }

    /// Reset every layer transform and the root transform
    pub fn clear_transforms(&mut self) {
        self.transforms.clear();
        self.root = FrameTransform::default();
    }

    /// Mix `layers` bottom-up by index and return the composite from
    /// `depth - 1` calls ago, or empty while the pipeline fills.
    pub fn composite(&mut self, layers: &BTreeMap<i32, Frame>, format: &ChannelFormat) -> Frame {
        for (&index, frame) in layers {
            let Some(data) = frame.data() else {
                continue;
            };
            let parent = self.root.combine(&self.layer_transform(index));
            self.image.push(frame, &parent);
            // Children of a composite share its audio; only the top level is mixed.
            self.audio.push(parent.combine(data.transform()).volume, data.audio());
        }

        let video = &format.video;
        let pending = Pending {
            image: self.image.render(video),
            desc: PixelFormatDesc::bgra(video.width, video.height),
            audio: self.audio.mix(format),
        };

        if self.pipeline.try_push(pending).is_err() {
            // Only reachable if a previous call unwound between push and pop.
            error!("{}: mixer pipeline overflow", self.name);
            return Frame::Empty;
        }

        if self.pipeline.occupied_len() < self.depth {
            trace!("{}: priming ({}/{})", self.name, self.pipeline.occupied_len(), self.depth);
            return Frame::Empty;
        }

        let Some(oldest) = self.pipeline.try_pop() else {
            return Frame::Empty;
        };
        self.realize(oldest)
    }

    fn realize(&self, pending: Pending) -> Frame {
        let started = Instant::now();
        let image = pending.image.get();
        metrics::histogram!("playout_mixer_wait_seconds", "mixer" => self.name.clone())
            .record(started.elapsed().as_secs_f64());

        match image {
            Ok(image) => Frame::new(FrameTag::unique(), pending.desc, vec![image], pending.audio),
            Err(e) => {
                error!("{}: composite lost: {}", self.name, e);
                Frame::Empty
            }
        }
    }
}
