//! Immutable frame handles and the pull-protocol sentinels.

pub mod pixel;
pub mod transform;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::audio::AudioBuffer;

pub use pixel::{PixelFormat, PixelFormatDesc, Plane};
pub use transform::{BlendMode, Crop, FrameTransform};

/// Opaque identity key attached to every real frame.
///
/// Downstream consumers may cache per tag; the pipeline never interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameTag(u64);

impl FrameTag {
    /// A tag no other caller has been handed
    pub fn unique() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Payload of a real frame
#[derive(Debug)]
pub struct FrameData {
    tag: FrameTag,
    desc: PixelFormatDesc,
    planes: Vec<Bytes>,
    audio: AudioBuffer,
    transform: FrameTransform,
    /// Nested frames drawn in order, used by composites such as fill+key
    children: Vec<Frame>,
}

impl FrameData {
    pub fn tag(&self) -> FrameTag {
        self.tag
    }

    pub fn desc(&self) -> &PixelFormatDesc {
        &self.desc
    }

    pub fn planes(&self) -> &[Bytes] {
        &self.planes
    }

    pub fn audio(&self) -> &AudioBuffer {
        &self.audio
    }

    pub fn transform(&self) -> &FrameTransform {
        &self.transform
    }

    pub fn children(&self) -> &[Frame] {
        &self.children
    }

    fn derive(
        &self,
        tag: FrameTag,
        transform: FrameTransform,
        audio: AudioBuffer,
        children: Vec<Frame>,
    ) -> FrameData {
        FrameData {
            tag,
            desc: self.desc.clone(),
            planes: self.planes.clone(),
            audio,
            transform,
            children,
        }
    }

    /// Whether any pixels are reachable from this frame
    pub fn has_image(&self) -> bool {
        self.planes.iter().any(|plane| !plane.is_empty())
            || self.children.iter().any(Frame::has_image)
    }
}

/// One unit of audio+video for one instant, or one of three sentinels.
///
/// Cloning is cheap: real frames share their payload.
#[derive(Clone, Default)]
pub enum Frame {
    /// No content; the safe initial value
    #[default]
    Empty,
    /// Nothing ready this tick; retry next tick and keep showing the last frame
    Late,
    /// The producer is permanently exhausted
    Eof,
    Ready(Arc<FrameData>),
}

impl Frame {
    pub fn new(
        tag: FrameTag,
        desc: PixelFormatDesc,
        planes: Vec<Bytes>,
        audio: AudioBuffer,
    ) -> Self {
        Self::Ready(Arc::new(FrameData {
            tag,
            desc,
            planes,
            audio,
            transform: FrameTransform::default(),
            children: Vec::new(),
        }))
    }

    /// A frame drawing `children` in order under one tag
    pub fn composite(tag: FrameTag, children: Vec<Frame>, audio: AudioBuffer) -> Self {
        Self::Ready(Arc::new(FrameData {
            tag,
            desc: PixelFormatDesc::invalid(),
            planes: Vec::new(),
            audio,
            transform: FrameTransform::default(),
            children,
        }))
    }

    /// Combine a color frame with its matte.
    ///
    /// Sentinels propagate, eof first, then late, then empty. Otherwise the
    /// key is drawn first with its key flag set so it masks the fill after it.
    /// The composite carries the fill's audio, and with it the fill's volume.
    pub fn fill_and_key(fill: &Frame, key: &Frame) -> Frame {
        match (fill, key) {
            (Frame::Eof, _) | (_, Frame::Eof) => Frame::Eof,
            (Frame::Late, _) | (_, Frame::Late) => Frame::Late,
            (Frame::Empty, _) | (_, Frame::Empty) => Frame::Empty,
            (Frame::Ready(data), Frame::Ready(_)) => {
                let key = key.with_transform(|t| t.is_key = true);
                let volume = data.transform.volume;
                let fill = if volume == 1.0 {
                    fill.clone()
                } else {
                    fill.with_transform(|t| t.volume = 1.0)
                };
                Self::Ready(Arc::new(FrameData {
                    tag: data.tag,
                    desc: PixelFormatDesc::invalid(),
                    planes: Vec::new(),
                    audio: data.audio.clone(),
                    transform: FrameTransform {
                        volume,
                        ..FrameTransform::default()
                    },
                    children: vec![key, fill],
                }))
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn is_late(&self) -> bool {
        matches!(self, Self::Late)
    }

    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Eof)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn is_sentinel(&self) -> bool {
        !self.is_ready()
    }

    /// Identity comparison: same sentinel, or the very same payload.
    pub fn same_as(&self, other: &Frame) -> bool {
        match (self, other) {
            (Self::Empty, Self::Empty) | (Self::Late, Self::Late) | (Self::Eof, Self::Eof) => true,
            (Self::Ready(a), Self::Ready(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn data(&self) -> Option<&FrameData> {
        match self {
            Self::Ready(data) => Some(data),
            _ => None,
        }
    }

    pub fn tag(&self) -> Option<FrameTag> {
        self.data().map(FrameData::tag)
    }

    pub fn has_image(&self) -> bool {
        self.data().is_some_and(FrameData::has_image)
    }

    /// Copy of this frame with an edited transform; payload is shared.
    pub fn with_transform(&self, edit: impl FnOnce(&mut FrameTransform)) -> Frame {
        match self {
            Self::Ready(data) => {
                let mut transform = data.transform;
                edit(&mut transform);
                Self::Ready(Arc::new(data.derive(
                    data.tag,
                    transform,
                    data.audio.clone(),
                    data.children.clone(),
                )))
            }
            sentinel => sentinel.clone(),
        }
    }

    /// Same frame with its audio removed, used when a frame is repeated.
    pub fn without_audio(&self) -> Frame {
        match self {
            Self::Ready(data) => Self::Ready(Arc::new(data.derive(
                data.tag,
                data.transform,
                AudioBuffer::empty(),
                data.children.iter().map(Frame::without_audio).collect(),
            ))),
            sentinel => sentinel.clone(),
        }
    }

    /// Same payload under a different tag
    pub fn retag(&self, tag: FrameTag) -> Frame {
        match self {
            Self::Ready(data) => Self::Ready(Arc::new(data.derive(
                tag,
                data.transform,
                data.audio.clone(),
                data.children.clone(),
            ))),
            sentinel => sentinel.clone(),
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Frame::Empty"),
            Self::Late => f.write_str("Frame::Late"),
            Self::Eof => f.write_str("Frame::Eof"),
            Self::Ready(data) => f
                .debug_struct("Frame")
                .field("tag", &data.tag)
                .field("format", &data.desc.format)
                .field("planes", &data.planes.len())
                .field("samples", &data.audio.samples().len())
                .field("children", &data.children.len())
                .finish(),
        }
    }
}
