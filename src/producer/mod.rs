//! The pull protocol every content source implements, plus the leaf
//! producers and the panic guard the channel wraps around each layer.

pub mod playlist;
pub mod reroute;
pub mod separated;

use std::any::Any;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::panic::{catch_unwind, AssertUnwindSafe};

use bytes::Bytes;
use tracing::{debug, error};

use crate::audio::AudioBuffer;
use crate::format::ChannelFormat;
use crate::frame::{Frame, FrameTag, PixelFormatDesc};

pub use playlist::{PlaylistCommand, PlaylistHandle, PlaylistProducer};
pub use reroute::{RerouteProducer, RerouteSink, RerouteStats};
pub use separated::SeparatedProducer;

/// Advisory flags passed down with a pull
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameHints(u32);

impl FrameHints {
    pub const NONE: FrameHints = FrameHints(0);
    /// Only the alpha channel of the result will be used
    pub const ALPHA_ONLY: FrameHints = FrameHints(1);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: FrameHints) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for FrameHints {
    type Output = FrameHints;

    fn bitor(self, rhs: FrameHints) -> FrameHints {
        FrameHints(self.0 | rhs.0)
    }
}

impl BitOrAssign for FrameHints {
    fn bitor_assign(&mut self, rhs: FrameHints) {
        self.0 |= rhs.0;
    }
}

/// A source of frames, pulled once per output tick.
///
/// `pull` must not block on the happy path: a producer whose next frame is
/// not ready answers [`Frame::Late`], and a producer that has nothing more to
/// give answers [`Frame::Eof`] on every later call.
pub trait FrameProducer: Send {
    fn pull(&mut self, hints: FrameHints) -> Frame;

    /// Most recent real frame handed out, or [`Frame::Empty`]
    fn last_frame(&self) -> Frame;

    fn name(&self) -> String;

    /// Restart from the beginning. Returns `false` when the producer cannot.
    fn rewind(&mut self) -> bool {
        false
    }
}

impl fmt::Debug for dyn FrameProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameProducer({})", self.name())
    }
}

/// Produces nothing, forever.
#[derive(Debug, Default)]
pub struct EmptyProducer;

impl FrameProducer for EmptyProducer {
    fn pull(&mut self, _hints: FrameHints) -> Frame {
        Frame::Empty
    }

    fn last_frame(&self) -> Frame {
        Frame::Empty
    }

    fn name(&self) -> String {
        "empty".to_string()
    }
}

/// Solid color with silent audio at the channel's cadence.
pub struct ColorProducer {
    color: [u8; 4],
    format: ChannelFormat,
    desc: PixelFormatDesc,
    image: Bytes,
    limit: Option<u64>,
    tick: u64,
    last: Frame,
}

impl ColorProducer {
    /// `color` is in BGRA byte order
    pub fn new(color: [u8; 4], format: &ChannelFormat) -> Self {
        let video = &format.video;
        let image = color
            .iter()
            .copied()
            .cycle()
            .take(video.image_size())
            .collect::<Vec<u8>>();

        Self {
            color,
            format: format.clone(),
            desc: PixelFormatDesc::bgra(video.width, video.height),
            image: Bytes::from(image),
            limit: None,
            tick: 0,
            last: Frame::Empty,
        }
    }

    /// Stop with eof after `frames` frames
    pub fn take(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    pub fn color(&self) -> [u8; 4] {
        self.color
    }
}

impl FrameProducer for ColorProducer {
    fn pull(&mut self, _hints: FrameHints) -> Frame {
        if self.limit.is_some_and(|limit| self.tick >= limit) {
            return Frame::Eof;
        }

        let samples = self.format.video.audio_samples_for_tick(self.tick);
        let audio = AudioBuffer::silence(samples, self.format.channel_layout.clone());
        self.tick += 1;

        let frame = Frame::new(
            FrameTag::unique(),
            self.desc.clone(),
            vec![self.image.clone()],
            audio,
        );
        self.last = frame.clone();
        frame
    }

    fn last_frame(&self) -> Frame {
        self.last.clone()
    }

    fn name(&self) -> String {
        let [b, g, r, a] = self.color;
        format!("color[#{a:02X}{r:02X}{g:02X}{b:02X}]")
    }

    fn rewind(&mut self) -> bool {
        self.tick = 0;
        true
    }
}

/// Contains panics raised by the wrapped producer.
///
/// The first panic is logged and counted; from then on the producer reports
/// eof and is never called again.
pub struct GuardedProducer {
    inner: Box<dyn FrameProducer>,
    name: String,
    failed: bool,
}

impl GuardedProducer {
    pub fn new(inner: Box<dyn FrameProducer>) -> Self {
        let name = inner.name();
        Self {
            inner,
            name,
            failed: false,
        }
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }

    pub fn into_inner(self) -> Box<dyn FrameProducer> {
        self.inner
    }

    fn fail(&mut self, operation: &str, payload: Box<dyn Any + Send>) {
        self.failed = true;
        error!(
            producer = %self.name,
            "{} panicked: {}; treating producer as finished",
            operation,
            panic_message(payload.as_ref())
        );
        metrics::counter!("playout_producer_failures_total", "producer" => self.name.clone())
            .increment(1);
    }
}

impl FrameProducer for GuardedProducer {
    fn pull(&mut self, hints: FrameHints) -> Frame {
        if self.failed {
            return Frame::Eof;
        }
        let inner = &mut self.inner;
        match catch_unwind(AssertUnwindSafe(|| inner.pull(hints))) {
            Ok(frame) => frame,
            Err(payload) => {
                self.fail("pull", payload);
                Frame::Eof
            }
        }
    }

    fn last_frame(&self) -> Frame {
        if self.failed {
            return Frame::Empty;
        }
        catch_unwind(AssertUnwindSafe(|| self.inner.last_frame())).unwrap_or_else(|_| {
            debug!(producer = %self.name, "last_frame panicked");
            Frame::Empty
        })
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn rewind(&mut self) -> bool {
        if self.failed {
            return false;
        }
        let inner = &mut self.inner;
        match catch_unwind(AssertUnwindSafe(|| inner.rewind())) {
            Ok(rewound) => rewound,
            Err(payload) => {
                self.fail("rewind", payload);
                false
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Producers with a fixed script, shared by the combinator tests.
#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;

    use super::*;
    use crate::audio::ChannelLayout;
    use crate::frame::PixelFormatDesc;

    /// A real 1x1 frame with one sample frame of stereo audio
    pub fn real_frame(value: u8) -> Frame {
        Frame::new(
            FrameTag::unique(),
            PixelFormatDesc::bgra(1, 1),
            vec![Bytes::from(vec![value; 4])],
            AudioBuffer::new(vec![i32::from(value); 2], ChannelLayout::stereo()),
        )
    }

    /// Replays a list of frames, then eof. Rewinds to the start.
    pub struct Scripted {
        name: String,
        script: Vec<Frame>,
        queue: VecDeque<Frame>,
        last: Frame,
    }

    impl Scripted {
        pub fn new(name: &str, script: Vec<Frame>) -> Self {
            Self {
                name: name.to_string(),
                queue: script.iter().cloned().collect(),
                script,
                last: Frame::Empty,
            }
        }

        pub fn boxed(name: &str, script: Vec<Frame>) -> Box<dyn FrameProducer> {
            Box::new(Self::new(name, script))
        }
    }

    impl FrameProducer for Scripted {
        fn pull(&mut self, _hints: FrameHints) -> Frame {
            let frame = self.queue.pop_front().unwrap_or(Frame::Eof);
            if frame.is_ready() {
                self.last = frame.clone();
            }
            frame
        }

        fn last_frame(&self) -> Frame {
            self.last.clone()
        }

        fn name(&self) -> String {
            self.name.clone()
        }

        fn rewind(&mut self) -> bool {
            self.queue = self.script.iter().cloned().collect();
            true
        }
    }

    pub struct Panicking;

    impl FrameProducer for Panicking {
        fn pull(&mut self, _hints: FrameHints) -> Frame {
            panic!("decoder exploded")
        }

        fn last_frame(&self) -> Frame {
            Frame::Empty
        }

        fn name(&self) -> String {
            "panicking".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{real_frame, Panicking, Scripted};
    use super::*;
    use crate::audio::ChannelLayout;
    use crate::format::VideoFormatDesc;

    #[test]
    fn hints_combine() {
        let hints = FrameHints::NONE | FrameHints::ALPHA_ONLY;
        assert!(hints.contains(FrameHints::ALPHA_ONLY));
        assert!(!FrameHints::NONE.contains(FrameHints::ALPHA_ONLY));
    }

    #[test]
    fn guard_latches_eof_after_panic() {
        let mut guarded = GuardedProducer::new(Box::new(Panicking));

        assert!(guarded.pull(FrameHints::NONE).is_eof());
        assert!(guarded.has_failed());
        assert!(guarded.pull(FrameHints::NONE).is_eof());
        assert!(guarded.last_frame().is_empty());
        assert!(!guarded.rewind());
    }

    #[test]
    fn guard_is_transparent_for_healthy_producers() {
        let frame = real_frame(3);
        let mut guarded = GuardedProducer::new(Scripted::boxed("a", vec![frame.clone()]));

        assert!(guarded.pull(FrameHints::NONE).same_as(&frame));
        assert!(guarded.last_frame().same_as(&frame));
        assert!(guarded.pull(FrameHints::NONE).is_eof());
        assert_eq!(guarded.name(), "a");
    }

    #[test]
    fn color_producer_follows_cadence_and_limit() {
        let format = ChannelFormat::new(
            VideoFormatDesc::from_name("1080p5994").unwrap(),
            ChannelLayout::stereo(),
        );
        let mut color = ColorProducer::new([0, 0, 255, 255], &format).take(3);
        assert_eq!(color.name(), "color[#FFFF0000]");

        let frames: Vec<_> = (0..3).map(|_| color.pull(FrameHints::NONE)).collect();
        let samples: Vec<_> = frames
            .iter()
            .map(|f| f.data().unwrap().audio().sample_frames())
            .collect();
        assert_eq!(samples, vec![801, 800, 801]);
        assert_eq!(frames[0].data().unwrap().planes()[0].len(), format.video.image_size());
        assert!(color.last_frame().same_as(&frames[2]));

        assert!(color.pull(FrameHints::NONE).is_eof());
        assert!(color.rewind());
        assert!(color.pull(FrameHints::NONE).is_ready());
    }
}
