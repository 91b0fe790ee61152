//! Fill and key delivered by two producers, combined into one frame.

use tracing::trace;

use super::{FrameHints, FrameProducer};
use crate::frame::Frame;

/// Pairs a color producer with a matte producer.
///
/// Both sides are pulled in parallel. A side that already holds a frame is
/// not pulled again until the pair has been emitted, so the two halves of
/// one composite always come from the same tick.
pub struct SeparatedProducer {
    fill: Box<dyn FrameProducer>,
    key: Box<dyn FrameProducer>,
    fill_frame: Frame,
    key_frame: Frame,
    last: Frame,
}

impl SeparatedProducer {
    pub fn new(fill: Box<dyn FrameProducer>, key: Box<dyn FrameProducer>) -> Self {
        Self {
            fill,
            key,
            fill_frame: Frame::Late,
            key_frame: Frame::Late,
            last: Frame::Empty,
        }
    }
}

impl FrameProducer for SeparatedProducer {
    fn pull(&mut self, hints: FrameHints) -> Frame {
        let Self {
            fill,
            key,
            fill_frame,
            key_frame,
            ..
        } = self;

        rayon::join(
            || {
                if fill_frame.is_late() {
                    *fill_frame = fill.pull(hints);
                }
            },
            || {
                if key_frame.is_late() {
                    *key_frame = key.pull(hints | FrameHints::ALPHA_ONLY);
                }
            },
        );

        if self.fill_frame.is_eof() || self.key_frame.is_eof() {
            return Frame::Eof;
        }

        if self.fill_frame.is_late() || self.key_frame.is_late() {
            trace!(
                fill_late = self.fill_frame.is_late(),
                key_late = self.key_frame.is_late(),
                "separated pair incomplete"
            );
            metrics::counter!("playout_separated_late_ticks_total").increment(1);
            return Frame::Late;
        }

        let frame = Frame::fill_and_key(&self.fill_frame, &self.key_frame);
        self.fill_frame = Frame::Late;
        self.key_frame = Frame::Late;

        if frame.is_ready() {
            self.last = frame.clone();
        }
        frame
    }

    fn last_frame(&self) -> Frame {
        self.last.clone()
    }

    fn name(&self) -> String {
        format!("separated[{}|{}]", self.fill.name(), self.key.name())
    }

    fn rewind(&mut self) -> bool {
        let rewound = self.fill.rewind() && self.key.rewind();
        self.fill_frame = Frame::Late;
        self.key_frame = Frame::Late;
        rewound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::testing::{real_frame, Scripted};

    fn children(frame: &Frame) -> Vec<Frame> {
        frame.data().unwrap().children().to_vec()
    }

    #[test]
    fn pairs_only_frames_of_the_same_tick() {
        let fills = vec![real_frame(1), real_frame(2)];
        let keys = vec![real_frame(10), real_frame(20)];
        // Key is late on its first pull.
        let mut separated = SeparatedProducer::new(
            Scripted::boxed("fill", fills.clone()),
            Scripted::boxed("key", vec![Frame::Late, keys[0].clone(), keys[1].clone()]),
        );

        assert!(separated.pull(FrameHints::NONE).is_late());

        let first = separated.pull(FrameHints::NONE);
        let parts = children(&first);
        assert_eq!(parts.len(), 2);
        assert!(parts[0].data().unwrap().transform().is_key);
        assert_eq!(parts[0].tag(), keys[0].tag());
        assert!(parts[1].same_as(&fills[0]));

        let second = separated.pull(FrameHints::NONE);
        let parts = children(&second);
        assert_eq!(parts[0].tag(), keys[1].tag());
        assert!(parts[1].same_as(&fills[1]));

        assert!(separated.last_frame().same_as(&second));
    }

    #[test]
    fn pending_side_is_not_pulled_again() {
        let fill = real_frame(1);
        let mut separated = SeparatedProducer::new(
            Scripted::boxed("fill", vec![fill.clone(), real_frame(2)]),
            Scripted::boxed("key", vec![Frame::Late, Frame::Late, real_frame(9)]),
        );

        assert!(separated.pull(FrameHints::NONE).is_late());
        assert!(separated.pull(FrameHints::NONE).is_late());
        let frame = separated.pull(FrameHints::NONE);
        assert!(children(&frame)[1].same_as(&fill));
    }

    #[test]
    fn eof_on_either_side_ends_the_pair() {
        let mut separated = SeparatedProducer::new(
            Scripted::boxed("fill", vec![real_frame(1), real_frame(2)]),
            Scripted::boxed("key", vec![real_frame(9)]),
        );

        assert!(separated.pull(FrameHints::NONE).is_ready());
        assert!(separated.pull(FrameHints::NONE).is_eof());
    }

    #[test]
    fn empty_side_yields_empty() {
        let mut separated = SeparatedProducer::new(
            Scripted::boxed("fill", vec![Frame::Empty]),
            Scripted::boxed("key", vec![real_frame(9)]),
        );

        assert!(separated.pull(FrameHints::NONE).is_empty());
        assert!(separated.last_frame().is_empty());
    }
}
