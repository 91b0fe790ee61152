//! Forwarding one channel's output into another channel as a layer.
//!
//! The sink side is fed from the source channel's tick, the producer side
//! is pulled by the destination channel's tick. They meet in a single slot
//! that always holds the newest frame.
//!
//! Source frames that never reach the destination are counted one of two
//! ways: `skipped` when the destination rate had no tick for them anyway,
//! `dropped` when it did but a newer frame replaced them first.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use crossbeam::queue::ArrayQueue;
use crossbeam::utils::CachePadded;
use tracing::{debug, trace};

use super::{FrameHints, FrameProducer};
use crate::format::{ChannelFormat, VideoFormatDesc};
use crate::frame::{Frame, FrameTag};

#[derive(Default)]
struct Stats {
    pushed: AtomicU64,
    dropped: AtomicU64,
    skipped: AtomicU64,
    late: AtomicU64,
    delivered: AtomicU64,
}

/// Snapshot of a reroute's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RerouteStats {
    pub pushed: u64,
    /// Lost to a stall on either side
    pub dropped: u64,
    /// Left out to match the destination rate
    pub skipped: u64,
    /// Pulls that found nothing new
    pub late: u64,
    pub delivered: u64,
}

struct Shared {
    name: String,
    /// Source sequence number and frame
    pending: ArrayQueue<(u64, Frame)>,
    source: ArcSwap<ChannelFormat>,
    stats: CachePadded<Stats>,
}

impl Shared {
    fn stats(&self) -> RerouteStats {
        RerouteStats {
            pushed: self.stats.pushed.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            skipped: self.stats.skipped.load(Ordering::Relaxed),
            late: self.stats.late.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
        }
    }
}

/// Push side of a reroute. Never blocks.
#[derive(Clone)]
pub struct RerouteSink {
    shared: Arc<Shared>,
}

impl RerouteSink {
    /// Tell the reroute what the source channel now runs at
    pub fn initialize(&self, source: &ChannelFormat) {
        debug!("{}: source format {}", self.shared.name, source.video);
        self.shared.source.store(Arc::new(source.clone()));
    }

    /// Offer the source channel's newest output.
    ///
    /// Sentinels are ignored. A frame already waiting is replaced; the
    /// producer accounts for it on its next pull.
    pub fn on_next(&self, frame: &Frame) {
        if !frame.is_ready() {
            return;
        }

        let seq = self.shared.stats.pushed.fetch_add(1, Ordering::Relaxed) + 1;
        if self.shared.pending.force_push((seq, frame.clone())).is_some() {
            trace!("{}: pending frame superseded by seq {}", self.shared.name, seq);
        }
    }

    pub fn stats(&self) -> RerouteStats {
        self.shared.stats()
    }
}

/// Pull side of a reroute, loaded as a layer of the destination channel.
///
/// Source frames are resampled to the destination rate on a nearest-tick
/// basis: a source at half the destination rate has every frame shown twice,
/// a source at twice the rate has every other frame skipped, and other
/// ratios drift by a phase accumulator. Frames displaced in the pending slot
/// count toward the phase, so drops and decimation never stack.
pub struct RerouteProducer {
    shared: Arc<Shared>,
    destination: Arc<ArcSwap<ChannelFormat>>,
    buffer: VecDeque<Frame>,
    /// Sequence number of the last frame taken from the slot
    taken: u64,
    credit: u64,
    last: Frame,
}

impl RerouteProducer {
    pub fn new(
        name: impl Into<String>,
        source: &ChannelFormat,
        destination: Arc<ArcSwap<ChannelFormat>>,
    ) -> Self {
        let shared = Arc::new(Shared {
            name: name.into(),
            pending: ArrayQueue::new(1),
            source: ArcSwap::from_pointee(source.clone()),
            stats: CachePadded::new(Stats::default()),
        });
        let (_, unit) = rate_ratio(&source.video, &destination.load().video);

        Self {
            shared,
            destination,
            buffer: VecDeque::new(),
            taken: 0,
            credit: unit / 2,
            last: Frame::Empty,
        }
    }

    pub fn sink(&self) -> RerouteSink {
        RerouteSink {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn stats(&self) -> RerouteStats {
        self.shared.stats()
    }

    fn late(&self) -> Frame {
        self.shared.stats.late.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("playout_reroute_late_frames_total", "route" => self.shared.name.clone())
            .increment(1);
        Frame::Late
    }

    fn deliver(&mut self, frame: Frame) -> Frame {
        self.shared.stats.delivered.fetch_add(1, Ordering::Relaxed);
        self.last = frame.clone();
        frame
    }

    /// Queue the copies `frame` is owed at the destination rate and account
    /// for the source frames it superseded.
    fn resample(&mut self, seq: u64, frame: Frame) {
        let (gain, unit) = rate_ratio(&self.shared.source.load().video, &self.destination.load().video);
        let elapsed = seq.saturating_sub(self.taken).max(1);
        self.taken = seq;

        let max_copies = gain.div_ceil(unit).max(1);
        let credit = self.credit.saturating_add(gain.saturating_mul(elapsed));
        let owed = credit / unit;
        let copies = owed.min(max_copies);
        self.credit = (credit - copies * unit).min(unit - 1);

        for n in 0..copies {
            // Only the first copy carries audio; repeats would double it.
            let copy = if n == 0 {
                frame.retag(FrameTag::unique())
            } else {
                frame.without_audio().retag(FrameTag::unique())
            };
            self.buffer.push_back(copy);
        }

        // Source frames in this span the destination had a tick for
        let wanted = owed.div_ceil(max_copies).min(elapsed);
        let dropped = wanted.saturating_sub(1);
        let skipped = elapsed - wanted;

        let stats = &self.shared.stats;
        if dropped > 0 {
            stats.dropped.fetch_add(dropped, Ordering::Relaxed);
            metrics::counter!("playout_reroute_dropped_frames_total", "route" => self.shared.name.clone())
                .increment(dropped);
            trace!("{}: {} frames lost before seq {}", self.shared.name, dropped, seq);
        }
        if skipped > 0 {
            stats.skipped.fetch_add(skipped, Ordering::Relaxed);
            metrics::counter!("playout_reroute_skipped_frames_total", "route" => self.shared.name.clone())
                .increment(skipped);
        }
    }
}

impl FrameProducer for RerouteProducer {
    fn pull(&mut self, _hints: FrameHints) -> Frame {
        if let Some(frame) = self.buffer.pop_front() {
            return self.deliver(frame);
        }

        // The slot holds at most one frame, so one skipped frame ends the tick.
        let Some((seq, frame)) = self.shared.pending.pop() else {
            return self.late();
        };
        if !frame.has_image() {
            return self.late();
        }

        self.resample(seq, frame);
        match self.buffer.pop_front() {
            Some(frame) => self.deliver(frame),
            // Skipped for rate; not a stall.
            None => Frame::Late,
        }
    }

    fn last_frame(&self) -> Frame {
        self.last.clone()
    }

    fn name(&self) -> String {
        self.shared.name.clone()
    }
}

/// `(gain, unit)` with `gain / unit == destination fps / source fps`
fn rate_ratio(source: &VideoFormatDesc, destination: &VideoFormatDesc) -> (u64, u64) {
    let gain = u64::from(destination.time_scale) * u64::from(source.duration);
    let unit = u64::from(source.time_scale) * u64::from(destination.duration);
    (gain.max(1), unit.max(1))
}
