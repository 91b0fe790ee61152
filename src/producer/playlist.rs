//! Sequential playback of a list of producers.

use std::collections::VecDeque;

use flume::{Receiver, Sender};
use tracing::{debug, trace, warn};

use super::{FrameHints, FrameProducer};
use crate::concurrency::{Deferred, Promise};
use crate::error::{Error, Result};
use crate::frame::Frame;

/// Control-plane edits, applied at the start of the next pull
pub enum PlaylistCommand {
    PushFront(Box<dyn FrameProducer>),
    PushBack(Box<dyn FrameProducer>),
    PopFront,
    PopBack,
    Clear,
    /// Abandon the current item and move to the next one
    Next,
    Insert(usize, Box<dyn FrameProducer>),
    Remove(usize),
    SetLoop(bool),
    /// Names of the current item followed by the queued ones
    List(Promise<Vec<String>>),
}

/// Cloneable sender side of a playlist's command queue
#[derive(Clone)]
pub struct PlaylistHandle {
    tx: Sender<PlaylistCommand>,
}

impl PlaylistHandle {
    pub fn send(&self, command: PlaylistCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| Error::InvalidArgument("playlist has been dropped".to_string()))
    }

    pub fn push_back(&self, producer: Box<dyn FrameProducer>) -> Result<()> {
        self.send(PlaylistCommand::PushBack(producer))
    }

    pub fn push_front(&self, producer: Box<dyn FrameProducer>) -> Result<()> {
        self.send(PlaylistCommand::PushFront(producer))
    }

    pub fn next(&self) -> Result<()> {
        self.send(PlaylistCommand::Next)
    }

    pub fn clear(&self) -> Result<()> {
        self.send(PlaylistCommand::Clear)
    }

    pub fn set_loop(&self, enabled: bool) -> Result<()> {
        self.send(PlaylistCommand::SetLoop(enabled))
    }

    /// Resolves once the playlist has been pulled again
    pub fn list(&self) -> Result<Deferred<Vec<String>>> {
        let (promise, deferred) = Deferred::pair();
        self.send(PlaylistCommand::List(promise))?;
        Ok(deferred)
    }
}

/// Plays its items one after another, optionally looping.
///
/// An empty playlist reports eof without consuming anything, so a producer
/// pushed later starts playing on the next tick.
pub struct PlaylistProducer {
    current: Option<Box<dyn FrameProducer>>,
    queue: VecDeque<Box<dyn FrameProducer>>,
    looping: bool,
    last: Frame,
    commands: Receiver<PlaylistCommand>,
    handle: PlaylistHandle,
}

impl PlaylistProducer {
    pub fn new() -> Self {
        let (tx, commands) = flume::unbounded();
        Self {
            current: None,
            queue: VecDeque::new(),
            looping: false,
            last: Frame::Empty,
            commands,
            handle: PlaylistHandle { tx },
        }
    }

    pub fn handle(&self) -> PlaylistHandle {
        self.handle.clone()
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn set_loop(&mut self, enabled: bool) {
        self.looping = enabled;
    }

    /// Queued items, not counting the one playing
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.queue.is_empty()
    }

    pub fn push_front(&mut self, producer: Box<dyn FrameProducer>) {
        self.queue.push_front(producer);
    }

    pub fn push_back(&mut self, producer: Box<dyn FrameProducer>) {
        self.queue.push_back(producer);
    }

    pub fn pop_front(&mut self) -> Option<Box<dyn FrameProducer>> {
        self.queue.pop_front()
    }

    pub fn pop_back(&mut self) -> Option<Box<dyn FrameProducer>> {
        self.queue.pop_back()
    }

    /// Drop the current item and everything queued
    pub fn clear(&mut self) {
        self.current = None;
        self.queue.clear();
    }

    pub fn next(&mut self) {
        if let Some(current) = self.current.take() {
            self.retire(current);
        }
    }

    /// `index` counts queued items; `len()` appends.
    pub fn insert(&mut self, index: usize, producer: Box<dyn FrameProducer>) -> Result<()> {
        if index > self.queue.len() {
            return Err(Error::OutOfRange {
                index,
                len: self.queue.len(),
            });
        }
        self.queue.insert(index, producer);
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<Box<dyn FrameProducer>> {
        let len = self.queue.len();
        self.queue
            .remove(index)
            .ok_or(Error::OutOfRange { index, len })
    }

    pub fn list(&self) -> Vec<String> {
        self.current
            .iter()
            .chain(self.queue.iter())
            .map(|producer| producer.name())
            .collect()
    }

    fn apply(&mut self, command: PlaylistCommand) {
        match command {
            PlaylistCommand::PushFront(producer) => self.push_front(producer),
            PlaylistCommand::PushBack(producer) => self.push_back(producer),
            PlaylistCommand::PopFront => {
                self.pop_front();
            }
            PlaylistCommand::PopBack => {
                self.pop_back();
            }
            PlaylistCommand::Clear => self.clear(),
            PlaylistCommand::Next => self.next(),
            PlaylistCommand::Insert(index, producer) => {
                if let Err(e) = self.insert(index, producer) {
                    warn!("playlist insert ignored: {}", e);
                }
            }
            PlaylistCommand::Remove(index) => {
                if let Err(e) = self.remove(index) {
                    warn!("playlist remove ignored: {}", e);
                }
            }
            PlaylistCommand::SetLoop(enabled) => self.set_loop(enabled),
            PlaylistCommand::List(promise) => promise.fulfil(self.list()),
        }
    }

    /// Send a finished item to the tail when looping, otherwise release it.
    fn retire(&mut self, mut producer: Box<dyn FrameProducer>) {
        if self.looping && producer.rewind() {
            trace!("playlist: requeue {}", producer.name());
            self.queue.push_back(producer);
        } else {
            debug!("playlist: release {}", producer.name());
        }
    }
}

impl Default for PlaylistProducer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameProducer for PlaylistProducer {
    fn pull(&mut self, hints: FrameHints) -> Frame {
        while let Ok(command) = self.commands.try_recv() {
            self.apply(command);
        }

        let attempts = self.queue.len() + usize::from(self.current.is_some()) + 1;
        for _ in 0..attempts {
            let Some(mut producer) = self.current.take().or_else(|| self.queue.pop_front()) else {
                return Frame::Eof;
            };

            let frame = producer.pull(hints);
            if frame.is_eof() {
                self.retire(producer);
                continue;
            }

            self.current = Some(producer);
            if frame.is_ready() {
                self.last = frame.clone();
            }
            return frame;
        }

        // Looping over items that all ended without a single frame.
        trace!("playlist: nothing playable this tick");
        Frame::Empty
    }

    fn last_frame(&self) -> Frame {
        self.last.clone()
    }

    fn name(&self) -> String {
        let playing = self
            .current
            .as_ref()
            .map_or_else(|| "-".to_string(), |producer| producer.name());
        format!("playlist[{}+{}]", playing, self.queue.len())
    }

    fn rewind(&mut self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::testing::{real_frame, Scripted};

    fn script(name: &str, frames: &[Frame]) -> Box<dyn FrameProducer> {
        Scripted::boxed(name, frames.to_vec())
    }

    fn pull_n(playlist: &mut PlaylistProducer, n: usize) -> Vec<Frame> {
        (0..n).map(|_| playlist.pull(FrameHints::NONE)).collect()
    }

    fn assert_sequence(actual: &[Frame], expected: &[Frame]) {
        assert_eq!(actual.len(), expected.len());
        for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
            assert!(a.same_as(e), "frame {i}: got {a:?}, expected {e:?}");
        }
    }

    #[test]
    fn plays_items_in_order_then_eof() {
        let a: Vec<_> = (0..3).map(real_frame).collect();
        let b: Vec<_> = (3..5).map(real_frame).collect();

        let mut playlist = PlaylistProducer::new();
        playlist.push_back(script("a", &a));
        playlist.push_back(script("b", &b));

        let frames = pull_n(&mut playlist, 6);
        assert_sequence(&frames[..5], &[a.clone(), b.clone()].concat());
        assert!(frames[5].is_eof());
        assert!(playlist.last_frame().same_as(&b[1]));
        assert!(playlist.is_empty());
    }

    #[test]
    fn loop_preserves_order() {
        let a = real_frame(1);
        let b = real_frame(2);

        let mut playlist = PlaylistProducer::new();
        playlist.set_loop(true);
        playlist.push_back(script("a", &[a.clone()]));
        playlist.push_back(script("b", &[b.clone()]));

        let frames = pull_n(&mut playlist, 4);
        assert_sequence(&frames, &[a.clone(), b.clone(), a, b]);
    }

    #[test]
    fn late_does_not_advance() {
        let a = real_frame(1);
        let mut playlist = PlaylistProducer::new();
        playlist.push_back(script("a", &[Frame::Late, a.clone()]));

        assert!(playlist.pull(FrameHints::NONE).is_late());
        assert!(playlist.pull(FrameHints::NONE).same_as(&a));
    }

    #[test]
    fn empty_playlist_is_eof_until_fed() {
        let mut playlist = PlaylistProducer::new();
        assert!(playlist.pull(FrameHints::NONE).is_eof());

        let a = real_frame(1);
        playlist.handle().push_back(script("a", &[a.clone()])).unwrap();
        assert!(playlist.pull(FrameHints::NONE).same_as(&a));
    }

    #[test]
    fn looping_over_exhausted_items_terminates() {
        let mut playlist = PlaylistProducer::new();
        playlist.set_loop(true);
        playlist.push_back(script("x", &[]));
        playlist.push_back(script("y", &[]));

        assert!(playlist.pull(FrameHints::NONE).is_empty());
        assert_eq!(playlist.len(), 2);
    }

    #[test]
    fn handle_commands_apply_on_next_pull() {
        let a = real_frame(1);
        let b = real_frame(2);
        let c = real_frame(3);

        let mut playlist = PlaylistProducer::new();
        let handle = playlist.handle();
        playlist.push_back(script("a", &[a.clone(), a.clone()]));
        playlist.push_back(script("c", &[c.clone()]));

        assert!(playlist.pull(FrameHints::NONE).same_as(&a));

        handle
            .send(PlaylistCommand::Insert(0, script("b", &[b.clone()])))
            .unwrap();
        handle.next().unwrap();
        let names = handle.list().unwrap();

        assert!(playlist.pull(FrameHints::NONE).same_as(&b));
        assert_eq!(names.get().unwrap(), vec!["b".to_string(), "c".to_string()]);
        assert!(playlist.pull(FrameHints::NONE).same_as(&c));
    }

    #[test]
    fn out_of_range_edits_are_rejected() {
        let mut playlist = PlaylistProducer::new();
        playlist.push_back(script("a", &[]));

        assert!(matches!(
            playlist.insert(3, script("b", &[])),
            Err(Error::OutOfRange { index: 3, len: 1 })
        ));
        assert!(matches!(
            playlist.remove(1),
            Err(Error::OutOfRange { index: 1, len: 1 })
        ));
        assert_eq!(playlist.remove(0).unwrap().name(), "a");

        playlist.handle().send(PlaylistCommand::Remove(5)).unwrap();
        assert!(playlist.pull(FrameHints::NONE).is_eof());
    }
}
