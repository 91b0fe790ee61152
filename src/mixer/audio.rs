//! Sums the audio of every layer into one buffer in the channel layout.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::audio::{AudioBuffer, AudioChannelRemapper, ChannelLayout, MixConfigRepository};
use crate::format::ChannelFormat;

struct Item {
    volume: f64,
    audio: AudioBuffer,
}

/// Accumulates layer audio for one tick, then mixes it.
///
/// Every mixed buffer has exactly the sample count the video format's cadence
/// asks for at that tick; shorter layers are padded with silence and longer
/// ones truncated.
pub struct AudioMixer {
    master_volume: f64,
    mix_configs: Arc<MixConfigRepository>,
    remappers: HashMap<ChannelLayout, AudioChannelRemapper>,
    output_layout: Option<ChannelLayout>,
    items: Vec<Item>,
    tick: u64,
}

impl AudioMixer {
    pub fn new(mix_configs: Arc<MixConfigRepository>) -> Self {
        Self {
            master_volume: 1.0,
            mix_configs,
            remappers: HashMap::new(),
            output_layout: None,
            items: Vec::new(),
            tick: 0,
        }
    }

    pub fn master_volume(&self) -> f64 {
        self.master_volume
    }

    pub fn set_master_volume(&mut self, volume: f64) {
        self.master_volume = volume.max(0.0);
    }

    /// Queue one layer's audio for the next [`mix`](Self::mix)
    pub fn push(&mut self, volume: f64, audio: &AudioBuffer) {
        if audio.is_empty() || !audio.layout().is_valid() || volume == 0.0 {
            return;
        }
        self.items.push(Item {
            volume,
            audio: audio.clone(),
        });
    }

    pub fn mix(&mut self, format: &ChannelFormat) -> AudioBuffer {
        let layout = &format.channel_layout;
        if self.output_layout.as_ref() != Some(layout) {
            trace!("audio mixer output layout is now {}", layout);
            self.remappers.clear();
            self.output_layout = Some(layout.clone());
        }

        let sample_frames = format.video.audio_samples_for_tick(self.tick);
        self.tick += 1;

        let mut acc = vec![0i64; sample_frames * layout.num_channels()];
        for item in std::mem::take(&mut self.items) {
            let Some(remapped) = self.remap(&item.audio, layout) else {
                continue;
            };
            let gain = item.volume * self.master_volume;
            for (sum, &sample) in acc.iter_mut().zip(remapped.samples()) {
                *sum += (f64::from(sample) * gain).round() as i64;
            }
        }

        let samples: Vec<i32> = acc
            .into_iter()
            .map(|sum| sum.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32)
            .collect();
        AudioBuffer::new(samples, layout.clone())
    }

    fn remap(&mut self, audio: &AudioBuffer, output: &ChannelLayout) -> Option<AudioBuffer> {
        let input = audio.layout();
        if !self.remappers.contains_key(input) {
            match AudioChannelRemapper::new(input.clone(), output.clone(), Some(self.mix_configs.as_ref())) {
                Ok(remapper) => {
                    self.remappers.insert(input.clone(), remapper);
                }
                Err(e) => {
                    warn!("dropping audio in layout {}: {}", input, e);
                    return None;
                }
            }
        }
        self.remappers
            .get(input)
            .map(|remapper| remapper.mix_and_rearrange(audio))
    }
}
