//! One output channel: its format, its layers and the threads that drive them.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, trace, warn};

use crate::audio::MixConfigRepository;
use crate::concurrency::{Deferred, Executor, Priority};
use crate::error::Result;
use crate::format::ChannelFormat;
use crate::frame::{Frame, FrameTransform};
use crate::mixer::{CpuImageMixer, Mixer};
use crate::producer::{FrameHints, FrameProducer, GuardedProducer, RerouteProducer, RerouteSink};
use crate::settings::PipelineConfig;

struct Layer {
    producer: GuardedProducer,
    ended: bool,
}

impl Layer {
    fn new(producer: Box<dyn FrameProducer>) -> Self {
        Self {
            producer: GuardedProducer::new(producer),
            ended: false,
        }
    }

    /// This tick's frame: late repeats the last frame silently, eof is empty.
    fn receive(&mut self, index: i32) -> Frame {
        match self.producer.pull(FrameHints::NONE) {
            Frame::Late => {
                trace!("layer {} late; freezing", index);
                self.producer.last_frame().without_audio()
            }
            Frame::Eof => {
                if !self.ended {
                    debug!("layer {} ({}) ended", index, self.producer.name());
                    self.ended = true;
                }
                Frame::Empty
            }
            frame => frame,
        }
    }
}

/// State confined to the execution executor
struct Stage {
    layers: BTreeMap<i32, Layer>,
    mixer: Mixer,
    outputs: Vec<RerouteSink>,
}

impl Stage {
    fn tick(&mut self, format: &ChannelFormat) -> Frame {
        let frames: BTreeMap<i32, Frame> = self
            .layers
            .iter_mut()
            .map(|(&index, layer)| (index, layer.receive(index)))
            .collect();

        let frame = self.mixer.composite(&frames, format);
        for output in &self.outputs {
            output.on_next(&frame);
        }
        frame
    }
}

/// A video channel.
///
/// Every mutation and every tick runs on the channel's execution executor,
/// in submission order. Producers that are replaced or cleared are dropped
/// on a separate low-priority executor so teardown never delays a tick.
pub struct VideoChannel {
    index: usize,
    format: Arc<ArcSwap<ChannelFormat>>,
    stage: Arc<Mutex<Stage>>,
    executor: Executor,
    destroyer: Arc<Executor>,
}

impl VideoChannel {
    #[instrument(skip_all, fields(channel = index, format = %format.video))]
    pub fn new(
        index: usize,
        format: ChannelFormat,
        mix_configs: Arc<MixConfigRepository>,
        pipeline: &PipelineConfig,
    ) -> Result<Self> {
        let name = format!("channel[{index}]");
        let image = CpuImageMixer::new(&name, pipeline.image_mixer_in_flight)?;
        let mixer = Mixer::new(name.clone(), Box::new(image), mix_configs)
            .with_depth(pipeline.mixer_depth)?;

        let executor = Executor::with_capacity(
            format!("{name} execution"),
            Priority::AboveNormal,
            pipeline.executor_capacity,
        )?;
        let destroyer = Executor::with_capacity(
            format!("{name} destruction"),
            Priority::BelowNormal,
            pipeline.executor_capacity,
        )?;

        info!("{} initialized", name);

        Ok(Self {
            index,
            format: Arc::new(ArcSwap::from_pointee(format)),
            stage: Arc::new(Mutex::new(Stage {
                layers: BTreeMap::new(),
                mixer,
                outputs: Vec::new(),
            })),
            executor,
            destroyer: Arc::new(destroyer),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn format(&self) -> ChannelFormat {
        ChannelFormat::clone(&self.format.load())
    }

    /// Shared view of the format, for producers that must follow changes
    pub fn format_handle(&self) -> Arc<ArcSwap<ChannelFormat>> {
        Arc::clone(&self.format)
    }

    pub fn set_format(&self, format: ChannelFormat) -> Result<()> {
        let stage = Arc::clone(&self.stage);
        let current = Arc::clone(&self.format);
        self.executor.invoke(move || {
            info!("format changed to {}", format.video);
            for output in &stage.lock().outputs {
                output.initialize(&format);
            }
            current.store(Arc::new(format));
        })
    }

    /// Produce one output frame. Resolves once the tick has run.
    pub fn tick(&self) -> Result<Deferred<Frame>> {
        let stage = Arc::clone(&self.stage);
        let format = Arc::clone(&self.format);
        self.executor
            .begin_invoke(move || stage.lock().tick(&format.load()))
    }

    /// Put `producer` on `layer`, replacing whatever was there
    pub fn load(&self, layer: i32, producer: Box<dyn FrameProducer>) -> Result<()> {
        let stage = Arc::clone(&self.stage);
        let destroyer = Arc::clone(&self.destroyer);
        self.executor.invoke(move || {
            debug!("layer {}: load {}", layer, producer.name());
            if let Some(old) = stage.lock().layers.insert(layer, Layer::new(producer)) {
                destroy(&destroyer, old);
            }
        })
    }

    pub fn clear_layer(&self, layer: i32) -> Result<()> {
        let stage = Arc::clone(&self.stage);
        let destroyer = Arc::clone(&self.destroyer);
        self.executor.invoke(move || {
            if let Some(old) = stage.lock().layers.remove(&layer) {
                debug!("layer {}: cleared", layer);
                destroy(&destroyer, old);
            }
        })
    }

    pub fn clear(&self) -> Result<()> {
        let stage = Arc::clone(&self.stage);
        let destroyer = Arc::clone(&self.destroyer);
        self.executor.invoke(move || {
            let layers = std::mem::take(&mut stage.lock().layers);
            for (_, old) in layers {
                destroy(&destroyer, old);
            }
        })
    }

    /// Exchange the contents of two layers; an empty side moves the other.
    pub fn swap_layers(&self, a: i32, b: i32) -> Result<()> {
        let stage = Arc::clone(&self.stage);
        self.executor.invoke(move || {
            let mut stage = stage.lock();
            let first = stage.layers.remove(&a);
            let second = stage.layers.remove(&b);
            if let Some(layer) = first {
                stage.layers.insert(b, layer);
            }
            if let Some(layer) = second {
                stage.layers.insert(a, layer);
            }
        })
    }

    /// Name of the producer on each occupied layer
    pub fn layers(&self) -> Result<BTreeMap<i32, String>> {
        let stage = Arc::clone(&self.stage);
        self.executor.invoke(move || {
            stage
                .lock()
                .layers
                .iter()
                .map(|(&index, layer)| (index, layer.producer.name()))
                .collect()
        })
    }

    pub fn master_volume(&self) -> Result<f64> {
        let stage = Arc::clone(&self.stage);
        self.executor.invoke(move || stage.lock().mixer.master_volume())
    }

    pub fn set_master_volume(&self, volume: f64) -> Result<()> {
        let stage = Arc::clone(&self.stage);
        self.executor
            .invoke(move || stage.lock().mixer.set_master_volume(volume))
    }

    /// Transform applied to whatever is on `layer`, now and after reloads
    pub fn layer_transform(&self, layer: i32) -> Result<FrameTransform> {
        let stage = Arc::clone(&self.stage);
        self.executor
            .invoke(move || stage.lock().mixer.layer_transform(layer))
    }

    pub fn set_layer_transform(&self, layer: i32, transform: FrameTransform) -> Result<()> {
        let stage = Arc::clone(&self.stage);
        self.executor
            .invoke(move || stage.lock().mixer.set_layer_transform(layer, transform))
    }

    /// Transform applied on top of every layer
    pub fn set_root_transform(&self, transform: FrameTransform) -> Result<()> {
        let stage = Arc::clone(&self.stage);
        self.executor
            .invoke(move || stage.lock().mixer.set_root_transform(transform))
    }

    pub fn clear_transforms(&self) -> Result<()> {
        let stage = Arc::clone(&self.stage);
        self.executor.invoke(move || stage.lock().mixer.clear_transforms())
    }

    /// Feed every future output frame of this channel into `sink`
    pub fn attach_reroute(&self, sink: RerouteSink) -> Result<()> {
        let stage = Arc::clone(&self.stage);
        let format = Arc::clone(&self.format);
        self.executor.invoke(move || {
            sink.initialize(&format.load());
            stage.lock().outputs.push(sink);
        })
    }

    /// A producer showing this channel's output inside `destination`.
    ///
    /// The returned producer is already attached; load it on a layer of
    /// the destination channel.
    pub fn reroute_to(&self, destination: &VideoChannel) -> Result<RerouteProducer> {
        let producer = RerouteProducer::new(
            format!("reroute[{}->{}]", self.index, destination.index),
            &self.format(),
            destination.format_handle(),
        );
        self.attach_reroute(producer.sink())?;
        Ok(producer)
    }
}

impl Drop for VideoChannel {
    fn drop(&mut self) {
        debug!("channel[{}] shutting down", self.index);
        if let Err(e) = self.clear() {
            warn!("channel[{}] could not clear layers: {}", self.index, e);
        }
    }
}

fn destroy(destroyer: &Executor, layer: Layer) {
    let name = layer.producer.name();
    if let Err(e) = destroyer.begin_invoke(move || drop(layer)) {
        // The task, and with it the producer, was dropped on this thread.
        warn!("{} destroyed inline: {}", name, e);
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::audio::{AudioBuffer, ChannelLayout};
    use crate::format::VideoFormatDesc;
    use crate::frame::{FrameTag, PixelFormatDesc};
    use crate::producer::testing::Scripted;
    use crate::producer::ColorProducer;

    fn tiny(name: &'static str, time_scale: u32) -> ChannelFormat {
        ChannelFormat::new(
            VideoFormatDesc {
                name,
                width: 2,
                height: 2,
                field_count: 1,
                time_scale,
                duration: 1,
                audio_cadence: &[4],
            },
            ChannelLayout::stereo(),
        )
    }

    fn channel(index: usize, format: ChannelFormat) -> VideoChannel {
        let pipeline = PipelineConfig {
            mixer_depth: 1,
            ..PipelineConfig::default()
        };
        VideoChannel::new(
            index,
            format,
            Arc::new(MixConfigRepository::with_defaults()),
            &pipeline,
        )
        .unwrap()
    }

    fn tick(channel: &VideoChannel) -> Frame {
        channel.tick().unwrap().get().unwrap()
    }

    fn first_pixel(frame: &Frame) -> [u8; 4] {
        let image = &frame.data().unwrap().planes()[0];
        [image[0], image[1], image[2], image[3]]
    }

    fn solid(pixel: [u8; 4]) -> Frame {
        Frame::new(
            FrameTag::unique(),
            PixelFormatDesc::bgra(1, 1),
            vec![Bytes::from(pixel.to_vec())],
            AudioBuffer::new(vec![100, 100], ChannelLayout::stereo()),
        )
    }

    #[test]
    fn default_depth_primes_for_two_ticks() {
        let format = tiny("tiny", 25);
        let channel = VideoChannel::new(
            1,
            format.clone(),
            Arc::new(MixConfigRepository::with_defaults()),
            &PipelineConfig::default(),
        )
        .unwrap();
        channel
            .load(10, Box::new(ColorProducer::new([1, 2, 3, 255], &format)))
            .unwrap();

        assert!(tick(&channel).is_empty());
        assert!(tick(&channel).is_empty());
        assert_eq!(first_pixel(&tick(&channel)), [1, 2, 3, 255]);
    }

    #[test]
    fn layers_stack_by_index() {
        let channel = channel(1, tiny("tiny", 25));
        channel.load(20, Scripted::boxed("top", vec![solid([0, 0, 255, 255])])).unwrap();
        channel.load(10, Scripted::boxed("bottom", vec![solid([255, 0, 0, 255])])).unwrap();

        let frame = tick(&channel);
        assert_eq!(first_pixel(&frame), [0, 0, 255, 255]);
        assert_eq!(&frame.data().unwrap().audio().samples()[..2], &[200, 200]);

        let names: Vec<_> = channel.layers().unwrap().into_values().collect();
        assert_eq!(names, vec!["bottom".to_string(), "top".to_string()]);
    }

    #[test]
    fn late_layers_freeze_without_audio_and_eof_layers_go_empty() {
        let channel = channel(1, tiny("tiny", 25));
        let script = vec![solid([9, 9, 9, 255]), Frame::Late];
        channel.load(1, Scripted::boxed("stalls", script)).unwrap();

        let live = tick(&channel);
        assert_eq!(first_pixel(&live), [9, 9, 9, 255]);
        assert_eq!(live.data().unwrap().audio().samples()[0], 100);

        let frozen = tick(&channel);
        assert_eq!(first_pixel(&frozen), [9, 9, 9, 255]);
        assert_eq!(frozen.data().unwrap().audio().samples()[0], 0);

        let ended = tick(&channel);
        assert_eq!(first_pixel(&ended), [0, 0, 0, 0]);
    }

    #[test]
    fn swap_clear_and_volume_go_through_the_executor() {
        let channel = channel(1, tiny("tiny", 25));
        channel.load(1, Scripted::boxed("a", vec![])).unwrap();
        channel.swap_layers(1, 2).unwrap();
        assert_eq!(channel.layers().unwrap().keys().copied().collect::<Vec<_>>(), vec![2]);

        channel.set_master_volume(0.25).unwrap();
        assert_eq!(channel.master_volume().unwrap(), 0.25);

        channel.clear_layer(2).unwrap();
        assert!(channel.layers().unwrap().is_empty());
    }

    #[test]
    fn layer_transform_fades_and_mutes_the_layer() {
        let channel = channel(1, tiny("tiny", 25));
        let frames = vec![solid([200, 100, 50, 255]), solid([200, 100, 50, 255])];
        channel.load(3, Scripted::boxed("faded", frames)).unwrap();
        channel
            .set_layer_transform(
                3,
                FrameTransform {
                    opacity: 0.5,
                    volume: 0.0,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(channel.layer_transform(3).unwrap().opacity, 0.5);

        let faded = tick(&channel);
        assert_eq!(first_pixel(&faded), [100, 50, 25, 128]);
        assert!(faded.data().unwrap().audio().samples().iter().all(|&s| s == 0));

        channel.clear_transforms().unwrap();
        let restored = tick(&channel);
        assert_eq!(first_pixel(&restored), [200, 100, 50, 255]);
        assert_eq!(restored.data().unwrap().audio().samples()[0], 100);
    }

    #[test]
    fn reroute_carries_output_between_channels() {
        let source = channel(1, tiny("fast", 50));
        let destination = channel(2, tiny("slow", 25));

        source
            .load(1, Box::new(ColorProducer::new([7, 7, 7, 255], &source.format())))
            .unwrap();
        let reroute = source.reroute_to(&destination).unwrap();
        let stats = reroute.sink();
        destination.load(1, Box::new(reroute)).unwrap();

        tick(&source);
        tick(&source);
        let frame = tick(&destination);
        assert_eq!(first_pixel(&frame), [7, 7, 7, 255]);
        // Every other 50 fps frame is left out on purpose at 25 fps.
        assert_eq!(stats.stats().skipped, 1);
        assert_eq!(stats.stats().dropped, 0);
    }
}
