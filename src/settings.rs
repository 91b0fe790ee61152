//! Runtime configuration.
//!
//! Layered: an optional TOML file, then `PLAYOUT_*` environment variables
//! (`PLAYOUT_PIPELINE__RUN_SECONDS=10`). Anything left unset takes the
//! built-in default.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::audio::{ChannelLayout, ChannelLayoutRepository, MixConfigRepository};
use crate::concurrency::executor::DEFAULT_CAPACITY;
use crate::error::{Error, Result};
use crate::format::{ChannelFormat, VideoFormatDesc};
use crate::mixer::PIPELINE_DEPTH;

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub channels: Vec<ChannelConfig>,
    pub audio: AudioConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Name from the video format table, e.g. `1080i5000`
    pub video_mode: String,
    /// Name of a registered channel layout
    pub channel_layout: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Registered on top of the built-in layouts
    #[serde(default)]
    pub channel_layouts: Vec<ChannelLayoutConfig>,
    #[serde(default)]
    pub mix_configs: Vec<MixConfigEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelLayoutConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub num_channels: usize,
    /// Space separated channel labels
    #[serde(default)]
    pub channel_order: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixConfigEntry {
    /// Source layout type
    pub from: String,
    /// Comma separated target layout types
    pub to: String,
    pub mix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Queue depth of each channel executor
    pub executor_capacity: usize,
    pub mixer_depth: usize,
    /// Image renders that may be queued or running per channel
    pub image_mixer_in_flight: usize,
    /// Stop the binary after this many seconds; 0 runs until interrupted
    pub run_seconds: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            executor_capacity: DEFAULT_CAPACITY,
            mixer_depth: PIPELINE_DEPTH,
            image_mixer_in_flight: 2,
            run_seconds: 0,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channels: vec![
                ChannelConfig {
                    video_mode: "720p5000".into(),
                    channel_layout: "stereo".into(),
                },
                ChannelConfig {
                    video_mode: "720p2500".into(),
                    channel_layout: "stereo".into(),
                },
            ],
            audio: AudioConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            debug!("Loading configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }

        let config: Config = builder
            .add_source(
                config::Environment::with_prefix("PLAYOUT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let pipeline = &self.pipeline;
        if pipeline.executor_capacity == 0 {
            return Err(Error::InvalidArgument("pipeline.executor_capacity must be at least 1".into()));
        }
        if pipeline.mixer_depth == 0 {
            return Err(Error::InvalidArgument("pipeline.mixer_depth must be at least 1".into()));
        }
        if pipeline.image_mixer_in_flight == 0 {
            return Err(Error::InvalidArgument(
                "pipeline.image_mixer_in_flight must be at least 1".into(),
            ));
        }
        for channel in &self.channels {
            VideoFormatDesc::from_name(&channel.video_mode)?;
        }
        Ok(())
    }

    /// Built-in layouts plus the configured ones
    pub fn layout_repository(&self) -> Result<ChannelLayoutRepository> {
        let repo = ChannelLayoutRepository::with_defaults()?;
        for layout in &self.audio.channel_layouts {
            repo.register(
                &layout.name,
                ChannelLayout::new(layout.num_channels, &layout.kind, &layout.channel_order)?,
            );
        }
        Ok(repo)
    }

    /// Built-in mix expressions plus the configured ones
    pub fn mix_config_repository(&self) -> MixConfigRepository {
        let repo = MixConfigRepository::with_defaults();
        for entry in &self.audio.mix_configs {
            repo.register_csv(&entry.from, &entry.to, &entry.mix);
        }
        repo
    }
}

impl ChannelConfig {
    pub fn format(&self, layouts: &ChannelLayoutRepository) -> Result<ChannelFormat> {
        Ok(ChannelFormat::new(
            VideoFormatDesc::from_name(&self.video_mode)?,
            layouts.resolve(&self.channel_layout)?,
        ))
    }
}
