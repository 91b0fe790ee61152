//! Output format descriptors.

use std::fmt;
use std::time::Duration;

use crate::audio::ChannelLayout;
use crate::error::{Error, Result};

pub const AUDIO_SAMPLE_RATE: u32 = 48_000;

/// Fixed properties of a named video mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFormatDesc {
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
    /// 2 for interlaced modes; a tick is then one field
    pub field_count: u32,
    pub time_scale: u32,
    pub duration: u32,
    /// Audio sample frames per tick, cycled
    pub audio_cadence: &'static [u32],
}

macro_rules! format_desc {
    ($name:literal, $fields:literal, $w:literal, $h:literal, $scale:literal, $dur:literal, [$($cadence:literal),+]) => {
        VideoFormatDesc {
            name: $name,
            width: $w,
            height: $h,
            field_count: $fields,
            time_scale: $scale,
            duration: $dur,
            audio_cadence: &[$($cadence),+],
        }
    };
}

static FORMATS: &[VideoFormatDesc] = &[
    format_desc!("PAL", 2, 720, 576, 50000, 1000, [960]),
    format_desc!("NTSC", 2, 720, 486, 60000, 1001, [801, 801, 801, 800, 801, 801, 801, 800, 801, 801]),
    format_desc!("576p2500", 1, 720, 576, 25000, 1000, [1920]),
    format_desc!("720p2398", 1, 1280, 720, 24000, 1001, [2002]),
    format_desc!("720p2400", 1, 1280, 720, 24000, 1000, [2000]),
    format_desc!("720p2500", 1, 1280, 720, 25000, 1000, [1920]),
    format_desc!("720p5000", 1, 1280, 720, 50000, 1000, [960]),
    format_desc!("720p2997", 1, 1280, 720, 30000, 1001, [1602, 1601, 1602, 1601, 1602]),
    format_desc!("720p5994", 1, 1280, 720, 60000, 1001, [801, 800, 801, 801, 801]),
    format_desc!("720p3000", 1, 1280, 720, 30000, 1000, [1600]),
    format_desc!("720p6000", 1, 1280, 720, 60000, 1000, [800]),
    format_desc!("1080p2398", 1, 1920, 1080, 24000, 1001, [2002]),
    format_desc!("1080p2400", 1, 1920, 1080, 24000, 1000, [2000]),
    format_desc!("1080i5000", 2, 1920, 1080, 50000, 1000, [960]),
    format_desc!("1080i5994", 2, 1920, 1080, 60000, 1001, [801, 801, 801, 800, 801, 801, 801, 800, 801, 801]),
    format_desc!("1080i6000", 2, 1920, 1080, 60000, 1000, [800]),
    format_desc!("1080p2500", 1, 1920, 1080, 25000, 1000, [1920]),
    format_desc!("1080p2997", 1, 1920, 1080, 30000, 1001, [1602, 1601, 1602, 1601, 1602]),
    format_desc!("1080p3000", 1, 1920, 1080, 30000, 1000, [1600]),
    format_desc!("1080p5000", 1, 1920, 1080, 50000, 1000, [960]),
    format_desc!("1080p5994", 1, 1920, 1080, 60000, 1001, [801, 800, 801, 801, 801]),
    format_desc!("1080p6000", 1, 1920, 1080, 60000, 1000, [800]),
    format_desc!("2160p2500", 1, 3840, 2160, 25000, 1000, [1920]),
    format_desc!("2160p5000", 1, 3840, 2160, 50000, 1000, [960]),
    format_desc!("2160p6000", 1, 3840, 2160, 60000, 1000, [800]),
];

impl VideoFormatDesc {
    /// Case-insensitive lookup of a named mode
    pub fn from_name(name: &str) -> Result<Self> {
        FORMATS
            .iter()
            .find(|desc| desc.name.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| Error::UnknownVideoFormat(name.to_string()))
    }

    pub fn all() -> &'static [VideoFormatDesc] {
        FORMATS
    }

    /// Ticks per second
    pub fn fps(&self) -> f64 {
        f64::from(self.time_scale) / f64::from(self.duration)
    }

    /// Time between ticks
    pub fn interval(&self) -> Duration {
        Duration::from_nanos(
            u64::from(self.duration) * 1_000_000_000 / u64::from(self.time_scale),
        )
    }

    /// Bytes of one packed BGRA image
    pub fn image_size(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }

    /// Audio sample frames for tick number `tick`
    pub fn audio_samples_for_tick(&self, tick: u64) -> usize {
        let index = (tick % self.audio_cadence.len() as u64) as usize;
        self.audio_cadence[index] as usize
    }
}

impl fmt::Display for VideoFormatDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Everything a channel's producers and mixer need to size their output
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelFormat {
    pub video: VideoFormatDesc,
    pub channel_layout: ChannelLayout,
}

impl ChannelFormat {
    pub fn new(video: VideoFormatDesc, channel_layout: ChannelLayout) -> Self {
        Self {
            video,
            channel_layout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let desc = VideoFormatDesc::from_name("1080I5000").unwrap();
        assert_eq!(desc.name, "1080i5000");
        assert_eq!(desc.fps(), 50.0);
        assert_eq!(desc.interval(), Duration::from_millis(20));
        assert!(matches!(
            VideoFormatDesc::from_name("999p1"),
            Err(Error::UnknownVideoFormat(_))
        ));
    }

    #[test]
    fn audio_cadence_cycles() {
        let ntsc = VideoFormatDesc::from_name("720p2997").unwrap();
        let total: usize = (0..5).map(|tick| ntsc.audio_samples_for_tick(tick)).sum();
        assert_eq!(total, 8008);
        assert_eq!(ntsc.audio_samples_for_tick(5), 1602);
    }
}
