pub mod buffer;
pub mod expr;
pub mod layout;
pub mod mix_config;
pub mod remapper;

pub use buffer::AudioBuffer;
pub use layout::{ChannelLayout, ChannelLayoutRepository};
pub use mix_config::MixConfigRepository;
pub use remapper::AudioChannelRemapper;
