pub mod audio;
pub mod channel;
pub mod concurrency;
pub mod error;
pub mod format;
pub mod frame;
pub mod mixer;
pub mod producer;
pub mod settings;

pub use channel::VideoChannel;
pub use error::{Error, Result};
pub use format::{ChannelFormat, VideoFormatDesc};
pub use frame::{Frame, FrameTag, FrameTransform};
pub use producer::{FrameHints, FrameProducer};
pub use settings::Config;
