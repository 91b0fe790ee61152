//! Named audio channel layouts.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Error, Result};

/// Characters reserved for the mix expression syntax
const RESERVED: &[char] = &['=', '<', '+', '*', '|'];

/// Channel count, layout type and the label of each channel position.
///
/// Cheap to clone; the label list is shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelLayout {
    num_channels: usize,
    kind: Arc<str>,
    channel_order: Arc<[String]>,
}

impl ChannelLayout {
    /// Build a layout from a space separated list of channel labels.
    ///
    /// The order may be shorter than `num_channels` (unlabelled trailing
    /// channels) but never longer.
    pub fn new(num_channels: usize, kind: &str, channel_order: &str) -> Result<Self> {
        if num_channels < 1 {
            return Err(Error::InvalidLayout(
                "num_channels cannot be less than 1".into(),
            ));
        }

        if channel_order.contains(RESERVED) {
            return Err(Error::InvalidLayout(format!(
                "{channel_order} contains illegal characters =<+*| reserved for mix config syntax"
            )));
        }

        let order: Vec<String> = channel_order
            .split_whitespace()
            .map(str::to_string)
            .collect();

        if order.len() > num_channels {
            return Err(Error::InvalidLayout(format!(
                "{channel_order} contains more than {num_channels} channels"
            )));
        }

        Ok(Self {
            num_channels,
            kind: Arc::from(kind.to_uppercase()),
            channel_order: Arc::from(order),
        })
    }

    /// Layout of buffers that carry no audio at all
    pub fn invalid() -> Self {
        Self {
            num_channels: 0,
            kind: Arc::from(""),
            channel_order: Arc::from(Vec::new()),
        }
    }

    pub fn stereo() -> Self {
        Self {
            num_channels: 2,
            kind: Arc::from("STEREO"),
            channel_order: Arc::from(vec!["FL".to_string(), "FR".to_string()]),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.num_channels > 0
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn channel_order(&self) -> &[String] {
        &self.channel_order
    }

    /// Every position labelled `name`
    pub fn indexes_of(&self, name: &str) -> Vec<usize> {
        self.channel_order
            .iter()
            .enumerate()
            .filter(|(_, label)| label.as_str() == name)
            .map(|(i, _)| i)
            .collect()
    }
}

impl fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[channel_layout] num_channels={} type={} channel_order={}",
            self.num_channels,
            self.kind,
            self.channel_order.join(" ")
        )
    }
}

/// Case-insensitive name → layout table
#[derive(Debug, Default)]
pub struct ChannelLayoutRepository {
    layouts: RwLock<HashMap<String, ChannelLayout>>,
}

impl ChannelLayoutRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository preloaded with the broadcast layouts every installation has
    pub fn with_defaults() -> Result<Self> {
        let repo = Self::new();
        for (name, kind, count, order) in [
            ("mono", "mono", 1, "FC"),
            ("stereo", "stereo", 2, "FL FR"),
            ("matrix", "matrix", 2, "ML MR"),
            ("film", "5.1", 6, "FL FR FC LFE BL BR"),
            ("smpte", "5.1", 6, "FL FR FC LFE BL BR"),
            ("ebu_r123_8a", "8ch", 8, "DL DR L R C LFE Ls Rs"),
            ("ebu_r123_8b", "8ch", 8, "L R C LFE Ls Rs DL DR"),
            ("8ch", "8ch", 8, ""),
            ("16ch", "16ch", 16, ""),
        ] {
            repo.register(name, ChannelLayout::new(count, kind, order)?);
        }
        Ok(repo)
    }

    pub fn register(&self, name: &str, layout: ChannelLayout) {
        debug!("Registering channel layout {}: {}", name, layout);
        self.layouts.write().insert(name.to_uppercase(), layout);
    }

    pub fn get(&self, name: &str) -> Option<ChannelLayout> {
        self.layouts.read().get(&name.to_uppercase()).cloned()
    }

    /// Like [`get`](Self::get) but unknown names are an error
    pub fn resolve(&self, name: &str) -> Result<ChannelLayout> {
        self.get(name)
            .ok_or_else(|| Error::UnknownLayout(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_reserved_characters_and_overlong_orders() {
        assert!(ChannelLayout::new(0, "stereo", "").is_err());
        assert!(ChannelLayout::new(2, "stereo", "FL=FR").is_err());
        assert!(ChannelLayout::new(1, "mono", "FL FR").is_err());
        assert!(ChannelLayout::new(4, "quad", "FL FR").is_ok());
    }

    #[test]
    fn kind_is_upper_cased_and_labels_are_indexed() {
        let layout = ChannelLayout::new(4, "dual", "L R L R").unwrap();
        assert_eq!(layout.kind(), "DUAL");
        assert_eq!(layout.indexes_of("L"), vec![0, 2]);
        assert_eq!(layout.indexes_of("C"), Vec::<usize>::new());
    }

    #[test]
    fn repository_lookups_ignore_case() {
        let repo = ChannelLayoutRepository::with_defaults().unwrap();
        assert_eq!(repo.resolve("STEREO").unwrap(), ChannelLayout::stereo());
        assert_eq!(repo.get("Smpte").unwrap().num_channels(), 6);
        assert!(matches!(
            repo.resolve("nope"),
            Err(Error::UnknownLayout(name)) if name == "nope"
        ));
    }
}
