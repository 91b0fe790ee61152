use serde::{Deserialize, Serialize};

/// How a layer's pixels combine with what is already below it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    #[default]
    Normal,
    Add,
    Multiply,
    Screen,
}

/// Normalized crop rectangle, upper-left and lower-right corners in 0..=1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Crop {
    pub ul: [f64; 2],
    pub lr: [f64; 2],
}

impl Default for Crop {
    fn default() -> Self {
        Self {
            ul: [0.0, 0.0],
            lr: [1.0, 1.0],
        }
    }
}

impl Crop {
    /// Intersection of two crops
    pub fn intersect(&self, other: &Crop) -> Crop {
        Crop {
            ul: [self.ul[0].max(other.ul[0]), self.ul[1].max(other.ul[1])],
            lr: [self.lr[0].min(other.lr[0]), self.lr[1].min(other.lr[1])],
        }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.ul[0] && x < self.lr[0] && y >= self.ul[1] && y < self.lr[1]
    }
}

/// Per-frame composition parameters.
///
/// Opaque to the pipeline except as input to the image and audio mixers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameTransform {
    pub opacity: f64,
    pub volume: f64,
    pub blend_mode: BlendMode,
    pub crop: Crop,
    /// The frame is a key (matte) for the whole sibling drawn after it
    pub is_key: bool,
}

impl Default for FrameTransform {
    fn default() -> Self {
        Self {
            opacity: 1.0,
            volume: 1.0,
            blend_mode: BlendMode::Normal,
            crop: Crop::default(),
            is_key: false,
        }
    }
}

impl FrameTransform {
    /// Apply `self` as the outer transform around `inner`.
    pub fn combine(&self, inner: &FrameTransform) -> FrameTransform {
        FrameTransform {
            opacity: self.opacity * inner.opacity,
            volume: self.volume * inner.volume,
            blend_mode: if inner.blend_mode == BlendMode::Normal {
                self.blend_mode
            } else {
                inner.blend_mode
            },
            crop: self.crop.intersect(&inner.crop),
            is_key: self.is_key || inner.is_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_multiplies_gains_and_intersects_crop() {
        let outer = FrameTransform {
            opacity: 0.5,
            volume: 0.5,
            crop: Crop {
                ul: [0.25, 0.0],
                lr: [1.0, 1.0],
            },
            ..Default::default()
        };
        let inner = FrameTransform {
            opacity: 0.5,
            volume: 2.0,
            blend_mode: BlendMode::Add,
            crop: Crop {
                ul: [0.0, 0.0],
                lr: [0.75, 0.5],
            },
            is_key: true,
        };

        let combined = outer.combine(&inner);
        assert_eq!(combined.opacity, 0.25);
        assert_eq!(combined.volume, 1.0);
        assert_eq!(combined.blend_mode, BlendMode::Add);
        assert_eq!(combined.crop.ul, [0.25, 0.0]);
        assert_eq!(combined.crop.lr, [0.75, 0.5]);
        assert!(combined.is_key);
    }
}
