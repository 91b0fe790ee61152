//! Layer compositing into one packed BGRA image.
//!
//! Images are premultiplied BGRA8. Layers are drawn bottom-up. A layer or
//! child flagged as key is not drawn; it is rendered into a matte whose luma
//! masks the whole sibling that follows it, children included.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use rayon::prelude::*;
use tracing::{trace, warn};

use crate::concurrency::{Deferred, Executor, Governor, Priority};
use crate::error::Result;
use crate::format::VideoFormatDesc;
use crate::frame::{BlendMode, Frame, FrameTransform, PixelFormat};

/// Premultiplied BGRA pixel
pub type Bgra8 = [u8; 4];

/// Renders the layers pushed since the last render, possibly on another
/// thread.
pub trait ImageMixer: Send {
    /// Queue `frame` and its children, drawn under `transform`
    fn push(&mut self, frame: &Frame, transform: &FrameTransform);

    fn render(&mut self, format: &VideoFormatDesc) -> Deferred<Bytes>;
}

/// Draw list of a key, rendered once per composite
type Matte = Arc<Vec<DrawItem>>;

#[derive(Debug, Clone)]
struct DrawItem {
    image: Bytes,
    width: usize,
    height: usize,
    transform: FrameTransform,
    /// Every key this item sits under, outermost first
    mattes: Vec<Matte>,
}

/// Software compositor running on its own worker thread.
///
/// A governor bounds how many renders may be queued or running at once;
/// `render` blocks while that many are outstanding.
pub struct CpuImageMixer {
    executor: Executor,
    governor: Governor,
    items: Vec<DrawItem>,
    /// Key pushed as a layer, waiting for the next layer
    key: Option<Matte>,
}

impl CpuImageMixer {
    pub fn new(name: &str, max_in_flight: usize) -> Result<Self> {
        Ok(Self {
            executor: Executor::new(format!("{name} image mixer"), Priority::AboveNormal)?,
            governor: Governor::new(max_in_flight.max(1)),
            items: Vec::new(),
            key: None,
        })
    }
}

/// Add `frame` to `out` as one of a run of siblings.
///
/// A key sibling is collected into `key` instead of `out`; the next
/// non-key sibling takes it as an extra matte.
fn visit_sibling(
    frame: &Frame,
    parent: &FrameTransform,
    mattes: &[Matte],
    key: &mut Option<Matte>,
    out: &mut Vec<DrawItem>,
) {
    let Some(data) = frame.data() else {
        return;
    };
    if parent.is_key || data.transform().is_key {
        let mut matte = Vec::new();
        visit(frame, &unkeyed(parent), &[], &mut matte);
        *key = Some(Arc::new(matte));
        return;
    }

    match key.take() {
        Some(matte) => {
            let mut mattes = mattes.to_vec();
            mattes.push(matte);
            visit(frame, parent, &mattes, out);
        }
        None => visit(frame, parent, mattes, out),
    }
}

/// Add `frame` and its subtree to `out`, each item under `mattes`.
fn visit(frame: &Frame, parent: &FrameTransform, mattes: &[Matte], out: &mut Vec<DrawItem>) {
    let Some(data) = frame.data() else {
        return;
    };
    let transform = unkeyed(&parent.combine(data.transform()));

    if let (Some(plane), Some(image)) = (data.desc().planes.first(), data.planes().first()) {
        if data.desc().format != PixelFormat::Bgra {
            trace!("image mixer skips {:?} plane", data.desc().format);
        } else if image.len() < plane.size() {
            warn!(
                "image mixer skips short plane: {} bytes for {}x{}",
                image.len(),
                plane.width,
                plane.height
            );
        } else if plane.size() > 0 {
            out.push(DrawItem {
                image: image.clone(),
                width: plane.width as usize,
                height: plane.height as usize,
                transform,
                mattes: mattes.to_vec(),
            });
        }
    }

    let mut key = None;
    for child in data.children() {
        visit_sibling(child, &transform, mattes, &mut key, out);
    }
}

fn unkeyed(transform: &FrameTransform) -> FrameTransform {
    FrameTransform {
        is_key: false,
        ..*transform
    }
}

impl ImageMixer for CpuImageMixer {
    fn push(&mut self, frame: &Frame, transform: &FrameTransform) {
        visit_sibling(frame, transform, &[], &mut self.key, &mut self.items);
    }

    fn render(&mut self, format: &VideoFormatDesc) -> Deferred<Bytes> {
        let items = std::mem::take(&mut self.items);
        if self.key.take().is_some() {
            trace!("image mixer drops a key with nothing above it");
        }
        let (width, height) = (format.width as usize, format.height as usize);

        let ticket = self.governor.acquire();
        let result = self.executor.begin_invoke(move || {
            let _ticket = ticket;
            Bytes::from(composite(&items, width, height))
        });

        match result {
            Ok(deferred) => deferred,
            Err(e) => {
                warn!("image mixer cannot render: {}", e);
                // The promise is dropped here, so the caller sees it abandoned.
                let (_, deferred) = Deferred::pair();
                deferred
            }
        }
    }
}

impl Drop for CpuImageMixer {
    fn drop(&mut self) {
        self.governor.cancel();
    }
}

/// Draw `items` in order onto a transparent `width`x`height` canvas.
fn composite(items: &[DrawItem], width: usize, height: usize) -> Vec<u8> {
    let mut canvas = vec![0u8; width * height * 4];
    if width == 0 || height == 0 {
        return canvas;
    }

    // Mattes rendered at canvas size, keyed by draw list address
    let mut rendered: HashMap<*const Vec<DrawItem>, Vec<u8>> = HashMap::new();
    for item in items {
        for matte in &item.mattes {
            rendered
                .entry(Arc::as_ptr(matte))
                .or_insert_with(|| composite(matte, width, height));
        }
        let mattes: Vec<&[u8]> = item
            .mattes
            .iter()
            .filter_map(|matte| rendered.get(&Arc::as_ptr(matte)).map(Vec::as_slice))
            .collect();
        draw(&mut canvas, item, &mattes, width, height);
    }
    canvas
}

fn draw(canvas: &mut [u8], item: &DrawItem, mattes: &[&[u8]], width: usize, height: usize) {
    let transform = &item.transform;
    let opacity = ((transform.opacity.clamp(0.0, 1.0) * 255.0).round()) as u16;
    if opacity == 0 {
        return;
    }

    canvas
        .par_chunks_exact_mut(width * 4)
        .enumerate()
        .for_each(|(y, row)| {
            let v = (y as f64 + 0.5) / height as f64;
            for (x, dst) in row.chunks_exact_mut(4).enumerate() {
                let u = (x as f64 + 0.5) / width as f64;
                if !transform.crop.contains(u, v) {
                    continue;
                }

                let mut src = sample(item, x, y, width, height);
                let offset = (y * width + x) * 4;
                for matte in mattes {
                    let coverage =
                        u16::from(luma(matte[offset], matte[offset + 1], matte[offset + 2]));
                    src = src.map(|c| mul_div255(u16::from(c), coverage));
                }

                let out = blend(
                    transform.blend_mode,
                    [dst[0], dst[1], dst[2], dst[3]],
                    src,
                    opacity,
                );
                dst.copy_from_slice(&out);
            }
        });
}

/// Nearest-neighbour lookup of canvas pixel `(x, y)` in `item`
fn sample(item: &DrawItem, x: usize, y: usize, width: usize, height: usize) -> Bgra8 {
    let sx = x * item.width / width;
    let sy = y * item.height / height;
    let offset = (sy * item.width + sx) * 4;
    [
        item.image[offset],
        item.image[offset + 1],
        item.image[offset + 2],
        item.image[offset + 3],
    ]
}

/// BT.709 luma, used as key coverage
fn luma(b: u8, g: u8, r: u8) -> u8 {
    ((54 * u32::from(r) + 183 * u32::from(g) + 19 * u32::from(b) + 128) >> 8) as u8
}

pub fn blend(mode: BlendMode, dst: Bgra8, src: Bgra8, opacity: u16) -> Bgra8 {
    let src = src.map(|c| mul_div255(u16::from(c), opacity));
    let sa = src[3];
    if sa == 0 && mode == BlendMode::Normal {
        return dst;
    }

    let inv_sa = 255 - u16::from(sa);
    let inv_da = 255 - u16::from(dst[3]);

    let mut out = [0u8; 4];
    for i in 0..3 {
        let (s, d) = (u16::from(src[i]), u16::from(dst[i]));
        let value = match mode {
            BlendMode::Normal => s + u16::from(mul_div255(d, inv_sa)),
            BlendMode::Add => s + d,
            BlendMode::Multiply => {
                u16::from(mul_div255(s, inv_da))
                    + u16::from(mul_div255(d, inv_sa))
                    + u16::from(mul_div255(s, d))
            }
            BlendMode::Screen => s + d - u16::from(mul_div255(s, d)),
        };
        out[i] = value.min(255) as u8;
    }
    out[3] = sa.saturating_add(mul_div255(u16::from(dst[3]), inv_sa));
    out
}

fn mul_div255(x: u16, y: u16) -> u8 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioBuffer;
    use crate::frame::{Crop, FrameTag, PixelFormatDesc};

    fn solid(pixel: Bgra8, width: u32, height: u32) -> Frame {
        let image: Vec<u8> = pixel
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Frame::new(
            FrameTag::unique(),
            PixelFormatDesc::bgra(width, height),
            vec![Bytes::from(image)],
            AudioBuffer::empty(),
        )
    }

    fn tiny_format() -> VideoFormatDesc {
        VideoFormatDesc {
            name: "test",
            width: 2,
            height: 2,
            field_count: 1,
            time_scale: 25,
            duration: 1,
            audio_cadence: &[1920],
        }
    }

    fn pixel(image: &[u8], index: usize) -> Bgra8 {
        let offset = index * 4;
        [image[offset], image[offset + 1], image[offset + 2], image[offset + 3]]
    }

    #[test]
    fn normal_blend_matches_over() {
        let dst = [10, 20, 30, 255];
        assert_eq!(blend(BlendMode::Normal, dst, [200, 0, 0, 0], 255), dst);
        assert_eq!(blend(BlendMode::Normal, dst, [0, 0, 255, 255], 255), [0, 0, 255, 255]);
        assert_eq!(blend(BlendMode::Normal, dst, [0, 0, 255, 255], 0), dst);
        assert_eq!(blend(BlendMode::Normal, [0; 4], [50, 60, 70, 80], 255), [50, 60, 70, 80]);
    }

    #[test]
    fn other_blend_modes() {
        let grey = [128, 128, 128, 255];
        let white = [255, 255, 255, 255];
        let black = [0, 0, 0, 255];

        assert_eq!(blend(BlendMode::Add, grey, grey, 255), [255, 255, 255, 255]);
        assert_eq!(blend(BlendMode::Multiply, grey, white, 255), grey);
        assert_eq!(blend(BlendMode::Multiply, grey, black, 255), black);
        assert_eq!(blend(BlendMode::Screen, grey, black, 255), grey);
        assert_eq!(blend(BlendMode::Screen, grey, white, 255), white);
    }

    #[test]
    fn layers_draw_in_order_with_scaling() {
        let mut mixer = CpuImageMixer::new("test", 2).unwrap();
        mixer.push(&solid([255, 0, 0, 255], 1, 1), &FrameTransform::default());
        mixer.push(
            &solid([0, 0, 255, 255], 4, 4),
            &FrameTransform {
                crop: Crop {
                    ul: [0.5, 0.0],
                    lr: [1.0, 1.0],
                },
                ..Default::default()
            },
        );

        let image = mixer.render(&tiny_format()).get().unwrap();
        assert_eq!(image.len(), 16);
        assert_eq!(pixel(&image, 0), [255, 0, 0, 255]);
        assert_eq!(pixel(&image, 1), [0, 0, 255, 255]);
        assert_eq!(pixel(&image, 2), [255, 0, 0, 255]);
        assert_eq!(pixel(&image, 3), [0, 0, 255, 255]);
    }

    #[test]
    fn key_masks_the_following_fill() {
        let fill = solid([0, 255, 0, 255], 2, 2);
        let key = Frame::new(
            FrameTag::unique(),
            PixelFormatDesc::bgra(2, 1),
            vec![Bytes::from(vec![255, 255, 255, 255, 0, 0, 0, 255])],
            AudioBuffer::empty(),
        );

        let mut mixer = CpuImageMixer::new("test", 1).unwrap();
        mixer.push(&Frame::fill_and_key(&fill, &key), &FrameTransform::default());
        let image = mixer.render(&tiny_format()).get().unwrap();

        assert_eq!(pixel(&image, 0), [0, 255, 0, 255]);
        assert_eq!(pixel(&image, 1), [0, 0, 0, 0]);
        assert_eq!(pixel(&image, 2), [0, 255, 0, 255]);
        assert_eq!(pixel(&image, 3), [0, 0, 0, 0]);
    }

    #[test]
    fn half_opacity_over_transparent() {
        let mut mixer = CpuImageMixer::new("test", 1).unwrap();
        let layer = solid([200, 100, 50, 255], 2, 2).with_transform(|t| t.opacity = 0.5);
        mixer.push(&layer, &FrameTransform::default());
        let image = mixer.render(&tiny_format()).get().unwrap();
        assert_eq!(pixel(&image, 0), [100, 50, 25, 128]);
    }

    #[test]
    fn nothing_pushed_renders_transparent() {
        let mut mixer = CpuImageMixer::new("test", 1).unwrap();
        let image = mixer.render(&tiny_format()).get().unwrap();
        assert!(image.iter().all(|&b| b == 0));
    }

    #[test]
    fn key_masks_every_child_of_a_composite_fill() {
        let left_white = Frame::new(
            FrameTag::unique(),
            PixelFormatDesc::bgra(2, 1),
            vec![Bytes::from(vec![255, 255, 255, 255, 0, 0, 0, 255])],
            AudioBuffer::empty(),
        );
        let fill = Frame::composite(
            FrameTag::unique(),
            vec![solid([255, 0, 0, 255], 2, 2), solid([0, 255, 0, 255], 2, 2)],
            AudioBuffer::empty(),
        );

        let mut mixer = CpuImageMixer::new("test", 1).unwrap();
        mixer.push(&Frame::fill_and_key(&fill, &left_white), &FrameTransform::default());
        let image = mixer.render(&tiny_format()).get().unwrap();

        assert_eq!(pixel(&image, 0), [0, 255, 0, 255]);
        assert_eq!(pixel(&image, 1), [0, 0, 0, 0]);
        assert_eq!(pixel(&image, 3), [0, 0, 0, 0]);
    }

    #[test]
    fn key_made_of_several_children_forms_one_matte() {
        let half = |ul: f64, lr: f64| {
            solid([255, 255, 255, 255], 2, 2).with_transform(|t| {
                t.crop = Crop {
                    ul: [ul, 0.0],
                    lr: [lr, 1.0],
                }
            })
        };
        let key = Frame::composite(
            FrameTag::unique(),
            vec![half(0.0, 0.5), half(0.5, 1.0)],
            AudioBuffer::empty(),
        );
        let fill = solid([0, 0, 255, 255], 2, 2);

        let mut mixer = CpuImageMixer::new("test", 1).unwrap();
        mixer.push(&Frame::fill_and_key(&fill, &key), &FrameTransform::default());
        let image = mixer.render(&tiny_format()).get().unwrap();

        for index in 0..4 {
            assert_eq!(pixel(&image, index), [0, 0, 255, 255]);
        }
    }

    #[test]
    fn keyed_layer_masks_the_next_layer_only() {
        let left_white = Frame::new(
            FrameTag::unique(),
            PixelFormatDesc::bgra(2, 1),
            vec![Bytes::from(vec![255, 255, 255, 255, 0, 0, 0, 255])],
            AudioBuffer::empty(),
        );
        let key = FrameTransform {
            is_key: true,
            ..Default::default()
        };

        let mut mixer = CpuImageMixer::new("test", 1).unwrap();
        mixer.push(&left_white, &key);
        mixer.push(&solid([0, 255, 0, 255], 2, 2), &FrameTransform::default());
        mixer.push(&solid([255, 0, 0, 128], 1, 1), &FrameTransform::default());
        let image = mixer.render(&tiny_format()).get().unwrap();

        assert_eq!(pixel(&image, 0), [255, 127, 0, 255]);
        assert_eq!(pixel(&image, 1), [255, 0, 0, 128]);
    }
}
