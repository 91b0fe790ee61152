//! Channel layout conversion through a precompiled coefficient matrix.

use tracing::{instrument, trace};

use super::expr::{self, Clause};
use super::{AudioBuffer, ChannelLayout, MixConfigRepository};
use crate::error::{Error, Result};

/// Gains below this are treated as zero when renormalizing a clause
const NORMALIZE_EPSILON: f64 = 1e-5;

/// Converts buffers from one channel layout to another.
///
/// The matrix is stored as `coeffs[out * in_channels + in]` and built once
/// in [`new`](Self::new).
#[derive(Debug, Clone)]
pub struct AudioChannelRemapper {
    input: ChannelLayout,
    output: ChannelLayout,
    /// `None` when both layouts are equal
    coeffs: Option<Vec<f64>>,
}

impl AudioChannelRemapper {
    #[instrument(skip_all, fields(input = %input.kind(), output = %output.kind()))]
    pub fn new(
        input: ChannelLayout,
        output: ChannelLayout,
        mix_configs: Option<&MixConfigRepository>,
    ) -> Result<Self> {
        if !input.is_valid() {
            return Err(Error::InvalidLayout("input layout is invalid".into()));
        }
        if !output.is_valid() {
            return Err(Error::InvalidLayout("output layout is invalid".into()));
        }

        trace!("Input:  {}", input);
        trace!("Output: {}", output);

        if input == output {
            trace!("No remapping needed, layouts are equal");
            return Ok(Self {
                input,
                output,
                coeffs: None,
            });
        }

        let mix_config = mix_configs.and_then(|repo| repo.get(input.kind(), output.kind()));

        let coeffs = match mix_config {
            Some(config) => {
                trace!("Using mix config: {}", config);
                compile(&input, &output, &config)?
            }
            None if input.kind() == output.kind() && !input.channel_order().is_empty() => {
                let config = input
                    .channel_order()
                    .iter()
                    .map(|name| format!("{name} = {name}"))
                    .collect::<Vec<_>>()
                    .join(" | ");
                trace!("Same layout type, mapping by name: {}", config);
                compile(&input, &output, &config)?
            }
            None => {
                trace!(
                    "Passthru {} channels into {}",
                    input.num_channels(),
                    output.num_channels()
                );
                passthrough(&input, &output)
            }
        };

        Ok(Self {
            input,
            output,
            coeffs: Some(coeffs),
        })
    }

    pub fn input_layout(&self) -> &ChannelLayout {
        &self.input
    }

    pub fn output_layout(&self) -> &ChannelLayout {
        &self.output
    }

    /// `coeff[output][input]`, or `None` for an identity remapper
    pub fn coefficient(&self, output: usize, input: usize) -> Option<f64> {
        let coeffs = self.coeffs.as_ref()?;
        coeffs.get(output * self.input.num_channels() + input).copied()
    }

    /// Remix one buffer. A trailing partial sample frame is discarded.
    pub fn mix_and_rearrange(&self, buffer: &AudioBuffer) -> AudioBuffer {
        let Some(coeffs) = &self.coeffs else {
            return buffer.relabel(self.output.clone());
        };

        let in_channels = self.input.num_channels();
        let out_channels = self.output.num_channels();
        let input = buffer.samples();
        let sample_frames = input.len() / in_channels;

        let mut output = Vec::with_capacity(sample_frames * out_channels);
        for frame in input.chunks_exact(in_channels) {
            for row in coeffs.chunks_exact(in_channels) {
                let sum: f64 = row
                    .iter()
                    .zip(frame)
                    .map(|(&gain, &sample)| gain * f64::from(sample))
                    .sum();
                output.push(narrow(sum));
            }
        }

        AudioBuffer::new(output, self.output.clone())
    }
}

fn narrow(value: f64) -> i32 {
    value.round().clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32
}

/// c0=c0 | c1=c1 | ... with silence for channels the input does not have
fn passthrough(input: &ChannelLayout, output: &ChannelLayout) -> Vec<f64> {
    let in_channels = input.num_channels();
    let mut coeffs = vec![0.0; output.num_channels() * in_channels];
    for ch in 0..output.num_channels().min(in_channels) {
        coeffs[ch * in_channels + ch] = 1.0;
    }
    coeffs
}

fn compile(input: &ChannelLayout, output: &ChannelLayout, config: &str) -> Result<Vec<f64>> {
    let in_channels = input.num_channels();
    let mut coeffs = vec![0.0; output.num_channels() * in_channels];

    for clause in expr::parse(config)? {
        let row = clause_row(input, &clause, config)?;
        let targets = output.indexes_of(&clause.output);
        if targets.is_empty() {
            trace!("Output channel {} not in output layout, ignoring", clause.output);
        }
        for out in targets {
            coeffs[out * in_channels..(out + 1) * in_channels].copy_from_slice(&row);
        }
    }

    Ok(coeffs)
}

fn clause_row(input: &ChannelLayout, clause: &Clause, config: &str) -> Result<Vec<f64>> {
    let mut row = vec![0.0; input.num_channels()];

    for term in &clause.terms {
        let sources = input.indexes_of(&term.input);
        if sources.is_empty() {
            return Err(Error::mix_expression(
                config,
                format!("input channel {} not in layout {}", term.input, input.kind()),
            ));
        }
        for source in sources {
            row[source] += term.gain;
        }
    }

    if clause.normalize {
        let total: f64 = row.iter().map(|gain| gain.abs()).sum();
        if total > NORMALIZE_EPSILON {
            row.iter_mut().for_each(|gain| *gain /= total);
        }
    }

    Ok(row)
}
