/// Audio block module
///
/// Fixed-duration multi-channel blocks as they travel through the node, the
/// interleave/deinterleave helpers, and the ring-buffered accumulator that
/// implements underclocking (run one cycle every K input blocks).

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Audio sample format (16-bit PCM)
pub type AudioSample = i16;

/// Default capture rate of the microphone array
pub const SAMPLE_RATE: u32 = 16000;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AudioBlockError {
    #[error("Invalid channel count: {0}")]
    InvalidChannels(usize),

    #[error("Block of {len} samples is not a multiple of {channels} channels")]
    Misaligned { len: usize, channels: usize },

    #[error("Channel {channel} has {got} samples, expected {expected}")]
    RaggedChannels {
        channel: usize,
        got: usize,
        expected: usize,
    },
}

/// Sample ordering inside a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleLayout {
    /// Frame-major: `c0 c1 c2 c0 c1 c2 ...`
    Interleaved,

    /// Channel-major: all of channel 0, then all of channel 1, ...
    Deinterleaved,
}

/// A timestamped multi-channel block of PCM samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    channels: usize,
    layout: SampleLayout,
    samples: Vec<AudioSample>,
    timestamp: Duration,
}

impl AudioBlock {
    /// Wrap a flat sample buffer, checking that it divides evenly into channels.
    pub fn new(
        channels: usize,
        layout: SampleLayout,
        samples: Vec<AudioSample>,
        timestamp: Duration,
    ) -> Result<Self, AudioBlockError> {
        if channels == 0 {
            return Err(AudioBlockError::InvalidChannels(channels));
        }

        if samples.len() % channels != 0 {
            return Err(AudioBlockError::Misaligned {
                len: samples.len(),
                channels,
            });
        }

        Ok(Self {
            channels,
            layout,
            samples,
            timestamp,
        })
    }

    /// Build a block from per-channel buffers of equal length.
    pub fn from_channels(
        channels: &[Vec<AudioSample>],
        layout: SampleLayout,
        timestamp: Duration,
    ) -> Result<Self, AudioBlockError> {
        if channels.is_empty() {
            return Err(AudioBlockError::InvalidChannels(0));
        }

        let expected = channels[0].len();
        if let Some((channel, got)) = channels
            .iter()
            .map(Vec::len)
            .enumerate()
            .find(|&(_, len)| len != expected)
        {
            return Err(AudioBlockError::RaggedChannels {
                channel,
                got,
                expected,
            });
        }

        let samples = match layout {
            SampleLayout::Interleaved => interleave(channels),
            SampleLayout::Deinterleaved => channels.concat(),
        };

        Ok(Self {
            channels: channels.len(),
            layout,
            samples,
            timestamp,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn layout(&self) -> SampleLayout {
        self.layout
    }

    pub fn samples(&self) -> &[AudioSample] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<AudioSample> {
        self.samples
    }

    /// Stream time of the first frame in this block
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    /// Number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    /// Wall-clock length of the block at the given rate
    pub fn duration(&self, sample_rate: u32) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / sample_rate as f64)
    }

    /// Split into one buffer per channel regardless of layout.
    pub fn to_channels(&self) -> Vec<Vec<AudioSample>> {
        match self.layout {
            SampleLayout::Interleaved => deinterleave(&self.samples, self.channels),
            SampleLayout::Deinterleaved => self
                .samples
                .chunks_exact(self.frames().max(1))
                .map(<[AudioSample]>::to_vec)
                .chain(std::iter::repeat(Vec::new()))
                .take(self.channels)
                .collect(),
        }
    }
}

/// Split interleaved samples into per-channel buffers.
pub fn deinterleave(samples: &[AudioSample], channels: usize) -> Vec<Vec<AudioSample>> {
    if channels == 0 {
        return Vec::new();
    }

    let frames = samples.len() / channels;
    let mut out = vec![Vec::with_capacity(frames); channels];

    for frame in samples.chunks_exact(channels) {
        for (buffer, &sample) in out.iter_mut().zip(frame) {
            buffer.push(sample);
        }
    }

    out
}

/// Merge per-channel buffers into frame-major order.
///
/// Channels are truncated to the shortest one.
pub fn interleave(channels: &[Vec<AudioSample>]) -> Vec<AudioSample> {
    let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(frames * channels.len());

    for i in 0..frames {
        out.extend(channels.iter().map(|c| c[i]));
    }

    out
}

type RingBuffer = HeapRb<AudioSample>;
type RingProducer = <RingBuffer as Split>::Prod;
type RingConsumer = <RingBuffer as Split>::Cons;

/// Per-channel ring buffers that gather `blocks_per_cycle` blocks before
/// releasing them as a single cycle's worth of audio.
pub struct BlockAccumulator {
    rings: Vec<(RingProducer, RingConsumer)>,
    blocks_per_cycle: usize,
    pending_blocks: usize,
    cycle_start: Option<Duration>,
}

impl BlockAccumulator {
    /// Create an accumulator for `channels` channels of `frames_per_block`
    /// frames each. A `blocks_per_cycle` of 0 is treated as 1.
    pub fn new(channels: usize, frames_per_block: usize, blocks_per_cycle: usize) -> Self {
        let blocks_per_cycle = blocks_per_cycle.max(1);
        let capacity = (frames_per_block * blocks_per_cycle).max(1);

        debug!(
            "Creating block accumulator: {} channels x {} samples ({} blocks per cycle)",
            channels, capacity, blocks_per_cycle
        );

        let rings = (0..channels)
            .map(|_| RingBuffer::new(capacity).split())
            .collect();

        Self {
            rings,
            blocks_per_cycle,
            pending_blocks: 0,
            cycle_start: None,
        }
    }

    /// Push one block. Returns the accumulated channels and the timestamp of
    /// the first block once `blocks_per_cycle` blocks have been gathered.
    pub fn push(
        &mut self,
        channels: Vec<Vec<AudioSample>>,
        timestamp: Duration,
    ) -> Option<(Vec<Vec<AudioSample>>, Duration)> {
        if self.blocks_per_cycle == 1 {
            return Some((channels, timestamp));
        }

        self.cycle_start.get_or_insert(timestamp);

        for ((producer, _), samples) in self.rings.iter_mut().zip(&channels) {
            let written = producer.push_slice(samples);
            if written < samples.len() {
                warn!(
                    "Accumulator full, dropped {} samples",
                    samples.len() - written
                );
            }
        }

        self.pending_blocks += 1;
        if self.pending_blocks < self.blocks_per_cycle {
            return None;
        }

        let drained = self
            .rings
            .iter_mut()
            .map(|(_, consumer)| {
                let mut out = vec![0; consumer.occupied_len()];
                let read = consumer.pop_slice(&mut out);
                out.truncate(read);
                out
            })
            .collect();

        self.pending_blocks = 0;
        self.cycle_start.take().map(|start| (drained, start))
    }

    /// Blocks gathered towards the next cycle
    pub fn pending_blocks(&self) -> usize {
        self.pending_blocks
    }

    pub fn blocks_per_cycle(&self) -> usize {
        self.blocks_per_cycle
    }

    /// Drop any partially accumulated cycle
    pub fn clear(&mut self) {
        for (_, consumer) in self.rings.iter_mut() {
            let occupied = consumer.occupied_len();
            consumer.skip(occupied);
        }
        self.pending_blocks = 0;
        self.cycle_start = None;
        debug!("Cleared block accumulator");
    }
}
