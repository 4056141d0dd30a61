/// WAV file input
///
/// Reads a multi-channel 16-bit WAV capture (beams followed by the
/// reference channel) and replays it as fixed-size blocks.

use crate::audio_block::{AudioBlock, AudioBlockError, AudioSample, SampleLayout};
use crate::pipeline::BlockSource;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid audio block: {0}")]
    AudioBlock(#[from] AudioBlockError),
}

/// Replays a WAV file block by block. The last partial block is padded
/// with silence.
pub struct WavFileSource {
    reader: hound::WavReader<BufReader<File>>,
    channels: usize,
    sample_rate: u32,
    frames_per_block: usize,
    layout: SampleLayout,
    frames_read: u64,
}

impl WavFileSource {
    pub fn open(
        path: impl AsRef<Path>,
        frames_per_block: usize,
        layout: SampleLayout,
    ) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let reader = hound::WavReader::open(path)?;
        let spec = reader.spec();

        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(SourceError::UnsupportedFormat(format!(
                "expected 16-bit integer samples, got {} bit {:?}",
                spec.bits_per_sample, spec.sample_format
            )));
        }

        if frames_per_block == 0 {
            return Err(SourceError::UnsupportedFormat(
                "frames_per_block must be greater than 0".to_string(),
            ));
        }

        info!(
            "Opened {}: {} channels at {} Hz, {} frames",
            path.display(),
            spec.channels,
            spec.sample_rate,
            reader.duration()
        );

        Ok(Self {
            reader,
            channels: spec.channels as usize,
            sample_rate: spec.sample_rate,
            frames_per_block,
            layout,
            frames_read: 0,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn stream_time(&self) -> Duration {
        Duration::from_micros(self.frames_read * 1_000_000 / self.sample_rate.max(1) as u64)
    }
}

impl BlockSource for WavFileSource {
    fn next_block(&mut self) -> Result<Option<AudioBlock>, SourceError> {
        let wanted = self.frames_per_block * self.channels;
        let mut samples: Vec<AudioSample> = self
            .reader
            .samples::<i16>()
            .take(wanted)
            .collect::<Result<_, _>>()?;

        if samples.is_empty() {
            debug!("WAV source exhausted after {} frames", self.frames_read);
            return Ok(None);
        }

        samples.resize(wanted, 0);

        let timestamp = self.stream_time();
        self.frames_read += self.frames_per_block as u64;

        let block = AudioBlock::new(self.channels, SampleLayout::Interleaved, samples, timestamp)?;

        Ok(Some(match self.layout {
            SampleLayout::Interleaved => block,
            SampleLayout::Deinterleaved => {
                AudioBlock::from_channels(&block.to_channels(), SampleLayout::Deinterleaved, timestamp)?
            }
        }))
    }
}
