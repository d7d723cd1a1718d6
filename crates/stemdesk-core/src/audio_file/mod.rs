//! Stem file decoding
//!
//! Decodes a compressed or PCM stem (WAV, OGG/Vorbis, FLAC, MP3, ...) into a
//! [`SampleBuffer`] using Symphonia. Mono stems are duplicated to both
//! channels; anything wider than stereo keeps its first two channels.
//!
//! Stems are not resampled. A file whose rate differs from the backend's is
//! rejected, since looping it at the wrong rate would put it out of phase
//! with every other stem.

use std::fs::File;
use std::path::{Path, PathBuf};

use symphonia::core::audio::SampleBuffer as DecodeBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

use crate::types::{BufferError, SampleBuffer, StereoSample};

/// Errors raised while loading a stem
#[derive(Error, Debug)]
pub enum AudioFileError {
    #[error("Failed to open audio file: {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("No audio track found")]
    NoAudioTrack,

    #[error("Audio track does not declare a sample rate")]
    UnknownSampleRate,

    #[error("Wrong sample rate: expected {expected}Hz, found {found}Hz")]
    WrongSampleRate { expected: u32, found: u32 },

    #[error("Audio file contains no samples")]
    Empty,

    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<BufferError> for AudioFileError {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::Empty => AudioFileError::Empty,
            BufferError::ZeroSampleRate => AudioFileError::UnknownSampleRate,
        }
    }
}

/// Decode a stem file into a loop buffer at `target_rate`
pub fn load_sample_buffer(path: &Path, target_rate: u32) -> Result<SampleBuffer, AudioFileError> {
    let (interleaved, sample_rate, channels) = decode_interleaved(path)?;

    if sample_rate != target_rate {
        return Err(AudioFileError::WrongSampleRate {
            expected: target_rate,
            found: sample_rate,
        });
    }

    let frames = to_stereo(&interleaved, channels);
    log::debug!(
        "Decoded {:?}: {} frames, {}Hz, {} source channels",
        path,
        frames.len(),
        sample_rate,
        channels
    );

    Ok(SampleBuffer::new(frames, sample_rate)?)
}

/// Fold interleaved samples with `channels` channels into stereo frames
pub fn to_stereo(interleaved: &[f32], channels: usize) -> Vec<StereoSample> {
    match channels {
        0 => Vec::new(),
        1 => interleaved.iter().map(|&s| StereoSample::mono(s)).collect(),
        n => interleaved
            .chunks_exact(n)
            .map(|frame| StereoSample::new(frame[0], frame[1]))
            .collect(),
    }
}

/// Decode every packet of the first audio track to interleaved f32
fn decode_interleaved(path: &Path) -> Result<(Vec<f32>, u32, usize), AudioFileError> {
    let file = File::open(path).map_err(|e| AudioFileError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| AudioFileError::UnsupportedFormat(e.to_string()))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(AudioFileError::NoAudioTrack)?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or(AudioFileError::UnknownSampleRate)?;
    let mut channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AudioFileError::UnsupportedFormat(e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<DecodeBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(AudioFileError::Decode(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("Skipping corrupt packet in {:?}: {}", path, e);
                continue;
            }
            Err(e) => return Err(AudioFileError::Decode(e.to_string())),
        };

        if sample_buf.is_none() {
            let spec = *decoded.spec();
            // Some containers only know the channel layout once decoding starts
            if channels == 0 {
                channels = spec.channels.count();
            }
            sample_buf = Some(DecodeBuffer::new(decoded.capacity() as u64, spec));
        }

        if let Some(ref mut buf) = sample_buf {
            buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buf.samples());
        }
    }

    if samples.is_empty() || channels == 0 {
        return Err(AudioFileError::Empty);
    }

    Ok((samples, sample_rate, channels))
}
