// Audio normalization for the Whisper-AT API
//
// The inference engine expects 16 kHz mono input. Uploads already in that
// shape are written through byte-for-byte; everything else is decoded,
// downmixed and resampled into a fresh WAV file. Decoding is delegated to
// symphonia, resampling to rubato.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

/// Sample rate required by the inference engine
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Name of the file holding resampled audio inside a job workspace
const NORMALIZED_FILE_NAME: &str = "normalized.wav";

/// Audio normalization error types
#[derive(Error, Debug)]
pub enum AudioError {
    /// Container or codec outside the supported set
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),
    /// Recognized container that fails to decode
    #[error("failed to decode audio: {0}")]
    Decode(String),
    /// Failure while writing the normalized WAV
    #[error("failed to encode normalized audio: {0}")]
    Encode(#[from] hound::Error),
    /// I/O error while persisting audio data
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Supported upload containers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Mp3,
    Wav,
    M4a,
    Flac,
    Ogg,
}

impl AudioFormat {
    /// Extensions accepted on upload
    pub const ALLOWED_EXTENSIONS: [&'static str; 5] = ["mp3", "wav", "m4a", "flac", "ogg"];

    /// Determine the format from an uploaded file name's extension
    pub fn from_file_name(name: &str) -> Result<Self, AudioError> {
        let extension = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "mp3" => Ok(Self::Mp3),
            "wav" => Ok(Self::Wav),
            "m4a" => Ok(Self::M4a),
            "flac" => Ok(Self::Flac),
            "ogg" => Ok(Self::Ogg),
            _ => Err(AudioError::UnsupportedFormat(format!(
                "'{}' is not one of the supported formats: {}",
                name,
                Self::ALLOWED_EXTENSIONS.join(", ")
            ))),
        }
    }

    /// Canonical file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
            Self::M4a => "m4a",
            Self::Flac => "flac",
            Self::Ogg => "ogg",
        }
    }
}

/// An uploaded audio stream with its declared container format
#[derive(Debug)]
pub struct AudioInput {
    /// Raw uploaded bytes
    pub data: Vec<u8>,
    /// Container format derived from the uploaded file name
    pub format: AudioFormat,
}

/// Audio guaranteed to be single-channel at [`TARGET_SAMPLE_RATE`],
/// written into a job workspace and consumed exactly once by the engine
#[derive(Debug)]
pub struct NormalizedAudio {
    /// File holding the normalized stream
    pub path: PathBuf,
    /// Container format of the file at `path`
    pub format: AudioFormat,
    /// Always [`TARGET_SAMPLE_RATE`]
    pub sample_rate: u32,
    /// Always 1
    pub channels: u16,
    /// Duration when the container declares or decoding reveals it
    pub duration_secs: Option<f32>,
    /// Whether the stream was rebuilt rather than passed through
    pub resampled: bool,
}

/// Normalize an uploaded stream for inference, writing the result into
/// `dest_dir`.
///
/// Input already at 16 kHz mono is written through unchanged to avoid a
/// pointless decode round-trip. Anything else is decoded to f32 PCM,
/// downmixed to mono and resampled, then stored as a 16-bit WAV.
pub fn normalize(input: AudioInput, dest_dir: &Path) -> Result<NormalizedAudio, AudioError> {
    let declared = input.format;
    let mut reader = open_container(input.data.clone(), declared)?;

    let track = reader
        .default_track()
        .ok_or_else(|| AudioError::Decode("no audio track found".to_string()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let source_rate = codec_params
        .sample_rate
        .ok_or_else(|| AudioError::Decode("unknown sample rate".to_string()))?;
    let channels = codec_params.channels.map(|c| c.count()).unwrap_or(1);

    if source_rate == TARGET_SAMPLE_RATE && channels == 1 {
        let path = dest_dir.join(format!("audio.{}", declared.extension()));
        fs::write(&path, &input.data)?;
        let duration_secs = codec_params
            .n_frames
            .map(|frames| frames as f32 / source_rate as f32);
        debug!(
            "Audio already at {} Hz mono, passing through untouched",
            TARGET_SAMPLE_RATE
        );
        return Ok(NormalizedAudio {
            path,
            format: declared,
            sample_rate: TARGET_SAMPLE_RATE,
            channels: 1,
            duration_secs,
            resampled: false,
        });
    }

    info!(
        "Converting audio from {} Hz / {} channel(s) to {} Hz mono",
        source_rate, channels, TARGET_SAMPLE_RATE
    );

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| AudioError::UnsupportedFormat(format!("codec: {}", e)))?;

    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match reader.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(AudioError::Decode(format!("packet: {}", e))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping corrupt audio frame: {}", e);
                continue;
            }
            Err(e) => return Err(AudioError::Decode(format!("decode: {}", e))),
        };

        let spec = *decoded.spec();
        let num_frames = decoded.frames();
        if num_frames == 0 {
            continue;
        }

        let mut sample_buf = SampleBuffer::<f32>::new(num_frames as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        let interleaved = sample_buf.samples();

        if channels > 1 {
            for frame in interleaved.chunks(channels) {
                let mono: f32 = frame.iter().sum::<f32>() / channels as f32;
                samples.push(mono);
            }
        } else {
            samples.extend_from_slice(interleaved);
        }
    }

    if samples.is_empty() {
        return Err(AudioError::Decode("no audio samples decoded".to_string()));
    }

    if source_rate != TARGET_SAMPLE_RATE {
        samples = resample(&samples, source_rate, TARGET_SAMPLE_RATE)?;
    }

    let path = dest_dir.join(NORMALIZED_FILE_NAME);
    write_wav(&samples, &path)?;
    let duration_secs = samples.len() as f32 / TARGET_SAMPLE_RATE as f32;
    debug!(
        "Audio normalized to {} Hz mono ({:.2}s)",
        TARGET_SAMPLE_RATE, duration_secs
    );

    Ok(NormalizedAudio {
        path,
        format: AudioFormat::Wav,
        sample_rate: TARGET_SAMPLE_RATE,
        channels: 1,
        duration_secs: Some(duration_secs),
        resampled: true,
    })
}

/// Probe the container and hand back a format reader. A stream the probe
/// cannot recognize is an input error, not an internal fault.
fn open_container(
    data: Vec<u8>,
    format: AudioFormat,
) -> Result<Box<dyn FormatReader>, AudioError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());

    let mut hint = Hint::new();
    hint.with_extension(format.extension());

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| {
            AudioError::UnsupportedFormat(format!(
                "container not recognized as {}: {}",
                format.extension(),
                e
            ))
        })?;

    Ok(probed.format)
}

fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, AudioError> {
    use rubato::{
        Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
    };

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = to_rate as f64 / from_rate as f64;
    let chunk_size = 1024;

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, chunk_size, 1)
        .map_err(|e| AudioError::Decode(format!("resampler init: {}", e)))?;

    let mut output = Vec::with_capacity((samples.len() as f64 * ratio) as usize + chunk_size);

    for chunk in samples.chunks(chunk_size) {
        let input = if chunk.len() < chunk_size {
            let mut padded = chunk.to_vec();
            padded.resize(chunk_size, 0.0);
            padded
        } else {
            chunk.to_vec()
        };

        let result = resampler
            .process(&[input], None)
            .map_err(|e| AudioError::Decode(format!("resample: {}", e)))?;

        if let Some(channel) = result.first() {
            output.extend_from_slice(channel);
        }
    }

    // The final padded chunk can overshoot the expected length
    let expected_len = (samples.len() as f64 * ratio) as usize;
    output.truncate(expected_len);

    Ok(output)
}

fn write_wav(samples: &[f32], path: &Path) -> Result<(), AudioError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: TARGET_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    for sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer.write_sample(value)?;
    }
    writer.finalize()?;

    Ok(())
}
