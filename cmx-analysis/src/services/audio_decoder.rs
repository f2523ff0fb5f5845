//! Audio decoding and resampling
//!
//! Decodes an in-memory asset with symphonia, down-mixes to mono and
//! resamples to the fixed analysis rate with rubato. Every descriptor
//! downstream is computed at [`ANALYSIS_SAMPLE_RATE`], so results do not
//! depend on the source sample rate beyond resampler accuracy.

use crate::error::{AnalysisError, AnalysisResult};
use crate::models::{AssetMetadata, AudioFormat};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::io::Cursor;
use std::sync::Arc;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Sample rate all descriptors are computed at (Hz)
pub const ANALYSIS_SAMPLE_RATE: u32 = 22_050;

/// Input frames per resampler call
const RESAMPLE_CHUNK_FRAMES: usize = 8192;

/// Mono PCM at the source's native rate
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Mono samples, normalized to [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Native sample rate in Hz
    pub sample_rate: u32,
    /// Channel count of the source before down-mixing
    pub channels: u16,
}

impl DecodedAudio {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Keep a centered window of `excerpt_secs` seconds
    pub fn center_excerpt(&mut self, excerpt_secs: f64) {
        let keep = (excerpt_secs * self.sample_rate as f64).round() as usize;
        if keep >= self.samples.len() {
            return;
        }
        let start = (self.samples.len() - keep) / 2;
        self.samples.drain(..start);
        self.samples.truncate(keep);
    }
}

/// Audio decoder with mono down-mix and resampling
pub struct AudioDecoder {
    /// Target sample rate for analysis PCM
    target_sample_rate: u32,
}

impl Default for AudioDecoder {
    fn default() -> Self {
        Self {
            target_sample_rate: ANALYSIS_SAMPLE_RATE,
        }
    }
}

impl AudioDecoder {
    pub fn new(target_sample_rate: u32) -> Self {
        Self { target_sample_rate }
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    /// Decode the whole stream to native-rate mono PCM
    ///
    /// # Errors
    /// - `UnanalyzableAudio` when the bytes cannot be opened as the declared
    ///   format or no frame decodes
    /// - `UnsupportedFormat` when the container holds a codec the decoder lacks
    /// - `Cancelled` when `cancel` fires between packets
    pub fn decode(
        &self,
        bytes: &Arc<[u8]>,
        format_hint: AudioFormat,
        cancel: &CancellationToken,
    ) -> AnalysisResult<DecodedAudio> {
        let mut reader = open_reader(bytes, format_hint)?;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| AnalysisError::UnanalyzableAudio("no audio track".to_string()))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let sample_rate = codec_params.sample_rate.ok_or_else(|| {
            AnalysisError::UnanalyzableAudio("sample rate not specified".to_string())
        })?;
        let channels = codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(1);

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| match e {
                SymphoniaError::Unsupported(msg) => {
                    AnalysisError::UnsupportedFormat(format!("codec: {}", msg))
                }
                other => AnalysisError::PipelineTransient(format!("decoder init: {}", other)),
            })?;

        let mut mono: Vec<f32> = Vec::new();
        let mut sample_buf: Option<SampleBuffer<f32>> = None;
        let mut skipped_packets = 0usize;

        loop {
            if cancel.is_cancelled() {
                return Err(AnalysisError::Cancelled);
            }

            let packet = match reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) if !mono.is_empty() => {
                    warn!(error = %e, "Stopping decode at unreadable packet");
                    break;
                }
                Err(e) => {
                    return Err(AnalysisError::UnanalyzableAudio(format!(
                        "read packet: {}",
                        e
                    )))
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(msg)) => {
                    skipped_packets += 1;
                    debug!(reason = msg, "Skipping corrupt packet");
                    continue;
                }
                Err(SymphoniaError::IoError(_)) => break,
                Err(e) => {
                    return Err(AnalysisError::UnanalyzableAudio(format!("decode: {}", e)))
                }
            };

            let spec = *decoded.spec();
            let frames = decoded.frames();
            if frames == 0 {
                continue;
            }

            let needed = frames * spec.channels.count();
            if sample_buf.as_ref().map_or(true, |b| b.capacity() < needed) {
                sample_buf = Some(SampleBuffer::<f32>::new(frames as u64, spec));
            }
            let Some(buf) = sample_buf.as_mut() else {
                continue;
            };
            buf.copy_interleaved_ref(decoded);
            downmix_into(buf.samples(), spec.channels.count(), &mut mono);
        }

        if skipped_packets > 0 {
            warn!(skipped_packets, "Corrupt packets skipped during decode");
        }

        if mono.is_empty() {
            return Err(AnalysisError::UnanalyzableAudio(
                "no decodable audio frames".to_string(),
            ));
        }

        debug!(
            frames = mono.len(),
            sample_rate,
            channels,
            "Decoded audio to mono"
        );

        Ok(DecodedAudio {
            samples: mono,
            sample_rate,
            channels,
        })
    }

    /// Resample mono PCM to the target rate
    ///
    /// Sinc interpolation, BlackmanHarris2 window, 256-tap filter, 0.95 cutoff,
    /// fed in fixed-size chunks with a cancellation check between chunks. The
    /// filter delay is trimmed so output aligns with input.
    pub fn resample(
        &self,
        samples: Vec<f32>,
        source_rate: u32,
        cancel: &CancellationToken,
    ) -> AnalysisResult<Vec<f32>> {
        if samples.is_empty() || source_rate == self.target_sample_rate {
            return Ok(samples);
        }

        let num_frames = samples.len();
        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };

        let resample_ratio = self.target_sample_rate as f64 / source_rate as f64;
        let chunk = RESAMPLE_CHUNK_FRAMES.min(num_frames);

        let mut resampler = SincFixedIn::<f32>::new(resample_ratio, 2.0, params, chunk, 1)
            .map_err(|e| AnalysisError::PipelineTransient(format!("resampler init: {}", e)))?;
        let to_transient = |e: rubato::ResampleError| {
            AnalysisError::PipelineTransient(format!("resampling: {}", e))
        };

        let delay = resampler.output_delay();
        let expected = (num_frames as f64 * resample_ratio).ceil() as usize;
        let mut resampled = Vec::with_capacity(expected + delay + chunk);

        let mut pos = 0;
        while num_frames - pos >= resampler.input_frames_next() {
            if cancel.is_cancelled() {
                return Err(AnalysisError::Cancelled);
            }
            let end = pos + resampler.input_frames_next();
            let input = [&samples[pos..end]];
            let out = resampler
                .process(&input[..], None)
                .map_err(to_transient)?;
            resampled.extend_from_slice(&out[0]);
            pos = end;
        }

        if pos < num_frames {
            let input = [&samples[pos..]];
            let out = resampler
                .process_partial(Some(&input[..]), None)
                .map_err(to_transient)?;
            resampled.extend_from_slice(&out[0]);
        }

        while resampled.len() < expected + delay {
            if cancel.is_cancelled() {
                return Err(AnalysisError::Cancelled);
            }
            let out = resampler
                .process_partial::<&[f32]>(None, None)
                .map_err(to_transient)?;
            if out[0].is_empty() {
                break;
            }
            resampled.extend_from_slice(&out[0]);
        }

        resampled.drain(..delay.min(resampled.len()));
        resampled.truncate(expected);

        debug!(
            input_frames = num_frames,
            output_frames = resampled.len(),
            source_rate,
            target_rate = self.target_sample_rate,
            "Resampled audio"
        );
        Ok(resampled)
    }
}

/// Read container-level metadata without decoding more than necessary
///
/// Falls back to a full decode when the container does not state a frame count.
pub fn read_metadata(bytes: &Arc<[u8]>, format: AudioFormat) -> AnalysisResult<AssetMetadata> {
    let reader = open_reader(bytes, format)?;
    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AnalysisError::UnanalyzableAudio("no audio track".to_string()))?;

    let params = &track.codec_params;
    let sample_rate = params.sample_rate.ok_or_else(|| {
        AnalysisError::UnanalyzableAudio("sample rate not specified".to_string())
    })?;
    let channels = params.channels.map(|c| c.count() as u16).unwrap_or(1);

    let duration_secs = match params.n_frames {
        Some(n_frames) => n_frames as f64 / sample_rate as f64,
        None => AudioDecoder::default()
            .decode(bytes, format, &CancellationToken::new())?
            .duration_secs(),
    };

    Ok(AssetMetadata {
        format,
        duration_secs,
        sample_rate,
        channels,
    })
}

fn open_reader(bytes: &Arc<[u8]>, format: AudioFormat) -> AnalysisResult<Box<dyn FormatReader>> {
    let source = Cursor::new(Arc::clone(bytes));
    let mss = MediaSourceStream::new(Box::new(source), Default::default());

    let mut hint = Hint::new();
    hint.with_extension(format.extension());

    let opened = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| {
            AnalysisError::UnanalyzableAudio(format!("not a readable {} stream: {}", format, e))
        })?;

    Ok(opened.format)
}

/// Average interleaved frames into `out`
fn downmix_into(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    if channels <= 1 {
        out.extend_from_slice(interleaved);
        return;
    }
    let scale = 1.0 / channels as f32;
    out.extend(
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() * scale),
    );
}
