//! Test audio generation
//!
//! Renders deterministic signals and encodes them as 16-bit PCM WAV, either in
//! memory (for `AudioAsset`s) or on disk (for `AudioAsset::from_file`).

use anyhow::Result;
use cmx_analysis::models::{AssetMetadata, AudioAsset, AudioFormat};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::f32::consts::PI;
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Audio file configuration
#[derive(Debug, Clone, Copy)]
pub struct AudioConfig {
    pub duration_seconds: f32,
    pub sample_rate: u32,
    pub channels: u16,
    pub amplitude: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            duration_seconds: 8.0,
            sample_rate: 22050,
            channels: 1,
            amplitude: 0.3,
        }
    }
}

impl AudioConfig {
    pub fn with_duration(duration_seconds: f32) -> Self {
        Self {
            duration_seconds,
            ..Self::default()
        }
    }

    pub fn total_frames(&self) -> usize {
        (self.duration_seconds * self.sample_rate as f32).round() as usize
    }
}

/// Signals the generator can render
#[derive(Debug, Clone, Copy)]
pub enum Signal {
    /// Pure sine
    Tone { frequency: f32 },
    /// Short decaying 2 kHz bursts on every beat
    ClickTrack { bpm: f32 },
    /// Sustained C major triad with the tonic doubled an octave up, plus clicks
    Groove { bpm: f32 },
    Silence,
}

const C4: f32 = 261.63;
const E4: f32 = 329.63;
const G4: f32 = 392.00;
const C5: f32 = 523.25;

/// Render one channel of `signal`, peak-limited to `config.amplitude`
pub fn render(signal: Signal, config: &AudioConfig) -> Vec<f32> {
    let sr = config.sample_rate as f32;
    let frames = config.total_frames();
    let amp = config.amplitude;

    let click = |i: usize, bpm: f32| -> f32 {
        let period = (60.0 / bpm * sr).round() as usize;
        let pos = i % period.max(1);
        let t = pos as f32 / sr;
        if t < 0.03 {
            (-t * 150.0).exp() * (2.0 * PI * 2000.0 * t).sin()
        } else {
            0.0
        }
    };

    (0..frames)
        .map(|i| {
            let t = i as f32 / sr;
            match signal {
                Signal::Tone { frequency } => amp * (2.0 * PI * frequency * t).sin(),
                Signal::ClickTrack { bpm } => amp * click(i, bpm),
                Signal::Groove { bpm } => {
                    let chord = [C4, E4, G4, C5]
                        .iter()
                        .map(|f| (2.0 * PI * f * t).sin())
                        .sum::<f32>()
                        / 4.0;
                    amp * (0.6 * chord + 0.4 * click(i, bpm))
                }
                Signal::Silence => 0.0,
            }
        })
        .collect()
}

fn wav_spec(config: &AudioConfig) -> WavSpec {
    WavSpec {
        channels: config.channels,
        sample_rate: config.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

fn write_samples<W>(writer: &mut WavWriter<W>, samples: &[f32], channels: u16) -> Result<()>
where
    W: std::io::Write + std::io::Seek,
{
    for &s in samples {
        let value = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        for _ in 0..channels {
            writer.write_sample(value)?;
        }
    }
    Ok(())
}

/// Encode mono samples as an in-memory WAV (duplicated across channels)
pub fn wav_bytes(samples: &[f32], config: &AudioConfig) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            WavWriter::new(&mut cursor, wav_spec(config)).expect("Failed to create WAV writer");
        write_samples(&mut writer, samples, config.channels).expect("Failed to write samples");
        writer.finalize().expect("Failed to finalize WAV");
    }
    cursor.into_inner()
}

fn metadata(config: &AudioConfig) -> AssetMetadata {
    AssetMetadata {
        format: AudioFormat::Wav,
        duration_secs: config.total_frames() as f64 / config.sample_rate as f64,
        sample_rate: config.sample_rate,
        channels: config.channels,
    }
}

/// Render `signal` and wrap it as a WAV asset with matching declared metadata
pub fn wav_asset(signal: Signal, config: &AudioConfig) -> AudioAsset {
    let bytes = wav_bytes(&render(signal, config), config);
    AudioAsset::new(bytes, metadata(config))
}

/// Asset that declares a valid WAV but carries garbage bytes
pub fn corrupted_asset(config: &AudioConfig) -> AudioAsset {
    let bytes = b"not an audio stream ".repeat(256);
    AudioAsset::new(bytes, metadata(config))
}

/// Generate a WAV file on disk
pub fn generate_test_wav(path: &Path, signal: Signal, config: &AudioConfig) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = WavWriter::create(path, wav_spec(config))?;
    write_samples(&mut writer, &render(signal, config), config.channels)?;
    writer.finalize()?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_bytes_have_riff_header() {
        let config = AudioConfig::with_duration(0.5);
        let bytes = wav_bytes(&render(Signal::Tone { frequency: 440.0 }, &config), &config);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
    }
}
