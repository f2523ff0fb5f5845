//! Audio services used by the extraction pipeline

pub mod audio_decoder;

pub use audio_decoder::{read_metadata, AudioDecoder, DecodedAudio, ANALYSIS_SAMPLE_RATE};
