//! Audio plumbing: formats, containers, negotiation and conversion.
//!
//! # Pipeline
//!
//! ```text
//! WAV file → open_for_read → FrameBlock (4096 frames)
//!          → StreamConverter / graph → FrameBlock → open_for_write → WAV file
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use slowdown::audio::{open_for_read, open_for_write, derive_output_format, AudioReader, AudioWriter, Strategy};
//!
//! let mut reader = open_for_read("input.wav").unwrap();
//! let format = derive_output_format(&reader.format(), 0.75, Strategy::DirectResample).unwrap();
//! let mut writer = open_for_write("output.wav", &format).unwrap();
//!
//! loop {
//!     let block = reader.read_next(4096).unwrap();
//!     if block.is_empty() {
//!         break;
//!     }
//!     writer.write(&block.relabel(format)).unwrap();
//! }
//! Box::new(writer).finalize().unwrap();
//! ```

pub mod container;
pub mod format;
pub mod negotiate;
pub mod resample;

#[cfg(test)]
pub(crate) mod fixtures;

pub use container::{
    open_for_read, open_for_write, AudioReader, AudioWriter, ContainerError, WavFileReader,
    WavFileWriter,
};
pub use format::{AudioFormat, FrameBlock, SampleKind, FRAME_BLOCK_CAPACITY};
pub use negotiate::{
    derive_output_format, validate_multiplier, FormatError, Strategy, MIN_RATE_MULTIPLIER,
};
pub use resample::{downmix_to_mono, remix_channels, ConversionError, StreamConverter};
