//! Slow down recorded WAV files, either by relabelling their sample rate
//! (pitch follows speed) or by time-stretching them through a processing
//! graph (pitch preserved).
//!
//! | Module     | Role                                                  |
//! |------------|-------------------------------------------------------|
//! | [`audio`]  | formats, WAV containers, negotiation, conversion      |
//! | [`graph`]  | threaded source → units → tap render graph            |
//! | [`engine`] | direct-resample and time-stretch transforms           |
//! | [`job`]    | job coordinator, state machine, output naming         |
//! | [`config`] | `settings.toml` and platform paths                    |

pub mod audio;
pub mod config;
pub mod engine;
pub mod graph;
pub mod job;
