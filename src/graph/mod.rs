//! Offline processing graph: file source → units → tap → discard.
//!
//! # Architecture
//!
//! ```text
//! graph-source thread                    graph-render thread
//! ┌──────────────┐   sync_channel(4)   ┌───────────────────────────────┐
//! │ FilePlayer   │ ──── FrameBlock ──▶ │ unit chain → TapPoint → drop  │
//! │ read_next()  │                     │ flush chain on end of stream  │
//! └──────┬───────┘                     └───────────────────────────────┘
//!        └─ on_complete(PlaybackEnd) fires once the reader is exhausted
//! ```
//!
//! Rendering is not paced to a clock: blocks are processed as fast as the
//! source produces them. The completion handler runs as soon as the source
//! is drained, which is earlier than the last block reaches the tap.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use slowdown::audio::{open_for_read, AudioFormat, AudioReader};
//! use slowdown::graph::{ProcessingGraph, TimePitchUnit};
//!
//! let reader = open_for_read("input.wav").unwrap();
//! let format = reader.format();
//!
//! let mut graph = ProcessingGraph::new(format, 4096);
//! graph.attach(TimePitchUnit::new(format, 0.75, 1024).unwrap()).unwrap();
//! graph.install_tap(|block| println!("{} frames", block.frame_count()));
//! graph.schedule_file(Box::new(reader), |end| println!("source done: {end:?}")).unwrap();
//! graph.start().unwrap();
//! graph.play().unwrap();
//! // ... wait for completion ...
//! graph.stop();
//! ```

pub mod player;
pub mod tap;
pub mod unit;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;

use thiserror::Error;

use crate::audio::{AudioFormat, AudioReader, FrameBlock};

pub use player::{CompletionHandler, FilePlayer, PlaybackEnd};
pub use tap::{TapCallback, TapPoint};
pub use unit::{AudioUnit, TimePitchUnit};

/// Blocks buffered between the source and render threads.
const QUEUE_DEPTH: usize = 4;

// ---------------------------------------------------------------------------
// GraphError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("Invalid playback rate {0} (must be finite and > 0)")]
    InvalidRate(f64),

    #[error("Invalid window of {0} frames (must be a positive multiple of 4)")]
    InvalidWindow(usize),

    #[error("Processing graph is already running")]
    AlreadyRunning,

    #[error("Processing graph has not been started")]
    NotRunning,

    #[error("No file scheduled on the player")]
    NothingScheduled,

    #[error("Scheduled file is {scheduled_rate} Hz / {scheduled_channels} ch but the graph runs {graph_rate} Hz / {graph_channels} ch")]
    FormatMismatch {
        scheduled_rate: u32,
        scheduled_channels: u16,
        graph_rate: u32,
        graph_channels: u16,
    },

    #[error("Failed to spawn {name} thread: {reason}")]
    Spawn { name: &'static str, reason: String },
}

// ---------------------------------------------------------------------------
// ProcessingGraph
// ---------------------------------------------------------------------------

/// A single-source, single-chain offline render graph.
///
/// Lifecycle: `attach` units and `install_tap`, `schedule_file`, `start`,
/// `play`, then `stop`. Dropping a running graph stops it.
pub struct ProcessingGraph {
    format: AudioFormat,
    units: Vec<Box<dyn AudioUnit>>,
    tap: TapPoint,
    player: FilePlayer,
    queue: Option<SyncSender<FrameBlock>>,
    render: Option<JoinHandle<()>>,
    stopped: Arc<AtomicBool>,
}

impl ProcessingGraph {
    /// Create an idle graph whose bus carries `format` audio.
    pub fn new(format: AudioFormat, block_frames: usize) -> Self {
        Self {
            format,
            units: Vec::new(),
            tap: TapPoint::new(),
            player: FilePlayer::new(block_frames),
            queue: None,
            render: None,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    pub fn is_running(&self) -> bool {
        self.render.is_some()
    }

    /// Append a unit to the chain. Units must be attached before `start`.
    pub fn attach(&mut self, unit: impl AudioUnit + 'static) -> Result<(), GraphError> {
        if self.is_running() {
            return Err(GraphError::AlreadyRunning);
        }
        log::debug!("graph: attached unit '{}'", unit.name());
        self.units.push(Box::new(unit));
        Ok(())
    }

    pub fn install_tap(&self, callback: impl FnMut(&FrameBlock) + Send + 'static) {
        self.tap.install(callback);
    }

    pub fn remove_tap(&self) -> bool {
        self.tap.remove()
    }

    /// Queue `reader` on the player. `on_complete` fires once, from the
    /// source thread, when the reader is drained, fails, or is stopped.
    pub fn schedule_file(
        &mut self,
        reader: Box<dyn AudioReader>,
        on_complete: impl FnOnce(PlaybackEnd) + Send + 'static,
    ) -> Result<(), GraphError> {
        let scheduled = reader.format();
        if scheduled.channels != self.format.channels
            || scheduled.container_rate() != self.format.container_rate()
        {
            return Err(GraphError::FormatMismatch {
                scheduled_rate: scheduled.container_rate(),
                scheduled_channels: scheduled.channels,
                graph_rate: self.format.container_rate(),
                graph_channels: self.format.channels,
            });
        }
        self.player.schedule(reader, Box::new(on_complete));
        Ok(())
    }

    /// Spawn the render thread. The unit chain moves onto it.
    pub fn start(&mut self) -> Result<(), GraphError> {
        if self.is_running() {
            return Err(GraphError::AlreadyRunning);
        }

        let (tx, rx) = mpsc::sync_channel::<FrameBlock>(QUEUE_DEPTH);
        let units = std::mem::take(&mut self.units);
        let tap = self.tap.clone();
        let stopped = Arc::clone(&self.stopped);

        let handle = std::thread::Builder::new()
            .name("graph-render".into())
            .spawn(move || render(rx, units, tap, stopped))
            .map_err(|e| GraphError::Spawn {
                name: "graph-render",
                reason: e.to_string(),
            })?;

        self.queue = Some(tx);
        self.render = Some(handle);
        log::debug!(
            "graph: started at {} Hz / {} ch",
            self.format.container_rate(),
            self.format.channels
        );
        Ok(())
    }

    /// Begin pulling from the scheduled file.
    pub fn play(&mut self) -> Result<(), GraphError> {
        if !self.is_running() {
            return Err(GraphError::NotRunning);
        }
        if !self.player.has_scheduled() {
            return Err(GraphError::NothingScheduled);
        }
        let queue = self.queue.take().ok_or(GraphError::AlreadyRunning)?;
        self.player.play(queue)
    }

    /// Stop the source, drain the queue without rendering, and join both
    /// threads. Safe to call more than once.
    pub fn stop(&mut self) {
        self.stopped.store(true, Ordering::Release);
        self.player.stop();
        self.queue = None;
        if let Some(handle) = self.render.take() {
            if handle.join().is_err() {
                log::error!("graph: render thread panicked");
            }
            log::debug!("graph: stopped");
        }
    }

    /// Stop without joining either thread.
    ///
    /// Used when the source may be blocked inside a read. Both threads exit
    /// on their own once the read returns.
    pub fn abandon(&mut self) {
        self.stopped.store(true, Ordering::Release);
        self.player.detach();
        self.queue = None;
        if self.render.take().is_some() {
            log::warn!("graph: abandoned without waiting for worker threads");
        }
    }
}

impl Drop for ProcessingGraph {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Render thread
// ---------------------------------------------------------------------------

fn render(
    queue: Receiver<FrameBlock>,
    mut units: Vec<Box<dyn AudioUnit>>,
    tap: TapPoint,
    stopped: Arc<AtomicBool>,
) {
    let mut frames_out: u64 = 0;
    let mut deliver = |out: FrameBlock| {
        frames_out += out.frame_count() as u64;
        tap.deliver(&out);
    };

    while let Ok(block) = queue.recv() {
        if stopped.load(Ordering::Acquire) {
            continue;
        }
        run_chain(&mut units, block, &mut deliver);
    }

    if !stopped.load(Ordering::Acquire) {
        flush_chain(&mut units, &mut deliver);
    }

    log::debug!("graph: render finished after {frames_out} frames");
}

/// Push `block` through `units` in order, handing the chain's output to `sink`.
fn run_chain(units: &mut [Box<dyn AudioUnit>], block: FrameBlock, sink: &mut dyn FnMut(FrameBlock)) {
    match units.split_first_mut() {
        None => sink(block),
        Some((head, rest)) => head.process(block, &mut |out| run_chain(rest, out, sink)),
    }
}

/// Flush each unit in order, pushing its tail through the units after it.
fn flush_chain(units: &mut [Box<dyn AudioUnit>], sink: &mut dyn FnMut(FrameBlock)) {
    for i in 0..units.len() {
        let (head, rest) = units.split_at_mut(i + 1);
        head[i].flush(&mut |tail| run_chain(rest, tail, sink));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
