//! File-player source node.
//!
//! The player pulls blocks from an [`AudioReader`] on its own thread and pushes
//! them into the graph's bounded queue. When the reader runs dry the completion
//! handler fires. Blocks still queued or inside the unit chain at that point
//! have not reached the tap yet.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::audio::{AudioReader, FrameBlock};

use super::GraphError;

/// Why the player stopped feeding the graph.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEnd {
    /// The reader returned an empty block.
    Exhausted,
    /// `stop()` was called or the graph went away.
    Stopped,
    /// The reader failed mid-stream.
    ReadFailed(String),
}

/// Invoked once, from the player thread, when playback ends.
pub type CompletionHandler = Box<dyn FnOnce(PlaybackEnd) + Send>;

struct ScheduledFile {
    reader: Box<dyn AudioReader>,
    on_complete: CompletionHandler,
}

pub struct FilePlayer {
    block_frames: usize,
    scheduled: Option<ScheduledFile>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FilePlayer {
    pub fn new(block_frames: usize) -> Self {
        Self {
            block_frames: block_frames.max(1),
            scheduled: None,
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn schedule(&mut self, reader: Box<dyn AudioReader>, on_complete: CompletionHandler) {
        self.scheduled = Some(ScheduledFile {
            reader,
            on_complete,
        });
    }

    pub fn has_scheduled(&self) -> bool {
        self.scheduled.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.handle.is_some()
    }

    /// Start feeding `queue` on a dedicated thread.
    pub fn play(&mut self, queue: SyncSender<FrameBlock>) -> Result<(), GraphError> {
        if self.handle.is_some() {
            return Err(GraphError::AlreadyRunning);
        }
        let scheduled = self.scheduled.take().ok_or(GraphError::NothingScheduled)?;
        let stop = Arc::clone(&self.stop);
        let block_frames = self.block_frames;

        let handle = std::thread::Builder::new()
            .name("graph-source".into())
            .spawn(move || feed(scheduled, queue, stop, block_frames))
            .map_err(|e| GraphError::Spawn {
                name: "graph-source",
                reason: e.to_string(),
            })?;

        self.handle = Some(handle);
        Ok(())
    }

    /// Ask the player thread to stop without waiting for it.
    ///
    /// A read already in progress runs to completion on the detached thread;
    /// its block is dropped unsent.
    pub fn detach(&mut self) {
        self.stop.store(true, Ordering::Release);
        if self.handle.take().is_some() {
            log::debug!("graph: source thread detached");
        }
    }

    /// Ask the player thread to stop and wait for it to exit.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("graph: source thread panicked");
            }
        }
    }
}

fn feed(
    scheduled: ScheduledFile,
    queue: SyncSender<FrameBlock>,
    stop: Arc<AtomicBool>,
    block_frames: usize,
) {
    let ScheduledFile {
        mut reader,
        on_complete,
    } = scheduled;

    let mut frames: u64 = 0;
    let end = loop {
        if stop.load(Ordering::Acquire) {
            break PlaybackEnd::Stopped;
        }
        match reader.read_next(block_frames) {
            Ok(_) if stop.load(Ordering::Acquire) => break PlaybackEnd::Stopped,
            Ok(block) if block.is_empty() => break PlaybackEnd::Exhausted,
            Ok(block) => {
                frames += block.frame_count() as u64;
                if queue.send(block).is_err() {
                    break PlaybackEnd::Stopped;
                }
            }
            Err(e) => break PlaybackEnd::ReadFailed(e.to_string()),
        }
    };

    log::debug!("graph: source finished after {frames} frames ({end:?})");
    on_complete(end);
    drop(queue);
}
