// ============================================================================
// BACKGROUND MASK JOBS: decode / encode / realign off the UI thread
// ============================================================================
//
// Jobs run on the rayon pool and report back over a channel. Every job
// carries the ticket it was issued under; the editor session decides whether
// a result is still current and drops it otherwise.

use image::RgbaImage;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;
use uuid::Uuid;

use crate::canvas::MaskBuffer;
use crate::components::session::MaskOutput;
use crate::error::MaskError;
use crate::io::CompressedMask;
use crate::log_err;
use crate::ops::codec::{decode_for_editing, encode_compressed, encode_display};
use crate::ops::transform::{BiasState, realign_mask};

/// Identifies the request a job result answers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct JobTicket {
    pub session: Uuid,
    pub generation: u64,
}

#[derive(Debug)]
pub enum JobOutput {
    Decoded(MaskBuffer),
    Saved(MaskOutput),
    Realigned(CompressedMask),
}

#[derive(Debug)]
pub struct JobResult {
    pub ticket: JobTicket,
    pub description: String,
    pub outcome: Result<JobOutput, MaskError>,
}

pub struct MaskJobQueue {
    sender: Sender<JobResult>,
    receiver: Receiver<JobResult>,
    pending: usize,
}

impl Default for MaskJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MaskJobQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            sender,
            receiver,
            pending: 0,
        }
    }

    /// Jobs spawned but not yet received.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Run `job` on the rayon pool. A panic inside the job is reported as a
    /// failed result instead of tearing down the worker.
    pub fn spawn(
        &mut self,
        ticket: JobTicket,
        description: impl Into<String>,
        job: impl FnOnce() -> Result<JobOutput, MaskError> + Send + 'static,
    ) {
        let sender = self.sender.clone();
        let description = description.into();
        self.pending += 1;
        rayon::spawn(move || {
            let outcome = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)) {
                Ok(outcome) => outcome,
                Err(panic_info) => {
                    let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                        s.to_string()
                    } else if let Some(s) = panic_info.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "unknown panic payload".to_string()
                    };
                    log_err!("Mask job '{}' panicked: {}", description, msg);
                    Err(MaskError::Worker(msg))
                }
            };
            let _ = sender.send(JobResult {
                ticket,
                description,
                outcome,
            });
        });
    }

    pub fn spawn_decode(&mut self, ticket: JobTicket, mask: CompressedMask, edit_w: u32, edit_h: u32) {
        self.spawn(ticket, "Decode mask", move || {
            decode_for_editing(&mask, edit_w, edit_h).map(JobOutput::Decoded)
        });
    }

    /// Encode an editing-form snapshot into both wire masks.
    pub fn spawn_save(&mut self, ticket: JobTicket, editing: RgbaImage, target_w: u32, target_h: u32) {
        self.spawn(ticket, "Save mask", move || {
            let compressed = encode_compressed(&editing, target_w, target_h)?;
            let display = encode_display(&editing, target_w, target_h)?;
            Ok(JobOutput::Saved(MaskOutput { compressed, display }))
        });
    }

    pub fn spawn_realign(
        &mut self,
        ticket: JobTicket,
        mask: CompressedMask,
        from: Option<BiasState>,
        to: BiasState,
        image: (u32, u32),
        target: (u32, u32),
    ) {
        self.spawn(ticket, "Realign mask", move || {
            realign_mask(&mask, from, to, image, target).map(JobOutput::Realigned)
        });
    }

    /// Non-blocking poll for one finished job.
    pub fn try_recv(&mut self) -> Option<JobResult> {
        match self.receiver.try_recv() {
            Ok(result) => {
                self.pending = self.pending.saturating_sub(1);
                Some(result)
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Block until a job finishes or `timeout` elapses.
    pub fn wait(&mut self, timeout: Duration) -> Option<JobResult> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => {
                self.pending = self.pending.saturating_sub(1);
                Some(result)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}
