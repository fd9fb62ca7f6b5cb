//! The flash orchestration pipeline.
//!
//! [`FlashPipeline::run`] drives a [`FlashSession`] through [`Stage`]s strictly in order, one
//! transition per stage via [`Stage::transition`]. Every exit path, including panics inside a
//! stage, goes through [`CleanupManager::cleanup`] exactly once before the session terminates.

mod cleanup;
mod report;
mod session;
mod stage;
mod stages;

pub use cleanup::CleanupManager;
pub use report::{FlashReport, FlashWarning};
pub use session::FlashSession;
pub use stage::{IllegalTransition, Outcome, Stage, StageEvent};

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use uniflash_error::{FlashError, FlashResult};
use uniflash_hal::{DiskOps, FilesystemType};

use crate::boot_support::BootSupportFetcher;
use crate::config::FlashSettings;
use crate::request::FlashRequest;
use crate::status::{CancelToken, StatusSink};

/// Everything a pipeline needs from its owner.
pub struct FlashContext {
    pub hal: Arc<dyn DiskOps>,
    pub fetcher: Arc<dyn BootSupportFetcher>,
    pub sink: Arc<StatusSink>,
    pub settings: FlashSettings,
}

pub struct FlashPipeline {
    ctx: FlashContext,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl FlashPipeline {
    pub fn new(ctx: FlashContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &FlashContext {
        &self.ctx
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.ctx.sink.cancel_token()
    }

    /// Run one flash session to completion on the calling thread.
    pub fn run(&self, request: &FlashRequest) -> FlashReport {
        let sink = &self.ctx.sink;
        let mut session = FlashSession::new(request.filesystem);
        sink.info(format!(
            "Writing {} to {} ({}, {})",
            request.source.display(),
            request.target,
            request.mode,
            request.filesystem
        ));

        let driven = panic::catch_unwind(AssertUnwindSafe(|| self.drive(&mut session, request)));
        let outcome = match driven {
            Ok(Ok(())) => Outcome::Success,
            Ok(Err(FlashError::Cancelled)) => {
                sink.warning(format!("Cancelled during {}", session.stage));
                session.last_error = Some(FlashError::Cancelled);
                Outcome::Cancelled
            }
            Ok(Err(err)) => {
                session.last_error = Some(sink.fatal(err));
                Outcome::Failed
            }
            Err(payload) => {
                let err = FlashError::Internal(format!(
                    "fault during {}: {}",
                    session.stage,
                    panic_message(payload.as_ref())
                ));
                session.last_error = Some(sink.fatal(err));
                Outcome::Failed
            }
        };

        self.finish(&mut session, outcome);
        session.into_report()
    }

    /// Run one session on its own thread.
    pub fn spawn(self, request: FlashRequest) -> io::Result<PipelineHandle> {
        let cancel = self.cancel_token();
        let requested = request.filesystem;
        let handle = thread::Builder::new()
            .name("uniflash-pipeline".to_string())
            .spawn(move || self.run(&request))?;
        Ok(PipelineHandle {
            cancel,
            requested,
            handle,
        })
    }

    fn drive(&self, session: &mut FlashSession, request: &FlashRequest) -> FlashResult<()> {
        loop {
            let stage = session.stage;
            if matches!(stage, Stage::CleaningUp | Stage::Terminated(_)) {
                return Ok(());
            }
            if self.ctx.sink.cancel_requested() {
                return Err(FlashError::Cancelled);
            }
            self.ctx.sink.info(stage.description());
            let event = self.run_stage(stage, session, request)?;
            session.advance(event)?;
        }
    }

    /// Move any unfinished session to cleanup, clean up, and settle on `outcome`.
    fn finish(&self, session: &mut FlashSession, mut outcome: Outcome) {
        if session.stage != Stage::CleaningUp {
            if let Err(err) = session.advance(StageEvent::Aborted) {
                log::error!("{}", err);
            }
        }

        CleanupManager::new(self.ctx.hal.as_ref(), &self.ctx.sink).cleanup(session);

        if let Err(err) = session.advance(StageEvent::CleanedUp(outcome)) {
            log::error!("{}", err);
            outcome = Outcome::Failed;
            session.stage = Stage::Terminated(outcome);
            session.history.push(session.stage);
        }
        match outcome {
            Outcome::Success => {
                if session.warnings.is_empty() {
                    self.ctx.sink.info("Done.");
                } else {
                    self.ctx.sink.warning(format!(
                        "Done, with {} warning(s).",
                        session.warnings.len()
                    ));
                }
            }
            Outcome::Cancelled => log::info!("session cancelled"),
            Outcome::Failed => log::info!("session failed"),
        }
    }
}

/// A session running on its own thread.
#[derive(Debug)]
pub struct PipelineHandle {
    cancel: CancelToken,
    requested: FilesystemType,
    handle: JoinHandle<FlashReport>,
}

impl PipelineHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> FlashReport {
        match self.handle.join() {
            Ok(report) => report,
            Err(payload) => FlashReport::internal_failure(
                self.requested,
                format!("pipeline thread died: {}", panic_message(payload.as_ref())),
            ),
        }
    }
}
