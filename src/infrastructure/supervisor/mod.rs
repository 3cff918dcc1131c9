//! Process supervisor - keeps one worker alive and relays control messages

pub mod link;
pub mod policy;
pub mod process;
pub mod protocol;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::application::errors::SupervisorError;
use crate::infrastructure::config::SupervisorConfig;
use policy::{decide, ExitDecision, RestartBudget};
use protocol::{ControlMessage, DownstreamMessage, StartBody};

pub use link::WorkerLink;
pub use policy::{RESTART_EXIT_CODE, TERMINAL_EXIT_CODES};
pub use process::ProcessLauncher;
pub use protocol::{OutboundPayload, CONTROL_ADDR_ENV};

/// Channels to one running worker
pub struct WorkerHandle {
    /// Messages the worker sent
    pub messages: mpsc::UnboundedReceiver<ControlMessage>,
    /// Messages for the worker
    pub control: mpsc::UnboundedSender<DownstreamMessage>,
    /// Resolves with the exit code once the worker is gone
    pub exit: oneshot::Receiver<i32>,
}

#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self) -> Result<WorkerHandle, SupervisorError>;
}

/// Parent side of the worker model
pub struct Supervisor<L> {
    launcher: L,
    max_restarts: u32,
    restart_window: Duration,
    restart_delay: Duration,
    /// Single-slot buffer; the latest `queue` payload wins
    buffer: Option<serde_json::Value>,
}

impl<L: WorkerLauncher> Supervisor<L> {
    pub fn new(launcher: L, config: &SupervisorConfig) -> Self {
        Self {
            launcher,
            max_restarts: config.max_restarts,
            restart_window: config.restart_window(),
            restart_delay: config.restart_delay(),
            buffer: None,
        }
    }

    pub fn buffered(&self) -> Option<&serde_json::Value> {
        self.buffer.as_ref()
    }

    /// Run workers until the exit policy says stop. Returns the code to exit with.
    pub async fn run(&mut self, mut interrupts: mpsc::Receiver<()>) -> Result<i32, SupervisorError> {
        let mut budget = RestartBudget::new(self.max_restarts, self.restart_window);
        let mut interrupts_open = true;

        loop {
            let mut worker = self.launcher.launch().await?;
            info!("Worker started");
            let mut start: Option<StartBody> = None;

            let code = loop {
                tokio::select! {
                    biased;
                    Some(message) = worker.messages.recv() => {
                        self.handle(message, &mut start, &worker.control);
                    }
                    code = &mut worker.exit => {
                        while let Ok(message) = worker.messages.try_recv() {
                            self.handle(message, &mut start, &worker.control);
                        }
                        break code.unwrap_or_else(|_| {
                            warn!("Worker exit status lost");
                            1
                        });
                    }
                    interrupt = interrupts.recv(), if interrupts_open => match interrupt {
                        Some(()) => {
                            info!("Interrupt received, forwarding to worker");
                            if worker.control.send(DownstreamMessage::Shutdown).is_err() {
                                warn!("Worker control channel closed");
                            }
                        }
                        None => interrupts_open = false,
                    },
                }
            };

            match decide(start.as_ref(), code) {
                ExitDecision::Terminate(code) => {
                    info!("Worker exited with code {}, stopping", code);
                    return Ok(code);
                }
                ExitDecision::Respawn => {
                    if !budget.try_acquire(Instant::now()) {
                        error!(
                            "Worker exited with code {}: {} restarts within {:?}, giving up",
                            code, self.max_restarts, self.restart_window
                        );
                        return Ok(code);
                    }
                    info!("Worker exited with code {}, restarting", code);
                }
            }

            if !self.restart_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.restart_delay) => {}
                    Some(()) = interrupts.recv(), if interrupts_open => {
                        info!("Interrupt received with no live worker, exiting");
                        return Ok(0);
                    }
                }
            }
        }
    }

    fn handle(
        &mut self,
        message: ControlMessage,
        start: &mut Option<StartBody>,
        control: &mpsc::UnboundedSender<DownstreamMessage>,
    ) {
        match message {
            ControlMessage::Start(body) => {
                debug!("Worker announced start (auto restart: {})", body.auto_restart);
                *start = Some(body);
                if let Some(payload) = self.buffer.take() {
                    if let Err(mpsc::error::SendError(DownstreamMessage::Send(payload))) =
                        control.send(DownstreamMessage::Send(payload))
                    {
                        self.buffer = Some(payload);
                    }
                }
            }
            ControlMessage::Queue(payload) => {
                debug!("Buffered payload from worker");
                self.buffer = Some(payload);
            }
        }
    }
}
