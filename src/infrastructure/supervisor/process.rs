//! Worker as a child process of the current executable, talking over loopback TCP

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

use super::protocol::{decode, encode, ControlMessage, DownstreamMessage, CONTROL_ADDR_ENV};
use super::{WorkerHandle, WorkerLauncher};
use crate::application::errors::SupervisorError;

pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self) -> Result<WorkerHandle, SupervisorError> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| SupervisorError::Spawn(format!("control listener: {}", e)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| SupervisorError::Spawn(format!("control listener: {}", e)))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(CONTROL_ADDR_ENV, addr.to_string())
            .stdin(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SupervisorError::Spawn(format!("{}: {}", self.program.display(), e)))?;
        tracing::debug!("Spawned worker pid {:?}, control on {}", child.id(), addr);

        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let (control_tx, mut control_rx) = mpsc::unbounded_channel::<DownstreamMessage>();
        let (exit_tx, exit_rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut writer: Option<OwnedWriteHalf> = None;
            let mut reader = None;
            let status = loop {
                tokio::select! {
                    accepted = listener.accept(), if writer.is_none() => match accepted {
                        Ok((stream, _)) => {
                            let (read_half, write_half) = stream.into_split();
                            writer = Some(write_half);
                            reader = Some(tokio::spawn(read_messages(read_half, message_tx.clone())));
                        }
                        Err(e) => tracing::warn!("Failed to accept worker connection: {}", e),
                    },
                    Some(message) = control_rx.recv() => match writer.as_mut() {
                        Some(writer) => {
                            if let Err(e) = write_message(writer, &message).await {
                                tracing::warn!("Failed to send to worker: {}", e);
                            }
                        }
                        None if message == DownstreamMessage::Shutdown => {
                            if let Err(e) = child.start_kill() {
                                tracing::warn!("Failed to stop worker: {}", e);
                            }
                        }
                        None => tracing::warn!("Worker not connected, dropping {:?}", message),
                    },
                    status = child.wait() => break status,
                }
            };

            // everything the worker wrote is delivered before its exit
            if let Some(reader) = reader {
                let _ = reader.await;
            }
            let code = match status {
                Ok(status) => exit_code(status),
                Err(e) => {
                    tracing::warn!("Failed to wait for worker: {}", e);
                    1
                }
            };
            let _ = exit_tx.send(code);
        });

        Ok(WorkerHandle {
            messages: message_rx,
            control: control_tx,
            exit: exit_rx,
        })
    }
}

async fn read_messages(read_half: OwnedReadHalf, messages: mpsc::UnboundedSender<ControlMessage>) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match decode::<ControlMessage>(&line) {
                Ok(message) => {
                    if messages.send(message).is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!("Ignoring worker message: {}", e),
            },
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("Worker connection closed: {}", e);
                break;
            }
        }
    }
}

async fn write_message(writer: &mut OwnedWriteHalf, message: &DownstreamMessage) -> Result<(), SupervisorError> {
    let line = encode(message)?;
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| SupervisorError::Channel(e.to_string()))
}

/// Exit code of a finished worker. Signals map to `128 + signal` like a shell reports them.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
