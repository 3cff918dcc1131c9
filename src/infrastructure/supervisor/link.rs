//! Worker side of the control channel

use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};

use super::protocol::{decode, encode, ControlMessage, DownstreamMessage, StartBody, CONTROL_ADDR_ENV};
use crate::application::errors::SupervisorError;

pub struct WorkerLink {
    writer: Mutex<OwnedWriteHalf>,
}

impl WorkerLink {
    /// Connect to the supervisor named by `PLUGBOT_CONTROL_ADDR`.
    /// `None` when the worker runs unsupervised.
    pub async fn connect_from_env(
    ) -> Result<Option<(Self, mpsc::UnboundedReceiver<DownstreamMessage>)>, SupervisorError> {
        let Ok(addr) = std::env::var(CONTROL_ADDR_ENV) else {
            return Ok(None);
        };
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| SupervisorError::Channel(format!("invalid {}: {}", CONTROL_ADDR_ENV, e)))?;
        Self::connect(addr).await.map(Some)
    }

    pub async fn connect(
        addr: SocketAddr,
    ) -> Result<(Self, mpsc::UnboundedReceiver<DownstreamMessage>), SupervisorError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| SupervisorError::Channel(format!("connect {}: {}", addr, e)))?;
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                match decode::<DownstreamMessage>(&line) {
                    Ok(message) => {
                        if tx.send(message).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!("Ignoring supervisor message: {}", e),
                }
            }
            tracing::debug!("Supervisor connection closed");
        });

        Ok((
            Self {
                writer: Mutex::new(write_half),
            },
            rx,
        ))
    }

    pub async fn send(&self, message: &ControlMessage) -> Result<(), SupervisorError> {
        let line = encode(message)?;
        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| SupervisorError::Channel(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| SupervisorError::Channel(e.to_string()))
    }

    pub async fn announce_start(&self, auto_restart: bool) -> Result<(), SupervisorError> {
        self.send(&ControlMessage::Start(StartBody { auto_restart })).await
    }

    /// Hand a payload to the supervisor for replay to the next worker
    pub async fn queue(&self, payload: serde_json::Value) -> Result<(), SupervisorError> {
        self.send(&ControlMessage::Queue(payload)).await
    }
}
