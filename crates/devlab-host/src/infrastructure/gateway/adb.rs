//! ADB shell gateway.
//!
//! Runs one command per connection: the smart socket dedicates a
//! connection to a single service, so the gateway opens a fresh one,
//! narrows it to the target device with `host:transport:<serial>`,
//! switches it into `shell:<command>`, and then reads the command's
//! output until the server closes the stream.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use devlab_core::{decode_status, encode_request, DeviceId, ProtocolError};

use crate::application::dispatch_intents::{DeviceGateway, GatewayError};

/// Runs device shell commands through a local ADB server.
pub struct AdbGateway {
    addr: SocketAddr,
}

impl AdbGateway {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Sends one framed request and waits for the server's OKAY.
    ///
    /// Leftover bytes past the verdict stay in `recv_buf`; after a
    /// `shell:` request they are the first bytes of command output.
    async fn send_request(
        stream: &mut TcpStream,
        recv_buf: &mut Vec<u8>,
        service: &str,
    ) -> Result<(), GatewayError> {
        let request = encode_request(service)?;
        stream.write_all(&request).await?;

        let mut chunk = [0u8; 1024];
        loop {
            match decode_status(recv_buf) {
                Ok(consumed) => {
                    recv_buf.drain(..consumed);
                    return Ok(());
                }
                Err(ProtocolError::InsufficientData { .. }) => {
                    let n = stream.read(&mut chunk).await?;
                    if n == 0 {
                        return Err(GatewayError::ClosedEarly);
                    }
                    recv_buf.extend_from_slice(&chunk[..n]);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl DeviceGateway for AdbGateway {
    async fn shell(&self, device_id: &DeviceId, command: &str) -> Result<Vec<u8>, GatewayError> {
        let mut stream =
            TcpStream::connect(self.addr)
                .await
                .map_err(|source| GatewayError::Connect {
                    addr: self.addr.to_string(),
                    source,
                })?;

        let mut recv_buf = Vec::with_capacity(1024);
        Self::send_request(
            &mut stream,
            &mut recv_buf,
            &format!("host:transport:{}", device_id),
        )
        .await?;
        Self::send_request(&mut stream, &mut recv_buf, &format!("shell:{}", command)).await?;

        // Everything until EOF is the command's output.
        let mut output = recv_buf;
        stream.read_to_end(&mut output).await?;
        debug!(
            "shell on {}: {:?} returned {} bytes",
            device_id,
            command,
            output.len()
        );
        Ok(output)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
