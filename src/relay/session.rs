//! Connection pair state machine
//!
//! One [`Session`] owns a client connection and, once the handshake names a
//! destination, the upstream connection forwarded to. The session task
//! drives the pair through `Handshaking → Connecting → Streaming → Closed`
//! and tears both endpoints down together when either side ends.
//!
//! Each direction relays through one fixed-size buffer in a sequential
//! `read → cipher → write` loop, so a direction never reads while it still
//! has unsent bytes. That bounds in-flight data at [`BUF_SIZE`] per
//! direction and stalls reads while the sink exerts backpressure.

use super::{Address, ConnGuard, Endpoint, RelayError, RelayState, Stage};
use crate::crypto::{CipherContext, Direction};
use crate::BUF_SIZE;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

/// One client connection and its forwarded upstream connection
pub struct Session {
    client: TcpStream,
    peer: SocketAddr,
    stage: Stage,
    state: Arc<RelayState>,
}

impl Session {
    pub fn new(client: TcpStream, peer: SocketAddr, state: Arc<RelayState>) -> Self {
        Self {
            client,
            peer,
            stage: Stage::Handshaking,
            state,
        }
    }

    /// Drive the pair through its whole lifecycle
    ///
    /// Returns once both endpoints are torn down; the error describes why
    /// the pair ended early. Errors never propagate past the session.
    pub async fn run(mut self) -> Result<(), RelayError> {
        let _client_open = ConnGuard::open(&self.state, Endpoint::Client);

        let mut d_ctx = self.state.cipher().context(Direction::Decrypt);
        let mut e_ctx = self.state.cipher().context(Direction::Encrypt);

        let result = self.drive(&mut d_ctx, &mut e_ctx).await;
        self.advance(Stage::Closed);
        result
    }

    fn advance(&mut self, stage: Stage) {
        trace!(peer = %self.peer, from = ?self.stage, to = ?stage, "stage change");
        self.stage = stage;
    }

    async fn drive(
        &mut self,
        d_ctx: &mut CipherContext,
        e_ctx: &mut CipherContext,
    ) -> Result<(), RelayError> {
        let peer = self.peer;

        let (dest, residual) = self.read_request(d_ctx).await?;
        debug!(%peer, %dest, residual = residual.len(), "handshake complete");

        self.advance(Stage::Connecting);
        let mut upstream = self.connect_upstream(&dest).await?;
        let _upstream_open = ConnGuard::open(&self.state, Endpoint::Upstream);

        self.advance(Stage::Streaming);

        let (mut client_read, mut client_write) = self.client.split();
        let (mut upstream_read, mut upstream_write) = upstream.split();

        let client_to_upstream = async {
            let mut buf = [0u8; BUF_SIZE];
            let mut relayed = residual.len() as u64;
            upstream_write.write_all(&residual).await?;
            loop {
                let n = client_read.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                d_ctx.apply(&mut buf[..n]);
                upstream_write.write_all(&buf[..n]).await?;
                relayed += n as u64;
            }
            std::io::Result::Ok(relayed)
        };

        let upstream_to_client = async {
            let mut buf = [0u8; BUF_SIZE];
            let mut relayed = 0u64;
            loop {
                let n = upstream_read.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                e_ctx.apply(&mut buf[..n]);
                client_write.write_all(&buf[..n]).await?;
                relayed += n as u64;
            }
            std::io::Result::Ok(relayed)
        };

        // Either direction ending, by EOF or by error, tears down the whole
        // pair: the select drops the other direction mid-flight and both
        // sockets close with the session.
        tokio::select! {
            r = client_to_upstream => {
                let relayed = r?;
                trace!(%peer, %dest, relayed, "client side ended");
            }
            r = upstream_to_client => {
                let relayed = r?;
                trace!(%peer, %dest, relayed, "upstream side ended");
            }
        }

        Ok(())
    }

    /// Read and decrypt the request header
    ///
    /// Keeps reading until the header parses, decrypting each received
    /// chunk in place as it arrives so the keystream stays in byte order.
    /// Returns the destination plus any decrypted payload bytes that
    /// followed the header in the same stream.
    async fn read_request(
        &mut self,
        d_ctx: &mut CipherContext,
    ) -> Result<(Address, Vec<u8>), RelayError> {
        let mut buf = [0u8; BUF_SIZE];
        let mut filled = 0;

        loop {
            let n = self.client.read(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(RelayError::TruncatedHandshake);
            }
            d_ctx.apply(&mut buf[filled..filled + n]);
            filled += n;

            match Address::parse(&buf[..filled])? {
                Some((dest, consumed)) => {
                    return Ok((dest, buf[consumed..filled].to_vec()));
                }
                // A valid header fits in a few hundred bytes; a full buffer
                // without one is garbage
                None if filled == buf.len() => return Err(RelayError::BadHandshake),
                None => {}
            }
        }
    }

    /// Connect to the destination within the configured timeout
    async fn connect_upstream(&mut self, dest: &Address) -> Result<TcpStream, RelayError> {
        let connect = async {
            match dest {
                Address::Ipv4(ip, port) => TcpStream::connect((*ip, *port)).await,
                Address::Domain(host, port) => TcpStream::connect((host.as_str(), *port)).await,
            }
        };

        let upstream = timeout(self.state.connect_timeout(), connect)
            .await
            .map_err(|_| RelayError::ConnectTimeout(dest.to_string()))??;

        upstream.set_nodelay(true).ok();
        debug!(peer = %self.peer, %dest, "upstream connected");
        Ok(upstream)
    }
}
