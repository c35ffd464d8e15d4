//! Listen sockets and the accept loop

use super::{RelayError, RelayState, Session};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{lookup_host, TcpListener};
use tracing::{debug, error, info};

/// Accept backlog, matching SOMAXCONN on common systems
const LISTEN_BACKLOG: i32 = 1024;

/// One bound listening socket
pub struct RelayListener {
    listener: TcpListener,
    state: Arc<RelayState>,
}

impl RelayListener {
    /// Bind a non-blocking listening socket on `(host, port)`
    pub async fn bind(host: &str, port: u16, state: Arc<RelayState>) -> Result<Self, RelayError> {
        let addr: SocketAddr = lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| RelayError::BindAddress(format!("{host}:{port}")))?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;
        socket.set_nonblocking(true)?;

        let listener = TcpListener::from_std(socket.into())?;
        info!("listening on {}", listener.local_addr()?);

        Ok(Self { listener, state })
    }

    /// The bound local address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the task is dropped
    ///
    /// A failed accept or a failed session drops that connection only; the
    /// listener keeps accepting.
    pub async fn run(self) {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("accept failed: {e}");
                    continue;
                }
            };

            debug!(%peer, "accepted connection");
            stream.set_nodelay(true).ok();

            let session = Session::new(stream, peer, Arc::clone(&self.state));
            tokio::spawn(async move {
                if let Err(e) = session.run().await {
                    debug!(%peer, "session ended: {e}");
                }
            });
        }
    }
}
