//! `SessionDispatcher` (spec §4.8): per-session transport state and the
//! activation transition that runs one synchronous transaction.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::error::{CoreError, Result};
use crate::registry::{Handle, Registry};

/// Attribute-pairing cursor for the two-part `{username, password}`
/// authorisation attribute (spec §3): the password half can only be
/// written after the username half, and deleting the username half
/// resets the cursor so a half-written pair never silently completes
/// with a stale password.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthCursor {
    /// Neither half written.
    Empty,
    /// Username written, password not yet supplied.
    UsernameSet,
    /// Both halves present; ready to authenticate.
    Complete,
}

/// Static per-protocol metadata (spec §4.8 "protocol-info table").
#[derive(Debug, Clone, Copy)]
pub struct ProtocolInfo {
    /// Minimum protocol version this session will accept.
    pub min_version: u8,
    /// Maximum protocol version this session will accept.
    pub max_version: u8,
    /// `true` if this protocol rides over HTTP request/response framing
    /// rather than a raw persistent socket.
    pub is_http_transport: bool,
    /// `true` if the protocol is strictly request-then-response (no
    /// server-initiated messages).
    pub is_request_response: bool,
    /// Send/receive buffer size to preallocate for this protocol.
    pub buffer_size: usize,
}

/// SCEP-over-HTTP protocol info (spec §6).
pub const SCEP_PROTOCOL_INFO: ProtocolInfo = ProtocolInfo {
    min_version: 1,
    max_version: 1,
    is_http_transport: true,
    is_request_response: true,
    buffer_size: 16 * 1024,
};

/// CMP-over-TCP protocol info (spec §6).
pub const CMP_PROTOCOL_INFO: ProtocolInfo = ProtocolInfo {
    min_version: 10,
    max_version: 10,
    is_http_transport: false,
    is_request_response: false,
    buffer_size: 16 * 1024,
};

/// Per-session dispatcher state (spec §4.8).
pub struct DispatcherSession {
    protocol_info: ProtocolInfo,
    auth_cursor: AuthCursor,
    username: Option<String>,
    auth_response_written: bool,
    is_open: bool,
    is_server: bool,
    send_closed: bool,
    last_message: bool,
    active: bool,
    connection_active: bool,
    connect_timeout: Duration,
    data_timeout: Duration,
    send_buffer: Vec<u8>,
    recv_buffer: Vec<u8>,
}

impl DispatcherSession {
    /// A freshly-opened session for `protocol_info`, not yet activated.
    pub fn new(protocol_info: ProtocolInfo, is_server: bool, connect_timeout: Duration, data_timeout: Duration) -> Self {
        Self {
            protocol_info,
            auth_cursor: AuthCursor::Empty,
            username: None,
            auth_response_written: false,
            is_open: true,
            is_server,
            send_closed: false,
            last_message: false,
            active: false,
            connection_active: false,
            connect_timeout,
            data_timeout,
            send_buffer: Vec::with_capacity(protocol_info.buffer_size),
            recv_buffer: Vec::with_capacity(protocol_info.buffer_size),
        }
    }

    /// Write the username half of the paired authorisation attribute.
    pub fn set_username(&mut self, username: String) {
        self.username = Some(username);
        self.auth_cursor = AuthCursor::UsernameSet;
    }

    /// Write the password half. Rejected unless the username half is
    /// already present (spec §3's attribute-pairing rule).
    pub fn set_password(&mut self) -> Result<()> {
        if self.auth_cursor != AuthCursor::UsernameSet {
            return Err(CoreError::NotInited(
                "username must be written before password in the auth pair".to_string(),
            ));
        }
        self.auth_cursor = AuthCursor::Complete;
        Ok(())
    }

    /// Delete the username half, resetting the pairing cursor (spec
    /// §4.8: "deleting the first half of a paired attribute resets the
    /// pairing cursor").
    pub fn clear_username(&mut self) {
        self.username = None;
        self.auth_cursor = AuthCursor::Empty;
    }

    /// Record that the out-of-band `authResponse` attribute has been
    /// supplied, satisfying the "partially-open, waiting for user
    /// authorisation" gate.
    pub fn write_auth_response(&mut self) {
        self.auth_response_written = true;
    }

    /// Attempt to set `active`. `false` is always permitted (spec §4.8).
    /// Setting `true` while the session is mid-authorisation without
    /// `authResponse` present is rejected, pointing at the missing
    /// attribute; otherwise the caller may proceed to run a transaction.
    pub fn set_active(&mut self, active: bool) -> Result<()> {
        if !active {
            self.active = false;
            return Ok(());
        }
        if self.auth_cursor == AuthCursor::UsernameSet && !self.auth_response_written {
            return Err(CoreError::NotInited(
                "authResponse must be written before re-activating a partially-open session".to_string(),
            ));
        }
        self.active = true;
        Ok(())
    }

    /// `true` once a transaction has completed and the connection is
    /// being kept open for reuse rather than torn down.
    pub fn connection_active(&self) -> bool {
        self.connection_active
    }

    fn current_timeout(&self) -> Duration {
        if self.connection_active {
            self.data_timeout
        } else {
            self.connect_timeout
        }
    }

    /// Zeroise transport buffers and the username (password is never
    /// buffered as plaintext past its one comparison) and mark the
    /// session closed (spec §5 "secret zeroisation").
    pub fn shutdown(&mut self) {
        use zeroize::Zeroize;
        self.send_buffer.zeroize();
        self.recv_buffer.zeroize();
        self.username = None;
        self.is_open = false;
        self.send_closed = true;
    }
}

/// Drives session activation: reads one request, hands it to `handler`,
/// writes the response, and flips the session back to inactive while
/// keeping the transport open for a subsequent transaction (spec §4.8
/// "persistent connections").
pub struct Dispatcher {
    sessions: Registry<DispatcherSession>,
}

impl Dispatcher {
    /// An empty dispatcher.
    pub fn new() -> Self {
        Self { sessions: Registry::new() }
    }

    /// Register a new session, returning its handle.
    pub fn open_session(&self, session: DispatcherSession) -> Handle {
        self.sessions.insert(session)
    }

    /// Run one activation: read a request via `transport`, pass it to
    /// `handler`, and write the response back. The connect/handshake
    /// timeout governs the read until the first successful transaction;
    /// the data timeout governs every read after that (spec §5's
    /// one-way timeout switch).
    #[instrument(skip(self, transport, handler))]
    pub async fn activate<T, H, Fut>(&self, handle: Handle, transport: &mut T, handler: H) -> Result<()>
    where
        T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
        H: FnOnce(Vec<u8>) -> Fut,
        Fut: std::future::Future<Output = Result<Vec<u8>>>,
    {
        self.sessions.with_mut(handle, |s| s.set_active(true))??;

        let read_timeout = self.sessions.with(handle, |s| s.current_timeout())?;
        let mut request = vec![0u8; 64 * 1024];
        let n = timeout(read_timeout, transport.read(&mut request))
            .await
            .map_err(|_| CoreError::Timeout("session read timed out".to_string()))?
            .map_err(|e| CoreError::Read(e.to_string()))?;
        request.truncate(n);
        debug!(bytes = n, "read request");

        let response = handler(request).await?;

        let write_timeout = self.sessions.with(handle, |s| s.data_timeout)?;
        timeout(write_timeout, transport.write_all(&response))
            .await
            .map_err(|_| CoreError::Timeout("session write timed out".to_string()))?
            .map_err(|e| CoreError::Write(e.to_string()))?;

        self.sessions.with_mut(handle, |s| {
            s.set_active(false).ok();
            s.connection_active = true;
        })?;

        Ok(())
    }

    /// Tear down a session: zeroise its buffers and remove it from the
    /// registry.
    pub fn close_session(&self, handle: Handle) -> Result<()> {
        self.sessions.with_mut(handle, |s| s.shutdown())?;
        if let Err(e) = self.sessions.destroy(handle) {
            warn!(%e, "closing an already-destroyed session");
        }
        Ok(())
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session() -> DispatcherSession {
        DispatcherSession::new(SCEP_PROTOCOL_INFO, true, Duration::from_secs(30), Duration::from_secs(90))
    }

    #[test]
    fn deactivation_is_always_permitted() {
        let mut session = test_session();
        assert!(session.set_active(false).is_ok());
    }

    #[test]
    fn reactivating_mid_auth_without_response_is_rejected() {
        let mut session = test_session();
        session.set_username("alice".to_string());
        let err = session.set_active(true);
        assert!(matches!(err, Err(CoreError::NotInited(_))));
    }

    #[test]
    fn auth_response_unblocks_reactivation() {
        let mut session = test_session();
        session.set_username("alice".to_string());
        session.write_auth_response();
        assert!(session.set_active(true).is_ok());
    }

    #[test]
    fn password_before_username_is_rejected() {
        let mut session = test_session();
        assert!(session.set_password().is_err());
    }

    #[test]
    fn clearing_username_resets_pairing_cursor() {
        let mut session = test_session();
        session.set_username("alice".to_string());
        session.clear_username();
        assert!(session.set_password().is_err());
    }

    #[tokio::test]
    async fn activate_runs_a_transaction_and_keeps_connection_open() {
        let dispatcher = Dispatcher::new();
        let handle = dispatcher.open_session(test_session());

        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(b"ping").await.unwrap();

        dispatcher
            .activate(handle, &mut server, |req| async move {
                assert_eq!(req, b"ping");
                Ok(b"pong".to_vec())
            })
            .await
            .unwrap();

        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        let still_open = dispatcher.sessions.with(handle, |s| s.connection_active()).unwrap();
        assert!(still_open);
    }
}
