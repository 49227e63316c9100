//! Listening side of the IPC transport.
//!
//! One server publishes one endpoint name and accepts any number of
//! sequential connections on it. Each accepted stream becomes a paused
//! [`Channel`] handed to the [`ServerDelegate`].

use std::process;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::HostError;
use crate::ipc::channel::Channel;
use crate::ipc::endpoint;

static UNIQUE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Receives accepted channels. Runs on the server's accept task.
pub trait ServerDelegate: Send {
    fn on_server_connection(&mut self, channel: Channel);
    /// The endpoint could not be re-armed; no more connections follow.
    fn on_server_error(&mut self);
}

#[derive(Debug)]
pub enum ServerEvent {
    Connection(Channel),
    Error,
}

impl ServerDelegate for mpsc::UnboundedSender<ServerEvent> {
    fn on_server_connection(&mut self, channel: Channel) {
        let _ = self.send(ServerEvent::Connection(channel));
    }

    fn on_server_error(&mut self) {
        let _ = self.send(ServerEvent::Error);
    }
}

#[derive(Debug, Default)]
pub struct Server {
    shutdown: Option<CancellationToken>,
    #[cfg(unix)]
    socket_path: Option<std::path::PathBuf>,
}

impl Server {
    pub fn new() -> Self {
        Self::default()
    }

    /// Endpoint id unique per call: process id, a per-process counter and
    /// a random UUID.
    pub fn create_unique_id() -> String {
        let counter = UNIQUE_COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("{}.{}.{}", process::id(), counter, Uuid::new_v4().simple())
    }

    pub fn is_started(&self) -> bool {
        self.shutdown.is_some()
    }

    /// Publish `channel_id` and start accepting. Creating the endpoint is
    /// synchronous; failure here is returned instead of reported to the
    /// delegate. Must be called inside a Tokio runtime.
    pub fn start(
        &mut self,
        channel_id: &str,
        delegate: impl ServerDelegate + 'static,
    ) -> Result<(), HostError> {
        if self.is_started() {
            return Err(HostError::AlreadyStarted);
        }

        let name = endpoint::channel_name(channel_id)?;
        let shutdown = CancellationToken::new();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let listener = tokio::net::UnixListener::bind(&name)?;
            // Only the owning user may connect.
            if let Err(err) = std::fs::set_permissions(&name, std::fs::Permissions::from_mode(0o600)) {
                let _ = std::fs::remove_file(&name);
                return Err(err.into());
            }
            self.socket_path = Some(std::path::PathBuf::from(&name));
            tokio::spawn(accept_loop(listener, delegate, shutdown.clone()));
        }

        #[cfg(target_os = "windows")]
        {
            let first = endpoint::create_pipe_instance(&name, true)?;
            tokio::spawn(accept_loop(name.clone(), first, delegate, shutdown.clone()));
        }

        info!(endpoint = %name, "server listening");
        self.shutdown = Some(shutdown);
        Ok(())
    }

    /// Stop accepting. Channels already handed out keep running.
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.cancel();
            debug!("server stopped");
        }

        #[cfg(unix)]
        {
            if let Some(path) = self.socket_path.take() {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(unix)]
async fn accept_loop(
    listener: tokio::net::UnixListener,
    mut delegate: impl ServerDelegate,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => return,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, _)) => {
                let peer = endpoint::unix_peer_identity(&stream);
                debug!(?peer, "connection accepted");
                delegate.on_server_connection(Channel::from_stream(stream, peer));
            }
            Err(err) => {
                error!(error = %err, "accept failed; server is inert");
                delegate.on_server_error();
                return;
            }
        }
    }
}

#[cfg(target_os = "windows")]
async fn accept_loop(
    name: String,
    mut pipe: tokio::net::windows::named_pipe::NamedPipeServer,
    mut delegate: impl ServerDelegate,
    shutdown: CancellationToken,
) {
    use std::os::windows::io::AsRawHandle;
    use windows::Win32::Foundation::HANDLE;

    loop {
        let connected = tokio::select! {
            _ = shutdown.cancelled() => return,
            connected = pipe.connect() => connected,
        };

        if let Err(err) = connected {
            error!(error = %err, "pipe connect failed; server is inert");
            delegate.on_server_error();
            return;
        }

        // Re-arm before handing out the connected instance so the name
        // stays published.
        let next = endpoint::create_pipe_instance(&name, false);

        let peer = endpoint::pipe_peer_identity(HANDLE(pipe.as_raw_handle()), true);
        debug!(?peer, "connection accepted");

        match next {
            Ok(next) => {
                let accepted = std::mem::replace(&mut pipe, next);
                delegate.on_server_connection(Channel::from_stream(accepted, peer));
            }
            Err(err) => {
                delegate.on_server_connection(Channel::from_stream(pipe, peer));
                error!(error = %err, "cannot re-arm pipe; server is inert");
                delegate.on_server_error();
                return;
            }
        }
    }
}
