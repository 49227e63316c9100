//! Endpoint naming and the platform stream behind a channel.
//!
//! | Platform | Transport          | Name                          |
//! |----------|--------------------|-------------------------------|
//! | Windows  | named pipe         | `\\.\pipe\hostlink.<id>`      |
//! | Unix     | Unix domain socket | `<temp_dir>/hostlink.<id>.sock` |

use crate::error::HostError;
use crate::ipc::channel::Channel;
#[cfg(unix)]
use crate::ipc::channel::PeerIdentity;

/// Endpoint ids end up in pipe names and file paths.
pub fn validate_id(channel_id: &str) -> Result<(), HostError> {
    let valid = !channel_id.is_empty()
        && channel_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(HostError::InvalidEndpoint(channel_id.to_string()))
    }
}

/// OS-level name of the endpoint for `channel_id`.
pub fn channel_name(channel_id: &str) -> Result<String, HostError> {
    validate_id(channel_id)?;

    #[cfg(target_os = "windows")]
    {
        Ok(format!(r"\\.\pipe\hostlink.{channel_id}"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        Ok(std::env::temp_dir()
            .join(format!("hostlink.{channel_id}.sock"))
            .to_string_lossy()
            .into_owned())
    }
}

// ── Unix ─────────────────────────────────────────────────────────

#[cfg(unix)]
pub(crate) async fn connect(channel_id: &str) -> Result<Channel, HostError> {
    let name = channel_name(channel_id)?;
    let stream = tokio::net::UnixStream::connect(&name).await?;
    let peer = unix_peer_identity(&stream);
    tracing::debug!(endpoint = %name, ?peer, "connected");
    Ok(Channel::from_stream(stream, peer))
}

#[cfg(unix)]
pub(crate) fn unix_peer_identity(stream: &tokio::net::UnixStream) -> PeerIdentity {
    let process_id = stream
        .peer_cred()
        .ok()
        .and_then(|cred| cred.pid())
        .and_then(|pid| u32::try_from(pid).ok());

    PeerIdentity {
        process_id,
        session_id: process_id.and_then(session_id_of),
    }
}

/// Audit session of `pid`; unset sessions read as `u32::MAX`.
#[cfg(target_os = "linux")]
fn session_id_of(pid: u32) -> Option<u32> {
    std::fs::read_to_string(format!("/proc/{pid}/sessionid"))
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
        .filter(|&id| id != u32::MAX)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn session_id_of(pid: u32) -> Option<u32> {
    let sid = unsafe { libc::getsid(pid as libc::pid_t) };
    u32::try_from(sid).ok()
}

// ── Windows ──────────────────────────────────────────────────────

#[cfg(target_os = "windows")]
pub(crate) use self::windows_impl::{connect, create_pipe_instance, pipe_peer_identity};

#[cfg(target_os = "windows")]
mod windows_impl {
    use std::io;
    use std::os::windows::io::AsRawHandle;

    use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeServer, ServerOptions};
    use windows::Win32::Foundation::{BOOL, HANDLE, HLOCAL, LocalFree};
    use windows::Win32::Security::Authorization::{
        ConvertStringSecurityDescriptorToSecurityDescriptorW, SDDL_REVISION_1,
    };
    use windows::Win32::Security::{PSECURITY_DESCRIPTOR, SECURITY_ATTRIBUTES};
    use windows::Win32::System::Pipes::{GetNamedPipeClientProcessId, GetNamedPipeServerProcessId};
    use windows::Win32::System::RemoteDesktop::ProcessIdToSessionId;
    use windows::core::w;

    use super::channel_name;
    use crate::error::HostError;
    use crate::ipc::channel::{Channel, PeerIdentity};

    // Full access for LocalSystem and interactive users, nobody else.
    const PIPE_SDDL: windows::core::PCWSTR = w!("D:P(A;;GA;;;SY)(A;;GA;;;IU)");

    pub(crate) async fn connect(channel_id: &str) -> Result<Channel, HostError> {
        let name = channel_name(channel_id)?;
        let client = ClientOptions::new().open(&name)?;
        let peer = pipe_peer_identity(HANDLE(client.as_raw_handle()), false);
        tracing::debug!(endpoint = %name, ?peer, "connected");
        Ok(Channel::from_stream(client, peer))
    }

    /// Create one listening instance of the pipe.
    pub(crate) fn create_pipe_instance(name: &str, first: bool) -> io::Result<NamedPipeServer> {
        let mut descriptor = PSECURITY_DESCRIPTOR::default();
        unsafe {
            ConvertStringSecurityDescriptorToSecurityDescriptorW(
                PIPE_SDDL,
                SDDL_REVISION_1,
                &mut descriptor,
                None,
            )
        }
        .map_err(io::Error::other)?;

        let mut attributes = SECURITY_ATTRIBUTES {
            nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
            lpSecurityDescriptor: descriptor.0,
            bInheritHandle: BOOL(0),
        };

        let mut options = ServerOptions::new();
        options.first_pipe_instance(first).reject_remote_clients(true);
        let result = unsafe {
            options.create_with_security_attributes_raw(name, &mut attributes as *mut _ as *mut _)
        };

        unsafe {
            let _ = LocalFree(HLOCAL(descriptor.0));
        }
        result
    }

    pub(crate) fn pipe_peer_identity(handle: HANDLE, is_server: bool) -> PeerIdentity {
        let mut pid = 0u32;
        let resolved = unsafe {
            if is_server {
                GetNamedPipeClientProcessId(handle, &mut pid)
            } else {
                GetNamedPipeServerProcessId(handle, &mut pid)
            }
        };
        if let Err(err) = resolved {
            tracing::warn!(error = %err, "cannot resolve pipe peer process");
            return PeerIdentity::default();
        }

        let mut session = 0u32;
        let session_id = unsafe { ProcessIdToSessionId(pid, &mut session) }
            .ok()
            .map(|_| session);

        PeerIdentity {
            process_id: Some(pid),
            session_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_restricted() {
        assert!(validate_id("1234.5.abcdef").is_ok());
        assert!(validate_id("a-b_c").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("../etc").is_err());
        assert!(validate_id(r"pipe\name").is_err());
    }

    #[test]
    fn name_embeds_id() {
        let name = channel_name("abc").unwrap();
        assert!(name.contains("hostlink.abc"));
    }

    #[tokio::test]
    async fn connect_to_missing_endpoint_fails() {
        let err = Channel::connect("missing-endpoint-for-test").await.unwrap_err();
        assert!(matches!(err, HostError::Connection(_)));
    }
}
