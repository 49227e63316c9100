//! Session power actions requested by the peer.
//!
//! Both actions are fire-and-forget: failures are logged, nothing is
//! reported back.

use tracing::{info, warn};

pub trait PowerController: Send {
    fn logoff(&mut self);
    fn lock(&mut self);
}

/// Acts on the session the agent runs in.
#[derive(Debug, Default)]
pub struct SessionPowerController;

impl SessionPowerController {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(target_os = "windows")]
impl PowerController for SessionPowerController {
    fn logoff(&mut self) {
        use windows::Win32::System::Shutdown::{EWX_FORCE, EWX_LOGOFF, ExitWindowsEx, SHTDN_REASON_NONE};

        info!("logging off user session");
        if let Err(err) = unsafe { ExitWindowsEx(EWX_LOGOFF | EWX_FORCE, SHTDN_REASON_NONE) } {
            warn!(error = %err, "ExitWindowsEx failed");
        }
    }

    fn lock(&mut self) {
        use windows::Win32::System::Shutdown::LockWorkStation;

        info!("locking user session");
        if let Err(err) = unsafe { LockWorkStation() } {
            warn!(error = %err, "LockWorkStation failed");
        }
    }
}

#[cfg(not(target_os = "windows"))]
impl PowerController for SessionPowerController {
    fn logoff(&mut self) {
        info!("logoff requested");
        warn!("session logoff is not supported on this platform");
    }

    fn lock(&mut self) {
        info!("lock requested");
        warn!("session lock is not supported on this platform");
    }
}
