//! Scoped impersonation.

use tracing::error;

use crate::error::LaunchError;
use crate::launcher::backend::LaunchBackend;

/// Impersonates a token until dropped.
///
/// Dropping reverts to the process identity. If reverting fails the
/// thread would keep running with elevated rights, so the process aborts.
#[must_use = "impersonation ends when the guard is dropped"]
pub struct ImpersonationGuard<'a, B: LaunchBackend> {
    backend: &'a B,
}

impl<'a, B: LaunchBackend> ImpersonationGuard<'a, B> {
    pub fn impersonate(backend: &'a B, token: &B::Token) -> Result<Self, LaunchError> {
        backend.impersonate(token)?;
        Ok(Self { backend })
    }
}

impl<B: LaunchBackend> Drop for ImpersonationGuard<'_, B> {
    fn drop(&mut self) {
        if let Err(err) = self.backend.revert_to_self() {
            error!(error = %err, "RevertToSelf failed; aborting");
            std::process::abort();
        }
    }
}
