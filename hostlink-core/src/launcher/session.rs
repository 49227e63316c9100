//! The two launch strategies.
//!
//! ```text
//! As-System (desktop):
//!   session = copy_process_token(Session)
//!   privileged = copy_process_token(Privileged) + enable_tcb_privilege
//!   [impersonate privileged] set_token_session_id(session) [revert]
//!   set_token_ui_access(session)
//!   create_process_with_token(session)
//!
//! As-User (file transfer):
//!   privileged = copy_process_token(Privileged) + enable_tcb_privilege
//!   [impersonate privileged] user = query_user_token(session_id) [revert]
//!   create_process_with_token(user)
//! ```

use tracing::{info, warn};

use crate::error::LaunchError;
use crate::launcher::backend::{LaunchBackend, TokenAccess};
use crate::launcher::command_line::CommandLine;
use crate::launcher::impersonation::ImpersonationGuard;
use crate::launcher::{AgentRole, SessionType};

pub struct SessionLauncher<B: LaunchBackend> {
    backend: B,
}

impl<B: LaunchBackend> SessionLauncher<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Launch `command_line` in `session_id` with the strategy matching
    /// `session_type`.
    pub fn launch(
        &self,
        session_type: SessionType,
        session_id: u32,
        command_line: &CommandLine,
    ) -> Result<(), LaunchError> {
        let result = match session_type.agent_role() {
            AgentRole::Desktop => self.launch_as_system(session_id, command_line),
            AgentRole::FileTransfer => self.launch_as_user(session_id, command_line),
        };

        match &result {
            Ok(()) => info!(?session_type, session_id, "session process launched"),
            Err(err) => warn!(?session_type, session_id, error = %err, "session launch failed"),
        }
        result
    }

    pub fn launch_as_system(&self, session_id: u32, command_line: &CommandLine) -> Result<(), LaunchError> {
        let session_token = self.create_session_token(session_id)?;
        self.backend.create_process_with_token(&session_token, command_line)
    }

    pub fn launch_as_user(&self, session_id: u32, command_line: &CommandLine) -> Result<(), LaunchError> {
        let privileged_token = self.create_privileged_token()?;

        let user_token = {
            let _impersonation = ImpersonationGuard::impersonate(&self.backend, &privileged_token)?;
            self.backend.query_user_token(session_id)?
        };

        self.backend.create_process_with_token(&user_token, command_line)
    }

    /// Copy of the process token retargeted to `session_id`, with UI
    /// access enabled.
    pub fn create_session_token(&self, session_id: u32) -> Result<B::Token, LaunchError> {
        let session_token = self.backend.copy_process_token(TokenAccess::Session)?;
        let privileged_token = self.create_privileged_token()?;

        {
            let _impersonation = ImpersonationGuard::impersonate(&self.backend, &privileged_token)?;
            self.backend.set_token_session_id(&session_token, session_id)?;
        }

        self.backend.set_token_ui_access(&session_token)?;
        Ok(session_token)
    }

    /// Copy of the process token with the TCB privilege enabled.
    pub fn create_privileged_token(&self) -> Result<B::Token, LaunchError> {
        let token = self.backend.copy_process_token(TokenAccess::Privileged)?;
        self.backend.enable_tcb_privilege(&token)?;
        Ok(token)
    }
}
