//! OS primitives used by the launch sequence.

use std::io;

use crate::error::LaunchError;
use crate::launcher::command_line::CommandLine;

/// Access a duplicated process token is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAccess {
    /// Adjust privileges, impersonate, duplicate, query.
    Privileged,
    /// Adjust defaults and session id, assign primary, duplicate, query.
    Session,
}

/// Token operations of the launch sequence. Each call maps to one OS
/// step and reports failures as [`LaunchError::Step`].
///
/// Tokens are released when dropped.
pub trait LaunchBackend {
    type Token;

    /// Duplicate the current process token as a primary token.
    fn copy_process_token(&self, access: TokenAccess) -> Result<Self::Token, LaunchError>;

    /// Enable the "act as part of the operating system" privilege.
    fn enable_tcb_privilege(&self, token: &Self::Token) -> Result<(), LaunchError>;

    fn impersonate(&self, token: &Self::Token) -> Result<(), LaunchError>;

    fn revert_to_self(&self) -> io::Result<()>;

    fn set_token_session_id(&self, token: &Self::Token, session_id: u32) -> Result<(), LaunchError>;

    fn set_token_ui_access(&self, token: &Self::Token) -> Result<(), LaunchError>;

    /// Primary token of the user logged on to `session_id`.
    fn query_user_token(&self, session_id: u32) -> Result<Self::Token, LaunchError>;

    /// Start `command_line` on the default interactive desktop with the
    /// token's environment. Does not wait for the process.
    fn create_process_with_token(
        &self,
        token: &Self::Token,
        command_line: &CommandLine,
    ) -> Result<(), LaunchError>;

    /// Whether the calling thread is currently impersonating.
    fn is_impersonating(&self) -> bool;
}
