//! Win32 implementation of the launch primitives.

use std::ffi::c_void;
use std::io;

use tracing::debug;
use windows::Win32::Foundation::{
    BOOL, CloseHandle, ERROR_NOT_ALL_ASSIGNED, GetLastError, HANDLE, LUID,
};
use windows::Win32::Security::{
    AdjustTokenPrivileges, DuplicateTokenEx, ImpersonateLoggedOnUser, LUID_AND_ATTRIBUTES,
    LookupPrivilegeValueW, RevertToSelf, SE_PRIVILEGE_ENABLED, SE_TCB_NAME, SecurityImpersonation,
    SetTokenInformation, TOKEN_ACCESS_MASK, TOKEN_ADJUST_DEFAULT, TOKEN_ADJUST_PRIVILEGES,
    TOKEN_ADJUST_SESSIONID, TOKEN_ASSIGN_PRIMARY, TOKEN_DUPLICATE, TOKEN_IMPERSONATE,
    TOKEN_PRIVILEGES, TOKEN_QUERY, TokenPrimary, TokenSessionId, TokenUIAccess,
};
use windows::Win32::System::Environment::{CreateEnvironmentBlock, DestroyEnvironmentBlock};
use windows::Win32::System::RemoteDesktop::WTSQueryUserToken;
use windows::Win32::System::Threading::{
    CREATE_UNICODE_ENVIRONMENT, CreateProcessAsUserW, GetCurrentProcess, GetCurrentThread,
    HIGH_PRIORITY_CLASS, OpenProcessToken, OpenThreadToken, PROCESS_INFORMATION, STARTUPINFOW,
};
use windows::core::{PCWSTR, PWSTR};

use crate::error::{LaunchError, LaunchStep};
use crate::launcher::backend::{LaunchBackend, TokenAccess};
use crate::launcher::command_line::CommandLine;

/// Name of the default interactive desktop.
const DEFAULT_DESKTOP: &str = "winsta0\\default";

fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn step(step: LaunchStep) -> impl Fn(windows::core::Error) -> LaunchError {
    move |e| LaunchError::step(step, io::Error::from(e))
}

/// Token handle closed on drop.
#[derive(Debug)]
pub struct OwnedToken(HANDLE);

impl Drop for OwnedToken {
    fn drop(&mut self) {
        if !self.0.is_invalid() {
            let _ = unsafe { CloseHandle(self.0) };
        }
    }
}

/// Environment block released on drop.
struct EnvironmentBlock(*mut c_void);

impl Drop for EnvironmentBlock {
    fn drop(&mut self) {
        let _ = unsafe { DestroyEnvironmentBlock(self.0) };
    }
}

#[derive(Debug, Default)]
pub struct Win32Backend;

impl Win32Backend {
    pub fn new() -> Self {
        Self
    }
}

impl LaunchBackend for Win32Backend {
    type Token = OwnedToken;

    fn copy_process_token(&self, access: TokenAccess) -> Result<OwnedToken, LaunchError> {
        let desired: TOKEN_ACCESS_MASK = match access {
            TokenAccess::Privileged => {
                TOKEN_ADJUST_PRIVILEGES | TOKEN_IMPERSONATE | TOKEN_DUPLICATE | TOKEN_QUERY
            }
            TokenAccess::Session => {
                TOKEN_ADJUST_DEFAULT
                    | TOKEN_ADJUST_SESSIONID
                    | TOKEN_ASSIGN_PRIMARY
                    | TOKEN_DUPLICATE
                    | TOKEN_QUERY
            }
        };

        let mut process_token = HANDLE::default();
        unsafe { OpenProcessToken(GetCurrentProcess(), TOKEN_DUPLICATE | desired, &mut process_token) }
            .map_err(step(LaunchStep::OpenProcessToken))?;
        let process_token = OwnedToken(process_token);

        let mut duplicate = HANDLE::default();
        unsafe {
            DuplicateTokenEx(
                process_token.0,
                desired,
                None,
                SecurityImpersonation,
                TokenPrimary,
                &mut duplicate,
            )
        }
        .map_err(step(LaunchStep::DuplicateToken))?;

        Ok(OwnedToken(duplicate))
    }

    fn enable_tcb_privilege(&self, token: &OwnedToken) -> Result<(), LaunchError> {
        let mut state = TOKEN_PRIVILEGES {
            PrivilegeCount: 1,
            Privileges: [LUID_AND_ATTRIBUTES {
                Luid: LUID::default(),
                Attributes: SE_PRIVILEGE_ENABLED,
            }],
        };

        unsafe { LookupPrivilegeValueW(PCWSTR::null(), SE_TCB_NAME, &mut state.Privileges[0].Luid) }
            .map_err(step(LaunchStep::LookupPrivilege))?;

        unsafe { AdjustTokenPrivileges(token.0, BOOL(0), Some(&state), 0, None, None) }
            .map_err(step(LaunchStep::AdjustPrivileges))?;

        // Succeeds without assigning when the process lacks the privilege.
        if unsafe { GetLastError() } == ERROR_NOT_ALL_ASSIGNED {
            return Err(LaunchError::step(
                LaunchStep::AdjustPrivileges,
                io::Error::from_raw_os_error(ERROR_NOT_ALL_ASSIGNED.0 as i32),
            ));
        }
        Ok(())
    }

    fn impersonate(&self, token: &OwnedToken) -> Result<(), LaunchError> {
        unsafe { ImpersonateLoggedOnUser(token.0) }.map_err(step(LaunchStep::Impersonate))
    }

    fn revert_to_self(&self) -> io::Result<()> {
        unsafe { RevertToSelf() }.map_err(io::Error::from)
    }

    fn set_token_session_id(&self, token: &OwnedToken, session_id: u32) -> Result<(), LaunchError> {
        unsafe {
            SetTokenInformation(
                token.0,
                TokenSessionId,
                &session_id as *const u32 as *const c_void,
                std::mem::size_of::<u32>() as u32,
            )
        }
        .map_err(step(LaunchStep::SetSessionId))
    }

    fn set_token_ui_access(&self, token: &OwnedToken) -> Result<(), LaunchError> {
        let ui_access: u32 = 1;
        unsafe {
            SetTokenInformation(
                token.0,
                TokenUIAccess,
                &ui_access as *const u32 as *const c_void,
                std::mem::size_of::<u32>() as u32,
            )
        }
        .map_err(step(LaunchStep::SetUiAccess))
    }

    fn query_user_token(&self, session_id: u32) -> Result<OwnedToken, LaunchError> {
        let mut token = HANDLE::default();
        unsafe { WTSQueryUserToken(session_id, &mut token) }
            .map_err(step(LaunchStep::QueryUserToken))?;
        Ok(OwnedToken(token))
    }

    fn create_process_with_token(
        &self,
        token: &OwnedToken,
        command_line: &CommandLine,
    ) -> Result<(), LaunchError> {
        let mut environment: *mut c_void = std::ptr::null_mut();
        unsafe { CreateEnvironmentBlock(&mut environment, token.0, BOOL(0)) }
            .map_err(step(LaunchStep::CreateEnvironment))?;
        let environment = EnvironmentBlock(environment);

        let mut desktop = to_wide(DEFAULT_DESKTOP);
        let mut command = to_wide(&command_line.to_command_string());

        let startup_info = STARTUPINFOW {
            cb: std::mem::size_of::<STARTUPINFOW>() as u32,
            lpDesktop: PWSTR(desktop.as_mut_ptr()),
            ..Default::default()
        };
        let mut process_info = PROCESS_INFORMATION::default();

        unsafe {
            CreateProcessAsUserW(
                token.0,
                PCWSTR::null(),
                PWSTR(command.as_mut_ptr()),
                None,
                None,
                BOOL(0),
                CREATE_UNICODE_ENVIRONMENT | HIGH_PRIORITY_CLASS,
                Some(environment.0 as *const c_void),
                PCWSTR::null(),
                &startup_info,
                &mut process_info,
            )
        }
        .map_err(step(LaunchStep::CreateProcess))?;

        debug!(pid = process_info.dwProcessId, "agent process created");

        unsafe {
            let _ = CloseHandle(process_info.hThread);
            let _ = CloseHandle(process_info.hProcess);
        }
        Ok(())
    }

    fn is_impersonating(&self) -> bool {
        let mut token = HANDLE::default();
        let opened = unsafe { OpenThreadToken(GetCurrentThread(), TOKEN_QUERY, BOOL(1), &mut token) };
        match opened {
            Ok(()) => {
                drop(OwnedToken(token));
                true
            }
            Err(_) => false,
        }
    }
}
