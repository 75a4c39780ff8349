//! Windows process metadata via the process and token APIs.

use std::path::Path;

use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::{
    CloseHandle, ERROR_ACCESS_DENIED, ERROR_INVALID_PARAMETER, FILETIME, HANDLE,
};
use windows::Win32::Security::{
    GetTokenInformation, LookupAccountSidW, TokenUser, SID_NAME_USE, TOKEN_QUERY, TOKEN_USER,
};
use windows::Win32::System::Threading::{
    GetProcessTimes, OpenProcess, OpenProcessToken, QueryFullProcessImageNameW,
    PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION,
};

use crate::domain::ProcessIdentity;
use crate::error::{Error, Result};

use super::ProcessSource;

/// 100ns intervals between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_EPOCH: u64 = 116_444_736_000_000_000;

/// Queries the process table through `OpenProcess`.
#[derive(Debug, Default, Clone)]
pub struct WindowsProcessSource;

impl WindowsProcessSource {
    pub fn new() -> Self {
        Self
    }
}

/// Closes the wrapped handle on drop.
struct OwnedHandle(HANDLE);

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        // SAFETY: the handle was returned by a successful open call.
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

fn filetime_to_unix_ms(ft: FILETIME) -> i64 {
    let ticks = ((ft.dwHighDateTime as u64) << 32) | ft.dwLowDateTime as u64;
    (ticks.saturating_sub(FILETIME_UNIX_EPOCH) / 10_000) as i64
}

fn open(pid: i32) -> Result<Option<OwnedHandle>> {
    // SAFETY: plain FFI call; the returned handle is owned by `OwnedHandle`.
    match unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid as u32) } {
        Ok(handle) => Ok(Some(OwnedHandle(handle))),
        Err(e) if e.code() == ERROR_INVALID_PARAMETER.to_hresult() => Ok(None),
        Err(e) if e.code() == ERROR_ACCESS_DENIED.to_hresult() => {
            Err(Error::PermissionDenied(format!("pid {}: {}", pid, e)))
        }
        Err(e) => Err(Error::CommandFailed(format!("OpenProcess({}) failed: {}", pid, e))),
    }
}

fn create_time_ms(handle: &OwnedHandle) -> i64 {
    let mut creation = FILETIME::default();
    let mut exit = FILETIME::default();
    let mut kernel = FILETIME::default();
    let mut user = FILETIME::default();
    // SAFETY: all out-pointers reference live stack values.
    match unsafe { GetProcessTimes(handle.0, &mut creation, &mut exit, &mut kernel, &mut user) } {
        Ok(()) => filetime_to_unix_ms(creation),
        Err(_) => 0,
    }
}

fn image_path(handle: &OwnedHandle) -> String {
    let mut buf = vec![0u16; 1024];
    let mut len = buf.len() as u32;
    // SAFETY: `buf` holds `len` UTF-16 units.
    let ok = unsafe {
        QueryFullProcessImageNameW(handle.0, PROCESS_NAME_WIN32, PWSTR(buf.as_mut_ptr()), &mut len)
    };
    match ok {
        Ok(()) => String::from_utf16_lossy(&buf[..len as usize]),
        Err(_) => String::new(),
    }
}

fn owner_name(handle: &OwnedHandle) -> String {
    let mut token = HANDLE::default();
    // SAFETY: `token` is an out-pointer to a stack value.
    if unsafe { OpenProcessToken(handle.0, TOKEN_QUERY, &mut token) }.is_err() {
        return String::new();
    }
    let token = OwnedHandle(token);

    let mut needed = 0u32;
    // SAFETY: size query with no buffer.
    let _ = unsafe { GetTokenInformation(token.0, TokenUser, None, 0, &mut needed) };
    if needed == 0 {
        return String::new();
    }
    let mut info = vec![0u8; needed as usize];
    // SAFETY: `info` is `needed` bytes long.
    let filled = unsafe {
        GetTokenInformation(
            token.0,
            TokenUser,
            Some(info.as_mut_ptr() as *mut _),
            needed,
            &mut needed,
        )
    };
    if filled.is_err() {
        return String::new();
    }
    // SAFETY: on success the buffer starts with a TOKEN_USER.
    let sid = unsafe { (*(info.as_ptr() as *const TOKEN_USER)).User.Sid };

    let mut name = vec![0u16; 256];
    let mut domain = vec![0u16; 256];
    let mut name_len = name.len() as u32;
    let mut domain_len = domain.len() as u32;
    let mut use_ = SID_NAME_USE::default();
    // SAFETY: both buffers are sized by their length arguments.
    let looked_up = unsafe {
        LookupAccountSidW(
            PCWSTR::null(),
            sid,
            PWSTR(name.as_mut_ptr()),
            &mut name_len,
            PWSTR(domain.as_mut_ptr()),
            &mut domain_len,
            &mut use_,
        )
    };
    match looked_up {
        Ok(()) => {
            let name = String::from_utf16_lossy(&name[..name_len as usize]);
            let domain = String::from_utf16_lossy(&domain[..domain_len as usize]);
            if domain.is_empty() {
                name
            } else {
                format!("{}\\{}", domain, name)
            }
        }
        Err(_) => String::new(),
    }
}

fn read_identity(pid: i32) -> Result<Option<ProcessIdentity>> {
    let Some(handle) = open(pid)? else {
        return Ok(None);
    };

    let exe_path = image_path(&handle);
    let name = Path::new(&exe_path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(Some(
        ProcessIdentity::new(pid, name)
            .with_create_time(create_time_ms(&handle))
            .with_exe_path(exe_path)
            .with_username(owner_name(&handle)),
    ))
}

impl ProcessSource for WindowsProcessSource {
    async fn identify(&self, pid: i32) -> Result<Option<ProcessIdentity>> {
        tokio::task::spawn_blocking(move || read_identity(pid))
            .await
            .map_err(|e| Error::CommandFailed(format!("process lookup task failed: {}", e)))?
    }

    /// Reading another process's command line needs its PEB; only the image
    /// path is reported.
    async fn cmdline(&self, pid: i32) -> Result<Option<String>> {
        let identity = self.identify(pid).await?;
        Ok(identity.map(|id| id.exe_path).filter(|p| !p.is_empty()))
    }
}
