use std::ffi::OsStr;
use std::fs::File;
use std::os::windows::io::AsRawHandle;
use std::os::windows::process::CommandExt;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use windows_sys::Win32::Foundation::{CloseHandle, ERROR_LOCK_VIOLATION, HANDLE};
use windows_sys::Win32::Storage::FileSystem::{
    LockFileEx, UnlockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
};
use windows_sys::Win32::System::Registry::{
    RegGetValueW, HKEY, HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE, RRF_RT_REG_SZ,
};
use windows_sys::Win32::System::Threading::{
    GetExitCodeProcess, OpenProcess, CREATE_NEW_PROCESS_GROUP, DETACHED_PROCESS,
    PROCESS_QUERY_LIMITED_INFORMATION,
};
use windows_sys::Win32::System::IO::OVERLAPPED;

const STILL_ACTIVE: u32 = 259;
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

pub async fn kill_by_name(name: &str) {
    let image = format!("{name}.exe");
    let status = Command::new("taskkill")
        .args(["/F", "/IM", &image])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .creation_flags(CREATE_NO_WINDOW)
        .status()
        .await;
    debug!(process = %image, ok = status.is_ok(), "stray process sweep");
}

pub fn is_process_alive(pid: u32) -> bool {
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle.is_null() {
            return false;
        }
        let mut exit_code: u32 = 0;
        let result = GetExitCodeProcess(handle, &mut exit_code);
        CloseHandle(handle);
        result != 0 && exit_code == STILL_ACTIVE
    }
}

pub fn try_lock_exclusive(file: &File) -> std::io::Result<bool> {
    let handle = file.as_raw_handle() as HANDLE;
    // SAFETY: handle is valid for the lifetime of `file`; the overlapped
    // structure is only read during the synchronous call.
    let ok = unsafe {
        let mut overlapped: OVERLAPPED = std::mem::zeroed();
        LockFileEx(
            handle,
            LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
            0,
            1,
            0,
            &mut overlapped,
        )
    };
    if ok != 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
        Ok(false)
    } else {
        Err(err)
    }
}

pub fn unlock(file: &File) -> std::io::Result<()> {
    let handle = file.as_raw_handle() as HANDLE;
    // SAFETY: see try_lock_exclusive.
    let ok = unsafe {
        let mut overlapped: OVERLAPPED = std::mem::zeroed();
        UnlockFileEx(handle, 0, 1, 0, &mut overlapped)
    };
    if ok != 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn registry_string(root: HKEY, subkey: &str, value: &str) -> Option<String> {
    let subkey = wide(subkey);
    let value = wide(value);
    let mut size: u32 = 0;
    unsafe {
        let rc = RegGetValueW(
            root,
            subkey.as_ptr(),
            value.as_ptr(),
            RRF_RT_REG_SZ,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            &mut size,
        );
        if rc != 0 || size == 0 {
            return None;
        }
        let mut buf = vec![0u16; (size as usize).div_ceil(2)];
        let rc = RegGetValueW(
            root,
            subkey.as_ptr(),
            value.as_ptr(),
            RRF_RT_REG_SZ,
            std::ptr::null_mut(),
            buf.as_mut_ptr().cast(),
            &mut size,
        );
        if rc != 0 {
            return None;
        }
        let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
        Some(String::from_utf16_lossy(&buf[..len]))
    }
}

/// Machine PATH followed by user PATH, as currently stored in the registry.
fn registry_path() -> Option<String> {
    let parts: Vec<String> = [
        registry_string(
            HKEY_LOCAL_MACHINE,
            r"SYSTEM\CurrentControlSet\Control\Session Manager\Environment",
            "Path",
        ),
        registry_string(HKEY_CURRENT_USER, "Environment", "Path"),
    ]
    .into_iter()
    .flatten()
    .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(";"))
    }
}

pub fn system_env() -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = std::env::vars_os()
        .map(|(k, v)| {
            (
                k.to_string_lossy().into_owned(),
                v.to_string_lossy().into_owned(),
            )
        })
        .collect();

    let Some(fresh) = registry_path() else {
        return env;
    };
    match env.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case("PATH")) {
        Some(entry) => entry.1 = fresh,
        None => env.push(("PATH".to_string(), fresh)),
    }
    env
}

/// Privilege elevation is handled outside the supervisor on Windows.
pub fn is_elevated() -> bool {
    false
}

pub fn service_command(binary: &Path) -> Command {
    let mut cmd = Command::new(binary);
    cmd.creation_flags(CREATE_NO_WINDOW);
    cmd
}

pub fn set_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

pub fn link_binary(_target: &Path, _link: &Path) -> std::io::Result<bool> {
    Ok(false)
}

pub fn spawn_detached<I, S>(program: &str, args: I) -> std::io::Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    std::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP)
        .spawn()
        .map(|_| ())
}
