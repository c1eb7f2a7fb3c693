//! [`OsMemoryApi`] backed by the real platform APIs.

use crate::os::{
    CallStatus, MemoryListCommand, OpenError, OsMemoryApi, Privilege, TrimPrimitive, TrimTarget,
};

/// Production OS layer for the platform the binary was built for.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeOs;

impl NativeOs {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(windows)]
mod imp {
    use super::*;
    use std::ffi::c_void;
    use windows_sys::Win32::Foundation::{
        CloseHandle, GetLastError, SetLastError, ERROR_SUCCESS, HANDLE, LUID,
    };
    use windows_sys::Win32::Security::{
        AdjustTokenPrivileges, LookupPrivilegeValueW, LUID_AND_ATTRIBUTES, SE_PRIVILEGE_ENABLED,
        TOKEN_ADJUST_PRIVILEGES, TOKEN_PRIVILEGES, TOKEN_QUERY,
    };
    use windows_sys::Win32::System::Memory::{
        GetProcessHeap, HeapCompact, SetProcessWorkingSetSizeEx,
    };
    use windows_sys::Win32::System::ProcessStatus::{
        EmptyWorkingSet, GetProcessMemoryInfo, PROCESS_MEMORY_COUNTERS,
    };
    use windows_sys::Win32::System::Threading::{
        GetCurrentProcess, GetCurrentProcessId, OpenProcess, OpenProcessToken,
        PROCESS_QUERY_INFORMATION, PROCESS_SET_QUOTA,
    };

    const SYSTEM_MEMORY_LIST_INFORMATION: i32 = 0x50;

    #[link(name = "ntdll")]
    extern "system" {
        fn NtSetSystemInformation(class: i32, information: *const c_void, length: u32) -> i32;
    }

    pub(super) const IN_PROCESS: &[TrimPrimitive] = &[
        TrimPrimitive::EmptyWorkingSet,
        TrimPrimitive::SetProcessWorkingSetSize,
        TrimPrimitive::HeapCompact,
    ];

    fn last_error() -> i32 {
        unsafe { GetLastError() as i32 }
    }

    /// Closes the wrapped handle on drop. Pseudo-handles are never closed.
    pub(super) struct ProcessHandle {
        handle: HANDLE,
        pid: u32,
        owned: bool,
    }

    impl ProcessHandle {
        pub(super) fn current() -> Self {
            Self {
                // SAFETY: both calls have no preconditions; the pseudo-handle is always valid.
                handle: unsafe { GetCurrentProcess() },
                pid: unsafe { GetCurrentProcessId() },
                owned: false,
            }
        }

        pub(super) fn open(pid: u32) -> Result<Self, OpenError> {
            let access = PROCESS_QUERY_INFORMATION | PROCESS_SET_QUOTA;
            let handle = unsafe { OpenProcess(access, 0, pid) };
            if handle.is_null() {
                return Err(OpenError::Os(last_error()));
            }
            Ok(Self {
                handle,
                pid,
                owned: true,
            })
        }
    }

    impl Drop for ProcessHandle {
        fn drop(&mut self) {
            if self.owned {
                unsafe {
                    CloseHandle(self.handle);
                }
            }
        }
    }

    impl TrimTarget for ProcessHandle {
        fn pid(&self) -> u32 {
            self.pid
        }

        fn working_set_bytes(&self) -> Option<u64> {
            let mut counters: PROCESS_MEMORY_COUNTERS = unsafe { std::mem::zeroed() };
            let cb = std::mem::size_of::<PROCESS_MEMORY_COUNTERS>() as u32;
            counters.cb = cb;
            let ok = unsafe { GetProcessMemoryInfo(self.handle, &mut counters, cb) };
            (ok != 0).then_some(counters.WorkingSetSize as u64)
        }

        fn invoke(&self, primitive: TrimPrimitive) -> CallStatus {
            match primitive {
                TrimPrimitive::EmptyWorkingSet => {
                    let ok = unsafe { EmptyWorkingSet(self.handle) };
                    CallStatus::from_bool(ok != 0, last_error)
                }
                TrimPrimitive::SetProcessWorkingSetSize => {
                    // (SIZE_T)-1 for both bounds asks the OS to trim as much as it can.
                    let ok = unsafe {
                        SetProcessWorkingSetSizeEx(self.handle, usize::MAX, usize::MAX, 0)
                    };
                    CallStatus::from_bool(ok != 0, last_error)
                }
                TrimPrimitive::HeapCompact => {
                    if self.owned {
                        // Only the calling process's heap can be compacted.
                        return CallStatus::Unsupported;
                    }
                    unsafe {
                        SetLastError(ERROR_SUCCESS);
                        let heap = GetProcessHeap();
                        if heap.is_null() {
                            return CallStatus::Failed {
                                os_error: Some(last_error()),
                            };
                        }
                        // Zero with a clean error channel means "no free block", not failure.
                        let largest = HeapCompact(heap, 0);
                        let err = GetLastError();
                        CallStatus::from_bool(largest != 0 || err == ERROR_SUCCESS, || err as i32)
                    }
                }
                TrimPrimitive::MallocTrim => CallStatus::Unsupported,
            }
        }
    }

    struct TokenHandle(HANDLE);

    impl Drop for TokenHandle {
        fn drop(&mut self) {
            unsafe {
                CloseHandle(self.0);
            }
        }
    }

    pub(super) fn enable_privilege(privilege: Privilege) -> bool {
        let mut token: HANDLE = std::ptr::null_mut();
        let ok = unsafe {
            OpenProcessToken(
                GetCurrentProcess(),
                TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY,
                &mut token,
            )
        };
        if ok == 0 {
            return false;
        }
        let token = TokenHandle(token);

        let name: Vec<u16> = privilege
            .name()
            .encode_utf16()
            .chain(std::iter::once(0))
            .collect();
        let mut luid = LUID {
            LowPart: 0,
            HighPart: 0,
        };
        if unsafe { LookupPrivilegeValueW(std::ptr::null(), name.as_ptr(), &mut luid) } == 0 {
            return false;
        }

        let privileges = TOKEN_PRIVILEGES {
            PrivilegeCount: 1,
            Privileges: [LUID_AND_ATTRIBUTES {
                Luid: luid,
                Attributes: SE_PRIVILEGE_ENABLED,
            }],
        };
        let ok = unsafe {
            AdjustTokenPrivileges(
                token.0,
                0,
                &privileges,
                0,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            )
        };
        // AdjustTokenPrivileges reports success even when nothing was assigned
        // (ERROR_NOT_ALL_ASSIGNED), so the error channel is authoritative.
        let err = unsafe { GetLastError() };
        ok != 0 && err == ERROR_SUCCESS
    }

    pub(super) fn memory_list_command(command: MemoryListCommand) -> i32 {
        let code: u32 = command.code();
        unsafe {
            NtSetSystemInformation(
                SYSTEM_MEMORY_LIST_INFORMATION,
                (&code as *const u32).cast::<c_void>(),
                std::mem::size_of::<u32>() as u32,
            )
        }
    }
}

#[cfg(not(windows))]
mod imp {
    use super::*;

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    pub(super) const IN_PROCESS: &[TrimPrimitive] = &[TrimPrimitive::MallocTrim];

    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    pub(super) const IN_PROCESS: &[TrimPrimitive] = &[];

    pub(super) struct CurrentProcess;

    impl TrimTarget for CurrentProcess {
        fn pid(&self) -> u32 {
            std::process::id()
        }

        fn working_set_bytes(&self) -> Option<u64> {
            crate::process::current_rss_bytes().or_else(|| {
                crate::process::find_process(std::process::id()).map(|info| info.resident_bytes)
            })
        }

        fn invoke(&self, primitive: TrimPrimitive) -> CallStatus {
            match primitive {
                #[cfg(all(target_os = "linux", target_env = "gnu"))]
                TrimPrimitive::MallocTrim => {
                    // The return value only says whether anything was released;
                    // the call itself cannot fail.
                    let released = unsafe { libc::malloc_trim(0) };
                    tracing::trace!(target = "reclaim.memory", released, "malloc_trim(0)");
                    CallStatus::Succeeded
                }
                _ => CallStatus::Unsupported,
            }
        }
    }
}

impl OsMemoryApi for NativeOs {
    fn in_process_primitives(&self) -> &'static [TrimPrimitive] {
        imp::IN_PROCESS
    }

    #[cfg(windows)]
    fn current_process(&self) -> Box<dyn TrimTarget + '_> {
        Box::new(imp::ProcessHandle::current())
    }

    #[cfg(not(windows))]
    fn current_process(&self) -> Box<dyn TrimTarget + '_> {
        Box::new(imp::CurrentProcess)
    }

    #[cfg(windows)]
    fn open_process(&self, pid: u32) -> Result<Box<dyn TrimTarget + '_>, OpenError> {
        imp::ProcessHandle::open(pid).map(|handle| Box::new(handle) as Box<dyn TrimTarget>)
    }

    #[cfg(not(windows))]
    fn open_process(&self, _pid: u32) -> Result<Box<dyn TrimTarget + '_>, OpenError> {
        Err(OpenError::Unsupported)
    }

    #[cfg(windows)]
    fn enable_privilege(&self, privilege: Privilege) -> bool {
        imp::enable_privilege(privilege)
    }

    #[cfg(not(windows))]
    fn enable_privilege(&self, _privilege: Privilege) -> bool {
        false
    }

    #[cfg(windows)]
    fn memory_list_command(&self, command: MemoryListCommand) -> Option<i32> {
        Some(imp::memory_list_command(command))
    }

    #[cfg(not(windows))]
    fn memory_list_command(&self, _command: MemoryListCommand) -> Option<i32> {
        None
    }

    fn trim_grows_page_file(&self) -> bool {
        // `malloc_trim` hands pages straight back to the kernel.
        cfg!(windows)
    }
}
