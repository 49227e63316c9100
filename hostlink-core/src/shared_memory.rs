//! Named shared-memory regions used to hand captured frames to the broker.
//!
//! The agent creates regions through a [`SharedMemoryFactory`]; each
//! creation and each final drop is reported to a [`SharedMemoryDelegate`]
//! so the broker can be told which ids are live. The broker maps a region
//! read-only with [`SharedMemory::open`].
//!
//! Region names:
//!
//! ```text
//! Windows:  Global\hostlink.<pid>.<id>   (pagefile-backed file mapping)
//! Unix:     /hostlink.<pid>.<id>         (POSIX shm object)
//! ```

use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use tracing::debug;

use crate::error::HostError;

pub type SharedMemoryId = i32;

// Never reset, so an id is not reused while the process lives.
static NEXT_ID: AtomicI32 = AtomicI32::new(1);

/// Receives lifetime notifications for regions created by a factory.
///
/// Called from whichever thread creates or drops the region.
pub trait SharedMemoryDelegate: Send + Sync {
    fn on_shared_memory_create(&self, id: SharedMemoryId);
    fn on_shared_memory_destroy(&self, id: SharedMemoryId);
}

/// Region name for `(owner_pid, id)`.
pub fn region_name(owner_pid: u32, id: SharedMemoryId) -> String {
    if cfg!(target_os = "windows") {
        format!("Global\\hostlink.{owner_pid}.{id}")
    } else {
        format!("/hostlink.{owner_pid}.{id}")
    }
}

// ── SharedMemoryFactory ──────────────────────────────────────────

/// Creates owned regions and wires them to a delegate.
#[derive(Clone)]
pub struct SharedMemoryFactory {
    delegate: Arc<dyn SharedMemoryDelegate>,
}

impl SharedMemoryFactory {
    pub fn new(delegate: Arc<dyn SharedMemoryDelegate>) -> Self {
        Self { delegate }
    }

    /// Allocate a zero-filled region of `size` bytes.
    pub fn create(&self, size: usize) -> Result<Arc<SharedMemory>, HostError> {
        if size == 0 {
            return Err(HostError::Other("shared memory size must be non-zero".into()));
        }

        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let mapping = platform::Mapping::create(&region_name(process::id(), id), size)?;

        debug!(id, size, "shared memory created");
        self.delegate.on_shared_memory_create(id);

        Ok(Arc::new(SharedMemory {
            id,
            mapping,
            delegate: Some(Arc::clone(&self.delegate)),
        }))
    }
}

// ── SharedMemory ─────────────────────────────────────────────────

/// A mapped region. Owned regions are writable and report their
/// destruction on drop; opened regions are read-only views.
pub struct SharedMemory {
    id: SharedMemoryId,
    mapping: platform::Mapping,
    delegate: Option<Arc<dyn SharedMemoryDelegate>>,
}

impl SharedMemory {
    /// Map a region created by process `owner_pid`.
    pub fn open(owner_pid: u32, id: SharedMemoryId) -> Result<Self, HostError> {
        let mapping = platform::Mapping::open(&region_name(owner_pid, id))?;
        Ok(Self {
            id,
            mapping,
            delegate: None,
        })
    }

    pub fn id(&self) -> SharedMemoryId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        self.mapping.as_slice()
    }

    /// Writable view; `None` for regions opened read-only.
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        self.mapping.as_mut_slice()
    }
}

impl std::fmt::Debug for SharedMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMemory")
            .field("id", &self.id)
            .field("len", &self.len())
            .field("owned", &self.delegate.is_some())
            .finish()
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        if let Some(delegate) = self.delegate.take() {
            debug!(id = self.id, "shared memory destroyed");
            delegate.on_shared_memory_destroy(self.id);
        }
    }
}

// ── Platform: Unix ───────────────────────────────────────────────

#[cfg(unix)]
mod platform {
    use std::ffi::CString;
    use std::io;
    use std::ptr;
    use std::slice;

    use crate::error::HostError;

    pub struct Mapping {
        ptr: *mut u8,
        len: usize,
        writable: bool,
        // Set for the creating side, which unlinks the name on drop.
        owned_name: Option<CString>,
    }

    // The mapping is plain memory; access is governed by `&`/`&mut`.
    unsafe impl Send for Mapping {}
    unsafe impl Sync for Mapping {}

    fn c_name(name: &str) -> Result<CString, HostError> {
        CString::new(name).map_err(|e| HostError::platform("shm_open", e))
    }

    impl Mapping {
        pub fn create(name: &str, size: usize) -> Result<Self, HostError> {
            let cname = c_name(name)?;

            let fd = unsafe {
                libc::shm_open(
                    cname.as_ptr(),
                    libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                    0o600 as libc::c_uint,
                )
            };
            if fd < 0 {
                return Err(HostError::platform("shm_open", io::Error::last_os_error()));
            }

            let fail = |call: &'static str| {
                let err = io::Error::last_os_error();
                unsafe {
                    libc::close(fd);
                    libc::shm_unlink(cname.as_ptr());
                }
                HostError::platform(call, err)
            };

            if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
                return Err(fail("ftruncate"));
            }

            let ptr = unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    size,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    fd,
                    0,
                )
            };
            if ptr == libc::MAP_FAILED {
                return Err(fail("mmap"));
            }

            unsafe { libc::close(fd) };

            Ok(Self {
                ptr: ptr.cast(),
                len: size,
                writable: true,
                owned_name: Some(cname),
            })
        }

        pub fn open(name: &str) -> Result<Self, HostError> {
            let cname = c_name(name)?;

            let fd = unsafe { libc::shm_open(cname.as_ptr(), libc::O_RDONLY, 0 as libc::c_uint) };
            if fd < 0 {
                return Err(HostError::platform("shm_open", io::Error::last_os_error()));
            }

            let mut stat: libc::stat = unsafe { std::mem::zeroed() };
            if unsafe { libc::fstat(fd, &mut stat) } != 0 {
                let err = io::Error::last_os_error();
                unsafe { libc::close(fd) };
                return Err(HostError::platform("fstat", err));
            }
            let len = stat.st_size as usize;
            if len == 0 {
                unsafe { libc::close(fd) };
                return Err(HostError::Other(format!("shared memory {name} is empty")));
            }

            let ptr = unsafe {
                libc::mmap(ptr::null_mut(), len, libc::PROT_READ, libc::MAP_SHARED, fd, 0)
            };
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            if ptr == libc::MAP_FAILED {
                return Err(HostError::platform("mmap", err));
            }

            Ok(Self {
                ptr: ptr.cast(),
                len,
                writable: false,
                owned_name: None,
            })
        }

        pub fn len(&self) -> usize {
            self.len
        }

        pub fn as_slice(&self) -> &[u8] {
            unsafe { slice::from_raw_parts(self.ptr, self.len) }
        }

        pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
            if !self.writable {
                return None;
            }
            Some(unsafe { slice::from_raw_parts_mut(self.ptr, self.len) })
        }
    }

    impl Drop for Mapping {
        fn drop(&mut self) {
            unsafe {
                libc::munmap(self.ptr.cast(), self.len);
                if let Some(name) = &self.owned_name {
                    libc::shm_unlink(name.as_ptr());
                }
            }
        }
    }
}

// ── Platform: Windows ────────────────────────────────────────────

#[cfg(target_os = "windows")]
mod platform {
    use std::slice;

    use windows::Win32::Foundation::{
        CloseHandle, ERROR_ALREADY_EXISTS, GetLastError, HANDLE, INVALID_HANDLE_VALUE,
    };
    use windows::Win32::System::Memory::{
        CreateFileMappingW, FILE_MAP_ALL_ACCESS, FILE_MAP_READ, MEMORY_BASIC_INFORMATION,
        MEMORY_MAPPED_VIEW_ADDRESS, MapViewOfFile, OpenFileMappingW, PAGE_READWRITE,
        UnmapViewOfFile, VirtualQuery,
    };
    use windows::core::PCWSTR;

    use crate::error::HostError;

    pub struct Mapping {
        handle: HANDLE,
        view: MEMORY_MAPPED_VIEW_ADDRESS,
        len: usize,
        writable: bool,
    }

    unsafe impl Send for Mapping {}
    unsafe impl Sync for Mapping {}

    fn to_wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    impl Mapping {
        pub fn create(name: &str, size: usize) -> Result<Self, HostError> {
            let wide = to_wide(name);
            let size64 = size as u64;

            let handle = unsafe {
                CreateFileMappingW(
                    INVALID_HANDLE_VALUE,
                    None,
                    PAGE_READWRITE,
                    (size64 >> 32) as u32,
                    size64 as u32,
                    PCWSTR(wide.as_ptr()),
                )
            }
            .map_err(|e| HostError::platform("CreateFileMappingW", e))?;

            if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
                unsafe {
                    let _ = CloseHandle(handle);
                }
                return Err(HostError::Other(format!("shared memory {name} already exists")));
            }

            let view = unsafe { MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, size) };
            if view.Value.is_null() {
                let err = windows::core::Error::from_win32();
                unsafe {
                    let _ = CloseHandle(handle);
                }
                return Err(HostError::platform("MapViewOfFile", err));
            }

            Ok(Self {
                handle,
                view,
                len: size,
                writable: true,
            })
        }

        pub fn open(name: &str) -> Result<Self, HostError> {
            let wide = to_wide(name);

            let handle = unsafe { OpenFileMappingW(FILE_MAP_READ.0, false, PCWSTR(wide.as_ptr())) }
                .map_err(|e| HostError::platform("OpenFileMappingW", e))?;

            let view = unsafe { MapViewOfFile(handle, FILE_MAP_READ, 0, 0, 0) };
            if view.Value.is_null() {
                let err = windows::core::Error::from_win32();
                unsafe {
                    let _ = CloseHandle(handle);
                }
                return Err(HostError::platform("MapViewOfFile", err));
            }

            let mut info = MEMORY_BASIC_INFORMATION::default();
            let written = unsafe {
                VirtualQuery(
                    Some(view.Value),
                    &mut info,
                    std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
                )
            };
            if written == 0 {
                let err = windows::core::Error::from_win32();
                unsafe {
                    let _ = UnmapViewOfFile(view);
                    let _ = CloseHandle(handle);
                }
                return Err(HostError::platform("VirtualQuery", err));
            }

            Ok(Self {
                handle,
                view,
                len: info.RegionSize,
                writable: false,
            })
        }

        pub fn len(&self) -> usize {
            self.len
        }

        pub fn as_slice(&self) -> &[u8] {
            unsafe { slice::from_raw_parts(self.view.Value as *const u8, self.len) }
        }

        pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
            if !self.writable {
                return None;
            }
            Some(unsafe { slice::from_raw_parts_mut(self.view.Value as *mut u8, self.len) })
        }
    }

    impl Drop for Mapping {
        fn drop(&mut self) {
            unsafe {
                let _ = UnmapViewOfFile(self.view);
                let _ = CloseHandle(self.handle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(&'static str, SharedMemoryId)>>,
    }

    impl SharedMemoryDelegate for Recorder {
        fn on_shared_memory_create(&self, id: SharedMemoryId) {
            self.events.lock().unwrap().push(("create", id));
        }

        fn on_shared_memory_destroy(&self, id: SharedMemoryId) {
            self.events.lock().unwrap().push(("destroy", id));
        }
    }

    #[test]
    fn ids_are_unique_and_lifetime_is_reported() {
        let recorder = Arc::new(Recorder::default());
        let factory = SharedMemoryFactory::new(recorder.clone());

        let a = factory.create(4096).unwrap();
        let b = factory.create(4096).unwrap();
        assert_ne!(a.id(), b.id());
        let (a_id, b_id) = (a.id(), b.id());

        drop(a);
        drop(b);

        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                ("create", a_id),
                ("create", b_id),
                ("destroy", a_id),
                ("destroy", b_id)
            ]
        );
    }

    #[test]
    fn zero_size_is_rejected() {
        let factory = SharedMemoryFactory::new(Arc::new(Recorder::default()));
        assert!(factory.create(0).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn opened_region_sees_owner_writes() {
        let factory = SharedMemoryFactory::new(Arc::new(Recorder::default()));
        let mut owned = factory.create(64).unwrap();
        Arc::get_mut(&mut owned).unwrap().as_mut_slice().unwrap()[..4]
            .copy_from_slice(b"ping");

        let mut view = SharedMemory::open(process::id(), owned.id()).unwrap();
        assert_eq!(&view.as_slice()[..4], b"ping");
        assert!(view.as_mut_slice().is_none());
    }
}
