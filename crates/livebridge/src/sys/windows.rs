use std::io;
use std::ptr::{self, NonNull};

use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_ACCESS_DENIED, ERROR_ALREADY_EXISTS, HANDLE,
    INVALID_HANDLE_VALUE, STILL_ACTIVE, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows_sys::Win32::System::Memory::{
    CreateFileMappingW, MapViewOfFile, OpenFileMappingW, UnmapViewOfFile, FILE_MAP_ALL_ACCESS,
    MEMORYMAPPEDVIEW_ADDRESS, PAGE_READWRITE,
};
use windows_sys::Win32::System::Threading::{
    CreateEventW, GetExitCodeProcess, OpenEventW, OpenProcess, SetEvent, WaitForSingleObject,
    EVENT_ALL_ACCESS, PROCESS_QUERY_LIMITED_INFORMATION,
};

fn wide_name(name: &str) -> Vec<u16> {
    name.encode_utf16().chain(std::iter::once(0)).collect()
}

/// A paging-file backed mapping that stays valid until dropped.
pub(crate) struct MappedRegion {
    handle: HANDLE,
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: handle and view are process-wide; access is coordinated by the
// owner through `&mut self` and the turn token in the segment header.
unsafe impl Send for MappedRegion {}

impl MappedRegion {
    /// Create the named mapping and zero it.
    ///
    /// Fails with [`io::ErrorKind::AlreadyExists`] if the name is taken; the
    /// existing mapping is left untouched.
    pub(crate) fn create(name: &str, len: usize) -> io::Result<Self> {
        let wide = wide_name(name);
        let size = len as u64;

        // SAFETY: wide is NUL-terminated and outlives the call.
        let handle = unsafe {
            CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                ptr::null(),
                PAGE_READWRITE,
                (size >> 32) as u32,
                size as u32,
                wide.as_ptr(),
            )
        };
        if handle == 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: reads the error CreateFileMappingW just set.
        if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
            unsafe { CloseHandle(handle) };
            return Err(io::Error::from(io::ErrorKind::AlreadyExists));
        }

        let region = Self::map_handle(handle, len)?;
        // SAFETY: the view was just mapped with `len` writable bytes.
        unsafe { ptr::write_bytes(region.ptr.as_ptr(), 0, len) };
        Ok(region)
    }

    /// Open a mapping some other process created.
    pub(crate) fn open(name: &str, len: usize) -> io::Result<Self> {
        let wide = wide_name(name);

        // SAFETY: wide is NUL-terminated and outlives the call.
        let handle = unsafe { OpenFileMappingW(FILE_MAP_ALL_ACCESS, 0, wide.as_ptr()) };
        if handle == 0 {
            return Err(io::Error::last_os_error());
        }
        Self::map_handle(handle, len)
    }

    fn map_handle(handle: HANDLE, len: usize) -> io::Result<Self> {
        // SAFETY: handle is a valid file mapping.
        let view = unsafe { MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, len) };
        match NonNull::new(view.Value as *mut u8) {
            Some(ptr) => Ok(Self { handle, ptr, len }),
            None => {
                let err = io::Error::last_os_error();
                unsafe { CloseHandle(handle) };
                Err(err)
            }
        }
    }

    /// Named mappings disappear with their last handle.
    pub(crate) fn unlink(_name: &str) -> io::Result<()> {
        Ok(())
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: view and handle are owned by self and released once.
        unsafe {
            UnmapViewOfFile(MEMORYMAPPEDVIEW_ADDRESS {
                Value: self.ptr.as_ptr().cast(),
            });
            CloseHandle(self.handle);
        }
    }
}

/// A named auto-reset event.
pub(crate) struct NamedEvent {
    handle: HANDLE,
}

// SAFETY: event handles are usable from any thread.
unsafe impl Send for NamedEvent {}

impl NamedEvent {
    /// Create the named event. A leftover event with the same name is reset
    /// to `initially_set`; only the owner of the pair's segment may call this.
    pub(crate) fn create(name: &str, initially_set: bool) -> io::Result<Self> {
        let wide = wide_name(name);
        // SAFETY: wide is NUL-terminated and outlives the call.
        let handle = unsafe { CreateEventW(ptr::null(), 0, i32::from(initially_set), wide.as_ptr()) };
        if handle == 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: reads the error CreateEventW just set.
        let existed = unsafe { GetLastError() } == ERROR_ALREADY_EXISTS;

        let event = Self { handle };
        if existed {
            event.try_wait()?;
            if initially_set {
                event.set()?;
            }
        }
        Ok(event)
    }

    pub(crate) fn open(name: &str) -> io::Result<Self> {
        let wide = wide_name(name);
        // SAFETY: wide is NUL-terminated and outlives the call.
        let handle = unsafe { OpenEventW(EVENT_ALL_ACCESS, 0, wide.as_ptr()) };
        if handle == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { handle })
    }

    /// Zero-timeout wait; consumes the signal when set.
    pub(crate) fn try_wait(&self) -> io::Result<bool> {
        // SAFETY: handle is a live event owned by self.
        match unsafe { WaitForSingleObject(self.handle, 0) } {
            WAIT_OBJECT_0 => Ok(true),
            WAIT_TIMEOUT => Ok(false),
            _ => Err(io::Error::last_os_error()),
        }
    }

    pub(crate) fn set(&self) -> io::Result<()> {
        // SAFETY: handle is a live event owned by self.
        if unsafe { SetEvent(self.handle) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub(crate) fn unlink(_name: &str) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for NamedEvent {
    fn drop(&mut self) {
        // SAFETY: handle is owned by self and closed once.
        unsafe {
            CloseHandle(self.handle);
        }
    }
}

/// Whether a process with this id is still running.
pub(crate) fn process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    // SAFETY: plain query; the handle is closed below.
    let handle = unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid) };
    if handle == 0 {
        // Exists, but not ours to query.
        return unsafe { GetLastError() } == ERROR_ACCESS_DENIED;
    }
    let mut code = 0u32;
    // SAFETY: handle is a live process handle, code a valid out-parameter.
    let ok = unsafe { GetExitCodeProcess(handle, &mut code) };
    unsafe { CloseHandle(handle) };
    ok != 0 && code == STILL_ACTIVE as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    fn unique(tag: &str) -> String {
        format!("Local\\lbsys_{tag}_{}", std::process::id())
    }

    #[test]
    fn region_is_shared_between_views() {
        let name = unique("region");
        let a = MappedRegion::create(&name, 4096).unwrap();
        let b = MappedRegion::open(&name, 4096).unwrap();

        unsafe { *a.as_ptr().add(100) = 42 };
        assert_eq!(unsafe { *b.as_ptr().add(100) }, 42);
    }

    #[test]
    fn create_refuses_existing_mapping() {
        let name = unique("taken");
        let a = MappedRegion::create(&name, 4096).unwrap();
        unsafe { *a.as_ptr() = 9 };

        let err = MappedRegion::create(&name, 4096).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(unsafe { *a.as_ptr() }, 9);
    }

    #[test]
    fn recreated_event_takes_the_new_state() {
        let name = unique("recreate");
        let first = NamedEvent::create(&name, false).unwrap();
        let second = NamedEvent::create(&name, true).unwrap();
        assert!(first.try_wait().unwrap());
        assert!(!second.try_wait().unwrap());
    }

    #[test]
    fn own_process_is_alive() {
        assert!(process_alive(std::process::id()));
        assert!(!process_alive(0));
    }

    #[test]
    fn event_behaves_as_auto_reset() {
        let name = unique("event");
        let server = NamedEvent::create(&name, true).unwrap();
        let client = NamedEvent::open(&name).unwrap();

        assert!(client.try_wait().unwrap());
        assert!(!client.try_wait().unwrap());
        server.set().unwrap();
        assert!(client.try_wait().unwrap());
    }

    #[test]
    fn missing_event_is_not_found() {
        let err = NamedEvent::open(&unique("missing")).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
