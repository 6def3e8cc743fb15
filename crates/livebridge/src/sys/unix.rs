use std::ffi::CString;
use std::io::{self, ErrorKind};
use std::ptr::{self, NonNull};

// shm_open is variadic on macOS, where mode_t would not survive promotion.
#[cfg(target_os = "macos")]
type ShmMode = libc::c_uint;
#[cfg(not(target_os = "macos"))]
type ShmMode = libc::mode_t;

const OBJECT_MODE: u32 = 0o600;

fn c_name(name: &str) -> io::Result<CString> {
    CString::new(name).map_err(|_| io::Error::new(ErrorKind::InvalidInput, "name contains NUL"))
}

/// A shared memory mapping that stays valid until dropped.
pub(crate) struct MappedRegion {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is process-wide memory; access is coordinated by the
// owner through `&mut self` and the turn token in the segment header.
unsafe impl Send for MappedRegion {}

impl MappedRegion {
    /// Create the named region, size it to `len` and zero it.
    ///
    /// Fails with [`ErrorKind::AlreadyExists`] if the name is taken; the
    /// caller decides whether the existing region may be reused.
    pub(crate) fn create(name: &str, len: usize) -> io::Result<Self> {
        let c_name = c_name(name)?;

        // SAFETY: c_name is a valid C string.
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                OBJECT_MODE as ShmMode,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: fd is a valid shm descriptor.
        if unsafe { libc::ftruncate(fd, len as libc::off_t) } < 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
            }
            return Err(err);
        }

        let region = Self::map_fd(fd, len).map_err(|e| {
            // SAFETY: c_name is a valid C string; the name is ours.
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
            e
        })?;
        // SAFETY: the region was just mapped with `len` writable bytes.
        unsafe { ptr::write_bytes(region.ptr.as_ptr(), 0, len) };
        Ok(region)
    }

    /// Map an existing named region of at least `len` bytes.
    pub(crate) fn open(name: &str, len: usize) -> io::Result<Self> {
        let c_name = c_name(name)?;

        // SAFETY: c_name is a valid C string.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0 as ShmMode) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: zeroed stat is a valid out-parameter.
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut stat) } < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }
        // A region still being sized by its creator is not there yet.
        if (stat.st_size as u64) < len as u64 {
            unsafe { libc::close(fd) };
            return Err(io::Error::new(ErrorKind::NotFound, "shared region is not sized yet"));
        }

        Self::map_fd(fd, len)
    }

    /// Map `fd` and close it; the mapping keeps the object alive.
    fn map_fd(fd: libc::c_int, len: usize) -> io::Result<Self> {
        // SAFETY: fd is valid and the object is at least `len` bytes.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        let map_err = io::Error::last_os_error();
        unsafe { libc::close(fd) };

        if addr == libc::MAP_FAILED {
            return Err(map_err);
        }
        let ptr = NonNull::new(addr as *mut u8)
            .ok_or_else(|| io::Error::new(ErrorKind::Other, "mmap returned null"))?;
        Ok(Self { ptr, len })
    }

    /// Remove the name. Existing mappings stay valid.
    pub(crate) fn unlink(name: &str) -> io::Result<()> {
        let c_name = c_name(name)?;
        // SAFETY: c_name is a valid C string.
        if unsafe { libc::shm_unlink(c_name.as_ptr()) } < 0 {
            return Err(io::Error::last_os_error());
        }
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
        // SAFETY: ptr/len describe a live mapping owned by self.
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}

/// A named auto-reset event built on a POSIX semaphore.
///
/// The count is kept at 0 or 1: `set` drains before posting, `try_wait`
/// consumes the single pending signal.
pub(crate) struct NamedEvent {
    sem: NonNull<libc::sem_t>,
}

// SAFETY: named semaphores are safe to use from any thread.
unsafe impl Send for NamedEvent {}

impl NamedEvent {
    /// Create the named event, replacing any stale one with the same name.
    ///
    /// Only the owner of the pair's segment may call this.
    pub(crate) fn create(name: &str, initially_set: bool) -> io::Result<Self> {
        let c_name = c_name(name)?;

        // SAFETY: c_name is a valid C string. A missing name is fine.
        unsafe { libc::sem_unlink(c_name.as_ptr()) };

        // SAFETY: variadic arguments are (mode, initial value) as c_uint.
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                OBJECT_MODE as libc::c_uint,
                u32::from(initially_set) as libc::c_uint,
            )
        };
        Self::from_raw(sem)
    }

    /// Open an event some other process created.
    pub(crate) fn open(name: &str) -> io::Result<Self> {
        let c_name = c_name(name)?;
        // SAFETY: c_name is a valid C string.
        let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };
        Self::from_raw(sem)
    }

    fn from_raw(sem: *mut libc::sem_t) -> io::Result<Self> {
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }
        NonNull::new(sem)
            .map(|sem| Self { sem })
            .ok_or_else(|| io::Error::new(ErrorKind::Other, "sem_open returned null"))
    }

    /// Consume the signal if it is set. Never blocks.
    pub(crate) fn try_wait(&self) -> io::Result<bool> {
        loop {
            // SAFETY: sem is a live semaphore owned by self.
            if unsafe { libc::sem_trywait(self.sem.as_ptr()) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(err),
            }
        }
    }

    /// Set the signal. Setting an already-set event is a no-op.
    pub(crate) fn set(&self) -> io::Result<()> {
        self.try_wait()?;
        // SAFETY: sem is a live semaphore owned by self.
        if unsafe { libc::sem_post(self.sem.as_ptr()) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Remove the name. Open handles stay usable.
    pub(crate) fn unlink(name: &str) -> io::Result<()> {
        let c_name = c_name(name)?;
        // SAFETY: c_name is a valid C string.
        if unsafe { libc::sem_unlink(c_name.as_ptr()) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for NamedEvent {
    fn drop(&mut self) {
        // SAFETY: sem was returned by sem_open and is closed once.
        unsafe {
            libc::sem_close(self.sem.as_ptr());
        }
    }
}

/// Whether a process with this id exists.
pub(crate) fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 only checks that the target exists.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    // EPERM: alive, owned by another user.
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique(tag: &str) -> String {
        format!("/lbsys_{tag}_{}", std::process::id())
    }

    #[test]
    fn region_is_shared_between_mappings() {
        let name = unique("region");
        let a = MappedRegion::create(&name, 4096).unwrap();
        let b = MappedRegion::open(&name, 4096).unwrap();

        unsafe { *a.as_ptr().add(100) = 42 };
        assert_eq!(unsafe { *b.as_ptr().add(100) }, 42);
        assert_eq!(b.len(), 4096);

        MappedRegion::unlink(&name).unwrap();
        assert_eq!(
            MappedRegion::open(&name, 4096).err().map(|e| e.kind()),
            Some(ErrorKind::NotFound)
        );
    }

    #[test]
    fn create_refuses_existing_name() {
        let name = unique("taken");
        let a = MappedRegion::create(&name, 4096).unwrap();
        unsafe { *a.as_ptr() = 9 };

        let err = MappedRegion::create(&name, 4096).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        let b = MappedRegion::open(&name, 4096).unwrap();
        assert_eq!(unsafe { *b.as_ptr() }, 9);

        MappedRegion::unlink(&name).unwrap();
    }

    #[test]
    fn own_process_is_alive() {
        assert!(process_alive(std::process::id()));
        assert!(!process_alive(0));
        assert!(!process_alive(u32::MAX));
    }

    #[test]
    fn open_rejects_undersized_region() {
        let name = unique("small");
        let _a = MappedRegion::create(&name, 64).unwrap();
        let err = MappedRegion::open(&name, 4096).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        MappedRegion::unlink(&name).unwrap();
    }

    #[test]
    fn event_behaves_as_auto_reset() {
        let name = unique("event");
        let server = NamedEvent::create(&name, true).unwrap();
        let client = NamedEvent::open(&name).unwrap();

        assert!(client.try_wait().unwrap());
        assert!(!client.try_wait().unwrap());

        server.set().unwrap();
        server.set().unwrap();
        assert!(client.try_wait().unwrap());
        assert!(!server.try_wait().unwrap());

        NamedEvent::unlink(&name).unwrap();
    }

    #[test]
    fn missing_event_is_not_found() {
        let err = NamedEvent::open(&unique("missing")).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
