//! Named POSIX shared memory segments.
//!
//! The processor creates the segment (`shm_open` + `ftruncate` + `mmap`) and
//! unlinks it on drop. The requestor only ever attaches to an existing one.

use std::ffi::CString;
use std::fmt;
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr::NonNull;
use std::sync::Arc;

use shm_primitives::{HeapRegion, Region};

use crate::layout::SegmentLayout;

/// Anything that can hand out a view of shared bytes.
///
/// The view must stay valid for as long as `self` is alive.
pub trait SharedMemory {
    fn region(&self) -> Region;
}

impl SharedMemory for HeapRegion {
    fn region(&self) -> Region {
        HeapRegion::region(self)
    }
}

impl<T: SharedMemory + ?Sized> SharedMemory for Arc<T> {
    fn region(&self) -> Region {
        (**self).region()
    }
}

impl<T: SharedMemory + ?Sized> SharedMemory for &T {
    fn region(&self) -> Region {
        (**self).region()
    }
}

/// A mapped named shared memory segment.
pub struct Segment {
    name: String,
    base: NonNull<u8>,
    len: usize,
    /// Set on the creating side, which unlinks the name on drop.
    owner: bool,
    /// Keeps the descriptor open for the lifetime of the mapping.
    _file: File,
}

// SAFETY: the mapping is plain shared bytes; access to them is arbitrated by
// the handshake header, which is only touched atomically.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl Segment {
    /// Attach read-write to a segment created by the peer.
    ///
    /// Fails with [`SegmentError::PeerNotReady`] if no segment with that name
    /// exists, and with [`SegmentError::TooSmall`] if it is smaller than
    /// `layout.size`.
    pub fn attach(name: &str, layout: SegmentLayout) -> Result<Self, SegmentError> {
        let (name, c_name) = shm_name(name)?;

        // SAFETY: c_name is a valid NUL-terminated string.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
        if fd == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::NotFound {
                return Err(SegmentError::PeerNotReady { name });
            }
            return Err(SegmentError::Io {
                op: "shm_open",
                source: err,
            });
        }
        // SAFETY: fd was just returned by shm_open and is owned by nobody else.
        let file = File::from(unsafe { OwnedFd::from_raw_fd(fd) });

        let found = file
            .metadata()
            .map_err(|source| SegmentError::Io {
                op: "fstat",
                source,
            })?
            .len() as usize;
        if found < layout.size {
            return Err(SegmentError::TooSmall {
                name,
                required: layout.size,
                found,
            });
        }

        let segment = Self::map(name, file, layout.size, false)?;
        tracing::debug!(name = %segment.name, size = segment.len, "attached to segment");
        Ok(segment)
    }

    /// Create (or recreate) the segment and size it.
    ///
    /// A stale segment left behind by a crashed process is unlinked first.
    pub fn create(name: &str, layout: SegmentLayout) -> Result<Self, SegmentError> {
        let (name, c_name) = shm_name(name)?;
        if layout.size < SegmentLayout::min_size() {
            return Err(SegmentError::TooSmall {
                name,
                required: SegmentLayout::min_size(),
                found: layout.size,
            });
        }

        // SAFETY: c_name is a valid NUL-terminated string.
        unsafe { libc::shm_unlink(c_name.as_ptr()) };

        // SAFETY: as above.
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                (libc::S_IRUSR | libc::S_IWUSR) as libc::mode_t,
            )
        };
        if fd == -1 {
            return Err(SegmentError::Io {
                op: "shm_open",
                source: io::Error::last_os_error(),
            });
        }
        // SAFETY: fd was just returned by shm_open and is owned by nobody else.
        let file = File::from(unsafe { OwnedFd::from_raw_fd(fd) });

        let mapped = file
            .set_len(layout.size as u64)
            .map_err(|source| SegmentError::Io {
                op: "ftruncate",
                source,
            })
            .and_then(|()| Self::map(name, file, layout.size, true));

        match mapped {
            Ok(segment) => {
                tracing::debug!(name = %segment.name, size = segment.len, "created segment");
                Ok(segment)
            }
            Err(e) => {
                // SAFETY: c_name is a valid NUL-terminated string.
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
                Err(e)
            }
        }
    }

    fn map(name: String, file: File, len: usize, owner: bool) -> Result<Self, SegmentError> {
        // SAFETY: fd is open read-write and at least `len` bytes long.
        let base_addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };

        if base_addr == libc::MAP_FAILED {
            return Err(SegmentError::Io {
                op: "mmap",
                source: io::Error::last_os_error(),
            });
        }
        let base = NonNull::new(base_addr as *mut u8).ok_or(SegmentError::Io {
            op: "mmap",
            source: io::Error::other("mmap returned null"),
        })?;

        Ok(Self {
            name,
            base,
            len,
            owner,
            _file: file,
        })
    }

    /// The normalized segment name (always starts with `/`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mapped length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether this side created the segment.
    pub fn is_owner(&self) -> bool {
        self.owner
    }
}

impl SharedMemory for Segment {
    fn region(&self) -> Region {
        // SAFETY: the mapping is live until `self` drops.
        unsafe { Region::from_raw(self.base, self.len) }
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        // SAFETY: base and len describe the mapping created in `map`.
        if unsafe { libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.len) } == -1 {
            tracing::warn!(name = %self.name, error = %io::Error::last_os_error(), "munmap failed");
        }
        if self.owner {
            if let Ok((_, c_name)) = shm_name(&self.name) {
                // SAFETY: c_name is a valid NUL-terminated string.
                if unsafe { libc::shm_unlink(c_name.as_ptr()) } == -1 {
                    tracing::warn!(name = %self.name, error = %io::Error::last_os_error(), "shm_unlink failed");
                }
            }
        }
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("name", &self.name)
            .field("len", &self.len)
            .field("owner", &self.owner)
            .finish()
    }
}

/// Normalize a segment name to the `/name` form `shm_open` expects.
fn shm_name(name: &str) -> Result<(String, CString), SegmentError> {
    let normalized = if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    };
    if normalized.len() < 2 || normalized[1..].contains('/') {
        return Err(SegmentError::InvalidName(name.to_string()));
    }
    let c_name =
        CString::new(normalized.as_bytes()).map_err(|_| SegmentError::InvalidName(name.to_string()))?;
    Ok((normalized, c_name))
}

/// Errors from creating or attaching a segment.
#[derive(Debug)]
pub enum SegmentError {
    /// No segment with that name exists: the processor is not running.
    PeerNotReady { name: String },
    /// The name cannot be used for a shared memory object.
    InvalidName(String),
    /// The segment is smaller than the configured layout.
    TooSmall {
        name: String,
        required: usize,
        found: usize,
    },
    /// A system call failed.
    Io { op: &'static str, source: io::Error },
}

impl fmt::Display for SegmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerNotReady { name } => {
                write!(f, "segment {name} does not exist (peer not ready)")
            }
            Self::InvalidName(name) => write!(f, "invalid segment name {name:?}"),
            Self::TooSmall {
                name,
                required,
                found,
            } => write!(f, "segment {name} too small: need {required} bytes, got {found}"),
            Self::Io { op, source } => write!(f, "{op} failed: {source}"),
        }
    }
}

impl std::error::Error for SegmentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}
