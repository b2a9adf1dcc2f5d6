//! Shared-memory request/response transport.
//!
//! Two files live under [`TransportConfig::dir`]:
//!
//! - `{name}.shm`: an `i64` little-endian length prefix followed by the
//!   encoded envelope. Requests and responses share the region.
//! - `{name}.ctl`: three `u32` words used atomically: the requester lock,
//!   the request sequence ("message ready") and the handled sequence
//!   ("message handled").
//!
//! A request is in flight exactly while `request != handled`. The lock word
//! holds the process id of its owner, or 0 when free. A waiter takes over a
//! lock whose owner process no longer exists.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use memmap2::MmapMut;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::codec::{decode, encode};
use crate::envelope::Envelope;
use crate::error::TransportError;

pub(crate) const HEADER: usize = std::mem::size_of::<i64>();
const CONTROL_LEN: usize = 3 * std::mem::size_of::<u32>();

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub dir: PathBuf,
    pub name: String,
    /// Initial data capacity of the segment in bytes; it grows on demand.
    pub initial_capacity: usize,
    pub connect_timeout: Duration,
    /// Upper bound for one round trip, lock acquisition included.
    pub call_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir(),
            name: "sheetbatch".to_string(),
            initial_capacity: 1 << 20,
            connect_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_micros(100),
        }
    }
}

impl TransportConfig {
    pub fn segment_path(&self) -> PathBuf {
        self.dir.join(format!("{}.shm", self.name))
    }

    pub fn control_path(&self) -> PathBuf {
        self.dir.join(format!("{}.ctl", self.name))
    }
}

/// Poll `ready` until it holds or `timeout` elapses.
pub(crate) fn wait_until(
    timeout: Duration,
    poll: Duration,
    stage: &'static str,
    mut ready: impl FnMut() -> bool,
) -> Result<(), TransportError> {
    let start = Instant::now();
    loop {
        if ready() {
            return Ok(());
        }
        let waited = start.elapsed();
        if waited >= timeout {
            return Err(TransportError::Timeout { stage, waited });
        }
        thread::sleep(poll);
    }
}

fn map(file: &File) -> io::Result<MmapMut> {
    // SAFETY: the file is only resized by growing it, and concurrent
    // access from the peer is ordered by the control block sequences.
    unsafe { MmapMut::map_mut(file) }
}

pub(crate) struct Segment {
    path: PathBuf,
    file: File,
    map: MmapMut,
}

impl Segment {
    pub(crate) fn create(path: &Path, capacity: usize) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len((HEADER + capacity) as u64)?;
        let map = map(&file)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            map,
        })
    }

    pub(crate) fn open(path: &Path) -> Result<Self, TransportError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        if (file.metadata()?.len() as usize) < HEADER {
            return Err(TransportError::CorruptSegment {
                path: path.to_path_buf(),
            });
        }
        let map = map(&file)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            map,
        })
    }

    /// Map at least `total` bytes, growing the file when `grow` is set.
    fn ensure_mapped(&mut self, total: usize, grow: bool) -> Result<(), TransportError> {
        if self.map.len() >= total {
            return Ok(());
        }
        let on_disk = self.file.metadata()?.len() as usize;
        if on_disk < total {
            if !grow {
                return Err(TransportError::CorruptSegment {
                    path: self.path.clone(),
                });
            }
            self.file.set_len(total.next_power_of_two() as u64)?;
        }
        self.map = map(&self.file)?;
        debug!(path = %self.path.display(), mapped = self.map.len(), "segment remapped");
        Ok(())
    }

    pub(crate) fn write_message(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.ensure_mapped(HEADER + bytes.len(), true)?;
        self.map[HEADER..HEADER + bytes.len()].copy_from_slice(bytes);
        self.map[..HEADER].copy_from_slice(&(bytes.len() as i64).to_le_bytes());
        Ok(())
    }

    pub(crate) fn read_message(&mut self) -> Result<&[u8], TransportError> {
        let mut prefix = [0_u8; HEADER];
        prefix.copy_from_slice(&self.map[..HEADER]);
        let len = usize::try_from(i64::from_le_bytes(prefix)).map_err(|_| {
            TransportError::CorruptSegment {
                path: self.path.clone(),
            }
        })?;
        self.ensure_mapped(HEADER + len, false)?;
        Ok(&self.map[HEADER..HEADER + len])
    }

    pub(crate) fn capacity(&self) -> usize {
        self.map.len() - HEADER
    }
}

#[derive(Clone, Copy)]
enum Slot {
    Lock = 0,
    Request = 1,
    Handled = 2,
}

pub(crate) struct ControlBlock {
    map: MmapMut,
}

impl ControlBlock {
    /// Create a zeroed control block. It is built under a temporary name
    /// and renamed into place so a client never maps a short file.
    pub(crate) fn create(path: &Path) -> io::Result<Self> {
        let staging = path.with_extension("ctl.tmp");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&staging)?;
        file.set_len(CONTROL_LEN as u64)?;
        let map = map(&file)?;
        fs::rename(&staging, path)?;
        Ok(Self { map })
    }

    pub(crate) fn open(path: &Path) -> Result<Self, TransportError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        if (file.metadata()?.len() as usize) < CONTROL_LEN {
            return Err(TransportError::CorruptSegment {
                path: path.to_path_buf(),
            });
        }
        Ok(Self { map: map(&file)? })
    }

    fn word(&self, slot: Slot) -> &AtomicU32 {
        let offset = slot as usize * std::mem::size_of::<u32>();
        // SAFETY: the mapping is page aligned and at least CONTROL_LEN bytes
        // long, it lives as long as `self`, and the words are only ever
        // accessed through atomics.
        unsafe { &*self.map.as_ptr().add(offset).cast::<AtomicU32>() }
    }

    pub(crate) fn lock(&self) -> &AtomicU32 {
        self.word(Slot::Lock)
    }

    pub(crate) fn request_seq(&self) -> &AtomicU32 {
        self.word(Slot::Request)
    }

    pub(crate) fn handled_seq(&self) -> &AtomicU32 {
        self.word(Slot::Handled)
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.request_seq().load(Ordering::Acquire) == self.handled_seq().load(Ordering::Acquire)
    }
}

/// Releases the requester lock on drop.
struct LockGuard<'a> {
    word: &'a AtomicU32,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.word.store(0, Ordering::Release);
    }
}

/// Requester side of a segment.
pub struct Client {
    config: TransportConfig,
    segment: Mutex<Segment>,
    control: ControlBlock,
}

impl Client {
    /// Wait for a server's segment to appear, then map it.
    pub fn connect(config: TransportConfig) -> Result<Self, TransportError> {
        let ctl_path = config.control_path();
        wait_until(
            config.connect_timeout,
            config.poll_interval,
            "server",
            || ctl_path.exists(),
        )
        .map_err(|_| TransportError::ServerNotRunning {
            path: ctl_path.clone(),
        })?;

        let control = ControlBlock::open(&ctl_path)?;
        let segment = Segment::open(&config.segment_path())?;
        debug!(name = %config.name, "connected");
        Ok(Self {
            config,
            segment: Mutex::new(segment),
            control,
        })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// One round trip. Concurrent callers, in this process or another,
    /// queue on the requester lock.
    pub fn call(&self, request: &Envelope) -> Result<Envelope, TransportError> {
        let bytes = encode(request)?;
        let timeout = self.config.call_timeout;
        let poll = self.config.poll_interval;

        let mut segment = self.segment.lock();
        let _guard = self.acquire()?;
        // a timed-out predecessor may still be in flight
        wait_until(timeout, poll, "server to become idle", || {
            self.control.is_idle()
        })?;

        segment.write_message(&bytes)?;
        let seq = self
            .control
            .request_seq()
            .load(Ordering::Acquire)
            .wrapping_add(1);
        self.control.request_seq().store(seq, Ordering::Release);
        debug!(seq, bytes = bytes.len(), kind = ?request.message_type, "request published");

        wait_until(timeout, poll, "response", || {
            self.control.handled_seq().load(Ordering::Acquire) == seq
        })?;
        let response = decode(segment.read_message()?)?;
        debug!(seq, kind = ?response.message_type, "response received");
        Ok(response)
    }

    fn acquire(&self) -> Result<LockGuard<'_>, TransportError> {
        let word = self.control.lock();
        let me = std::process::id();
        wait_until(
            self.config.call_timeout,
            self.config.poll_interval,
            "requester lock",
            || match word.compare_exchange(0, me, Ordering::Acquire, Ordering::Relaxed) {
                Ok(_) => true,
                Err(owner) if owner != me && !process_alive(owner) => {
                    let taken = word
                        .compare_exchange(owner, me, Ordering::Acquire, Ordering::Relaxed)
                        .is_ok();
                    if taken {
                        warn!(owner, "requester lock taken over from an exited process");
                    }
                    taken
                }
                Err(_) => false,
            },
        )?;
        Ok(LockGuard { word })
    }
}

/// Whether a process with id `pid` exists.
#[cfg(unix)]
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
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Off unix every owner counts as running.
#[cfg(not(unix))]
pub(crate) fn process_alive(_pid: u32) -> bool {
    true
}
