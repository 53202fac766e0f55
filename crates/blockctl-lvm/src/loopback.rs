//! Loopback device allocation
//!
//! `losetup -f` only reports a candidate; another caller may grab the same
//! node before we attach, so allocation loops over find+attach until an
//! attach sticks or the retry bound is hit.

use crate::error::{BlockError, BlockResult};
use crate::runner::RootWrap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use tracing::{debug, info};

/// Upper bound on find+attach attempts
pub const MAX_LOOP_DEVICES: usize = 256;

const ZERO_CHUNK: usize = 1024 * 1024;

/// Create `path` at exactly `size` bytes; an existing file is left untouched.
///
/// With `zero_fill` every byte is written, otherwise the file is sparse.
/// A file that cannot be fully sized is removed again.
pub fn create_backing_file(path: &Path, size: u64, zero_fill: bool) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().write(true).create_new(true).open(path)?;
    if let Err(e) = fill(file, size, zero_fill) {
        let _ = fs::remove_file(path);
        return Err(e);
    }
    Ok(())
}

fn fill(mut file: File, size: u64, zero_fill: bool) -> io::Result<()> {
    if zero_fill {
        let zeros = vec![0u8; ZERO_CHUNK];
        let mut remaining = size;
        while remaining > 0 {
            let n = usize::try_from(remaining).map_or(ZERO_CHUNK, |r| r.min(ZERO_CHUNK));
            file.write_all(&zeros[..n])?;
            remaining -= n as u64;
        }
        file.sync_all()
    } else {
        file.set_len(size)
    }
}

/// Loopback allocator
#[derive(Debug, Clone)]
pub struct LoopbackAllocator {
    wrap: RootWrap,
    zero_fill: bool,
}

impl LoopbackAllocator {
    pub const fn new(wrap: RootWrap, zero_fill: bool) -> Self {
        Self { wrap, zero_fill }
    }

    /// Next unused loop device node, empty when the OS has none
    pub fn find_free(&self) -> BlockResult<String> {
        Ok(self.wrap.probe(&["losetup", "-f"])?.trim().to_string())
    }

    /// Bind `file` to `device`
    pub fn attach(&self, file: &Path, device: &str) -> BlockResult<()> {
        self.wrap
            .run_status(&["losetup", device, &file.to_string_lossy()])?;
        info!("Attached {} to {}", file.display(), device);
        Ok(())
    }

    /// Description of what `device` is bound to, empty when it is free
    pub fn status(&self, device: &str) -> BlockResult<String> {
        Ok(self.wrap.probe(&["losetup", device])?.trim().to_string())
    }

    pub fn detach(&self, device: &str) -> BlockResult<()> {
        self.wrap.run_status(&["losetup", "-d", device])?;
        debug!("Detached {}", device);
        Ok(())
    }

    /// Attach an existing file to the first device that accepts it
    pub fn create_loopback(&self, file: &Path) -> BlockResult<String> {
        for attempt in 0..MAX_LOOP_DEVICES {
            let device = self.find_free()?;
            if device.is_empty() {
                continue;
            }
            match self.attach(file, &device) {
                Ok(()) => return Ok(device),
                Err(e) => debug!("Attach attempt {} on {} failed: {}", attempt, device, e),
            }
        }
        Err(BlockError::ResourceExhausted(format!(
            "no loopback device for {} after {} attempts",
            file.display(),
            MAX_LOOP_DEVICES
        )))
    }

    /// Create a fresh backing file of `size` bytes under the configured fill policy
    pub fn create_file(&self, file: &Path, size: u64) -> BlockResult<()> {
        create_backing_file(file, size, self.zero_fill).map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                BlockError::AlreadyExists(file.display().to_string())
            } else {
                e.into()
            }
        })
    }
}
