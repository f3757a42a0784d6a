//! Refcounted handles to the memory-mapped log files backing publications
//! and images. The conductor never maps files itself; it consumes a
//! [`LogBuffersFactory`] and tracks how many live resources reference each
//! mapping. A mapping whose refcount reaches zero lingers for a grace
//! window before it is physically released, so the driver and any in-flight
//! readers can observe the removal first.

use std::collections::HashMap;
use std::fs::OpenOptions;

use memmap::{MmapMut, MmapOptions};

use crate::util::{BusError, Result};

/// A memory-mapped log file backing a publication or image.
pub struct LogBuffers {
    map: MmapMut,
}

impl LogBuffers {
    /// Take ownership of an existing mapping.
    pub fn new(map: MmapMut) -> Self {
        LogBuffers { map }
    }

    /// Byte length of the mapped log.
    pub fn length(&self) -> usize {
        self.map.len()
    }
}

/// Maps log files on behalf of the conductor.
pub trait LogBuffersFactory {
    /// Map the log file at `path`.
    fn map_log(&self, path: &str) -> Result<LogBuffers>;
}

/// Factory mapping real files from the paths the driver reports.
pub struct MappedFileFactory;

impl LogBuffersFactory for MappedFileFactory {
    fn map_log(&self, path: &str) -> Result<LogBuffers> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| BusError::SharedFile(e.to_string()))?;
        let map = unsafe { MmapOptions::new().map_mut(&file) }
            .map_err(|e| BusError::SharedFile(e.to_string()))?;
        Ok(LogBuffers::new(map))
    }
}

struct CacheEntry {
    log: std::sync::Arc<LogBuffers>,
    refcount: i32,
}

struct LingeringEntry {
    log: std::sync::Arc<LogBuffers>,
    time_of_last_state_change_ns: i64,
}

/// Cache of mapped logs keyed by the driver-assigned registration id.
pub struct LogBuffersCache<F>
where
    F: LogBuffersFactory,
{
    factory: F,
    by_registration_id: HashMap<i64, CacheEntry>,
    lingering: Vec<LingeringEntry>,
}

impl<F> LogBuffersCache<F>
where
    F: LogBuffersFactory,
{
    /// Create an empty cache around a factory.
    pub fn new(factory: F) -> Self {
        LogBuffersCache {
            factory,
            by_registration_id: HashMap::new(),
            lingering: Vec::new(),
        }
    }

    /// Map the log for `registration_id`, or bump the refcount of the
    /// cached mapping if one already exists.
    pub fn acquire(
        &mut self,
        registration_id: i64,
        path: &str,
    ) -> Result<std::sync::Arc<LogBuffers>> {
        if let Some(entry) = self.by_registration_id.get_mut(&registration_id) {
            entry.refcount += 1;
            return Ok(std::sync::Arc::clone(&entry.log));
        }

        let log = std::sync::Arc::new(self.factory.map_log(path)?);
        self.by_registration_id.insert(
            registration_id,
            CacheEntry {
                log: std::sync::Arc::clone(&log),
                refcount: 1,
            },
        );
        Ok(log)
    }

    /// Drop one reference to the log for `registration_id`. On the last
    /// reference the mapping moves to the lingering list stamped `now_ns`.
    pub fn release(&mut self, registration_id: i64, now_ns: i64) {
        if let Some(entry) = self.by_registration_id.get_mut(&registration_id) {
            entry.refcount -= 1;
            if entry.refcount <= 0 {
                // UNWRAP: entry presence checked just above
                let entry = self.by_registration_id.remove(&registration_id).unwrap();
                self.lingering.push(LingeringEntry {
                    log: entry.log,
                    time_of_last_state_change_ns: now_ns,
                });
            }
        }
    }

    /// Physically release lingering mappings whose grace window has
    /// elapsed. Returns the number released.
    pub fn release_lingering(&mut self, now_ns: i64, linger_ns: i64) -> usize {
        let mut released = 0;
        // Reverse index iteration so swap_remove is safe mid-pass
        for index in (0..self.lingering.len()).rev() {
            if now_ns - self.lingering[index].time_of_last_state_change_ns > linger_ns {
                self.lingering.swap_remove(index);
                released += 1;
            }
        }
        released
    }

    /// Physically release every lingering mapping regardless of age. Used
    /// during conductor shutdown.
    pub fn release_all_lingering(&mut self) -> usize {
        let released = self.lingering.len();
        self.lingering.clear();
        released
    }

    /// Current refcount for `registration_id`; zero when not cached.
    pub fn refcount(&self, registration_id: i64) -> i32 {
        self.by_registration_id
            .get(&registration_id)
            .map_or(0, |entry| entry.refcount)
    }

    /// Number of mappings awaiting their linger window.
    pub fn lingering_count(&self) -> usize {
        self.lingering.len()
    }

    /// Number of live cached mappings.
    pub fn cached_count(&self) -> usize {
        self.by_registration_id.len()
    }
}
