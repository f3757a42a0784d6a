//! Description of the command-and-control file shared between the media
//! driver and its clients.
//!
//! File layout:
//!
//! ```text
//! +-----------------------------+
//! |          Meta Data          |
//! +-----------------------------+
//! |      to-driver Buffer       |
//! +-----------------------------+
//! |      to-clients Buffer      |
//! +-----------------------------+
//! |    Counter Values Buffer    |
//! +-----------------------------+
//! |          Error Log          |
//! +-----------------------------+
//! ```
//!
//! The driver creates and owns the file; clients map each section
//! separately so the ring buffer, broadcast receiver, and counters reader
//! can own independent views.

use std::fs::OpenOptions;
use std::mem::size_of;
use std::path::Path;

use memmap::MmapOptions;

use crate::concurrent::buffer::MappedRegion;
use crate::util::{bit, BusError, IndexT, Result};

/// The CnC file metadata header.
#[repr(C, align(4))]
pub struct MetaDataDefn {
    /// Version of the file format, checked on both sides
    pub cnc_version: i32,
    /// Size of the command ring buffer section (client to driver)
    pub to_driver_buffer_length: i32,
    /// Size of the events broadcast buffer section (driver to clients)
    pub to_clients_buffer_length: i32,
    /// Size of the counter values section
    pub counter_values_buffer_length: i32,
    /// Size of the distinct error log section
    pub error_log_buffer_length: i32,
    /// Window after which the driver declares a silent client dead, in ms
    pub client_liveness_timeout_ms: i64,
    /// Driver start timestamp, epoch milliseconds
    pub start_timestamp_ms: i64,
    /// Driver process id
    pub pid: i64,
}

/// Length of the metadata block. Padded out beyond the struct so the
/// sections that follow start cache-line aligned.
pub const META_DATA_LENGTH: usize =
    bit::align(size_of::<MetaDataDefn>(), bit::CACHE_LINE_LENGTH * 2);

/// Version code for the CnC file format
pub const CNC_VERSION: i32 = crate::semantic_version_compose(0, 1, 0);

/// Filename of the CnC file within the driver directory
pub const CNC_FILE: &str = "cnc.dat";

/// Per-section mappings of a CnC file. The sections are not page aligned,
/// so each view is a whole-file mapping windowed to its own bytes.
pub struct CncFile {
    /// Command ring buffer section
    pub to_driver: MappedRegion,
    /// Events broadcast buffer section
    pub to_clients: MappedRegion,
    /// Counter values section
    pub counter_values: MappedRegion,
    /// Driver liveness window from the metadata header
    pub client_liveness_timeout_ms: i64,
}

fn file_error(e: std::io::Error) -> BusError {
    BusError::SharedFile(e.to_string())
}

impl CncFile {
    /// Map an existing CnC file created by a running driver, returning a
    /// separate mapping per section.
    pub fn map_existing(driver_dir: &Path) -> Result<CncFile> {
        let path = driver_dir.join(CNC_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(file_error)?;

        let metadata_map = unsafe { MmapOptions::new().map(&file) }.map_err(file_error)?;
        if metadata_map.len() < META_DATA_LENGTH {
            return Err(BusError::SharedFile(format!(
                "{} shorter than metadata block",
                path.display()
            )));
        }
        let metadata: &MetaDataDefn = unsafe { &*(metadata_map.as_ptr() as *const MetaDataDefn) };
        if metadata.cnc_version != CNC_VERSION {
            return Err(BusError::SharedFile(format!(
                "CnC version mismatch: file {} expected {}",
                metadata.cnc_version, CNC_VERSION
            )));
        }

        let to_driver_length = metadata.to_driver_buffer_length as usize;
        let to_clients_length = metadata.to_clients_buffer_length as usize;
        let counter_values_length = metadata.counter_values_buffer_length as usize;
        let client_liveness_timeout_ms = metadata.client_liveness_timeout_ms;

        let mut offset = META_DATA_LENGTH;
        let mut map_section = |length: usize| -> Result<MappedRegion> {
            let map = unsafe { MmapOptions::new().map_mut(&file) }.map_err(file_error)?;
            let region = MappedRegion::new(map, offset, length)?;
            offset += length;
            Ok(region)
        };

        let to_driver = map_section(to_driver_length)?;
        let to_clients = map_section(to_clients_length)?;
        let counter_values = map_section(counter_values_length)?;

        Ok(CncFile {
            to_driver,
            to_clients,
            counter_values,
            client_liveness_timeout_ms,
        })
    }

    /// Create and initialize a CnC file with the given section lengths.
    /// This is the driver's half of the contract; it lives here so driver
    /// stubs and tests can produce a file the client half accepts.
    pub fn create_new(
        driver_dir: &Path,
        to_driver_buffer_length: IndexT,
        to_clients_buffer_length: IndexT,
        counter_values_buffer_length: IndexT,
        error_log_buffer_length: IndexT,
        client_liveness_timeout_ms: i64,
    ) -> Result<()> {
        let path = driver_dir.join(CNC_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(file_error)?;

        let total_length = META_DATA_LENGTH as u64
            + to_driver_buffer_length as u64
            + to_clients_buffer_length as u64
            + counter_values_buffer_length as u64
            + error_log_buffer_length as u64;
        file.set_len(total_length).map_err(file_error)?;

        let mut metadata_map = unsafe { MmapOptions::new().map_mut(&file) }.map_err(file_error)?;
        let metadata: &mut MetaDataDefn =
            unsafe { &mut *(metadata_map.as_mut_ptr() as *mut MetaDataDefn) };
        metadata.cnc_version = CNC_VERSION;
        metadata.to_driver_buffer_length = to_driver_buffer_length;
        metadata.to_clients_buffer_length = to_clients_buffer_length;
        metadata.counter_values_buffer_length = counter_values_buffer_length;
        metadata.error_log_buffer_length = error_log_buffer_length;
        metadata.client_liveness_timeout_ms = client_liveness_timeout_ms;
        metadata.start_timestamp_ms = 0;
        metadata.pid = std::process::id() as i64;

        metadata_map.flush().map_err(file_error)?;
        Ok(())
    }
}
