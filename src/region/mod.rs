//! Persistent-memory substrate.
//!
//! A [`Region`] is a single contiguous byte range backing one engine
//! instance, mapped from a pool file and treated as byte-addressable
//! non-volatile memory. [`Region::persist`] flushes a byte range to
//! stable media; on a real NVM mapping this is the flush + drain
//! sequence, on a plain filesystem it degrades to a ranged `msync`.
//!
//! # On-media layout
//!
//! ```text
//! [HEADER_SPAN bytes: RegionHeader | CRC32_LE | zero pad]
//! [engine-specific payload ......................... EOF]
//! ```
//!
//! The header records which engine created the pool (`layout_name`),
//! the comparator the pool was created under, and the region size.
//! Opening a pool with a different engine fails before any payload
//! byte is interpreted.
//!
//! # Ownership
//!
//! A region is exclusively owned by one engine instance. A process-wide
//! guard set of canonicalized pool paths detects double-opens and
//! refuses them; the entry is released when the region is dropped.
//!
//! # Ambient transaction scope
//!
//! [`txscope`] tracks whether the calling thread is inside a
//! caller-initiated persistent-memory transaction. Engine operations
//! consult it at their boundary and refuse to run there, so that a
//! half-built library mutation can never be captured by (and rolled
//! back with) a foreign transaction.

pub mod txscope;


use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crc32fast::Hasher as Crc32;
use memmap2::{MmapOptions, MmapRaw};
use once_cell::sync::Lazy;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{Config, OpenMode};
use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::status::{Status, fail};

/// Bytes reserved at the start of every pool for the region header.
/// The engine payload begins at this offset.
pub const HEADER_SPAN: usize = 256;

const U32_SIZE: usize = std::mem::size_of::<u32>();

// ------------------------------------------------------------------------------------------------
// Error types
// ------------------------------------------------------------------------------------------------

/// Errors raised by the persistent-memory substrate.
#[derive(Debug, Error)]
pub enum RegionError {
    /// Underlying filesystem or mapping failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Header serialization failure.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// The header failed checksum, magic, or version validation.
    #[error("region header corrupt: {0}")]
    HeaderCorrupt(String),

    /// The pool was created by a different engine.
    #[error("region was created by engine \"{found}\"")]
    LayoutMismatch {
        /// Engine name found in the pool header.
        found: String,
    },

    /// The pool file is already mapped by this process.
    #[error("region already mapped by this process: {0}")]
    AlreadyOpen(String),

    /// The requested or on-media size cannot hold the header plus payload.
    #[error("region too small: {0} bytes")]
    TooSmall(u64),
}

impl From<RegionError> for Status {
    fn from(e: RegionError) -> Status {
        let kind = match &e {
            RegionError::LayoutMismatch { .. } => Status::WrongEngineName,
            RegionError::AlreadyOpen(_) | RegionError::TooSmall(_) => Status::InvalidArgument,
            RegionError::Io(_) | RegionError::Encoding(_) | RegionError::HeaderCorrupt(_) => {
                Status::UnknownError
            }
        };
        fail(kind, e.to_string())
    }
}

// ------------------------------------------------------------------------------------------------
// Region header
// ------------------------------------------------------------------------------------------------

/// Metadata written at offset 0 of every pool, closed by a CRC32.
#[derive(Debug, Clone)]
pub struct RegionHeader {
    /// Magic constant identifying nvkv pools (`b"NVKVPOOL"`).
    magic: [u8; 8],

    /// On-media format version.
    version: u32,

    /// Name of the engine that created the pool.
    layout_name: String,

    /// Name of the comparator the pool was created under
    /// (empty for unordered engines).
    comparator_name: String,

    /// Total mapped size in bytes, including the header span.
    region_size: u64,
}

impl RegionHeader {
    /// Expected 8-byte magic constant.
    pub const MAGIC: [u8; 8] = *b"NVKVPOOL";

    /// Current supported format version.
    pub const VERSION: u32 = 1;

    fn new(layout_name: &str, comparator_name: &str, region_size: u64) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            layout_name: layout_name.to_string(),
            comparator_name: comparator_name.to_string(),
            region_size,
        }
    }

    /// Engine name recorded at create time.
    pub fn layout_name(&self) -> &str {
        &self.layout_name
    }

    /// Comparator name recorded at create time.
    pub fn comparator_name(&self) -> &str {
        &self.comparator_name
    }

    /// Total region size recorded at create time.
    pub fn region_size(&self) -> u64 {
        self.region_size
    }
}

impl Encode for RegionHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.magic.encode_to(buf)?;
        self.version.encode_to(buf)?;
        self.layout_name.encode_to(buf)?;
        self.comparator_name.encode_to(buf)?;
        self.region_size.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for RegionHeader {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (magic, n) = <[u8; 8]>::decode_from(&buf[offset..])?;
        offset += n;
        let (version, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (layout_name, n) = String::decode_from(&buf[offset..])?;
        offset += n;
        let (comparator_name, n) = String::decode_from(&buf[offset..])?;
        offset += n;
        let (region_size, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                magic,
                version,
                layout_name,
                comparator_name,
                region_size,
            },
            offset,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Double-open guard
// ------------------------------------------------------------------------------------------------

static OPEN_POOLS: Lazy<Mutex<HashSet<PathBuf>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// RAII registration of a mapped pool path; removal happens on drop.
#[derive(Debug)]
struct PoolGuard {
    path: PathBuf,
}

impl PoolGuard {
    fn register(path: PathBuf) -> Result<Self, RegionError> {
        let mut pools = OPEN_POOLS.lock().unwrap_or_else(|e| e.into_inner());
        if !pools.insert(path.clone()) {
            return Err(RegionError::AlreadyOpen(path.display().to_string()));
        }
        Ok(Self { path })
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        let mut pools = OPEN_POOLS.lock().unwrap_or_else(|e| e.into_inner());
        pools.remove(&self.path);
    }
}

// ------------------------------------------------------------------------------------------------
// Region
// ------------------------------------------------------------------------------------------------

/// A mapped pool file exposed as a flat persistent byte range.
///
/// All offsets in the accessor methods are **payload-relative**: offset
/// 0 is the first byte after the header span.
pub struct Region {
    map: MmapRaw,
    header: RegionHeader,
    created: bool,
    _guard: PoolGuard,
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("layout", &self.header.layout_name)
            .field("size", &self.header.region_size)
            .field("created", &self.created)
            .finish_non_exhaustive()
    }
}

impl Region {
    /// Creates a new pool at `path` of `size` bytes, writes the header,
    /// and maps it.
    ///
    /// The file must not already exist. A freshly extended file reads
    /// as zeros, so the payload starts out zeroed without an explicit
    /// pass.
    pub fn create(
        path: impl AsRef<Path>,
        size: u64,
        layout_name: &str,
        comparator_name: &str,
    ) -> Result<Self, RegionError> {
        let path = path.as_ref();
        if size <= HEADER_SPAN as u64 {
            return Err(RegionError::TooSmall(size));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.set_len(size)?;

        let canonical = path.canonicalize()?;
        let guard = PoolGuard::register(canonical)?;

        let map = MmapOptions::new().map_raw(&file)?;
        let header = RegionHeader::new(layout_name, comparator_name, size);

        let region = Self {
            map,
            header,
            created: true,
            _guard: guard,
        };
        region.write_header()?;

        info!(
            path = %path.display(),
            size,
            layout = layout_name,
            "region created"
        );
        Ok(region)
    }

    /// Opens and validates an existing pool at `path`.
    ///
    /// The header CRC, magic, and version are checked first; then the
    /// recorded `layout_name` is compared against `expected_layout`.
    pub fn open(path: impl AsRef<Path>, expected_layout: &str) -> Result<Self, RegionError> {
        let path = path.as_ref();
        let canonical = path.canonicalize()?;
        let guard = PoolGuard::register(canonical)?;

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let file_len = file.metadata()?.len();
        if file_len <= HEADER_SPAN as u64 {
            return Err(RegionError::TooSmall(file_len));
        }

        let map = MmapOptions::new().map_raw(&file)?;
        let header = Self::read_and_validate_header(&map)?;

        if header.region_size != file_len {
            return Err(RegionError::HeaderCorrupt(format!(
                "recorded size {} does not match file size {}",
                header.region_size, file_len
            )));
        }
        if header.layout_name != expected_layout {
            debug!(
                found = %header.layout_name,
                expected = expected_layout,
                "layout mismatch at open"
            );
            return Err(RegionError::LayoutMismatch {
                found: header.layout_name,
            });
        }

        info!(path = %path.display(), layout = %header.layout_name, "region opened");
        Ok(Self {
            map,
            header,
            created: false,
            _guard: guard,
        })
    }

    /// True if this region was freshly created (as opposed to reopened).
    pub fn is_new(&self) -> bool {
        self.created
    }

    /// The validated region header.
    pub fn header(&self) -> &RegionHeader {
        &self.header
    }

    /// Number of payload bytes available to the engine.
    pub fn payload_len(&self) -> usize {
        self.map.len() - HEADER_SPAN
    }

    /// Borrow `len` payload bytes starting at `off`.
    ///
    /// The caller must guarantee that no thread writes the same range
    /// for the lifetime of the returned slice (engines enforce this
    /// with their slot locks or engine-wide write lock).
    pub(crate) fn slice(&self, off: usize, len: usize) -> &[u8] {
        self.check_range(off, len);
        // SAFETY: the range is inside the mapping (checked above) and
        // the caller upholds the no-concurrent-writer contract.
        unsafe { std::slice::from_raw_parts(self.map.as_ptr().add(HEADER_SPAN + off), len) }
    }

    /// Write `bytes` into the payload at `off`.
    ///
    /// The caller must guarantee exclusive access to the written range
    /// (slot lock or engine-wide write lock held).
    pub(crate) fn write(&self, off: usize, bytes: &[u8]) {
        self.check_range(off, bytes.len());
        // SAFETY: the range is inside the mapping (checked above) and
        // the caller upholds the exclusive-writer contract.
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.map.as_mut_ptr().add(HEADER_SPAN + off),
                bytes.len(),
            );
        }
    }

    /// Copy `buf.len()` payload bytes starting at `off` into `buf`.
    ///
    /// Unlike [`Region::slice`], the bytes are copied out immediately,
    /// so a concurrent overwrite of the range can at worst deliver a
    /// mix of old and new bytes; readers that tolerate that (the
    /// hash-store re-read guard) use this accessor.
    pub(crate) fn read_into(&self, off: usize, buf: &mut [u8]) {
        self.check_range(off, buf.len());
        // SAFETY: the range is inside the mapping (checked above); a
        // racing writer can tear the copy, which the caller detects by
        // re-validating the published metadata afterwards.
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.map.as_ptr().add(HEADER_SPAN + off),
                buf.as_mut_ptr(),
                buf.len(),
            );
        }
    }

    /// Flush a payload byte range to stable media.
    pub fn persist(&self, off: usize, len: usize) -> Result<(), RegionError> {
        self.check_range(off, len);
        self.map.flush_range(HEADER_SPAN + off, len)?;
        Ok(())
    }

    /// Flush the whole mapping.
    pub fn persist_all(&self) -> Result<(), RegionError> {
        self.map.flush()?;
        Ok(())
    }

    fn check_range(&self, off: usize, len: usize) {
        let end = off
            .checked_add(len)
            .unwrap_or_else(|| panic!("payload range overflow: off={off} len={len}"));
        assert!(
            end <= self.payload_len(),
            "payload range out of bounds: off={off} len={len} payload={}",
            self.payload_len()
        );
    }

    fn write_header(&self) -> Result<(), RegionError> {
        let bytes = encoding::encode_to_vec(&self.header)?;
        let mut hasher = Crc32::new();
        hasher.update(&bytes);
        let checksum = hasher.finalize();

        if bytes.len() + U32_SIZE > HEADER_SPAN {
            return Err(RegionError::HeaderCorrupt(format!(
                "encoded header of {} bytes exceeds the {HEADER_SPAN}-byte span",
                bytes.len() + U32_SIZE
            )));
        }

        // SAFETY: the header span precedes the payload and is written
        // only here, before the region is handed to an engine.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.map.as_mut_ptr(), bytes.len());
            std::ptr::copy_nonoverlapping(
                checksum.to_le_bytes().as_ptr(),
                self.map.as_mut_ptr().add(bytes.len()),
                U32_SIZE,
            );
        }
        self.map.flush_range(0, HEADER_SPAN)?;
        Ok(())
    }

    fn read_and_validate_header(map: &MmapRaw) -> Result<RegionHeader, RegionError> {
        // SAFETY: the mapping is at least HEADER_SPAN + 1 bytes (checked
        // by the caller) and nothing writes the header after create.
        let span = unsafe { std::slice::from_raw_parts(map.as_ptr(), HEADER_SPAN) };

        let (header, consumed) = encoding::decode_from_slice::<RegionHeader>(span)
            .map_err(|e| RegionError::HeaderCorrupt(e.to_string()))?;

        if consumed + U32_SIZE > HEADER_SPAN {
            return Err(RegionError::HeaderCorrupt("header overruns its span".into()));
        }
        let mut stored = [0u8; U32_SIZE];
        stored.copy_from_slice(&span[consumed..consumed + U32_SIZE]);
        let stored_checksum = u32::from_le_bytes(stored);

        let mut hasher = Crc32::new();
        hasher.update(&span[..consumed]);
        if hasher.finalize() != stored_checksum {
            return Err(RegionError::HeaderCorrupt("checksum mismatch".into()));
        }

        if header.magic != RegionHeader::MAGIC {
            return Err(RegionError::HeaderCorrupt("bad magic".into()));
        }
        if header.version != RegionHeader::VERSION {
            return Err(RegionError::HeaderCorrupt(format!(
                "unsupported format version {}",
                header.version
            )));
        }

        Ok(header)
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if let Err(e) = self.map.flush() {
            warn!(error = %e, "region flush failed on drop");
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Config-driven open
// ------------------------------------------------------------------------------------------------

/// Resolves a [`Region`] from an engine configuration.
///
/// Applies the open-mode rules: at most one of `path`/`oid`, the
/// `create_if_missing` / `create_or_error_if_exists` (and deprecated
/// `force_create`) flags, and the `size` requirement when creating.
/// `min_size` is the engine's smallest usable pool.
pub(crate) fn open_from_config(
    cfg: &mut Config,
    layout_name: &'static str,
    comparator_name: &str,
    min_size: u64,
) -> Result<Region, Status> {
    if let Some(region) = cfg.take_region() {
        if cfg.path().is_some() {
            return Err(fail(
                Status::InvalidArgument,
                "config must not carry both \"path\" and \"oid\"",
            ));
        }
        if region.header().layout_name() != layout_name {
            return Err(fail(
                Status::WrongEngineName,
                format!(
                    "supplied region belongs to engine \"{}\"",
                    region.header().layout_name()
                ),
            ));
        }
        return Ok(region);
    }

    let Some(path) = cfg.path().map(PathBuf::from) else {
        return Err(fail(
            Status::InvalidArgument,
            "config must carry \"path\" or \"oid\"",
        ));
    };
    let mode = cfg.open_mode()?;
    let exists = path.exists();

    let create = match mode {
        OpenMode::CreateOrErrorIfExists => {
            if exists {
                return Err(fail(
                    Status::InvalidArgument,
                    format!("pool file already exists: {}", path.display()),
                ));
            }
            true
        }
        OpenMode::CreateIfMissing => !exists,
        OpenMode::OpenExisting => {
            if !exists {
                return Err(fail(
                    Status::InvalidArgument,
                    format!("pool file does not exist: {}", path.display()),
                ));
            }
            false
        }
    };

    if create {
        let Some(size) = cfg.size() else {
            return Err(fail(
                Status::InvalidArgument,
                "config must carry \"size\" when creating a pool",
            ));
        };
        if size < min_size {
            return Err(fail(
                Status::InvalidArgument,
                format!("requested size {size} below the engine minimum of {min_size} bytes"),
            ));
        }
        Ok(Region::create(&path, size, layout_name, comparator_name)?)
    } else {
        Ok(Region::open(&path, layout_name)?)
    }
}
