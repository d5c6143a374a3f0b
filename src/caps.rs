//! Linux capabilities: identifiers, the kernel's capability bound, the
//! bounding set and the effective/permitted/inheritable masks.

use crate::errors::*;
use crate::kernel::Kernel;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::slice;
use std::sync::OnceLock;

/// Revision of the capget/capset ABI using two 32-bit words per mask
pub const LINUX_CAPABILITY_VERSION_3: u32 = 0x2008_0522;

/// Number of 32-bit words per mask for `LINUX_CAPABILITY_VERSION_3`
pub const LINUX_CAPABILITY_U32S_3: usize = 2;

/// Where the kernel exposes the highest capability number it knows about
pub const CAP_LAST_CAP_PATH: &str = "/proc/sys/kernel/cap_last_cap";

// cap_last_cap is a short decimal number followed by a newline
const CAP_LAST_CAP_MAX_LEN: usize = 16;

/// A capability number
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Capability(u8);

macro_rules! capabilities {
    ($($name:ident = $value:literal,)*) => {
        impl Capability {
            $(pub const $name: Capability = Capability($value);)*

            /// Kernel name of this capability, if it has one
            pub fn name(self) -> Option<&'static str> {
                match self.0 {
                    $($value => Some(concat!("CAP_", stringify!($name))),)*
                    _ => None,
                }
            }
        }
    };
}

capabilities! {
    CHOWN = 0,
    DAC_OVERRIDE = 1,
    DAC_READ_SEARCH = 2,
    FOWNER = 3,
    FSETID = 4,
    KILL = 5,
    SETGID = 6,
    SETUID = 7,
    SETPCAP = 8,
    LINUX_IMMUTABLE = 9,
    NET_BIND_SERVICE = 10,
    NET_BROADCAST = 11,
    NET_ADMIN = 12,
    NET_RAW = 13,
    IPC_LOCK = 14,
    IPC_OWNER = 15,
    SYS_MODULE = 16,
    SYS_RAWIO = 17,
    SYS_CHROOT = 18,
    SYS_PTRACE = 19,
    SYS_PACCT = 20,
    SYS_ADMIN = 21,
    SYS_BOOT = 22,
    SYS_NICE = 23,
    SYS_RESOURCE = 24,
    SYS_TIME = 25,
    SYS_TTY_CONFIG = 26,
    MKNOD = 27,
    LEASE = 28,
    AUDIT_WRITE = 29,
    AUDIT_CONTROL = 30,
    SETFCAP = 31,
    MAC_OVERRIDE = 32,
    MAC_ADMIN = 33,
    SYSLOG = 34,
    WAKE_ALARM = 35,
    BLOCK_SUSPEND = 36,
    AUDIT_READ = 37,
    PERFMON = 38,
    BPF = 39,
    CHECKPOINT_RESTORE = 40,
}

impl Capability {
    /// Highest number that fits in a version 3 capability record
    pub const MAX_REPRESENTABLE: u8 = (LINUX_CAPABILITY_U32S_3 * 32 - 1) as u8;

    /// Build a capability from its number
    pub fn from_u8(value: u8) -> Option<Capability> {
        if value <= Self::MAX_REPRESENTABLE {
            Some(Capability(value))
        } else {
            None
        }
    }

    pub fn as_u8(self) -> u8 {
        self.0
    }

    /// Index of the 32-bit word holding this capability, and its bit in that word
    fn word_and_mask(self) -> (usize, u32) {
        (usize::from(self.0 / 32), 1 << (self.0 % 32))
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "CAP_{}", self.0),
        }
    }
}

/// The range of capability numbers known to the running kernel.
///
/// The range is empty until an upper bound has been discovered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CapabilityModel {
    min: Capability,
    max: Option<Capability>,
}

impl Default for CapabilityModel {
    /// A model without a known upper bound, covering no capability
    fn default() -> Self {
        CapabilityModel {
            min: Capability(0),
            max: None,
        }
    }
}

static HOST_MODEL: OnceLock<CapabilityModel> = OnceLock::new();

impl CapabilityModel {
    /// A model covering `[0, max]`
    pub fn with_max(max: Capability) -> Self {
        CapabilityModel {
            min: Capability(0),
            max: Some(max),
        }
    }

    /// The model of the running kernel, discovered on first use
    pub fn host() -> CapabilityModel {
        *HOST_MODEL.get_or_init(CapabilityModel::discover)
    }

    /// Read `/proc/sys/kernel/cap_last_cap`.
    ///
    /// Failures are logged and leave the range empty, so the process can
    /// still start on kernels that do not expose the file.
    pub fn discover() -> CapabilityModel {
        let mut model = CapabilityModel::default();
        let res = File::open(CAP_LAST_CAP_PATH)
            .map_err(PrivDropError::from)
            .and_then(|file| model.discover_from(file));
        if let Err(e) = res {
            log::warn!("Unable to read {}: {}", CAP_LAST_CAP_PATH, e);
        }
        model
    }

    /// Parse a `cap_last_cap` value from `reader` and use it as the upper bound.
    ///
    /// The model is left unchanged on error.
    pub fn discover_from<R: Read>(&mut self, mut reader: R) -> Result<Capability, PrivDropError> {
        let mut buf = [0u8; CAP_LAST_CAP_MAX_LEN];
        let len = read_full(&mut reader, &mut buf)?;
        if len >= CAP_LAST_CAP_MAX_LEN {
            return Err(PrivDropError::detail(
                ErrorKind::LineTooLong,
                format!("cap_last_cap too long: {}", len),
            ));
        }
        let text = std::str::from_utf8(&buf[..len])
            .map_err(|_| PrivDropError::from((ErrorKind::InvalidCapability, "cap_last_cap is not text")))?;
        let text = text.trim();
        let max = text
            .parse::<u8>()
            .ok()
            .and_then(Capability::from_u8)
            .ok_or_else(|| {
                PrivDropError::detail(
                    ErrorKind::InvalidCapability,
                    format!("unusable cap_last_cap value: {:?}", text),
                )
            })?;
        self.max = Some(max);
        Ok(max)
    }

    pub fn min(&self) -> Capability {
        self.min
    }

    /// Highest capability number, if it is known
    pub fn max(&self) -> Option<Capability> {
        self.max
    }

    /// Every capability number in `[min, max]`; nothing without a known `max`
    pub fn iter(&self) -> impl Iterator<Item = Capability> {
        let min = self.min.0;
        self.max
            .into_iter()
            .flat_map(move |max| (min..=max.0).map(Capability))
    }
}

// Fill `buf` until it is full or the reader is exhausted
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut len = 0;
    while len < buf.len() {
        match reader.read(&mut buf[len..]) {
            Ok(0) => break,
            Ok(n) => len += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(len)
}

/// Header of a capget/capset call
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CapHeader {
    pub version: u32,
    pub pid: i32,
}

/// One 32-bit word of each capability mask
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CapData {
    pub effective: u32,
    pub permitted: u32,
    pub inheritable: u32,
}

/// Argument block of a version 3 capget/capset call
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CapabilityRecord {
    pub header: CapHeader,
    pub data: [CapData; LINUX_CAPABILITY_U32S_3],
}

impl CapabilityRecord {
    /// A record for `pid` with every mask cleared
    pub fn empty(pid: i32) -> CapabilityRecord {
        CapabilityRecord {
            header: CapHeader {
                version: LINUX_CAPABILITY_VERSION_3,
                pid,
            },
            data: [CapData::default(); LINUX_CAPABILITY_U32S_3],
        }
    }

    /// The masks of the calling process
    pub fn current<K: Kernel>(kernel: &K) -> Result<CapabilityRecord, PrivDropError> {
        let mut record = CapabilityRecord::empty(0);
        kernel.capget(&mut record)?;
        Ok(record)
    }

    pub fn is_empty(&self) -> bool {
        self.data.iter().all(|d| *d == CapData::default())
    }

    pub fn is_effective(&self, cap: Capability) -> bool {
        let (word, mask) = cap.word_and_mask();
        self.data[word].effective & mask != 0
    }

    pub fn is_permitted(&self, cap: Capability) -> bool {
        let (word, mask) = cap.word_and_mask();
        self.data[word].permitted & mask != 0
    }

    /// The exact bytes handed to the kernel
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: CapabilityRecord is #[repr(C)] and made only of 32-bit
        // integers, so it has no padding bytes.
        unsafe {
            slice::from_raw_parts(
                self as *const CapabilityRecord as *const u8,
                std::mem::size_of::<CapabilityRecord>(),
            )
        }
    }
}

/// Outcome of a best-effort bounding set drop
#[derive(Debug, Default)]
pub struct BoundingSetReport {
    /// Capabilities a drop was attempted for
    pub attempted: usize,
    /// Capabilities the kernel accepted to drop
    pub dropped: usize,
    /// The first rejection, if any
    pub first_error: Option<(Capability, PrivDropError)>,
}

impl BoundingSetReport {
    /// Whether every attempted drop succeeded
    pub fn is_complete(&self) -> bool {
        self.attempted == self.dropped
    }
}

/// Drop a capability from the bounding set of the current process
pub fn drop_bound<K: Kernel>(kernel: &K, cap: Capability) -> Result<(), PrivDropError> {
    kernel.capbset_drop(cap)?;
    Ok(())
}

/// Whether a capability is still in the bounding set of the current process
pub fn bound_contains<K: Kernel>(kernel: &K, cap: Capability) -> Result<bool, PrivDropError> {
    Ok(kernel.capbset_read(cap)?)
}

/// Drop every capability known to `model` from the bounding set.
///
/// Without root the bounding set cannot be changed, so nothing is attempted.
/// Individual failures do not stop the loop; they are counted in the report.
pub fn empty_bounding_set<K: Kernel>(kernel: &K, model: &CapabilityModel) -> BoundingSetReport {
    let mut report = BoundingSetReport::default();
    if kernel.geteuid() != 0 {
        log::debug!("Not running as root, leaving the bounding set alone");
        return report;
    }
    for cap in model.iter() {
        report.attempted += 1;
        match drop_bound(kernel, cap) {
            Ok(()) => report.dropped += 1,
            Err(e) => {
                log::debug!("Unable to drop {} from the bounding set: {}", cap, e);
                if report.first_error.is_none() {
                    report.first_error = Some((cap, e));
                }
            }
        }
    }
    report
}

/// Clear the effective, permitted and inheritable capabilities of the
/// current process
pub fn clear_all<K: Kernel>(kernel: &K) -> Result<(), PrivDropError> {
    let record = CapabilityRecord::empty(kernel.getpid());
    kernel.capset(&record)?;
    Ok(())
}
