#![deny(unsafe_op_in_unsafe_fn)]

use core::fmt::{Display, Formatter};
use core::mem::size_of;

use nix::errno::Errno;

use mem_utils::mmap::MappingStrategy;

use crate::pattern::{PatternError, PatternPolicy};

pub mod chase;
pub mod pattern;
pub mod timing;

// cat /sys/devices/system/cpu/cpu0/cache/index3/ways_of_associativity
pub const L3_NUM_WAYS: usize = 16;
/// Twice the associativity, so the chain cannot live in one set.
pub const NUM_ENTRIES: usize = L3_NUM_WAYS * 2;
/// log2 of the distance between consecutive bank slots.
pub const ENTRY_SHIFT: u32 = 17;
pub const ENTRY_DIST: usize = 1 << ENTRY_SHIFT;
/// Default upper bit of the randomized bucket range. 2^(22-17+1) = 64
/// buckets, enough headroom over NUM_ENTRIES.
pub const RANGE_RIGHT: u32 = 22;
pub const CACHE_LINE_LEN: usize = 64;
/// The buffer is traversed in u32 elements, byte offsets divide by this.
pub const ELEM_LEN: usize = size_of::<u32>();

/// Everything fixed before generation. Built once from the command line,
/// immutable afterwards.
#[derive(Debug, Clone, Copy)]
pub struct RunConfig {
    pub num_entries: usize,
    pub entry_shift: u32,
    pub range_left: u32,
    pub range_right: u32,
    pub page_shift: u32,
    pub xor_page_shift: Option<u32>,
    pub iterations: u64,
    /// Requested buffer size in bytes, clamped up to the policy minimum.
    pub mem_size_override: Option<usize>,
    pub policy: PatternPolicy,
    pub strategy: MappingStrategy,
    pub cpu_affinity: Option<usize>,
    pub priority: Option<i32>,
}

impl RunConfig {
    pub fn entry_dist(&self) -> usize {
        1 << self.entry_shift
    }

    pub fn bucket_width(&self) -> usize {
        1 << self.range_left
    }

    pub fn bucket_count(&self) -> usize {
        1 << (self.range_right - self.range_left + 1)
    }

    /// Bias added to the traversal base so the tested address bits are set,
    /// in bytes.
    pub fn base_bias(&self) -> usize {
        (1usize << self.page_shift) + self.xor_page_shift.map_or(0, |s| 1usize << s)
    }

    /// The bias in whole elements. Bits below the element size cannot move
    /// the base.
    pub fn base_bias_elems(&self) -> usize {
        self.base_bias() / ELEM_LEN
    }

    /// Slot granularity of the active policy.
    pub fn granularity(&self) -> usize {
        match self.policy {
            PatternPolicy::Stride => self.entry_dist(),
            PatternPolicy::Random => self.bucket_width(),
        }
    }

    /// Bytes to map: requested (or minimal) slot span plus the bias,
    /// rounded up to the slot granularity. Never truncates below what the
    /// entries and their bias need.
    pub fn buffer_len_bytes(&self) -> usize {
        let min = match self.policy {
            PatternPolicy::Stride => self.num_entries * self.entry_dist(),
            PatternPolicy::Random => self.bucket_count() * self.bucket_width(),
        };
        let base = self.mem_size_override.map_or(min, |m| m.max(min));
        ceil(base + self.base_bias(), self.granularity())
    }

    pub fn buffer_len_elems(&self) -> usize {
        ceil(self.buffer_len_bytes(), ELEM_LEN) / ELEM_LEN
    }
}

fn ceil(val: usize, unit: usize) -> usize {
    ((val + unit - 1) / unit) * unit
}

#[derive(Debug)]
pub enum RunError {
    NoMem(Errno),
    Pattern(PatternError),
    Clock(Errno),
}

impl From<PatternError> for RunError {
    fn from(e: PatternError) -> Self {
        RunError::Pattern(e)
    }
}

impl Display for RunError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            RunError::NoMem(e) => write!(f, "failed to map memory: {}", e),
            RunError::Pattern(e) => write!(f, "{}", e),
            RunError::Clock(e) => write!(f, "clock_gettime failed: {}", e),
        }
    }
}
