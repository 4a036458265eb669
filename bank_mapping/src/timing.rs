use nix::errno::Errno;
use nix::sys::time::TimeSpec;
use nix::time::{clock_gettime, ClockId};

pub const NS_PER_SEC: i64 = 1_000_000_000;

/// Monotonic timestamp; immune to wall-clock steps during a run.
pub fn now() -> Result<TimeSpec, Errno> {
    clock_gettime(ClockId::CLOCK_MONOTONIC)
}

/// Nanoseconds from `start` to `end`, borrowing one second when the
/// sub-second component wraps.
pub fn elapsed_ns(start: &TimeSpec, end: &TimeSpec) -> u64 {
    if start.tv_nsec() > end.tv_nsec() {
        (end.tv_sec() - 1 - start.tv_sec()) as u64 * NS_PER_SEC as u64
            + (NS_PER_SEC + end.tv_nsec() - start.tv_nsec()) as u64
    } else {
        (end.tv_sec() - start.tv_sec()) as u64 * NS_PER_SEC as u64
            + (end.tv_nsec() - start.tv_nsec()) as u64
    }
}

pub fn average_latency_ns(elapsed_ns: u64, accesses: u64) -> u64 {
    if accesses == 0 {
        return 0;
    }
    elapsed_ns / accesses
}

/// One cache line fetched per access, reported in MB/s.
pub fn bandwidth_mb_s(line_len: usize, accesses: u64, elapsed_ns: u64) -> f64 {
    line_len as f64 * 1000.0 * accesses as f64 / elapsed_ns as f64
}

#[cfg(test)]
mod tests {
    use nix::sys::time::TimeValLike;

    use super::*;

    fn at(sec: i64, nsec: i64) -> TimeSpec {
        TimeSpec::nanoseconds(sec * NS_PER_SEC + nsec)
    }

    #[test]
    fn elapsed_without_borrow() {
        let start = at(10, 100_000_000);
        let end = at(11, 900_000_000);
        assert_eq!(elapsed_ns(&start, &end), 1_800_000_000);
    }

    #[test]
    fn elapsed_across_a_subsecond_wrap() {
        let start = at(10, 900_000_000);
        let end = at(11, 100_000_000);
        assert_eq!(elapsed_ns(&start, &end), 200_000_000);
    }

    #[test]
    fn elapsed_of_identical_timestamps_is_zero() {
        let t = at(42, 123_456_789);
        assert_eq!(elapsed_ns(&t, &t), 0);
    }

    #[test]
    fn average_latency_divides_out_the_accesses() {
        assert_eq!(average_latency_ns(1_000_000, 1000), 1000);
        assert_eq!(average_latency_ns(999, 1000), 0);
        assert_eq!(average_latency_ns(12345, 0), 0);
    }

    #[test]
    fn bandwidth_of_the_reference_case() {
        // 64-byte lines, 1000 accesses in 1 ms: 64 MB/s.
        let mb_s = bandwidth_mb_s(64, 1000, 1_000_000);
        assert!((mb_s - 64.0).abs() < 1e-9);
    }
}
