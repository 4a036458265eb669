#![deny(unsafe_op_in_unsafe_fn)]

use std::process::exit;

use clap::Parser;
use itertools::Itertools;
use log::{debug, info, warn};

use bank_mapping::chase::{Measurement, Traversal};
use bank_mapping::pattern::{self, PatternPolicy};
use bank_mapping::timing;
use bank_mapping::{RunConfig, RunError, CACHE_LINE_LEN, ENTRY_SHIFT, NUM_ENTRIES, RANGE_RIGHT};
use mem_utils::mmap::{MMappedMemory, MappingStrategy};

/// Physical window mapped by the /dev/mem backend. Board specific, needs
/// privileged access.
const DEV_MEM_BASE: u64 = 0x1000_0000_8000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Policy {
    Stride,
    Random,
}

/// Measures dependent-load latency over spaced bank slots to map which
/// address bits feed the cache/bank index function.
#[derive(Parser, Debug)]
#[command(name = "bank_mapping")]
struct Args {
    /// Address bit biasing the traversal base.
    #[arg(short = 'b', long = "bank-bit", default_value_t = 0, value_parser = clap::value_parser!(u32).range(0..64))]
    bank_bit: u32,

    /// Second address bit added to the bias, for probing XOR-hash index
    /// functions.
    #[arg(short = 's', long = "xor-bank-bit", value_parser = clap::value_parser!(u32).range(0..64))]
    xor_bank_bit: Option<u32>,

    /// Buffer size in KiB, clamped up to what the entries need.
    #[arg(short = 'm', long = "memory-size")]
    memory_size: Option<usize>,

    /// Map a window of /dev/mem instead of anonymous hugepages.
    #[arg(short = 'x', long = "use-physical-memory")]
    use_physical_memory: bool,

    /// Map with the default page size instead of MAP_HUGETLB.
    #[arg(long = "no-hugepage", conflicts_with = "use_physical_memory")]
    no_hugepage: bool,

    /// Pin to this logical CPU, modulo the configured CPU count.
    #[arg(short = 'c', long = "cpu-affinity")]
    cpu_affinity: Option<usize>,

    /// Scheduling priority for the run.
    #[arg(short = 'p', long = "priority")]
    priority: Option<i32>,

    /// Number of timed pointer-chase steps.
    #[arg(short = 'i', long = "iterations", default_value_t = 1000)]
    iterations: u64,

    /// Access-sequence generation policy.
    #[arg(short = 'r', long = "policy", value_enum, default_value = "stride")]
    policy: Policy,

    /// log2 of the bucket width for the random policy.
    #[arg(long = "range-left", default_value_t = ENTRY_SHIFT, value_parser = clap::value_parser!(u32).range(2..64))]
    range_left: u32,

    /// Highest address bit covered by the random-policy bucket range.
    #[arg(long = "range-right", default_value_t = RANGE_RIGHT, value_parser = clap::value_parser!(u32).range(2..64))]
    range_right: u32,
}

fn config_from(args: &Args) -> RunConfig {
    RunConfig {
        num_entries: NUM_ENTRIES,
        entry_shift: ENTRY_SHIFT,
        range_left: args.range_left,
        range_right: args.range_right,
        page_shift: args.bank_bit,
        xor_page_shift: args.xor_bank_bit,
        iterations: args.iterations,
        mem_size_override: args.memory_size.map(|kb| kb * 1024),
        policy: match args.policy {
            Policy::Stride => PatternPolicy::Stride,
            Policy::Random => PatternPolicy::Random,
        },
        strategy: if args.use_physical_memory {
            MappingStrategy::Physical { base: DEV_MEM_BASE }
        } else if args.no_hugepage {
            MappingStrategy::Anonymous
        } else {
            MappingStrategy::AnonymousHuge
        },
        cpu_affinity: args.cpu_affinity,
        priority: args.priority,
    }
}

fn measure(config: &RunConfig) -> Result<(usize, Measurement), RunError> {
    let sequence = pattern::generate(config, &mut rand::thread_rng())?;
    debug!("access sequence (elements): {}", sequence.iter().format(" "));

    let len_bytes = config.buffer_len_bytes();
    info!("mapping {} bytes via {:?}", len_bytes, config.strategy);
    let memory = MMappedMemory::<u32>::try_new(config.buffer_len_elems(), config.strategy, |i| {
        i as u32
    })
    .map_err(RunError::NoMem)?;

    let window = &memory.slice()[config.base_bias_elems()..];
    let mut traversal = Traversal::new(window, &sequence);
    let measurement = traversal
        .timed_run(config.iterations)
        .map_err(RunError::Clock)?;
    Ok((len_bytes, measurement))
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    let config = config_from(&args);

    if let Some(cpu) = config.cpu_affinity {
        let target = cpu % mem_utils::num_configured_cpus();
        match mem_utils::pin_to_cpu(target) {
            Ok(()) => info!("pinned to cpu {}", target),
            Err(e) => warn!("failed to pin to cpu {}: {}", target, e),
        }
    }
    if let Some(prio) = config.priority {
        match mem_utils::renice(prio) {
            Ok(()) => info!("priority set to {}", prio),
            Err(e) => warn!("failed to set priority {}: {}", prio, e),
        }
    }

    let (len_bytes, measurement) = match measure(&config) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("bank_mapping: {}", e);
            exit(1);
        }
    };

    println!(
        "pshift: {}, XOR-pshift: {}",
        config.page_shift,
        config.xor_page_shift.unwrap_or(0)
    );
    println!("size: {} ({} KB)", len_bytes, len_bytes / 1024);
    println!(
        "duration {} ns, #access {}",
        measurement.elapsed_ns, measurement.accesses
    );
    println!(
        "average latency: {} ns",
        timing::average_latency_ns(measurement.elapsed_ns, measurement.accesses)
    );
    println!(
        "bandwidth {:.2} MB/s",
        timing::bandwidth_mb_s(CACHE_LINE_LEN, measurement.accesses, measurement.elapsed_ns)
    );
}
