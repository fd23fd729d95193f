//! Trivial trace-replay harness for [`tagheap`], the external collaborator
//! spec.md §1 mentions but does not specify beyond its existence.
//!
//! Reads a newline-delimited trace of allocator operations and replays them
//! against a [`tagheap::raw::RawAllocator`] backed by a
//! [`tagheap::region::VecRegion`], printing a short summary at the end.
//! Grounded in the verbose-mode trace-replay shape visible throughout
//! `original_source/mm.c` (the `ourVerbose`/`checkheap` calls interleaved
//! with every operation), with `clap` for argument parsing and
//! `log`/`env_logger` for diagnostics in place of `printf`.
//!
//! Trace line grammar, one operation per line, blank lines and lines
//! starting with `#` ignored:
//! ```text
//! a <id> <size>      allocate <size> bytes, remember the result as <id>
//! f <id>             free the block remembered as <id>
//! r <id> <size>      reallocate the block remembered as <id> to <size> bytes
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use clap::Parser;
use tagheap::raw::RawAllocator;
use tagheap::region::VecRegion;

/// Replay an allocator trace against a `tagheap` heap.
#[derive(Parser, Debug)]
#[command(name = "heapdriver", about = "Replays an allocator trace against tagheap")]
struct Args {
    /// Path to a trace file. Reads from stdin when omitted.
    trace: Option<PathBuf>,

    /// Bytes to reserve for the backing `VecRegion` up front.
    #[arg(long, default_value_t = 1 << 20)]
    capacity: usize,

    /// Run the whole-heap consistency checker after every operation.
    /// Requires the crate to be built with the `checked` feature.
    #[arg(long)]
    check: bool,
}

#[derive(Default)]
struct Summary {
    allocations: u64,
    frees: u64,
    reallocations: u64,
    failures: u64,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let trace = match &args.trace {
        Some(path) => fs::read_to_string(path).unwrap_or_else(|err| {
            eprintln!("heapdriver: failed to read {}: {err}", path.display());
            std::process::exit(1);
        }),
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .expect("heapdriver: failed to read trace from stdin");
            buf
        }
    };

    let mut alloc = RawAllocator::new(VecRegion::with_capacity(args.capacity));
    alloc.init().expect("heapdriver: initial heap extension failed");
    log::info!("heap initialized, capacity = {} bytes", args.capacity);

    let mut live: HashMap<u64, std::ptr::NonNull<u8>> = HashMap::new();
    let mut summary = Summary::default();

    for (lineno, line) in trace.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut tokens = line.split_whitespace();
        let op = tokens.next();
        match op {
            Some("a") => {
                let id = parse_token(&mut tokens, lineno);
                let size: usize = parse_token(&mut tokens, lineno);
                summary.allocations += 1;
                match alloc.allocate(size) {
                    Some(bp) => {
                        log::debug!("a {id} {size} -> {:p}", bp.as_ptr());
                        live.insert(id, bp);
                    }
                    None => {
                        summary.failures += 1;
                        log::warn!("a {id} {size} -> NULL (heap exhausted)");
                    }
                }
            }
            Some("f") => {
                let id = parse_token(&mut tokens, lineno);
                summary.frees += 1;
                if let Some(bp) = live.remove(&id) {
                    log::debug!("f {id} ({:p})", bp.as_ptr());
                    let _ = alloc.free(Some(bp));
                } else {
                    log::warn!("f {id}: no such live block, ignored");
                }
            }
            Some("r") => {
                let id = parse_token(&mut tokens, lineno);
                let size: usize = parse_token(&mut tokens, lineno);
                summary.reallocations += 1;
                let bp = live.remove(&id);
                match alloc.reallocate(bp, size) {
                    Some(new_bp) => {
                        log::debug!("r {id} {size} -> {:p}", new_bp.as_ptr());
                        live.insert(id, new_bp);
                    }
                    None if size == 0 => {
                        log::debug!("r {id} 0 -> freed");
                    }
                    None => {
                        summary.failures += 1;
                        log::warn!("r {id} {size} -> NULL (heap exhausted)");
                    }
                }
            }
            Some(other) => {
                eprintln!("heapdriver: line {}: unknown operation {other:?}", lineno + 1);
                std::process::exit(1);
            }
            None => unreachable!("blank lines are filtered above"),
        }

        if args.check {
            run_checker(&alloc, lineno);
        }
    }

    println!("allocations:   {}", summary.allocations);
    println!("frees:         {}", summary.frees);
    println!("reallocations: {}", summary.reallocations);
    println!("failures:      {}", summary.failures);
    println!("live blocks:   {}", live.len());
}

fn parse_token<T: std::str::FromStr>(tokens: &mut std::str::SplitWhitespace, lineno: usize) -> T {
    tokens
        .next()
        .and_then(|tok| tok.parse().ok())
        .unwrap_or_else(|| {
            eprintln!("heapdriver: line {}: malformed operand", lineno + 1);
            std::process::exit(1);
        })
}

#[cfg(feature = "checked")]
fn run_checker(alloc: &RawAllocator<VecRegion>, lineno: usize) {
    if let Err(violation) = tagheap::checker::check(alloc) {
        eprintln!("heapdriver: line {}: consistency violation: {violation:?}", lineno + 1);
        std::process::exit(1);
    }
}

#[cfg(not(feature = "checked"))]
fn run_checker(_alloc: &RawAllocator<VecRegion>, _lineno: usize) {
    log::warn!("--check requested but the `checked` feature is not enabled; skipping");
}
