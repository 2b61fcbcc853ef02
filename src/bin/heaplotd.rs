//! heaplotd - heap census demo daemon.
//!
//! Drives the census poller and a demo filter pass against an in-memory mock
//! target, the way a debugger frontend would drive them against a live
//! process. Useful for watching the pacing and diff behavior without
//! attaching to anything.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use clap::Parser;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use heaplot::census::{AdaptiveCensusPoller, CensusStore, PollOutcome};
use heaplot::config::{CensusConfig, FilterConfig, TargetPlatform};
use heaplot::filter::{ChannelSink, FilterEvent, FilterRunCoordinator};
use heaplot::model::ClassToken;
use heaplot::sched::{Priority, SerialCommandQueue, run_on};
use heaplot::target::mock::{MockDebuggee, MockTracker};
use heaplot::target::TrackerRegistry;
use heaplot::view::{CensusFilter, census_rows};

/// Heap census demo daemon.
#[derive(Parser)]
#[command(name = "heaplotd", about = "Heap census demo daemon", version)]
struct Args {
    /// Minimum seconds between census polls (the adaptive delay can only
    /// stretch this, never shrink it).
    #[arg(short, long, default_value = "2")]
    interval: u64,

    /// Target platform profile, controls the count batch size.
    #[arg(long, value_enum, default_value = "standard")]
    platform: Platform,

    /// Number of census polls before exiting; 0 means run until Ctrl-C.
    #[arg(long, default_value = "0")]
    polls: u64,

    /// Filter expression for the demo filter pass (mock evaluator syntax:
    /// "true", "false", "size > N", "size < N").
    #[arg(long, default_value = "size > 100")]
    expression: String,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Platform {
    Standard,
    Constrained,
}

impl From<Platform> for TargetPlatform {
    fn from(platform: Platform) -> Self {
        match platform {
            Platform::Standard => TargetPlatform::Standard,
            Platform::Constrained => TargetPlatform::Constrained,
        }
    }
}

/// Initializes the tracing subscriber with the appropriate log level.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("heaplotd={}", level).parse().unwrap())
        .add_directive(format!("heaplot={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Mutates the mock heap between polls so censuses show real diffs.
fn churn_heap(target: &MockDebuggee, tick: u64) {
    let string = target.define_class("java.lang.String");
    target.allocate(string, 4 + (tick % 3) as usize);
    if tick % 2 == 0 {
        let object = target.define_class("java.lang.Object");
        target.free(object, 3);
    }
    if tick == 3 {
        // A class loaded mid-session: its first census after the store is
        // initialized reports the whole count as new.
        let cache = target.define_class("com.example.shop.OrderCache");
        target.allocate(cache, 17);
    }
}

fn log_census(store: &CensusStore, trackers: &TrackerRegistry) {
    let snapshot = store.snapshot();
    let rows = census_rows(&snapshot, &CensusFilter::new(), trackers);
    info!(
        "census at {}: {} classes",
        snapshot.timestamp,
        snapshot.len()
    );
    for row in rows.iter().take(5) {
        match row.current {
            Some(current) => info!(
                "  {:<40} {:>8} {:>+6}{}",
                row.name,
                current,
                row.diff,
                if row.trackable { "  [tracked]" } else { "" }
            ),
            None => info!("  {:<40} {:>8}", row.name, "?"),
        }
    }
}

/// Runs one demo filter pass and logs its event stream.
fn run_filter_demo(
    coordinator: &FilterRunCoordinator<MockDebuggee>,
    events: &Receiver<FilterEvent>,
    class: ClassToken,
    expression: &str,
) {
    info!("filter pass: {} over {}", expression, class);
    coordinator.start(class, expression);

    loop {
        match events.recv_timeout(Duration::from_secs(10)) {
            Ok(FilterEvent::Started { total, .. }) => debug!("  {} candidates", total),
            Ok(FilterEvent::MatchChunk { candidates, .. }) => {
                info!("  chunk: {} matched instances", candidates.len());
            }
            Ok(FilterEvent::ErrorGroup { errors, .. }) => {
                warn!("  {} candidates failed to evaluate", errors.len());
            }
            Ok(FilterEvent::Progress { text, .. }) => debug!("  {}", text),
            Ok(FilterEvent::Completed { text, .. }) => {
                info!("  done: {}", text);
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("  filter pass did not complete in time");
                coordinator.cancel();
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    info!("heaplotd {} starting", env!("CARGO_PKG_VERSION"));

    let platform = TargetPlatform::from(args.platform);
    let census_config = CensusConfig::for_platform(platform);
    info!(
        "Config: interval>={}s, batch_size={}, latency_coefficient={}, max_delay={}ms",
        args.interval,
        census_config.batch_size,
        census_config.latency_coefficient,
        census_config.max_delay.as_millis()
    );

    let target = match platform {
        TargetPlatform::Standard => Arc::new(MockDebuggee::typical_heap()),
        TargetPlatform::Constrained => Arc::new(MockDebuggee::constrained_device()),
    };

    // One command queue: exclusive access to the (mock) suspended target.
    let queue = Arc::new(SerialCommandQueue::new());

    let store = Arc::new(CensusStore::new());
    let poller = Arc::new(AdaptiveCensusPoller::new(
        target.clone(),
        store.clone(),
        census_config,
    ));

    // Pretend the session armed a constructor tracker for byte[].
    let trackers = TrackerRegistry::new();
    let byte_array = target.define_class("byte[]");
    trackers.register(byte_array, Arc::new(MockTracker::ready()));

    let (sink, filter_events) = ChannelSink::channel();
    let coordinator = FilterRunCoordinator::new(
        target.clone(),
        queue.clone(),
        Arc::new(sink),
        FilterConfig::default(),
    );

    // Graceful shutdown on Ctrl-C.
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let interval_floor = Duration::from_secs(args.interval);
    let mut tick: u64 = 0;

    info!("Starting census loop");
    while running.load(Ordering::SeqCst) {
        tick += 1;

        // The poll itself runs on the command queue at lowest priority, as
        // it would next to real debugger commands.
        let outcome = {
            let poller = poller.clone();
            run_on(queue.as_ref(), Priority::Lowest, move || poller.poll())
        };
        match outcome {
            Some(Ok(PollOutcome::Counted(_))) => log_census(&store, &trackers),
            Some(Ok(PollOutcome::NamesOnly(snapshot))) => {
                info!("names-only census: {} classes, no counts", snapshot.len());
            }
            Some(Err(e)) => error!("census poll failed: {} (will retry)", e),
            None => break,
        }

        if tick == 2 {
            run_filter_demo(&coordinator, &filter_events, byte_array, &args.expression);
        }

        if args.polls > 0 && tick >= args.polls {
            break;
        }

        churn_heap(&target, tick);

        // Back off by whatever the poller suggests, but never poll faster
        // than the configured floor.
        let delay = poller.suggested_delay().max(interval_floor);
        debug!("sleeping {}ms until next poll", delay.as_millis());
        let wake = std::time::Instant::now() + delay;
        while running.load(Ordering::SeqCst) && std::time::Instant::now() < wake {
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    info!("Shutting down");
    coordinator.cancel();
    queue.shutdown();
    info!("heaplotd stopped after {} polls", tick);
}
