use dzrp_debugger::DEFAULT_PORT;
use dzrp_protocol::DEFAULT_MAX_FRAME_LEN;
use log::LevelFilter;

const HELP: &str = "\
next-dzrp - DeZog remote debugging server for the ZX Spectrum Next

Serves one DeZog client over TCP against an in-memory Next machine.

USAGE:
  next-dzrp [OPTIONS]

OPTIONS:
  -h, --help            Prints help information
  -p, --port <port>     TCP port to listen on (default: 11000)
  --max-frame <bytes>   Largest accepted DZRP frame (default: 65552)
  --tick-ms <ms>        Interval between run/stop checks (default: 20)
  -v, --verbose         Show connection and command events
  -vv, --trace          Show every command and breakpoint change
  -vvv, --trace-bytes   Show raw protocol bytes (very verbose)
  --log <file>          Write log output to file instead of stderr
";

/// Default interval between host ticks
pub const DEFAULT_TICK_MS: u64 = 20;

/// Verbosity level for log output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    /// Warnings and errors only
    #[default]
    Quiet = 0,
    /// Connection events
    Verbose = 1,
    /// Every command
    Trace = 2,
    /// Raw bytes on the wire
    TraceBytes = 3,
}

impl Verbosity {
    pub fn level_filter(self) -> LevelFilter {
        match self {
            Verbosity::Quiet => LevelFilter::Warn,
            Verbosity::Verbose => LevelFilter::Info,
            Verbosity::Trace => LevelFilter::Debug,
            Verbosity::TraceBytes => LevelFilter::Trace,
        }
    }
}

#[derive(Debug)]
pub struct AppArgs {
    pub port: u16,
    pub max_frame_len: usize,
    pub tick_ms: u64,
    pub verbosity: Verbosity,
    pub log_file: Option<String>,
}

pub fn parse_args() -> Result<AppArgs, pico_args::Error> {
    let mut pargs = pico_args::Arguments::from_env();

    if pargs.contains(["-h", "--help"]) {
        print!("{}", HELP);
        std::process::exit(0);
    }

    // Count -v flags for verbosity level
    let verbosity = if pargs.contains("--trace-bytes") || pargs.contains("-vvv") {
        Verbosity::TraceBytes
    } else if pargs.contains("--trace") || pargs.contains("-vv") {
        Verbosity::Trace
    } else if pargs.contains(["-v", "--verbose"]) {
        Verbosity::Verbose
    } else {
        Verbosity::Quiet
    };

    let args = AppArgs {
        port: pargs
            .opt_value_from_str(["-p", "--port"])?
            .unwrap_or(DEFAULT_PORT),
        max_frame_len: pargs
            .opt_value_from_str("--max-frame")?
            .unwrap_or(DEFAULT_MAX_FRAME_LEN),
        tick_ms: pargs
            .opt_value_from_str("--tick-ms")?
            .unwrap_or(DEFAULT_TICK_MS),
        verbosity,
        log_file: pargs.opt_value_from_str("--log")?,
    };

    let remaining = pargs.finish();
    if !remaining.is_empty() {
        eprintln!("Warning: unused arguments left: {:?}.", remaining);
    }

    Ok(args)
}
