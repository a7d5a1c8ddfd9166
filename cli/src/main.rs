use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;

use fmgateway_core::{Config, Gateway};

#[cfg(unix)]
const DEFAULT_INI_FILE: &str = "/etc/FMGateway.ini";
#[cfg(not(unix))]
const DEFAULT_INI_FILE: &str = "FMGateway.ini";

#[derive(Parser)]
#[command(name = "fmgateway", version, disable_version_flag = true)]
#[command(about = "FM repeater gateway to USRP, RAW PCM and IAX2 networks")]
struct Cli {
    /// Print version information and exit
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: (),

    /// Path to the INI configuration file
    #[arg(value_name = "FILE")]
    config: Option<PathBuf>,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            use clap::error::ErrorKind;
            let _ = e.print();
            match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => process::exit(0),
                _ => process::exit(1),
            }
        }
    };

    let path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_INI_FILE));

    process::exit(run_loop(&path));
}

/// Read the configuration and run the gateway, rebuilding the whole
/// pipeline whenever SIGHUP asks for a reload.
fn run_loop(path: &Path) -> i32 {
    if let Err(e) = signals::install() {
        eprintln!("FMGateway: cannot install signal handlers: {e}");
        return -1;
    }

    let mut logging_started = false;
    #[cfg(unix)]
    let mut daemonised = false;

    loop {
        signals::reset();

        let config = match Config::read(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("FMGateway: {e}");
                return 1;
            }
        };

        #[cfg(unix)]
        if config.daemon && !daemonised {
            if let Err(e) = daemonise() {
                eprintln!("FMGateway: cannot daemonise: {e}");
                return -1;
            }
            daemonised = true;
        }

        if !logging_started {
            init_logging(config.log_display_level);
            logging_started = true;
        }

        let mut gateway = Gateway::new(config);
        if let Err(e) = gateway.run(signals::flag()) {
            error!("{}", e);
            return -1;
        }

        match signals::last() {
            signals::SIGHUP => {
                info!(
                    "FMGateway-{} restarted on receipt of SIGHUP",
                    env!("CARGO_PKG_VERSION")
                );
            }
            signals::SIGINT => {
                info!(
                    "FMGateway-{} exited on receipt of SIGINT",
                    env!("CARGO_PKG_VERSION")
                );
                return 0;
            }
            signals::SIGTERM => {
                info!(
                    "FMGateway-{} exited on receipt of SIGTERM",
                    env!("CARGO_PKG_VERSION")
                );
                return 0;
            }
            _ => return 0,
        }
    }
}

fn init_logging(display_level: u32) {
    let max_level = match display_level {
        0 => LevelFilter::OFF,
        1 => LevelFilter::DEBUG,
        2 => LevelFilter::INFO,
        3 => LevelFilter::WARN,
        _ => LevelFilter::ERROR,
    };

    tracing_subscriber::fmt()
        .with_max_level(max_level)
        .with_target(false)
        .init();
}

#[cfg(unix)]
fn daemonise() -> std::io::Result<()> {
    use nix::unistd::{chdir, fork, setsid, ForkResult};

    match unsafe { fork() }.map_err(errno_to_io)? {
        ForkResult::Parent { .. } => process::exit(0),
        ForkResult::Child => {}
    }

    setsid().map_err(errno_to_io)?;
    chdir("/").map_err(errno_to_io)?;

    Ok(())
}

#[cfg(unix)]
fn errno_to_io(e: nix::errno::Errno) -> std::io::Error {
    std::io::Error::from_raw_os_error(e as i32)
}

#[cfg(unix)]
mod signals {
    use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

    pub const SIGHUP: i32 = nix::libc::SIGHUP;
    pub const SIGINT: i32 = nix::libc::SIGINT;
    pub const SIGTERM: i32 = nix::libc::SIGTERM;

    static KILLED: AtomicBool = AtomicBool::new(false);
    static SIGNUM: AtomicI32 = AtomicI32::new(0);

    extern "C" fn on_signal(signum: nix::libc::c_int) {
        KILLED.store(true, Ordering::SeqCst);
        SIGNUM.store(signum, Ordering::SeqCst);
    }

    pub fn install() -> std::io::Result<()> {
        use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

        let action = SigAction::new(
            SigHandler::Handler(on_signal),
            SaFlags::empty(),
            SigSet::empty(),
        );

        unsafe {
            for signal in [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP] {
                sigaction(signal, &action)
                    .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
            }
        }

        Ok(())
    }

    pub fn flag() -> &'static AtomicBool {
        &KILLED
    }

    pub fn reset() {
        KILLED.store(false, Ordering::SeqCst);
        SIGNUM.store(0, Ordering::SeqCst);
    }

    pub fn last() -> i32 {
        SIGNUM.load(Ordering::SeqCst)
    }
}

#[cfg(not(unix))]
mod signals {
    use std::sync::atomic::AtomicBool;

    pub const SIGHUP: i32 = 1;
    pub const SIGINT: i32 = 2;
    pub const SIGTERM: i32 = 15;

    static KILLED: AtomicBool = AtomicBool::new(false);

    pub fn install() -> std::io::Result<()> {
        Ok(())
    }

    pub fn flag() -> &'static AtomicBool {
        &KILLED
    }

    pub fn reset() {}

    pub fn last() -> i32 {
        0
    }
}
