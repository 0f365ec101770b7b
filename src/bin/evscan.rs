// Evscan CLI
// List, describe and stream evdev input devices

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};

use evscan_core::handle::AccessMode;
use evscan_core::{list_input_devices, InputDevice, KeyRepeat, Settings};

/// Inspect Linux evdev input devices
#[derive(Parser, Debug)]
#[command(name = "evscan")]
#[command(version)]
#[command(about = "Inspect Linux evdev input devices", long_about = None)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["list", "describe", "stream", "repeat"])
))]
struct Args {
    /// Describe every device matched by the glob
    #[arg(short, long)]
    list: bool,

    /// Describe one device, including every supported code
    #[arg(short, long, value_name = "PATH")]
    describe: Option<PathBuf>,

    /// Print events from a device until interrupted
    #[arg(short, long, value_name = "PATH")]
    stream: Option<PathBuf>,

    /// Print the key repeat settings of a device
    #[arg(short, long, value_name = "PATH")]
    repeat: Option<PathBuf>,

    /// Change the key repeat settings (repeats per second, delay in ms)
    #[arg(long, value_name = "RATE,DELAY", value_parser = parse_repeat, requires = "repeat")]
    set_repeat: Option<KeyRepeat>,

    /// Device glob used by --list
    #[arg(short, long, value_name = "GLOB")]
    glob: Option<String>,

    /// Settings file (default: ~/.config/evscan/settings.toml)
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Grab the device while streaming
    #[arg(long)]
    grab: bool,

    /// Read one event at a time while streaming
    #[arg(long)]
    one: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_repeat(value: &str) -> Result<KeyRepeat, String> {
    let (rate, delay) = value
        .split_once(',')
        .ok_or_else(|| format!("expected RATE,DELAY, got {value:?}"))?;
    let rate: u32 = rate
        .trim()
        .parse()
        .map_err(|e| format!("invalid rate {rate:?}: {e}"))?;
    let delay: u32 = delay
        .trim()
        .parse()
        .map_err(|e| format!("invalid delay {delay:?}: {e}"))?;
    Ok(KeyRepeat::from_rate(rate, delay))
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

/// Settings file values with command-line flags applied on top.
fn load_settings(args: &Args) -> Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("load settings from {}", path.display()))?,
        None => Settings::load_default().context("load default settings")?,
    };

    if let Some(glob) = &args.glob {
        settings.glob = glob.clone();
    }
    settings.grab |= args.grab;
    settings.single |= args.one;

    if let Some(path) = settings.source_path() {
        log::debug!("settings loaded from {}", path.display());
    }
    Ok(settings)
}

fn list(settings: &Settings) -> Result<()> {
    let devices = list_input_devices(Some(&settings.glob))
        .with_context(|| format!("enumerate {}", settings.glob))?;

    if devices.is_empty() {
        println!("No readable input devices match {}", settings.glob);
        return Ok(());
    }

    for (i, device) in devices.iter().enumerate() {
        if i > 0 {
            println!();
        }
        println!("{device}");
    }
    Ok(())
}

fn describe(path: &Path) -> Result<()> {
    let device = InputDevice::open(path)?;

    println!("{device}");
    println!("  evdev {}", device.identity().evdev_version);
    for (ty, codes) in device.capabilities().iter() {
        println!("  {ty}");
        for code in codes {
            println!("    {code}");
        }
    }
    Ok(())
}

fn repeat(path: &Path, new: Option<KeyRepeat>) -> Result<()> {
    let mode = if new.is_some() {
        AccessMode::ReadWrite
    } else {
        AccessMode::ReadOnly
    };
    let device = InputDevice::open_with(path, mode)?;

    if let Some(new) = new {
        device.set_repeat_rate(new)?;
        log::info!(
            "{}: repeat delay set to {} ms, period {} ms",
            path.display(),
            new.delay_ms,
            new.period_ms
        );
    }

    let current = device.repeat_rate()?;
    println!(
        "{}: {:.1} repeats/s after {} ms (period {} ms)",
        path.display(),
        current.rate(),
        current.delay_ms,
        current.period_ms
    );
    Ok(())
}

/// Stop `running` on SIGINT or SIGTERM.
fn spawn_signal_thread(running: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("install signal handler")?;
    std::thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            log::info!("received signal {signal}, shutting down");
            running.store(false, Ordering::SeqCst);
        }
    });
    Ok(())
}

fn stream(path: &Path, settings: &Settings) -> Result<()> {
    let device = InputDevice::open(path)?;
    log::info!("streaming {} ({})", path.display(), device.name());

    let running = Arc::new(AtomicBool::new(true));
    spawn_signal_thread(running.clone())?;

    if settings.grab {
        device.grab()?;
        log::info!("{}: grabbed", path.display());
    }

    let result = stream_events(&device, settings, &running);

    if settings.grab {
        match device.release() {
            Ok(()) => log::info!("{}: released", path.display()),
            Err(e) => log::warn!("{}: {}", path.display(), e),
        }
    }
    result
}

fn stream_events(device: &InputDevice, settings: &Settings, running: &AtomicBool) -> Result<()> {
    let timeout = settings.poll_timeout();

    while running.load(Ordering::SeqCst) {
        let ready = device
            .handle()
            .wait_readable(Some(timeout))
            .context("wait for input")?;
        if !ready {
            continue;
        }

        if settings.single {
            println!("{}", device.read_one()?);
        } else {
            for event in device.read()? {
                println!("{event}");
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let settings = load_settings(&args)?;

    if args.list {
        return list(&settings);
    }
    if let Some(path) = &args.describe {
        return describe(path);
    }
    if let Some(path) = &args.stream {
        return stream(path, &settings);
    }
    if let Some(path) = &args.repeat {
        return repeat(path, args.set_repeat);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_list() {
        let args = Args::parse_from(["evscan", "--list", "--glob", "/dev/input/by-id/*"]);

        assert!(args.list);
        assert_eq!(args.glob.as_deref(), Some("/dev/input/by-id/*"));
        assert!(args.describe.is_none());
        assert!(!args.verbose);
    }

    #[test]
    fn test_args_stream_options() {
        let args = Args::parse_from([
            "evscan",
            "--stream",
            "/dev/input/event3",
            "--grab",
            "--one",
            "--verbose",
        ]);

        assert_eq!(args.stream, Some(PathBuf::from("/dev/input/event3")));
        assert!(args.grab);
        assert!(args.one);
        assert!(args.verbose);
    }

    #[test]
    fn test_args_require_one_mode() {
        assert!(Args::try_parse_from(["evscan"]).is_err());
        assert!(Args::try_parse_from(["evscan", "--list", "--describe", "/dev/input/event0"]).is_err());
    }

    #[test]
    fn test_args_set_repeat() {
        let args = Args::parse_from([
            "evscan",
            "--repeat",
            "/dev/input/event0",
            "--set-repeat",
            "25,300",
        ]);
        assert_eq!(
            args.set_repeat,
            Some(KeyRepeat {
                delay_ms: 300,
                period_ms: 40
            })
        );

        assert!(Args::try_parse_from(["evscan", "--list", "--set-repeat", "25,300"]).is_err());
    }

    #[test]
    fn test_parse_repeat_errors() {
        assert!(parse_repeat("25").is_err());
        assert!(parse_repeat("fast,300").is_err());
        assert!(parse_repeat("25,-1").is_err());
        assert_eq!(
            parse_repeat(" 30 , 250 "),
            Ok(KeyRepeat {
                delay_ms: 250,
                period_ms: 33
            })
        );
    }

    #[test]
    fn test_flags_override_settings_file() {
        let path = std::env::temp_dir().join(format!("evscan-cli-{}.toml", std::process::id()));
        std::fs::write(&path, "[devices]\nglob = \"/dev/input/event1*\"\n").unwrap();

        let args = Args::parse_from([
            "evscan",
            "--list",
            "--config",
            path.to_str().unwrap(),
            "--grab",
        ]);
        let settings = load_settings(&args).unwrap();
        assert_eq!(settings.glob, "/dev/input/event1*");
        assert!(settings.grab);

        let args = Args::parse_from([
            "evscan",
            "--list",
            "--config",
            path.to_str().unwrap(),
            "--glob",
            "/dev/input/event0",
        ]);
        assert_eq!(load_settings(&args).unwrap().glob, "/dev/input/event0");

        std::fs::remove_file(&path).unwrap();
    }
}
