//! audio-keepalive - keeps optical/HDMI audio outputs from dropping into
//! standby by playing a near-silent pulse train.
//!
//! Usage:
//!   keepalive                         run with the saved settings
//!   keepalive --mode interval --interval 10
//!   keepalive --simulate              no audio hardware, simulated device
//!   keepalive --wav signal.wav        render the signal and exit

mod app;

use anyhow::{Context, Result};
use app::KeepaliveApp;
use clap::Parser;
use ka_audio::OutputBackend;
use ka_master::{
    signal_to_wav, Controller, CpalBackend, IntervalMinutes, PlaybackMode, PulsePattern,
    SettingsStore, SimulatedBackend,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, io};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const MAX_WAV_SECONDS: i64 = 3600;

#[derive(Parser, Debug)]
#[command(name = "keepalive", version, about)]
struct Args {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override and save the playback mode (continuous or interval)
    #[arg(long)]
    mode: Option<PlaybackMode>,

    /// Override and save the pulse interval in minutes (5, 10, 15, 20, 25, 30)
    #[arg(long)]
    interval: Option<IntervalMinutes>,

    /// Use a simulated output device instead of the system default
    #[arg(long)]
    simulate: bool,

    /// Render the keepalive signal to a WAV file and exit
    #[arg(long, value_name = "PATH")]
    wav: Option<PathBuf>,

    /// Seconds of signal to render with --wav (at most one hour)
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(0..=MAX_WAV_SECONDS))]
    seconds: u32,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keepalive=info,ka_audio=info,ka_master=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args = Args::parse();

    if let Some(path) = &args.wav {
        return render_to_wav(path, args.seconds);
    }

    let store = match &args.config {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::default_location()?,
    };
    let mut settings = store
        .load()
        .with_context(|| format!("reading {}", store.path().display()))?;

    if args.mode.is_some() || args.interval.is_some() {
        if let Some(mode) = args.mode {
            settings.mode = mode;
        }
        if let Some(interval) = args.interval {
            settings.interval_minutes = interval;
        }
        store.save(&settings)?;
    }

    let backend: Box<dyn OutputBackend> = if args.simulate {
        Box::new(SimulatedBackend::clocked(Duration::from_secs(1)))
    } else {
        Box::new(CpalBackend::new())
    };

    info!(
        config = %store.path().display(),
        mode = %settings.mode,
        interval = settings.interval_minutes.get(),
        "audio-keepalive starting"
    );

    let mut app = KeepaliveApp::new(Controller::new(backend, settings), store);
    // A missing device is not fatal: the user can fix it and `start` again.
    if let Err(err) = app.execute(app::Command::Start) {
        error!("initial start failed: {:#}", err);
    }
    println!("{}", app.status());
    println!("Type 'help' for commands.");

    app.run(io::stdin().lock(), io::stdout())?;
    info!("audio-keepalive stopped");
    Ok(())
}

fn render_to_wav(path: &Path, seconds: u32) -> Result<()> {
    let pattern = PulsePattern::default();
    info!(path = %path.display(), seconds, "rendering keepalive signal");

    let wav = signal_to_wav(&pattern, seconds);
    fs::write(path, &wav).with_context(|| format!("writing {}", path.display()))?;

    println!("Rendered {} bytes to {}", wav.len(), path.display());
    Ok(())
}
