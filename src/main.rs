//! spectra-rs - Real-time audio spectrum analyzer
//!
//! Analyzes a live input device or an audio file and prints dominant
//! frequency reports as spectra are produced.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;

use spectra_rs::audio::{list_input_devices, SourceSpec, SourceState};
use spectra_rs::config::{AnalyzerConfig, ChannelMode};
use spectra_rs::pipeline::Pipeline;
use spectra_rs::{Pacing, WindowKind};

/// Report every 16th spectrum, a few lines per second at the default hop
/// rate.
const REPORT_EVERY: u64 = 16;

#[derive(Parser)]
#[command(name = "spectra-rs", version, about = "Real-time audio spectrum analyzer")]
struct Cli {
    /// Audio file to analyze (captures from an input device when omitted)
    file: Option<PathBuf>,

    /// List available input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Select the input device by name
    #[arg(short, long)]
    device: Option<String>,

    /// Requested sample rate in Hz
    #[arg(long)]
    sample_rate: Option<u32>,

    /// FFT frame size in samples (power of two)
    #[arg(long)]
    frame_size: Option<usize>,

    /// Hop between consecutive frames in samples
    #[arg(long)]
    hop_size: Option<usize>,

    /// Analysis window
    #[arg(long, value_enum)]
    window: Option<WindowArg>,

    /// Analyze a single channel instead of mixing all channels down
    #[arg(long)]
    channel: Option<usize>,

    /// Capture duration in seconds for live input
    #[arg(short = 't', long, default_value_t = 5)]
    duration: u64,

    /// Decode files as fast as possible instead of at the source rate
    #[arg(long)]
    fast: bool,

    /// Persist the effective configuration for future runs
    #[arg(long)]
    save_config: bool,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum WindowArg {
    Hann,
    Hamming,
    Rectangular,
}

impl From<WindowArg> for WindowKind {
    fn from(arg: WindowArg) -> Self {
        match arg {
            WindowArg::Hann => WindowKind::Hann,
            WindowArg::Hamming => WindowKind::Hamming,
            WindowArg::Rectangular => WindowKind::Rectangular,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    if cli.list_devices {
        let devices = list_input_devices()?;
        if devices.is_empty() {
            println!("No input devices found");
        }
        for name in devices {
            println!("{}", name);
        }
        return Ok(());
    }

    // Persisted config first, command line flags on top
    let mut config = AnalyzerConfig::load();
    if let Some(rate) = cli.sample_rate {
        config.sample_rate = rate;
    }
    if let Some(frame) = cli.frame_size {
        config.frame_size = frame;
    }
    if let Some(hop) = cli.hop_size {
        config.hop_size = hop;
    }
    if let Some(window) = cli.window {
        config.window = window.into();
    }
    if let Some(channel) = cli.channel {
        config.channels = ChannelMode::Index(channel);
    }
    if cli.fast {
        config.pacing = Pacing::Fast;
    }
    config.validate()?;
    if cli.save_config {
        config.save();
    }

    let source = match &cli.file {
        Some(path) => SourceSpec::File { path: path.clone() },
        None => SourceSpec::Live {
            device: cli.device.clone(),
        },
    };

    let mut pipeline = Pipeline::new(config, source)?;
    let mut count: u64 = 0;
    pipeline.on_spectrum(move |spectrum| {
        count += 1;
        if count % REPORT_EVERY == 1 {
            let t = spectrum.start_sample() as f64 / spectrum.sample_rate() as f64;
            let bin = spectrum.dominant_bin();
            println!(
                "t={:7.3}s  peak {:8.1} Hz (bin {:4})  |X| {:.3}",
                t,
                spectrum.bin_frequency(bin),
                bin,
                spectrum.magnitude(bin)
            );
        }
    });

    pipeline.start()?;

    match cli.file {
        Some(_) => {
            // Run until the whole file has been analyzed
            while !pipeline.is_finished() {
                if pipeline.source_state() == Some(SourceState::Failed) {
                    break;
                }
                thread::sleep(Duration::from_millis(50));
            }
        }
        None => {
            let deadline = Instant::now() + Duration::from_secs(cli.duration);
            while Instant::now() < deadline {
                if pipeline.source_state() == Some(SourceState::Failed) {
                    break;
                }
                thread::sleep(Duration::from_millis(50));
            }
        }
    }

    let failed = pipeline.source_state() == Some(SourceState::Failed);
    pipeline.stop()?;

    let diag = pipeline.diagnostics();
    println!(
        "{} spectra from {} samples (overflows: {}, underflows: {})",
        diag.spectra_emitted, diag.samples_read, diag.overflows, diag.underflows
    );

    if failed {
        return Err("source failed during capture".into());
    }
    Ok(())
}
