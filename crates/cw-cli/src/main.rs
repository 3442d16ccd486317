//! ClearWave command-line control surface
//!
//! Usage:
//!   clearwave devices                     - List output devices
//!   clearwave info <index>                - Show one output device
//!   clearwave run --output <index>        - Denoise system audio into that device

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::thread;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use cw_audio::{
    CpalDirectory, EndpointDirectory, EndpointInfo, SessionConfig, StreamController,
    output_endpoints, resolve_input,
};

#[derive(Parser)]
#[command(name = "clearwave", about = "Real-time spectral noise gate for system audio")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List output devices and the detected virtual input
    Devices,
    /// Show one output device
    Info {
        /// Device index from `devices`
        index: usize,
    },
    /// Start denoising
    Run {
        /// Output device index (speakers/headphones)
        #[arg(short, long)]
        output: usize,
        /// Noise reduction strength, 0-100
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=100))]
        strength: Option<u8>,
        /// Session config (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Frames per processed block
        #[arg(long)]
        block_size: Option<usize>,
        /// Stream sample rate in Hz
        #[arg(long)]
        sample_rate: Option<u32>,
    },
}

const INSTRUCTIONS: &str = "\
1. Install BlackHole or Soundflower
2. Set system audio output to BlackHole/Soundflower
3. Run with your speakers/headphones as --output
4. Type 0-100 to adjust noise reduction strength
5. Type `stop` / `start` to toggle, `status` for counters, `q` to quit";

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    log::debug!("Starting ClearWave {}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Devices => list_devices(),
        Commands::Info { index } => show_device(index),
        Commands::Run {
            output,
            strength,
            config,
            block_size,
            sample_rate,
        } => run(output, strength, config, block_size, sample_rate),
    }
}

fn list_devices() -> Result<()> {
    let directory = CpalDirectory::new();
    let endpoints = directory
        .endpoints()
        .context("Failed to enumerate audio devices")?;

    println!("Audio host: {}", cw_audio::host_name());
    println!();
    println!("Output devices:");
    for endpoint in output_endpoints(&endpoints) {
        println!(
            "  [{}] {}{} ({} ch, {})",
            endpoint.index,
            endpoint.name,
            if endpoint.is_default_output { " (default)" } else { "" },
            endpoint.max_output_channels,
            format_rate(&endpoint)
        );
    }

    println!();
    let patterns = SessionConfig::default().input_name_patterns;
    match resolve_input(&endpoints, patterns.as_slice()) {
        Ok(input) => println!(
            "Virtual input: [{}] {} ({} ch)",
            input.index, input.name, input.max_input_channels
        ),
        Err(e) => println!("Virtual input: none ({})", e),
    }

    Ok(())
}

fn show_device(index: usize) -> Result<()> {
    let endpoints = CpalDirectory::new()
        .endpoints()
        .context("Failed to enumerate audio devices")?;

    let Some(endpoint) = endpoints.iter().find(|e| e.index == index) else {
        bail!("No device with index {}", index);
    };

    println!("Selected Output: {}", endpoint.name);
    println!("Channels: {}", endpoint.max_output_channels);
    println!("Sample Rate: {}", format_rate(endpoint));
    if !endpoint.has_output() {
        println!("(this device has no output channels)");
    }

    Ok(())
}

fn run(
    output: usize,
    strength: Option<u8>,
    config_path: Option<PathBuf>,
    block_size: Option<usize>,
    sample_rate: Option<u32>,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => SessionConfig::from_json_file(&path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if let Some(block_size) = block_size {
        config.block_size = block_size;
    }
    if let Some(sample_rate) = sample_rate {
        config.sample_rate = sample_rate;
    }

    let controller = StreamController::with_cpal(config).context("Invalid session config")?;
    controller.set_output_endpoint(Some(output));
    if let Some(strength) = strength {
        controller.set_strength_percent(f32::from(strength));
    }

    println!("{}", INSTRUCTIONS);
    println!();

    // Failures arrive from the stream thread at any time
    let failures = controller.failures();
    thread::Builder::new()
        .name("cw-failures".into())
        .spawn(move || {
            for message in failures.iter() {
                eprintln!("Error: {}", message);
            }
        })
        .context("Failed to spawn failure reporter")?;

    controller
        .start()
        .context("Failed to start audio processing")?;
    println!(
        "Audio processing started (strength {:.0})",
        controller.strength() * 100.0
    );

    let stdin = io::stdin();
    prompt()?;
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read stdin")?;
        let command = line.trim();

        match command {
            "" => {}
            "q" | "quit" | "exit" => break,
            "stop" => {
                controller.stop()?;
                println!("Stopped");
            }
            "start" => match controller.start() {
                Ok(()) => println!("Started"),
                Err(e) => println!("Start failed: {} (type `stop` to reset)", e),
            },
            "status" => print_status(&controller),
            other => match other.parse::<f32>() {
                Ok(value) if (0.0..=100.0).contains(&value) => {
                    controller.set_strength_percent(value);
                    println!("Noise reduction strength: {:.0}", controller.strength() * 100.0);
                }
                _ => println!("Expected 0-100, start, stop, status or q"),
            },
        }
        prompt()?;
    }

    controller.stop()?;
    println!("Audio processing stopped");
    Ok(())
}

fn print_status(controller: &StreamController) {
    println!("State: {:?}", controller.state());
    println!("Strength: {:.0}", controller.strength() * 100.0);
    if let Some(session) = controller.session() {
        println!(
            "Session: {} -> {}, {} ch @ {} Hz, block {}",
            session.input, session.output, session.channels, session.sample_rate, session.block_size
        );
    }
    if let Some(error) = controller.last_error() {
        println!("Last error: {}", error);
    }
    let stats = controller.stats();
    println!(
        "Blocks: {} processed, {} passed through, {} underruns",
        stats.blocks_processed, stats.blocks_bypassed, stats.underruns
    );
}

fn prompt() -> Result<()> {
    print!("> ");
    io::stdout().flush().context("Failed to flush stdout")
}

fn format_rate(endpoint: &EndpointInfo) -> String {
    endpoint
        .default_sample_rate
        .map(|rate| format!("{} Hz", rate))
        .unwrap_or_else(|| "unknown rate".to_string())
}
