//! Stemdesk - loop a set of stems in lockstep from the terminal
//!
//! Loads the configured stems, starts each one looping against a shared
//! timeline and then reads commands from stdin until `quit`, EOF or Ctrl-C.
//!
//! ## Command line
//!
//! - `--config <path>`: config file (default `~/.config/stemdesk/config.yaml`)
//! - `--headless`: run without an output device
//! - `--list-devices`: print the available output devices, flagging those
//!   that cannot run at the configured sample rate, and exit
//! - `--write-config`: save the effective config (with any stem overrides)
//!   to the config path and exit
//! - `name=path ...`: stems to load instead of the configured list

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use crossbeam::channel::{bounded, unbounded, Receiver};

use stemdesk_core::audio::{
    get_default_device, get_output_devices, AudioBackend, AudioDevice, CpalBackend,
    MemoryBackend,
};
use stemdesk_core::config::{
    default_config_path, load_config, save_config, DeskConfig, StemEntry,
};
use stemdesk_core::engine::{Desk, DeskCommand, COMMAND_HELP};

const USAGE: &str =
    "Usage: stemdesk [--config <path>] [--headless] [--list-devices] [--write-config]\n                [name=path ...]";

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    headless: bool,
    list_devices: bool,
    write_config: bool,
    stems: Vec<StemEntry>,
    help: bool,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut parsed = Args::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().context("--config needs a path")?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--headless" => parsed.headless = true,
            "--list-devices" => parsed.list_devices = true,
            "--write-config" => parsed.write_config = true,
            "-h" | "--help" => parsed.help = true,
            other if other.starts_with("--") => bail!("Unknown flag '{}'\n{}", other, USAGE),
            other => match StemEntry::parse_override(other) {
                Some(stem) => parsed.stems.push(stem),
                None => bail!("Expected name=path, got '{}'\n{}", other, USAGE),
            },
        }
    }
    Ok(parsed)
}

fn device_line(device: &AudioDevice, sample_rate: u32) -> String {
    if device.supports_rate(sample_rate) {
        format!("  {}", device)
    } else {
        format!("  {} (no {} Hz)", device, sample_rate)
    }
}

fn list_devices(sample_rate: u32) -> Result<()> {
    let devices = get_output_devices().context("Failed to enumerate audio devices")?;
    println!("Output devices for {} Hz:", sample_rate);
    for device in &devices {
        println!("{}", device_line(device, sample_rate));
    }
    match get_default_device() {
        Ok(device) => println!("Default: {}", device.id.display_label()),
        Err(e) => println!("No default device: {}", e),
    }
    Ok(())
}

fn start_backend(config: &DeskConfig, headless: bool) -> Arc<dyn AudioBackend> {
    let fallback = || {
        Arc::new(MemoryBackend::new(
            config.audio.target_sample_rate(),
            config.audio.channel_count,
        ))
    };

    if headless {
        log::info!("Headless mode requested, no audio output");
        return fallback();
    }

    match CpalBackend::start(&config.audio) {
        Ok(backend) => {
            println!(
                "Audio output started ({} Hz, {} frames, {:.1} ms)",
                backend.sample_rate(),
                backend.buffer_size(),
                backend.latency_ms()
            );
            Arc::new(backend)
        }
        Err(e) => {
            log::warn!("Could not start audio output: {}", e);
            eprintln!("Warning: Could not start audio output: {}", e);
            eprintln!("Running headless (no audio output)");
            fallback()
        }
    }
}

/// Forward stdin lines; the channel disconnects on EOF or read error
fn spawn_stdin_reader() -> Result<Receiver<String>> {
    let (tx, rx) = unbounded();
    std::thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        log::warn!("Failed to read command: {}", e);
                        break;
                    }
                }
            }
        })
        .context("Failed to spawn stdin reader")?;
    Ok(rx)
}

/// Dispatch commands until quit, EOF or interrupt
fn command_loop(desk: &Desk, lines: Receiver<String>, interrupt: Receiver<()>) {
    loop {
        crossbeam::select! {
            recv(lines) -> line => {
                let Ok(line) = line else {
                    log::info!("End of input");
                    return;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<DeskCommand>() {
                    Ok(command) => {
                        let outcome = desk.dispatch(command);
                        println!("{}", outcome);
                        if outcome.is_quit() {
                            return;
                        }
                    }
                    Err(e) => {
                        println!("{}", e);
                        println!("{}", COMMAND_HELP);
                    }
                }
            }
            recv(interrupt) -> _ => {
                println!();
                log::info!("Interrupted");
                return;
            }
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    if args.help {
        println!("{}", USAGE);
        println!("{}", COMMAND_HELP);
        return Ok(());
    }

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let mut config: DeskConfig = load_config(&config_path);
    if args.list_devices {
        return list_devices(config.audio.target_sample_rate());
    }

    log::info!("stemdesk starting up");
    if !args.stems.is_empty() {
        log::info!("Using {} stems from the command line", args.stems.len());
        config.stems = args.stems;
    }
    if args.write_config {
        save_config(&config, &config_path)?;
        println!("Wrote {}", config_path.display());
        return Ok(());
    }

    let (interrupt_tx, interrupt_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.try_send(());
    })
    .context("Failed to install Ctrl-C handler")?;

    let backend = start_backend(&config, args.headless);
    let desk = Desk::with_options(backend, config.desk_options());

    for (name, path) in config.stem_paths() {
        match desk.add_instrument(&name, &path) {
            Ok(channel) => println!("Added '{}' on channel {} ({})", name, channel, path.display()),
            Err(e) => {
                log::error!("{}", e);
                eprintln!("Skipping '{}': {}", name, e);
            }
        }
    }
    if desk.is_empty() {
        eprintln!("Warning: no stems loaded");
    }

    println!();
    println!("{}", COMMAND_HELP);

    match spawn_stdin_reader() {
        Ok(lines) => command_loop(&desk, lines, interrupt_rx),
        Err(e) => log::error!("{:#}", e),
    }

    let stopped = desk.stop_all();
    println!("Stopped {} instruments", stopped);
    Ok(())
}
