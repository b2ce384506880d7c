//! ABPGen - synthetic arterial blood-pressure generator
//!
//! Entry point for the console front-end.

use abpgen::device::daqmx::NiDaqmx;
use abpgen::device::probe::UsbProbe;
use abpgen::device::sim::{SimulatedDaq, SimulatedProbe};
use abpgen::device::{DaqBackend, DeviceProbe};
use abpgen::transducer::pressure_to_volts;
use abpgen::{AppConfig, DeviceSession, Event, EventBus, WaveformFileModel, WaveformSynthesizer};
use anyhow::{Context, Result};
use crossbeam_channel::{select, Receiver};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

/// One-shot action selected on the command line
enum Action {
    Run,
    Points,
    Import(PathBuf),
    InitSettings,
}

struct Options {
    settings: Option<PathBuf>,
    config: Option<PathBuf>,
    samples: Option<usize>,
    simulate: bool,
    action: Action,
}

/// Result of one console command
enum Flow {
    Continue,
    Quit,
}

fn main() -> Result<()> {
    let _log_guard = init_logging()?;

    let Some(options) = parse_args() else {
        return Ok(());
    };

    let config_path = options.config.clone().unwrap_or_else(AppConfig::path);
    let mut config = AppConfig::load_from(&config_path);
    if let Some(settings) = options.settings {
        config.settings_path = Some(settings);
    }
    if let Some(samples) = options.samples {
        config.sample_count = samples;
    }

    match options.action {
        Action::InitSettings => init_settings(&config, &config_path),
        Action::Points => print_points(&config),
        Action::Import(path) => summarize_import(&path),
        Action::Run => run_session(config, options.simulate),
    }
}

/// Console plus `abpgen.log`; the guard flushes the file writer on drop
fn init_logging() -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let file_appender = tracing_appender::rolling::never(".", "abpgen.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("abpgen=info".parse()?)
        .add_directive("abpgen_core=info".parse()?);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    Ok(guard)
}

/// `None` means the arguments were fully handled (help, version, error)
fn parse_args() -> Option<Options> {
    let args: Vec<String> = std::env::args().collect();
    let mut options = Options {
        settings: None,
        config: None,
        samples: None,
        simulate: false,
        action: Action::Run,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--version" | "-v" => {
                println!("abpgen {}", abpgen::VERSION);
                return None;
            }
            "--help" | "-h" => {
                print_help();
                return None;
            }
            "--simulate" => options.simulate = true,
            "--points" => options.action = Action::Points,
            "--init-settings" => options.action = Action::InitSettings,
            "--settings" | "-s" | "--config" | "-c" | "--samples" | "-n" | "--import" => {
                let flag = args[i].as_str();
                let Some(value) = args.get(i + 1) else {
                    eprintln!("Error: {} requires a value", flag);
                    return None;
                };
                match flag {
                    "--settings" | "-s" => options.settings = Some(PathBuf::from(value)),
                    "--config" | "-c" => options.config = Some(PathBuf::from(value)),
                    "--import" => options.action = Action::Import(PathBuf::from(value)),
                    _ => match value.parse::<usize>() {
                        Ok(n) if n > 0 => options.samples = Some(n),
                        _ => {
                            eprintln!("Error: Invalid sample count: {}", value);
                            return None;
                        }
                    },
                }
                i += 2;
                continue;
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                return None;
            }
        }
        i += 1;
    }

    Some(options)
}

fn print_help() {
    println!("Usage: abpgen [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -s, --settings PATH   Reference-point document (heartBeat.xml)");
    println!("  -c, --config PATH     Application config file");
    println!("  -n, --samples N       Samples per beat (default: 1000)");
    println!("      --simulate        Use a simulated NI-6216 instead of hardware");
    println!("      --points          Print reference points and their sample anchors");
    println!("      --import FILE     Validate a single-column pressure file");
    println!("      --init-settings   Write the bundled reference document if missing");
    println!("  -v, --version         Show version");
    println!("  -h, --help            Show this help");
    println!();
    println!("Without a one-shot option, runs the device session and reads");
    println!("commands from stdin (type 'help').");
}

fn print_commands(simulated: bool) {
    println!("Commands:");
    println!("  start                   Start waveform generation");
    println!("  stop                    Stop waveform generation");
    println!("  status                  Show device and waveform state");
    println!("  keys                    List reference points");
    println!("  set KEY PCT MMHG        Move a reference point (PCT = % of beat)");
    println!("  reset                   Reload reference points from the document");
    if simulated {
        println!("  plug | unplug           Attach or detach the simulated device");
    }
    println!("  quit                    Stop and exit");
}

fn init_settings(config: &AppConfig, config_path: &std::path::Path) -> Result<()> {
    let settings = config.settings_path();
    if settings.exists() {
        println!("Reference document already exists: {}", settings.display());
    } else {
        if let Some(parent) = settings.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&settings, abpgen::DEFAULT_REFERENCE_DOCUMENT)
            .with_context(|| format!("Failed to write {}", settings.display()))?;
        info!(path = %settings.display(), "Wrote default reference document");
        println!("Wrote {}", settings.display());
    }

    if !config_path.exists() {
        config.save(config_path)?;
        println!("Wrote {}", config_path.display());
    }
    Ok(())
}

fn load_synthesizer(config: &AppConfig, events: Arc<EventBus>) -> Result<WaveformSynthesizer> {
    WaveformSynthesizer::with_sample_count(config.reference_store(), config.sample_count, events)
        .with_context(|| {
            format!(
                "Failed to load reference points from {} (try --init-settings)",
                config.settings_path().display()
            )
        })
}

fn print_points(config: &AppConfig) -> Result<()> {
    let synth = load_synthesizer(config, Arc::new(EventBus::new()))?;
    let samples = synth.sample_count();

    println!(
        "Reference points ({} samples per beat, section '{}'):",
        samples,
        synth.store().section()
    );
    println!();
    println!("  {:<20} {:>8} {:>10} {:>8}", "name", "time", "mmHg", "index");
    for point in synth.reference_points().iter() {
        println!(
            "  {:<20} {:>8.3} {:>10.1} {:>8}",
            point.name,
            point.time_fraction,
            point.pressure,
            abpgen::waveform::synth::reference_sample_index(point.time_fraction, samples)
        );
    }

    if let Some((min, max)) = synth.waveform().pressure_range() {
        println!();
        println!(
            "Waveform: {:.1}-{:.1} mmHg ({:.4}-{:.4} V)",
            min,
            max,
            pressure_to_volts(min),
            pressure_to_volts(max)
        );
    }
    Ok(())
}

fn summarize_import(path: &std::path::Path) -> Result<()> {
    let mut model = WaveformFileModel::new(Arc::new(EventBus::new()));
    let count = model
        .import_path(path)
        .with_context(|| format!("Import of {} failed", path.display()))?;

    println!("Imported {} samples from {}", count, path.display());
    if let Some((min, max)) = model.waveform().pressure_range() {
        println!("Pressure range: {:.1}-{:.1} mmHg", min, max);
    }
    Ok(())
}

fn run_session(config: AppConfig, simulate: bool) -> Result<()> {
    println!("ABPGen v{} - NI-6216 ABP generator", abpgen::VERSION);
    println!();

    let events = Arc::new(EventBus::new());
    let (_event_sub, event_rx) = events.subscribe_channel();
    let mut synth = load_synthesizer(&config, Arc::clone(&events))?;

    let simulated_probe = simulate.then(|| Arc::new(SimulatedProbe::new(true)));
    let probe: Arc<dyn DeviceProbe>;
    let backend: Arc<dyn DaqBackend>;
    match &simulated_probe {
        Some(simulated) => {
            info!("Running with simulated NI-6216");
            probe = simulated.clone();
            backend = Arc::new(SimulatedDaq::new());
        }
        None => {
            if !NiDaqmx::is_available() {
                warn!("NI-DAQmx runtime not found; generation will fail until it is installed");
            }
            probe = Arc::new(UsbProbe::new());
            backend = Arc::new(NiDaqmx::new());
        }
    }

    let session = DeviceSession::spawn(
        config.device.clone(),
        probe,
        backend,
        synth.handle(),
        Arc::clone(&events),
    )
    .context("Failed to start device session")?;

    let (signal_tx, signal_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = signal_tx.try_send(());
    })
    .context("Failed to install Ctrl+C handler")?;

    let command_rx = spawn_stdin_reader()?;

    print_commands(simulated_probe.is_some());
    println!();

    loop {
        select! {
            recv(event_rx) -> event => {
                if let Ok(event) = event {
                    print_event(&event);
                }
            }
            recv(command_rx) -> line => match line {
                Ok(line) => {
                    let flow = handle_command(
                        line.trim(),
                        &session,
                        &mut synth,
                        simulated_probe.as_deref(),
                    );
                    if let Flow::Quit = flow {
                        break;
                    }
                }
                // stdin closed
                Err(_) => break,
            },
            recv(signal_rx) -> _ => {
                println!();
                println!("Interrupted.");
                break;
            }
        }
    }

    println!("Stopping...");
    session.shutdown();
    for event in event_rx.try_iter() {
        print_event(&event);
    }
    println!("Done.");
    Ok(())
}

fn spawn_stdin_reader() -> Result<Receiver<String>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    std::thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to read stdin");
                        break;
                    }
                }
            }
        })
        .context("Failed to spawn stdin reader")?;
    Ok(rx)
}

fn print_event(event: &Event) {
    let stamp = chrono::Local::now().format("%H:%M:%S");
    match event {
        Event::StatusMessage(text) => println!("[{}] {}", stamp, text),
        Event::ConnectionChanged(connected) => println!(
            "[{}] Device {}",
            stamp,
            if *connected { "connected" } else { "disconnected" }
        ),
        Event::GenerationStateChanged(generating) => println!(
            "[{}] Generation {}",
            stamp,
            if *generating { "ON" } else { "OFF" }
        ),
        Event::WaveformChanged => println!("[{}] Waveform re-synthesized", stamp),
        Event::ImportedWaveformChanged => println!("[{}] Imported waveform changed", stamp),
    }
}

fn handle_command(
    line: &str,
    session: &DeviceSession,
    synth: &mut WaveformSynthesizer,
    simulated_probe: Option<&SimulatedProbe>,
) -> Flow {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Flow::Continue;
    };

    match command {
        "start" => session.start_generation(),
        "stop" => session.stop_generation(),
        "status" => {
            println!(
                "Device: {} | Generating: {}",
                if session.is_connected() { "connected" } else { "not connected" },
                if session.is_generating() { "yes" } else { "no" }
            );
            if let Some((min, max)) = synth.waveform().pressure_range() {
                println!(
                    "Waveform: {} samples, {:.1}-{:.1} mmHg @ {} Hz",
                    synth.sample_count(),
                    min,
                    max,
                    session.config().sample_rate_hz
                );
            }
        }
        "keys" => {
            for point in synth.reference_points().iter() {
                println!(
                    "  {:<20} {:>6.1}% {:>7.1} mmHg",
                    point.name,
                    point.time_fraction * 100.0,
                    point.pressure
                );
            }
        }
        "set" => {
            let args: Vec<&str> = words.collect();
            let parsed = match args.as_slice() {
                [key, pct, mmhg] => pct
                    .parse::<f64>()
                    .ok()
                    .zip(mmhg.parse::<f64>().ok())
                    .map(|(pct, mmhg)| (*key, pct, mmhg)),
                _ => None,
            };
            match parsed {
                Some((key, pct, mmhg)) => {
                    if let Err(e) = synth.update_reference_point(key, pct / 100.0, mmhg) {
                        println!("Error: {}", e);
                    }
                }
                None => println!("Usage: set KEY PCT MMHG"),
            }
        }
        "reset" => {
            if let Err(e) = synth.reset_to_defaults() {
                error!(error = %e, "Failed to reload reference points");
                println!("Error: {}", e);
            }
        }
        "plug" | "unplug" => match simulated_probe {
            Some(probe) => probe.set_present(command == "plug"),
            None => println!("Only available with --simulate"),
        },
        "help" | "?" => print_commands(simulated_probe.is_some()),
        "quit" | "exit" | "q" => return Flow::Quit,
        other => println!("Unknown command: {} (type 'help')", other),
    }
    Flow::Continue
}
