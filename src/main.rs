use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use crossbeam::channel::Receiver;
use parking_lot::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use patchbridge::cli::{self, Command};
use patchbridge::osc::{OUTBOX_CAPACITY, OscOutbox, OscSender};
use patchbridge::{
    Bridge, BridgeUpdate, LogSink, MidiInputPump, MidiSink, MidirSink, Result, Settings, device,
};

#[derive(Debug, Parser)]
#[command(name = "patchbridge", version, about = "MIDI <-> OSC bridge and tempo-scaled MIDI file player")]
struct Args {
    /// Settings file, created on first successful start.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Log filter such as `info` or `patchbridge=debug`. RUST_LOG wins when set.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Override the inbound OSC port from the settings file.
    #[arg(long)]
    port: Option<u16>,

    /// Track files or folders to load before reading commands.
    tracks: Vec<PathBuf>,

    /// Print the MIDI ports and exit.
    #[arg(long)]
    list_devices: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "patchbridge stopped");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    if args.list_devices {
        println!("MIDI inputs:");
        for name in device::input_ports() {
            println!("  {name}");
        }
        println!("MIDI outputs:");
        for name in device::output_ports() {
            println!("  {name}");
        }
        return Ok(());
    }

    let mut settings = Settings::load(&args.config)?;
    if let Some(port) = args.port {
        settings.osc_in_port = port;
    }
    settings.validate()?;

    let midi_out: Arc<dyn MidiSink> = match settings.midi_output.as_deref() {
        Some(name) => match MidirSink::connect(name) {
            Ok(sink) => Arc::new(sink),
            Err(e) => {
                warn!(error = %e, "MIDI output unavailable, events will only be logged");
                Arc::new(LogSink)
            }
        },
        None => Arc::new(LogSink),
    };

    let (outbox, outbox_rx) = OscOutbox::bounded(OUTBOX_CAPACITY);
    let sender = OscSender::spawn(&settings.osc_out_host, settings.osc_out_port, outbox_rx)?;
    let (bridge, updates) = Bridge::new(settings.addresses.clone(), outbox, midi_out)?;
    bridge.set_note_off_delay(settings.note_off_delay_secs)?;

    for line in settings.addresses.describe() {
        info!("{line}");
    }
    let port = bridge.listen(settings.osc_in_port)?;
    info!(port, target = %sender.target(), "bridge started");
    settings.save(&args.config)?;

    let _midi_in = match settings.midi_input.as_deref() {
        Some(name) => {
            let live = bridge.clone();
            match MidiInputPump::open(name, move |event| live.forward_live(&event)) {
                Ok(pump) => Some(pump),
                Err(e) => {
                    warn!(error = %e, "MIDI input unavailable");
                    None
                }
            }
        }
        None => None,
    };

    for path in &args.tracks {
        let loaded = if path.is_dir() {
            bridge.load_folder(path)
        } else {
            bridge.load_track(path)
        };
        if let Err(e) = loaded {
            warn!(path = %path.display(), error = %e, "could not load");
        }
    }

    let settings = Arc::new(Mutex::new(settings));
    watch_updates(updates, settings, args.config.clone());

    println!("{}", cli::HELP);
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        match cli::parse_command(&line) {
            Ok(None) => {}
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => match cli::execute(&bridge, command) {
                Ok(lines) => lines.iter().for_each(|l| println!("{l}")),
                Err(e) => println!("error: {e}"),
            },
            Err(e) => println!("error: {e}"),
        }
    }

    bridge.shutdown();
    Ok(())
}

/// Logs bridge notifications and writes settings back whenever an address or
/// the note-off delay changes.
fn watch_updates(updates: Receiver<BridgeUpdate>, settings: Arc<Mutex<Settings>>, path: PathBuf) {
    let spawned = std::thread::Builder::new()
        .name("updates".into())
        .spawn(move || {
            for update in updates.iter() {
                match update {
                    BridgeUpdate::AddressesChanged { table } => {
                        let mut settings = settings.lock();
                        settings.addresses = table;
                        persist(&settings, &path);
                    }
                    BridgeUpdate::NoteOffDelay { seconds } => {
                        let mut settings = settings.lock();
                        settings.note_off_delay_secs = seconds;
                        persist(&settings, &path);
                    }
                    BridgeUpdate::TrackStarted { index, name } => {
                        info!(position = index + 1, %name, "now playing");
                    }
                    BridgeUpdate::Error { message } => warn!(%message, "bridge error"),
                    other => info!(update = ?other, "bridge"),
                }
            }
        });
    if let Err(e) = spawned {
        error!(error = %e, "cannot start update watcher");
    }
}

fn persist(settings: &Settings, path: &Path) {
    if let Err(e) = settings.save(path) {
        warn!(path = %path.display(), error = %e, "could not save settings");
    }
}
