use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::bridge::Bridge;
use crate::error::{BridgeError, Result};
use crate::osc::{AddressKey, AddressTable};

/// One line typed on the binary's standard input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play,
    Stop,
    Pause,
    Resume,
    Skip,
    Back,
    Previous,
    Jump(usize),
    Loop(bool),
    ToggleLoop,
    Shuffle,
    Bpm(f64),
    Lock(bool),
    Ignore(bool),
    ResetBpm,
    Load(PathBuf),
    LoadFolder(PathBuf),
    Unload,
    Address { key: AddressKey, value: String },
    ResetAddresses,
    Delay(f64),
    Alarm {
        deadline: DateTime<Utc>,
        address: String,
        args: Vec<String>,
    },
    Alarms,
    RemoveAlarm(usize),
    Sync(bool),
    Addresses,
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "\
play | stop | pause | resume | skip | back | previous | jump N
loop [on|off] | shuffle | bpm X | lock on|off | ignore on|off | reset-bpm
load PATH | load-folder DIR | unload
addr in:NAME|out:NAME VALUE | addr-reset | addresses | delay SECS
alarm RFC3339 ADDR [ARGS..] | alarms | rm-alarm N
sync on|off | status | help | quit";

fn switch(word: Option<&str>) -> Result<bool> {
    match word {
        Some("on" | "true" | "1") => Ok(true),
        Some("off" | "false" | "0") => Ok(false),
        other => Err(BridgeError::parse(format!(
            "expected on or off, got {}",
            other.unwrap_or("nothing")
        ))),
    }
}

fn number<T: FromStr>(word: Option<&str>, what: &str) -> Result<T> {
    let word = word.ok_or_else(|| BridgeError::parse(format!("missing {what}")))?;
    word.parse()
        .map_err(|_| BridgeError::parse(format!("{what} '{word}'")))
}

fn rest(words: &[&str], what: &str) -> Result<String> {
    if words.is_empty() {
        return Err(BridgeError::parse(format!("missing {what}")));
    }
    Ok(words.join(" "))
}

/// Returns `Ok(None)` for a blank line.
pub fn parse_command(line: &str) -> Result<Option<Command>> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&verb, args)) = words.split_first() else {
        return Ok(None);
    };
    let first = args.first().copied();

    let command = match verb {
        "play" => Command::Play,
        "stop" => Command::Stop,
        "pause" => Command::Pause,
        "resume" => Command::Resume,
        "skip" => Command::Skip,
        "back" => Command::Back,
        "previous" | "prev" => Command::Previous,
        "jump" => Command::Jump(number(first, "track number")?),
        "loop" if first.is_none() => Command::ToggleLoop,
        "loop" => Command::Loop(switch(first)?),
        "shuffle" => Command::Shuffle,
        "bpm" => Command::Bpm(number(first, "tempo")?),
        "lock" => Command::Lock(switch(first)?),
        "ignore" => Command::Ignore(switch(first)?),
        "reset-bpm" => Command::ResetBpm,
        "load" => Command::Load(rest(args, "path")?.into()),
        "load-folder" => Command::LoadFolder(rest(args, "directory")?.into()),
        "unload" => Command::Unload,
        "addr" => {
            let key = first
                .ok_or_else(|| BridgeError::parse("missing address key"))?
                .parse()?;
            let value = args
                .get(1)
                .ok_or_else(|| BridgeError::parse("missing address"))?
                .to_string();
            Command::Address { key, value }
        }
        "addr-reset" => Command::ResetAddresses,
        "addresses" => Command::Addresses,
        "delay" => Command::Delay(number(first, "delay")?),
        "alarm" => {
            let when = first.ok_or_else(|| BridgeError::parse("missing alarm time"))?;
            let deadline = DateTime::parse_from_rfc3339(when)
                .map_err(|e| BridgeError::parse(format!("alarm time '{when}': {e}")))?
                .with_timezone(&Utc);
            let address = args
                .get(1)
                .ok_or_else(|| BridgeError::parse("missing alarm address"))?
                .to_string();
            let args = args.iter().skip(2).map(|s| s.to_string()).collect();
            Command::Alarm {
                deadline,
                address,
                args,
            }
        }
        "alarms" => Command::Alarms,
        "rm-alarm" => Command::RemoveAlarm(number(first, "alarm number")?),
        "sync" => Command::Sync(switch(first)?),
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(BridgeError::parse(format!("unknown command '{other}'"))),
    };
    Ok(Some(command))
}

/// Runs a command against the bridge and returns the lines to show. `Quit` is
/// left to the caller.
pub fn execute(bridge: &Bridge, command: Command) -> Result<Vec<String>> {
    let done = |text: String| -> Result<Vec<String>> { Ok(vec![text]) };
    match command {
        Command::Play => bridge.play().map(|_| vec!["playing".into()]),
        Command::Stop => bridge.stop().map(|_| vec!["stopped".into()]),
        Command::Pause => bridge.pause().map(|_| vec!["paused".into()]),
        Command::Resume => bridge.resume().map(|_| vec!["resumed".into()]),
        Command::Skip => bridge.skip().map(|_| Vec::new()),
        Command::Back => bridge.back().map(|_| Vec::new()),
        Command::Previous => bridge.previous().map(|_| Vec::new()),
        Command::Jump(position) => bridge.jump_to(position).map(|_| Vec::new()),
        Command::Loop(on) => {
            bridge.set_looping(on);
            done(format!("looping {}", if on { "on" } else { "off" }))
        }
        Command::ToggleLoop => {
            let on = bridge.toggle_loop();
            done(format!("looping {}", if on { "on" } else { "off" }))
        }
        Command::Shuffle => {
            let on = bridge.toggle_shuffle()?;
            done(format!("shuffle {}", if on { "on" } else { "off" }))
        }
        Command::Bpm(bpm) => done(format!("tempo {}", bridge.set_user_tempo(bpm)?)),
        Command::Lock(on) => {
            bridge.lock_tempo(on);
            done(format!("tempo lock {}", if on { "on" } else { "off" }))
        }
        Command::Ignore(on) => {
            bridge.set_ignore_external_tempo(on);
            done(format!("ignoring external tempo: {on}"))
        }
        Command::ResetBpm => done(format!("tempo {}", bridge.reset_tempo())),
        Command::Load(path) => {
            let len = bridge.load_track(&path)?;
            done(format!("{len} tracks loaded"))
        }
        Command::LoadFolder(dir) => {
            let loaded = bridge.load_folder(&dir)?;
            done(format!("{loaded} tracks added from {}", dir.display()))
        }
        Command::Unload => bridge.unload_all().map(|_| vec!["playlist cleared".into()]),
        Command::Address { key, value } => {
            bridge.edit_address(key, &value)?;
            done(format!("{key} = {value}"))
        }
        Command::ResetAddresses => {
            bridge.replace_addresses(AddressTable::default())?;
            done("addresses reset to defaults".into())
        }
        Command::Addresses => Ok(bridge.address_table().describe()),
        Command::Delay(seconds) => {
            bridge.set_note_off_delay(seconds)?;
            done(format!("note-off delay {seconds}s"))
        }
        Command::Alarm {
            deadline,
            address,
            args,
        } => {
            let index = bridge.schedule_alarm(deadline, &address, &args)?;
            done(format!("alarm {index} at {deadline}"))
        }
        Command::Alarms => Ok(bridge
            .alarms()
            .iter()
            .enumerate()
            .map(|(i, alarm)| {
                format!(
                    "{i}: {} {} {:?}{}",
                    alarm.deadline,
                    alarm.address,
                    alarm.args,
                    if alarm.fired { " (fired)" } else { "" }
                )
            })
            .collect()),
        Command::RemoveAlarm(index) => {
            let alarm = bridge.remove_alarm(index)?;
            done(format!("removed alarm {} at {}", alarm.address, alarm.deadline))
        }
        Command::Sync(on) => {
            bridge.set_sync(on)?;
            done(format!("sync {}", if on { "on" } else { "off" }))
        }
        Command::Status => {
            let status = bridge.status();
            let mut lines = vec![
                format!(
                    "{:?}, track {}/{} {}",
                    status.transport.state,
                    status.transport.index + 1,
                    status.transport.len,
                    status.transport.track.as_deref().unwrap_or("-")
                ),
                format!(
                    "loop {}, shuffle {}, sync {}",
                    status.transport.looping, status.transport.shuffled, status.sync
                ),
                format!(
                    "tempo {} (smoothed {:.1}), locked {}, ignoring external {}",
                    status.bpm,
                    status.smoothed_bpm,
                    status.tempo_locked,
                    status.ignore_external_tempo
                ),
                format!(
                    "note-off delay {}s, {} alarms",
                    status.note_off_delay_secs, status.alarms
                ),
            ];
            lines.push(match status.listening {
                Some(port) => format!("listening on {port}"),
                None => "not listening".into(),
            });
            lines.extend(
                bridge
                    .transport()
                    .playlist()
                    .names()
                    .into_iter()
                    .enumerate()
                    .map(|(i, name)| format!("  {}. {name}", i + 1)),
            );
            Ok(lines)
        }
        Command::Help => Ok(HELP.lines().map(str::to_string).collect()),
        Command::Quit => Ok(Vec::new()),
    }
}
