use clap::{Parser, Subcommand};
use station_voice::announcer::{default_state_path, Announcer, AnnouncerCore};
use station_voice::clip::ClipStore;
use station_voice::effects::{preset_names, PRESETS};
use station_voice::line::Line;
use station_voice::session::PlaybackPhase;
use station_voice::slot::{AudioAssignment, SlotKey};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "stationvoice", about = "Transit Announcement Engine CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show engine status
    Status,
    /// Line selection
    Line {
        #[command(subcommand)]
        action: LineCmd,
    },
    /// List the current line's slots and their clips
    Slots,
    /// Bind a local clip file to a slot
    Assign {
        /// Slot key (e.g. station:s1 or between:s1-s2)
        slot: String,
        /// Audio file path
        file: PathBuf,
        /// Copy the file into the clip store as an owned upload
        #[arg(long)]
        upload: bool,
        /// Display name (defaults to the file stem)
        #[arg(long)]
        name: Option<String>,
    },
    /// Remove a slot's clip
    Unassign {
        /// Slot key
        slot: String,
    },
    /// Extra announcement segments between stations
    Segment {
        #[command(subcommand)]
        action: SegmentCmd,
    },
    /// Show the derived playback queue
    Queue,
    /// Play one slot, or the whole queue when no slot is given
    Play {
        /// Slot key to play solo
        slot: Option<String>,
        /// Queue index to start from (default: resume position)
        #[arg(long)]
        from: Option<usize>,
        /// Acoustic environment preset (see `presets`)
        #[arg(long)]
        environment: Option<String>,
        /// Playback rate (UI convention 0.5–4.0)
        #[arg(long)]
        speed: Option<f32>,
        /// Volume in [0, 1]
        #[arg(long)]
        volume: Option<f32>,
    },
    /// List acoustic environment presets
    Presets,
}

#[derive(Subcommand)]
enum LineCmd {
    /// Select the stations of the active line, in travel order
    Set {
        /// Station ids
        #[arg(required = true)]
        stations: Vec<String>,
        /// Close the line into a loop back to the first station
        #[arg(long)]
        closed: bool,
        /// Line name
        #[arg(long, default_value = "Line")]
        name: String,
    },
    /// Show the active line
    Show,
}

#[derive(Subcommand)]
enum SegmentCmd {
    /// Append an extra segment under a between slot
    Add {
        /// Between slot key (e.g. between:s1-s2)
        between: String,
    },
    /// Remove an extra segment
    Remove {
        /// Between slot key
        between: String,
        /// Segment slot key
        slot: String,
    },
}

fn main() {
    let cli = Cli::parse();
    let core = match AnnouncerCore::new(Some(default_state_path()), ClipStore::default_dir()) {
        Ok(core) => core,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(cli.command, core) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(command: Commands, mut core: AnnouncerCore) -> Result<(), String> {
    match command {
        Commands::Status => {
            let status = core.get_status();
            println!("Line:        {} ({} stations{})", status.line_name, status.station_count,
                if status.is_loop { ", loop" } else { "" });
            println!("Assigned:    {} slots", status.assigned_slots);
            println!("Queue:       {} entries, {}s total", status.queue_length, status.total_duration_secs);
            println!("Environment: {}", status.environment.as_deref().unwrap_or("none"));
        }

        Commands::Line { action } => match action {
            LineCmd::Set {
                mut stations,
                closed,
                name,
            } => {
                if closed {
                    if let Some(first) = stations.first().cloned() {
                        stations.push(first);
                    }
                }
                let count = stations.len();
                core.set_line(Line::new(&name, stations))?;
                println!("Line '{}' selected ({} stations)", name, count);
            }
            LineCmd::Show => {
                if core.line.stations.is_empty() {
                    println!("No line selected.");
                } else {
                    println!("{}: {}", core.line.name, core.line.stations.join(" -> "));
                }
            }
        },

        Commands::Slots => {
            for slot in core.slot_listing() {
                let clip = match (&slot.display_name, &slot.kind) {
                    (Some(name), Some(kind)) => format!("{} [{}]", name, kind),
                    _ => "(no clip)".to_string(),
                };
                let duration = slot
                    .duration_secs
                    .map(|d| format!(" {:.1}s", d))
                    .unwrap_or_default();
                println!("{:40} {}{}", slot.key, clip, duration);
            }
        }

        Commands::Assign {
            slot,
            file,
            upload,
            name,
        } => {
            let key = SlotKey::parse(&slot)?;
            if upload {
                core.assign_upload(key, &file)?;
            } else {
                let display = name.unwrap_or_else(|| {
                    file.file_stem()
                        .map(|s| s.to_string_lossy().to_string())
                        .unwrap_or_else(|| "Clip".to_string())
                });
                core.bind_assignment(key, AudioAssignment::preset(file, &display))?;
            }
            println!("Assigned.");
        }

        Commands::Unassign { slot } => {
            let key = SlotKey::parse(&slot)?;
            core.unbind_assignment(&key)?;
            println!("Removed.");
        }

        Commands::Segment { action } => match action {
            SegmentCmd::Add { between } => {
                let key = SlotKey::parse(&between)?;
                match core.add_extra_segment(&key)? {
                    Some(segment) => println!("Added {}", segment),
                    None => println!("'{}' is not a between slot on this line.", between),
                }
            }
            SegmentCmd::Remove { between, slot } => {
                let between = SlotKey::parse(&between)?;
                let segment = SlotKey::parse(&slot)?;
                core.remove_extra_segment(&between, &segment)?;
                println!("Removed.");
            }
        },

        Commands::Queue => {
            let queue = core.queue();
            if queue.is_empty() {
                println!("Queue is empty.");
                return Ok(());
            }
            for (i, key) in queue.iter().enumerate() {
                let marker = if i == core.session.queue_index { ">" } else { " " };
                let duration = core
                    .tracker
                    .duration_secs(key)
                    .map(|d| format!("{}s", d))
                    .unwrap_or_else(|| "?".to_string());
                println!("{} [{:2}] {:40} {}", marker, i + 1, key, duration);
            }
            println!("Total: {}s", core.total_duration_secs());
        }

        Commands::Play {
            slot,
            from,
            environment,
            speed,
            volume,
        } => {
            let solo = slot.map(|s| SlotKey::parse(&s)).transpose()?;
            let announcer = Announcer::spawn(
                core,
                Some(Box::new(|now| {
                    if let Some(station) = &now.station_id {
                        println!("  Now announcing: {}", station);
                    }
                })),
            );
            announcer.set_environment(environment)?;
            if let Some(rate) = speed {
                announcer.set_speed(rate);
            }
            if let Some(level) = volume {
                announcer.set_volume(level);
            }
            match solo {
                Some(key) => announcer.play_slot(&key),
                None => announcer.play_queue_from(from),
            }
            wait_for_idle(&announcer);
            announcer.shutdown();
        }

        Commands::Presets => {
            println!("Available environments: {}", preset_names().join(", "));
            for preset in PRESETS {
                println!(
                    "  {:12} reverb {:.1}s  dry/wet {:.2}/{:.2}  noise {:.3}",
                    preset.name, preset.reverb_secs, preset.dry_gain, preset.wet_gain,
                    preset.noise_level
                );
            }
        }
    }
    Ok(())
}

/// Block until the session returns to idle, polling the shared core.
fn wait_for_idle(announcer: &Announcer) {
    let core = announcer.core();
    // Give the runtime a moment to take the session out of Idle.
    std::thread::sleep(Duration::from_millis(300));
    loop {
        {
            let core = core.lock().expect("core mutex poisoned");
            if core.session.phase == PlaybackPhase::Idle {
                return;
            }
        }
        std::thread::sleep(Duration::from_millis(200));
    }
}
