use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gatewatch_core::plate;
use gatewatch_core::{
    CommandOutcome, DecisionEngine, Embedding, EnrollmentCommand, Frame, RecognitionMode,
    Registry, ReplayEmbedder, Verdict,
};
use gatewatch_store::SqliteRegistry;
use image::DynamicImage;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;
mod ocr;

use config::Config;
use ocr::TesseractReader;

#[derive(Parser)]
#[command(name = "gatewatch", about = "Face and licence-plate access control")]
struct Cli {
    /// Print verdicts and listings as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage enrolled faces
    #[command(subcommand)]
    Face(FaceCommand),
    /// Manage enrolled plates
    #[command(subcommand)]
    Plate(PlateCommand),
    /// Check text against the plate grammar
    CheckPlate {
        text: String,
    },
    /// Show the most recent recognition events
    Logs {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Read plates from still images
    ScanPlates {
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Enroll newly seen plates
        #[arg(long)]
        auto_save: bool,
    },
    /// Replay recorded face detections through the matcher
    ScanFaces {
        /// JSON array of frames, each an array of {bbox, embedding}
        recording: PathBuf,
    },
    /// Run turnstile cycles over recorded face detections, one per frame
    Admit {
        recording: PathBuf,
    },
}

#[derive(Subcommand)]
enum FaceCommand {
    /// Enroll a face from a stored embedding
    Add {
        /// Display name; may be empty
        #[arg(default_value = "")]
        name: String,
        /// JSON file holding the embedding as an array of floats
        #[arg(short, long)]
        embedding: PathBuf,
        /// Reference photo stored alongside the record
        #[arg(short, long)]
        image: Option<PathBuf>,
    },
    /// List enrolled faces
    List,
    Rename {
        id: i64,
        name: String,
    },
    /// Flip the access flag
    ToggleAccess {
        id: i64,
    },
    Mark {
        id: i64,
    },
    Unmark {
        id: i64,
    },
    /// Mark every enrolled face
    MarkAll,
    Delete {
        id: i64,
    },
}

#[derive(Subcommand)]
enum PlateCommand {
    /// Enroll a plate number
    Add {
        text: String,
    },
    /// List enrolled plates
    List,
    Mark {
        id: i64,
    },
    Unmark {
        id: i64,
    },
    Delete {
        id: i64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::CheckPlate { text } => check_plate(&text)?,
        Commands::Face(cmd) => face(&mut open_engine()?.1, cmd, cli.json)?,
        Commands::Plate(cmd) => plate_cmd(&mut open_engine()?.1, cmd, cli.json)?,
        Commands::Logs { limit } => {
            let (_, engine) = open_engine()?;
            let events = engine.registry().recent_events(limit)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&events)?);
            } else if events.is_empty() {
                println!("No recognition events");
            } else {
                for e in events {
                    println!(
                        "{}  {:<5}  {}",
                        e.timestamp.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
                        e.subject.as_str(),
                        e.identifier
                    );
                }
            }
        }
        Commands::ScanPlates { images, auto_save } => {
            let (config, engine) = open_engine()?;
            let mut engine = engine.with_plate_reader(Box::new(TesseractReader::new(&config.tesseract)));
            if auto_save {
                engine.set_auto_save(true);
            }
            for (seq, path) in (0u64..).zip(&images) {
                let image = image::open(path).with_context(|| format!("loading {}", path.display()))?;
                let verdicts = engine.process_plates(&Frame::new(image, seq))?;
                print_verdicts(&path.display().to_string(), &verdicts, cli.json)?;
            }
        }
        Commands::ScanFaces { recording } => {
            let replay = load_recording(&recording)?;
            let frames = replay.remaining();
            let mut engine = open_engine()?.1.with_embedder(Box::new(replay));
            for seq in 0..frames as u64 {
                let verdicts = engine.process_faces(&replay_frame(seq))?;
                print_verdicts(&format!("frame {seq}"), &verdicts, cli.json)?;
            }
        }
        Commands::Admit { recording } => {
            let replay = load_recording(&recording)?;
            let frames = replay.remaining();
            let mut engine = open_engine()?.1.with_embedder(Box::new(replay));
            for seq in 0..frames as u64 {
                let decision = engine.request_access(RecognitionMode::Face, &replay_frame(seq))?;
                if cli.json {
                    println!("{}", serde_json::to_string(&decision)?);
                } else {
                    println!("frame {seq}: {decision:?} -> turnstile {:?}", decision.turnstile());
                }
                engine.reset_gate();
            }
        }
    }

    Ok(())
}

fn open_engine() -> Result<(Config, DecisionEngine<SqliteRegistry>)> {
    let config = Config::load()?;
    let registry = SqliteRegistry::open(&config.db_path)
        .with_context(|| format!("opening {}", config.db_path.display()))?;
    let engine = DecisionEngine::new(registry, config.engine.clone())?;
    Ok((config, engine))
}

fn check_plate(text: &str) -> Result<()> {
    let normalized = plate::normalize(text);
    if !plate::is_valid(&normalized) {
        bail!("{normalized:?} is not a valid plate number");
    }
    println!("{normalized}: valid");
    Ok(())
}

fn face<R: Registry>(engine: &mut DecisionEngine<R>, cmd: FaceCommand, json: bool) -> Result<()> {
    let command = match cmd {
        FaceCommand::List => {
            let faces = engine.faces();
            if json {
                println!("{}", serde_json::to_string_pretty(faces)?);
            } else if faces.is_empty() {
                println!("No faces enrolled");
            } else {
                for f in faces {
                    println!(
                        "{:>5}  {:<24}  access={}  marked={}  dim={}",
                        f.id,
                        if f.is_unnamed() { "(unnamed)" } else { f.name.as_str() },
                        f.access_allowed,
                        f.marked,
                        f.embedding.dim()
                    );
                }
            }
            return Ok(());
        }
        FaceCommand::Add {
            name,
            embedding,
            image,
        } => {
            let values: Vec<f32> = serde_json::from_reader(BufReader::new(
                File::open(&embedding).with_context(|| format!("opening {}", embedding.display()))?,
            ))
            .with_context(|| format!("parsing {}", embedding.display()))?;
            let image = match image {
                Some(path) => std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?,
                None => Vec::new(),
            };
            EnrollmentCommand::AddFace {
                name,
                embedding: Embedding::new(values),
                image,
            }
        }
        FaceCommand::Rename { id, name } => EnrollmentCommand::RenameFace { id, name },
        FaceCommand::ToggleAccess { id } => EnrollmentCommand::ToggleFaceAccess { id },
        FaceCommand::Mark { id } => EnrollmentCommand::MarkFace { id },
        FaceCommand::Unmark { id } => EnrollmentCommand::UnmarkFace { id },
        FaceCommand::MarkAll => EnrollmentCommand::MarkAllFaces,
        FaceCommand::Delete { id } => EnrollmentCommand::DeleteFace { id },
    };
    report(engine.apply(command)?);
    Ok(())
}

fn plate_cmd<R: Registry>(engine: &mut DecisionEngine<R>, cmd: PlateCommand, json: bool) -> Result<()> {
    let command = match cmd {
        PlateCommand::List => {
            let plates = engine.plates();
            if json {
                println!("{}", serde_json::to_string_pretty(plates)?);
            } else if plates.is_empty() {
                println!("No plates enrolled");
            } else {
                for p in plates {
                    println!("{:>5}  {:<12}  marked={}", p.id, p.plate.as_str(), p.marked);
                }
            }
            return Ok(());
        }
        PlateCommand::Add { text } => EnrollmentCommand::AddPlate { text },
        PlateCommand::Mark { id } => EnrollmentCommand::MarkPlate { id },
        PlateCommand::Unmark { id } => EnrollmentCommand::UnmarkPlate { id },
        PlateCommand::Delete { id } => EnrollmentCommand::DeletePlate { id },
    };
    report(engine.apply(command)?);
    Ok(())
}

fn report(outcome: CommandOutcome) {
    match outcome {
        CommandOutcome::Added(id) => println!("Added #{id}"),
        CommandOutcome::Updated => println!("Updated"),
        CommandOutcome::AccessAllowed(allowed) => {
            println!("Access {}", if allowed { "allowed" } else { "denied" })
        }
        CommandOutcome::Marked(n) => println!("Marked {n} faces"),
    }
}

fn load_recording(path: &Path) -> Result<ReplayEmbedder> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    ReplayEmbedder::from_json(BufReader::new(file))
        .with_context(|| format!("parsing recording {}", path.display()))
}

/// Recorded detections carry their own embeddings; the frame only supplies sequence and time.
fn replay_frame(seq: u64) -> Frame {
    Frame::new(DynamicImage::new_luma8(1, 1), seq)
}

fn print_verdicts(source: &str, verdicts: &[Verdict], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(verdicts)?);
        return Ok(());
    }
    if verdicts.is_empty() {
        println!("{source}: nothing recognized");
    }
    for v in verdicts {
        let b = v.location;
        println!(
            "{source}: {:<28} {:<7} {}{} at ({}, {}, {}x{})",
            v.display_text(),
            if v.allowed { "allowed" } else { "denied" },
            if v.is_new { "new" } else { "seen" },
            v.distance.map(|d| format!(" d={d:.3}")).unwrap_or_default(),
            b.x,
            b.y,
            b.width,
            b.height
        );
    }
    Ok(())
}
