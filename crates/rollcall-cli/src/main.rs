use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use rollcall_core::encodings::{list_photos, photo_label};
use rollcall_core::recognizer::ARCFACE_MODEL_VERSION;
use rollcall_core::{Config, EncodingFile, FacePipeline, KnownFace};
use rollcall_hw::{Camera, Frame};
use rollcall_store::{export_csv, AttendanceEvent, Store};

#[derive(Parser)]
#[command(name = "rollcall", about = "rollcall attendance tooling", version)]
struct Cli {
    /// Config file (defaults to $ROLLCALL_CONFIG or the XDG config path)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute face encodings from the reference photos (one photo per person)
    Encode {
        /// Photo directory; file stems become labels
        #[arg(long)]
        photos: Option<PathBuf>,
        /// Encodings file to write
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Manage registered students
    Student {
        #[command(subcommand)]
        action: StudentAction,
    },
    /// Manage class sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Show attendance events, newest first
    History {
        /// Only this student
        #[arg(long)]
        student: Option<String>,
        /// Only this class session
        #[arg(long, conflicts_with = "student")]
        session: Option<i64>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Export attendance events as CSV
    Export {
        /// Output file (stdout if omitted)
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        student: Option<String>,
        #[arg(long, conflicts_with = "student")]
        session: Option<i64>,
    },
    /// List V4L2 capture devices
    Devices,
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Subcommand)]
enum StudentAction {
    /// Register a student (password is read from stdin)
    Add {
        student_id: String,
        name: String,
        #[arg(long, default_value = "")]
        class: String,
    },
    List,
}

#[derive(Subcommand)]
enum SessionAction {
    /// Create a class session
    Create {
        name: String,
        #[arg(long, default_value = "")]
        class: String,
        /// Start time: "now", RFC 3339, or local "YYYY-MM-DD HH:MM"
        #[arg(long, default_value = "now")]
        starts_at: String,
        /// Minutes after the start before arrivals count as late
        #[arg(long, default_value_t = 10)]
        late_after: u32,
    },
    List,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Encode { photos, output } => {
            let photos = photos.unwrap_or_else(|| config.photos_dir.clone());
            let output = output.unwrap_or_else(|| config.encodings_path.clone());
            encode(&config, &photos, &output)
        }
        Commands::Student { action } => {
            let store = open_store(&config)?;
            match action {
                StudentAction::Add {
                    student_id,
                    name,
                    class,
                } => {
                    let password = read_password()?;
                    let student = store.register_student(&student_id, &password, &name, &class)?;
                    println!("Registered {} ({})", student.name, student.student_id);
                }
                StudentAction::List => {
                    let students = store.list_students()?;
                    if students.is_empty() {
                        println!("No students registered");
                    }
                    for s in students {
                        println!("{:<12} {:<28} {}", s.student_id, s.name, s.class_name);
                    }
                }
            }
            Ok(())
        }
        Commands::Session { action } => {
            let store = open_store(&config)?;
            match action {
                SessionAction::Create {
                    name,
                    class,
                    starts_at,
                    late_after,
                } => {
                    let starts_at = parse_start(&starts_at)?;
                    let session = store.create_session(&name, &class, starts_at, late_after)?;
                    println!("Created session #{} {}", session.id, session.name);
                }
                SessionAction::List => {
                    for s in store.list_sessions()? {
                        println!(
                            "#{:<4} {:<24} {:<10} {} (late after {} min)",
                            s.id,
                            s.name,
                            s.class_name,
                            s.starts_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                            s.late_after_minutes
                        );
                    }
                }
            }
            Ok(())
        }
        Commands::History {
            student,
            session,
            limit,
        } => {
            let store = open_store(&config)?;
            let events = select_events(&store, student.as_deref(), session, limit)?;
            if events.is_empty() {
                println!("No attendance recorded");
            }
            for e in events {
                println!(
                    "{}  {:<12} {:<24} {:>4}%  {}  {}",
                    e.recorded_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
                    e.student_id,
                    e.student_name,
                    e.confidence,
                    if e.is_late { "late" } else { "    " },
                    e.photo_path
                );
            }
            Ok(())
        }
        Commands::Export {
            output,
            student,
            session,
        } => {
            let store = open_store(&config)?;
            let events = select_events(&store, student.as_deref(), session, usize::MAX)?;
            let rows = match &output {
                Some(path) => {
                    let file = std::fs::File::create(path)
                        .with_context(|| format!("cannot create {}", path.display()))?;
                    export_csv(std::io::BufWriter::new(file), &events)?
                }
                None => export_csv(std::io::stdout().lock(), &events)?,
            };
            if let Some(path) = output {
                eprintln!("Exported {rows} event(s) to {}", path.display());
            }
            Ok(())
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
            Ok(())
        }
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config).context("failed to serialize config")?);
            Ok(())
        }
    }
}

fn open_store(config: &Config) -> Result<Store> {
    Store::open(&config.db_path)
        .with_context(|| format!("failed to open attendance database {}", config.db_path.display()))
}

fn encode(config: &Config, photos_dir: &Path, output: &Path) -> Result<()> {
    let photos = list_photos(photos_dir)?;
    if photos.is_empty() {
        bail!("no photos found in {}", photos_dir.display());
    }

    let mut pipeline = FacePipeline::load(&config.scrfd_model_path(), &config.arcface_model_path())
        .context("failed to load face models")?;

    let mut faces = Vec::with_capacity(photos.len());
    for path in &photos {
        let Some(label) = photo_label(path) else {
            continue;
        };
        let photo = match image::open(path) {
            Ok(image) => Frame::from_image(image),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot read photo, skipping");
                continue;
            }
        };
        if photo.is_dark {
            tracing::warn!(path = %path.display(), "photo is very dark, the encoding may be poor");
        }
        match pipeline.embed_primary(&photo.data, photo.width, photo.height)? {
            Some(face) => {
                tracing::info!(label = %label, confidence = face.bbox.confidence, "encoded face");
                faces.push(KnownFace::new(label, face.embedding, path.display().to_string()));
            }
            None => tracing::warn!(path = %path.display(), "no face found, skipping"),
        }
    }

    if faces.is_empty() {
        bail!("no faces found in any of the {} photo(s)", photos.len());
    }

    let file = EncodingFile::new(ARCFACE_MODEL_VERSION, faces);
    file.save(output)?;
    println!(
        "Encoded {} face(s) from {} photo(s) into {}",
        file.faces.len(),
        photos.len(),
        output.display()
    );
    Ok(())
}

fn select_events(
    store: &Store,
    student: Option<&str>,
    session: Option<i64>,
    limit: usize,
) -> Result<Vec<AttendanceEvent>> {
    let events = match (student, session) {
        (Some(id), _) => store.attendance_history(id, limit)?,
        (None, Some(session_id)) => {
            let mut events = store.session_attendance(session_id)?;
            events.truncate(limit);
            events
        }
        (None, None) => store.recent_attendance(limit)?,
    };
    Ok(events)
}

fn read_password() -> Result<String> {
    eprint!("Password: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line).context("failed to read password")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("password must not be empty");
    }
    Ok(password)
}

/// "now", an RFC 3339 timestamp, or local "YYYY-MM-DD HH:MM".
fn parse_start(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("now") {
        return Ok(Utc::now());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M")
        .with_context(|| format!("invalid start time {value:?}"))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("{value:?} does not exist in the local time zone"))
}
