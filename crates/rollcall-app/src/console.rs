//! Line-oriented attendance console: login, registration and the main screen.

use std::io::Write as _;

use anyhow::{Context, Result};
use chrono::Local;
use rollcall_core::Config;
use rollcall_store::{AttendanceEvent, ClassSession, Store, StoreError};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use crate::attendance::{AttendanceManager, Ring};
use crate::auth::AuthSession;
use crate::engine::{spawn_engine, EngineHandle};

const HISTORY_ROWS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Screen {
    Login,
    Register,
    Main,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// A parsed main-screen command.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Camera,
    Mark,
    History,
    ShowSessions,
    SelectSession(i64),
    ClearSession,
    Logout,
    Quit,
    Help,
    Empty,
    Unknown(String),
}

fn parse_command(line: &str) -> Command {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Command::Empty;
    };
    match (head.to_lowercase().as_str(), words.next()) {
        ("camera", None) => Command::Camera,
        ("mark", None) => Command::Mark,
        ("history", None) => Command::History,
        ("session", None) => Command::ShowSessions,
        ("session", Some("none")) => Command::ClearSession,
        ("session", Some(id)) => id
            .parse()
            .map(Command::SelectSession)
            .unwrap_or_else(|_| Command::Unknown(line.trim().to_string())),
        ("logout", None) => Command::Logout,
        ("quit" | "exit", None) => Command::Quit,
        ("help" | "?", None) => Command::Help,
        _ => Command::Unknown(line.trim().to_string()),
    }
}

pub struct Console {
    config: Config,
    store: Store,
    auth: AuthSession,
    manager: AttendanceManager,
    engine: Option<EngineHandle>,
    session: Option<ClassSession>,
    screen: Screen,
    input: Lines<BufReader<Stdin>>,
}

impl Console {
    pub fn new(config: Config, store: Store, manager: AttendanceManager, session: Option<ClassSession>) -> Self {
        Self {
            config,
            store,
            auth: AuthSession::new(),
            manager,
            engine: None,
            session,
            screen: Screen::Login,
            input: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    pub async fn run(mut self) -> Result<()> {
        println!("rollcall attendance");
        if self.manager.known_faces() == 0 {
            status(Ring::Rejected, "No face encodings loaded. Run `rollcall encode` before marking attendance.");
        }
        print_login_help();

        loop {
            let flow = match self.screen {
                Screen::Login => self.login_screen().await?,
                Screen::Register => self.register_screen().await?,
                Screen::Main => self.main_screen().await?,
            };
            if flow == Flow::Quit {
                break;
            }
        }

        self.engine = None;
        if self.auth.is_logged_in() {
            self.auth.logout();
        }
        tracing::info!("console closed");
        Ok(())
    }

    async fn prompt(&mut self, label: &str) -> Result<Option<String>> {
        print!("{label}");
        std::io::stdout().flush().context("failed to flush stdout")?;
        let line = self.input.next_line().await.context("failed to read stdin")?;
        Ok(line.map(|l| l.trim().to_string()))
    }

    async fn login_screen(&mut self) -> Result<Flow> {
        let Some(line) = self.prompt("login> ").await? else {
            return Ok(Flow::Quit);
        };
        match line.to_lowercase().as_str() {
            "login" => {
                let Some(student_id) = self.prompt("Student ID: ").await? else {
                    return Ok(Flow::Quit);
                };
                let Some(password) = self.prompt("Password: ").await? else {
                    return Ok(Flow::Quit);
                };
                if student_id.is_empty() || password.is_empty() {
                    status(Ring::Rejected, "Please enter both student ID and password.");
                } else if self.auth.login(&self.store, &student_id, &password)? {
                    let name = self.auth.current_user().map(|s| s.name.clone()).unwrap_or_default();
                    status(Ring::Idle, &format!("Welcome, {name}."));
                    self.screen = Screen::Main;
                    print_main_help();
                } else {
                    status(Ring::Rejected, "Invalid student ID or password.");
                }
            }
            "register" => self.screen = Screen::Register,
            "quit" | "exit" => return Ok(Flow::Quit),
            "" => {}
            _ => print_login_help(),
        }
        Ok(Flow::Continue)
    }

    async fn register_screen(&mut self) -> Result<Flow> {
        println!("New student registration");
        let mut answers = Vec::with_capacity(5);
        for label in ["Student ID: ", "Full name: ", "Class: ", "Password: ", "Confirm password: "] {
            let Some(answer) = self.prompt(label).await? else {
                return Ok(Flow::Quit);
            };
            answers.push(answer);
        }
        self.screen = Screen::Login;

        let [student_id, name, class_name, password, confirm] = <[String; 5]>::try_from(answers)
            .map_err(|_| anyhow::anyhow!("registration form incomplete"))?;
        if password != confirm {
            status(Ring::Rejected, "Passwords do not match.");
            return Ok(Flow::Continue);
        }

        match self.store.register_student(&student_id, &password, &name, &class_name) {
            Ok(student) => status(
                Ring::Idle,
                &format!("Registered {} ({}). Please log in.", student.name, student.student_id),
            ),
            Err(e @ (StoreError::StudentExists(_) | StoreError::InvalidInput(_))) => {
                status(Ring::Rejected, &e.to_string())
            }
            Err(e) => return Err(e).context("registration failed"),
        }
        Ok(Flow::Continue)
    }

    async fn main_screen(&mut self) -> Result<Flow> {
        let label = match self.auth.current_user() {
            Some(student) => format!("{}> ", student.student_id),
            None => {
                self.screen = Screen::Login;
                return Ok(Flow::Continue);
            }
        };
        let Some(line) = self.prompt(&label).await? else {
            return Ok(Flow::Quit);
        };

        match parse_command(&line) {
            Command::Camera => self.toggle_camera().await?,
            Command::Mark => self.mark().await,
            Command::History => self.show_history()?,
            Command::ShowSessions => self.show_sessions()?,
            Command::SelectSession(id) => match self.store.get_session(id)? {
                Some(session) => {
                    status(Ring::Idle, &format!("Session set to #{} {}.", session.id, session.name));
                    self.session = Some(session);
                }
                None => status(Ring::Rejected, &format!("No class session with id {id}.")),
            },
            Command::ClearSession => {
                self.session = None;
                status(Ring::Idle, "No class session selected.");
            }
            Command::Logout => {
                self.engine = None;
                self.auth.logout();
                self.screen = Screen::Login;
                status(Ring::Idle, "Logged out.");
                print_login_help();
            }
            Command::Quit => return Ok(Flow::Quit),
            Command::Help => print_main_help(),
            Command::Empty => {}
            Command::Unknown(cmd) => {
                println!("unknown command: {cmd}");
                print_main_help();
            }
        }
        Ok(Flow::Continue)
    }

    async fn toggle_camera(&mut self) -> Result<()> {
        if self.engine.take().is_some() {
            status(Ring::Idle, "Camera stopped.");
            return Ok(());
        }

        status(Ring::Scanning, &format!("Starting camera {}...", self.config.camera_device));
        let config = self.config.clone();
        let spawned = tokio::task::spawn_blocking(move || spawn_engine(&config))
            .await
            .context("engine start-up task panicked")?;

        match spawned {
            Ok(engine) => {
                match engine.preview().await {
                    Ok(p) => status(
                        Ring::Idle,
                        &format!(
                            "Camera ready ({}x{}, brightness {:.0}, {} face(s) in view).",
                            p.width, p.height, p.brightness, p.faces
                        ),
                    ),
                    Err(e) => status(Ring::Idle, &format!("Camera ready (preview failed: {e}).")),
                }
                self.engine = Some(engine);
            }
            Err(e) => {
                tracing::warn!(error = %e, "camera start failed");
                status(Ring::Rejected, &format!("Could not start camera: {e}"));
            }
        }
        Ok(())
    }

    async fn mark(&self) {
        let Some(student) = self.auth.current_user() else {
            status(Ring::Rejected, "Please log in first.");
            return;
        };
        let Some(engine) = &self.engine else {
            status(Ring::Rejected, "Camera not started. Type `camera` first.");
            return;
        };

        let outcome = self
            .manager
            .mark(engine, &self.store, student, self.session.as_ref(), |ring, message| {
                status(ring, message)
            })
            .await;
        tracing::info!(
            student_id = %student.student_id,
            attempts = outcome.attempts,
            ring = outcome.status.colour(),
            recorded = outcome.event.is_some(),
            "mark finished"
        );
        status(outcome.status, &outcome.message);
    }

    fn show_history(&self) -> Result<()> {
        let Some(student) = self.auth.current_user() else {
            return Ok(());
        };
        let events = self.store.attendance_history(&student.student_id, HISTORY_ROWS)?;
        if events.is_empty() {
            println!("No attendance recorded yet.");
            return Ok(());
        }
        println!("{}", history_header());
        for event in &events {
            println!("{}", history_row(event));
        }
        Ok(())
    }

    fn show_sessions(&self) -> Result<()> {
        match &self.session {
            Some(s) => println!("Current session: #{} {}", s.id, s.name),
            None => println!("Current session: none"),
        }
        for s in self.store.list_sessions()? {
            println!(
                "  #{:<4} {:<24} {:<10} {} (late after {} min)",
                s.id,
                s.name,
                s.class_name,
                s.starts_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                s.late_after_minutes
            );
        }
        Ok(())
    }
}

fn history_header() -> String {
    format!("{:<19}  {:<8}  {:>10}  {:<4}  Photo", "Time", "Session", "Confidence", "Late")
}

fn history_row(event: &AttendanceEvent) -> String {
    let session = event
        .session_id
        .map(|id| format!("#{id}"))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:<19}  {:<8}  {:>10}  {:<4}  {}",
        event.recorded_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
        session,
        format!("{}%", event.confidence),
        if event.is_late { "yes" } else { "no" },
        event.photo_path
    )
}

/// Print a status line prefixed by the coloured ring.
pub fn status(ring: Ring, message: &str) {
    println!("{} {message}", ring_marker(ring, std::env::var_os("NO_COLOR").is_none()));
}

fn ring_marker(ring: Ring, colour: bool) -> String {
    if !colour {
        return format!("[{}]", ring.colour());
    }
    let code = match ring {
        Ring::Idle | Ring::Scanning => "33",
        Ring::Matched => "32",
        Ring::Rejected => "31",
    };
    format!("\x1b[{code}m\u{25cf}\x1b[0m")
}

fn print_login_help() {
    println!("Commands: login, register, quit");
}

fn print_main_help() {
    println!("Commands:");
    println!("  camera          start or stop the camera");
    println!("  mark            mark attendance for the logged-in student");
    println!("  history         show your attendance history");
    println!("  session [ID]    list sessions, or select one (`session none` clears)");
    println!("  logout, quit");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("camera"), Command::Camera);
        assert_eq!(parse_command("  MARK "), Command::Mark);
        assert_eq!(parse_command("session"), Command::ShowSessions);
        assert_eq!(parse_command("session 12"), Command::SelectSession(12));
        assert_eq!(parse_command("session none"), Command::ClearSession);
        assert_eq!(parse_command("exit"), Command::Quit);
        assert_eq!(parse_command(""), Command::Empty);
        assert_eq!(parse_command("session x"), Command::Unknown("session x".into()));
        assert_eq!(parse_command("mark now"), Command::Unknown("mark now".into()));
    }

    #[test]
    fn test_ring_marker() {
        assert_eq!(ring_marker(Ring::Matched, false), "[green]");
        assert_eq!(ring_marker(Ring::Scanning, false), "[yellow]");
        assert_eq!(ring_marker(Ring::Rejected, true), "\x1b[31m\u{25cf}\x1b[0m");
    }

    #[test]
    fn test_history_row_columns() {
        let event = AttendanceEvent {
            id: 1,
            recorded_at: Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap(),
            student_id: "s1".into(),
            student_name: "Ada".into(),
            session_id: Some(3),
            confidence: 87,
            photo_path: "snapshots/s1.jpg".into(),
            is_late: true,
        };
        let row = history_row(&event);
        assert!(row.contains("#3"));
        assert!(row.contains("87%"));
        assert!(row.contains("yes"));
        assert!(row.ends_with("snapshots/s1.jpg"));
        assert!(history_header().starts_with("Time"));
    }
}
