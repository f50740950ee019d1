use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use clockface_core::region::quality_report;
use clockface_core::{
    evaluate, AnalyzerLoader, Descriptor, DescriptorMatcher, FaceAnalyzer, HeuristicSynthesizer,
};
use clockface_hw::{Frame, V4lCamera};
use clockface_session::{
    ClockAction, ClockContext, Config, DriverSettings, GeoPoint, HttpBackend, Orchestrator,
    SessionCommand, SessionDriver, SessionError, SessionExit, SessionHandle, SessionPurpose,
    SessionState, SessionView,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const MAX_FACE_ATTEMPTS: u32 = 3;
const MAX_PIN_ATTEMPTS: u32 = 3;
const RESUBMIT_PROMPT: &str = "Enter to resubmit, r to retake, q to quit: ";

#[derive(Parser)]
#[command(name = "clockface", about = "Face-verified attendance clock")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clock in or out with face verification
    Clock {
        /// "in" or "out"
        action: ClockAction,
        /// Site label sent with the request
        #[arg(long)]
        location: Option<String>,
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,
    },
    /// Capture and register your face
    Register,
    /// Print quality and descriptors for an image file
    Analyze {
        image: PathBuf,
        /// Also run the ONNX model set
        #[arg(long)]
        models: bool,
    },
    /// Compare two stored descriptor JSON files
    Compare { stored: PathBuf, probe: PathBuf },
    /// List video capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Clock {
            action,
            location,
            lat,
            lon,
        } => {
            let mut context = ClockContext::new(action);
            context.location = location;
            context.user_location = lat.zip(lon).map(|(latitude, longitude)| GeoPoint {
                latitude,
                longitude,
            });
            match run_session(&config, SessionPurpose::Clock(context)).await? {
                SessionExit::Verified(outcome) => {
                    println!("{}", serde_json::to_string_pretty(&outcome)?);
                }
                SessionExit::Registered => {}
                SessionExit::Cancelled => bail!("clock {action:?} not completed"),
            }
        }
        Commands::Register => match run_session(&config, SessionPurpose::Register).await? {
            SessionExit::Registered => println!("Face registered"),
            SessionExit::Verified(_) => {}
            SessionExit::Cancelled => bail!("registration not completed"),
        },
        Commands::Analyze { image, models } => analyze(&config, &image, models)?,
        Commands::Compare { stored, probe } => {
            let stored = read_descriptor(&stored)?;
            let probe = read_descriptor(&probe)?;
            let outcome = evaluate(&DescriptorMatcher::default(), Some(&stored), &probe, false);
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Devices => {
            let devices = V4lCamera::list_devices();
            if devices.is_empty() {
                println!("No video capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
    }

    Ok(())
}

async fn run_session(config: &Config, purpose: SessionPurpose) -> Result<SessionExit> {
    let backend = HttpBackend::new(config)?;
    let loader: Arc<dyn AnalyzerLoader> = Arc::new(config.model_paths());
    let (driver, handle) = SessionDriver::new(
        Box::new(V4lCamera::new(config.camera_device.clone())),
        loader,
        Orchestrator::new(backend, config.pin_enabled),
        purpose,
        DriverSettings::from_config(config),
    );

    let (exit, operated) = tokio::join!(driver.run(), operate(handle));
    if let Err(e) = operated {
        tracing::debug!(error = %e, "terminal front end stopped");
    }
    Ok(exit?)
}

/// Terminal front end: capture as soon as a face is usable, confirm, and
/// fall back to a PIN prompt once the server allows it.
async fn operate(mut handle: SessionHandle) -> Result<(), SessionError> {
    let mut status = String::new();
    let mut face_attempts = 0;

    loop {
        let Ok(view) = handle.changed().await else {
            return Ok(());
        };
        if view.status_text != status {
            eprintln!("{}", view.status_text);
            status = view.status_text.clone();
        }

        match view.state {
            SessionState::Detecting if view.capture_enabled => {
                if face_attempts >= MAX_FACE_ATTEMPTS {
                    return give_up(&mut handle, view.pin_available).await;
                }
                handle.send(SessionCommand::Capture).await?;
            }
            SessionState::Captured => {
                if face_attempts >= MAX_FACE_ATTEMPTS {
                    return give_up(&mut handle, view.pin_available).await;
                }
                let mut result = confirm(&mut handle, &mut face_attempts).await?;
                loop {
                    report(&result);
                    match after_submission(&result, face_attempts) {
                        Next::Finished => return Ok(()),
                        Next::Pin => return pin_prompt(&mut handle).await,
                        Next::GiveUp => return give_up(&mut handle, result.pin_available).await,
                        Next::Recapture => break,
                        Next::Resubmit => {
                            let answer = prompt_line(RESUBMIT_PROMPT).await;
                            match answer.as_deref() {
                                Some("r") => {
                                    handle.send(SessionCommand::Retake).await?;
                                    break;
                                }
                                Some("q") | None => return handle.send(SessionCommand::Cancel).await,
                                Some(_) => result = confirm(&mut handle, &mut face_attempts).await?,
                            }
                        }
                    }
                }
            }
            SessionState::Done => return Ok(()),
            _ => {}
        }
    }
}

/// What the front end does once a submission has been answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    Finished,
    /// Server rejected the face and allows a PIN.
    Pin,
    GiveUp,
    /// Photo kept after a failed submission; the user decides.
    Resubmit,
    /// Rejected; the session is detecting again.
    Recapture,
}

fn after_submission(result: &SessionView, face_attempts: u32) -> Next {
    match result.state {
        SessionState::Done => Next::Finished,
        _ if result.pin_available && result.rejection.is_some() => Next::Pin,
        _ if face_attempts >= MAX_FACE_ATTEMPTS => Next::GiveUp,
        SessionState::Captured => Next::Resubmit,
        _ => Next::Recapture,
    }
}

/// Confirm the captured photo and wait for the answer.
async fn confirm(handle: &mut SessionHandle, face_attempts: &mut u32) -> Result<SessionView, SessionError> {
    *face_attempts += 1;
    let before = handle.view().attempts;
    handle.send(SessionCommand::Confirm).await?;
    handle.wait_for(|v| v.attempts > before).await
}

fn report(result: &SessionView) {
    if let Some(rejection) = &result.rejection {
        eprintln!("{}", rejection.remediation);
    } else if let Some(notice) = &result.notice {
        eprintln!("{notice}");
    }
}

async fn give_up(handle: &mut SessionHandle, pin_available: bool) -> Result<(), SessionError> {
    if pin_available {
        return pin_prompt(handle).await;
    }
    eprintln!("Too many attempts");
    handle.send(SessionCommand::Cancel).await
}

async fn pin_prompt(handle: &mut SessionHandle) -> Result<(), SessionError> {
    for _ in 0..MAX_PIN_ATTEMPTS {
        let Some(pin) = prompt_line("PIN: ").await.filter(|p| !p.is_empty()) else {
            break;
        };
        let before = handle.view().attempts;
        handle.send(SessionCommand::SubmitPin(pin)).await?;
        let result = handle.wait_for(|v| v.attempts > before).await?;
        if result.state == SessionState::Done {
            return Ok(());
        }
        if let Some(notice) = &result.notice {
            eprintln!("{notice}");
        }
    }
    handle.send(SessionCommand::Cancel).await
}

/// One trimmed line from stdin; `None` on EOF.
async fn prompt_line(prompt: &'static str) -> Option<String> {
    tokio::task::spawn_blocking(move || {
        eprint!("{prompt}");
        std::io::stderr().flush().ok()?;
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_ascii_lowercase()),
        }
    })
    .await
    .ok()
    .flatten()
}

fn analyze(config: &Config, path: &Path, models: bool) -> Result<()> {
    let img = image::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .to_rgba8();
    let (width, height) = img.dimensions();
    let frame = Frame::from_rgba(img.into_raw(), width, height)?.to_canonical()?;

    let quality = quality_report(&frame);
    println!("quality: {}", serde_json::to_string(&quality)?);

    let presence = HeuristicSynthesizer.presence(&frame);
    println!(
        "heuristic presence: {:?} ({:.2})",
        presence.tier(),
        presence.confidence
    );
    let features = HeuristicSynthesizer.synthesize(&frame, chrono::Utc::now());
    println!("{}", Descriptor::HeuristicFeatures(features).encode()?);

    if models {
        let mut analyzer: Box<dyn FaceAnalyzer> = config.model_paths().load()?;
        let result = analyzer.analyze(&frame)?;
        println!(
            "model detection: {:?} ({:.2})",
            result.tier(),
            result.confidence
        );
        if let Some(embedding) = result.embedding {
            println!("{}", Descriptor::MlEmbedding(embedding.values).encode()?);
        }
    }
    Ok(())
}

fn read_descriptor(path: &Path) -> Result<Descriptor> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(Descriptor::decode(text.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clockface_session::{CaptureController, FailureReason, Rejection};

    fn answered(state: SessionState) -> SessionView {
        let mut view = CaptureController::new().view();
        view.state = state;
        view.attempts = 1;
        view
    }

    fn no_match(pin_available: bool) -> Rejection {
        Rejection {
            reason: FailureReason::NoMatch,
            remediation: FailureReason::NoMatch.remediation(),
            message: None,
            pin_available,
        }
    }

    #[test]
    fn test_failed_submission_asks_to_resubmit() {
        let mut view = answered(SessionState::Captured);
        view.notice = Some("Could not reach the attendance server.".to_string());
        assert_eq!(after_submission(&view, 1), Next::Resubmit);
        assert_eq!(after_submission(&view, MAX_FACE_ATTEMPTS), Next::GiveUp);
    }

    #[test]
    fn test_rejection_routes_to_pin_or_recapture() {
        let mut view = answered(SessionState::Detecting);
        view.rejection = Some(no_match(false));
        assert_eq!(after_submission(&view, 1), Next::Recapture);

        view.rejection = Some(no_match(true));
        view.pin_available = true;
        assert_eq!(after_submission(&view, 1), Next::Pin);
    }

    #[test]
    fn test_accepted_finishes() {
        assert_eq!(after_submission(&answered(SessionState::Done), 1), Next::Finished);
    }
}
