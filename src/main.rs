use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use supface::audit::{AuditSink, FanoutAuditSink, JsonlAuditSink, MemoryAuditSink, Severity, TracingAuditSink};
use supface::camera::{CaptureController, CaptureDevice, CaptureSpool, StillImageDevice, V4lCamera};
use supface::core::{AuthAction, AuthState, AuthenticationWorkflow, EnrollmentState, EnrollmentWorkflow};
use supface::protocol::{EnrollmentProfile, RiskProfile};
use supface::{Config, DevMode, RecognitionClient};

#[derive(Parser)]
#[command(name = "supface")]
#[command(about = "Face enrollment and authentication client")]
struct Cli {
    /// Enable development mode (keeps captures and the audit log under ./dev_data)
    #[arg(long, global = true)]
    dev: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the recognition service is up and has its models loaded
    Health,
    /// List V4L2 cameras
    Cameras,
    /// Enroll a face for a subject
    Enroll {
        #[arg(short, long)]
        user: String,
        /// Use an image file instead of the camera
        #[arg(long)]
        image: Option<PathBuf>,
        /// Record that enrollment was skipped and exit
        #[arg(long)]
        skip: bool,
        #[arg(long, value_enum)]
        risk_profile: Option<RiskArg>,
        #[arg(long)]
        risk_score: Option<f64>,
    },
    /// Authenticate whoever is in front of the camera
    Authenticate {
        /// Use an image file instead of the camera
        #[arg(long)]
        image: Option<PathBuf>,
        /// Identifier the user claims to be (audit only)
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Show whether a subject has an enrollment
    Status {
        #[arg(short, long)]
        user: String,
    },
    /// Delete a subject's enrollment
    Delete {
        #[arg(short, long)]
        user: String,
    },
    /// List enrolled subjects
    List,
}

#[derive(Clone, Copy, ValueEnum)]
enum RiskArg {
    Conservative,
    Moderate,
    Impulsive,
}

impl From<RiskArg> for RiskProfile {
    fn from(arg: RiskArg) -> Self {
        match arg {
            RiskArg::Conservative => RiskProfile::Conservative,
            RiskArg::Moderate => RiskProfile::Moderate,
            RiskArg::Impulsive => RiskProfile::Impulsive,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on mode
    setup_logging(cli.dev);

    // Create dev mode context
    let dev_mode = DevMode::new(cli.dev)?;
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load_or_default(&dev_mode.config_file())?,
    };

    let recent = Arc::new(MemoryAuditSink::new(config.audit.memory_capacity));
    let journal = Arc::new(JsonlAuditSink::new(audit_log_path(&config, &dev_mode)));
    let audit: Arc<dyn AuditSink> = Arc::new(
        FanoutAuditSink::new()
            .with(Arc::new(TracingAuditSink))
            .with(journal.clone())
            .with(recent.clone()),
    );
    let client = Arc::new(RecognitionClient::new(&config.backend)?.with_audit(Arc::clone(&audit)));

    let outcome = run(cli.command, &config, &dev_mode, client, audit).await;
    journal.flush().await;

    if dev_mode.is_enabled() && !recent.is_empty() {
        println!(
            "\n{} audit event(s) this run, {} high severity; full log in {}",
            recent.len(),
            recent.at_least(Severity::High).len(),
            dev_mode.audit_log_path().display()
        );
    }
    outcome
}

async fn run(
    command: Commands,
    config: &Config,
    dev_mode: &DevMode,
    client: Arc<RecognitionClient>,
    audit: Arc<dyn AuditSink>,
) -> Result<()> {
    match command {
        Commands::Health => {
            println!("Checking recognition service at {} ...", client.base_url());
            match client.service_info().await {
                Ok(info) => println!("   {} (version {})", info.message, info.version),
                Err(e) => println!("   Service info unavailable: {}", e),
            }

            let health = client.check_health().await;
            if health.healthy {
                println!("✅ Healthy, {} registered face(s)", health.registered_count);
            } else {
                println!("❌ Unhealthy: {}", health.reason());
                bail!("Recognition service unhealthy");
            }
        }
        Commands::Cameras => {
            let cameras = V4lCamera::list_all_cameras()?;
            if cameras.is_empty() {
                println!("❌ No cameras found!");
                println!("   Ensure you have permission to access /dev/video*");
                return Ok(());
            }
            for camera in cameras {
                println!("📷 /dev/video{}: {}", camera.index, camera.name);
                println!("   formats: {}", camera.formats.join(", "));
                if !camera.can_capture {
                    println!("   (no video capture support)");
                }
            }
            println!("\ndevice_index = 999 picks the first capture-capable device");
        }
        Commands::Enroll { user, image, skip, risk_profile, risk_score } => {
            let profile = EnrollmentProfile {
                risk_profile: risk_profile.map(RiskProfile::from),
                risk_score,
                ..Default::default()
            };
            let spool = CaptureSpool::new(dev_mode.captures_dir(), dev_mode.keep_captures());

            match image {
                Some(path) => {
                    let camera = CaptureController::new(StillImageDevice::new(path), spool);
                    let flow = EnrollmentWorkflow::new(camera, client, audit, config.enrollment.clone(), user)
                        .with_profile(profile);
                    run_enrollment(flow, skip).await?;
                }
                None => {
                    let camera = CaptureController::new(V4lCamera::new(&config.camera), spool);
                    let flow = EnrollmentWorkflow::new(camera, client, audit, config.enrollment.clone(), user)
                        .with_profile(profile);
                    run_enrollment(flow, skip).await?;
                }
            }
        }
        Commands::Authenticate { image, user } => {
            let spool = CaptureSpool::new(dev_mode.captures_dir(), dev_mode.keep_captures());

            match image {
                Some(path) => {
                    let camera = CaptureController::new(StillImageDevice::new(path), spool);
                    let flow = AuthenticationWorkflow::new(camera, client, audit, config.auth.clone());
                    run_authentication(with_claim(flow, user)).await?;
                }
                None => {
                    let camera = CaptureController::new(V4lCamera::new(&config.camera), spool);
                    let flow = AuthenticationWorkflow::new(camera, client, audit, config.auth.clone());
                    run_authentication(with_claim(flow, user)).await?;
                }
            }
        }
        Commands::Status { user } => {
            let status = client.get_status(&user).await;
            if status.registered {
                println!("✅ {} has a face enrollment", user);
                if let Some(profile) = status.profile {
                    println!("   profile: {}", profile);
                }
            } else {
                println!("❌ {} has no face enrollment", user);
            }
        }
        Commands::Delete { user } => {
            let result = client.delete_enrollment(&user).await.context("Delete failed")?;
            println!("✅ {}", result.message.unwrap_or_else(|| format!("Deleted enrollment for {}", user)));
        }
        Commands::List => {
            let users = client.list_enrollments().await.context("Listing enrollments failed")?;
            println!("{} enrolled subject(s)", users.len());
            for user in users {
                println!("  - {}", user);
            }
        }
    }

    Ok(())
}

fn setup_logging(dev_mode: bool) {
    if dev_mode {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();
    }
}

fn audit_log_path(config: &Config, dev_mode: &DevMode) -> PathBuf {
    match (&config.audit.log_path, dev_mode.is_enabled()) {
        (Some(path), false) => path.clone(),
        _ => dev_mode.audit_log_path(),
    }
}

fn with_claim<D: CaptureDevice>(
    flow: AuthenticationWorkflow<D, RecognitionClient>,
    user: Option<String>,
) -> AuthenticationWorkflow<D, RecognitionClient> {
    match user {
        Some(user) => flow.with_claimed_subject(user),
        None => flow,
    }
}

async fn run_enrollment<D: CaptureDevice>(
    mut flow: EnrollmentWorkflow<D, RecognitionClient>,
    skip: bool,
) -> Result<()> {
    if skip {
        flow.skip();
        println!("Face enrollment skipped for {}. You can enroll later.", flow.subject_id());
        return Ok(());
    }

    println!("Enrolling face for {} ...", flow.subject_id());
    let mut state = flow.start().await;
    loop {
        state = match state {
            EnrollmentState::Capturing => {
                println!("Look at the camera...");
                let next = flow.capture().await;
                if next == EnrollmentState::Capturing {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                next
            }
            EnrollmentState::Blocked { reason } => {
                println!("❌ Cannot reach the recognition service: {}", reason);
                match prompt("[r]etry or [c]ancel? ")?.as_str() {
                    "r" => flow.retry().await,
                    _ => flow.cancel(),
                }
            }
            EnrollmentState::Failed { message } | EnrollmentState::Idle { notice: Some(message) } => {
                println!("❌ {}", message);
                match prompt("[r]etry, [s]kip or [c]ancel? ")?.as_str() {
                    "r" => flow.retry().await,
                    "s" => flow.skip(),
                    _ => flow.cancel(),
                }
            }
            EnrollmentState::Idle { notice: None } | EnrollmentState::HealthChecking => flow.start().await,
            EnrollmentState::Processing => bail!("Registration is still in flight"),
            EnrollmentState::Success(result) => {
                println!("✅ {}", result.message.unwrap_or_else(|| "Face registered".to_string()));
                tokio::time::sleep(flow.dismiss_delay()).await;
                return Ok(());
            }
            EnrollmentState::Skipped => {
                println!("Face enrollment skipped. You can enroll later.");
                return Ok(());
            }
            EnrollmentState::Dismissed => bail!("Enrollment cancelled"),
        };
    }
}

async fn run_authentication<D: CaptureDevice>(mut flow: AuthenticationWorkflow<D, RecognitionClient>) -> Result<()> {
    println!("Attempts remaining: {}", flow.attempts().remaining());
    let mut state = flow.start().await;
    loop {
        state = match state {
            AuthState::Capturing => {
                println!("Look at the camera...");
                let next = flow.capture().await;
                if next == AuthState::Capturing {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                next
            }
            AuthState::Idle { notice: Some(notice), .. } => {
                println!("❌ {}", notice);
                match prompt("[r]etry or use [p]assword? ")?.as_str() {
                    "r" if state_offers(&flow, AuthAction::Retry) => flow.retry().await,
                    _ => flow.use_alternate(),
                }
            }
            AuthState::Idle { notice: None, .. } => flow.start().await,
            AuthState::Processing => bail!("Authentication is still in flight"),
            AuthState::Success(grant) => {
                println!("✅ Welcome, {} (confidence {:.1}%)", grant.subject_id, grant.confidence * 100.0);
                println!("   session expires {}", grant.expires_at.format("%Y-%m-%d %H:%M:%S UTC"));
                tokio::time::sleep(flow.dismiss_delay()).await;
                return Ok(());
            }
            AuthState::LockedOut => {
                println!("🔒 Too many failed attempts. Use your password to log in.");
                bail!("Face authentication locked out");
            }
            AuthState::SwitchedToAlternate => {
                println!("Use your password to log in.");
                bail!("Face authentication abandoned");
            }
        };
    }
}

fn state_offers<D: CaptureDevice>(flow: &AuthenticationWorkflow<D, RecognitionClient>, action: AuthAction) -> bool {
    flow.current_state().actions().contains(&action)
}

/// Reads one lowercase answer; end of input counts as an empty answer.
fn prompt(question: &str) -> Result<String> {
    print!("{}", question);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_lowercase())
}
