//! Label extraction - enrich an address table with Lizard hazard labels

use anyhow::{Context, Result};
use hazard_labels::extraction::fetch::{LizardClient, DEFAULT_BASE_URL};
use hazard_labels::extraction::resolve::{resolve_all, ResolveOptions};
use hazard_labels::extraction::utils::capture_valid_at;
use hazard_labels::extraction::write::{prepare_output_dir, write_output, OutputFormat, LOG_FILE};
use hazard_labels::extraction::{parse, RunStats, RETRY_ATTEMPTS};
use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Captured once so every label query in this run uses the same cutoff
    let valid_at = capture_valid_at();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    let prompted = credentials(
        config.username.clone(),
        config.password.clone(),
        ask_username,
        ask_password,
    );
    let (username, password) = match prompted {
        Ok(credentials) => credentials,
        Err(e) => {
            eprintln!("Can't read credentials: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(&config.output_dir) {
        eprintln!("Can't set up logging: {:#}", e);
        std::process::exit(1);
    }

    println!("🏠 Extracting labels from {:?}", config.input_path);
    info!("Starting label extraction (valid_at: {})", valid_at);

    let options = ResolveOptions {
        attempts: config.retry_attempts,
        ..ResolveOptions::new(valid_at)
    };

    match run(&config, &username, &password, options).await {
        Ok(stats) => {
            info!("Label extraction complete: {}", stats);
            println!("✅ Done: {}", stats);
        }
        Err(e) => {
            error!("Label extraction failed: {:#}", e);
            println!("❌ {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run(
    config: &Config,
    username: &str,
    password: &str,
    options: ResolveOptions,
) -> Result<RunStats> {
    // Step 1: Log in; nothing is resolved without a session
    let client = LizardClient::login(&config.base_url, username, password)
        .await
        .context("Login failed")?;

    // Step 2: Read the input table
    let table = parse::read_table(&config.input_path).with_context(|| {
        format!(
            "Can't open input file, is the input file named {:?}?",
            config.input_path
        )
    })?;
    let rows = parse::extract_address_rows(&table)?;

    let rows = if config.limit_rows > 0 && config.limit_rows < rows.len() {
        warn!("Limiting to first {} rows (testing mode)", config.limit_rows);
        rows.into_iter().take(config.limit_rows).collect()
    } else {
        rows
    };

    // Step 3: Resolve labels row by row
    let (resolved, stats) = resolve_all(&client, &rows, &options, |row| {
        println!(
            "Extracting labels for {}, {}",
            row.house_number.as_deref().unwrap_or("-"),
            row.postcode.as_deref().unwrap_or("-")
        );
    })
    .await;

    // Step 4: Write the enriched table once
    let path = write_output(
        &config.output_dir,
        OutputFormat::for_input(&config.input_path),
        &table.headers,
        &resolved,
        &options.label_types,
    )?;
    println!("📄 Output written to {:?}", path);

    Ok(stats)
}

/// Log to `{output_dir}/logging.log`, truncated per run
fn init_logging(output_dir: &Path) -> Result<()> {
    prepare_output_dir(output_dir)?;
    let log_path = output_dir.join(LOG_FILE);
    let log_file = fs::File::create(&log_path)
        .with_context(|| format!("Unable to create log file {:?}", log_path))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .with_target(true)
        .init();

    Ok(())
}

/// Configuration loaded from environment variables
#[derive(Clone)]
struct Config {
    base_url: String,
    username: Option<String>, // prompted for when unset
    password: Option<String>, // prompted for (hidden) when unset
    input_path: PathBuf,
    output_dir: PathBuf,
    retry_attempts: u32,
    limit_rows: usize, // 0 = no limit
}

impl Config {
    fn from_env() -> Result<Self> {
        Ok(Config {
            base_url: env::var("LIZARD_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),

            username: env::var("LIZARD_USERNAME").ok(),

            password: env::var("LIZARD_PASSWORD").ok(),

            // First argument overrides INPUT_PATH
            input_path: env::args()
                .nth(1)
                .or_else(|| env::var("INPUT_PATH").ok())
                .unwrap_or_else(|| "input/input.xlsx".to_string())
                .into(),

            output_dir: env::var("OUTPUT_DIR")
                .unwrap_or_else(|_| "output".to_string())
                .into(),

            retry_attempts: parse_retry_attempts(env::var("RETRY_ATTEMPTS").ok())?,

            limit_rows: parse_limit_rows(env::var("LIMIT_ROWS").ok())?,
        })
    }
}

/// Unset means the default; zero attempts would never query a label
fn parse_retry_attempts(raw: Option<String>) -> Result<u32> {
    let Some(raw) = raw else {
        return Ok(RETRY_ATTEMPTS);
    };
    let attempts: u32 = raw
        .trim()
        .parse()
        .context("RETRY_ATTEMPTS must be a valid number")?;
    if attempts < 1 {
        return Err(anyhow::anyhow!("RETRY_ATTEMPTS must be at least 1"));
    }
    Ok(attempts)
}

/// Unset means no limit
fn parse_limit_rows(raw: Option<String>) -> Result<usize> {
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .context("LIMIT_ROWS must be a valid number"),
        None => Ok(0),
    }
}

/// Fill in missing credentials interactively; the password prompt is told the username
fn credentials<U, P>(
    username: Option<String>,
    password: Option<String>,
    ask_username: U,
    ask_password: P,
) -> Result<(String, String)>
where
    U: FnOnce() -> io::Result<String>,
    P: FnOnce(&str) -> io::Result<String>,
{
    let username = match username.filter(|u| !u.trim().is_empty()) {
        Some(username) => username,
        None => ask_username().context("Unable to read username")?,
    };
    let username = username.trim().to_string();
    if username.is_empty() {
        return Err(anyhow::anyhow!("A Lizard username is required"));
    }

    let password = match password {
        Some(password) => password,
        None => ask_password(&username).context("Unable to read password")?,
    };

    Ok((username, password))
}

fn ask_username() -> io::Result<String> {
    print!("Username: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn ask_password(username: &str) -> io::Result<String> {
    rpassword::prompt_password(format!("Password for {}: ", username))
}
