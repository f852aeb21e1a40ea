use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde_json::Value;

use glucose_pipeline::{
    Adapter, CgmAdapter, DrainMode, DrainReport, GlucosePipeline, QueueName, WorkOptions,
};

#[derive(Parser)]
#[command(name = "glucopipe", about = "CGM ingestion and weekly glucose report pipeline")]
struct Cli {
    /// Database path (default: ~/.glucopipe/glucopipe.db)
    #[arg(long)]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show pipeline status
    Status,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Manage report recipients
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Manage vendor OAuth credentials
    Credentials {
        #[command(subcommand)]
        action: CredentialsAction,
    },
    /// Fan out one message per user onto a queue
    Coordinate {
        /// Queue to fill: ingest or process
        queue: QueueName,
    },
    /// Drain a queue
    Work {
        /// Queue to drain: ingest, process or notify
        queue: QueueName,
        /// Messages received per batch
        #[arg(long, default_value = "10")]
        batch_size: usize,
        /// Reference date (YYYY-MM-DD, default: today UTC)
        #[arg(long)]
        as_of: Option<NaiveDate>,
        /// Keep going after a failed batch until the queue is empty
        #[arg(long)]
        until_empty: bool,
    },
    /// Run one full cycle: ingest, process, notify
    Run {
        /// Reference date (YYYY-MM-DD, default: today UTC)
        #[arg(long)]
        as_of: Option<NaiveDate>,
        /// Messages received per batch
        #[arg(long, default_value = "10")]
        batch_size: usize,
    },
    /// Normalize a saved vendor response offline
    Normalize {
        /// JSON file: an array of records or a {"records": [...]} envelope
        file: String,
        #[arg(long)]
        user_id: String,
        /// UTC day the readings belong to (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,
        /// Vendor tag
        #[arg(long, default_value = "dexcom")]
        source: String,
    },
    /// Inspect stored reports
    Report {
        #[command(subcommand)]
        action: ReportAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
}

#[derive(Subcommand)]
enum UserAction {
    /// Add or update a user
    Add {
        user_id: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        first_name: String,
    },
    /// Stop generating reports for a user
    Deactivate { user_id: String },
    /// Reactivate a user
    Activate { user_id: String },
    /// List users
    List,
}

#[derive(Subcommand)]
enum CredentialsAction {
    /// Store tokens from the vendor OAuth flow
    Set {
        user_id: String,
        #[arg(long)]
        access_token: String,
        #[arg(long)]
        refresh_token: String,
        /// Seconds until the access token expires
        #[arg(long, default_value = "7200")]
        expires_in: i64,
    },
    /// List stored credentials (tokens redacted)
    List,
}

#[derive(Subcommand)]
enum ReportAction {
    /// Show a user's report
    Show {
        user_id: String,
        /// Period end date (YYYY-MM-DD, default: latest)
        #[arg(long)]
        period_end: Option<NaiveDate>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List dead-lettered queue messages
    DeadLetters,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Commands::Normalize {
        file,
        user_id,
        date,
        source,
    } = &cli.command
    {
        return handle_normalize(file, user_id, *date, source);
    }

    let db = match &cli.db {
        Some(path) => glucose_pipeline::Database::open_at(path).await?,
        None => glucose_pipeline::Database::open().await?,
    };
    let gp = GlucosePipeline::load(db).await?;

    match cli.command {
        Commands::Status => print_status(&gp).await?,
        Commands::Config { action } => handle_config(&gp, action).await?,
        Commands::User { action } => handle_user(&gp, action).await?,
        Commands::Credentials { action } => handle_credentials(&gp, action).await?,
        Commands::Coordinate { queue } => {
            let report = match queue {
                QueueName::Ingestion => gp.coordinate_ingestion().await?,
                QueueName::Processing => gp.coordinate_processing().await?,
                QueueName::Notification => {
                    anyhow::bail!("Notifications are enqueued by the process stage. Use: ingest, process")
                }
            };
            println!(
                "Enqueued {} of {} user(s) onto {queue} ({} failed)",
                report.enqueued, report.total_users, report.failed
            );
        }
        Commands::Work {
            queue,
            batch_size,
            as_of,
            until_empty,
        } => {
            let options = WorkOptions {
                batch_size,
                as_of,
                mode: if until_empty {
                    DrainMode::UntilEmpty
                } else {
                    DrainMode::StopOnFailure
                },
            };
            let report = match queue {
                QueueName::Ingestion => gp.work_ingestion(&options).await?,
                QueueName::Processing => gp.work_processing(&options).await?,
                QueueName::Notification => gp.work_notification(&options).await?,
            };
            print_drain_report(&report);
            if !report.is_clean() {
                std::process::exit(1);
            }
        }
        Commands::Run { as_of, batch_size } => {
            let options = WorkOptions {
                batch_size,
                as_of,
                ..Default::default()
            };
            let cycle = gp.run_cycle(&options).await?;
            println!(
                "Ingestion: enqueued {} of {} user(s)",
                cycle.ingestion.enqueued, cycle.ingestion.total_users
            );
            print_drain_report(&cycle.ingested);
            println!(
                "Processing: enqueued {} of {} user(s)",
                cycle.processing.enqueued, cycle.processing.total_users
            );
            print_drain_report(&cycle.processed);
            print_drain_report(&cycle.notified);
        }
        Commands::Report { action } => handle_report(&gp, action).await?,
        Commands::Normalize { .. } => {}
    }

    Ok(())
}

fn print_drain_report(report: &DrainReport) {
    println!(
        "  {}: {} batch(es), {} acked, {} failed batch(es), {} dead-lettered",
        report.queue, report.batches, report.acked, report.failed_batches, report.dead_lettered
    );
    if let Some(err) = &report.last_error {
        println!("    Last error: {err}");
    }
}

async fn print_status(gp: &GlucosePipeline) -> anyhow::Result<()> {
    let s = gp.status().await?;
    println!("Pipeline Status");
    println!("  Users:       {} ({} active)", s.users, s.active_users);
    println!("  Credentials: {}", s.credentials);
    println!("  Datasets:    {}", s.datasets);
    println!("  Reports:     {}", s.reports);
    println!("  Queued:      {}", s.pending_messages);
    println!("  In flight:   {}", s.in_flight_messages);
    println!("  Dead:        {}", s.dead_messages);
    println!("  Outbox:      {}", s.outbox);
    Ok(())
}

fn display_value(key: &str, value: &str) -> String {
    if glucose_pipeline::config::is_secret_key(key) {
        "********".to_string()
    } else {
        value.to_string()
    }
}

async fn handle_config(gp: &GlucosePipeline, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => match gp.config_get(&key).await? {
            Some(v) => println!("{key} = {}", display_value(&key, &v)),
            None => println!("{key} is not set"),
        },
        ConfigAction::Set { key, value } => {
            gp.config_set(&key, &value).await?;
            println!("Config updated.");
        }
        ConfigAction::List => {
            let items = gp.config_list().await?;
            if items.is_empty() {
                println!("No configuration set.");
            } else {
                for (k, v) in items {
                    println!("{k} = {}", display_value(&k, &v));
                }
            }
        }
    }
    Ok(())
}

async fn handle_user(gp: &GlucosePipeline, action: UserAction) -> anyhow::Result<()> {
    match action {
        UserAction::Add {
            user_id,
            email,
            first_name,
        } => {
            gp.user_add(&user_id, &email, &first_name).await?;
            println!("Saved user {user_id}");
        }
        UserAction::Deactivate { user_id } => set_active(gp, &user_id, false).await?,
        UserAction::Activate { user_id } => set_active(gp, &user_id, true).await?,
        UserAction::List => {
            let users = gp.user_list().await?;
            if users.is_empty() {
                println!("No users.");
            }
            for u in users {
                let state = if u.is_active { "active" } else { "inactive" };
                println!("  {:<24} {:<32} {:<16} {state}", u.user_id, u.email, u.first_name);
            }
        }
    }
    Ok(())
}

async fn set_active(gp: &GlucosePipeline, user_id: &str, active: bool) -> anyhow::Result<()> {
    if !gp.user_set_active(user_id, active).await? {
        anyhow::bail!("Unknown user: {user_id}");
    }
    let state = if active { "Activated" } else { "Deactivated" };
    println!("{state} user {user_id}");
    Ok(())
}

async fn handle_credentials(gp: &GlucosePipeline, action: CredentialsAction) -> anyhow::Result<()> {
    match action {
        CredentialsAction::Set {
            user_id,
            access_token,
            refresh_token,
            expires_in,
        } => {
            let expires_at = gp
                .credentials_set(&user_id, &access_token, &refresh_token, expires_in)
                .await?;
            println!("Saved credentials for {user_id} (expires {})", expires_at.to_rfc3339());
        }
        CredentialsAction::List => {
            let creds = gp.credentials_list().await?;
            if creds.is_empty() {
                println!("No credentials stored.");
            }
            let now = Utc::now();
            for c in creds {
                let flag = if glucose_pipeline::tokens::is_expired(&c, now) {
                    " (refresh due)"
                } else {
                    ""
                };
                println!(
                    "  {:<24} expires {}{flag}",
                    c.user_id,
                    c.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
        }
    }
    Ok(())
}

async fn handle_report(gp: &GlucosePipeline, action: ReportAction) -> anyhow::Result<()> {
    match action {
        ReportAction::Show {
            user_id,
            period_end,
            json,
        } => {
            let report = gp
                .report(&user_id, period_end)
                .await?
                .ok_or_else(|| anyhow::anyhow!("No report found for user {user_id}"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }
            let a = &report.aggregates;
            println!("Report {} ({} days)", report.report_key, report.days_included);
            println!("  Period:        {} to {}", report.period_start, report.period_end);
            println!("  Average:       {:.0} mg/dL", a.avg_glucose);
            println!("  Time in range: {:.1}%", a.time_in_range_pct);
            if let Some(gmi) = a.gmi() {
                println!("  GMI:           {gmi:.1}%");
            }
            println!("  CGM active:    {:.1}%", a.cgm_active_pct);
            println!("  Readings:      {}", a.total_readings);
            println!();
            for line in &report.insights {
                println!("  {line}");
            }
        }
        ReportAction::DeadLetters => {
            let dead = gp.dead_letters().await?;
            if dead.is_empty() {
                println!("No dead-lettered messages.");
            }
            for d in dead {
                println!(
                    "  [{}] #{} after {} receive(s): {}",
                    d.queue,
                    d.id,
                    d.receive_count,
                    d.last_error.as_deref().unwrap_or("unknown error")
                );
                println!("      {}", d.body);
            }
        }
    }
    Ok(())
}

fn handle_normalize(file: &str, user_id: &str, date: NaiveDate, source: &str) -> anyhow::Result<()> {
    let adapter =
        Adapter::for_source(source).ok_or_else(|| anyhow::anyhow!("Unknown source: {source}"))?;
    let text = std::fs::read_to_string(file)?;
    let records = match serde_json::from_str::<Value>(&text)? {
        Value::Array(records) => records,
        Value::Object(mut envelope) => match envelope
            .remove("records")
            .or_else(|| envelope.remove("egvs"))
        {
            Some(Value::Array(records)) => records,
            _ => anyhow::bail!("Expected a \"records\" or \"egvs\" array in {file}"),
        },
        _ => anyhow::bail!("Expected a JSON array or object in {file}"),
    };

    let normalized = adapter.normalize_dataset(user_id, date, Utc::now(), &records)?;
    println!("{}", serde_json::to_string_pretty(&normalized.dataset)?);
    let stats = normalized.stats;
    eprintln!(
        "Total: {}, Success: {}, Skipped: {}, Errors: {}",
        stats.total, stats.normalized, stats.skipped, stats.errored
    );
    if stats.is_degraded() {
        eprintln!(
            "Warning: {:.1}% of records failed to normalize",
            stats.failure_rate() * 100.0
        );
    }
    Ok(())
}
