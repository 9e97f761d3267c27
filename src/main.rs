//! Leadflow CLI
//!
//! Stateful customer-acquisition pipeline orchestration.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use leadflow::pipeline::{
    create_notifiers, ApprovalGate, GateToken, LeadId, LeadProfile, LeadStore, Orchestrator,
    Scheduler,
};
use leadflow::ports::Ports;
use leadflow::{Config, Error, Result};

#[derive(Parser)]
#[command(name = "leadflow")]
#[command(author, version, about = "Customer-acquisition pipeline orchestration")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the .leadflow directory
    Init,

    /// Ingest leads from a JSON dataset
    Discover {
        /// Path to a JSON array of lead profiles
        file: PathBuf,
    },

    /// Run the scheduler loop
    Run {
        /// Maximum ticks (0 = run until interrupted)
        #[arg(long, short, default_value = "0")]
        ticks: u64,

        /// Use simulated ports instead of configured adapters
        #[arg(long)]
        demo: bool,
    },

    /// Show one lead in detail
    Status {
        /// Lead ID
        lead: String,
    },

    /// List leads, optionally filtered by stage
    Leads {
        /// Only show leads in this stage
        #[arg(long)]
        stage: Option<String>,
    },

    /// Aggregate counts per stage plus analytics digests
    Report,

    /// List pending approvals
    Approvals,

    /// Resolve a pending approval
    Resolve {
        /// Approval token (from `leadflow approvals`)
        token: String,

        /// Approve the action
        #[arg(long, conflicts_with = "reject")]
        approve: bool,

        /// Reject the action
        #[arg(long)]
        reject: bool,

        /// Optional note for the record
        #[arg(long, short)]
        message: Option<String>,
    },

    /// Force a lead to abandoned
    Abandon {
        /// Lead ID
        lead: String,
    },

    /// Re-trigger a failed lead from the stage it failed out of
    Reset {
        /// Lead ID
        lead: String,
    },

    /// Permanently remove a lead from the store
    Archive {
        /// Lead ID
        lead: String,
    },

    /// Attach a call transcript and analyze it
    Analyze {
        /// Lead ID
        lead: String,

        /// Path to the transcript text file
        #[arg(long, short)]
        transcript: PathBuf,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load config
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => {
            leadflow::config::init()?;
            info!("Initialized .leadflow directory");
        }

        Commands::Discover { file } => {
            let orchestrator = build_orchestrator(&config)?;
            let content = std::fs::read_to_string(&file)?;
            let profiles: Vec<LeadProfile> = serde_json::from_str(&content)?;
            let total = profiles.len();
            for profile in profiles {
                let id = orchestrator.discover(profile)?;
                println!("{}", orchestrator.status(id)?.summary());
            }
            info!("Discovered {} leads from {}", total, file.display());
        }

        Commands::Run { ticks, demo } => {
            if !demo {
                return Err(Error::Config(
                    "no port adapters configured; pass --demo for simulated \
                     services or embed leadflow as a library with real adapters"
                        .to_string(),
                ));
            }
            // Orchestrator and scheduler must share one store view
            let store = open_store(&config)?;
            let gate = open_gate(&config)?;
            let orchestrator = Arc::new(Orchestrator::new(
                store.clone(),
                gate,
                Ports::simulated(),
                config.clone(),
            ));
            let scheduler = Scheduler::new(orchestrator, store, config.clone());

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            ctrlc::set_handler(move || {
                let _ = shutdown_tx.send(true);
            })
            .map_err(|e| Error::Config(format!("signal handler: {}", e)))?;

            let max_ticks = if ticks == 0 { None } else { Some(ticks) };
            scheduler.run(shutdown_rx, max_ticks).await?;
        }

        Commands::Status { lead } => {
            let store = open_store(&config)?;
            let id: LeadId = lead.parse()?;
            let record = store.get(id)?;
            print_record(&record);
        }

        Commands::Leads { stage } => {
            let store = open_store(&config)?;
            let records = match stage {
                Some(s) => store.list_by_stage(s.parse()?),
                None => store.all(),
            };
            for record in records {
                println!("{}", record.summary());
            }
        }

        Commands::Report => {
            let store = open_store(&config)?;
            println!("Leads by stage:");
            for (stage, count) in store.counts_by_stage() {
                if count > 0 {
                    println!("  {:>4}  {}", count, stage);
                }
            }

            let analyzed: Vec<_> = store
                .all()
                .into_iter()
                .filter(|r| r.analytics.is_some())
                .collect();
            if !analyzed.is_empty() {
                println!("\nCall analytics:");
                for record in analyzed {
                    if let Some(summary) = &record.analytics {
                        println!(
                            "  {} ({:?}): {}",
                            record.profile.company_name, summary.sentiment, summary.summary
                        );
                    }
                }
            }
        }

        Commands::Approvals => {
            let gate = open_gate(&config)?;
            let pending = gate.pending();
            if pending.is_empty() {
                println!("No pending approvals");
            }
            for entry in pending {
                println!(
                    "{}  lead {}  {}\n  {}",
                    entry.token, entry.lead_id, entry.stage, entry.payload
                );
            }
        }

        Commands::Resolve {
            token,
            approve,
            reject,
            message,
        } => {
            if approve == reject {
                return Err(Error::Validation(
                    "pass exactly one of --approve or --reject".to_string(),
                ));
            }
            let gate = open_gate(&config)?;
            let token: GateToken = token.parse()?;
            let status = gate.resolve(token, approve, message)?;
            info!("Approval {} resolved: {:?}", token, status);
        }

        Commands::Abandon { lead } => {
            let orchestrator = build_orchestrator(&config)?;
            let id: LeadId = lead.parse()?;
            orchestrator.abandon(id)?;
        }

        Commands::Reset { lead } => {
            let orchestrator = build_orchestrator(&config)?;
            let id: LeadId = lead.parse()?;
            let stage = orchestrator.reset(id)?;
            println!("Lead {} resumed at {}", id, stage);
        }

        Commands::Archive { lead } => {
            let store = open_store(&config)?;
            let id: LeadId = lead.parse()?;
            let record = store.archive(id)?;
            info!(
                "Archived lead {} ({})",
                id, record.profile.company_name
            );
        }

        Commands::Analyze { lead, transcript } => {
            let orchestrator = build_orchestrator(&config)?;
            let id: LeadId = lead.parse()?;
            orchestrator.attach_transcript(id, &transcript.to_string_lossy())?;
            let outcome = orchestrator.run_analytics(id).await?;
            info!("Analytics for {}: {:?}", id, outcome);
            if let Some(summary) = orchestrator.status(id)?.analytics {
                println!("Sentiment: {:?}", summary.sentiment);
                println!("Summary: {}", summary.summary);
                for action in &summary.next_best_actions {
                    println!("  next: {}", action);
                }
            }
        }

        Commands::Config => match toml::to_string_pretty(&config) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("Failed to serialize config: {}", e),
        },
    }

    Ok(())
}

fn open_store(config: &Config) -> Result<Arc<LeadStore>> {
    Ok(Arc::new(LeadStore::open(&config.leads_dir())?))
}

fn open_gate(config: &Config) -> Result<Arc<ApprovalGate>> {
    let notifiers = create_notifiers(&config.notifications, &config.notify);
    Ok(Arc::new(ApprovalGate::open(
        &config.approvals_path(),
        notifiers,
    )?))
}

/// Wire up an orchestrator over the simulated port set. Real adapters are
/// provided by embedding the library; the binary only ships the sims, which
/// management commands never call anyway.
fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let store = open_store(config)?;
    let gate = open_gate(config)?;
    Ok(Orchestrator::new(
        store,
        gate,
        Ports::simulated(),
        config.clone(),
    ))
}

fn print_record(record: &leadflow::LeadRecord) {
    println!("Lead:      {}", record.id);
    println!("Company:   {}", record.profile.company_name);
    println!("Contact:   {}", record.profile.contact_email);
    println!("Stage:     {}", record.stage);
    if let Some(score) = record.intent_score {
        println!("Score:     {:.2}", score);
    }
    if let Some(draft) = &record.draft {
        println!("Draft:     {}", draft.subject);
    }
    if let Some(sent) = record.sent_at {
        println!("Sent:      {}", sent);
    }
    if let Some(reply) = &record.reply {
        println!("Reply:     {}", reply);
    }
    if let Some(slot) = record.meeting_slot {
        println!("Slot:      {}", slot);
    }
    if let Some(receipt) = &record.booking_receipt {
        println!("Booking:   {}", receipt);
    }
    if record.attempts_at(record.stage) > 0 {
        println!("Attempts:  {}", record.attempts_at(record.stage));
    }
    if let Some(error) = &record.last_error {
        println!("Last err:  {}", error);
    }
    println!("Version:   {}", record.version);
    println!("Updated:   {}", record.updated_at);
}
