use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use jobkeeper::{
  CronExpr, DesiredState, HostConfig, JobDefinition, JobHost, JobStore, SqliteStore,
};

#[derive(Parser)]
#[command(name = "jobkeeper", about = "Cron job host with a reconciled job table")]
struct Cli {
  /// TOML configuration file
  #[arg(short, long, default_value = "jobkeeper.toml")]
  config: PathBuf,

  /// Job database path (overrides config)
  #[arg(long)]
  db: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the host until Ctrl-C
  Run,
  /// Add a job definition in the Starting state
  Add {
    /// Display name
    #[arg(short, long)]
    name: String,
    /// Handler assembly (artifact locator)
    #[arg(short, long)]
    assembly: String,
    /// Handler class name
    #[arg(short = 'k', long)]
    class: String,
    /// Cron expression (seconds first), e.g. "0 */5 * * * *"
    #[arg(long)]
    cron: String,
    /// Argument string passed to the handler
    #[arg(long, default_value = "")]
    args: String,
    #[arg(short, long, default_value = "")]
    description: String,
    /// Human-readable schedule description
    #[arg(long, default_value = "")]
    cron_description: String,
  },
  /// List job definitions
  Jobs,
  /// Show the log of one job
  Logs { id: i64 },
  /// Request a state change (start, stop, update, fire-now)
  State { id: i64, state: String },
}

fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,jobkeeper=info")),
    )
    .init();

  let cli = Cli::parse();
  let mut config = HostConfig::load(&cli.config)
    .with_context(|| format!("loading {}", cli.config.display()))?;
  if let Some(db) = cli.db {
    config.database = db;
  }

  match cli.command {
    Commands::Run => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(run(config))?;
    }
    Commands::Add {
      name,
      assembly,
      class,
      cron,
      args,
      description,
      cron_description,
    } => {
      if let Err(e) = CronExpr::parse(&cron) {
        bail!("invalid cron expression {e}");
      }
      let store = open_store(&config)?;
      let mut job = JobDefinition::new(&name, &assembly, &class, &cron)
        .with_args(&args)
        .with_description(&description)
        .with_creator("cli");
      job.cron_description = cron_description;
      let id = store.insert_job(&job)?;
      println!("Added job {id} ({name}), state Starting");
    }
    Commands::Jobs => {
      let store = open_store(&config)?;
      println!(
        "{:>5}  {:<8}  {:<8}  {:<20}  {:<24}  NAME",
        "ID", "LEVEL", "STATE", "CRON", "HANDLER"
      );
      for job in store.list_jobs()? {
        let state = if job.disabled {
          format!("{} (disabled)", job.state)
        } else {
          job.state.to_string()
        };
        println!(
          "{:>5}  {:<8}  {:<8}  {:<20}  {:<24}  {}",
          job.id,
          job.level.as_str(),
          state,
          job.cron_expression,
          format!("{}/{}", job.assembly_name, job.class_name),
          job.name
        );
      }
    }
    Commands::Logs { id } => {
      let store = open_store(&config)?;
      for log in store.job_logs(id)? {
        println!(
          "{}  {:<7}  {:>6} ms  {}",
          log.fire_time.format("%Y-%m-%d %H:%M:%S"),
          log.fire_state.as_str(),
          log.fire_duration,
          log.content
        );
      }
    }
    Commands::State { id, state } => {
      let state: DesiredState = state.parse()?;
      if !state.is_pending() {
        bail!("`{state}` is set by the reconciler; request start, stop, update or fire-now");
      }
      let store = open_store(&config)?;
      let job = store
        .get_job(id)?
        .with_context(|| format!("job {id} not found"))?;
      if job.is_system() && state == DesiredState::Stopping {
        bail!("the system job cannot be stopped");
      }
      store.update_state(id, state)?;
      println!("Job {id} ({}) -> {state}", job.name);
    }
  }

  Ok(())
}

fn open_store(config: &HostConfig) -> anyhow::Result<Arc<SqliteStore>> {
  let store = SqliteStore::open(&config.database)
    .with_context(|| format!("opening {}", config.database.display()))?;
  Ok(Arc::new(store))
}

async fn run(config: HostConfig) -> anyhow::Result<()> {
  let host = JobHost::builder().config(config).build()?;
  host.on_start().await?;

  tokio::signal::ctrl_c().await?;
  tracing::info!("Ctrl-C received, stopping.");
  host.on_stop().await?;
  Ok(())
}
