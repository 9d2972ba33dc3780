use clap::Parser;
use decisionforge::config::{load_llm_config, load_sim_config};
use decisionforge::debate::AssignmentPolicy;
use decisionforge::extract::{ascii_process, ascii_stakeholders};
use decisionforge::gateway::OpenRouterGateway;
use decisionforge::pipeline::{run_simulation, SimulationInput};
use decisionforge::store::SimulationStore;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Simulate a multi-stakeholder negotiation over a decision dilemma.
#[derive(Parser, Debug)]
#[command(name = "decisionforge", version, about)]
struct Cli {
    /// The decision dilemma under negotiation
    #[arg(long)]
    dilemma: String,

    /// Free-text description of the decision-making process
    #[arg(long, default_value = "")]
    process_hint: String,

    /// External scenarios or constraints bearing on the decision
    #[arg(long, default_value = "")]
    scenarios: String,

    /// Number of debate rounds (defaults to one per extracted process step)
    #[arg(long)]
    rounds: Option<usize>,

    /// Wall-clock budget in seconds; the debate ends early when exceeded
    #[arg(long)]
    time_budget: Option<u64>,

    /// Seed for persona attribute sampling, for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Directory holding llm.json, simulation.json, and the run database
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Skip persisting the run to the database
    #[arg(long)]
    no_save: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "simulation failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let llm = load_llm_config(&cli.data_dir);
    if llm.api_key.is_empty() {
        return Err("no API key configured; set api_key in llm.json".into());
    }
    let sim = load_sim_config(&cli.data_dir);

    let gateway = OpenRouterGateway::new(&llm.api_key, &llm.model, &llm.base_url);
    let input = SimulationInput {
        dilemma: cli.dilemma,
        process_hint: cli.process_hint,
        scenarios: cli.scenarios,
        rounds: cli.rounds,
        time_budget_s: cli.time_budget,
        seed: cli.seed,
    };

    let run = run_simulation(&gateway, &sim, &input, &AssignmentPolicy::AllSpeak).await?;

    println!("{}", ascii_process(&run.structure.process));
    println!("{}", ascii_stakeholders(&run.structure.stakeholders));

    println!("=== Transcript ===");
    for entry in &run.transcript {
        println!("[Round {} | {}] {}: {}", entry.round, entry.step, entry.agent, entry.message);
    }

    println!("\n=== Summary ===");
    println!("{}", run.summary);
    println!("Keywords: {}", run.keywords.join(", "));
    println!("Suggestion: {}", run.suggestion);

    if !cli.no_save {
        std::fs::create_dir_all(&cli.data_dir)?;
        let db_path = cli.data_dir.join("simulations.sqlite");
        let store = SimulationStore::new(db_path.to_string_lossy().as_ref())?;
        let record = store.save_simulation(&run)?;
        println!("\nSaved run {}", record.id);
    }

    Ok(())
}
