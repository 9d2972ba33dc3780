use crate::config::SimConfig;
use crate::debate::{AssignmentPolicy, DebateOrchestrator, TranscriptEntry};
use crate::error::SimError;
use crate::extract::{DecisionStructure, Extractor};
use crate::gateway::Gateway;
use crate::personas::{Persona, PersonaSynthesizer};
use crate::summarize::{DebateSummary, Summarizer};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Caller-supplied inputs for one simulation run.
#[derive(Debug, Clone, Default)]
pub struct SimulationInput {
    pub dilemma: String,
    pub process_hint: String,
    pub scenarios: String,
    /// Overrides the round count; otherwise one round per extracted process step.
    pub rounds: Option<usize>,
    pub time_budget_s: Option<u64>,
    /// Seeds persona attribute sampling for reproducible runs.
    pub seed: Option<u64>,
}

/// Everything a completed run produced. The caller owns persistence.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SimulationRun {
    pub dilemma: String,
    pub process_hint: String,
    pub structure: DecisionStructure,
    pub personas: Vec<Persona>,
    pub transcript: Vec<TranscriptEntry>,
    pub summary: String,
    pub keywords: Vec<String>,
    pub suggestion: String,
}

/// Run the full pipeline: extraction, persona synthesis, debate, then
/// summarization. A pure function of its arguments plus the gateway; no
/// module-level state survives between runs.
///
/// Every stage absorbs gateway failures into deterministic fallbacks, so
/// this completes end-to-end even under total gateway unavailability. The
/// only errors are configuration mistakes caught before any gateway call.
pub async fn run_simulation(
    gateway: &dyn Gateway,
    config: &SimConfig,
    input: &SimulationInput,
    policy: &AssignmentPolicy,
) -> Result<SimulationRun, SimError> {
    config.validate()?;

    let structure = Extractor::new(gateway, config)
        .extract(&input.dilemma, &input.process_hint, &input.scenarios)
        .await;

    let mut rng = match input.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let personas = PersonaSynthesizer::new(gateway, config)
        .synthesize(&structure, &input.dilemma, &input.process_hint, &mut rng)
        .await;
    info!(personas = personas.len(), "personas ready");

    let round_count = input.rounds.unwrap_or_else(|| {
        if structure.process.is_empty() {
            config.debate_rounds
        } else {
            structure.process.len()
        }
    });

    let transcript = DebateOrchestrator::new(gateway, config)
        .run_debate(
            &personas,
            &input.dilemma,
            &input.process_hint,
            &structure,
            &input.scenarios,
            round_count,
            input.time_budget_s,
            policy,
        )
        .await?;

    let DebateSummary { summary, keywords, suggestion } =
        Summarizer::new(gateway, config).summarize(&transcript).await;
    info!(entries = transcript.len(), keywords = keywords.len(), "simulation complete");

    Ok(SimulationRun {
        dilemma: input.dilemma.clone(),
        process_hint: input.process_hint.clone(),
        structure,
        personas,
        transcript,
        summary,
        keywords,
        suggestion,
    })
}
