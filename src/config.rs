use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Provider connection settings, loaded from `llm.json` in the data directory.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_model() -> String {
    "anthropic/claude-sonnet-4-5".to_string()
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1/chat/completions".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            base_url: default_base_url(),
        }
    }
}

pub fn load_llm_config(dir: &Path) -> LlmConfig {
    let path = dir.join("llm.json");
    match fs::read_to_string(&path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
        Err(_) => LlmConfig::default(),
    }
}

pub fn save_llm_config(dir: &Path, config: &LlmConfig) -> Result<(), String> {
    fs::create_dir_all(dir).map_err(|e| e.to_string())?;
    let content = serde_json::to_string_pretty(config).map_err(|e| e.to_string())?;
    fs::write(dir.join("llm.json"), content).map_err(|e| e.to_string())?;
    Ok(())
}

/// All simulation policy values, passed explicitly into every stage.
///
/// Nothing in the pipeline reads module-level constants; swapping any of
/// these per test (or per caller) changes behavior without global state.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SimConfig {
    pub min_stakeholders: usize,
    pub max_stakeholders: usize,
    /// Default round count when the caller does not supply one.
    pub debate_rounds: usize,
    pub max_tokens: u32,
    pub timeout_s: u64,
    /// Additional attempts after the first failed gateway call.
    pub max_retries: u32,
    pub retry_delay_s: u64,
    /// When extraction yields fewer stakeholders than the minimum, pad with
    /// synthetic ones instead of discarding the whole structure.
    pub pad_stakeholders: bool,
    /// Tail of the cumulative context included in each debate prompt, in chars.
    pub context_window_chars: usize,

    pub decision_types: Vec<String>,
    pub psychological_traits: Vec<String>,
    pub influences: Vec<String>,
    pub biases: Vec<String>,
    pub historical_behavior: Vec<String>,
    pub goal_options: Vec<String>,
    pub bias_options: Vec<String>,
    pub tones: Vec<String>,

    /// Lowercase keyword to per-round instruction. A process step maps to the
    /// first objective whose keyword it contains.
    pub step_objectives: HashMap<String, String>,
}

impl Default for SimConfig {
    fn default() -> Self {
        let mut step_objectives = HashMap::new();
        step_objectives.insert(
            "plan".to_string(),
            "State your opening position and what a good outcome looks like for you.".to_string(),
        );
        step_objectives.insert(
            "discuss".to_string(),
            "Engage directly with what the other stakeholders have said so far. Challenge or support specific points.".to_string(),
        );
        step_objectives.insert(
            "decide".to_string(),
            "Give your final position. State what you would commit to and what you refuse to accept.".to_string(),
        );
        step_objectives.insert(
            "review".to_string(),
            "Assess whether the emerging direction addresses your goals, and name any remaining concerns.".to_string(),
        );

        Self {
            min_stakeholders: 4,
            max_stakeholders: 10,
            debate_rounds: 5,
            max_tokens: 4000,
            timeout_s: 60,
            max_retries: 2,
            retry_delay_s: 1,
            pad_stakeholders: false,
            context_window_chars: 1000,
            decision_types: vec![
                "Strategic".to_string(),
                "Tactical".to_string(),
                "Operational".to_string(),
                "Financial".to_string(),
                "Policy".to_string(),
                "Ethical".to_string(),
                "Crisis".to_string(),
                "Other".to_string(),
            ],
            psychological_traits: vec![
                "risk-averse".to_string(),
                "risk-tolerant".to_string(),
                "collaborative".to_string(),
                "competitive".to_string(),
                "analytical".to_string(),
                "decisive".to_string(),
                "cautious".to_string(),
                "impulsive".to_string(),
            ],
            influences: vec![
                "regulatory bodies".to_string(),
                "public opinion".to_string(),
                "shareholders".to_string(),
                "media".to_string(),
                "competitors".to_string(),
                "government policies".to_string(),
                "industry trends".to_string(),
            ],
            biases: vec![
                "confirmation bias".to_string(),
                "optimism bias".to_string(),
                "groupthink".to_string(),
                "status quo bias".to_string(),
                "cost-avoidance bias".to_string(),
                "anchoring bias".to_string(),
            ],
            historical_behavior: vec![
                "prioritizes short-term gains".to_string(),
                "focuses on long-term strategy".to_string(),
                "consensus-driven".to_string(),
                "unilateral decision-maker".to_string(),
                "data-driven".to_string(),
                "resistant to change".to_string(),
            ],
            goal_options: vec![
                "maximize impact".to_string(),
                "ensure stability".to_string(),
                "promote growth".to_string(),
                "maintain oversight".to_string(),
                "enhance influence".to_string(),
                "secure resources".to_string(),
                "minimize risks".to_string(),
            ],
            bias_options: vec![
                "confirmation bias".to_string(),
                "optimism bias".to_string(),
                "groupthink".to_string(),
                "status quo bias".to_string(),
                "cost-avoidance bias".to_string(),
            ],
            tones: vec![
                "diplomatic".to_string(),
                "assertive".to_string(),
                "empathetic".to_string(),
                "analytical".to_string(),
                "cautious".to_string(),
            ],
            step_objectives,
        }
    }
}

impl SimConfig {
    pub fn default_decision_type(&self) -> &str {
        self.decision_types.first().map(String::as_str).unwrap_or("Strategic")
    }

    /// Per-round instruction for a process step, by lowercase keyword match.
    pub fn objective_for_step(&self, step: &str) -> String {
        let lower = step.to_lowercase();
        for (keyword, objective) in &self.step_objectives {
            if lower.contains(keyword.as_str()) {
                return objective.clone();
            }
        }
        "Continue building on the prior rounds toward a workable resolution.".to_string()
    }

    /// Fails fast on bounds a caller got wrong; stages assume these hold.
    pub fn validate(&self) -> Result<(), crate::error::SimError> {
        if self.min_stakeholders == 0 || self.min_stakeholders > self.max_stakeholders {
            return Err(crate::error::SimError::Configuration(format!(
                "stakeholder bounds {}..{} are invalid",
                self.min_stakeholders, self.max_stakeholders
            )));
        }
        if self.goal_options.len() < 2 || self.bias_options.len() < 2 {
            return Err(crate::error::SimError::Configuration(
                "goal and bias vocabularies need at least 2 entries each".to_string(),
            ));
        }
        if self.tones.is_empty() {
            return Err(crate::error::SimError::Configuration(
                "tone vocabulary must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn load_sim_config(dir: &Path) -> SimConfig {
    let path = dir.join("simulation.json");
    match fs::read_to_string(&path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
        Err(_) => SimConfig::default(),
    }
}
