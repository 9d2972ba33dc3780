use crate::config::SimConfig;
use crate::error::SimError;
use crate::gateway::{
    complete_with_retry, unwrap_code_fence, CompletionRequest, Gateway, ResponseShape,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, warn};

/// One negotiation participant as extracted from the input text.
/// Immutable after extraction; personas are built on top of it.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Stakeholder {
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub psychological_traits: String,
    #[serde(default)]
    pub influences: String,
    #[serde(default)]
    pub biases: String,
    #[serde(default)]
    pub historical_behavior: String,
    /// Speaking tone, when the input names one; otherwise sampled later.
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
}

/// The validated decision frame for one run.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DecisionStructure {
    pub decision_type: String,
    pub stakeholders: Vec<Stakeholder>,
    pub issues: Vec<String>,
    pub process: Vec<String>,
    pub external_factors: Vec<String>,
}

pub struct Extractor<'a> {
    gateway: &'a dyn Gateway,
    config: &'a SimConfig,
}

impl<'a> Extractor<'a> {
    pub fn new(gateway: &'a dyn Gateway, config: &'a SimConfig) -> Self {
        Self { gateway, config }
    }

    /// Extract a decision structure from the three free-text inputs.
    ///
    /// Never fails: any gateway, parse, or policy violation resolves to the
    /// deterministic fallback structure so downstream stages always receive
    /// a well-formed frame.
    pub async fn extract(
        &self,
        dilemma: &str,
        process_hint: &str,
        scenarios: &str,
    ) -> DecisionStructure {
        match self.extract_strict(dilemma, process_hint, scenarios).await {
            Ok(structure) => {
                info!(
                    stakeholders = structure.stakeholders.len(),
                    rounds = structure.process.len(),
                    "extraction complete"
                );
                structure
            }
            Err(e) => {
                warn!(error = %e, "extraction failed, using fallback structure");
                fallback_structure()
            }
        }
    }

    /// Hard-failure variant for callers that need validation semantics
    /// instead of availability.
    pub async fn extract_strict(
        &self,
        dilemma: &str,
        process_hint: &str,
        scenarios: &str,
    ) -> Result<DecisionStructure, SimError> {
        let request = CompletionRequest {
            system_prompt: "You are an assistant extracting decision structures for a negotiation simulator.".to_string(),
            user_prompt: self.build_prompt(dilemma, process_hint, scenarios),
            temperature: 0.5,
            max_tokens: 800,
            response_shape: ResponseShape::JsonObject,
            timeout_s: self.config.timeout_s,
        };

        let completion = complete_with_retry(
            self.gateway,
            &request,
            self.config.max_retries,
            Duration::from_secs(self.config.retry_delay_s),
        )
        .await
        .map_err(|e| SimError::Extraction(e.to_string()))?;

        let payload: Value = serde_json::from_str(unwrap_code_fence(&completion.content))
            .map_err(|e| SimError::Extraction(format!("unparseable structure: {}", e)))?;

        self.validate(payload)
    }

    fn build_prompt(&self, dilemma: &str, process_hint: &str, scenarios: &str) -> String {
        format!(
            "From the inputs below, extract a decision structure. Always provide a complete \
             output, even if inputs are vague or minimal, by making reasonable assumptions and \
             labeling them (e.g., 'Stakeholder 1 (Assumed)'). Follow these rules:\n\
             1. decision_type: one of [{types}]. Default to '{default_type}' if unclear.\n\
             2. stakeholders: between {min} and {max} objects, each with fields 'name', 'role', \
             'psychological_traits', 'influences', 'biases', 'historical_behavior'. \
             Prefer trait values from [{traits}], influences from [{influences}], \
             biases from [{biases}], history from [{history}].\n\
             3. issues: 2-5 key issues or priorities, inferred from the dilemma if not explicit.\n\
             4. process: 3 or more ordered process steps. Default to 'Plan', 'Discuss', 'Decide'.\n\
             5. external_factors: 1-2 factors from the scenarios, or generic ones if absent.\n\
             Return a single JSON object with fields 'decision_type', 'stakeholders', 'issues', \
             'process', 'external_factors'.\n\
             Inputs:\n- Dilemma: {dilemma}\n- Process Hint: {process_hint}\n- Scenarios: {scenarios}\n",
            types = self.config.decision_types.join(", "),
            default_type = self.config.default_decision_type(),
            min = self.config.min_stakeholders,
            max = self.config.max_stakeholders,
            traits = self.config.psychological_traits.join(", "),
            influences = self.config.influences.join(", "),
            biases = self.config.biases.join(", "),
            history = self.config.historical_behavior.join(", "),
        )
    }

    fn validate(&self, payload: Value) -> Result<DecisionStructure, SimError> {
        let decision_type = match payload.get("decision_type").and_then(Value::as_str) {
            Some(t) if self.config.decision_types.iter().any(|known| known == t) => t.to_string(),
            Some(t) => {
                warn!(decision_type = t, "unrecognized decision type, using default");
                self.config.default_decision_type().to_string()
            }
            None => self.config.default_decision_type().to_string(),
        };

        let mut stakeholders: Vec<Stakeholder> = payload
            .get("stakeholders")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(|item| self.parse_stakeholder(item)).collect())
            .unwrap_or_default();

        if stakeholders.len() > self.config.max_stakeholders {
            warn!(
                count = stakeholders.len(),
                max = self.config.max_stakeholders,
                "clamping stakeholder list"
            );
            stakeholders.truncate(self.config.max_stakeholders);
        }
        if stakeholders.len() < self.config.min_stakeholders {
            if self.config.pad_stakeholders {
                let mut index = 1;
                while stakeholders.len() < self.config.min_stakeholders {
                    let name = format!("Stakeholder {} (Assumed)", index);
                    if !stakeholders.iter().any(|s| s.name == name) {
                        stakeholders.push(self.synthetic_stakeholder(&name));
                    }
                    index += 1;
                }
            } else {
                return Err(SimError::Validation(format!(
                    "extracted {} stakeholders, need at least {}",
                    stakeholders.len(),
                    self.config.min_stakeholders
                )));
            }
        }
        disambiguate_names(&mut stakeholders);

        let mut issues = string_list(&payload, "issues");
        if issues.is_empty() {
            issues = vec!["Issue 1".to_string(), "Issue 2".to_string()];
        }
        while issues.len() < 2 {
            issues.push(format!("Issue {}", issues.len() + 1));
        }
        issues.truncate(5);

        let mut process = string_list(&payload, "process");
        if process.is_empty() {
            process = default_process();
        }

        let mut external_factors = string_list(&payload, "external_factors");
        if external_factors.is_empty() {
            external_factors = vec!["Resource Availability (Assumed)".to_string()];
        }

        Ok(DecisionStructure { decision_type, stakeholders, issues, process, external_factors })
    }

    fn parse_stakeholder(&self, item: &Value) -> Option<Stakeholder> {
        let name = item.get("name").and_then(Value::as_str)?.trim();
        if name.is_empty() {
            return None;
        }
        // Missing attribute fields are filled from the first vocabulary entry,
        // never treated as an error.
        Some(Stakeholder {
            name: name.to_string(),
            role: field_or(item, "role", ""),
            psychological_traits: field_or(
                item,
                "psychological_traits",
                first(&self.config.psychological_traits),
            ),
            influences: field_or(item, "influences", first(&self.config.influences)),
            biases: field_or(item, "biases", first(&self.config.biases)),
            historical_behavior: field_or(
                item,
                "historical_behavior",
                first(&self.config.historical_behavior),
            ),
            tone: item.get("tone").and_then(Value::as_str).map(str::to_string),
            bio: item.get("bio").and_then(Value::as_str).map(str::to_string),
        })
    }

    fn synthetic_stakeholder(&self, name: &str) -> Stakeholder {
        Stakeholder {
            name: name.to_string(),
            role: "Team Member (Assumed)".to_string(),
            psychological_traits: first(&self.config.psychological_traits),
            influences: first(&self.config.influences),
            biases: first(&self.config.biases),
            historical_behavior: first(&self.config.historical_behavior),
            tone: None,
            bio: None,
        }
    }
}

fn first(vocabulary: &[String]) -> String {
    vocabulary.first().cloned().unwrap_or_default()
}

fn field_or(item: &Value, key: &str, default: impl Into<String>) -> String {
    match item.get(key).and_then(Value::as_str) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => default.into(),
    }
}

fn string_list(payload: &Value, key: &str) -> Vec<String> {
    payload
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .filter(|s| !s.trim().is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn default_process() -> Vec<String> {
    vec![
        "Step 1: Plan".to_string(),
        "Step 2: Discuss".to_string(),
        "Step 3: Decide".to_string(),
    ]
}

/// Append a numeric disambiguator to colliding names, keeping a trailing
/// "(Assumed)" / "(Inferred)" annotation in final position.
fn disambiguate_names(stakeholders: &mut [Stakeholder]) {
    let mut seen: HashSet<String> = HashSet::new();
    for stakeholder in stakeholders.iter_mut() {
        if seen.insert(stakeholder.name.clone()) {
            continue;
        }
        let mut counter = 2;
        loop {
            let candidate = numbered_name(&stakeholder.name, counter);
            if seen.insert(candidate.clone()) {
                stakeholder.name = candidate;
                break;
            }
            counter += 1;
        }
    }
}

fn numbered_name(name: &str, counter: usize) -> String {
    for annotation in ["(Assumed)", "(Inferred)"] {
        if let Some(base) = name.strip_suffix(annotation) {
            return format!("{} {} {}", base.trim_end(), counter, annotation);
        }
    }
    format!("{} {}", name, counter)
}

/// Domain-neutral hardcoded structure used when extraction fails outright.
/// Always satisfies the bound invariants under the default configuration.
pub fn fallback_structure() -> DecisionStructure {
    let roles = ["Manager", "Expert", "Team Lead", "Analyst"];
    let stakeholders = roles
        .iter()
        .enumerate()
        .map(|(i, role)| Stakeholder {
            name: format!("Stakeholder {} (Assumed)", i + 1),
            role: format!("{} (Assumed)", role),
            psychological_traits: "analytical".to_string(),
            influences: "industry trends".to_string(),
            biases: "status quo bias".to_string(),
            historical_behavior: "consensus-driven".to_string(),
            tone: None,
            bio: None,
        })
        .collect();

    DecisionStructure {
        decision_type: "Strategic".to_string(),
        stakeholders,
        issues: vec!["Cost (Assumed)".to_string(), "Time (Assumed)".to_string()],
        process: default_process(),
        external_factors: vec!["Resource Availability (Assumed)".to_string()],
    }
}

// ── ASCII presentation artifacts (pure formatting, no hidden state) ──

pub fn ascii_process(process: &[String]) -> String {
    if process.is_empty() {
        return "No process steps available.".to_string();
    }
    let mut timeline = String::from("=== Process Timeline ===\n");
    for (i, step) in process.iter().enumerate() {
        timeline.push_str(&format!("{}. {}\n", i + 1, step));
    }
    timeline.push_str("=======================");
    timeline
}

pub fn ascii_stakeholders(stakeholders: &[Stakeholder]) -> String {
    if stakeholders.is_empty() {
        return "No stakeholders available.".to_string();
    }
    let mut table = String::from("=== Stakeholders ===\n");
    for s in stakeholders {
        let role = if s.role.is_empty() { "Unknown" } else { s.role.as_str() };
        table.push_str(&format!("- {} ({})\n", s.name, role));
    }
    table.push_str("===================");
    table
}
