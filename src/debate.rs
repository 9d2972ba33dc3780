use crate::config::SimConfig;
use crate::error::SimError;
use crate::extract::DecisionStructure;
use crate::gateway::{
    complete_with_retry, unwrap_code_fence, CompletionRequest, Gateway, ResponseShape,
};
use crate::personas::Persona;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// One statement in the debate. Entries are produced and appended in
/// round-major, persona-minor order; this sequence is the debate's only
/// notion of who spoke when.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub agent: String,
    /// 1-based, aligned to the process step of the same index.
    pub round: u32,
    pub step: String,
    pub message: String,
}

/// Boundary classification of a per-persona gateway response. Some models
/// answer in prose, some echo back a structured entry; both are accepted.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentReply {
    PlainText(String),
    Structured {
        agent: Option<String>,
        round: Option<u32>,
        step: Option<String>,
        message: String,
    },
}

impl AgentReply {
    pub fn message(&self) -> &str {
        match self {
            AgentReply::PlainText(text) => text,
            AgentReply::Structured { message, .. } => message,
        }
    }
}

/// Prefer a well-formed JSON entry when present; otherwise the whole
/// response is the message.
pub fn classify_reply(content: &str) -> AgentReply {
    let unfenced = unwrap_code_fence(content);
    if let Ok(value) = serde_json::from_str::<Value>(unfenced) {
        if let Some(message) = value.get("message").and_then(Value::as_str) {
            return AgentReply::Structured {
                agent: value.get("agent").and_then(Value::as_str).map(str::to_string),
                round: value.get("round").and_then(Value::as_u64).map(|r| r as u32),
                step: value.get("step").and_then(Value::as_str).map(str::to_string),
                message: message.to_string(),
            };
        }
    }
    AgentReply::PlainText(content.trim().to_string())
}

/// Which personas speak in which round.
#[derive(Debug, Clone)]
pub enum AssignmentPolicy {
    /// Every persona speaks every round.
    AllSpeak,
    /// Maps a process-step name to role keywords. A persona speaks in a round when
    /// its stakeholder role contains one of the step's keywords. A round
    /// whose keywords match nobody falls back to all personas.
    RoleFiltered(HashMap<String, Vec<String>>),
}

impl AssignmentPolicy {
    fn active_indices(
        &self,
        step: &str,
        personas: &[Persona],
        roles: &HashMap<&str, &str>,
    ) -> Vec<usize> {
        let everyone: Vec<usize> = (0..personas.len()).collect();
        let AssignmentPolicy::RoleFiltered(step_keywords) = self else {
            return everyone;
        };
        let Some(keywords) = step_keywords.get(step) else {
            return everyone;
        };
        let matched: Vec<usize> = personas
            .iter()
            .enumerate()
            .filter(|(_, persona)| {
                let role = roles.get(persona.name.as_str()).copied().unwrap_or("").to_lowercase();
                keywords.iter().any(|k| role.contains(&k.to_lowercase()))
            })
            .map(|(i, _)| i)
            .collect();
        if matched.is_empty() {
            everyone
        } else {
            matched
        }
    }
}

pub struct DebateOrchestrator<'a> {
    gateway: &'a dyn Gateway,
    config: &'a SimConfig,
}

impl<'a> DebateOrchestrator<'a> {
    pub fn new(gateway: &'a dyn Gateway, config: &'a SimConfig) -> Self {
        Self { gateway, config }
    }

    /// Run `round_count` rounds, one gateway call per active persona per
    /// round, threading a growing cumulative context through the calls.
    ///
    /// Per-call failures degrade to templated statements after bounded
    /// retries; an elapsed time budget stops the loop after the in-flight
    /// call (never mid-call), appends a `System` entry, and returns the
    /// partial transcript as a success. Only caller mistakes (empty persona
    /// list, zero rounds) are errors.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_debate(
        &self,
        personas: &[Persona],
        dilemma: &str,
        process_hint: &str,
        structure: &DecisionStructure,
        scenarios: &str,
        round_count: usize,
        time_budget_s: Option<u64>,
        policy: &AssignmentPolicy,
    ) -> Result<Vec<TranscriptEntry>, SimError> {
        if personas.is_empty() {
            return Err(SimError::Configuration("persona list is empty".to_string()));
        }
        if round_count == 0 {
            return Err(SimError::Configuration("round count must be at least 1".to_string()));
        }

        let schedule = round_schedule(&structure.process, round_count);
        let roles: HashMap<&str, &str> = structure
            .stakeholders
            .iter()
            .map(|s| (s.name.as_str(), s.role.as_str()))
            .collect();

        let deadline = time_budget_s.map(|s| Instant::now() + Duration::from_secs(s));

        let mut cumulative_context = format!(
            "Dilemma: {}\nProcess: {}\nScenarios: {}\n",
            dilemma,
            process_hint,
            if scenarios.is_empty() { "none" } else { scenarios },
        );
        let mut transcript: Vec<TranscriptEntry> = Vec::new();

        for round_index in 0..round_count {
            let step = &schedule[round_index];
            let round = round_index as u32 + 1;
            let active = policy.active_indices(step, personas, &roles);
            let mut round_entries: Vec<TranscriptEntry> = Vec::new();

            // Fixed iteration order within the round keeps transcripts
            // reproducible regardless of call latency.
            for persona_index in active {
                let persona = &personas[persona_index];
                let role = roles.get(persona.name.as_str()).copied().unwrap_or("");

                let message = self
                    .persona_statement(persona, role, step, &cumulative_context)
                    .await;

                round_entries.push(TranscriptEntry {
                    agent: persona.name.clone(),
                    round,
                    step: step.clone(),
                    message,
                });

                if deadline.is_some_and(|d| Instant::now() >= d) {
                    transcript.extend(round_entries);
                    transcript.push(interrupted_entry(round, step));
                    info!(round, "debate interrupted by time budget");
                    return Ok(transcript);
                }
            }

            cumulative_context.push_str(&format_round_block(round, step, &round_entries));
            transcript.extend(round_entries);
            info!(round, step = %step, entries = transcript.len(), "round complete");
        }

        Ok(transcript)
    }

    async fn persona_statement(
        &self,
        persona: &Persona,
        role: &str,
        step: &str,
        cumulative_context: &str,
    ) -> String {
        let request = CompletionRequest {
            system_prompt: persona_system_prompt(persona, role),
            user_prompt: format!(
                "Current process step: {step}\nObjective: {objective}\n\n\
                 Debate so far (most recent excerpt):\n{context}\n\n\
                 Give your statement for this step. Stay in character, pursue your goals, \
                 and respond to the other stakeholders where relevant. Keep it under 120 words.",
                objective = self.config.objective_for_step(step),
                context = context_tail(cumulative_context, self.config.context_window_chars),
            ),
            temperature: 0.7,
            max_tokens: self.config.max_tokens,
            response_shape: ResponseShape::Text,
            timeout_s: self.config.timeout_s,
        };

        match complete_with_retry(
            self.gateway,
            &request,
            self.config.max_retries,
            Duration::from_secs(self.config.retry_delay_s),
        )
        .await
        {
            Ok(completion) => classify_reply(&completion.content).message().to_string(),
            Err(e) => {
                warn!(persona = %persona.name, step, error = %e, "statement generation failed, using fallback");
                fallback_statement(persona, role)
            }
        }
    }
}

fn persona_system_prompt(persona: &Persona, role: &str) -> String {
    format!(
        "You are {name}, a stakeholder in a simulated negotiation.\n\
         Role: {role}\nGoals: {goals}\nBiases: {biases}\nTone: {tone}\n\
         Background: {bio}\nNegotiation style: {behavior}\n\
         Speak in the first person, in your tone, pursuing your goals.",
        name = persona.name,
        role = if role.is_empty() { "Unknown" } else { role },
        goals = persona.goals.join(", "),
        biases = persona.biases.join(", "),
        tone = persona.tone,
        bio = excerpt(&persona.bio, 300),
        behavior = excerpt(&persona.expected_behavior, 300),
    )
}

/// Templated statement used when retries exhaust, explicitly marked as
/// degraded so downstream readers can discount it.
fn fallback_statement(persona: &Persona, role: &str) -> String {
    format!(
        "{} ({}) proposes focusing on {} in a {} tone, mindful of {}. \
         Detailed insights could not be generated due to an error.",
        persona.name,
        if role.is_empty() { "stakeholder" } else { role },
        persona.goals.first().map(String::as_str).unwrap_or("their priorities"),
        persona.tone,
        persona.biases.first().map(String::as_str).unwrap_or("their biases"),
    )
}

fn interrupted_entry(round: u32, step: &str) -> TranscriptEntry {
    TranscriptEntry {
        agent: "System".to_string(),
        round,
        step: step.to_string(),
        message: "Simulation interrupted: the configured time budget elapsed before all rounds completed.".to_string(),
    }
}

/// Pad or truncate the process list to exactly `round_count` steps: a short
/// list repeats its last step, a long list drops the extras.
fn round_schedule(process: &[String], round_count: usize) -> Vec<String> {
    let mut schedule: Vec<String> = process.iter().take(round_count).cloned().collect();
    let last = schedule.last().cloned().unwrap_or_else(|| "Discuss".to_string());
    while schedule.len() < round_count {
        schedule.push(last.clone());
    }
    schedule
}

fn format_round_block(round: u32, step: &str, entries: &[TranscriptEntry]) -> String {
    let mut block = format!("\n--- Round {}: {} ---\n", round, step);
    for entry in entries {
        block.push_str(&format!("- {}: {}\n", entry.agent, entry.message));
    }
    block
}

/// First `max_chars` characters, on a char boundary. Keeps long persona
/// prose from crowding the system prompt.
fn excerpt(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Last `max_chars` characters of the context, on a char boundary.
fn context_tail(context: &str, max_chars: usize) -> &str {
    let total = context.chars().count();
    if total <= max_chars {
        return context;
    }
    let skip = total - max_chars;
    match context.char_indices().nth(skip) {
        Some((idx, _)) => &context[idx..],
        None => context,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::fallback_structure;
    use crate::gateway::testing::{FailingGateway, ScriptedGateway};

    fn persona(name: &str) -> Persona {
        Persona {
            name: name.to_string(),
            goals: vec!["ensure stability".to_string(), "secure resources".to_string()],
            biases: vec!["optimism bias".to_string(), "groupthink".to_string()],
            tone: "analytical".to_string(),
            bio: format!("{} is an experienced operator.", name),
            expected_behavior: "Negotiates firmly but fairly.".to_string(),
        }
    }

    fn three_personas() -> Vec<Persona> {
        vec![persona("Ana"), persona("Ben"), persona("Cara")]
    }

    #[tokio::test]
    async fn e2e_transcript_is_round_major_in_persona_order() {
        let gateway = ScriptedGateway::always("I propose we settle this by the numbers.");
        let config = SimConfig::default();
        let structure = fallback_structure();
        let personas = three_personas();

        let transcript = DebateOrchestrator::new(&gateway, &config)
            .run_debate(&personas, "Allocate $10", "3 steps", &structure, "", 3, None, &AssignmentPolicy::AllSpeak)
            .await
            .expect("debate should complete");

        assert_eq!(transcript.len(), 9);
        let mut expected = Vec::new();
        for round in 1..=3u32 {
            for persona in &personas {
                expected.push((persona.name.clone(), round));
            }
        }
        let actual: Vec<(String, u32)> =
            transcript.iter().map(|e| (e.agent.clone(), e.round)).collect();
        assert_eq!(actual, expected);

        // Rounds align to the 3-step process schedule.
        assert_eq!(transcript[0].step, "Step 1: Plan");
        assert_eq!(transcript[8].step, "Step 3: Decide");
    }

    #[tokio::test]
    async fn unit_round_schedule_pads_and_truncates() {
        assert_eq!(
            round_schedule(&["Plan".to_string(), "Decide".to_string()], 4),
            vec!["Plan", "Decide", "Decide", "Decide"],
        );
        assert_eq!(
            round_schedule(
                &["A".to_string(), "B".to_string(), "C".to_string(), "D".to_string()],
                2
            ),
            vec!["A", "B"],
        );
    }

    #[tokio::test]
    async fn unit_cumulative_context_reaches_later_rounds() {
        let gateway = ScriptedGateway::new(vec![
            Ok("First unique statement ALPHA.".to_string()),
            Ok("Second statement.".to_string()),
        ]);
        let config = SimConfig { context_window_chars: 4000, ..SimConfig::default() };
        let structure = fallback_structure();
        let personas = vec![persona("Ana")];

        DebateOrchestrator::new(&gateway, &config)
            .run_debate(&personas, "d", "h", &structure, "", 2, None, &AssignmentPolicy::AllSpeak)
            .await
            .expect("debate should complete");

        let requests = gateway.requests.lock().expect("requests lock");
        assert_eq!(requests.len(), 2);
        assert!(!requests[0].user_prompt.contains("ALPHA"));
        assert!(requests[1].user_prompt.contains("ALPHA"));
        assert!(requests[1].user_prompt.contains("--- Round 1:"));
    }

    #[tokio::test]
    async fn unit_gateway_outage_yields_marked_fallback_statements() {
        let config = SimConfig { retry_delay_s: 0, ..SimConfig::default() };
        let structure = fallback_structure();
        let personas = three_personas();

        let transcript = DebateOrchestrator::new(&FailingGateway, &config)
            .run_debate(&personas, "d", "h", &structure, "", 2, None, &AssignmentPolicy::AllSpeak)
            .await
            .expect("debate should still complete");

        assert_eq!(transcript.len(), 6);
        for entry in &transcript {
            assert!(entry.message.contains("could not be generated due to an error"));
            assert!(entry.message.contains(&entry.agent));
        }
    }

    #[tokio::test]
    async fn unit_zero_time_budget_returns_partial_transcript_with_system_entry() {
        let gateway = ScriptedGateway::always("Quick statement.");
        let config = SimConfig::default();
        let structure = fallback_structure();
        let personas = three_personas();

        let transcript = DebateOrchestrator::new(&gateway, &config)
            .run_debate(&personas, "d", "h", &structure, "", 5, Some(0), &AssignmentPolicy::AllSpeak)
            .await
            .expect("interruption is a success path");

        // At most one round's worth of entries plus the System marker.
        assert!(transcript.len() <= personas.len() + 1);
        let last = transcript.last().expect("non-empty transcript");
        assert_eq!(last.agent, "System");
        assert!(last.message.contains("interrupted"));
    }

    #[tokio::test]
    async fn unit_role_filter_restricts_round_and_falls_back_to_all() {
        let gateway = ScriptedGateway::always("Statement.");
        let config = SimConfig::default();
        let mut structure = fallback_structure();
        structure.process = vec!["Security review".to_string(), "Budget review".to_string()];
        structure.stakeholders.truncate(3);
        structure.stakeholders[0].name = "Ana".to_string();
        structure.stakeholders[0].role = "Security Lead".to_string();
        structure.stakeholders[1].name = "Ben".to_string();
        structure.stakeholders[1].role = "Finance Manager".to_string();
        structure.stakeholders[2].name = "Cara".to_string();
        structure.stakeholders[2].role = "Analyst".to_string();
        let personas = three_personas();

        let mut step_keywords = HashMap::new();
        step_keywords.insert("Security review".to_string(), vec!["security".to_string()]);
        // No role matches "legal": the round must fall back to everyone.
        step_keywords.insert("Budget review".to_string(), vec!["legal".to_string()]);
        let policy = AssignmentPolicy::RoleFiltered(step_keywords);

        let transcript = DebateOrchestrator::new(&gateway, &config)
            .run_debate(&personas, "d", "h", &structure, "", 2, None, &policy)
            .await
            .expect("debate should complete");

        let round1: Vec<&str> = transcript.iter().filter(|e| e.round == 1).map(|e| e.agent.as_str()).collect();
        assert_eq!(round1, vec!["Ana"]);
        let round2: Vec<&str> = transcript.iter().filter(|e| e.round == 2).map(|e| e.agent.as_str()).collect();
        assert_eq!(round2, vec!["Ana", "Ben", "Cara"]);
    }

    #[tokio::test]
    async fn unit_invalid_arguments_fail_fast() {
        let gateway = ScriptedGateway::always("never called");
        let config = SimConfig::default();
        let structure = fallback_structure();

        let err = DebateOrchestrator::new(&gateway, &config)
            .run_debate(&[], "d", "h", &structure, "", 3, None, &AssignmentPolicy::AllSpeak)
            .await
            .expect_err("empty persona list should fail");
        assert!(matches!(err, SimError::Configuration(_)));

        let err = DebateOrchestrator::new(&gateway, &config)
            .run_debate(&three_personas(), "d", "h", &structure, "", 0, None, &AssignmentPolicy::AllSpeak)
            .await
            .expect_err("zero rounds should fail");
        assert!(matches!(err, SimError::Configuration(_)));
        assert_eq!(gateway.request_count(), 0);
    }

    #[tokio::test]
    async fn unit_structured_json_reply_is_unwrapped_to_its_message() {
        let gateway = ScriptedGateway::always(
            r#"{"agent": "Ana", "round": 1, "step": "Plan", "message": "I want the 60/40 split."}"#,
        );
        let config = SimConfig::default();
        let structure = fallback_structure();
        let personas = vec![persona("Ana")];

        let transcript = DebateOrchestrator::new(&gateway, &config)
            .run_debate(&personas, "d", "h", &structure, "", 1, None, &AssignmentPolicy::AllSpeak)
            .await
            .expect("debate should complete");

        assert_eq!(transcript[0].message, "I want the 60/40 split.");
        assert_eq!(transcript[0].agent, "Ana");
    }

    #[test]
    fn unit_classify_reply_prefers_structured_then_plain() {
        let structured = classify_reply(r#"{"agent": "Ana", "message": "hello"}"#);
        assert_eq!(structured.message(), "hello");
        assert!(matches!(structured, AgentReply::Structured { .. }));

        let plain = classify_reply("Just a plain statement.");
        assert_eq!(plain, AgentReply::PlainText("Just a plain statement.".to_string()));

        // JSON without a message field is treated as prose.
        let no_message = classify_reply(r#"{"agent": "Ana"}"#);
        assert!(matches!(no_message, AgentReply::PlainText(_)));
    }

    #[test]
    fn unit_excerpt_truncates_on_char_boundary() {
        let accented = "é".repeat(400);
        let cut = excerpt(&accented, 300);
        assert_eq!(cut.chars().count(), 300);
        assert!(accented.starts_with(cut));
        assert_eq!(excerpt("short", 300), "short");
    }

    #[test]
    fn unit_system_prompt_carries_truncated_profile_text() {
        let mut long_winded = persona("Ana");
        long_winded.bio = "b".repeat(500);
        long_winded.expected_behavior = "x".repeat(500);

        let prompt = persona_system_prompt(&long_winded, "Manager");

        assert!(prompt.contains(&"b".repeat(300)));
        assert!(!prompt.contains(&"b".repeat(301)));
        assert!(prompt.contains(&"x".repeat(300)));
        assert!(!prompt.contains(&"x".repeat(301)));
    }

    #[test]
    fn unit_context_tail_is_char_boundary_safe() {
        let context = "césar—decision—context";
        let tail = context_tail(context, 7);
        assert_eq!(tail.chars().count(), 7);
        assert!(context.ends_with(tail));
        assert_eq!(context_tail("short", 100), "short");
    }
}
