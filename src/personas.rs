use crate::config::SimConfig;
use crate::extract::{DecisionStructure, Stakeholder};
use crate::gateway::{complete_with_retry, CompletionRequest, Gateway, ResponseShape};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// The negotiation-ready expansion of a stakeholder. Read-only during the
/// debate; traits act as fixed negotiation priors.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Persona {
    pub name: String,
    pub goals: Vec<String>,
    pub biases: Vec<String>,
    pub tone: String,
    pub bio: String,
    pub expected_behavior: String,
}

pub struct PersonaSynthesizer<'a> {
    gateway: &'a dyn Gateway,
    config: &'a SimConfig,
}

impl<'a> PersonaSynthesizer<'a> {
    pub fn new(gateway: &'a dyn Gateway, config: &'a SimConfig) -> Self {
        Self { gateway, config }
    }

    /// Build one persona per stakeholder, in stakeholder order.
    ///
    /// Goals, biases, and tone come from local sampling against the
    /// configured vocabularies; the caller supplies the random source so a
    /// seeded generator gives reproducible personas. Only the bio and
    /// expected-behavior prose come from the gateway, and each stakeholder
    /// degrades to templated text independently on failure.
    pub async fn synthesize<R: Rng>(
        &self,
        structure: &DecisionStructure,
        dilemma: &str,
        process_hint: &str,
        rng: &mut R,
    ) -> Vec<Persona> {
        let mut personas = Vec::with_capacity(structure.stakeholders.len());
        for stakeholder in &structure.stakeholders {
            personas.push(self.synthesize_one(structure, stakeholder, dilemma, process_hint, rng).await);
        }
        personas
    }

    async fn synthesize_one<R: Rng>(
        &self,
        structure: &DecisionStructure,
        stakeholder: &Stakeholder,
        dilemma: &str,
        process_hint: &str,
        rng: &mut R,
    ) -> Persona {
        let goals: Vec<String> =
            self.config.goal_options.choose_multiple(rng, 2).cloned().collect();
        let biases: Vec<String> =
            self.config.bias_options.choose_multiple(rng, 2).cloned().collect();
        let tone = stakeholder.tone.clone().unwrap_or_else(|| {
            self.config
                .tones
                .choose(rng)
                .cloned()
                .unwrap_or_else(|| "diplomatic".to_string())
        });

        let initial_bio = stakeholder.bio.clone().unwrap_or_else(|| {
            format!(
                "{} has a long career in their field, with extensive experience relevant to the decision at hand.",
                stakeholder.name
            )
        });

        let request = CompletionRequest {
            system_prompt: "You are an assistant generating detailed stakeholder profiles."
                .to_string(),
            user_prompt: self.profile_prompt(structure, stakeholder, dilemma, process_hint, &initial_bio),
            temperature: 0.7,
            max_tokens: 800,
            response_shape: ResponseShape::Text,
            timeout_s: self.config.timeout_s,
        };

        let (bio, expected_behavior) = match complete_with_retry(
            self.gateway,
            &request,
            self.config.max_retries,
            Duration::from_secs(self.config.retry_delay_s),
        )
        .await
        {
            Ok(completion) => split_profile(&completion.content, &stakeholder.name, &tone),
            Err(e) => {
                warn!(stakeholder = %stakeholder.name, error = %e, "profile generation failed, using fallback");
                let goal = goals.first().map(String::as_str).unwrap_or("their priorities");
                (initial_bio.clone(), fallback_behavior(&stakeholder.name, goal, &tone))
            }
        };

        Persona {
            name: stakeholder.name.clone(),
            goals,
            biases,
            tone,
            bio: bio.trim().to_string(),
            expected_behavior: expected_behavior.trim().to_string(),
        }
    }

    fn profile_prompt(
        &self,
        structure: &DecisionStructure,
        stakeholder: &Stakeholder,
        dilemma: &str,
        process_hint: &str,
        initial_bio: &str,
    ) -> String {
        format!(
            "Generate a detailed bio (150-200 words) and expected negotiation behavior \
             (100-150 words) for a stakeholder named {name}. The stakeholder is part of a \
             decision-making process with the following context:\n\
             Dilemma: {dilemma}\n\
             Process Hint: {process_hint}\n\
             Decision Type: {decision_type}\n\
             Issues: {issues}\n\
             Process: {process}\n\
             External Factors: {factors}\n\
             Stakeholder Details: Name: {name}, Role: {role}, Traits: {traits}, Influences: {influences}\n\
             Initial Bio (use as a starting point): {initial_bio}\n\
             For the bio, detail their professional background, key achievements, and personal \
             traits. For the expected behavior, describe how they will negotiate, considering \
             their goals, biases, tone, and the case specifics. Return plain text with the bio \
             and behavior separated by a blank line.",
            name = stakeholder.name,
            decision_type = structure.decision_type,
            issues = structure.issues.join(", "),
            process = structure.process.join(", "),
            factors = structure.external_factors.join(", "),
            role = if stakeholder.role.is_empty() { "Unknown" } else { &stakeholder.role },
            traits = stakeholder.psychological_traits,
            influences = stakeholder.influences,
        )
    }
}

/// Split a profile response on the first blank line into (bio, behavior).
/// Without a delimiter the whole response is the bio and the behavior is
/// templated.
fn split_profile(response: &str, name: &str, tone: &str) -> (String, String) {
    match response.split_once("\n\n") {
        Some((bio, behavior)) => (bio.to_string(), behavior.to_string()),
        None => (
            response.to_string(),
            format!(
                "During negotiations, {} will advocate for their priorities with a {} tone.",
                name, tone
            ),
        ),
    }
}

fn fallback_behavior(name: &str, goal: &str, tone: &str) -> String {
    format!(
        "During negotiations, {} will focus on {}, advocating with a {} tone, while being mindful of their biases.",
        name, goal, tone
    )
}
