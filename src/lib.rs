pub mod config;
pub mod debate;
pub mod error;
pub mod extract;
pub mod gateway;
pub mod personas;
pub mod pipeline;
pub mod store;
pub mod summarize;

pub use config::{LlmConfig, SimConfig};
pub use debate::{AgentReply, AssignmentPolicy, DebateOrchestrator, TranscriptEntry};
pub use error::{GatewayError, SimError};
pub use extract::{DecisionStructure, Extractor, Stakeholder};
pub use gateway::{Gateway, OpenRouterGateway};
pub use personas::{Persona, PersonaSynthesizer};
pub use pipeline::{run_simulation, SimulationInput, SimulationRun};
pub use store::{SimulationRecord, SimulationStore};
pub use summarize::{DebateSummary, Summarizer};
