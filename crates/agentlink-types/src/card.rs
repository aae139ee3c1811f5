//! A2A Agent Card: how the bridge describes itself to RPC clients.
//!
//! Served at `/.well-known/agent.json`. The card advertises a single skill,
//! the `query` verb, decorated with the configured tags and example prompts.

use crate::config::BridgeConfig;
use serde::{Deserialize, Serialize};

/// A2A protocol version advertised in the card.
pub const A2A_CARD_VERSION: &str = "0.1.0";

/// A2A Agent Card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    /// Agent display name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// RPC endpoint URL.
    pub url: String,
    /// Card version.
    pub version: String,
    pub capabilities: AgentCapabilities,
    pub skills: Vec<AgentSkill>,
    #[serde(default)]
    pub default_input_modes: Vec<String>,
    #[serde(default)]
    pub default_output_modes: Vec<String>,
}

/// A2A agent capabilities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    pub streaming: bool,
    pub push_notifications: bool,
    pub state_transition_history: bool,
}

/// A2A skill descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub examples: Vec<String>,
}

/// Build the bridge's Agent Card. One request, one reply: no streaming, no
/// push notifications, no task history.
pub fn build_agent_card(config: &BridgeConfig, base_url: &str) -> AgentCard {
    AgentCard {
        name: config.display_name.clone(),
        description: config.description.clone(),
        url: format!("{}/", base_url.trim_end_matches('/')),
        version: A2A_CARD_VERSION.to_string(),
        capabilities: AgentCapabilities::default(),
        skills: vec![AgentSkill {
            id: "query".to_string(),
            name: config.display_name.clone(),
            description: config.description.clone(),
            tags: config.skill_tags.iter().cloned().collect(),
            examples: config.skill_examples.clone(),
        }],
        default_input_modes: vec!["text".to_string()],
        default_output_modes: vec!["text".to_string()],
    }
}
