use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

/// One studio club: backend id, display name, chat-facing aliases and the
/// telegram routing for its managers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClubEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub manager_tg: Option<i64>,
    #[serde(default)]
    pub tg_chat: Option<i64>,
}

/// Lookup over the configured clubs, by id or by localized name.
#[derive(Debug, Clone)]
pub struct ClubDirectory {
    clubs: Vec<ClubEntry>,
}

impl ClubDirectory {
    pub fn new(clubs: Vec<ClubEntry>) -> Self {
        Self { clubs }
    }

    /// Exact id match first, then case-insensitive name/alias match.
    pub fn resolve(&self, key: &str) -> Option<&ClubEntry> {
        if let Some(club) = self.clubs.iter().find(|c| c.id == key) {
            return Some(club);
        }
        let lowered = key.trim().to_lowercase();
        self.clubs.iter().find(|c| {
            c.name.to_lowercase() == lowered
                || c.aliases.iter().any(|a| a.to_lowercase() == lowered)
        })
    }

    pub fn get(&self, id: &str) -> Option<&ClubEntry> {
        self.clubs.iter().find(|c| c.id == id)
    }

    /// Comma-joined display names, for "available clubs" messages.
    pub fn available_names(&self) -> String {
        self.clubs
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    // Backend GraphQL gateway (profiles, schedule, payment links, audit log)
    #[serde(default = "default_backend_api_url")]
    pub backend_api_url: String,
    #[serde(default)]
    pub backend_api_token: Option<String>,
    #[serde(default = "default_backend_timeout_secs")]
    pub backend_timeout_secs: u64,

    // LLM configuration (OpenAI-compatible endpoint)
    #[serde(default = "default_llm_url")]
    pub llm_api_url: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_humanizer_model")]
    pub humanizer_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,

    // Generation loop
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_tool_output_max_chars")]
    pub tool_output_max_chars: usize,
    #[serde(default = "default_reply_max_chars")]
    pub reply_max_chars: usize,

    // Messaging gateway (WhatsApp/Telegram bridge)
    #[serde(default = "default_messaging_api_url")]
    pub messaging_api_url: String,
    #[serde(default)]
    pub messaging_token: Option<String>,

    // Telegram notifier for escalations
    #[serde(default)]
    pub telegram_bot_token: Option<String>,
    #[serde(default = "default_fallback_managers_chat")]
    pub fallback_managers_chat: i64,

    // Escalation tracking board
    #[serde(default)]
    pub tracker_token: Option<String>,
    #[serde(default = "default_tracker_database_id")]
    pub tracker_database_id: String,

    // CRM (lead status updates)
    #[serde(default = "default_crm_domain")]
    pub crm_domain: String,
    #[serde(default)]
    pub crm_token: Option<String>,
    #[serde(default = "default_crm_pipeline_id")]
    pub crm_pipeline_id: u64,
    #[serde(default = "default_crm_status_initial")]
    pub crm_status_initial: u64,
    #[serde(default = "default_crm_status_human")]
    pub crm_status_human: u64,
    #[serde(default = "default_crm_chat_field_id")]
    pub crm_chat_field_id: u64,

    // Knowledge base vector search
    #[serde(default)]
    pub knowledge_api_url: String,
    #[serde(default)]
    pub knowledge_api_key: Option<String>,
    #[serde(default = "default_knowledge_namespace")]
    pub knowledge_namespace: String,

    // Shared timeout for the smaller HTTP integrations
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    // Conversation store
    #[serde(default = "default_database_path")]
    pub database_path: String,

    // Club directory
    #[serde(default = "default_clubs")]
    pub clubs: Vec<ClubEntry>,
}

fn default_backend_api_url() -> String {
    "https://admin.herosjourney.kz/graphql".to_string()
}

fn default_backend_timeout_secs() -> u64 {
    30
}

fn default_llm_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o".to_string()
}

fn default_humanizer_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_max_iterations() -> usize {
    5
}

fn default_history_window() -> usize {
    10
}

fn default_tool_output_max_chars() -> usize {
    6000
}

fn default_reply_max_chars() -> usize {
    600
}

fn default_messaging_api_url() -> String {
    "https://api.wazzup24.com/v3".to_string()
}

fn default_fallback_managers_chat() -> i64 {
    -1003234914487
}

fn default_tracker_database_id() -> String {
    "29b0a16f-4371-81cc-9794-ce306f1d13c6".to_string()
}

fn default_crm_domain() -> String {
    "fitnesslabs123.amocrm.ru".to_string()
}

fn default_crm_pipeline_id() -> u64 {
    10354830
}

fn default_crm_status_initial() -> u64 {
    81882938
}

fn default_crm_status_human() -> u64 {
    81914526
}

fn default_crm_chat_field_id() -> u64 {
    3031325
}

fn default_knowledge_namespace() -> String {
    "knowledge_base".to_string()
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_database_path() -> String {
    "clubdesk.db".to_string()
}

fn default_clubs() -> Vec<ClubEntry> {
    fn club(
        id: &str,
        name: &str,
        aliases: &[&str],
        manager_tg: i64,
        tg_chat: i64,
    ) -> ClubEntry {
        ClubEntry {
            id: id.to_string(),
            name: name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            manager_tg: Some(manager_tg),
            tg_chat: Some(tg_chat),
        }
    }

    vec![
        club(
            "6351ace4d61faf000b2febc8",
            "Nurly Orda",
            &["нурлы орда"],
            8800966,
            -1002535386890,
        ),
        club(
            "65e9e70cbd4814536c5e27e9",
            "Colibri",
            &["колибри"],
            10738998,
            -4900775642,
        ),
        club(
            "6788b54527af6c00ab78c66a",
            "Europe City",
            &["европа сити"],
            11613982,
            -1002664385193,
        ),
        club(
            "683704d8c85fb0a6b1f5a8ca",
            "Villa",
            &["вилла"],
            12536974,
            -1002648405729,
        ),
        club(
            "67d7c4cc8b5b3112cb0bcd44",
            "Promenade",
            &["променад"],
            12234034,
            -1002765678928,
        ),
        club(
            "68a45233d9ba5a6ba953e5f0",
            "4YOU",
            &["4ю"],
            12885486,
            -1003568350790,
        ),
    ]
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            backend_api_url: default_backend_api_url(),
            backend_api_token: None,
            backend_timeout_secs: default_backend_timeout_secs(),
            llm_api_url: default_llm_url(),
            llm_api_key: None,
            llm_model: default_llm_model(),
            humanizer_model: default_humanizer_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            llm_timeout_secs: default_llm_timeout_secs(),
            max_iterations: default_max_iterations(),
            history_window: default_history_window(),
            tool_output_max_chars: default_tool_output_max_chars(),
            reply_max_chars: default_reply_max_chars(),
            messaging_api_url: default_messaging_api_url(),
            messaging_token: None,
            telegram_bot_token: None,
            fallback_managers_chat: default_fallback_managers_chat(),
            tracker_token: None,
            tracker_database_id: default_tracker_database_id(),
            crm_domain: default_crm_domain(),
            crm_token: None,
            crm_pipeline_id: default_crm_pipeline_id(),
            crm_status_initial: default_crm_status_initial(),
            crm_status_human: default_crm_status_human(),
            crm_chat_field_id: default_crm_chat_field_id(),
            knowledge_api_url: String::new(),
            knowledge_api_key: None,
            knowledge_namespace: default_knowledge_namespace(),
            http_timeout_secs: default_http_timeout_secs(),
            database_path: default_database_path(),
            clubs: default_clubs(),
        }
    }
}

impl AgentConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Path to the config file (next to the executable).
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("clubdesk.toml")
    }

    /// Load config from clubdesk.toml, falling back to env vars + defaults.
    pub fn load() -> Self {
        let path = Self::config_path();

        if let Ok(contents) = fs::read_to_string(&path) {
            match toml::from_str::<AgentConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    return config;
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                }
            }
        }

        tracing::warn!("No config file found, using defaults + env vars");
        Self::from_env()
    }

    /// Save config to file (next to executable)
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, toml_string)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Populate secrets and endpoints from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = env::var("BACKEND_API_URL") {
            config.backend_api_url = url;
        }
        if let Ok(token) = env::var("BACKEND_API_TOKEN") {
            config.backend_api_token = Some(token);
        }

        if let Ok(url) = env::var("LLM_API_URL") {
            config.llm_api_url = url;
        }
        if let Ok(key) = env::var("LLM_API_KEY") {
            config.llm_api_key = Some(key);
        }
        if let Ok(model) = env::var("LLM_MODEL") {
            config.llm_model = model;
        }
        if let Ok(model) = env::var("HUMANIZER_MODEL") {
            config.humanizer_model = model;
        }

        if let Ok(token) = env::var("MESSAGING_TOKEN") {
            config.messaging_token = Some(token);
        }
        if let Ok(token) = env::var("TELEGRAM_BOT_TOKEN") {
            config.telegram_bot_token = Some(token);
        }
        if let Ok(token) = env::var("TRACKER_TOKEN") {
            config.tracker_token = Some(token);
        }
        if let Ok(token) = env::var("CRM_TOKEN") {
            config.crm_token = Some(token);
        }

        if let Ok(url) = env::var("KNOWLEDGE_API_URL") {
            config.knowledge_api_url = url;
        }
        if let Ok(key) = env::var("KNOWLEDGE_API_KEY") {
            config.knowledge_api_key = Some(key);
        }

        if let Ok(path) = env::var("CLUBDESK_DATABASE_PATH") {
            if !path.trim().is_empty() {
                config.database_path = path;
            }
        }

        config
    }

    pub fn club_directory(&self) -> ClubDirectory {
        ClubDirectory::new(self.clubs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_defaults() {
        let config: AgentConfig = toml::from_str("").unwrap();
        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.history_window, 10);
        assert_eq!(config.tool_output_max_chars, 6000);
        assert_eq!(config.reply_max_chars, 600);
        assert_eq!(config.clubs.len(), 6);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = AgentConfig::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: AgentConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.llm_model, config.llm_model);
        assert_eq!(parsed.clubs.len(), config.clubs.len());
    }

    #[test]
    fn directory_resolves_by_id_name_and_alias() {
        let directory = AgentConfig::default().club_directory();

        let by_id = directory.resolve("65e9e70cbd4814536c5e27e9").unwrap();
        assert_eq!(by_id.name, "Colibri");

        let by_name = directory.resolve("colibri").unwrap();
        assert_eq!(by_name.id, "65e9e70cbd4814536c5e27e9");

        let by_alias = directory.resolve("Колибри").unwrap();
        assert_eq!(by_alias.id, "65e9e70cbd4814536c5e27e9");

        assert!(directory.resolve("no such club").is_none());
    }

    #[test]
    fn directory_lists_available_names() {
        let directory = AgentConfig::default().club_directory();
        let names = directory.available_names();
        assert!(names.contains("Colibri"));
        assert!(names.contains("4YOU"));
    }
}
