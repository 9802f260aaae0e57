use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{AppError, Result};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    #[serde(default = "default_workspace_dir")]
    pub base_dir: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            base_dir: default_workspace_dir(),
        }
    }
}

#[derive(Deserialize, Clone)]
pub struct GitConfig {
    #[serde(default = "default_author_name")]
    pub author_name: String,
    #[serde(default = "default_author_email")]
    pub author_email: String,
    /// Access token used for fetch/push against HTTPS remotes.
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            author_name: default_author_name(),
            author_email: default_author_email(),
            token: None,
        }
    }
}

// Manual Debug impl to avoid leaking the access token
impl std::fmt::Debug for GitConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitConfig")
            .field("author_name", &self.author_name)
            .field("author_email", &self.author_email)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkflowConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_notification_buffer")]
    pub notification_buffer: usize,
    #[serde(default)]
    pub rebase_existing_branch: bool,
    #[serde(default)]
    pub open_pull_request: bool,
    #[serde(default = "default_true")]
    pub draft_pull_requests: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            notification_buffer: default_notification_buffer(),
            rebase_existing_branch: false,
            open_pull_request: false,
            draft_pull_requests: true,
        }
    }
}

/// What a verification run reports when the project has no recognizable tests.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NoTestsPolicy {
    #[default]
    Pass,
    Fail,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VerificationConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_output_limit")]
    pub output_limit_bytes: usize,
    #[serde(default)]
    pub when_no_tests: NoTestsPolicy,
    /// Shell command that replaces test detection when set.
    #[serde(default)]
    pub command: Option<String>,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            output_limit_bytes: default_output_limit(),
            when_no_tests: NoTestsPolicy::default(),
            command: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorKind {
    #[default]
    Fixed,
    Claude,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GeneratorConfig {
    #[serde(default)]
    pub kind: GeneratorKind,
    #[serde(default)]
    pub claude: Option<ClaudeConfig>,
    #[serde(default)]
    pub fixed: FixedGeneratorConfig,
}

#[derive(Deserialize, Clone)]
pub struct ClaudeConfig {
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: usize,
    #[serde(default = "default_claude_api_url")]
    pub api_url: String,
    /// Retries for rate-limited or overloaded responses.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

// Manual Debug impl to avoid leaking the API key
impl std::fmt::Debug for ClaudeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("max_turns", &self.max_turns)
            .field("max_file_size_bytes", &self.max_file_size_bytes)
            .field("api_url", &self.api_url)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FixedFile {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FixedGeneratorConfig {
    #[serde(default)]
    pub files: Vec<FixedFile>,
    #[serde(default = "default_fixed_summary")]
    pub summary: String,
}

impl Default for FixedGeneratorConfig {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            summary: default_fixed_summary(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StoreConfig {
    /// TOML file with `[[repositories]]` and `[[tickets]]` tables.
    #[serde(default)]
    pub seed_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NotifyConfig {
    /// Subscriber that receives every status event as a JSON POST.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_workspace_dir() -> PathBuf {
    PathBuf::from("/tmp/autodev-workspaces")
}

fn default_author_name() -> String {
    "autodev[bot]".to_string()
}

fn default_author_email() -> String {
    "autodev[bot]@users.noreply.github.com".to_string()
}

fn default_max_iterations() -> u32 {
    10
}

fn default_notification_buffer() -> usize {
    64
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_output_limit() -> usize {
    2048
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    16384
}

fn default_max_turns() -> u32 {
    50
}

fn default_max_file_size() -> usize {
    512 * 1024 // 512 KB
}

fn default_claude_api_url() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_fixed_summary() -> String {
    "Applied fixed change set".to_string()
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            builder = builder.add_source(config::File::with_name("autodev").required(false));
        }

        // Environment variable overrides with AUTODEV_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("AUTODEV")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        let config: AppConfig = config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workflow.max_iterations == 0 {
            return Err(AppError::Config(
                "workflow.max_iterations must be at least 1".to_string(),
            ));
        }
        if self.workflow.notification_buffer == 0 {
            return Err(AppError::Config(
                "workflow.notification_buffer must be at least 1".to_string(),
            ));
        }
        if self.generator.kind == GeneratorKind::Claude && self.generator.claude.is_none() {
            return Err(AppError::Config(
                "generator.kind = \"claude\" requires a [generator.claude] section".to_string(),
            ));
        }
        Ok(())
    }

    pub fn git_token(&self) -> Option<&str> {
        self.git.token.as_deref()
    }
}
