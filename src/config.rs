use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{MarksmanError, MarksmanResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub run: RunConfig,
}

/// Vision model endpoint used as the decision oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Full chat-completions URL of an OpenAI-compatible endpoint.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Use SSE streaming for the decision call.
    #[serde(default)]
    pub stream: bool,
    /// Ask the endpoint for `response_format = json_object`.
    #[serde(default = "default_true")]
    pub json_mode: bool,
    /// Optional API key stored in config.toml (env vars take precedence).
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Maximum number of filtered elements listed in the prompt.
    #[serde(default = "default_element_cap")]
    pub element_cap: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            stream: false,
            json_mode: true,
            api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
            element_cap: default_element_cap(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.openai.com/v1/chat/completions".into()
}

fn default_model() -> String {
    "gpt-4o".into()
}

fn default_temperature() -> f64 {
    0.1
}

fn default_max_tokens() -> u32 {
    300
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_element_cap() -> usize {
    500
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default)]
    pub headless: bool,
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
    /// Persistent profile directory. Defaults to `<data dir>/marksman/profile`.
    #[serde(default)]
    pub user_data_dir: Option<PathBuf>,
    /// Chrome/Chromium executable; auto-detected when absent.
    #[serde(default)]
    pub chrome_path: Option<PathBuf>,
    #[serde(default = "default_scroll_amount")]
    pub scroll_amount: u32,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: false,
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            user_data_dir: None,
            chrome_path: None,
            scroll_amount: default_scroll_amount(),
        }
    }
}

fn default_viewport_width() -> u32 {
    1280
}

fn default_viewport_height() -> u32 {
    720
}

fn default_scroll_amount() -> u32 {
    500
}

impl BrowserConfig {
    pub fn profile_dir(&self) -> PathBuf {
        if let Some(dir) = &self.user_data_dir {
            return dir.clone();
        }
        dirs::data_local_dir()
            .map(|d| d.join("marksman").join("profile"))
            .unwrap_or_else(|| PathBuf::from("user_data"))
    }
}

/// Geometric thresholds for Set-of-Mark deduplication.
///
/// The defaults were tuned against a 1280×720 viewport and are not known to
/// transfer to other sizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f64,
    #[serde(default = "default_containment_threshold")]
    pub containment_threshold: f64,
    /// Non-input elements larger than this (px²) are treated as containers.
    #[serde(default = "default_max_area")]
    pub max_area: f64,
    /// Elements must be strictly wider and taller than this (px).
    #[serde(default = "default_min_size")]
    pub min_size: f64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            iou_threshold: default_iou_threshold(),
            containment_threshold: default_containment_threshold(),
            max_area: default_max_area(),
            min_size: default_min_size(),
        }
    }
}

fn default_iou_threshold() -> f64 {
    0.9
}

fn default_containment_threshold() -> f64 {
    0.95
}

fn default_max_area() -> f64 {
    250_000.0
}

fn default_min_size() -> f64 {
    5.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Boxes below this area (px²) are suspected icons.
    #[serde(default = "default_min_target_area")]
    pub min_target_area: f64,
    /// Expected text must be longer than this to trigger the icon check.
    #[serde(default = "default_min_text_len")]
    pub min_text_len: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            min_target_area: default_min_target_area(),
            min_text_len: default_min_text_len(),
        }
    }
}

fn default_min_target_area() -> f64 {
    500.0
}

fn default_min_text_len() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_stall_threshold")]
    pub stall_threshold: u32,
    /// Wait before each observation so dynamic content can load.
    #[serde(default = "default_observe_delay_ms")]
    pub observe_delay_ms: u64,
    /// Wait after each action for the UI to settle.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Pause between an action and its audit screenshot.
    #[serde(default = "default_audit_delay_ms")]
    pub audit_delay_ms: u64,
    /// Overall run deadline; `0` disables it.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            stall_threshold: default_stall_threshold(),
            observe_delay_ms: default_observe_delay_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            audit_delay_ms: default_audit_delay_ms(),
            deadline_secs: default_deadline_secs(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_max_steps() -> u32 {
    20
}

fn default_stall_threshold() -> u32 {
    3
}

fn default_observe_delay_ms() -> u64 {
    2000
}

fn default_settle_delay_ms() -> u64 {
    2000
}

fn default_audit_delay_ms() -> u64 {
    300
}

fn default_deadline_secs() -> u64 {
    900
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output").join("run_1")
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Some(candidate);
            }
        }
    }

    let candidate = std::env::current_dir().ok()?.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Some(candidate);
    }
    None
}

/// Load configuration from `explicit`, or from the first `config.toml` found
/// next to the executable or in the working directory. Falls back to defaults
/// when no file exists; an explicit path that is missing is an error.
pub fn load_config(explicit: Option<&Path>) -> MarksmanResult<AppConfig> {
    let path = match explicit {
        Some(p) if !p.exists() => {
            return Err(MarksmanError::Config(format!(
                "config file {} does not exist",
                p.display()
            )))
        }
        Some(p) => Some(p.to_path_buf()),
        None => resolve_config_path(),
    };

    let Some(path) = path else {
        tracing::info!("no config.toml found, using built-in defaults");
        return Ok(AppConfig::default());
    };

    let content = std::fs::read_to_string(&path)?;
    let config: AppConfig = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), model = %config.oracle.model, "config loaded");
    Ok(config)
}

pub fn save_config(config: &AppConfig, path: &Path) -> MarksmanResult<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}

/// API key lookup order: `MARKSMAN_API_KEY`, `OPENAI_API_KEY`, then config.toml.
pub fn resolve_api_key(oracle: &OracleConfig) -> Option<String> {
    std::env::var("MARKSMAN_API_KEY")
        .ok()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .or_else(|| oracle.api_key.clone())
        .filter(|k| !k.trim().is_empty())
}
