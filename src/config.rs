use crate::editor::EditorSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    Editor,
    #[default]
    Split,
    Preview,
}

impl ViewMode {
    pub fn next(self) -> Self {
        match self {
            Self::Editor => Self::Split,
            Self::Split => Self::Preview,
            Self::Preview => Self::Editor,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Editor => "editor",
            Self::Split => "split",
            Self::Preview => "preview",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistConfig {
    pub endpoint: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for AssistConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.groq.com/openai/v1/chat/completions".to_string(),
            model: "openai/gpt-oss-120b".to_string(),
            temperature: 0.7,
            max_tokens: 1024,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub wrap: bool,
    pub tab_width: usize,
    pub view: ViewMode,
    pub search_case_sensitive: bool,
    pub history_debounce_ms: u64,
    pub max_history: usize,
    pub autosave_debounce_ms: u64,
    pub toast_ms: u64,
    pub theme_dir: Option<PathBuf>,
    /// Anonymous imgur uploads need a registered client id; without one
    /// images are embedded as data URLs.
    pub imgur_client_id: Option<String>,
    pub assist: AssistConfig,
    /// Chord overrides, e.g. `"ctrl+shift+z" = "redo"` or `"ctrl+j" = "none"`.
    pub keys: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wrap: true,
            tab_width: 4,
            view: ViewMode::default(),
            search_case_sensitive: true,
            history_debounce_ms: 500,
            max_history: 500,
            autosave_debounce_ms: 1000,
            toast_ms: 3000,
            theme_dir: dirs::config_dir().map(|dir| dir.join("bat").join("themes")),
            imgur_client_id: None,
            assist: AssistConfig::default(),
            keys: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn editor_settings(&self) -> EditorSettings {
        EditorSettings {
            history_window: Duration::from_millis(self.history_debounce_ms),
            max_snapshots: self.max_history,
            case_sensitive: self.search_case_sensitive,
        }
    }

    pub fn autosave_window(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }

    pub fn toast_window(&self) -> Duration {
        Duration::from_millis(self.toast_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PartialConfig {
    wrap: Option<bool>,
    tab_width: Option<usize>,
    view: Option<ViewMode>,
    search_case_sensitive: Option<bool>,
    history_debounce_ms: Option<u64>,
    max_history: Option<usize>,
    autosave_debounce_ms: Option<u64>,
    toast_ms: Option<u64>,
    theme_dir: Option<PathBuf>,
    imgur_client_id: Option<String>,
    assist: Option<AssistConfig>,
    keys: Option<BTreeMap<String, String>>,
}

fn fill<T>(value: Option<T>, default: T, changed: &mut bool) -> T {
    value.unwrap_or_else(|| {
        *changed = true;
        default
    })
}

impl PartialConfig {
    fn apply_defaults(self) -> (Config, bool) {
        let defaults = Config::default();
        let mut changed = false;

        let config = Config {
            wrap: fill(self.wrap, defaults.wrap, &mut changed),
            tab_width: fill(self.tab_width, defaults.tab_width, &mut changed),
            view: fill(self.view, defaults.view, &mut changed),
            search_case_sensitive: fill(
                self.search_case_sensitive,
                defaults.search_case_sensitive,
                &mut changed,
            ),
            history_debounce_ms: fill(
                self.history_debounce_ms,
                defaults.history_debounce_ms,
                &mut changed,
            ),
            max_history: fill(self.max_history, defaults.max_history, &mut changed),
            autosave_debounce_ms: fill(
                self.autosave_debounce_ms,
                defaults.autosave_debounce_ms,
                &mut changed,
            ),
            toast_ms: fill(self.toast_ms, defaults.toast_ms, &mut changed),
            theme_dir: self.theme_dir.or(defaults.theme_dir),
            // optional; absent is a valid setting
            imgur_client_id: self.imgur_client_id.filter(|id| !id.trim().is_empty()),
            assist: fill(self.assist, defaults.assist, &mut changed),
            keys: fill(self.keys, defaults.keys, &mut changed),
        };
        (config, changed)
    }
}

/// Parses config text, returning whether defaults had to be filled in.
pub fn from_toml_str(raw: &str) -> Result<(Config, bool)> {
    let partial: PartialConfig = toml::from_str(raw).context("Invalid config")?;
    Ok(partial.apply_defaults())
}

pub fn config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("Could not determine config directory")?;
    Ok(base.join("makeme").join("config.toml"))
}

pub fn ensure_config_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

pub fn load_config() -> Result<Config> {
    let path = config_path()?;
    if !path.exists() {
        let cfg = Config::default();
        write_config(&cfg)?;
        return Ok(cfg);
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let (cfg, changed) =
        from_toml_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))?;
    if changed {
        write_config(&cfg)?;
    }
    Ok(cfg)
}

pub fn write_config(cfg: &Config) -> Result<()> {
    let path = config_path()?;
    ensure_config_dir(&path)?;
    let text = toml::to_string_pretty(cfg).context("Failed to serialize config")?;
    fs::write(&path, text).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub fn open_config_in_editor() -> Result<()> {
    let path = config_path()?;
    if !path.exists() {
        write_config(&Config::default())?;
    }

    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    let mut parts = match shell_words::split(&editor) {
        Ok(p) if !p.is_empty() => p,
        _ => vec![editor],
    };
    let cmd = parts.remove(0);
    let status = Command::new(cmd)
        .args(parts)
        .arg(&path)
        .status()
        .with_context(|| format!("Failed to launch editor for {}", path.display()))?;
    if !status.success() {
        anyhow::bail!("Editor exited with status {}", status);
    }
    Ok(())
}
