use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use barmux_protocol::{ModuleSelector, STOP_SIGNAL_TSTP};
use serde::Deserialize;
use smart_default::SmartDefault;

/// The whole configuration file. Everything is optional; an empty file
/// yields a bar with no slots, which still speaks the full protocol.
#[derive(Debug, Clone, Deserialize, SmartDefault, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct BarConfig {
    pub general: GeneralConfig,
    pub upstream: UpstreamConfig,
    #[serde(rename = "module")]
    pub modules: HashMap<String, ModuleConfig>,
}

#[derive(Debug, Clone, Deserialize, SmartDefault, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct GeneralConfig {
    /// Bar slots, left to right. Entries name either an upstream module or
    /// a widget, as `"name"` or `"name instance"`. The same entry may appear
    /// more than once to show a module in several positions.
    pub order: Vec<String>,
    #[default = true]
    pub click_events: bool,
    #[default(STOP_SIGNAL_TSTP)]
    pub stop_signal: i32,
    /// Default seconds between widget runs, for widgets that neither
    /// configure an interval nor report their own expiry.
    #[default = 60.0]
    pub default_cache_timeout: f64,
    /// With colors disabled, the color key is stripped from every block.
    #[default = true]
    pub colors: bool,
    #[default(PathBuf::from("/tmp"))]
    pub socket_dir: PathBuf,
    #[default("barmux_uds".to_string())]
    pub socket_prefix: String,
    /// Command used for desktop notifications.
    #[default("notify-send".to_string())]
    pub notifier: String,
    /// How long shutdown waits for in-flight widget runs.
    #[default = 2000]
    pub drain_timeout_ms: u64,
}

impl GeneralConfig {
    pub fn default_cache_duration(&self) -> Duration {
        Duration::from_secs_f64(self.default_cache_timeout.max(0.0))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, SmartDefault, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct UpstreamConfig {
    /// The producer child to run, e.g. `i3status`. Unset means no upstream.
    pub command: Option<String>,
    /// Module ids the child emits, in the order it emits them.
    pub modules: Vec<String>,
    /// Consecutive child deaths tolerated before giving up on the upstream.
    #[default = 10]
    pub max_respawns: u32,
    /// Refresh interval handed to the child, in seconds.
    #[default = 5]
    pub interval: u32,
    /// Per-module settings written into the generated child configuration,
    /// keyed by module id.
    pub options: HashMap<String, toml::Table>,
}

impl UpstreamConfig {
    pub fn enabled(&self) -> bool {
        self.command.is_some() && !self.modules.is_empty()
    }

    pub fn module_options(&self, id: &str) -> Option<&toml::Table> {
        self.options.get(id)
    }

    /// The strftime format a time-of-day module renders with, or `None`
    /// when the module is not a time-of-day module.
    pub fn time_format_for(&self, id: &str) -> Option<String> {
        let selector = ModuleSelector::from_str(id).ok()?;
        if selector.name != "time" && selector.name != "tztime" {
            return None;
        }
        let configured = self
            .module_options(id)
            .and_then(|table| table.get("format"))
            .and_then(|value| value.as_str());
        Some(configured.unwrap_or("%Y-%m-%d %H:%M:%S").to_string())
    }
}

// no deny_unknown_fields here, unknown keys are the widget's options
#[derive(Debug, Clone, Deserialize, SmartDefault, PartialEq)]
#[serde(default)]
pub struct ModuleConfig {
    /// Widget kind. Defaults to the module name.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Seconds between runs, overriding `general.default_cache_timeout`.
    pub interval: Option<f64>,
    /// Default color applied to blocks that do not set their own.
    pub color: Option<String>,
    /// Mouse bindings, keyed by button number.
    pub on_click: HashMap<String, ClickAction>,
    /// Filesystem paths whose device events trigger a refresh.
    pub watch: Vec<PathBuf>,
    /// Everything else is handed to the widget itself.
    #[serde(flatten)]
    pub options: toml::Table,
}

impl ModuleConfig {
    pub fn click_action(&self, button: u32) -> Option<&ClickAction> {
        self.on_click.get(&button.to_string())
    }

    pub fn interval(&self, general: &GeneralConfig) -> Duration {
        match self.interval {
            Some(secs) => Duration::from_secs_f64(secs.max(0.0)),
            None => general.default_cache_duration(),
        }
    }
}

/// What a mouse binding does. Anything that is not one of the reserved
/// words runs as a shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickAction {
    Refresh,
    RefreshAll,
    Shell(String),
}

impl<'de> Deserialize<'de> for ClickAction {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "refresh" => ClickAction::Refresh,
            "refresh_all" => ClickAction::RefreshAll,
            _ => ClickAction::Shell(raw),
        })
    }
}

impl BarConfig {
    pub fn read_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid configuration file {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: BarConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn is_upstream_module(&self, id: &str) -> bool {
        match canonical_id(id) {
            Some(canonical) => self.upstream.modules.iter().any(|m| canonical_id(m).as_deref() == Some(&canonical)),
            None => false,
        }
    }

    /// The `[module.*]` table for a module id, tolerating spacing
    /// differences between the table name and the id.
    pub fn module_config(&self, id: &str) -> Option<&ModuleConfig> {
        if let Some(module) = self.modules.get(id) {
            return Some(module);
        }
        let canonical = canonical_id(id)?;
        self.modules
            .iter()
            .find(|(name, _)| canonical_id(name).as_deref() == Some(&canonical))
            .map(|(_, module)| module)
    }

    /// Upstream modules that actually occupy a bar slot, in the order the
    /// child emits them. Modules the child could produce but the order
    /// never shows are left out of the generated child configuration, so
    /// child frames and slots always line up.
    pub fn active_upstream_modules(&self) -> Vec<String> {
        let shown: Vec<String> = self.general.order.iter().filter_map(|id| canonical_id(id)).collect();
        self.upstream
            .modules
            .iter()
            .filter(|id| canonical_id(id).is_some_and(|canonical| shown.contains(&canonical)))
            .cloned()
            .collect()
    }

    fn validate(&self) -> Result<()> {
        check_seconds(self.general.default_cache_timeout).context("Invalid general.default_cache_timeout")?;
        for id in &self.general.order {
            ModuleSelector::from_str(id).with_context(|| format!("Invalid entry {:?} in general.order", id))?;
        }
        for id in &self.upstream.modules {
            ModuleSelector::from_str(id).with_context(|| format!("Invalid entry {:?} in upstream.modules", id))?;
        }
        if !self.upstream.modules.is_empty() && self.upstream.command.is_none() {
            bail!("upstream.modules is set but upstream.command is not");
        }
        for (id, module) in &self.modules {
            ModuleSelector::from_str(id).with_context(|| format!("Invalid module table name {:?}", id))?;
            if let Some(secs) = module.interval {
                check_seconds(secs).with_context(|| format!("Invalid interval in module {:?}", id))?;
            }
            for button in module.on_click.keys() {
                let _: u32 = button
                    .parse()
                    .with_context(|| format!("Invalid mouse button {:?} in module {:?}", button, id))?;
            }
            if self.is_upstream_module(id) && module.kind.is_some() {
                bail!("Module {:?} is produced by the upstream and cannot also declare a widget type", id);
            }
        }
        Ok(())
    }
}

/// `"battery  0"` and `"battery 0"` address the same module.
fn canonical_id(id: &str) -> Option<String> {
    ModuleSelector::from_str(id).ok().map(|selector| selector.to_string())
}

/// Seconds fields are converted with `from_secs_f64` after the negative
/// clamp, so they must hold a value a `Duration` can represent. TOML
/// happily parses `inf`, `nan` and floats far beyond the u64 second range.
fn check_seconds(secs: f64) -> Result<()> {
    if !secs.is_finite() || Duration::try_from_secs_f64(secs.max(0.0)).is_err() {
        bail!("Expected a finite number of seconds, got {}", secs);
    }
    Ok(())
}
