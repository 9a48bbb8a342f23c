pub mod clock;
pub mod script;
pub mod static_text;

use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use barmux_protocol::{Block, ClickEvent};

use crate::config::ModuleConfig;

pub const BUILTIN_WIDGET_KINDS: &[&str] = &["clock", "script", "static_text"];

/// How long a widget's output stays fresh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CacheHint {
    /// Use the interval configured for the module.
    Default,
    /// Fresh for this long.
    For(Duration),
    /// Fresh until this point on the monotonic clock.
    Until(Instant),
    /// Never re-run unless explicitly refreshed.
    Forever,
}

#[derive(Debug)]
pub struct WidgetOutput {
    pub blocks: Vec<Block>,
    pub cached_until: CacheHint,
}

/// A single bar module. Only [`Widget::run`] is mandatory; everything else
/// has do-nothing defaults.
pub trait Widget: Send {
    /// Produce the widget's blocks. Called on a blocking thread, so the
    /// implementation is free to do I/O.
    fn run(&mut self) -> Result<WidgetOutput>;

    /// Whether this widget consumes click events itself.
    fn handles_clicks(&self) -> bool {
        false
    }

    /// React to a click event. A `run` follows immediately afterwards.
    fn on_click(&mut self, _event: &ClickEvent) -> Result<()> {
        Ok(())
    }

    /// The bar became invisible.
    fn sleep(&mut self) {}

    /// The bar became visible again.
    fn wake(&mut self) {}
}

pub fn build_widget(kind: &str, module: &ModuleConfig) -> Result<Box<dyn Widget>> {
    match kind {
        "clock" => Ok(Box::new(clock::Clock::from_config(module)?)),
        "script" => Ok(Box::new(script::Script::from_config(module)?)),
        "static_text" => Ok(Box::new(static_text::StaticText::from_config(module)?)),
        other => bail!("Unknown widget type {:?}, expected one of {}", other, BUILTIN_WIDGET_KINDS.join(", ")),
    }
}

pub(crate) fn opt_string(options: &toml::Table, key: &str) -> Result<Option<String>> {
    match options.get(key) {
        None => Ok(None),
        Some(toml::Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => bail!("Option {:?} must be a string, got {}", key, other.type_str()),
    }
}

pub(crate) fn require_string(options: &toml::Table, key: &str) -> Result<String> {
    match opt_string(options, key)? {
        Some(value) => Ok(value),
        None => bail!("Missing required option {:?}", key),
    }
}

pub(crate) fn opt_string_list(options: &toml::Table, key: &str) -> Result<Vec<String>> {
    match options.get(key) {
        None => Ok(Vec::new()),
        Some(toml::Value::Array(values)) => values
            .iter()
            .map(|value| match value {
                toml::Value::String(s) => Ok(s.clone()),
                other => bail!("Option {:?} must contain strings, got {}", key, other.type_str()),
            })
            .collect(),
        Some(other) => bail!("Option {:?} must be a list of strings, got {}", key, other.type_str()),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unknown_kinds_are_rejected() {
        let module = ModuleConfig::default();
        assert!(build_widget("klock", &module).is_err());
    }

    #[test]
    fn option_helpers_enforce_types() {
        let options = toml::toml! {
            format = "%H:%M"
            timezones = ["UTC"]
            interval_ish = 3
        };
        assert_eq!(opt_string(&options, "format").unwrap(), Some("%H:%M".to_string()));
        assert_eq!(opt_string(&options, "missing").unwrap(), None);
        assert!(opt_string(&options, "interval_ish").is_err());
        assert_eq!(opt_string_list(&options, "timezones").unwrap(), vec!["UTC".to_string()]);
        assert!(opt_string_list(&options, "format").is_err());
        assert!(require_string(&options, "missing").is_err());
    }
}
