use std::fmt::Write;

use super::BarConfig;

/// Render the configuration file handed to the upstream child. The child is
/// told to speak the i3bar protocol on stdout; module sections carry the
/// user's per-module options through unchanged.
pub fn generate_child_config(config: &BarConfig) -> String {
    let modules = config.active_upstream_modules();
    let mut out = String::new();
    let _ = writeln!(out, "general {{");
    let _ = writeln!(out, "    output_format = \"i3bar\"");
    let _ = writeln!(out, "    colors = {}", config.general.colors);
    let _ = writeln!(out, "    interval = {}", config.upstream.interval);
    let _ = writeln!(out, "}}");
    for id in &modules {
        let _ = writeln!(out, "order += \"{}\"", escape(id));
    }
    for id in &modules {
        let Some(options) = config.upstream.module_options(id) else { continue };
        if options.is_empty() {
            continue;
        }
        let _ = writeln!(out, "{} {{", id);
        for (key, value) in options {
            match format_value(value) {
                Some(value) => {
                    let _ = writeln!(out, "    {} = {}", key, value);
                }
                None => log::warn!("Dropping option {}.{} from the upstream configuration: unsupported value type", id, key),
            }
        }
        let _ = writeln!(out, "}}");
    }
    out
}

fn format_value(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(format!("\"{}\"", escape(s))),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
