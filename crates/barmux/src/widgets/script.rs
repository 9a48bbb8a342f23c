use std::process::Command;

use anyhow::{bail, Context, Result};
use barmux_protocol::Block;

use super::{require_string, CacheHint, Widget, WidgetOutput};
use crate::config::ModuleConfig;

/// Shows the first line a shell command prints.
pub struct Script {
    command: String,
}

impl Script {
    pub fn from_config(module: &ModuleConfig) -> Result<Self> {
        Ok(Script { command: require_string(&module.options, "command")? })
    }
}

impl Widget for Script {
    fn run(&mut self) -> Result<WidgetOutput> {
        let output = Command::new("/bin/sh")
            .arg("-c")
            .arg(&self.command)
            .output()
            .with_context(|| format!("Failed to run {:?}", self.command))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("Command {:?} exited with {}: {}", self.command, output.status, stderr.trim());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let text = stdout.lines().next().unwrap_or("").trim().to_string();
        Ok(WidgetOutput { blocks: vec![Block::new(text)], cached_until: CacheHint::Default })
    }
}
