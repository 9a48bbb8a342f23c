use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{ClickEvent, ProtocolError};

/// Upper bound on a control-socket message. Clients send exactly one JSON
/// object and close; anything larger is rejected before parsing.
pub const MAX_CTL_MESSAGE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CtlCommand {
    Refresh,
    RefreshAll,
    Click,
}

/// A single request on the control socket.
///
/// `module` entries are either a bare module name (`"battery"`) or a
/// `"name instance"` pair (`"battery 1"`). `refresh` applies to the listed
/// modules, `refresh_all` ignores the list, and `click` synthesizes one
/// click event per listed module. Unknown fields are forwarded into the
/// synthesized click events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CtlRequest {
    pub command: CtlCommand,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub module: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button: Option<u32>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CtlRequest {
    /// Parse a raw control message, enforcing the size cap and the
    /// per-command field requirements.
    pub fn parse(raw: &[u8]) -> Result<Self, ProtocolError> {
        if raw.len() > MAX_CTL_MESSAGE {
            return Err(ProtocolError::ControlMessageTooLarge { max: MAX_CTL_MESSAGE, got: raw.len() });
        }
        let request: CtlRequest =
            serde_json::from_slice(raw).map_err(|e| ProtocolError::json("control message", e))?;
        if request.command == CtlCommand::Click && request.button.is_none() {
            return Err(ProtocolError::MissingButton);
        }
        Ok(request)
    }

    pub fn selectors(&self) -> Result<Vec<ModuleSelector>, ProtocolError> {
        self.module.iter().map(|m| m.parse()).collect()
    }

    /// Build the click event a `click` command injects for one target
    /// module. The result is indistinguishable from a stdin event carrying
    /// the same fields, so extra fields are routed through serde to land in
    /// the typed slots where the event has them.
    pub fn click_event_for(&self, selector: &ModuleSelector) -> ClickEvent {
        let mut object = self.extra.clone();
        object.insert("name".to_string(), selector.name.clone().into());
        if let Some(instance) = &selector.instance {
            object.insert("instance".to_string(), instance.clone().into());
        }
        object.insert("button".to_string(), self.button.unwrap_or_default().into());
        serde_json::from_value(serde_json::Value::Object(object)).unwrap_or_else(|_| {
            ClickEvent::new(Some(&selector.name), selector.instance.as_deref(), self.button.unwrap_or_default())
        })
    }
}

/// Target of a `refresh` or `click` command: a module name with an optional
/// instance, written `"name"` or `"name instance"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSelector {
    pub name: String,
    pub instance: Option<String>,
}

impl ModuleSelector {
    /// Whether this selector addresses the given `(name, instance)` pair.
    /// A selector without an instance matches every instance of the module.
    pub fn matches(&self, name: &str, instance: &str) -> bool {
        self.name == name && self.instance.as_deref().map_or(true, |i| i == instance)
    }
}

impl FromStr for ModuleSelector {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // everything after the first whitespace is the instance, which may
        // itself contain spaces (mount points, interface aliases)
        let mut parts = s.trim().splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or_default();
        if name.is_empty() {
            return Err(ProtocolError::EmptyModuleSelector);
        }
        let instance = parts.next().map(|i| i.trim_start().to_string()).filter(|i| !i.is_empty());
        Ok(ModuleSelector { name: name.to_string(), instance })
    }
}

impl std::fmt::Display for ModuleSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.instance {
            Some(instance) => write!(f, "{} {}", self.name, instance),
            None => write!(f, "{}", self.name),
        }
    }
}
