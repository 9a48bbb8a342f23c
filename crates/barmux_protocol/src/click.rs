use serde::{Deserialize, Serialize};

/// A click event as delivered by i3bar on stdin, or synthesized from a
/// control-socket `click` command.
///
/// i3bar only includes `name`/`instance` when the clicked block carried
/// them, so both are optional. Fields barmux does not interpret (relative
/// coordinates, output, …) ride along in `extra` and are handed to the
/// widget unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ClickEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(default)]
    pub button: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifiers: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Mouse buttons i3bar reports. Anything above 3 (scroll, extra buttons)
/// is only ever matched against configured on-click commands.
pub const BUTTON_LEFT: u32 = 1;
pub const BUTTON_MIDDLE: u32 = 2;
pub const BUTTON_RIGHT: u32 = 3;

impl ClickEvent {
    pub fn new(name: Option<&str>, instance: Option<&str>, button: u32) -> Self {
        ClickEvent {
            name: name.map(str::to_string),
            instance: instance.map(str::to_string),
            button,
            ..ClickEvent::default()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn event_with_all_standard_fields() {
        let event: ClickEvent = serde_json::from_str(
            r#"{"name":"volume","instance":"master","button":1,"x":1320,"y":12,"modifiers":["Shift"]}"#,
        )
        .unwrap();
        assert_eq!(event.name.as_deref(), Some("volume"));
        assert_eq!(event.instance.as_deref(), Some("master"));
        assert_eq!(event.button, BUTTON_LEFT);
        assert_eq!(event.modifiers, vec!["Shift".to_string()]);
    }

    #[test]
    fn nameless_event_parses() {
        let event: ClickEvent = serde_json::from_str(r#"{"button":3,"x":10,"y":10}"#).unwrap();
        assert_eq!(event.name, None);
        assert_eq!(event.button, BUTTON_RIGHT);
    }

    #[test]
    fn unknown_fields_survive_a_roundtrip() {
        let event: ClickEvent =
            serde_json::from_str(r#"{"name":"clock","button":1,"relative_x":4,"output":"DP-1"}"#).unwrap();
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["relative_x"], 4);
        assert_eq!(value["output"], "DP-1");
    }
}
