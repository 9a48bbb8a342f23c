use serde::{Deserialize, Serialize};

/// Markup mode of a block, as understood by i3bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Markup {
    Pango,
    #[default]
    None,
}

/// Alignment of the text inside a block that declares a `min_width`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    Left,
    Center,
    Right,
}

/// `min_width` is either a pixel count or a reference string whose rendered
/// width is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MinWidth {
    Pixels(u32),
    Text(String),
}

/// One rectangle on the bar.
///
/// Only `full_text` is required by the i3bar protocol. Every field that is
/// `None` is left out of the serialized object, and fields barmux does not
/// know about are carried through unchanged in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Block {
    pub full_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub border: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_width: Option<MinWidth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub align: Option<Align>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urgent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub separator: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub separator_block_width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markup: Option<Markup>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Block {
    pub fn new(full_text: impl Into<String>) -> Self {
        Block { full_text: full_text.into(), ..Block::default() }
    }

    /// Tag the block with the `(name, instance)` pair i3bar echoes back in
    /// click events. An empty instance is left out entirely.
    pub fn tagged(mut self, name: &str, instance: &str) -> Self {
        self.name = Some(name.to_string());
        self.instance = if instance.is_empty() { None } else { Some(instance.to_string()) };
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn minimal_block_serializes_to_full_text_only() {
        let block = Block::new("12:00");
        assert_eq!(serde_json::to_string(&block).unwrap(), r#"{"full_text":"12:00"}"#);
    }

    #[test]
    fn unknown_fields_are_carried_through() {
        let input = r##"{"full_text":"eth0: up","color":"#00ff00","_custom":{"iface":"eth0"}}"##;
        let block: Block = serde_json::from_str(input).unwrap();
        assert_eq!(block.full_text, "eth0: up");
        assert_eq!(block.color.as_deref(), Some("#00ff00"));
        assert_eq!(block.extra["_custom"]["iface"], "eth0");

        let out: serde_json::Value = serde_json::to_value(&block).unwrap();
        assert_eq!(out["_custom"]["iface"], "eth0");
    }

    #[test]
    fn markup_roundtrip() {
        let block: Block = serde_json::from_str(r#"{"full_text":"x","markup":"pango"}"#).unwrap();
        assert_eq!(block.markup, Some(Markup::Pango));
        assert_eq!(serde_json::to_string(&block).unwrap(), r#"{"full_text":"x","markup":"pango"}"#);
    }

    #[test]
    fn min_width_accepts_both_forms() {
        let px: Block = serde_json::from_str(r#"{"full_text":"x","min_width":40}"#).unwrap();
        assert_eq!(px.min_width, Some(MinWidth::Pixels(40)));
        let txt: Block = serde_json::from_str(r#"{"full_text":"x","min_width":"100%"}"#).unwrap();
        assert_eq!(txt.min_width, Some(MinWidth::Text("100%".to_string())));
    }

    #[test]
    fn tagged_skips_empty_instance() {
        let block = Block::new("x").tagged("clock", "");
        assert_eq!(block.name.as_deref(), Some("clock"));
        assert_eq!(block.instance, None);
    }
}
