use anyhow::Result;
use barmux_protocol::Block;

use super::{require_string, CacheHint, Widget, WidgetOutput};
use crate::config::ModuleConfig;

/// A fixed label. Never re-runs on its own.
pub struct StaticText {
    text: String,
}

impl StaticText {
    pub fn from_config(module: &ModuleConfig) -> Result<Self> {
        Ok(StaticText { text: require_string(&module.options, "text")? })
    }
}

impl Widget for StaticText {
    fn run(&mut self) -> Result<WidgetOutput> {
        Ok(WidgetOutput { blocks: vec![Block::new(self.text.clone())], cached_until: CacheHint::Forever })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn emits_its_text_forever() {
        let options = "text = \"BAR\"".parse().unwrap();
        let mut widget = StaticText::from_config(&ModuleConfig { options, ..Default::default() }).unwrap();
        let output = widget.run().unwrap();
        assert_eq!(output.blocks[0].full_text, "BAR");
        assert_eq!(output.cached_until, CacheHint::Forever);
    }
}
