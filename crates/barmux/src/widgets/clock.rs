use anyhow::{anyhow, bail, Result};
use barmux_protocol::{Block, ClickEvent, BUTTON_LEFT, BUTTON_RIGHT};
use chrono::format::{Item, StrftimeItems};
use chrono::Local;

use super::{opt_string, opt_string_list, CacheHint, Widget, WidgetOutput};
use crate::config::ModuleConfig;
use crate::locale::get_locale;
use crate::util::{duration_to_next_tick, format_has_seconds};

const SCROLL_UP: u32 = 4;
const SCROLL_DOWN: u32 = 5;

/// Wall clock. With several timezones configured, clicking or scrolling
/// cycles through them.
pub struct Clock {
    format: String,
    timezones: Vec<chrono_tz::Tz>,
    current: usize,
    per_second: bool,
}

impl Clock {
    pub fn from_config(module: &ModuleConfig) -> Result<Self> {
        let format = opt_string(&module.options, "format")?.unwrap_or_else(|| "%H:%M".to_string());
        if StrftimeItems::new(&format).any(|item| matches!(item, Item::Error)) {
            bail!("Invalid time format {:?}", format);
        }
        let timezones = opt_string_list(&module.options, "timezones")?
            .iter()
            .map(|name| name.parse::<chrono_tz::Tz>().map_err(|e| anyhow!("Invalid timezone {:?}: {}", name, e)))
            .collect::<Result<Vec<_>>>()?;
        let per_second = format_has_seconds(&format);
        Ok(Clock { format, timezones, current: 0, per_second })
    }
}

impl Widget for Clock {
    fn run(&mut self) -> Result<WidgetOutput> {
        let locale = get_locale();
        let now = Local::now();
        let text = match self.timezones.get(self.current) {
            Some(tz) => now.with_timezone(tz).format_localized(&self.format, locale).to_string(),
            None => now.format_localized(&self.format, locale).to_string(),
        };
        let next_tick = duration_to_next_tick(&now, self.per_second);
        Ok(WidgetOutput { blocks: vec![Block::new(text)], cached_until: CacheHint::For(next_tick) })
    }

    fn handles_clicks(&self) -> bool {
        self.timezones.len() > 1
    }

    fn on_click(&mut self, event: &ClickEvent) -> Result<()> {
        let count = self.timezones.len();
        if count < 2 {
            return Ok(());
        }
        match event.button {
            BUTTON_LEFT | SCROLL_UP => self.current = (self.current + 1) % count,
            BUTTON_RIGHT | SCROLL_DOWN => self.current = (self.current + count - 1) % count,
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    fn clock_config(toml: &str) -> ModuleConfig {
        ModuleConfig { options: toml.parse().unwrap(), ..Default::default() }
    }

    #[test]
    fn renders_and_reports_the_next_tick() {
        let mut clock = Clock::from_config(&clock_config("format = \"beep\"")).unwrap();
        let output = clock.run().unwrap();
        assert_eq!(output.blocks[0].full_text, "beep");
        match output.cached_until {
            CacheHint::For(d) => assert!(d <= Duration::from_secs(60)),
            other => panic!("expected a duration hint, got {:?}", other),
        }
    }

    #[test]
    fn seconds_in_the_format_mean_per_second_ticks() {
        let clock = Clock::from_config(&clock_config("format = \"%H:%M:%S\"")).unwrap();
        assert!(clock.per_second);
        let clock = Clock::from_config(&clock_config("format = \"%H:%M\"")).unwrap();
        assert!(!clock.per_second);
    }

    #[test]
    fn bad_config_is_rejected() {
        assert!(Clock::from_config(&clock_config("timezones = [\"Mars/Olympus\"]")).is_err());
        assert!(Clock::from_config(&clock_config("format = \"%Q\"")).is_err());
        assert!(Clock::from_config(&clock_config("format = 5")).is_err());
    }

    #[test]
    fn clicking_cycles_through_timezones() {
        let config = clock_config("timezones = [\"UTC\", \"Europe/Berlin\", \"Asia/Tokyo\"]");
        let mut clock = Clock::from_config(&config).unwrap();
        assert!(clock.handles_clicks());
        clock.on_click(&ClickEvent::new(None, None, BUTTON_LEFT)).unwrap();
        assert_eq!(clock.current, 1);
        clock.on_click(&ClickEvent::new(None, None, BUTTON_RIGHT)).unwrap();
        assert_eq!(clock.current, 0);
        clock.on_click(&ClickEvent::new(None, None, BUTTON_RIGHT)).unwrap();
        assert_eq!(clock.current, 2);
        clock.on_click(&ClickEvent::new(None, None, SCROLL_UP)).unwrap();
        assert_eq!(clock.current, 0);
    }

    #[test]
    fn single_timezone_clocks_ignore_clicks() {
        let mut clock = Clock::from_config(&clock_config("timezones = [\"UTC\"]")).unwrap();
        assert!(!clock.handles_clicks());
        clock.on_click(&ClickEvent::new(None, None, BUTTON_LEFT)).unwrap();
        assert_eq!(clock.current, 0);
    }
}
