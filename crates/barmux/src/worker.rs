use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use barmux_protocol::{Block, ClickEvent, ModuleSelector};
use tokio::sync::mpsc::UnboundedSender;

use crate::app::DaemonCommand;
use crate::config::{ClickAction, GeneralConfig, ModuleConfig};
use crate::scheduler::RateLimiter;
use crate::widgets::{Widget, WidgetOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
#[display("{_0}")]
pub struct WorkerId(pub usize);

/// Identity of a worker as click events and control commands address it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerKey {
    pub name: String,
    /// Empty for single-instance modules.
    pub instance: String,
}

impl WorkerKey {
    pub fn from_id(id: &str) -> Result<Self> {
        let selector = ModuleSelector::from_str(id)?;
        Ok(WorkerKey { name: selector.name, instance: selector.instance.unwrap_or_default() })
    }

    pub fn matches(&self, selector: &ModuleSelector) -> bool {
        selector.matches(&self.name, &self.instance)
    }
}

impl std::fmt::Display for WorkerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.instance.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} {}", self.name, self.instance)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum WorkerState {
    /// Not scheduled; content is fresh forever or the worker is upstream-fed.
    Idle,
    /// Waiting in the timer queue or on the run-now list.
    Scheduled,
    /// A run is in flight on a blocking thread.
    Running,
    /// The bar is hidden; nothing runs until it is shown again.
    Sleeping,
    /// Failed to start. Its slots stay empty for good.
    Dead,
}

pub enum WorkerKind {
    /// An in-process widget, shared with the blocking threads it runs on.
    Widget(Arc<Mutex<Box<dyn Widget>>>),
    /// A slot fed by the upstream child.
    Upstream,
    /// A widget that failed to start. Holds the slot, shows nothing.
    Defunct,
}

impl std::fmt::Debug for WorkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerKind::Widget(_) => write!(f, "Widget"),
            WorkerKind::Upstream => write!(f, "Upstream"),
            WorkerKind::Defunct => write!(f, "Defunct"),
        }
    }
}

#[derive(Debug)]
pub struct Worker {
    pub id: WorkerId,
    pub key: WorkerKey,
    pub kind: WorkerKind,
    /// Slot indexes this worker fills. One module may occupy several.
    pub positions: Vec<usize>,
    pub state: WorkerState,
    /// A refresh arrived while a run was in flight; coalesced to one bit.
    pub refresh_pending: bool,
    /// Clicks that arrived while a run was in flight, replayed in order.
    pub pending_clicks: VecDeque<ClickEvent>,
    pub latest: Vec<Block>,
    pub interval: Duration,
    pub color: Option<String>,
    pub on_click: HashMap<u32, ClickAction>,
    pub watch: Vec<PathBuf>,
    pub handles_clicks: bool,
    /// Refreshes triggered by events are rate limited per worker.
    pub event_limiter: RateLimiter,
}

impl Worker {
    pub fn widget(
        id: WorkerId,
        key: WorkerKey,
        widget: Box<dyn Widget>,
        module: &ModuleConfig,
        general: &GeneralConfig,
    ) -> Self {
        let handles_clicks = widget.handles_clicks();
        Worker {
            id,
            key,
            kind: WorkerKind::Widget(Arc::new(Mutex::new(widget))),
            positions: Vec::new(),
            state: WorkerState::Idle,
            refresh_pending: false,
            pending_clicks: VecDeque::new(),
            latest: Vec::new(),
            interval: module.interval(general),
            color: module.color.clone(),
            on_click: parse_click_bindings(module),
            watch: module.watch.clone(),
            handles_clicks,
            event_limiter: RateLimiter::new(RateLimiter::REFRESH_WINDOW),
        }
    }

    pub fn upstream(id: WorkerId, key: WorkerKey, module: Option<&ModuleConfig>) -> Self {
        Worker {
            id,
            key,
            kind: WorkerKind::Upstream,
            positions: Vec::new(),
            state: WorkerState::Idle,
            refresh_pending: false,
            pending_clicks: VecDeque::new(),
            latest: Vec::new(),
            interval: Duration::ZERO,
            color: module.and_then(|m| m.color.clone()),
            on_click: module.map(parse_click_bindings).unwrap_or_default(),
            watch: module.map(|m| m.watch.clone()).unwrap_or_default(),
            handles_clicks: false,
            event_limiter: RateLimiter::new(RateLimiter::REFRESH_WINDOW),
        }
    }

    pub fn defunct(id: WorkerId, key: WorkerKey) -> Self {
        Worker {
            id,
            key,
            kind: WorkerKind::Defunct,
            positions: Vec::new(),
            state: WorkerState::Dead,
            refresh_pending: false,
            pending_clicks: VecDeque::new(),
            latest: Vec::new(),
            interval: Duration::ZERO,
            color: None,
            on_click: HashMap::new(),
            watch: Vec::new(),
            handles_clicks: false,
            event_limiter: RateLimiter::new(RateLimiter::REFRESH_WINDOW),
        }
    }

    /// Mark this worker dead. Whatever it showed disappears from the bar.
    pub fn mark_dead(&mut self) {
        self.state = WorkerState::Dead;
        self.latest.clear();
        self.refresh_pending = false;
        self.pending_clicks.clear();
    }

    pub fn widget_handle(&self) -> Option<Arc<Mutex<Box<dyn Widget>>>> {
        match &self.kind {
            WorkerKind::Widget(widget) => Some(widget.clone()),
            WorkerKind::Upstream | WorkerKind::Defunct => None,
        }
    }
}

fn parse_click_bindings(module: &ModuleConfig) -> HashMap<u32, ClickAction> {
    module
        .on_click
        .iter()
        .filter_map(|(button, action)| {
            // validated during config parsing
            let button: u32 = button.parse().ok()?;
            Some((button, action.clone()))
        })
        .collect()
}

/// Run a widget on a blocking thread and report back through the mailbox.
/// A pending click, if any, is delivered to the widget right before the run.
pub fn spawn_widget_run(
    id: WorkerId,
    widget: Arc<Mutex<Box<dyn Widget>>>,
    click: Option<ClickEvent>,
    evt_send: UnboundedSender<DaemonCommand>,
) {
    tokio::task::spawn_blocking(move || {
        let result = run_widget_blocking(&widget, click.as_ref());
        let _ = evt_send.send(DaemonCommand::RunFinished { id, result });
    });
}

/// Call a widget's visibility hook on a blocking thread.
pub fn spawn_widget_visibility(widget: Arc<Mutex<Box<dyn Widget>>>, visible: bool) {
    tokio::task::spawn_blocking(move || {
        let mut widget = widget.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if visible {
            widget.wake();
        } else {
            widget.sleep();
        }
    });
}

fn run_widget_blocking(widget: &Mutex<Box<dyn Widget>>, click: Option<&ClickEvent>) -> Result<WidgetOutput> {
    let run = std::panic::catch_unwind(AssertUnwindSafe(|| {
        let mut widget = widget.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(event) = click {
            widget.on_click(event)?;
        }
        widget.run()
    }));
    match run {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(anyhow!("Widget panicked: {}", message))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::widgets::CacheHint;
    use barmux_protocol::BUTTON_LEFT;
    use maplit::hashmap;

    struct Probe {
        clicks: u32,
        runs: u32,
        panic_on_run: bool,
    }

    impl Widget for Probe {
        fn run(&mut self) -> Result<WidgetOutput> {
            if self.panic_on_run {
                panic!("boom");
            }
            self.runs += 1;
            let text = format!("clicks={} runs={}", self.clicks, self.runs);
            Ok(WidgetOutput { blocks: vec![Block::new(text)], cached_until: CacheHint::Default })
        }

        fn handles_clicks(&self) -> bool {
            true
        }

        fn on_click(&mut self, _event: &ClickEvent) -> Result<()> {
            self.clicks += 1;
            Ok(())
        }
    }

    fn probe(panic_on_run: bool) -> Mutex<Box<dyn Widget>> {
        Mutex::new(Box::new(Probe { clicks: 0, runs: 0, panic_on_run }))
    }

    #[test]
    fn clicks_are_delivered_before_the_run() {
        let widget = probe(false);
        let output = run_widget_blocking(&widget, Some(&ClickEvent::new(None, None, BUTTON_LEFT))).unwrap();
        assert_eq!(output.blocks[0].full_text, "clicks=1 runs=1");
        let output = run_widget_blocking(&widget, None).unwrap();
        assert_eq!(output.blocks[0].full_text, "clicks=1 runs=2");
    }

    #[test]
    fn panics_surface_as_errors() {
        let widget = probe(true);
        let err = run_widget_blocking(&widget, None).unwrap_err();
        assert!(err.to_string().contains("boom"), "unexpected error: {:#}", err);
        // the lock must still be usable afterwards
        let err = run_widget_blocking(&widget, None).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn keys_parse_and_match_selectors() {
        let key = WorkerKey::from_id("battery 0").unwrap();
        assert_eq!(key.to_string(), "battery 0");
        assert!(key.matches(&ModuleSelector::from_str("battery").unwrap()));
        assert!(key.matches(&ModuleSelector::from_str("battery 0").unwrap()));
        assert!(!key.matches(&ModuleSelector::from_str("battery 1").unwrap()));
        assert!(!key.matches(&ModuleSelector::from_str("clock").unwrap()));

        let key = WorkerKey::from_id("clock").unwrap();
        assert_eq!(key.instance, "");
        assert_eq!(key.to_string(), "clock");
    }

    #[test]
    fn click_bindings_parse_to_buttons() {
        let module = ModuleConfig {
            on_click: hashmap! {
                "1".to_string() => ClickAction::Refresh,
                "3".to_string() => ClickAction::Shell("true".to_string()),
                "left".to_string() => ClickAction::Refresh,
            },
            ..ModuleConfig::default()
        };
        let bindings = parse_click_bindings(&module);
        assert_eq!(
            bindings,
            hashmap! {
                1 => ClickAction::Refresh,
                3 => ClickAction::Shell("true".to_string()),
            }
        );
    }

    #[test]
    fn dead_workers_drop_their_content() {
        let module = ModuleConfig::default();
        let general = GeneralConfig::default();
        let widget = Box::new(Probe { clicks: 0, runs: 0, panic_on_run: false });
        let mut worker = Worker::widget(WorkerId(0), WorkerKey::from_id("x").unwrap(), widget, &module, &general);
        worker.latest = vec![Block::new("stale")];
        worker.pending_clicks.push_back(ClickEvent::new(None, None, BUTTON_LEFT));
        worker.mark_dead();
        assert_eq!(worker.state, WorkerState::Dead);
        assert!(worker.latest.is_empty());
        assert!(worker.pending_clicks.is_empty());
    }
}
