use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use barmux_protocol::{Block, ClickEvent, ModuleSelector, BUTTON_MIDDLE};
use tokio::sync::mpsc::UnboundedSender;

use crate::config::{BarConfig, ClickAction, ModuleConfig};
use crate::device_watch::DeviceWatchHandle;
use crate::events;
use crate::notifier::{Notifier, NotifyLevel};
use crate::output::{self, OutputAssembler};
use crate::scheduler::{RateLimiter, TimerQueue};
use crate::upstream::{UpstreamHandle, UpstreamSlot};
use crate::widgets::{self, CacheHint, WidgetOutput};
use crate::worker::{self, Worker, WorkerId, WorkerKey, WorkerKind, WorkerState};

#[derive(Debug)]
pub enum DaemonCommand {
    /// A widget run came back from its blocking thread.
    RunFinished { id: WorkerId, result: Result<WidgetOutput> },
    /// A device event wants this worker re-run.
    RefreshWorker { id: WorkerId },
    /// Control socket: refresh the modules matching these selectors.
    Refresh { selectors: Vec<ModuleSelector> },
    /// Control socket or SIGUSR1: refresh everything.
    RefreshAll,
    /// A click event, from stdin or synthesized over the control socket.
    Click(ClickEvent),
    /// Fresh content for upstream-fed slots.
    UpstreamSlots(Vec<(WorkerId, Vec<Block>)>),
    /// The upstream child is gone for good.
    UpstreamFailed,
    /// The bar became invisible (stop signal).
    Suspend,
    /// The bar became visible again (SIGCONT).
    Resume,
    /// Clean shutdown.
    Shutdown,
}

pub struct App {
    pub config: BarConfig,
    pub workers: Vec<Worker>,
    /// Key to worker index, for event routing.
    pub lookup: HashMap<WorkerKey, WorkerId>,
    pub queue: TimerQueue,
    /// Workers to launch in the next scheduler pass.
    pub run_now: Vec<WorkerId>,
    pub output: OutputAssembler,
    pub notifier: Notifier,
    pub upstream: Option<UpstreamHandle>,
    pub device_watch: Option<DeviceWatchHandle>,
    pub evt_send: UnboundedSender<DaemonCommand>,
    refresh_all_limiter: RateLimiter,
    upstream_limiter: RateLimiter,
    /// Set while the bar is hidden; suspends running and emitting.
    pub hidden: bool,
    pub stopping: bool,
    in_flight: usize,
    startup_errors: Vec<(String, String)>,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("workers", &self.workers)
            .field("hidden", &self.hidden)
            .field("stopping", &self.stopping)
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

impl App {
    pub fn new(config: BarConfig, output: OutputAssembler, evt_send: UnboundedSender<DaemonCommand>) -> Result<Self> {
        let notifier = Notifier::new(config.general.notifier.clone());
        let mut app = App {
            config,
            workers: Vec::new(),
            lookup: HashMap::new(),
            queue: TimerQueue::new(),
            run_now: Vec::new(),
            output,
            notifier,
            upstream: None,
            device_watch: None,
            evt_send,
            refresh_all_limiter: RateLimiter::new(RateLimiter::REFRESH_WINDOW),
            upstream_limiter: RateLimiter::new(RateLimiter::REFRESH_WINDOW),
            hidden: false,
            stopping: false,
            in_flight: 0,
            startup_errors: Vec::new(),
        };
        app.build_workers()?;
        Ok(app)
    }

    /// Construct one worker per distinct order entry. Later occurrences of
    /// an entry only add positions. Widgets that fail to construct leave a
    /// defunct worker behind so their slots stay reserved but empty.
    fn build_workers(&mut self) -> Result<()> {
        let order = self.config.general.order.clone();
        for (position, id) in order.iter().enumerate() {
            let key = WorkerKey::from_id(id)?;
            if let Some(&existing) = self.lookup.get(&key) {
                self.workers[existing.0].positions.push(position);
                continue;
            }
            let worker_id = WorkerId(self.workers.len());
            let canonical = key.to_string();
            let module = self.config.module_config(&canonical).cloned();
            let mut worker = if self.config.is_upstream_module(&canonical) {
                Worker::upstream(worker_id, key.clone(), module.as_ref())
            } else {
                self.build_widget_worker(worker_id, &key, module.unwrap_or_default())
            };
            worker.positions.push(position);
            self.lookup.insert(key, worker_id);
            self.workers.push(worker);
        }
        Ok(())
    }

    fn build_widget_worker(&mut self, id: WorkerId, key: &WorkerKey, module: ModuleConfig) -> Worker {
        let kind = module.kind.clone().unwrap_or_else(|| key.name.clone());
        match widgets::build_widget(&kind, &module) {
            Ok(widget) => Worker::widget(id, key.clone(), widget, &module, &self.config.general),
            Err(err) => {
                log::error!("Cannot start module {}: {:?}", key, err);
                self.startup_errors.push((key.to_string(), format!("Failed to start: {:#}", err)));
                Worker::defunct(id, key.clone())
            }
        }
    }

    /// The slots the upstream adapter feeds, in child emission order.
    pub fn upstream_slots(&self) -> Vec<UpstreamSlot> {
        self.config
            .active_upstream_modules()
            .iter()
            .filter_map(|id| {
                let key = WorkerKey::from_id(id).ok()?;
                let worker = *self.lookup.get(&key)?;
                Some(UpstreamSlot { worker, key, time_format: self.config.upstream.time_format_for(id) })
            })
            .collect()
    }

    pub fn watch_subscriptions(&self) -> Vec<(WorkerId, Vec<PathBuf>)> {
        self.workers
            .iter()
            .filter(|worker| worker.state != WorkerState::Dead && !worker.watch.is_empty())
            .map(|worker| (worker.id, worker.watch.clone()))
            .collect()
    }

    /// Queue the first run of every widget and report startup failures.
    pub fn start_workers(&mut self) {
        for (module, message) in std::mem::take(&mut self.startup_errors) {
            self.notifier.notify(NotifyLevel::Error, &module, &message);
        }
        let ids: Vec<WorkerId> = self
            .workers
            .iter()
            .filter(|worker| worker.state != WorkerState::Dead && worker.widget_handle().is_some())
            .map(|worker| worker.id)
            .collect();
        for id in ids {
            self.mark_run_now(id);
        }
        self.dispatch_run_now();
    }

    pub fn handle_command(&mut self, event: DaemonCommand) {
        log::debug!("Handling event: {:?}", &event);
        match event {
            DaemonCommand::RunFinished { id, result } => self.finish_run(id, result),
            DaemonCommand::RefreshWorker { id } => self.request_refresh_limited(id),
            DaemonCommand::Refresh { selectors } => self.refresh_selected(&selectors),
            DaemonCommand::RefreshAll => self.refresh_all(),
            DaemonCommand::Click(click) => self.dispatch_click(click),
            DaemonCommand::UpstreamSlots(updates) => self.apply_upstream_slots(updates),
            DaemonCommand::UpstreamFailed => self.upstream_failed(),
            DaemonCommand::Suspend => self.suspend(),
            DaemonCommand::Resume => self.resume(),
            DaemonCommand::Shutdown => self.begin_shutdown(),
        }
    }

    /// One scheduler pass: collect due workers, then launch everything on
    /// the run-now list.
    pub fn tick(&mut self) {
        let now = Instant::now();
        for id in self.queue.pop_due(now) {
            self.mark_run_now(id);
        }
        self.dispatch_run_now();
    }

    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.queue.next_deadline()
    }

    /// Write one frame if any slot changed. Nothing is written while the
    /// bar is hidden; changes accumulate and flush on resume.
    pub fn flush_output(&mut self) -> Result<()> {
        if self.hidden {
            return Ok(());
        }
        self.output.emit_if_dirty()
    }

    pub fn begin_shutdown(&mut self) {
        if self.stopping {
            return;
        }
        log::info!("Shutting down");
        self.stopping = true;
        if let Some(upstream) = &self.upstream {
            upstream.stop();
        }
        let _ = crate::lifecycle::send_exit();
    }

    /// True once no widget run is in flight anymore.
    pub fn is_drained(&self) -> bool {
        self.in_flight == 0
    }

    fn mark_run_now(&mut self, id: WorkerId) {
        let worker = &mut self.workers[id.0];
        if worker.state == WorkerState::Dead || worker.state == WorkerState::Running {
            return;
        }
        worker.state = WorkerState::Scheduled;
        self.queue.cancel(id);
        if !self.run_now.contains(&id) {
            self.run_now.push(id);
        }
    }

    fn dispatch_run_now(&mut self) {
        if self.hidden || self.stopping {
            return;
        }
        let ready = std::mem::take(&mut self.run_now);
        for id in ready {
            let worker = &mut self.workers[id.0];
            if worker.state != WorkerState::Scheduled {
                continue;
            }
            let Some(widget) = worker.widget_handle() else { continue };
            let click = worker.pending_clicks.pop_front();
            worker.state = WorkerState::Running;
            worker.refresh_pending = false;
            self.in_flight += 1;
            worker::spawn_widget_run(id, widget, click, self.evt_send.clone());
        }
    }

    fn finish_run(&mut self, id: WorkerId, result: Result<WidgetOutput>) {
        self.in_flight = self.in_flight.saturating_sub(1);
        let worker = &mut self.workers[id.0];
        if worker.state == WorkerState::Dead {
            return;
        }
        worker.state = if self.hidden { WorkerState::Sleeping } else { WorkerState::Idle };
        match result {
            Ok(output) => {
                worker.latest = output.blocks;
                self.publish_worker(id);
                if !self.hidden {
                    self.schedule_after_run(id, output.cached_until);
                }
            }
            Err(err) => {
                let module = self.workers[id.0].key.to_string();
                log::error!("Error in module {}: {:?}", module, err);
                self.notifier.notify(NotifyLevel::Error, &module, &format!("{:#}", err));
                // previous output stays on the bar; retry at the interval
                if !self.hidden {
                    self.schedule_after_run(id, CacheHint::Default);
                }
            }
        }
        let worker = &mut self.workers[id.0];
        if worker.refresh_pending || !worker.pending_clicks.is_empty() {
            worker.refresh_pending = false;
            self.mark_run_now(id);
        }
    }

    fn schedule_after_run(&mut self, id: WorkerId, hint: CacheHint) {
        let now = Instant::now();
        let interval = self.workers[id.0].interval;
        let deadline = match hint {
            CacheHint::Default => (!interval.is_zero()).then(|| now + interval),
            CacheHint::For(wait) => (!wait.is_zero()).then(|| now + wait),
            CacheHint::Until(at) => (at > now).then_some(at),
            CacheHint::Forever => {
                self.workers[id.0].state = WorkerState::Idle;
                self.queue.cancel(id);
                return;
            }
        };
        match deadline {
            Some(at) => {
                self.workers[id.0].state = WorkerState::Scheduled;
                self.queue.insert(id, at);
            }
            None => self.mark_run_now(id),
        }
    }

    /// Re-serialize a worker's blocks into its slots.
    fn publish_worker(&mut self, id: WorkerId) {
        let (positions, fragment) = {
            let worker = &self.workers[id.0];
            let fragment =
                output::render_fragment(&worker.latest, &worker.key, worker.color.as_deref(), self.config.general.colors);
            (worker.positions.clone(), fragment)
        };
        self.output.set_slots(&positions, fragment);
    }

    /// Unconditional refresh: invalidate the cache and re-run as soon as
    /// possible. A run already in flight absorbs it into one pending bit.
    fn request_refresh(&mut self, id: WorkerId) {
        let worker = &mut self.workers[id.0];
        match worker.state {
            WorkerState::Dead => {}
            WorkerState::Running | WorkerState::Sleeping => worker.refresh_pending = true,
            WorkerState::Idle | WorkerState::Scheduled => match worker.kind {
                WorkerKind::Widget(_) => self.mark_run_now(id),
                WorkerKind::Upstream => self.refresh_upstream(),
                WorkerKind::Defunct => {}
            },
        }
    }

    fn request_refresh_limited(&mut self, id: WorkerId) {
        if self.workers[id.0].event_limiter.try_acquire(Instant::now()) {
            self.request_refresh(id);
        } else {
            log::debug!("Refresh of {} dropped by the rate limiter", self.workers[id.0].key);
        }
    }

    fn refresh_selected(&mut self, selectors: &[ModuleSelector]) {
        let ids: Vec<WorkerId> = self
            .workers
            .iter()
            .filter(|worker| selectors.iter().any(|selector| worker.key.matches(selector)))
            .map(|worker| worker.id)
            .collect();
        if ids.is_empty() {
            log::debug!("No module matches the refresh selectors {:?}", selectors);
        }
        for id in ids {
            self.request_refresh_limited(id);
        }
    }

    fn refresh_all(&mut self) {
        if !self.refresh_all_limiter.try_acquire(Instant::now()) {
            log::debug!("Global refresh dropped by the rate limiter");
            return;
        }
        log::info!("Refreshing all modules");
        let ids: Vec<WorkerId> = self.workers.iter().map(|worker| worker.id).collect();
        for id in ids {
            if matches!(self.workers[id.0].kind, WorkerKind::Widget(_)) {
                self.request_refresh(id);
            }
        }
        self.refresh_upstream();
    }

    fn refresh_upstream(&mut self) {
        let Some(upstream) = &self.upstream else { return };
        if self.upstream_limiter.try_acquire(Instant::now()) {
            upstream.refresh();
        } else {
            log::debug!("Upstream refresh dropped by the rate limiter");
        }
    }

    /// Route a click to its worker: a configured binding wins, then the
    /// widget's own click handler, then the middle button falls back to
    /// cache invalidation. Everything else is ignored.
    fn dispatch_click(&mut self, click: ClickEvent) {
        let Some(name) = click.name.clone() else {
            log::debug!("Ignoring click event without a module name");
            return;
        };
        let target = {
            let candidates: Vec<(WorkerId, &WorkerKey)> = self
                .workers
                .iter()
                .filter(|worker| worker.key.name == name)
                .map(|worker| (worker.id, &worker.key))
                .collect();
            events::resolve_click_target(&click, &candidates)
        };
        let Some(id) = target else {
            log::debug!("No worker matches a click on {:?}", name);
            return;
        };
        if self.workers[id.0].state == WorkerState::Dead {
            return;
        }
        if let Some(action) = self.workers[id.0].on_click.get(&click.button).cloned() {
            match action {
                ClickAction::Refresh => self.request_refresh_limited(id),
                ClickAction::RefreshAll => self.refresh_all(),
                ClickAction::Shell(command) => {
                    crate::util::run_command(command);
                    self.request_refresh_limited(id);
                }
            }
            return;
        }
        if self.workers[id.0].handles_clicks {
            let worker = &mut self.workers[id.0];
            worker.pending_clicks.push_back(click);
            if worker.state != WorkerState::Running {
                self.mark_run_now(id);
            }
            return;
        }
        if click.button == BUTTON_MIDDLE {
            self.request_refresh_limited(id);
        }
    }

    fn apply_upstream_slots(&mut self, updates: Vec<(WorkerId, Vec<Block>)>) {
        for (id, blocks) in updates {
            let Some(worker) = self.workers.get_mut(id.0) else {
                log::error!("Upstream update for unknown worker {}", id);
                continue;
            };
            if worker.state == WorkerState::Dead {
                continue;
            }
            worker.latest = blocks;
            self.publish_worker(id);
        }
    }

    fn upstream_failed(&mut self) {
        log::error!("The upstream producer is gone, its slots stay empty");
        let ids: Vec<WorkerId> = self
            .workers
            .iter()
            .filter(|worker| matches!(worker.kind, WorkerKind::Upstream))
            .map(|worker| worker.id)
            .collect();
        for id in ids {
            self.workers[id.0].mark_dead();
            self.publish_worker(id);
        }
        self.notifier.notify(NotifyLevel::Error, "upstream", "The status producer keeps dying and was disabled");
    }

    fn suspend(&mut self) {
        if self.hidden {
            return;
        }
        log::info!("Bar hidden, suspending");
        self.hidden = true;
        self.run_now.clear();
        for worker in &mut self.workers {
            match worker.state {
                WorkerState::Idle | WorkerState::Scheduled => {
                    worker.state = WorkerState::Sleeping;
                    self.queue.cancel(worker.id);
                }
                _ => {}
            }
            if let Some(widget) = worker.widget_handle() {
                worker::spawn_widget_visibility(widget, false);
            }
        }
        if let Some(upstream) = &self.upstream {
            upstream.suspend();
        }
    }

    fn resume(&mut self) {
        if !self.hidden {
            return;
        }
        log::info!("Bar visible again, resuming");
        self.hidden = false;
        let ids: Vec<WorkerId> = self.workers.iter().map(|worker| worker.id).collect();
        for id in ids {
            let worker = &mut self.workers[id.0];
            if worker.state == WorkerState::Sleeping {
                worker.state = WorkerState::Idle;
            }
            if let Some(widget) = worker.widget_handle() {
                worker::spawn_widget_visibility(widget, true);
                self.request_refresh(id);
            }
        }
        if let Some(upstream) = &self.upstream {
            upstream.resume();
        }
        self.dispatch_run_now();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use barmux_protocol::{Header, BUTTON_LEFT};
    use std::io::Write;
    use std::str::FromStr;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn test_app(config_toml: &str) -> (App, SharedBuf, UnboundedReceiver<DaemonCommand>) {
        let mut config = BarConfig::from_toml_str(config_toml).unwrap();
        // keep tests from running a real notifier
        config.general.notifier = "true".to_string();
        let buf = SharedBuf::default();
        let slots = config.general.order.len();
        let output = OutputAssembler::new(Box::new(buf.clone()), slots, Header::default());
        let (evt_send, evt_recv) = mpsc::unbounded_channel();
        let app = App::new(config, output, evt_send).unwrap();
        (app, buf, evt_recv)
    }

    async fn pump_one(app: &mut App, evt_recv: &mut UnboundedReceiver<DaemonCommand>) {
        let command = evt_recv.recv().await.expect("mailbox closed");
        app.handle_command(command);
    }

    const GREETER: &str = r#"
        [general]
        order = ["greet"]
        [module.greet]
        type = "static_text"
        text = "hi"
    "#;

    #[tokio::test]
    async fn widget_output_reaches_the_bar() {
        let (mut app, buf, mut evt_recv) = test_app(GREETER);
        app.start_workers();
        pump_one(&mut app, &mut evt_recv).await;
        app.flush_output().unwrap();
        assert_eq!(buf.contents(), ",[{\"full_text\":\"hi\",\"name\":\"greet\"}]\n");
        // fresh forever: nothing scheduled, nothing dirty
        assert!(app.queue.is_empty());
        assert!(app.is_drained());
        app.flush_output().unwrap();
        assert_eq!(buf.contents().matches('\n').count(), 1);
    }

    #[tokio::test]
    async fn failed_widgets_leave_their_slots_empty() {
        let (mut app, buf, mut evt_recv) = test_app(
            r#"
            [general]
            order = ["greet", "broken"]
            [module.greet]
            type = "static_text"
            text = "hi"
            [module.broken]
            type = "no_such_widget"
            "#,
        );
        assert_eq!(app.workers[1].state, WorkerState::Dead);
        app.start_workers();
        // only the healthy widget ever produces output
        pump_one(&mut app, &mut evt_recv).await;
        assert!(app.is_drained());
        app.handle_command(DaemonCommand::RefreshWorker { id: WorkerId(1) });
        app.flush_output().unwrap();
        assert!(!buf.contents().contains("broken"));
    }

    #[tokio::test]
    async fn one_worker_fills_every_position_it_owns() {
        let (mut app, buf, mut evt_recv) = test_app(
            r#"
            [general]
            order = ["greet", "other", "greet"]
            [module.greet]
            type = "static_text"
            text = "hi"
            [module.other]
            type = "static_text"
            text = "mid"
            "#,
        );
        assert_eq!(app.workers.len(), 2);
        assert_eq!(app.workers[0].positions, vec![0, 2]);
        app.start_workers();
        pump_one(&mut app, &mut evt_recv).await;
        pump_one(&mut app, &mut evt_recv).await;
        app.flush_output().unwrap();
        let frame = buf.contents();
        assert_eq!(frame.matches("\"hi\"").count(), 2);
        assert_eq!(frame.matches("\"mid\"").count(), 1);
    }

    #[tokio::test]
    async fn click_bindings_run_and_refresh() {
        let (mut app, _buf, mut evt_recv) = test_app(
            r#"
            [general]
            order = ["greet"]
            [module.greet]
            type = "static_text"
            text = "hi"
            on_click.1 = "refresh"
            "#,
        );
        app.start_workers();
        pump_one(&mut app, &mut evt_recv).await;
        assert_eq!(app.workers[0].state, WorkerState::Idle);

        let click = ClickEvent::new(Some("greet"), None, BUTTON_LEFT);
        app.handle_command(DaemonCommand::Click(click.clone()));
        assert_eq!(app.workers[0].state, WorkerState::Scheduled);
        app.tick();
        assert_eq!(app.workers[0].state, WorkerState::Running);

        // a second click inside the rate window is dropped
        app.handle_command(DaemonCommand::Click(click));
        assert!(!app.workers[0].refresh_pending);
        pump_one(&mut app, &mut evt_recv).await;
        assert!(app.is_drained());
    }

    #[tokio::test]
    async fn middle_click_invalidates_the_cache() {
        let (mut app, _buf, mut evt_recv) = test_app(GREETER);
        app.start_workers();
        pump_one(&mut app, &mut evt_recv).await;
        assert!(app.queue.is_empty());

        app.handle_command(DaemonCommand::Click(ClickEvent::new(Some("greet"), None, BUTTON_MIDDLE)));
        assert_eq!(app.workers[0].state, WorkerState::Scheduled);

        app.handle_command(DaemonCommand::Click(ClickEvent::new(Some("greet"), None, BUTTON_LEFT)));
        // left click without binding or handler does nothing
        assert_eq!(app.run_now.len(), 1);
    }

    #[tokio::test]
    async fn refreshes_while_running_coalesce() {
        let (mut app, _buf, mut evt_recv) = test_app(GREETER);
        app.start_workers();
        assert_eq!(app.workers[0].state, WorkerState::Running);
        app.handle_command(DaemonCommand::Refresh { selectors: vec![ModuleSelector::from_str("greet").unwrap()] });
        assert!(app.workers[0].refresh_pending);
        pump_one(&mut app, &mut evt_recv).await;
        // the pending bit turned into exactly one more queued run
        assert_eq!(app.workers[0].state, WorkerState::Scheduled);
        assert_eq!(app.run_now, vec![WorkerId(0)]);
        assert!(!app.workers[0].refresh_pending);
    }

    #[tokio::test]
    async fn upstream_slots_update_and_dedup() {
        let (mut app, buf, _evt_recv) = test_app(
            r#"
            [general]
            order = ["time"]
            [upstream]
            command = "i3status"
            modules = ["time"]
            "#,
        );
        assert!(matches!(app.workers[0].kind, WorkerKind::Upstream));
        let slots = app.upstream_slots();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].time_format.as_deref(), Some("%Y-%m-%d %H:%M:%S"));

        app.handle_command(DaemonCommand::UpstreamSlots(vec![(WorkerId(0), vec![Block::new("12:00")])]));
        app.flush_output().unwrap();
        app.handle_command(DaemonCommand::UpstreamSlots(vec![(WorkerId(0), vec![Block::new("12:00")])]));
        app.flush_output().unwrap();
        assert_eq!(buf.contents().matches("12:00").count(), 1);
    }

    #[tokio::test]
    async fn a_failed_upstream_empties_its_slots() {
        let (mut app, buf, _evt_recv) = test_app(
            r#"
            [general]
            order = ["time"]
            [upstream]
            command = "i3status"
            modules = ["time"]
            "#,
        );
        app.handle_command(DaemonCommand::UpstreamSlots(vec![(WorkerId(0), vec![Block::new("12:00")])]));
        app.flush_output().unwrap();
        app.handle_command(DaemonCommand::UpstreamFailed);
        app.flush_output().unwrap();
        assert!(buf.contents().ends_with(",[]\n"));
        assert_eq!(app.workers[0].state, WorkerState::Dead);
    }

    #[tokio::test]
    async fn hiding_the_bar_pauses_everything() {
        let (mut app, buf, mut evt_recv) = test_app(GREETER);
        app.start_workers();
        pump_one(&mut app, &mut evt_recv).await;
        app.flush_output().unwrap();
        let visible_frame = buf.contents();

        app.handle_command(DaemonCommand::Suspend);
        assert_eq!(app.workers[0].state, WorkerState::Sleeping);
        app.handle_command(DaemonCommand::UpstreamSlots(vec![]));
        app.flush_output().unwrap();
        assert_eq!(buf.contents(), visible_frame);

        app.handle_command(DaemonCommand::Resume);
        // waking re-runs the widget
        pump_one(&mut app, &mut evt_recv).await;
        app.flush_output().unwrap();
        assert!(app.is_drained());
    }

    #[tokio::test]
    async fn shutdown_stops_dispatching() {
        let (mut app, _buf, _evt_recv) = test_app(GREETER);
        app.begin_shutdown();
        app.start_workers();
        assert!(app.is_drained());
        assert!(app.stopping);
    }
}
