use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use barmux_protocol::{parse_output_line, Block, Frame};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, NaiveDateTime, NaiveTime, Utc};
use nix::sys::signal;
use nix::unistd::{setpgid, Pid};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::app::DaemonCommand;
use crate::config::{upstream_config, BarConfig};
use crate::util::{duration_to_next_tick, format_has_seconds};
use crate::worker::{WorkerId, WorkerKey};

/// How the bar talks to the adapter task.
pub struct UpstreamHandle {
    msg_send: UnboundedSender<UpstreamMsg>,
}

impl UpstreamHandle {
    pub fn refresh(&self) {
        self.send(UpstreamMsg::Refresh);
    }

    pub fn suspend(&self) {
        self.send(UpstreamMsg::Suspend);
    }

    pub fn resume(&self) {
        self.send(UpstreamMsg::Resume);
    }

    pub fn stop(&self) {
        self.send(UpstreamMsg::Stop);
    }

    fn send(&self, msg: UpstreamMsg) {
        crate::print_result_err!("while sending a message to the upstream adapter", self.msg_send.send(msg));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpstreamMsg {
    Refresh,
    Suspend,
    Resume,
    Stop,
}

/// One bar slot owned by the upstream child, in the order the child
/// emits its blocks.
pub struct UpstreamSlot {
    pub worker: WorkerId,
    pub key: WorkerKey,
    /// Set for time-of-day modules, whose text the adapter re-renders
    /// locally between child refreshes.
    pub time_format: Option<String>,
}

/// Start the adapter task that runs and supervises the upstream child.
pub fn init(config: &BarConfig, slots: Vec<UpstreamSlot>, evt_send: UnboundedSender<DaemonCommand>) -> Result<UpstreamHandle> {
    let (msg_send, msg_recv) = mpsc::unbounded_channel();
    let adapter = UpstreamAdapter {
        command: config.upstream.command.clone().context("upstream.command is not set")?,
        child_config: upstream_config::generate_child_config(config),
        max_respawns: config.upstream.max_respawns,
        slots: slots.into_iter().map(SlotState::new).collect(),
        suspended: false,
        evt_send,
    };
    tokio::spawn(async move {
        crate::print_result_err!("in the upstream adapter", adapter.run(msg_recv).await);
    });
    Ok(UpstreamHandle { msg_send })
}

struct UpstreamAdapter {
    command: String,
    child_config: String,
    max_respawns: u32,
    slots: Vec<SlotState>,
    suspended: bool,
    evt_send: UnboundedSender<DaemonCommand>,
}

struct SlotState {
    worker: WorkerId,
    key: WorkerKey,
    time: Option<TimeSlotState>,
    last: Vec<Block>,
}

struct TimeSlotState {
    format: String,
    per_second: bool,
    offset: Option<FixedOffset>,
}

impl SlotState {
    fn new(slot: UpstreamSlot) -> Self {
        let time = slot.time_format.and_then(|format| {
            if StrftimeItems::new(&format).any(|item| matches!(item, Item::Error)) {
                log::warn!("Invalid time format {:?} for {}, passing its text through unchanged", format, slot.key);
                None
            } else {
                let per_second = format_has_seconds(&format);
                Some(TimeSlotState { format, per_second, offset: None })
            }
        });
        SlotState { worker: slot.worker, key: slot.key, time, last: Vec::new() }
    }
}

enum ChildEnd {
    Died,
    Stopped,
}

impl UpstreamAdapter {
    async fn run(mut self, mut msg_recv: UnboundedReceiver<UpstreamMsg>) -> Result<()> {
        let mut exit_recv = crate::lifecycle::subscribe_exit();
        let mut deaths: u32 = 0;
        loop {
            if deaths >= self.max_respawns {
                self.enter_mock_mode();
                // stay around so handles keep working, but never spawn again
                crate::loop_select_exiting! {
                    Some(msg) = msg_recv.recv() => if msg == UpstreamMsg::Stop { break },
                    else => break,
                }
                return Ok(());
            }
            if deaths > 0 {
                let backoff = respawn_backoff(deaths);
                log::warn!("Upstream child died ({}/{}), respawning in {:?}", deaths, self.max_respawns, backoff);
                tokio::select! {
                    _ = exit_recv.recv() => return Ok(()),
                    Some(msg) = msg_recv.recv() => if msg == UpstreamMsg::Stop { return Ok(()) },
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
            match self.run_child(&mut msg_recv, &mut exit_recv).await {
                Ok(ChildEnd::Stopped) => return Ok(()),
                Ok(ChildEnd::Died) => deaths += 1,
                Err(err) => {
                    log::error!("Failed to run upstream child: {:?}", err);
                    deaths += 1;
                }
            }
        }
    }

    async fn run_child(
        &mut self,
        msg_recv: &mut UnboundedReceiver<UpstreamMsg>,
        exit_recv: &mut broadcast::Receiver<()>,
    ) -> Result<ChildEnd> {
        use std::io::Write;

        let mut config_file = tempfile::Builder::new()
            .prefix("barmux-upstream-")
            .suffix(".conf")
            .tempfile()
            .context("Failed to create the upstream configuration file")?;
        config_file.write_all(self.child_config.as_bytes())?;
        config_file.flush()?;

        let shell_command = format!("exec {} -c '{}'", self.command, config_file.path().display());
        let mut child = unsafe {
            tokio::process::Command::new("sh")
                .args(["-c", &shell_command])
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .stdin(Stdio::null())
                .pre_exec(|| {
                    let _ = setpgid(Pid::from_raw(0), Pid::from_raw(0));
                    Ok(())
                })
                .spawn()
                .with_context(|| format!("Failed to spawn upstream command {:?}", self.command))?
        };
        log::info!("Started upstream child {:?} (pid {:?})", self.command, child.id());

        let mut stdout_lines = BufReader::new(child.stdout.take().context("Upstream stdout is not piped")?).lines();
        let mut stderr_lines = BufReader::new(child.stderr.take().context("Upstream stderr is not piped")?).lines();

        loop {
            let tick = self.next_time_tick();
            tokio::select! {
                _ = exit_recv.recv() => {
                    terminate_child(child).await;
                    return Ok(ChildEnd::Stopped);
                }
                Some(msg) = msg_recv.recv() => match msg {
                    UpstreamMsg::Refresh => self.signal_child(&child, signal::Signal::SIGUSR1),
                    UpstreamMsg::Suspend => {
                        self.suspended = true;
                        self.signal_child(&child, signal::Signal::SIGSTOP);
                    }
                    UpstreamMsg::Resume => {
                        self.suspended = false;
                        self.signal_child(&child, signal::Signal::SIGCONT);
                        self.signal_child(&child, signal::Signal::SIGUSR1);
                    }
                    UpstreamMsg::Stop => {
                        terminate_child(child).await;
                        return Ok(ChildEnd::Stopped);
                    }
                },
                result = child.wait() => {
                    match result {
                        Ok(status) => log::warn!("Upstream child exited with {}", status),
                        Err(err) => log::warn!("Failed to wait for the upstream child: {}", err),
                    }
                    return Ok(ChildEnd::Died);
                }
                Ok(Some(line)) = stdout_lines.next_line() => self.handle_output_line(&line),
                Ok(Some(line)) = stderr_lines.next_line() => log::warn!("Upstream stderr: {}", line),
                _ = sleep_until_tick(tick) => {
                    let updates = self.tick_time_slots(Utc::now());
                    self.send_updates(updates);
                }
            }
        }
    }

    fn handle_output_line(&mut self, line: &str) {
        match parse_output_line(line) {
            Ok(Frame::Blocks(blocks)) => {
                let updates = self.apply_frame(blocks, Utc::now());
                self.send_updates(updates);
            }
            Ok(Frame::Header(header)) => log::debug!("Upstream speaks status protocol version {}", header.version),
            Ok(Frame::ArrayOpen | Frame::Empty) => {}
            Ok(Frame::ArrayClose) => log::info!("Upstream closed its output array"),
            Err(err) => log::warn!("Ignoring malformed upstream line {:?}: {}", line, err),
        }
    }

    /// Map one child frame onto the slots, positionally. Only slots whose
    /// block actually changed produce updates; time slots additionally
    /// re-derive the child's UTC offset from the rendered text.
    fn apply_frame(&mut self, blocks: Vec<Block>, now_utc: DateTime<Utc>) -> Vec<(WorkerId, Vec<Block>)> {
        if blocks.len() != self.slots.len() {
            log::debug!("Upstream frame has {} blocks for {} slots", blocks.len(), self.slots.len());
        }
        let mut updates = Vec::new();
        for (slot, block) in self.slots.iter_mut().zip(blocks) {
            if let Some(time) = &mut slot.time {
                if let Some(offset) = reconstruct_offset(&block.full_text, &time.format, now_utc) {
                    time.offset = Some(offset);
                }
            }
            let fresh = vec![block];
            if slot.last != fresh {
                slot.last = fresh.clone();
                updates.push((slot.worker, fresh));
            }
        }
        updates
    }

    /// Re-render the text of every time slot whose timezone is known.
    fn tick_time_slots(&mut self, now_utc: DateTime<Utc>) -> Vec<(WorkerId, Vec<Block>)> {
        let mut updates = Vec::new();
        for slot in &mut self.slots {
            let Some(time) = &slot.time else { continue };
            let Some(offset) = time.offset else { continue };
            let Some(block) = slot.last.first() else { continue };
            let text = now_utc.with_timezone(&offset).format(&time.format).to_string();
            if block.full_text != text {
                let mut block = block.clone();
                block.full_text = text;
                slot.last = vec![block.clone()];
                updates.push((slot.worker, vec![block]));
            }
        }
        updates
    }

    /// The next wall-clock boundary at which some time slot goes stale.
    fn next_time_tick(&self) -> Option<Instant> {
        if self.suspended {
            return None;
        }
        let now = chrono::Local::now();
        self.slots
            .iter()
            .filter_map(|slot| {
                let time = slot.time.as_ref()?;
                time.offset?;
                slot.last.first()?;
                Some(duration_to_next_tick(&now, time.per_second))
            })
            .min()
            .map(|wait| Instant::now() + wait)
    }

    fn enter_mock_mode(&mut self) {
        log::error!("Upstream child died {} times, continuing without it", self.max_respawns);
        let updates: Vec<(WorkerId, Vec<Block>)> = self
            .slots
            .iter_mut()
            .filter(|slot| !slot.last.is_empty())
            .map(|slot| {
                slot.last.clear();
                (slot.worker, Vec::new())
            })
            .collect();
        self.send_updates(updates);
        let _ = self.evt_send.send(DaemonCommand::UpstreamFailed);
    }

    fn send_updates(&self, updates: Vec<(WorkerId, Vec<Block>)>) {
        if updates.is_empty() {
            return;
        }
        crate::print_result_err!(
            "while forwarding upstream slot updates",
            self.evt_send.send(DaemonCommand::UpstreamSlots(updates))
        );
    }

    fn signal_child(&self, child: &tokio::process::Child, sig: signal::Signal) {
        let Some(pid) = child.id() else { return };
        crate::print_result_err!("while signalling the upstream child", signal::killpg(Pid::from_raw(pid as i32), sig));
    }
}

async fn sleep_until_tick(tick: Option<Instant>) {
    match tick {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

async fn terminate_child(mut child: tokio::process::Child) {
    if let Some(id) = child.id() {
        log::debug!("Terminating upstream process group {}", id);
        let _ = signal::killpg(Pid::from_raw(id as i32), signal::Signal::SIGTERM);
        tokio::select! {
            _ = child.wait() => {}
            _ = tokio::time::sleep(Duration::from_secs(10)) => {
                let _ = child.kill().await;
            }
        };
    } else {
        let _ = child.kill().await;
    }
}

fn respawn_backoff(deaths: u32) -> Duration {
    let exp = deaths.saturating_sub(1).min(6);
    Duration::from_millis((100u64 << exp).min(5000))
}

/// Reconstruct the child's UTC offset from a rendered time string. The
/// child formats in its own timezone, which we cannot see directly;
/// comparing its text against our own clock and rounding to a quarter
/// hour recovers every real offset.
fn reconstruct_offset(text: &str, format: &str, now_utc: DateTime<Utc>) -> Option<FixedOffset> {
    let rendered = parse_rendered_time(text, format, now_utc)?;
    let mut minutes = (rendered - now_utc.naive_utc()).num_minutes();
    // a time-only format read near midnight can land on the wrong day
    while minutes > 14 * 60 {
        minutes -= 24 * 60;
    }
    while minutes < -12 * 60 {
        minutes += 24 * 60;
    }
    let quarter_hours = (minutes as f64 / 15.0).round() as i32;
    FixedOffset::east_opt(quarter_hours * 15 * 60)
}

fn parse_rendered_time(text: &str, format: &str, now_utc: DateTime<Utc>) -> Option<NaiveDateTime> {
    if let Ok(datetime) = NaiveDateTime::parse_from_str(text, format) {
        return Some(datetime);
    }
    let time = NaiveTime::parse_from_str(text, format).ok()?;
    Some(now_utc.date_naive().and_time(time))
}
