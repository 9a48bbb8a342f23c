use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::app::DaemonCommand;
use crate::scheduler::RateLimiter;
use crate::worker::WorkerId;

/// Bridges kernel device events to worker refreshes. Workers subscribe
/// with filesystem paths (device nodes, sysfs attributes, mount points);
/// any event at or below a subscribed path refreshes the subscriber,
/// throttled per worker so chatty devices cannot flood the bar.
pub struct DeviceWatchHandle {
    msg_send: UnboundedSender<DeviceWatchMsg>,
}

impl DeviceWatchHandle {
    pub fn subscribe(&self, worker: WorkerId, paths: Vec<PathBuf>) {
        crate::print_result_err!(
            "while subscribing a worker to device events",
            self.msg_send.send(DeviceWatchMsg::Subscribe { worker, paths })
        );
    }
}

#[derive(Debug)]
enum DeviceWatchMsg {
    Subscribe { worker: WorkerId, paths: Vec<PathBuf> },
}

pub fn init(evt_send: UnboundedSender<DaemonCommand>) -> DeviceWatchHandle {
    let (msg_send, msg_recv) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let result = run(msg_recv, evt_send).await;
        crate::print_result_err!("in the device watch task", result);
    });
    DeviceWatchHandle { msg_send }
}

async fn run(mut msg_recv: UnboundedReceiver<DeviceWatchMsg>, evt_send: UnboundedSender<DaemonCommand>) -> Result<()> {
    let (fs_send, mut fs_recv) = mpsc::unbounded_channel();
    let mut watcher: RecommendedWatcher = Watcher::new(
        move |res: notify::Result<notify::Event>| match res {
            Ok(event) if !event.paths.is_empty() => {
                if let Err(err) = fs_send.send(event.paths) {
                    log::warn!("Error forwarding device event: {:?}", err);
                }
            }
            Ok(_) => {}
            Err(e) => log::error!("Encountered error while watching devices: {}", e),
        },
        notify::Config::default(),
    )?;

    let mut subscriptions: Vec<(WorkerId, PathBuf)> = Vec::new();
    let mut limiters: HashMap<WorkerId, RateLimiter> = HashMap::new();

    crate::loop_select_exiting! {
        Some(msg) = msg_recv.recv() => match msg {
            DeviceWatchMsg::Subscribe { worker, paths } => {
                for path in paths {
                    match watcher.watch(&path, RecursiveMode::Recursive) {
                        Ok(()) => subscriptions.push((worker, path)),
                        Err(err) => log::warn!("Cannot watch {} for worker {}: {}", path.display(), worker, err),
                    }
                }
            }
        },
        Some(paths) = fs_recv.recv() => {
            let now = Instant::now();
            for worker in subscribers_for(&paths, &subscriptions) {
                let limiter = limiters
                    .entry(worker)
                    .or_insert_with(|| RateLimiter::new(RateLimiter::REFRESH_WINDOW));
                if limiter.try_acquire(now) {
                    evt_send.send(DaemonCommand::RefreshWorker { id: worker })?;
                }
            }
        },
        else => break,
    }
    Ok(())
}

fn subscribers_for(paths: &[PathBuf], subscriptions: &[(WorkerId, PathBuf)]) -> Vec<WorkerId> {
    let mut hit: Vec<WorkerId> = subscriptions
        .iter()
        .filter(|(_, base)| paths.iter().any(|path| path.starts_with(base)))
        .map(|(worker, _)| *worker)
        .collect();
    hit.sort();
    hit.dedup();
    hit
}
