use std::time::Instant;

use anyhow::{Context, Result};
use barmux_protocol::Header;
use tokio::sync::broadcast;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::app::{App, DaemonCommand};
use crate::config::BarConfig;
use crate::lifecycle;
use crate::output::{self, OutputAssembler};
use crate::paths::BarmuxPaths;
use crate::{control_server, device_watch, events, upstream};

pub fn initialize_server(config_file: std::path::PathBuf) -> Result<()> {
    let config = BarConfig::read_from_file(&config_file)?;
    let paths = BarmuxPaths::new(config_file, config.general.socket_dir.clone(), config.general.socket_prefix.clone())?;
    log::info!("Loading paths: {}", &paths);

    // the subscription must predate the signal handler; an exit sent from
    // the signal thread before anyone listens would otherwise be lost
    let exit_recv = lifecycle::subscribe_exit();
    simple_signal::set_handler(&[simple_signal::Signal::Int, simple_signal::Signal::Term], move |_| {
        log::info!("Shutting down barmux...");
        if let Err(e) = lifecycle::send_exit() {
            log::error!("Failed to send the shutdown event: {:?}", e);
            std::process::exit(lifecycle::EXIT_RUNTIME);
        }
    });

    let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build().expect("Failed to initialize tokio runtime");
    let result = rt.block_on(run_server(config, &paths, exit_recv));

    // a stale socket would make clients think this pid is still alive
    let _ = std::fs::remove_file(paths.ctl_socket_file());
    result
}

async fn run_server(config: BarConfig, paths: &BarmuxPaths, exit_recv: broadcast::Receiver<()>) -> Result<()> {
    let (evt_send, mut evt_recv) = tokio::sync::mpsc::unbounded_channel();

    let header = Header::new(config.general.click_events, config.general.stop_signal);
    let output = OutputAssembler::new(Box::new(std::io::stdout()), config.general.order.len(), header);

    let mut app = App::new(config, output, evt_send.clone())?;

    if app.config.upstream.enabled() {
        let slots = app.upstream_slots();
        app.upstream = Some(upstream::init(&app.config, slots, evt_send.clone())?);
    }

    let subscriptions = app.watch_subscriptions();
    if !subscriptions.is_empty() {
        let handle = device_watch::init(evt_send.clone());
        for (worker, watch_paths) in subscriptions {
            handle.subscribe(worker, watch_paths);
        }
        app.device_watch = Some(handle);
    }

    init_async_part(&evt_send, paths, exit_recv, app.config.general.click_events, app.config.general.stop_signal);

    if let Err(err) = app.output.write_header() {
        return handle_write_error(&mut app, err);
    }
    app.start_workers();

    let result = run_main_loop(&mut app, &mut evt_recv).await;

    drain_workers(&mut app, &mut evt_recv).await;
    log::info!("main application loop finished");
    result
}

/// All the tasks running next to the scheduler: the exit forwarder, the
/// control socket, the click event reader and the signal forwarders.
fn init_async_part(
    evt_send: &UnboundedSender<DaemonCommand>,
    paths: &BarmuxPaths,
    exit_recv: broadcast::Receiver<()>,
    click_events: bool,
    stop_signal: i32,
) {
    forward_exit_to_app(exit_recv, evt_send.clone());

    let socket_file = paths.ctl_socket_file();
    let ctl_send = evt_send.clone();
    tokio::spawn(async move {
        let result = control_server::run_server(ctl_send, socket_file).await;
        crate::print_result_err!("in the control socket task", result);
    });

    if click_events {
        let click_send = evt_send.clone();
        tokio::spawn(async move {
            let result = events::run_click_reader(click_send).await;
            crate::print_result_err!("in the click event reader", result);
        });
    }

    spawn_signal_forwarder(evt_send.clone(), libc::SIGUSR1, || DaemonCommand::RefreshAll);
    spawn_signal_forwarder(evt_send.clone(), stop_signal, || DaemonCommand::Suspend);
    spawn_signal_forwarder(evt_send.clone(), libc::SIGCONT, || DaemonCommand::Resume);
}

/// Turn the lifecycle exit event into a command in the scheduler mailbox.
/// The scheduler loop only ever observes shutdown as a mailbox command.
fn forward_exit_to_app(mut exit_recv: broadcast::Receiver<()>, evt_send: UnboundedSender<DaemonCommand>) {
    tokio::spawn(async move {
        let _ = exit_recv.recv().await;
        let _ = evt_send.send(DaemonCommand::Shutdown);
    });
}

/// Turn every delivery of a signal into one daemon command. Installed one
/// per signal so a stop signal that cannot be handled (the config may name
/// an uncatchable one) does not take the other listeners down with it.
fn spawn_signal_forwarder(evt_send: UnboundedSender<DaemonCommand>, signal_number: i32, command: fn() -> DaemonCommand) {
    tokio::spawn(async move {
        let result = forward_signal(evt_send, signal_number, command).await;
        crate::print_result_err!("in a signal listener", result);
    });
}

async fn forward_signal(
    evt_send: UnboundedSender<DaemonCommand>,
    signal_number: i32,
    command: fn() -> DaemonCommand,
) -> Result<()> {
    let mut stream = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::from_raw(signal_number))
        .with_context(|| format!("Failed to install a handler for signal {}", signal_number))?;
    crate::loop_select_exiting! {
        Some(()) = stream.recv() => evt_send.send(command())?,
    }
    Ok(())
}

async fn run_main_loop(app: &mut App, evt_recv: &mut UnboundedReceiver<DaemonCommand>) -> Result<()> {
    while !app.stopping {
        tokio::select! {
            Some(event) = evt_recv.recv() => {
                app.handle_command(event);
                // render once per batch, not once per event
                while let Ok(event) = evt_recv.try_recv() {
                    app.handle_command(event);
                }
            }
            _ = sleep_until(app.next_deadline()) => {}
        }
        if app.stopping {
            break;
        }
        app.tick();
        if let Err(err) = app.flush_output() {
            return handle_write_error(app, err);
        }
    }
    Ok(())
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

/// A closed stdout means the status line reader is gone and the bar is done;
/// anything else is a hard failure.
fn handle_write_error(app: &mut App, err: anyhow::Error) -> Result<()> {
    if output::is_broken_pipe(&err) {
        log::info!("Status line reader closed the pipe, shutting down");
        app.begin_shutdown();
        Ok(())
    } else {
        lifecycle::set_exit_code(lifecycle::EXIT_RUNTIME);
        Err(err).context("Failed to write to the status line")
    }
}

/// Give in-flight widget runs a moment to come back so their threads do not
/// get torn down mid-run. Their results are recorded but no longer emitted.
async fn drain_workers(app: &mut App, evt_recv: &mut UnboundedReceiver<DaemonCommand>) {
    let deadline = tokio::time::Instant::now() + app.config.general.drain_timeout();
    while !app.is_drained() {
        let event = tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                log::warn!("Shutdown timed out waiting for running widgets");
                return;
            }
            event = evt_recv.recv() => event,
        };
        match event {
            Some(event) => app.handle_command(event),
            None => return,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn an_exit_event_becomes_a_shutdown_command() {
        let (evt_send, mut evt_recv) = tokio::sync::mpsc::unbounded_channel();
        forward_exit_to_app(lifecycle::subscribe_exit(), evt_send);
        lifecycle::send_exit().unwrap();
        assert!(matches!(evt_recv.recv().await, Some(DaemonCommand::Shutdown)));
    }

    #[tokio::test]
    async fn an_exit_sent_before_the_forwarder_polls_is_not_lost() {
        let (evt_send, mut evt_recv) = tokio::sync::mpsc::unbounded_channel();
        let exit_recv = lifecycle::subscribe_exit();
        lifecycle::send_exit().unwrap();
        forward_exit_to_app(exit_recv, evt_send);
        assert!(matches!(evt_recv.recv().await, Some(DaemonCommand::Shutdown)));
    }
}
