use anyhow::Result;
use barmux_protocol::ClickEvent;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedSender;

use crate::app::DaemonCommand;
use crate::worker::{WorkerId, WorkerKey};

/// Read the click event stream from stdin and forward it to the bar.
/// EOF means the status line reader is gone, which ends the process.
pub async fn run_click_reader(evt_send: UnboundedSender<DaemonCommand>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    crate::loop_select_exiting! {
        line = lines.next_line() => match line {
            Ok(Some(line)) => match barmux_protocol::parse_click_line(&line) {
                Ok(Some(event)) => evt_send.send(DaemonCommand::Click(event))?,
                Ok(None) => {}
                Err(err) => log::warn!("Ignoring malformed click event {:?}: {}", line, err),
            },
            Ok(None) => {
                log::info!("Click event stream closed, shutting down");
                evt_send.send(DaemonCommand::Shutdown)?;
                break;
            }
            Err(err) => {
                log::warn!("Error reading click events: {}", err);
                evt_send.send(DaemonCommand::Shutdown)?;
                break;
            }
        }
    }
    Ok(())
}

/// Pick the worker a click addresses among `candidates`, the workers whose
/// name equals the event's name, in registration order.
///
/// Upstream children sometimes omit the instance even when several
/// instances of a module run, most commonly with batteries, and report
/// instances (mount points, interface names) that need not equal the alias
/// a slot was configured under. An exact instance match wins; everything
/// else goes to the first registered worker of that name.
pub fn resolve_click_target(event: &ClickEvent, candidates: &[(WorkerId, &WorkerKey)]) -> Option<WorkerId> {
    let wanted = event.instance.as_deref().unwrap_or("");
    candidates
        .iter()
        .find(|(_, key)| key.instance == wanted)
        .or_else(|| candidates.first())
        .map(|(id, _)| *id)
}

#[cfg(test)]
mod test {
    use super::*;
    use barmux_protocol::BUTTON_LEFT;

    fn key(name: &str, instance: &str) -> WorkerKey {
        WorkerKey { name: name.to_string(), instance: instance.to_string() }
    }

    fn event(instance: Option<&str>) -> ClickEvent {
        ClickEvent::new(Some("battery"), instance, BUTTON_LEFT)
    }

    #[test]
    fn exact_instance_wins() {
        let keys = [key("battery", "0"), key("battery", "1")];
        let candidates = vec![(WorkerId(4), &keys[0]), (WorkerId(7), &keys[1])];
        assert_eq!(resolve_click_target(&event(Some("1")), &candidates), Some(WorkerId(7)));
    }

    #[test]
    fn instanceless_events_go_to_the_first_registered_worker() {
        let keys = [key("battery", "1"), key("battery", "0")];
        let candidates = vec![(WorkerId(2), &keys[0]), (WorkerId(5), &keys[1])];
        assert_eq!(resolve_click_target(&event(None), &candidates), Some(WorkerId(2)));
    }

    #[test]
    fn an_instanceless_worker_takes_instanceless_events_first() {
        let keys = [key("battery", "0"), key("battery", "")];
        let candidates = vec![(WorkerId(1), &keys[0]), (WorkerId(3), &keys[1])];
        assert_eq!(resolve_click_target(&event(None), &candidates), Some(WorkerId(3)));
    }

    #[test]
    fn unmatched_instances_fall_back_to_the_first_worker() {
        let keys = [key("battery", "0"), key("battery", "1")];
        let candidates = vec![(WorkerId(1), &keys[0]), (WorkerId(6), &keys[1])];
        assert_eq!(resolve_click_target(&event(Some("9")), &candidates), Some(WorkerId(1)));
        assert_eq!(resolve_click_target(&event(None), &[]), None);
    }
}
