use anyhow::{Context, Result};
use barmux_protocol::{CtlCommand, CtlRequest, MAX_CTL_MESSAGE};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::UnboundedSender;

use crate::app::DaemonCommand;

pub async fn run_server<P: AsRef<std::path::Path>>(evt_send: UnboundedSender<DaemonCommand>, socket_path: P) -> Result<()> {
    let socket_path = socket_path.as_ref();
    // a socket file left behind by a previous process that had our pid
    let _ = std::fs::remove_file(socket_path);
    let listener = tokio::net::UnixListener::bind(socket_path)
        .with_context(|| format!("Failed to bind control socket {}", socket_path.display()))?;
    log::info!("Control socket initialized at {}", socket_path.display());
    crate::loop_select_exiting! {
        connection = listener.accept() => match connection {
            Ok((stream, _addr)) => {
                let evt_send = evt_send.clone();
                tokio::spawn(async move {
                    let result = handle_connection(stream, evt_send).await;
                    crate::print_result_err!("while handling control connection", result);
                });
            },
            Err(e) => log::error!("Failed to accept control connection: {:?}", e),
        }
    }
    Ok(())
}

/// Handle a single control connection from start to end. Requests get no
/// response; a client that closes without sending anything is only probing
/// whether this process is alive.
async fn handle_connection(stream: tokio::net::UnixStream, evt_send: UnboundedSender<DaemonCommand>) -> Result<()> {
    // read one byte over the cap so oversized messages fail in parse()
    // rather than being silently truncated
    let mut raw = Vec::new();
    stream
        .take((MAX_CTL_MESSAGE + 1) as u64)
        .read_to_end(&mut raw)
        .await
        .context("Failed to read control message")?;
    if raw.is_empty() {
        return Ok(());
    }
    let request = CtlRequest::parse(&raw).context("Failed to parse control message")?;
    log::debug!("Received control request: {:?}", &request);
    for command in into_daemon_commands(request)? {
        evt_send.send(command)?;
    }
    Ok(())
}

fn into_daemon_commands(request: CtlRequest) -> Result<Vec<DaemonCommand>> {
    Ok(match request.command {
        CtlCommand::RefreshAll => vec![DaemonCommand::RefreshAll],
        CtlCommand::Refresh => {
            let selectors = request.selectors().context("Invalid module selector")?;
            if selectors.is_empty() {
                log::debug!("Refresh request without modules does nothing");
                vec![]
            } else {
                vec![DaemonCommand::Refresh { selectors }]
            }
        }
        CtlCommand::Click => {
            let selectors = request.selectors().context("Invalid module selector")?;
            selectors.iter().map(|selector| DaemonCommand::Click(request.click_event_for(selector))).collect()
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn refresh_requests_turn_into_one_command() {
        let request = CtlRequest::parse(br#"{"command":"refresh","module":["clock","battery 1"]}"#).unwrap();
        let commands = into_daemon_commands(request).unwrap();
        assert_eq!(commands.len(), 1);
        match &commands[0] {
            DaemonCommand::Refresh { selectors } => {
                assert_eq!(selectors.len(), 2);
                assert_eq!(selectors[1].name, "battery");
                assert_eq!(selectors[1].instance.as_deref(), Some("1"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn click_requests_fan_out_per_module() {
        let request = CtlRequest::parse(br#"{"command":"click","module":["volume","clock"],"button":2}"#).unwrap();
        let commands = into_daemon_commands(request).unwrap();
        assert_eq!(commands.len(), 2);
        match &commands[1] {
            DaemonCommand::Click(event) => {
                assert_eq!(event.name.as_deref(), Some("clock"));
                assert_eq!(event.button, 2);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn empty_refresh_is_dropped() {
        let request = CtlRequest::parse(br#"{"command":"refresh"}"#).unwrap();
        assert!(into_daemon_commands(request).unwrap().is_empty());
    }
}
