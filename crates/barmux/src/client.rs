use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::Path;

use anyhow::{bail, Context, Result};
use barmux_protocol::CtlRequest;

use crate::opts::ActionCtl;
use crate::paths::BarmuxPaths;

/// Forward a control action to every running bar. Commands are silent on
/// success, `ping` reports how many bars answered.
pub fn handle_ctl_action(paths: &BarmuxPaths, action: ActionCtl) -> Result<()> {
    match action.into_ctl_request() {
        Some(request) => {
            request.selectors().context("Invalid module selector")?;
            let reached = send_to_all(paths, &request)?;
            if reached == 0 {
                bail!("No running barmux instance reachable");
            }
            log::debug!("Delivered the request to {} instance(s)", reached);
        }
        None => {
            let alive = ping_all(paths)?;
            if alive == 0 {
                bail!("No running barmux instance reachable");
            }
            println!("{} instance(s) running", alive);
        }
    }
    Ok(())
}

/// Send one request to each control socket, skipping sockets whose process
/// is gone. Returns how many instances took the request.
fn send_to_all(paths: &BarmuxPaths, request: &CtlRequest) -> Result<usize> {
    let message = serde_json::to_vec(request).context("Failed to serialize the control request")?;
    let mut reached = 0;
    for socket in paths.enumerate_ctl_sockets()? {
        match send_request(&socket, &message) {
            Ok(()) => reached += 1,
            Err(err) => log::debug!("Skipping {}: {:#}", socket.display(), err),
        }
    }
    Ok(reached)
}

fn send_request(socket: &Path, message: &[u8]) -> Result<()> {
    let mut stream = UnixStream::connect(socket).context("Failed to connect")?;
    stream.write_all(message).context("Failed to send the request")?;
    stream.shutdown(std::net::Shutdown::Write).context("Failed to close the stream")?;
    Ok(())
}

/// Probe every control socket with an empty connection.
fn ping_all(paths: &BarmuxPaths) -> Result<usize> {
    let mut alive = 0;
    for socket in paths.enumerate_ctl_sockets()? {
        match UnixStream::connect(&socket) {
            Ok(_) => alive += 1,
            Err(err) => log::debug!("Skipping {}: {}", socket.display(), err),
        }
    }
    Ok(alive)
}
