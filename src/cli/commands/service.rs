//! `lokl stop` and `lokl restart`.

use anyhow::Result;

use super::{print_reply, GlobalArgs};
use crate::infrastructure::control::ControlRequest;

/// Stop one service, or the whole orchestrator when `service` is `None`.
pub async fn stop(service: Option<String>, globals: &GlobalArgs) -> Result<()> {
    let _logger = globals.client_logger()?;
    let request = match service {
        Some(name) => ControlRequest::StopService { name },
        None => ControlRequest::Shutdown,
    };

    let response = globals.control_client().request(&request).await?;
    print_reply(response, globals.json);
    Ok(())
}

pub async fn restart(service: String, globals: &GlobalArgs) -> Result<()> {
    let _logger = globals.client_logger()?;
    let response = globals
        .control_client()
        .request(&ControlRequest::RestartService { name: service })
        .await?;
    print_reply(response, globals.json);
    Ok(())
}
