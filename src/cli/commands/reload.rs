//! Implementation of the `lokl reload` command.

use anyhow::Result;

use super::{print_reply, GlobalArgs};
use crate::infrastructure::control::ControlRequest;

pub async fn execute(globals: &GlobalArgs) -> Result<()> {
    let _logger = globals.client_logger()?;
    let response = globals
        .control_client()
        .request(&ControlRequest::Reload)
        .await?;
    print_reply(response, globals.json);
    Ok(())
}
