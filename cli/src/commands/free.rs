//! Free command - search for unused ports.

use anyhow::Result;
use porthog_core::{FreePortFinder, PortRange, Protocol};

use super::Context;
use crate::render::Format;

pub async fn run(
    ctx: &Context,
    protocol: Protocol,
    range: Option<PortRange>,
    count: usize,
) -> Result<()> {
    let cancel = ctx.operation();
    let ports = FreePortFinder::new()
        .find_free_ports(protocol, range, count, &cancel)
        .await
        .map_err(|e| ctx.explain(e))?;
    cancel.cancel();

    match ctx.format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&ports)?),
        Format::Plain | Format::Table => {
            for port in &ports {
                println!("{}", port);
            }
        }
    }
    if ports.len() < count {
        eprintln!("warning: only {} of {} requested ports are free", ports.len(), count);
    }
    Ok(())
}
