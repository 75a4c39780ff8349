//! Watch command - reprint the binding table on an interval.

use std::time::Duration;

use anyhow::Result;
use porthog_core::{Filter, PartialResult, PlatformEnumerator, WatchService};
use tracing::debug;

use super::Context;
use crate::render::{self, Format};

pub async fn run(ctx: &Context, filter: &Filter, interval: Option<Duration>) -> Result<()> {
    let interval = interval
        .filter(|i| !i.is_zero())
        .unwrap_or_else(|| ctx.config.watch_interval());
    let service = WatchService::new(PlatformEnumerator::new(), ctx.resolver());

    loop {
        let cancel = ctx.operation();
        let snapshot = service.snapshot(Some(filter), &cancel).await;
        cancel.cancel();

        let snapshot = match snapshot {
            Ok(s) => s,
            Err(e) if ctx.shutdown.is_cancelled() && e.is_cancelled() => return Ok(()),
            Err(e) => return Err(ctx.explain(e)),
        };
        debug!(
            bindings = snapshot.bindings.len(),
            partial = snapshot.partial,
            "watch refresh"
        );

        match ctx.format {
            Format::Json => println!("{}", serde_json::to_string(&snapshot)?),
            format => {
                if format == Format::Table {
                    // clear screen, cursor home
                    print!("\x1b[2J\x1b[H");
                    println!(
                        "{}  (every {}s, Ctrl-C to stop)\n",
                        snapshot.taken_at.format("%H:%M:%S"),
                        interval.as_secs()
                    );
                }
                let mut view = PartialResult::new(snapshot.bindings);
                view.partial = snapshot.partial;
                view.warnings = snapshot.warnings;
                render::print_bindings(&view, format, false)?;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = ctx.shutdown.cancelled() => return Ok(()),
        }
    }
}
