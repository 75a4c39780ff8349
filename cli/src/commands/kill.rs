//! Kill command - terminate the owner of a port after revalidating it.

use anyhow::{anyhow, Result};
use porthog_core::domain::validate_port;
use porthog_core::{
    ErrorKind, KillService, PlatformEnumerator, PlatformTerminator, Protocol, SignalPolicy,
};
use serde_json::json;
use tracing::debug;

use super::Context;
use crate::render::{self, Format};

fn label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::CriticalProcess => "blocked",
        ErrorKind::OwnershipConflict => "conflict",
        ErrorKind::NotFound => "not found",
        ErrorKind::ProcessExited => "exited",
        ErrorKind::IdentityUnavailable => "unverified",
        ErrorKind::PermissionDenied => "permission denied",
        ErrorKind::Cancelled => "cancelled",
        ErrorKind::Timeout => "timeout",
        _ => "failed",
    }
}

pub async fn run(ctx: &Context, port: u32, protocol: Protocol, policy: SignalPolicy) -> Result<()> {
    let port = validate_port(port)?;
    let service = KillService::new(
        PlatformEnumerator::new(),
        ctx.resolver(),
        PlatformTerminator::new(),
    )
    .with_critical_names(&ctx.config.critical_process_denylist);

    debug!(port = port, protocol = %protocol, policy = ?policy, "kill requested");
    let cancel = ctx.operation();
    let outcome = service.kill(port, protocol, policy, &cancel).await;
    cancel.cancel();

    match outcome {
        Ok(result) => render::print_terminate(&result, ctx.format),
        Err(e) => {
            let kind = e.kind();
            if ctx.format == Format::Json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "error": label(kind),
                        "message": e.to_string(),
                        "result": e.blocked_result(),
                    }))?
                );
            }
            Err(anyhow!("{}: {:#}", label(kind), ctx.explain(e)))
        }
    }
}
