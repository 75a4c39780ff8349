//! List command - show socket bindings and their owners.

use anyhow::Result;
use porthog_core::{Filter, ListService, PlatformEnumerator, SortField};

use super::Context;
use crate::render;

pub async fn run(ctx: &Context, filter: &Filter, sort: SortField, cmdline: bool) -> Result<()> {
    let service = ListService::new(PlatformEnumerator::new(), ctx.resolver());
    let cancel = ctx.operation();

    let mut result = service
        .list(Some(filter), sort, &cancel)
        .await
        .map_err(|e| ctx.explain(e))?;

    if cmdline {
        service
            .resolver()
            .load_cmdlines(&mut result.data, &cancel)
            .await
            .map_err(|e| ctx.explain(e))?;
    }
    cancel.cancel();

    render::print_bindings(&result, ctx.format, cmdline)
}
