//! `tether bootstrap`: run one initial load without opening any channel.

use std::sync::Arc;

use tether_core::{
    BootstrapOrchestrator, BootstrapState, DataStore, LoadResult, RefreshOutcome, TracingMetrics,
};

use super::fmt_ms;
use crate::cli::BootstrapArgs;
use crate::context::SessionContext;
use crate::error::CliError;

pub async fn handle(args: &BootstrapArgs, ctx: &SessionContext) -> Result<(), CliError> {
    let rest = Arc::new(ctx.rest_client()?);
    let store = Arc::new(DataStore::new());
    let bootstrap = BootstrapOrchestrator::new(
        rest,
        Arc::clone(&store),
        ctx.preferences()?,
        Arc::new(TracingMetrics::new()),
        ctx.sync.listing_kind,
        ctx.sync.selection_key.clone(),
    );

    let outcome = bootstrap.refresh().await;
    let state = bootstrap.state();
    tracing::debug!(?outcome, "bootstrap finished");

    if outcome != RefreshOutcome::Completed(LoadResult::Success) {
        return Err(CliError::BootstrapFailed {
            reason: state
                .failure
                .unwrap_or_else(|| format!("refresh ended as {outcome:?}")),
        });
    }

    print_summary(&state, &store, bootstrap.active_selection().as_deref());

    if args.records {
        let kind = ctx.sync.listing_kind;
        for record in store.snapshot(kind).iter() {
            println!("{}", serde_json::to_string(record.as_ref())?);
        }
    }
    Ok(())
}

fn print_summary(state: &BootstrapState, store: &DataStore, selection: Option<&str>) {
    let t = &state.timings;
    println!("listing          {}", fmt_ms(t.listing));
    println!("identity         {}", fmt_ms(t.identity));
    println!("parallel batch   {}", fmt_ms(t.parallel_batch));
    println!("data processing  {}", fmt_ms(t.data_processing));
    println!("preferences      {}", fmt_ms(t.preference_resolution));
    println!("server           {}", fmt_ms(t.server_processing));
    println!("total            {}", fmt_ms(t.total));
    println!();

    for kind in <tether_core::EntityKind as strum::IntoEnumIterator>::iter() {
        let count = store.count(kind);
        if count > 0 {
            println!("{kind:<16} {count}");
        }
    }
    println!("selection        {}", selection.unwrap_or("(none)"));
}
