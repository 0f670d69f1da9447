//! Conservation audit for stock ledger variants.
//!
//! Usage: `stockledger-audit [--migrate] <variant-id>...`
//!
//! For every variant, compares the live counter with its layer sum and with
//! the level replayed from the movement log, printing one JSON report per
//! line. Exits non-zero if any variant is inconsistent or missing.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};

use stockledger_core::VariantId;
use stockledger_infra::{LedgerConfig, LedgerError, PostgresLedgerStore, StockLedger};

struct Args {
    migrate: bool,
    variants: Vec<VariantId>,
}

fn parse_args(raw: impl IntoIterator<Item = String>) -> anyhow::Result<Args> {
    let mut migrate = false;
    let mut variants = Vec::new();
    for arg in raw {
        if arg == "--migrate" {
            migrate = true;
            continue;
        }
        let id = arg
            .parse::<VariantId>()
            .with_context(|| format!("invalid variant id '{arg}'"))?;
        variants.push(id);
    }
    if variants.is_empty() && !migrate {
        bail!("usage: stockledger-audit [--migrate] <variant-id>...");
    }
    Ok(Args { migrate, variants })
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    stockledger_observability::init();

    let args = parse_args(std::env::args().skip(1))?;
    let config = LedgerConfig::from_env();
    if config.database_url.is_none() {
        bail!("DATABASE_URL must point at the ledger database");
    }

    let store = PostgresLedgerStore::connect(&config)
        .await
        .context("failed to connect to the ledger database")?;
    if args.migrate {
        store.migrate().await.context("failed to apply ledger schema")?;
        tracing::info!("ledger schema is up to date");
    }

    let ledger = Arc::new(StockLedger::new(store, config));
    let mut failures = 0usize;

    for variant_id in args.variants {
        let worker = Arc::clone(&ledger);
        // Store calls block on the runtime; keep them off the async workers.
        let result = tokio::task::spawn_blocking(move || worker.audit(variant_id))
            .await
            .context("audit task panicked")?;

        match result {
            Ok(report) => {
                if !report.consistent() {
                    failures += 1;
                }
                println!("{}", serde_json::to_string(&report)?);
            }
            Err(LedgerError::NotFound(what)) => {
                failures += 1;
                tracing::warn!(variant_id = %variant_id, "not found: {what}");
            }
            Err(err) => return Err(err).context(format!("audit of {variant_id} failed")),
        }
    }

    if failures > 0 {
        tracing::warn!(failures, "ledger audit found problems");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
