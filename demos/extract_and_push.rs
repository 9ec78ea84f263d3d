//! End-to-end flow: read an earnings report from disk, extract a record
//! through OpenRouter, and upsert it into Supabase.
//!
//! ```bash
//! cargo run --example extract_and_push --features openrouter,supabase -- \
//!     grab-com report.txt
//! ```
//!
//! Requires `OPENROUTER_API_KEY`; `SUPABASE_URL` and
//! `SUPABASE_SERVICE_ROLE_KEY` are optional (persistence is skipped without
//! them).

use anyhow::{bail, Context, Result};
use earnings_extractor::llm::{OpenRouterClient, RecordExtractor};
use earnings_extractor::supabase::SupabaseStore;
use earnings_extractor::{builtin_profile, UpsertContext, UpsertStatus};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let mut args = std::env::args().skip(1);
    let (slug, path) = match (args.next(), args.next()) {
        (Some(slug), Some(path)) => (slug, path),
        _ => bail!("usage: extract_and_push <entity-slug> <report-file>"),
    };

    let profile =
        builtin_profile(&slug).with_context(|| format!("no profile for slug '{}'", slug))?;
    let source_text =
        std::fs::read_to_string(&path).with_context(|| format!("reading {}", path))?;

    let client = OpenRouterClient::from_env()?;
    let extractor = RecordExtractor::new(client, &profile);
    let record = extractor
        .extract(&source_text, &profile.name, Duration::from_secs(120))
        .await?;

    println!("extracted record for {} at {}:", record.entity_slug, record.period_date);
    println!("{}", serde_json::to_string_pretty(&record.to_row(&profile))?);

    match SupabaseStore::from_env() {
        Some(store) => {
            let ctx = UpsertContext::for_slug(&slug);
            let outcome = store.push(&record, &profile, &ctx).await?;
            match outcome.status {
                UpsertStatus::Inserted => {
                    println!("inserted as row {}", outcome.record_id.unwrap_or_default())
                }
                UpsertStatus::Updated => {
                    println!("updated row {}", outcome.record_id.unwrap_or_default())
                }
                UpsertStatus::Rejected => {
                    bail!("rejected: {}", outcome.reason.unwrap_or_default())
                }
                UpsertStatus::Skipped => println!("skipped: {:?}", outcome.reason),
            }
        }
        None => println!("Supabase credentials not set; skipping persistence"),
    }

    Ok(())
}
