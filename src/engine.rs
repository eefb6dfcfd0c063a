//! Sequential, rate-limited batch enrichment.
//!
//! [`run_batch`] drives one pipeline stage: it walks the work items in
//! order, waits for a rate-limit slot before every external call, hands the
//! item to an [`Enricher`], and reports progress after each item. A failing
//! item is recorded as a failed [`EnrichmentResult`] and the batch carries
//! on; the output always has one result per input, in input order.
//!
//! Items are processed strictly one at a time. The limiter exists to hold
//! throughput at an external ceiling, so there is nothing to gain from
//! running items of the same stage concurrently.
//!
//! ```text
//! items ──▶ blank? ──yes──▶ placeholder (no call, no slot)
//!             │
//!             no
//!             ▼
//!        wait_slot() ──▶ enrich() ──ok──▶ result
//!                            │
//!                           err ──▶ failed result + warn!, continue
//! ```

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::models::{Enrichment, EnrichmentResult, WorkItem};
use crate::rate_limit::RateLimiter;

/// Summary recorded for an item whose enrichment failed, unless the
/// enricher supplies its own.
pub const FAILURE_PLACEHOLDER: &str = "could not be processed";

/// One stage's per-item transformation.
#[async_trait]
pub trait Enricher: Send + Sync {
    /// Stage name used in log lines (e.g. `"summarize"`).
    fn stage(&self) -> &'static str;

    /// Call the external model for one item.
    async fn enrich(&self, item: &WorkItem) -> Result<Enrichment>;

    /// Deterministic result for an item whose payload is blank. Produced
    /// without any external call.
    fn blank_placeholder(&self, item: &WorkItem) -> Enrichment;

    /// Summary stored when [`enrich`](Enricher::enrich) fails.
    fn failure_placeholder(&self, _item: &WorkItem) -> String {
        FAILURE_PLACEHOLDER.to_string()
    }
}

/// Progress after one item of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchProgress {
    /// Items finished so far, including the one just processed.
    pub processed: usize,
    pub total: usize,
    /// Id of the item just processed.
    pub current_item: String,
    /// Average time per item so far times the number of items left.
    pub estimated_seconds_remaining: u64,
}

/// Run `enricher` over `items`, one at a time, spaced by `limiter`.
///
/// Empty input returns an empty list without calling `on_progress`.
pub async fn run_batch<E, F>(
    items: &[WorkItem],
    enricher: &E,
    limiter: &RateLimiter,
    mut on_progress: F,
) -> Vec<EnrichmentResult>
where
    E: Enricher + ?Sized,
    F: FnMut(BatchProgress),
{
    let total = items.len();
    let mut results = Vec::with_capacity(total);
    if total == 0 {
        return results;
    }

    let started = Instant::now();

    for (index, item) in items.iter().enumerate() {
        let result = if item.is_blank() {
            debug!(stage = enricher.stage(), item = %item.id, "blank payload, using placeholder");
            EnrichmentResult::placeholder(&item.id, enricher.blank_placeholder(item))
        } else {
            limiter.wait_slot().await;
            match enricher.enrich(item).await {
                Ok(enrichment) => {
                    debug!(stage = enricher.stage(), item = %item.id, "enriched");
                    EnrichmentResult::ok(&item.id, enrichment)
                }
                Err(e) => {
                    warn!(
                        stage = enricher.stage(),
                        item = %item.id,
                        error = %format!("{:#}", e),
                        "item could not be processed"
                    );
                    EnrichmentResult::failed(
                        &item.id,
                        enricher.failure_placeholder(item),
                        format!("{:#}", e),
                    )
                }
            }
        };
        results.push(result);

        let processed = index + 1;
        let remaining = total - processed;
        let avg_secs = started.elapsed().as_secs_f64() / processed as f64;
        on_progress(BatchProgress {
            processed,
            total,
            current_item: item.id.clone(),
            estimated_seconds_remaining: (avg_secs * remaining as f64).round() as u64,
        });
    }

    results
}
