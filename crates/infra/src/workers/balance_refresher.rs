use std::sync::Arc;

use tracing::debug;

use stockledger_core::{Clock, TenantId};
use stockledger_events::EventBus;

use super::notification_worker::{NotificationWorker, WorkerHandle};
use crate::catalog::Catalog;
use crate::error::LedgerResult;
use crate::service::{StockEnvelope, StockLedgerService};
use crate::store::LedgerStore;

/// Writes a variant's balance and reserve back into the catalog whenever the
/// ledger reports a balance or reserve change for it.
///
/// Every notification means "recompute", so duplicates are harmless.
pub struct BalanceRefresher<S, C, B, K> {
    service: Arc<StockLedgerService<S, C, B, K>>,
}

impl<S, C, B, K> BalanceRefresher<S, C, B, K>
where
    S: LedgerStore + 'static,
    C: Catalog + 'static,
    B: EventBus<StockEnvelope> + 'static,
    K: Clock + 'static,
{
    pub fn new(service: Arc<StockLedgerService<S, C, B, K>>) -> Self {
        Self { service }
    }

    /// Refresh the variant named by `envelope`, if any. Returns whether a
    /// refresh ran.
    pub fn handle(&self, envelope: &StockEnvelope) -> LedgerResult<bool> {
        let Some(variant_id) = envelope.payload().refresh_target() else {
            return Ok(false);
        };
        let tenant_id = envelope.tenant_id();
        debug!(%tenant_id, %variant_id, event_type = envelope.event_type(), "refreshing cached balance");
        self.service.refresh_cached_balance(tenant_id, variant_id)?;
        Ok(true)
    }

    /// Run on a background thread fed by the service's own bus.
    pub fn spawn(
        service: Arc<StockLedgerService<S, C, B, K>>,
        tenant_id: Option<TenantId>,
    ) -> WorkerHandle {
        let refresher = Self::new(Arc::clone(&service));
        NotificationWorker::spawn(
            "stock-balance-refresher",
            service.bus(),
            tenant_id,
            move |envelope: StockEnvelope| refresher.handle(&envelope).map(|_| ()),
        )
    }
}
