//! Delivery of finalized usage records to the billing collaborator.
//!
//! The ledger calls [`BillingSink::emit`] exactly once per committed
//! request, after the record is durable in the usage log. Sinks must not
//! block: the ledger calls them on the request path.

use super::tracker::UsageRecord;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Receives every committed `UsageRecord` once.
pub trait BillingSink: Send + Sync {
    fn emit(&self, record: &UsageRecord);
}

/// Logs records through `tracing`. Used when no billing endpoint is set.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl BillingSink for TracingSink {
    fn emit(&self, record: &UsageRecord) {
        tracing::info!(
            record_id = %record.id,
            account_id = %record.account_id,
            provider_id = %record.provider_id,
            units = record.units,
            overage_units = record.overage_units,
            cost = record.cost,
            "Usage committed"
        );
    }
}

/// Hands records to an async consumer over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<UsageRecord>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UsageRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl BillingSink for ChannelSink {
    fn emit(&self, record: &UsageRecord) {
        if self.tx.send(record.clone()).is_err() {
            // The usage log still holds the record for reconciliation.
            tracing::warn!(record_id = %record.id, "Billing consumer gone, record not forwarded");
        }
    }
}

/// Forward records from a [`ChannelSink`] to the billing webhook.
///
/// Each record is POSTed as JSON. Delivery failures are logged and the
/// record is dropped from the stream; `usage.db` stays authoritative. Without
/// a webhook URL the records are only logged.
pub fn spawn_forwarder(
    mut rx: mpsc::UnboundedReceiver<UsageRecord>,
    webhook_url: Option<String>,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => client,
            Err(e) => {
                tracing::error!("Billing forwarder disabled: {e}");
                return;
            }
        };

        while let Some(record) = rx.recv().await {
            let Some(url) = webhook_url.as_deref() else {
                TracingSink.emit(&record);
                continue;
            };

            match client.post(url).json(&record).send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(record_id = %record.id, "Usage record delivered");
                }
                Ok(resp) => {
                    tracing::warn!(
                        record_id = %record.id,
                        status = resp.status().as_u16(),
                        "Billing webhook rejected usage record"
                    );
                }
                Err(e) => {
                    tracing::warn!(record_id = %record.id, "Billing webhook unreachable: {e}");
                }
            }
        }
        tracing::debug!("Billing forwarder stopped");
    })
}
