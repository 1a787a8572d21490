//! Normalize, decrypt and persist fetched pages.

use serde_json::Value;

use crate::config::DecryptFailurePolicy;
use crate::crypto::FieldDecryptor;
use crate::db::OrderStore;
use crate::error::Result;
use crate::models::{Order, WindowReport};
use crate::paginator::PageSink;
use crate::util::unix_timestamp_now;

/// Page sink that writes each page as one upsert batch.
pub struct IngestSink<'a, S> {
    store: &'a S,
    decryptor: &'a FieldDecryptor,
    policy: DecryptFailurePolicy,
}

impl<'a, S: OrderStore> IngestSink<'a, S> {
    pub const fn new(
        store: &'a S,
        decryptor: &'a FieldDecryptor,
        policy: DecryptFailurePolicy,
    ) -> Self {
        Self {
            store,
            decryptor,
            policy,
        }
    }

    /// Turn raw records into storable orders, counting what gets dropped.
    fn prepare(&self, records: Vec<Value>, report: &mut WindowReport) -> Vec<Order> {
        let sync_time = unix_timestamp_now();
        let mut batch = Vec::with_capacity(records.len());

        for raw in records {
            let Some(mut order) = Order::from_raw(raw, sync_time) else {
                tracing::warn!("skipping record without order_id");
                report.skipped += 1;
                continue;
            };

            let decrypted = order
                .encrypted_phone()
                .map(|ciphertext| self.decryptor.decrypt(ciphertext));
            match decrypted {
                Some(Ok(phone)) => order.phone = Some(phone),
                Some(Err(error)) => {
                    report.decrypt_failures += 1;
                    tracing::warn!(order_id = %order.order_id, %error, "failed to decrypt contact phone");
                    if self.policy == DecryptFailurePolicy::Skip {
                        report.skipped += 1;
                        continue;
                    }
                }
                None => {}
            }

            batch.push(order);
        }

        batch
    }
}

impl<S: OrderStore> PageSink for IngestSink<'_, S> {
    async fn accept(&mut self, orders: Vec<Value>, report: &mut WindowReport) -> Result<()> {
        let batch = self.prepare(orders, report);
        if batch.is_empty() {
            return Ok(());
        }
        report.stored += self.store.upsert_batch(&batch).await?;
        Ok(())
    }
}
