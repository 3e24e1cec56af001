use std::{fmt, sync::Arc};

use tracing::{debug, error, warn};

use crate::{
    error::{AggregatorError, AggregatorResult},
    item::{self, Delivery, Item},
    metrics::Metrics,
    sink::{Acknowledger, ObjectStore},
};

/// Checks deliveries before they reach the worker.
///
/// Runs in the caller's task, so slow decoding or object lookups never hold up the batch.
pub(crate) struct AdmissionGate {
    pub acknowledger: Arc<dyn Acknowledger>,
    pub object_store: Option<Arc<dyn ObjectStore>>,
    pub object_ref_fields: Vec<String>,
    pub namespace: String,
    pub metrics: Metrics,
}

impl AdmissionGate {
    /// Decode a delivery into an item.
    ///
    /// Malformed deliveries are requeued with the broker and never reach a batch.
    pub async fn accept(&self, delivery: Delivery) -> AggregatorResult<Item> {
        let Delivery { body, tag } = delivery;

        let payload = match item::decode(&body) {
            Ok(payload) => payload,
            Err(reason) => {
                warn!("Requeueing malformed delivery {tag}: {reason}");
                self.metrics.malformed_items.inc();

                let raw = tag.value();
                if let Err(err) = self.acknowledger.requeue(tag).await {
                    error!("Failed to requeue delivery {raw}: {err}");
                    self.metrics.ack_failures.inc();
                }
                return Err(AggregatorError::Malformed(reason));
            }
        };

        let item = Item { payload, tag };
        self.check_object_exists(&item).await;

        Ok(item)
    }

    /// Warn about items referencing objects which don't exist. They are still admitted.
    async fn check_object_exists(&self, item: &Item) {
        let Some(store) = &self.object_store else {
            return;
        };
        let Some(path) = item::object_ref(&item.payload, &self.object_ref_fields, &self.namespace)
        else {
            return;
        };

        match store.exists(path).await {
            Ok(true) => debug!("Object {path} exists"),
            Ok(false) => {
                warn!("Object {path} referenced by delivery {} not found", item.tag);
                self.metrics.missing_objects.inc();
            }
            Err(err) => {
                warn!("Unable to check whether object {path} exists: {err}");
            }
        }
    }
}

impl fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("object_store", &self.object_store.is_some())
            .field("object_ref_fields", &self.object_ref_fields)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
