//! The realtime fusion pipeline: a durable-ish work queue, a pool of
//! consumer workers, and the identification / progression / rail handlers
//! they dispatch into.
//!
//! Identification failures drop the event; a journey missing from the
//! schedule cannot be fixed by retrying, so nothing is re-queued.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::Utc;
use chrono_tz::Tz;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub mod identify;
pub mod progression;
pub mod queue;
pub mod rail;

use crate::models::{
    parse_date_only, parse_xsd_datetime, RealtimeEvent, Stop, VehicleActivityEvent,
    VehicleLocationEvent,
};
use crate::store::Store;

use progression::JourneyCache;
use queue::EventReceiver;

/// Shared state for the consumer workers.
pub struct RealtimeContext {
    pub store: Store,
    pub timezone: Tz,
    pub journey_cache: JourneyCache,
    /// Tiploc to stop resolution; unbounded, process lifetime.
    pub tiploc_cache: Mutex<HashMap<String, Option<Stop>>>,
}

impl RealtimeContext {
    pub fn new(
        store: Store,
        timezone: Tz,
        journey_cache_capacity: usize,
        journey_cache_ttl: StdDuration,
    ) -> Self {
        Self {
            store,
            timezone,
            journey_cache: JourneyCache::new(journey_cache_capacity, journey_cache_ttl),
            tiploc_cache: Mutex::new(HashMap::new()),
        }
    }
}

/// Spawn the consumer pool. Workers exit once the queue closes, finishing
/// their in-flight event first.
pub fn start_consumers(
    ctx: Arc<RealtimeContext>,
    receiver: EventReceiver,
    count: usize,
) -> Vec<JoinHandle<()>> {
    info!(
        workers = count,
        queue = queue::REALTIME_QUEUE_NAME,
        "Starting realtime consumers"
    );
    (0..count)
        .map(|id| {
            let ctx = ctx.clone();
            let receiver = receiver.clone();
            tokio::spawn(async move {
                debug!(id, "Realtime consumer started");
                while let Some(event) = receiver.recv().await {
                    handle_event(&ctx, event).await;
                    receiver.mark_processed();
                }
                debug!(id, "Realtime consumer stopped");
            })
        })
        .collect()
}

async fn handle_event(ctx: &RealtimeContext, event: RealtimeEvent) {
    match event {
        RealtimeEvent::VehicleActivity(activity) => handle_vehicle_activity(ctx, activity).await,
        RealtimeEvent::TrainStatus(status) => {
            if let Err(e) = rail::handle_train_status(ctx, &status, Utc::now()).await {
                warn!(uid = %status.uid, error = %e, "Dropping train status event");
            }
        }
    }
}

async fn handle_vehicle_activity(ctx: &RealtimeContext, activity: VehicleActivityEvent) {
    let now = Utc::now();

    let journey_ref = match identify::identify_journey(&ctx.store, &activity, ctx.timezone, now).await
    {
        Ok(journey_ref) => journey_ref,
        Err(e) => {
            // Not re-queued: a missing schedule will still be missing on the
            // next attempt.
            debug!(
                operator = activity.operator_ref.as_deref().unwrap_or(""),
                line = activity.published_line_name.as_deref().unwrap_or(""),
                error = %e,
                "Dropping unidentifiable vehicle activity"
            );
            return;
        }
    };

    let timeframe = activity
        .framed_vehicle_journey_date
        .as_deref()
        .and_then(|d| parse_date_only(d).map(|_| d.to_string()))
        .unwrap_or_else(|| {
            now.with_timezone(&ctx.timezone)
                .date_naive()
                .format("%Y-%m-%d")
                .to_string()
        });

    let observed_at = activity
        .recorded_at
        .as_deref()
        .and_then(parse_xsd_datetime)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now);

    let location_event = VehicleLocationEvent {
        journey_ref,
        timeframe,
        location: activity.location,
        bearing: activity.bearing,
        data_source: activity.data_source.unwrap_or_default(),
        observed_at,
    };

    if let Err(e) = progression::handle_vehicle_location(ctx, &location_event, now).await {
        debug!(journey = %location_event.journey_ref, error = %e, "Dropping vehicle location event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrainStatusEvent;
    use crate::realtime::queue::event_queue;

    #[tokio::test]
    async fn consumers_drain_the_queue_and_stop_on_close() {
        let store = Store::connect_memory().await.unwrap();
        let ctx = Arc::new(RealtimeContext::new(
            store,
            chrono_tz::Europe::London,
            16,
            StdDuration::from_secs(60),
        ));
        let (queue, receiver) = event_queue(32);
        let workers = start_consumers(ctx, receiver, 3);

        // Events that fail identification are dropped, not re-queued, so the
        // queue still drains fully.
        for i in 0..5 {
            queue
                .publish(RealtimeEvent::TrainStatus(TrainStatusEvent {
                    ssd: "2024-06-10".into(),
                    uid: format!("UID{i}"),
                    ..Default::default()
                }))
                .await
                .unwrap();
        }
        queue.wait_until_drained().await;
        assert_eq!(queue.depth(), 0);

        // Closing the queue ends every worker.
        drop(queue);
        for worker in workers {
            worker.await.unwrap();
        }
    }
}
