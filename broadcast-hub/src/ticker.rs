use std::{future::Future, sync::Arc, time::Duration};

use rand::{SeedableRng, rngs::StdRng};
use tokio::{
    select,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info};

use crate::hub::Hub;

pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(1);

/// Broadcasts a random value to every client once per `period` until
/// `shutdown` resolves. Ticks with no clients are skipped and never caught up.
///
/// Returns the number of updates actually sent.
pub async fn run_until<F>(hub: Arc<Hub>, period: Duration, shutdown: F) -> usize
where
    F: Future<Output = ()> + Send,
{
    tokio::pin!(shutdown);

    let mut rng = StdRng::from_entropy();
    // The first update goes out one full period after startup.
    let mut ticks = time::interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut published = 0;

    loop {
        select! {
            _ = &mut shutdown => break,
            _ = ticks.tick() => {
                if hub.publish_update(&mut rng).await.is_some() {
                    published += 1;
                } else {
                    debug!("no clients connected, skipping update");
                }
            }
        }
    }

    info!(published, "periodic updates stopped");
    published
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ServerEvent;
    use tokio::sync::oneshot;

    async fn run_for(hub: Arc<Hub>, elapsed: Duration) -> usize {
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(run_until(hub, DEFAULT_UPDATE_INTERVAL, async move {
            let _ = stop_rx.await;
        }));
        time::sleep(elapsed).await;
        let _ = stop_tx.send(());
        task.await.expect("ticker task panicked")
    }

    #[tokio::test(start_paused = true)]
    async fn stays_silent_without_clients() {
        let hub = Arc::new(Hub::default());
        assert_eq!(run_for(hub, Duration::from_millis(3500)).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn emits_once_per_interval_with_clients() {
        let hub = Arc::new(Hub::default());
        let mut client = hub.connect(None).await;
        // welcome + join announcement
        let _ = client.outbound.recv().await;
        let _ = client.outbound.recv().await;

        assert_eq!(run_for(Arc::clone(&hub), Duration::from_millis(3500)).await, 3);

        let mut updates = Vec::new();
        while let Ok(event) = client.outbound.try_recv() {
            updates.push(event);
        }
        assert_eq!(updates.len(), 3);
        for event in updates {
            match event {
                ServerEvent::ServerUpdate(update) => assert!((1..=100).contains(&update.value)),
                other => panic!("expected update, got {other:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exits_promptly_on_shutdown() {
        let hub = Arc::new(Hub::default());
        let started = Instant::now();
        assert_eq!(run_for(hub, Duration::from_millis(10)).await, 0);
        assert!(started.elapsed() < DEFAULT_UPDATE_INTERVAL);
    }
}
