//! Periodic maintenance: event log sweep, cache cleanup and fast-tier flush.

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::state::AppState;

pub const EVENT_SWEEP_EVERY: Duration = Duration::from_secs(60 * 60);
pub const CACHE_CLEANUP_EVERY: Duration = Duration::from_secs(10 * 60);
pub const FAST_TIER_FLUSH_EVERY: Duration = Duration::from_secs(2 * 60 * 60);

pub struct BackgroundJobs {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundJobs {
    pub fn spawn(state: &AppState) -> Self {
        let handles = vec![
            every(EVENT_SWEEP_EVERY, state.clone(), |state| async move {
                let removed = state.events.sweep(Utc::now());
                debug!("Event sweep done, {removed} removed, {} kept", state.events.len());
            }),
            every(CACHE_CLEANUP_EVERY, state.clone(), |state| async move {
                state.cache.cleanup(Utc::now()).await;
            }),
            every(FAST_TIER_FLUSH_EVERY, state.clone(), |state| async move {
                state.cache.flush_fast_tier();
            }),
        ];
        info!("Started {} background jobs", handles.len());
        Self { handles }
    }

    pub fn shutdown(self) {
        for handle in self.handles {
            handle.abort();
        }
        info!("Background jobs stopped");
    }
}

/// Runs `job` once per `period`, first run one period from now.
fn every<F, Fut>(period: Duration, state: AppState, job: F) -> JoinHandle<()>
where
    F: Fn(AppState) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::spawn(async move {
        loop {
            ticker.tick().await;
            job(state.clone()).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::generation::service::testing::Behaviour;
    use crate::models::content::sample_item;
    use crate::state::testing::test_state;

    #[tokio::test(start_paused = true)]
    async fn test_fast_tier_flushed_after_two_hours() {
        let (state, _) = test_state(Behaviour::Drafts, Config::default());
        state
            .cache
            .save_generated_content("u1", vec![sample_item("c1", &["ai"], 70)]);
        assert_eq!(state.cache.stats().await.fast_tier_users, 1);

        let jobs = BackgroundJobs::spawn(&state);

        tokio::time::sleep(FAST_TIER_FLUSH_EVERY - Duration::from_secs(60)).await;
        assert_eq!(state.cache.stats().await.fast_tier_users, 1);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(state.cache.stats().await.fast_tier_users, 0);

        jobs.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_jobs_stop_on_shutdown() {
        let (state, _) = test_state(Behaviour::Drafts, Config::default());
        let jobs = BackgroundJobs::spawn(&state);
        jobs.shutdown();

        state
            .cache
            .save_generated_content("u1", vec![sample_item("c1", &["ai"], 70)]);
        tokio::time::sleep(FAST_TIER_FLUSH_EVERY * 2).await;
        assert_eq!(state.cache.stats().await.fast_tier_users, 1);
    }
}
