//! Polling loops.
//!
//! Each loop is single-flight: a cycle (fetch, normalize, diff, commit) runs to
//! completion before the next tick is awaited, so responses can only arrive in
//! request order. Shutdown is observed both between cycles and while a request
//! is in flight; an abandoned request is dropped and its response never lands.
//!
//! Per cycle: `Idle -> Fetching -> (Unchanged | Replaced | Stale) | Failed -> Idle`,
//! ending in `Stopped` on shutdown. The map reports the outcome and then
//! settles back to `Idle` once the cycle is done.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::client::{EventSource, FeedQuery};
use crate::diff::ChangeOutcome;
use crate::errors::SismicError;
use crate::filters::{BBox, Criteria, normalize};
use crate::ranking::RankingEngine;
use crate::state::{CommitOutcome, LiveMap, PollPhase};

/// Live map polling parameters.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub region: BBox,
    pub min_magnitude: f64,
    pub lookback: chrono::Duration,
    pub cap: usize,
}

impl PollConfig {
    #[must_use]
    pub fn criteria(&self) -> Criteria {
        Criteria::live_map(self.region, self.min_magnitude, self.cap)
    }

    #[must_use]
    pub fn query(&self) -> FeedQuery {
        FeedQuery::live_window(
            Utc::now(),
            self.lookback,
            self.min_magnitude,
            self.region,
            self.cap,
        )
    }
}

/// Resolves once shutdown is requested or the controlling sender is gone.
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn single_flight<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut cycle: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = stopped(&mut shutdown) => break,
        }

        tokio::select! {
            () = cycle() => {}
            () = stopped(&mut shutdown) => {
                debug!(name, "abandoning in-flight cycle");
                break;
            }
        }
    }

    info!(name, "polling stopped");
}

/// One live-map cycle. Returns the phase it ended in.
pub async fn refresh_live_map<S>(source: &S, map: &LiveMap, config: &PollConfig) -> PollPhase
where
    S: EventSource + ?Sized,
{
    let query = config.query();
    let seq = map.begin_fetch();

    match source.fetch(&query).await {
        Ok(raw) => {
            let fetched = raw.len();
            let candidate = normalize(raw, &config.criteria());
            debug!(seq, fetched, kept = candidate.len(), "normalized feed");
            let phase = match map.commit(seq, candidate) {
                CommitOutcome::Replaced => PollPhase::Replaced,
                CommitOutcome::Unchanged => PollPhase::Unchanged,
                CommitOutcome::Stale => PollPhase::Stale,
            };
            map.settle(seq);
            phase
        }
        Err(e) => {
            map.fail(seq, &e);
            map.settle(seq);
            PollPhase::Failed
        }
    }
}

/// Poll the live feed every `config.interval` until shutdown.
pub async fn run_live_map<S>(
    source: Arc<S>,
    map: Arc<LiveMap>,
    config: PollConfig,
    shutdown: watch::Receiver<bool>,
) where
    S: EventSource + ?Sized,
{
    info!(
        interval_secs = config.interval.as_secs(),
        min_magnitude = config.min_magnitude,
        region = %config.region,
        "live map polling started"
    );

    let (source, live, config) = (source.as_ref(), map.as_ref(), &config);
    single_flight("live-map", config.interval, shutdown, || async move {
        let phase = refresh_live_map(source, live, config).await;
        debug!(?phase, "live map cycle finished");
    })
    .await;

    map.stop();
}

/// Fetch the year-to-date set and re-rank it.
///
/// # Errors
///
/// Returns the fetch error; the previous ranking is kept.
pub async fn refresh_strongest<S>(
    source: &S,
    engine: &RankingEngine,
    region: BBox,
) -> Result<ChangeOutcome, SismicError>
where
    S: EventSource + ?Sized,
{
    let query = FeedQuery::year_to_date(Utc::now(), region);
    let raw = source.fetch(&query).await?;
    Ok(engine.update(raw))
}

async fn strongest_cycle<S>(source: &S, engine: &RankingEngine, region: BBox)
where
    S: EventSource + ?Sized,
{
    match refresh_strongest(source, engine, region).await {
        Ok(outcome) => debug!(?outcome, "ranking refreshed"),
        Err(e) => warn!("yearly feed fetch failed, keeping previous ranking: {e}"),
    }
}

/// Re-rank the yearly set every `interval` until shutdown.
pub async fn run_strongest<S>(
    source: Arc<S>,
    engine: Arc<RankingEngine>,
    region: BBox,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
) where
    S: EventSource + ?Sized,
{
    info!(interval_secs = interval.as_secs(), "ranking polling started");

    single_flight("strongest", interval, shutdown, || {
        strongest_cycle(source.as_ref(), engine.as_ref(), region)
    })
    .await;
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::filters::DEFAULT_REGION;
    use crate::models::SeismicEvent;
    use crate::models::testing::event;

    /// Replays scripted responses, then repeats the last one.
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<Vec<SeismicEvent>, SismicError>>>,
        last: Mutex<Vec<SeismicEvent>>,
        calls: AtomicUsize,
        hang: bool,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<Vec<SeismicEvent>, SismicError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                last: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                hang: false,
            }
        }

        fn hanging() -> Self {
            Self {
                hang: true,
                ..Self::new(Vec::new())
            }
        }
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn fetch(&self, _query: &FeedQuery) -> Result<Vec<SeismicEvent>, SismicError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Ok(events)) => {
                    self.last.lock().unwrap().clone_from(&events);
                    Ok(events)
                }
                Some(Err(e)) => Err(e),
                None => Ok(self.last.lock().unwrap().clone()),
            }
        }
    }

    fn config(interval: Duration) -> PollConfig {
        PollConfig {
            interval,
            region: DEFAULT_REGION,
            min_magnitude: 2.5,
            lookback: chrono::Duration::hours(24),
            cap: 5000,
        }
    }

    fn batch() -> Vec<SeismicEvent> {
        vec![
            event("a", 4.1, 19.0, -99.0, 0),
            event("weak", 1.0, 19.0, -99.0, 1),
            event("far", 5.0, 48.0, 2.3, 2),
            event("c", 5.0, 17.0, -96.0, 2),
        ]
    }

    #[tokio::test]
    async fn test_refresh_filters_and_orders() {
        let source = ScriptedSource::new(vec![Ok(batch())]);
        let map = LiveMap::new(&DEFAULT_REGION, false);

        let phase = refresh_live_map(&source, &map, &config(Duration::from_secs(30))).await;
        assert_eq!(phase, PollPhase::Replaced);

        let snapshot = map.snapshot();
        let ids: Vec<&str> = snapshot.events().iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, ["c", "a"]);

        let status = map.status();
        assert_eq!(status.phase, PollPhase::Idle);
        assert_eq!(status.last_outcome, Some(PollPhase::Replaced));
        assert!(!status.loading);
    }

    /// Lets a newer fetch land while its own request is still out.
    struct OvertakenSource {
        map: Arc<LiveMap>,
    }

    #[async_trait]
    impl EventSource for OvertakenSource {
        async fn fetch(&self, _query: &FeedQuery) -> Result<Vec<SeismicEvent>, SismicError> {
            let newer = self.map.begin_fetch();
            self.map.commit(newer, vec![event("newer", 3.0, 19.0, -99.0, 5)]);
            Ok(batch())
        }
    }

    #[tokio::test]
    async fn test_overtaken_response_reports_stale() {
        let map = Arc::new(LiveMap::new(&DEFAULT_REGION, false));
        let source = OvertakenSource {
            map: Arc::clone(&map),
        };

        let phase = refresh_live_map(&source, &map, &config(Duration::from_secs(30))).await;
        assert_eq!(phase, PollPhase::Stale);
        assert_eq!(map.status().last_outcome, Some(PollPhase::Stale));

        let snapshot = map.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.events()[0].event_id, "newer");
    }

    #[tokio::test]
    async fn test_failure_then_identical_refetch() {
        let source = ScriptedSource::new(vec![
            Ok(batch()),
            Err(SismicError::InvalidResponse("truncated".into())),
            Ok(batch()),
        ]);
        let map = LiveMap::new(&DEFAULT_REGION, false);
        let cfg = config(Duration::from_secs(30));

        assert_eq!(refresh_live_map(&source, &map, &cfg).await, PollPhase::Replaced);
        let held = map.snapshot();

        assert_eq!(refresh_live_map(&source, &map, &cfg).await, PollPhase::Failed);
        assert!(map.snapshot().ptr_eq(&held));
        assert_eq!(map.status().phase, PollPhase::Idle);
        assert_eq!(map.status().last_outcome, Some(PollPhase::Failed));

        assert_eq!(refresh_live_map(&source, &map, &cfg).await, PollPhase::Unchanged);
        assert!(map.snapshot().ptr_eq(&held));
    }

    #[tokio::test]
    async fn test_loop_publishes_and_stops() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(batch())]));
        let map = Arc::new(LiveMap::new(&DEFAULT_REGION, false));
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut snapshots = map.subscribe_snapshot();

        let handle = tokio::spawn(run_live_map(
            Arc::clone(&source),
            Arc::clone(&map),
            config(Duration::from_millis(10)),
            stop_rx,
        ));

        time::timeout(Duration::from_secs(2), snapshots.changed())
            .await
            .expect("snapshot published")
            .unwrap();
        assert_eq!(map.snapshot().len(), 2);

        // let a few more unchanged cycles run
        time::sleep(Duration::from_millis(50)).await;
        assert!(source.calls.load(Ordering::SeqCst) > 1);
        assert_eq!(map.snapshot().generation(), 1);

        stop_tx.send(true).unwrap();
        time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop exits")
            .unwrap();
        assert_eq!(map.status().phase, PollPhase::Stopped);
    }

    #[tokio::test]
    async fn test_shutdown_abandons_in_flight_request() {
        let source = Arc::new(ScriptedSource::hanging());
        let map = Arc::new(LiveMap::new(&DEFAULT_REGION, false));
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(run_live_map(
            Arc::clone(&source),
            Arc::clone(&map),
            config(Duration::from_millis(10)),
            stop_rx,
        ));

        time::timeout(Duration::from_secs(2), async {
            while source.calls.load(Ordering::SeqCst) == 0 {
                time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("fetch started");
        assert_eq!(map.status().phase, PollPhase::Fetching);
        assert!(map.status().loading);

        stop_tx.send(true).unwrap();
        time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop exits")
            .unwrap();

        // single-flight: the hanging request was never overlapped
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(map.snapshot().is_empty());
        assert_eq!(map.status().phase, PollPhase::Stopped);
    }

    #[tokio::test]
    async fn test_strongest_refresh_announces() {
        let source = ScriptedSource::new(vec![
            Ok(vec![
                event("a", 4.1, 19.0, -99.0, 0),
                event("b", 2.0, 19.0, -99.0, 1),
                event("c", 5.0, 19.0, -99.0, 2),
            ]),
            Err(SismicError::Api {
                status: 503,
                message: String::new(),
            }),
        ]);
        let (engine, mut rx) = RankingEngine::new(DEFAULT_REGION);

        let outcome = refresh_strongest(&source, &engine, DEFAULT_REGION).await.unwrap();
        assert_eq!(outcome, ChangeOutcome::Replaced);
        assert_eq!(rx.try_recv().unwrap().event.event_id, "c");

        assert!(refresh_strongest(&source, &engine, DEFAULT_REGION).await.is_err());
        assert_eq!(engine.top().len(), 2);
    }

    #[tokio::test]
    async fn test_strongest_loop_runs_until_stopped() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(vec![event("a", 4.1, 19.0, -99.0, 0)])]));
        let (engine, mut rx) = RankingEngine::new(DEFAULT_REGION);
        let engine = Arc::new(engine);
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(run_strongest(
            Arc::clone(&source),
            Arc::clone(&engine),
            DEFAULT_REGION,
            Duration::from_millis(10),
            stop_rx,
        ));

        let change = time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("announcement")
            .expect("channel open");
        assert_eq!(change.event.event_id, "a");

        drop(stop_tx);
        time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop exits")
            .unwrap();
    }
}
