use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{Provider, ProviderError, ProviderResult};
use crate::config::AggregationConfig;

/// Bounded-concurrency fan-out over provider adapters.
///
/// One task per adapter, at most `max_concurrency` in flight. Every call is
/// limited by `call_timeout`; the whole join is limited by `deadline`, after
/// which unfinished calls are aborted. Failing adapters are logged and left
/// out of the result.
#[derive(Debug, Clone)]
pub struct FanOut {
    max_concurrency: usize,
    call_timeout: Duration,
    deadline: Duration,
}

impl FanOut {
    pub fn new(max_concurrency: usize, call_timeout: Duration, deadline: Duration) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            call_timeout,
            deadline,
        }
    }

    pub fn from_config(config: &AggregationConfig) -> Self {
        Self::new(config.max_concurrency, config.call_timeout(), config.deadline())
    }

    /// Calls `call` on every provider and concatenates the successful results
    /// in provider order.
    pub async fn run<R, F, Fut>(
        &self,
        providers: Vec<Arc<dyn Provider>>,
        cancel: &CancellationToken,
        call: F,
    ) -> Vec<R>
    where
        R: Send + 'static,
        F: Fn(Arc<dyn Provider>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProviderResult<Vec<R>>> + Send + 'static,
    {
        if providers.is_empty() {
            return Vec::new();
        }

        let call = Arc::new(call);
        let permits = Arc::new(Semaphore::new(self.max_concurrency));
        let cancel = cancel.child_token();
        let mut slots: Vec<Option<Vec<R>>> = (0..providers.len()).map(|_| None).collect();
        let clients: Vec<i64> = providers.iter().map(|p| p.client_id()).collect();

        let mut set = JoinSet::new();
        for (idx, provider) in providers.into_iter().enumerate() {
            let call = call.clone();
            let permits = permits.clone();
            let cancel = cancel.clone();
            let timeout = self.call_timeout;
            set.spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return (idx, Err(ProviderError::Cancelled)),
                };
                let res = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(ProviderError::Cancelled),
                    res = tokio::time::timeout(timeout, call(provider)) => {
                        res.unwrap_or(Err(ProviderError::Timeout(timeout)))
                    }
                };
                (idx, res)
            });
        }

        let deadline = tokio::time::Instant::now() + self.deadline;
        loop {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok((idx, Ok(items))))) => slots[idx] = Some(items),
                Ok(Some(Ok((idx, Err(ProviderError::Unsupported(what)))))) => {
                    debug!(client = clients[idx], "{} not supported, skipping", what)
                }
                Ok(Some(Ok((idx, Err(e))))) => warn!(client = clients[idx], error = %e, "provider call failed, skipping"),
                Ok(Some(Err(e))) => warn!(error = %e, "provider task failed"),
                Ok(None) => break,
                Err(_) => {
                    cancel.cancel();
                    set.abort_all();
                    for (idx, slot) in slots.iter().enumerate() {
                        if slot.is_none() {
                            warn!(client = clients[idx], deadline = ?self.deadline, "provider missed the deadline");
                        }
                    }
                    break;
                }
            }
        }

        let answered = slots.iter().filter(|s| s.is_some()).count();
        debug!(providers = clients.len(), answered, "fan-out done");
        slots.into_iter().flatten().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::FakeRegistry;
    use crate::client::{ClientConfig, ClientFactory, ClientSettings, ClientType};
    use crate::media::{MediaItem, Movie, QueryOptions};

    fn provider(factory: &ClientFactory, id: i64, name: &str) -> Arc<dyn Provider> {
        let mut cfg = ClientConfig::new(1, name, ClientType::Jellyfin, ClientSettings::default());
        cfg.id = id;
        factory.get(&cfg).unwrap()
    }

    fn setup(names: &[&str]) -> (FakeRegistry, Vec<Arc<dyn Provider>>) {
        let registry = FakeRegistry::default();
        let factory = ClientFactory::empty(reqwest::Client::new());
        registry.install(&factory);
        let providers = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                registry.state(name).add_movie(&format!("{}-1", name), &format!("{} movie", name), None);
                provider(&factory, i as i64 + 1, name)
            })
            .collect();
        (registry, providers)
    }

    async fn movies(fan: &FanOut, providers: Vec<Arc<dyn Provider>>, cancel: &CancellationToken) -> Vec<MediaItem<Movie>> {
        fan.run(providers, cancel, |p| async move { p.get_movies(&QueryOptions::default()).await })
            .await
    }

    #[tokio::test]
    async fn test_failing_provider_is_skipped() {
        let (registry, providers) = setup(&["a", "b", "c"]);
        registry.state("b").set_failing(true);
        let fan = FanOut::new(2, Duration::from_secs(1), Duration::from_secs(2));

        let res = movies(&fan, providers, &CancellationToken::new()).await;
        let titles: Vec<_> = res.iter().map(|m| m.title().to_string()).collect();
        assert_eq!(titles, vec!["a movie", "c movie"]);
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let (registry, providers) = setup(&["fast", "slow"]);
        registry.state("slow").set_delay(Duration::from_millis(500));
        let fan = FanOut::new(4, Duration::from_millis(50), Duration::from_secs(2));

        let res = movies(&fan, providers, &CancellationToken::new()).await;
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].title(), "fast movie");
    }

    #[tokio::test]
    async fn test_deadline_aborts_remaining() {
        let (registry, providers) = setup(&["a", "b"]);
        registry.state("b").set_delay(Duration::from_secs(5));
        let fan = FanOut::new(4, Duration::from_secs(10), Duration::from_millis(100));

        let started = std::time::Instant::now();
        let res = movies(&fan, providers, &CancellationToken::new()).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(res.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_token_yields_nothing() {
        let (_registry, providers) = setup(&["a", "b"]);
        let fan = FanOut::new(1, Duration::from_secs(1), Duration::from_secs(1));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let res = movies(&fan, providers, &cancel).await;
        assert!(res.is_empty());
    }
}
