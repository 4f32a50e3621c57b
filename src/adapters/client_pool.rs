use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use scc::hash_map::Entry;

use crate::{
    adapters::http_client::{BackendClient, BackendClientOptions},
    core::{
        backend::BackendServer,
        load_balancer::{LoadBalancerFactory, LoadBalancingStrategy},
        upstream::UpstreamPool,
    },
};

/// Clients for every backend of one upstream, in declaration order, plus the
/// strategy that picks among them.
pub struct BackendClientSet {
    upstream: Arc<UpstreamPool>,
    clients: Vec<Arc<BackendClient>>,
    strategy: Box<dyn LoadBalancingStrategy>,
}

impl BackendClientSet {
    fn build(upstream: Arc<UpstreamPool>, base: BackendClientOptions, seed: Option<u64>) -> Self {
        let clients = upstream
            .servers()
            .iter()
            .map(|server| {
                let options = BackendClientOptions {
                    max_conns: server.max_conns(),
                    ..base
                };
                Arc::new(BackendClient::new(server.addr(), options))
            })
            .collect();
        let strategy = LoadBalancerFactory::create_strategy(upstream.algorithm(), seed);

        Self {
            upstream,
            clients,
            strategy,
        }
    }

    pub fn upstream(&self) -> &Arc<UpstreamPool> {
        &self.upstream
    }

    pub fn clients(&self) -> &[Arc<BackendClient>] {
        &self.clients
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Pick a backend, preferring those marked Up. When every backend is Down
    /// the whole set stays eligible so the upstream keeps receiving traffic.
    pub fn select(&self) -> Option<(&Arc<BackendServer>, &Arc<BackendClient>)> {
        let servers = self.upstream.servers();
        let mut candidates: Vec<usize> = (0..servers.len()).filter(|&i| servers[i].is_up()).collect();
        if candidates.is_empty() {
            candidates = (0..servers.len()).collect();
        }

        let weights: Vec<u32> = candidates.iter().map(|&i| servers[i].weight()).collect();
        let picked = candidates[self.strategy.select_index(&weights)?];
        Some((&servers[picked], &self.clients[picked]))
    }
}

/// Registry of client sets keyed by upstream id. A set is built at most once
/// per id and shared by every rule that references the upstream.
pub struct ClientPool {
    sets: scc::HashMap<String, Arc<BackendClientSet>>,
    options: BackendClientOptions,
    seed: Option<u64>,
    builds: AtomicUsize,
}

impl Default for ClientPool {
    fn default() -> Self {
        Self::new(BackendClientOptions::default())
    }
}

impl ClientPool {
    pub fn new(options: BackendClientOptions) -> Self {
        Self {
            sets: scc::HashMap::new(),
            options,
            seed: None,
            builds: AtomicUsize::new(0),
        }
    }

    /// Seed every balancer this pool creates, for reproducible selection
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub async fn client_set(&self, upstream: &Arc<UpstreamPool>) -> Arc<BackendClientSet> {
        if let Some(set) = self
            .sets
            .read_async(upstream.id(), |_, set| Arc::clone(set))
            .await
        {
            return set;
        }

        match self.sets.entry_async(upstream.id().to_string()).await {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let set = Arc::new(BackendClientSet::build(
                    Arc::clone(upstream),
                    self.options,
                    self.seed,
                ));
                self.builds.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    upstream = upstream.id(),
                    backends = set.len(),
                    "built backend client set"
                );
                entry.insert_entry(Arc::clone(&set));
                set
            }
        }
    }

    /// Number of client sets constructed so far
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::load_balancer::BalanceAlgorithm;

    fn pool(servers: &[&str]) -> Arc<UpstreamPool> {
        Arc::new(UpstreamPool::new(
            "svc1",
            BalanceAlgorithm::Random,
            None,
            servers
                .iter()
                .map(|s| Arc::new(BackendServer::parse(s).unwrap()))
                .collect(),
        ))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_client_set_is_built_once_under_contention() {
        let clients = Arc::new(ClientPool::default());
        let upstream = pool(&["127.0.0.1:9001", "127.0.0.1:9002"]);

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let clients = Arc::clone(&clients);
                let upstream = Arc::clone(&upstream);
                tokio::spawn(async move { clients.client_set(&upstream).await })
            })
            .collect();

        let mut sets = Vec::new();
        for task in tasks {
            sets.push(task.await.unwrap());
        }

        assert_eq!(clients.builds(), 1);
        assert_eq!(clients.len(), 1);
        assert!(sets.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(sets[0].len(), 2);
    }

    #[tokio::test]
    async fn test_client_limits_follow_server_spec() {
        let clients = ClientPool::default();
        let set = clients.client_set(&pool(&["127.0.0.1:9001;7"])).await;
        assert_eq!(set.clients()[0].options().max_conns, 7);
        assert_eq!(set.clients()[0].available_permits(), 7);
    }

    #[tokio::test]
    async fn test_select_prefers_up_backends() {
        let clients = ClientPool::default().with_seed(11);
        let upstream = pool(&["127.0.0.1:9001", "127.0.0.1:9002"]);
        let set = clients.client_set(&upstream).await;

        upstream.servers()[0].mark_down();
        for _ in 0..50 {
            let (server, client) = set.select().unwrap();
            assert_eq!(server.addr(), "127.0.0.1:9002");
            assert_eq!(client.addr(), "127.0.0.1:9002");
        }
    }

    #[tokio::test]
    async fn test_select_falls_back_when_all_down() {
        let clients = ClientPool::default().with_seed(5);
        let upstream = pool(&["127.0.0.1:9001", "127.0.0.1:9002"]);
        let set = clients.client_set(&upstream).await;

        for server in upstream.servers() {
            server.mark_down();
        }
        assert!(set.select().is_some());
    }
}
