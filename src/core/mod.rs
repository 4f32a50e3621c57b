pub mod backend;
pub mod gateway;
pub mod load_balancer;
pub mod pattern_cache;
pub mod routing;
pub mod upstream;

pub use backend::{BackendServer, BackendStatus};
pub use gateway::{GatewayService, ListenerSpec, TlsFiles};
pub use load_balancer::LoadBalancerFactory;
pub use pattern_cache::PatternCache;
pub use routing::{HostRoutingTable, LocationRule, RuleId, RuleTarget};
pub use upstream::UpstreamPool;
