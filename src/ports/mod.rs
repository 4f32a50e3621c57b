pub mod file_system;
pub mod health_probe;
pub mod http_client;

pub use file_system::{FileSystem, FileSystemError, FileSystemResult};
pub use health_probe::{BackendProbe, ProbeError, ProbeResult};
pub use http_client::{HttpClient, HttpClientError, HttpClientResult};
