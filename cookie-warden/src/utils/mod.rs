pub mod http_client;

pub use http_client::{apply_proxy_config, build_http_client, install_rustls_provider};
