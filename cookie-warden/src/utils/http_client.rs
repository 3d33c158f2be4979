use std::sync::OnceLock;

use tracing::{debug, warn};
use warden_platforms::DEFAULT_UA;

use crate::config::{HttpConfig, ProxyConfig};

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate installed one first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Apply `proxy_config` to a `reqwest::ClientBuilder`.
///
/// - `enabled = false` disables all proxies, including env/system
/// - `url = Some(..)` uses that proxy, with basic auth when both credentials are set
/// - `use_system_proxy = true` keeps reqwest's env/system proxy detection
/// - otherwise no proxy
pub fn apply_proxy_config(
    mut builder: reqwest::ClientBuilder,
    proxy_config: &ProxyConfig,
) -> reqwest::ClientBuilder {
    if !proxy_config.enabled {
        return builder.no_proxy();
    }

    if let Some(url) = proxy_config.url.as_deref() {
        match reqwest::Proxy::all(url) {
            Ok(mut proxy) => {
                if let (Some(username), Some(password)) = (
                    proxy_config.username.as_ref(),
                    proxy_config.password.as_ref(),
                ) {
                    proxy = proxy.basic_auth(username, password);
                }
                builder = builder.proxy(proxy);
            }
            Err(error) => {
                warn!(
                    proxy_url = %url,
                    error = %error,
                    "Invalid proxy URL; disabling proxy"
                );
                builder = builder.no_proxy();
            }
        }
        return builder;
    }

    if proxy_config.use_system_proxy {
        return builder;
    }

    builder.no_proxy()
}

/// Shared client for every site binding, refresher and source.
///
/// Cookies are sent explicitly per request, so the client keeps no jar.
pub fn build_http_client(config: &HttpConfig) -> reqwest::Client {
    install_rustls_provider();

    let user_agent = config.user_agent.as_deref().unwrap_or(DEFAULT_UA);
    let mut builder = reqwest::Client::builder()
        .user_agent(user_agent)
        .gzip(true)
        .deflate(true);

    if !config.timeout.is_zero() {
        builder = builder.timeout(config.timeout);
    }
    builder = apply_proxy_config(builder, &config.proxy);

    builder.build().unwrap_or_else(|error| {
        warn!(error = %error, "Failed to build HTTP client; falling back to reqwest defaults");
        reqwest::Client::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_client_with_invalid_proxy_falls_back() {
        let config = HttpConfig {
            proxy: ProxyConfig {
                enabled: true,
                url: Some("::not a url::".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        // builds without panicking
        let _client = build_http_client(&config);
    }
}
