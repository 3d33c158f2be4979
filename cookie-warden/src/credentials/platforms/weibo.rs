//! Weibo session probe.

use async_trait::async_trait;
use reqwest::Client;
use warden_platforms::weibo::{WeiboEndpoints, WeiboError, fetch_timeline};

use super::browser::SessionProbe;
use crate::credentials::error::CredentialError;
use crate::credentials::types::Credential;

/// Validates a Weibo session by reading the first timeline page.
pub struct WeiboSessionProbe {
    client: Client,
    endpoints: WeiboEndpoints,
    uid: u64,
}

impl WeiboSessionProbe {
    pub fn new(client: Client, endpoints: WeiboEndpoints, uid: u64) -> Self {
        Self {
            client,
            endpoints,
            uid,
        }
    }
}

#[async_trait]
impl SessionProbe for WeiboSessionProbe {
    async fn probe(&self, credential: &Credential) -> Result<bool, CredentialError> {
        match fetch_timeline(
            &self.client,
            &self.endpoints,
            self.uid,
            1,
            &credential.cookie_header(),
        )
        .await
        {
            Ok(_) => Ok(true),
            Err(WeiboError::Unauthorized(reason)) => {
                tracing::debug!(%reason, "Weibo rejected the session");
                Ok(false)
            }
            Err(WeiboError::Network(e)) => Err(CredentialError::Network(e)),
            Err(e) => Err(CredentialError::Parse(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_session_check_maps_logged_out_to_false() {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ajax/statuses/mymblog"))
            .and(header("X-Xsrf-Token", "good"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":1,"data":{"list":[]}}"#))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ajax/statuses/mymblog"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":-100}"#))
            .mount(&server)
            .await;

        let probe = WeiboSessionProbe::new(Client::new(), WeiboEndpoints::new(server.uri()), 1);

        let good = Credential::from_cookie_header("weibo", "SUB=s; XSRF-TOKEN=good");
        let stale = Credential::from_cookie_header("weibo", "SUB=s");
        assert!(probe.probe(&good).await.unwrap());
        assert!(!probe.probe(&stale).await.unwrap());
    }
}
