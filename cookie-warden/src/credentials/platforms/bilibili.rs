//! Challenge-response refresher for Bilibili passport cookies.

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};
use warden_platforms::bilibili::{
    CookieStatus, PassportEndpoints, check_cookie_status, refresh_cookies, validate_cookies,
};

use crate::credentials::error::CredentialError;
use crate::credentials::refresher::Refresher;
use crate::credentials::types::Credential;

/// Renews the session through the RSA-OAEP correspond handshake.
///
/// The long-lived refresh token rotates on every success.
pub struct ChallengeResponseRefresher {
    client: Client,
    endpoints: PassportEndpoints,
}

impl ChallengeResponseRefresher {
    pub fn new(client: Client) -> Self {
        Self::with_endpoints(client, PassportEndpoints::default())
    }

    pub fn with_endpoints(client: Client, endpoints: PassportEndpoints) -> Self {
        Self { client, endpoints }
    }
}

#[async_trait]
impl Refresher for ChallengeResponseRefresher {
    fn name(&self) -> &'static str {
        "challenge_response"
    }

    async fn is_valid(&self, credential: &Credential) -> Result<bool, CredentialError> {
        let cookies = credential.cookie_header();
        match check_cookie_status(&self.client, &self.endpoints, &cookies).await? {
            CookieStatus::Valid => {}
            CookieStatus::NeedsRefresh { deadline_timestamp } => {
                info!(?deadline_timestamp, "Passport asks for a cookie refresh");
                return Ok(false);
            }
            CookieStatus::Invalid { reason, code } => {
                debug!(%reason, ?code, "Cookie info reports an invalid session");
                return Ok(false);
            }
        }

        // cookie/info can lag behind a revoked session; nav is authoritative.
        Ok(validate_cookies(&self.client, &self.endpoints, &cookies).await?)
    }

    async fn refresh(&self, credential: &Credential) -> Result<Credential, CredentialError> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .ok_or(CredentialError::MissingRefreshToken)?;

        let refreshed = refresh_cookies(
            &self.client,
            &self.endpoints,
            &credential.cookie_header(),
            refresh_token,
        )
        .await?;

        Ok(
            Credential::from_cookie_header(credential.target_id.clone(), &refreshed.cookies)
                .with_refresh_token(Some(refreshed.refresh_token)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header_regex, method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> Client {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        Client::new()
    }

    fn credential() -> Credential {
        Credential::from_cookie_header("bili", "SESSDATA=s1; bili_jct=jct1; DedeUserID=42")
            .with_refresh_token(Some("rt1".into()))
    }

    async fn mount_rotation(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path_regex(r"^/correspond/1/[0-9a-f]{256}$"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"<html><div id="1-name">csrf-token</div></html>"#),
            )
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/x/passport-login/web/cookie/refresh"))
            .and(body_string_contains("refresh_token=rt1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .append_header("Set-Cookie", "SESSDATA=s2; Path=/; HttpOnly")
                    .append_header("Set-Cookie", "bili_jct=jct2; Path=/")
                    .set_body_string(r#"{"code":0,"message":"0","data":{"refresh_token":"rt2"}}"#),
            )
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/x/passport-login/web/confirm/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"code":0}"#))
            .mount(server)
            .await;
    }

    async fn mount_probes(server: &MockServer) {
        // Old session: needs refresh and nav logged out.
        Mock::given(method("GET"))
            .and(path("/x/passport-login/web/cookie/info"))
            .and(header_regex("cookie", "SESSDATA=s1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"code":0,"data":{"refresh":true,"timestamp":1700000000000}}"#,
            ))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/x/passport-login/web/cookie/info"))
            .and(header_regex("cookie", "SESSDATA=s2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"code":0,"data":{"refresh":false}}"#),
            )
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/x/web-interface/nav"))
            .and(header_regex("cookie", "SESSDATA=s2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"code":0,"data":{"isLogin":true,"mid":42,"uname":"u"}}"#,
            ))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_is_valid_refresh_is_valid_round_trip() {
        let server = MockServer::start().await;
        mount_rotation(&server).await;
        mount_probes(&server).await;

        let refresher = ChallengeResponseRefresher::with_endpoints(
            client(),
            PassportEndpoints::single_host(server.uri()),
        );
        let old = credential();

        assert!(!refresher.is_valid(&old).await.unwrap());
        let renewed = refresher.refresh(&old).await.unwrap();
        assert!(refresher.is_valid(&renewed).await.unwrap());

        assert_eq!(renewed.get("SESSDATA"), Some("s2"));
        assert_eq!(renewed.get("DedeUserID"), Some("42"));
        assert_eq!(renewed.refresh_token.as_deref(), Some("rt2"));
        // The input is untouched.
        assert_eq!(old.refresh_token.as_deref(), Some("rt1"));
    }

    #[tokio::test]
    async fn test_missing_marker_is_challenge_error_and_token_kept() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/correspond/1/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let refresher = ChallengeResponseRefresher::with_endpoints(
            client(),
            PassportEndpoints::single_host(server.uri()),
        );
        let old = credential();
        let err = refresher.refresh(&old).await.unwrap_err();

        assert!(matches!(
            err,
            CredentialError::ChallengeTokenNotFound { status: 200 }
        ));
        assert_eq!(old.refresh_token.as_deref(), Some("rt1"));
    }

    #[tokio::test]
    async fn test_refresh_without_token_requires_relogin() {
        let refresher = ChallengeResponseRefresher::new(client());
        let credential = Credential::from_cookie_header("bili", "SESSDATA=s1; bili_jct=j");
        let err = refresher.refresh(&credential).await.unwrap_err();
        assert!(err.requires_relogin());
    }
}
