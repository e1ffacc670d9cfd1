// End-to-end broker flows: real live.com and VSO authorities against mock HTTP servers,
// tokens kept in in-memory stores.

use credbroker::auth::{BrokerSettings, CodePrompt, LiveAuthority, MemoryStore, VsoAuthority};
use credbroker::helper::{self, HelperCommand, HelperOptions, HelperRequest};
use credbroker::{CredentialBroker, FailureKind, TargetResource, Token, TokenKind, TokenStore};
use mockito::{Matcher, Server};
use std::time::Duration;
use url::Url;

const TARGET: &str = "https://contoso.visualstudio.com";

type Broker = CredentialBroker<MemoryStore, LiveAuthority, VsoAuthority>;

fn settings() -> BrokerSettings {
    BrokerSettings {
        client_id: "872cd9fa-d31f-45e0-9eab-6e460a02d1f1".to_string(),
        resource: "499b84ac-1321-427f-aa17-267ca6975798".to_string(),
        redirect_uri: Url::parse("urn:ietf:wg:oauth:2.0:oob").unwrap(),
        login_hint: "domain_hint=live.com&display=popup".to_string(),
    }
}

/// Broker wired to `server`: identity at `/live.com`, VSO at the root
fn broker_for(server: &Server) -> (Broker, MemoryStore, MemoryStore) {
    let pats = MemoryStore::new();
    let refresh = MemoryStore::new();
    let identity = LiveAuthority::new(&format!("{}/live.com", server.url()), Duration::from_secs(5))
        .without_browser();
    let resource = VsoAuthority::new(&server.url(), "vso.code_write", Duration::from_secs(5));
    let broker = CredentialBroker::new(settings(), pats.clone(), refresh.clone(), identity, resource);
    (broker, pats, refresh)
}

fn target() -> TargetResource {
    TargetResource::parse(TARGET).unwrap()
}

#[tokio::test]
async fn test_refresh_flow_stores_exchanged_pat() {
    let mut server = Server::new_async().await;
    let token_mock = server
        .mock("POST", "/live.com/oauth2/token")
        .match_body(Matcher::UrlEncoded("refresh_token".into(), "stored-refresh".into()))
        .with_status(200)
        .with_body(r#"{"access_token":"fresh-access","refresh_token":"rotated-refresh"}"#)
        .create_async()
        .await;
    let pat_mock = server
        .mock("POST", "/_apis/token/sessiontokens")
        .match_query(Matcher::UrlEncoded("api-version".into(), "1.0".into()))
        .match_header("authorization", "Bearer fresh-access")
        .with_status(200)
        .with_body(r#"{"token":"pat-from-vso"}"#)
        .create_async()
        .await;

    let (broker, pats, refresh) = broker_for(&server);
    refresh.write(&target(), &Token::refresh("stored-refresh")).unwrap();

    assert!(broker.refresh_credentials(TARGET, false).await.unwrap());

    let pat = pats.read(&target()).unwrap().unwrap();
    assert_eq!(pat.value, "pat-from-vso");
    assert_eq!(pat.kind, TokenKind::Personal);
    // The refresh flow only reads the refresh token; rotation is left to the next login
    assert_eq!(refresh.read(&target()).unwrap().unwrap().value, "stored-refresh");
    token_mock.assert_async().await;
    pat_mock.assert_async().await;
}

#[tokio::test]
async fn test_revoked_refresh_token_is_denied_and_kept() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/live.com/oauth2/token")
        .with_status(400)
        .with_body(r#"{"error":"invalid_grant","error_description":"token revoked"}"#)
        .create_async()
        .await;
    let pat_mock = server
        .mock("POST", "/_apis/token/sessiontokens")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let (broker, pats, refresh) = broker_for(&server);
    refresh.write(&target(), &Token::refresh("revoked")).unwrap();

    let outcome = broker.refresh_credentials_outcome(TARGET, false).await.unwrap();
    assert!(matches!(outcome, Err(FailureKind::AuthorityDenied(_))));

    assert_eq!(refresh.read(&target()).unwrap().unwrap().value, "revoked");
    assert!(pats.is_empty());
    pat_mock.assert_async().await;
}

#[tokio::test]
async fn test_pat_exchange_server_error_is_transient() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/live.com/oauth2/token")
        .with_status(200)
        .with_body(r#"{"access_token":"fresh-access","refresh_token":"rotated-refresh"}"#)
        .create_async()
        .await;
    server
        .mock("POST", "/_apis/token/sessiontokens")
        .match_query(Matcher::Any)
        .with_status(503)
        .with_body("service unavailable")
        .create_async()
        .await;

    let (broker, pats, refresh) = broker_for(&server);
    refresh.write(&target(), &Token::refresh("stored-refresh")).unwrap();

    let outcome = broker.refresh_credentials_outcome(TARGET, true).await.unwrap();
    assert!(matches!(outcome, Err(FailureKind::TransientFailure(_))));
    assert!(pats.is_empty());
}

#[tokio::test]
async fn test_helper_get_prints_refreshed_credential() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/live.com/oauth2/token")
        .with_status(200)
        .with_body(r#"{"access_token":"fresh-access","refresh_token":"rotated-refresh"}"#)
        .create_async()
        .await;
    server
        .mock("POST", "/_apis/token/sessiontokens")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"token":"pat-compact"}"#)
        .create_async()
        .await;

    let (broker, _, refresh) = broker_for(&server);
    refresh.write(&target(), &Token::refresh("stored-refresh")).unwrap();

    let request =
        HelperRequest::parse("protocol=https\nhost=contoso.visualstudio.com\n\n".as_bytes()).unwrap();
    let options = HelperOptions {
        compact: true,
        interactive: false,
    };
    let mut out = Vec::new();
    helper::run(&broker, HelperCommand::Get, &request, options, &mut out)
        .await
        .unwrap();

    assert_eq!(
        String::from_utf8(out).unwrap(),
        "username=PersonalAccessToken\npassword=pat-compact\n"
    );
}

#[test]
fn test_helper_store_and_erase_touch_no_network() {
    let server = Server::new();
    let (broker, pats, refresh) = broker_for(&server);
    pats.write(&target(), &Token::new(TokenKind::Personal, "old-pat")).unwrap();
    refresh.write(&target(), &Token::refresh("old-refresh")).unwrap();

    let options = HelperOptions {
        compact: false,
        interactive: false,
    };

    // store is unsupported for this account class: nothing changes
    let request = HelperRequest::parse(
        "protocol=https\nhost=contoso.visualstudio.com\nusername=me\npassword=secret\n".as_bytes(),
    )
    .unwrap();
    let mut out = Vec::new();
    tokio_test::block_on(helper::run(&broker, HelperCommand::Store, &request, options, &mut out))
        .unwrap();
    assert_eq!(pats.read(&target()).unwrap().unwrap().value, "old-pat");
    assert!(out.is_empty());

    tokio_test::block_on(helper::run(&broker, HelperCommand::Erase, &request, options, &mut out))
        .unwrap();
    assert!(pats.is_empty());
    assert_eq!(refresh.read(&target()).unwrap().unwrap().value, "old-refresh");
}

#[tokio::test]
async fn test_helper_erase_then_get_mints_new_pat_silently() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/live.com/oauth2/token")
        .match_body(Matcher::UrlEncoded("refresh_token".into(), "good-refresh".into()))
        .with_status(200)
        .with_body(r#"{"access_token":"fresh-access"}"#)
        .create_async()
        .await;
    server
        .mock("POST", "/_apis/token/sessiontokens")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"token":"new-pat"}"#)
        .create_async()
        .await;

    let (broker, pats, refresh) = broker_for(&server);
    pats.write(&target(), &Token::new(TokenKind::Personal, "revoked-pat")).unwrap();
    refresh.write(&target(), &Token::refresh("good-refresh")).unwrap();

    let request =
        HelperRequest::parse("protocol=https\nhost=contoso.visualstudio.com\n\n".as_bytes()).unwrap();
    let options = HelperOptions {
        compact: false,
        interactive: false,
    };

    let mut out = Vec::new();
    helper::run(&broker, HelperCommand::Erase, &request, options, &mut out)
        .await
        .unwrap();
    assert!(out.is_empty());

    helper::run(&broker, HelperCommand::Get, &request, options, &mut out)
        .await
        .unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "username=PersonalAccessToken\npassword=new-pat\n"
    );
    assert_eq!(pats.read(&target()).unwrap().unwrap().value, "new-pat");
}

/// Answers the code prompt without a terminal
struct FixedCode(&'static str);

impl CodePrompt for FixedCode {
    fn read_code(&self, _prompt: &str) -> anyhow::Result<String> {
        Ok(self.0.to_string())
    }
}

#[tokio::test]
async fn test_helper_get_signs_in_after_request_consumed_stdin() {
    let mut server = Server::new_async().await;
    let token_mock = server
        .mock("POST", "/live.com/oauth2/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
            Matcher::UrlEncoded("code".into(), "pasted-code".into()),
        ]))
        .with_status(200)
        .with_body(r#"{"access_token":"login-access","refresh_token":"login-refresh"}"#)
        .create_async()
        .await;
    server
        .mock("POST", "/_apis/token/sessiontokens")
        .match_query(Matcher::Any)
        .match_header("authorization", "Bearer login-access")
        .with_status(200)
        .with_body(r#"{"token":"login-pat"}"#)
        .create_async()
        .await;

    let pats = MemoryStore::new();
    let refresh = MemoryStore::new();
    let identity = LiveAuthority::new(&format!("{}/live.com", server.url()), Duration::from_secs(5))
        .without_browser()
        .with_prompt(FixedCode("pasted-code"));
    let resource = VsoAuthority::new(&server.url(), "vso.code_write", Duration::from_secs(5));
    let broker = CredentialBroker::new(settings(), pats.clone(), refresh.clone(), identity, resource);

    // The request is read to EOF, as git leaves stdin before the prompt
    let mut stdin: &[u8] = b"protocol=https\nhost=contoso.visualstudio.com\n";
    let request = HelperRequest::parse(&mut stdin).unwrap();
    assert!(stdin.is_empty());

    let options = HelperOptions {
        compact: false,
        interactive: true,
    };
    let mut out = Vec::new();
    helper::run(&broker, HelperCommand::Get, &request, options, &mut out)
        .await
        .unwrap();

    token_mock.assert_async().await;
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "username=PersonalAccessToken\npassword=login-pat\n"
    );
    assert_eq!(refresh.read(&target()).unwrap().unwrap().value, "login-refresh");
}

#[tokio::test]
async fn test_helper_get_with_malformed_target_errors() {
    let server = Server::new_async().await;
    let (broker, _, _) = broker_for(&server);

    let request = HelperRequest::parse("host=contoso.visualstudio.com\n".as_bytes()).unwrap();
    let options = HelperOptions {
        compact: false,
        interactive: true,
    };
    let mut out = Vec::new();
    let result = helper::run(&broker, HelperCommand::Get, &request, options, &mut out).await;

    assert!(result.is_err());
    assert!(out.is_empty());
}
