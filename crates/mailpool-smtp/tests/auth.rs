//! Integration tests for the AUTH exchange.
//!
//! These tests script the server side with `tokio_test::io::Builder`, so
//! any line the client sends out of order fails the test.

#![allow(clippy::unwrap_used)]

use tokio_test::io::Builder;

use mailpool_smtp::{
    AuthMechanism, AuthOutcome, Config, Error, LoginPolicy, Transport, authenticate,
};

fn required(methods: &str) -> Config {
    Config::builder("smtp.example.com")
        .login(LoginPolicy::Required)
        .credentials("user", "secret")
        .auth_methods(methods)
        .build()
}

#[tokio::test]
async fn test_cram_md5_two_rounds() {
    // Challenge "abcd"; response is "user " + hex(HMAC-MD5("secret", "abcd"))
    let mock = Builder::new()
        .write(b"AUTH CRAM-MD5\r\n")
        .read(b"334 YWJjZA==\r\n")
        .write(b"dXNlciA2MDJlMDgxMmMxNjQ1MzY3YTFhMGE3OGJjY2NmNmJlMA==\r\n")
        .read(b"235 2.7.0 Authentication successful\r\n")
        .build();
    let mut transport = Transport::new(mock);

    let outcome = authenticate(&mut transport, &[AuthMechanism::CramMd5], &required(""))
        .await
        .unwrap();
    assert_eq!(outcome, AuthOutcome::Authenticated(AuthMechanism::CramMd5));
}

#[tokio::test]
async fn test_login_answers_prompts() {
    let mock = Builder::new()
        .write(b"AUTH LOGIN\r\n")
        .read(b"334 VXNlcm5hbWU6\r\n")
        .write(b"dXNlcg==\r\n")
        .read(b"334 UGFzc3dvcmQ6\r\n")
        .write(b"c2VjcmV0\r\n")
        .read(b"235 2.7.0 Authentication successful\r\n")
        .build();
    let mut transport = Transport::new(mock);

    let outcome = authenticate(
        &mut transport,
        &[AuthMechanism::Plain, AuthMechanism::Login],
        &required(""),
    )
    .await
    .unwrap();
    assert_eq!(outcome, AuthOutcome::Authenticated(AuthMechanism::Login));
}

#[tokio::test]
async fn test_allow_list_narrows_choice() {
    let mock = Builder::new()
        .write(b"AUTH PLAIN AHVzZXIAc2VjcmV0\r\n")
        .read(b"235 2.7.0 Authentication successful\r\n")
        .build();
    let mut transport = Transport::new(mock);

    let advertised = [
        AuthMechanism::Plain,
        AuthMechanism::Login,
        AuthMechanism::CramSha256,
    ];
    let outcome = authenticate(&mut transport, &advertised, &required("PLAIN"))
        .await
        .unwrap();
    assert_eq!(outcome, AuthOutcome::Authenticated(AuthMechanism::Plain));
}

#[tokio::test]
async fn test_rejection_reports_mechanism() {
    let mock = Builder::new()
        .write(b"AUTH PLAIN AHVzZXIAc2VjcmV0\r\n")
        .read(b"535 5.7.8 Authentication credentials invalid\r\n")
        .build();
    let mut transport = Transport::new(mock);

    let err = authenticate(&mut transport, &[AuthMechanism::Plain], &required(""))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Auth {
            mechanism: AuthMechanism::Plain,
            ..
        }
    ));
    assert!(err.to_string().contains("535 5.7.8"));
}

#[tokio::test]
async fn test_xoauth2_error_challenge() {
    let config = Config::builder("smtp.example.com")
        .login(LoginPolicy::Required)
        .credentials("user@example.com", "ya29.token")
        .build();
    let mock = Builder::new()
        .write(b"AUTH XOAUTH2 dXNlcj11c2VyQGV4YW1wbGUuY29tAWF1dGg9QmVhcmVyIHlhMjkudG9rZW4BAQ==\r\n")
        .read(b"334 eyJzdGF0dXMiOiI0MDEifQ==\r\n")
        .write(b"\r\n")
        .read(b"535 5.7.8 Username and Password not accepted\r\n")
        .build();
    let mut transport = Transport::new(mock);

    let err = authenticate(&mut transport, &[AuthMechanism::XOAuth2], &config)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Auth {
            mechanism: AuthMechanism::XOAuth2,
            ..
        }
    ));
}

#[tokio::test]
async fn test_login_policy_without_server_support() {
    // Nothing is written: the decision is made before any AUTH line
    let mut transport = Transport::new(Builder::new().build());
    let err = authenticate(&mut transport, &[AuthMechanism::Login], &required("CRAM-MD5"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoUsableMechanism));
    assert!(err.is_configuration());

    let optional = Config {
        login: LoginPolicy::Optional,
        ..required("CRAM-MD5")
    };
    let mut transport = Transport::new(Builder::new().build());
    let outcome = authenticate(&mut transport, &[AuthMechanism::Login], &optional)
        .await
        .unwrap();
    assert_eq!(outcome, AuthOutcome::Skipped);
}

#[tokio::test]
async fn test_dropped_connection_mid_exchange() {
    let mock = Builder::new()
        .write(b"AUTH LOGIN\r\n")
        .read(b"334 VXNlcm5hbWU6\r\n")
        .write(b"dXNlcg==\r\n")
        .build();
    let mut transport = Transport::new(mock);

    let err = authenticate(&mut transport, &[AuthMechanism::Login], &required(""))
        .await
        .unwrap_err();
    assert!(err.is_transport());
}

#[tokio::test]
async fn test_unimplemented_allow_list_never_falls_back_to_plain() {
    // Nothing is written: PLAIN is advertised but not allowed
    let mut transport = Transport::new(Builder::new().build());
    let err = authenticate(&mut transport, &["PLAIN", "LOGIN"], &required("DIGEST-MD5"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoUsableMechanism));

    let optional = Config {
        login: LoginPolicy::Optional,
        ..required("DIGEST-MD5")
    };
    let mut transport = Transport::new(Builder::new().build());
    let outcome = authenticate(&mut transport, &["PLAIN", "LOGIN"], &optional)
        .await
        .unwrap();
    assert_eq!(outcome, AuthOutcome::Skipped);
}

#[tokio::test]
async fn test_only_unimplemented_mechanisms_advertised() {
    for login in [LoginPolicy::Required, LoginPolicy::Optional] {
        let config = Config {
            login,
            ..required("")
        };
        let mut transport = Transport::new(Builder::new().build());
        let err = authenticate(&mut transport, &["GSSAPI"], &config)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSupportedMechanism));
        assert!(err.is_configuration());
    }
}

#[tokio::test]
async fn test_allow_list_matches_unimplemented_advertised_name() {
    let mut transport = Transport::new(Builder::new().build());
    let err = authenticate(&mut transport, &["GSSAPI", "PLAIN"], &required("gssapi"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoSupportedMechanism));
}
