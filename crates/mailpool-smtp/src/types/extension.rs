//! EHLO extension keywords and SASL mechanism names.

/// SMTP extensions discovered from EHLO response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Extension {
    /// STARTTLS - TLS upgrade
    StartTls,
    /// AUTH - Authentication, with the advertised mechanism names
    /// (upper-cased, including ones without an [`AuthMechanism`])
    Auth(Vec<String>),
    /// SIZE - Maximum message size
    Size(Option<usize>),
    /// 8BITMIME - 8-bit MIME transport
    EightBitMime,
    /// PIPELINING - Command pipelining
    Pipelining,
    /// SMTPUTF8 - UTF-8 email addresses
    SmtpUtf8,
    /// Any keyword this client does not act on
    Unknown(String),
}

impl Extension {
    /// Parses an extension line from EHLO response.
    ///
    /// Accepts the pre-standard `AUTH=PLAIN LOGIN` form that some servers
    /// still send alongside `AUTH PLAIN LOGIN`.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let (keyword, params) = match line.split_once([' ', '=']) {
            Some((keyword, params)) => (keyword, params),
            None => (line, ""),
        };

        match keyword.to_uppercase().as_str() {
            "" => Self::Unknown(line.to_string()),
            "STARTTLS" => Self::StartTls,
            "AUTH" => Self::Auth(AuthMechanism::parse_names(params)),
            "SIZE" => Self::Size(params.trim().parse().ok()),
            "8BITMIME" => Self::EightBitMime,
            "PIPELINING" => Self::Pipelining,
            "SMTPUTF8" => Self::SmtpUtf8,
            _ => Self::Unknown(line.to_string()),
        }
    }
}

/// SASL authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AuthMechanism {
    /// PLAIN - plaintext authentication
    Plain,
    /// LOGIN - legacy plaintext
    Login,
    /// CRAM-MD5 - challenge-response
    CramMd5,
    /// CRAM-SHA1 - challenge-response with HMAC-SHA1
    CramSha1,
    /// CRAM-SHA256 - challenge-response with HMAC-SHA256
    CramSha256,
    /// `XOAUTH2` - `OAuth2` (Google/Microsoft)
    XOAuth2,
    /// `OAUTHBEARER` - RFC 7628 `OAuth2`
    OAuthBearer,
}

impl AuthMechanism {
    /// Parses an authentication mechanism name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Some(Self::Plain),
            "LOGIN" => Some(Self::Login),
            "CRAM-MD5" => Some(Self::CramMd5),
            "CRAM-SHA1" => Some(Self::CramSha1),
            "CRAM-SHA256" => Some(Self::CramSha256),
            "XOAUTH2" => Some(Self::XOAuth2),
            "OAUTHBEARER" => Some(Self::OAuthBearer),
            _ => None,
        }
    }

    /// Splits a space separated mechanism list into upper-cased names.
    ///
    /// Names without a variant here (`GSSAPI`, `DIGEST-MD5`, ...) are kept:
    /// selection intersects names, so dropping them would change which
    /// mechanisms count as allowed.
    #[must_use]
    pub fn parse_names(list: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in list.split_whitespace().map(str::to_ascii_uppercase) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Returns the mechanism name as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
            Self::CramMd5 => "CRAM-MD5",
            Self::CramSha1 => "CRAM-SHA1",
            Self::CramSha256 => "CRAM-SHA256",
            Self::XOAuth2 => "XOAUTH2",
            Self::OAuthBearer => "OAUTHBEARER",
        }
    }
}

impl AsRef<str> for AuthMechanism {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    mod extension_parse_tests {
        use super::*;

        #[test]
        fn parse_keywords() {
            assert_eq!(Extension::parse("STARTTLS"), Extension::StartTls);
            assert_eq!(Extension::parse("starttls"), Extension::StartTls);
            assert_eq!(Extension::parse("8BITMIME"), Extension::EightBitMime);
            assert_eq!(Extension::parse("PIPELINING"), Extension::Pipelining);
            assert_eq!(Extension::parse("SMTPUTF8"), Extension::SmtpUtf8);
        }

        #[test]
        fn parse_auth_list() {
            assert_eq!(
                Extension::parse("AUTH PLAIN LOGIN CRAM-MD5"),
                Extension::Auth(vec!["PLAIN".into(), "LOGIN".into(), "CRAM-MD5".into()])
            );
        }

        #[test]
        fn parse_legacy_auth_form() {
            assert_eq!(
                Extension::parse("AUTH=LOGIN PLAIN"),
                Extension::Auth(vec!["LOGIN".into(), "PLAIN".into()])
            );
        }

        #[test]
        fn parse_auth_keeps_unimplemented_mechanisms() {
            assert_eq!(
                Extension::parse("AUTH gssapi NTLM XOAUTH2"),
                Extension::Auth(vec!["GSSAPI".into(), "NTLM".into(), "XOAUTH2".into()])
            );
            assert_eq!(Extension::parse("AUTH"), Extension::Auth(vec![]));
        }

        #[test]
        fn parse_size() {
            assert_eq!(
                Extension::parse("SIZE 52428800"),
                Extension::Size(Some(52_428_800))
            );
            assert_eq!(Extension::parse("SIZE"), Extension::Size(None));
        }

        #[test]
        fn parse_unknown_and_empty() {
            assert_eq!(
                Extension::parse("X-CUSTOM 1"),
                Extension::Unknown("X-CUSTOM 1".into())
            );
            assert!(matches!(Extension::parse(""), Extension::Unknown(_)));
        }
    }

    mod auth_mechanism_tests {
        use super::*;

        #[test]
        fn parse_is_case_insensitive() {
            assert_eq!(AuthMechanism::parse("plain"), Some(AuthMechanism::Plain));
            assert_eq!(
                AuthMechanism::parse("cram-sha256"),
                Some(AuthMechanism::CramSha256)
            );
        }

        #[test]
        fn parse_unknown() {
            assert_eq!(AuthMechanism::parse("DIGEST-MD5"), None);
            assert_eq!(AuthMechanism::parse("GSSAPI"), None);
        }

        #[test]
        fn parse_names_upper_cases_and_dedups() {
            assert_eq!(
                AuthMechanism::parse_names("CRAM-SHA1 gssapi cram-md5 CRAM-SHA1"),
                vec!["CRAM-SHA1", "GSSAPI", "CRAM-MD5"]
            );
            assert!(AuthMechanism::parse_names("   ").is_empty());
        }

        #[test]
        fn names_round_trip() {
            for mechanism in [
                AuthMechanism::Plain,
                AuthMechanism::Login,
                AuthMechanism::CramMd5,
                AuthMechanism::CramSha1,
                AuthMechanism::CramSha256,
                AuthMechanism::XOAuth2,
                AuthMechanism::OAuthBearer,
            ] {
                assert_eq!(AuthMechanism::parse(mechanism.as_str()), Some(mechanism));
                assert_eq!(mechanism.to_string(), mechanism.as_str());
                assert_eq!(mechanism.as_ref(), mechanism.as_str());
            }
        }
    }
}
