//! Choosing which SASL mechanism to run.

use std::collections::BTreeSet;

use super::mechanism::{self, Mechanism};
use crate::error::Result;
use crate::types::AuthMechanism;

/// Mechanisms in order of preference, strongest first.
///
/// Digest mechanisms never put the password on the wire, so they come
/// before the plaintext-equivalent ones. The token mechanisms only make
/// sense when the configured password is an access token, so they are
/// picked only when nothing else is allowed.
pub const PRIORITY: [AuthMechanism; 7] = [
    AuthMechanism::CramSha256,
    AuthMechanism::CramSha1,
    AuthMechanism::CramMd5,
    AuthMechanism::Login,
    AuthMechanism::Plain,
    AuthMechanism::XOAuth2,
    AuthMechanism::OAuthBearer,
];

/// Mechanism names both sides accept, upper-cased.
///
/// An empty `allow_list` accepts everything the server advertises. Names
/// are compared as strings, so unimplemented mechanisms stay in the result
/// and an allow-list never widens the server's set.
#[must_use]
pub fn selectable<A, B>(advertised: &[A], allow_list: &[B]) -> BTreeSet<String>
where
    A: AsRef<str>,
    B: AsRef<str>,
{
    let allow: BTreeSet<String> = allow_list
        .iter()
        .map(|name| name.as_ref().to_ascii_uppercase())
        .collect();
    advertised
        .iter()
        .map(|name| name.as_ref().to_ascii_uppercase())
        .filter(|name| allow.is_empty() || allow.contains(name))
        .collect()
}

/// Instantiates the most preferred implemented mechanism in `allowed`.
///
/// Returns `Ok(None)` if no name in `allowed` is implemented.
///
/// # Errors
///
/// Returns an error if the chosen mechanism rejects the credentials.
pub fn choose(
    username: &str,
    password: &str,
    allowed: &BTreeSet<String>,
) -> Result<Option<Box<dyn Mechanism>>> {
    PRIORITY
        .iter()
        .find(|kind| allowed.contains(kind.as_str()))
        .map(|&kind| mechanism::instantiate(kind, username, password))
        .transpose()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::Error;
    use proptest::prelude::*;

    use crate::types::AuthMechanism::{CramMd5, CramSha1, Login, XOAuth2};

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn empty_allow_list_keeps_advertised() {
        let allowed = selectable(&["PLAIN", "login"], &[] as &[&str]);
        assert_eq!(allowed, names(&["PLAIN", "LOGIN"]));
    }

    #[test]
    fn allow_list_intersects() {
        let allowed = selectable(&["PLAIN", "LOGIN", "CRAM-MD5"], &["cram-md5", "CRAM-SHA256"]);
        assert_eq!(allowed, names(&["CRAM-MD5"]));
    }

    #[test]
    fn disjoint_allow_list_is_empty() {
        assert!(selectable(&[Login], &[CramMd5]).is_empty());
    }

    #[test]
    fn unimplemented_allow_list_never_widens() {
        assert!(selectable(&["PLAIN", "LOGIN"], &["DIGEST-MD5"]).is_empty());
    }

    #[test]
    fn unimplemented_advertised_names_are_kept() {
        let allowed = selectable(&["GSSAPI", "NTLM"], &[] as &[&str]);
        assert_eq!(allowed, names(&["GSSAPI", "NTLM"]));
        assert!(choose("u", "p", &allowed).unwrap().is_none());
    }

    #[test]
    fn choose_prefers_digest_mechanisms() {
        let allowed = names(&["PLAIN", "LOGIN", "CRAM-MD5", "CRAM-SHA1", "GSSAPI"]);
        let chosen = choose("u", "p", &allowed).unwrap().unwrap();
        assert_eq!(chosen.kind(), CramSha1);
    }

    #[test]
    fn choose_prefers_login_over_plain() {
        let allowed = names(&["PLAIN", "LOGIN"]);
        assert_eq!(choose("u", "p", &allowed).unwrap().unwrap().kind(), Login);
    }

    #[test]
    fn choose_falls_back_to_token_mechanisms() {
        let allowed = names(&["OAUTHBEARER", "XOAUTH2"]);
        assert_eq!(choose("u", "t", &allowed).unwrap().unwrap().kind(), XOAuth2);
    }

    #[test]
    fn choose_nothing() {
        assert!(choose("u", "p", &BTreeSet::new()).unwrap().is_none());
    }

    #[test]
    fn choose_surfaces_instantiation_errors() {
        let allowed = names(&["PLAIN"]);
        assert!(matches!(
            choose("u", "p\0", &allowed),
            Err(Error::InvalidCredentials(_))
        ));
    }

    fn mechanism_name() -> impl Strategy<Value = String> {
        let mut pool: Vec<String> = PRIORITY.iter().map(ToString::to_string).collect();
        pool.extend(["GSSAPI", "NTLM", "DIGEST-MD5"].map(String::from));
        prop::sample::select(pool)
    }

    proptest! {
        #[test]
        fn selectable_is_within_both_sides(
            advertised in prop::collection::vec(mechanism_name(), 0..10),
            allow_list in prop::collection::vec(mechanism_name(), 0..10),
        ) {
            let allowed = selectable(advertised.as_slice(), allow_list.as_slice());
            for name in &allowed {
                prop_assert!(advertised.contains(name));
                prop_assert!(allow_list.is_empty() || allow_list.contains(name));
            }
        }

        #[test]
        fn chosen_mechanism_is_allowed(
            advertised in prop::collection::vec(mechanism_name(), 0..10),
        ) {
            let allowed = selectable(advertised.as_slice(), &[] as &[&str]);
            if let Some(chosen) = choose("u", "p", &allowed).unwrap() {
                prop_assert!(allowed.contains(chosen.kind().as_str()));
            }
        }
    }
}
