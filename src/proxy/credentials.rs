use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::HeaderMap;
use http::header::AUTHORIZATION;
use reqwest::Url;

const DEFAULT_USER: &str = "default";
const USER_PARAM: &str = "user";
const PASSWORD_PARAM: &str = "password";

/// Credentials presented by a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: &str, password: &str) -> Self {
        Self {
            user: user.to_string(),
            password: password.to_string(),
        }
    }

    /// Extracts credentials from a request
    ///
    /// `Authorization: Basic` wins, then the `user` and `password` query
    /// parameters. Without either the client is the `default` user with
    /// an empty password.
    pub fn from_request(headers: &HeaderMap, query: Option<&str>) -> Self {
        if let Some(credentials) = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_basic_auth)
        {
            return credentials;
        }

        let mut user = None;
        let mut password = None;
        if let Some(url) = query.and_then(query_url) {
            for (key, value) in url.query_pairs() {
                match key.as_ref() {
                    USER_PARAM => user = Some(value.into_owned()),
                    PASSWORD_PARAM => password = Some(value.into_owned()),
                    _ => {}
                }
            }
        }

        Self {
            user: user.unwrap_or_else(|| DEFAULT_USER.to_string()),
            password: password.unwrap_or_default(),
        }
    }
}

fn parse_basic_auth(value: &str) -> Option<Credentials> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some(Credentials::new(user, password))
}

fn query_url(query: &str) -> Option<Url> {
    let mut url = Url::parse("http://gateway/").ok()?;
    url.set_query(Some(query));
    Some(url)
}

/// Removes the credential parameters from a query string
///
/// The backend receives execution-user credentials instead, leaving the
/// client's in the query would conflict with them. Every other parameter
/// is kept byte for byte.
pub fn strip_credentials(query: &str) -> Option<String> {
    let kept = query
        .split('&')
        .filter(|segment| !is_credential_param(segment))
        .collect::<Vec<_>>()
        .join("&");
    if kept.is_empty() { None } else { Some(kept) }
}

fn is_credential_param(segment: &str) -> bool {
    let name = query_url(segment).and_then(|url| {
        url.query_pairs()
            .next()
            .map(|(name, _)| name.into_owned())
    });
    matches!(name.as_deref(), Some(USER_PARAM | PASSWORD_PARAM))
}
