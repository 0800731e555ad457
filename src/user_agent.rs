//! User-Agent string sent with every fetch request.
//!
//! Servers publishing documents get an identifiable client with a contact
//! URL instead of the bare reqwest default (RFC 9308).

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/fierce/dedup-fetcher";

/// Default User-Agent for fetch requests.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("dedup-fetcher/{version} (document-batch-fetcher; +{PROJECT_UA_URL})")
}
