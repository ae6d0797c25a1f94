use std::net::IpAddr;

use url::{Host, Url};

use crate::AuthError;

/// Loopback address and path the receiver listens on.
#[derive(Debug, Clone)]
pub(super) struct RedirectTarget {
    base: Url,
    pub(super) host: String,
    pub(super) port: u16,
}

impl RedirectTarget {
    pub(super) fn parse(redirect_uri: &str) -> Result<Self, AuthError> {
        let mut base = Url::parse(redirect_uri)?;
        if base.scheme() != "http" {
            return Err(AuthError::InvalidRedirectUri(
                "loopback redirect uri must use http scheme".to_string(),
            ));
        }

        let host = match base.host() {
            Some(Host::Domain(domain)) if domain.eq_ignore_ascii_case("localhost") => {
                domain.to_string()
            }
            Some(Host::Ipv4(addr)) if IpAddr::from(addr).is_loopback() => addr.to_string(),
            Some(Host::Ipv6(addr)) if IpAddr::from(addr).is_loopback() => addr.to_string(),
            Some(other) => {
                return Err(AuthError::InvalidRedirectUri(format!(
                    "redirect host {other} is not a loopback address"
                )));
            }
            None => {
                return Err(AuthError::InvalidRedirectUri(
                    "redirect uri is missing host".to_string(),
                ));
            }
        };

        let port = base.port_or_known_default().ok_or_else(|| {
            AuthError::InvalidRedirectUri("redirect uri is missing port".to_string())
        })?;

        base.set_query(None);
        base.set_fragment(None);
        Ok(Self { base, host, port })
    }

    pub(super) fn path(&self) -> &str {
        self.base.path()
    }

    /// Rebuilds the full redirect URL the browser requested.
    pub(super) fn callback_url(&self, query: &str) -> String {
        let mut url = self.base.clone();
        if !query.is_empty() {
            url.set_query(Some(query));
        }
        url.into()
    }
}
