use url::Url;

use crate::AuthError;

/// Host capability that shows the authorization page to the user.
///
/// Implementations only need to get the URL in front of the user; the
/// redirect comes back later through [`RedirectIngress`](crate::RedirectIngress).
pub trait UserAgent: Send + Sync {
    fn present(&self, url: &Url) -> Result<(), AuthError>;
}

impl<F> UserAgent for F
where
    F: Fn(&Url) -> Result<(), AuthError> + Send + Sync,
{
    fn present(&self, url: &Url) -> Result<(), AuthError> {
        self(url)
    }
}

/// Opens the authorization page in the operating system's default browser.
#[cfg(feature = "browser")]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

#[cfg(feature = "browser")]
impl UserAgent for SystemBrowser {
    fn present(&self, url: &Url) -> Result<(), AuthError> {
        webbrowser::open(url.as_str()).map_err(|err| AuthError::Launch {
            message: err.to_string(),
        })
    }
}
