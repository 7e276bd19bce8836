use std::borrow::Cow;

/// A request whose destination can be inspected before it is sent.
pub trait RequestTarget {
    /// The full URL, used for prefix matching and logging.
    fn url(&self) -> Cow<'_, str>;

    /// `scheme://host[:port]`, the key used for per-host tracking.
    fn origin(&self) -> String;
}

/// A response whose HTTP status can be inspected after it arrives.
pub trait ResponseStatus {
    fn status_code(&self) -> u16;
}

impl RequestTarget for reqwest::Request {
    fn url(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.url().as_str())
    }

    fn origin(&self) -> String {
        url_origin(self.url())
    }
}

impl RequestTarget for reqwest::Url {
    fn url(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.as_str())
    }

    fn origin(&self) -> String {
        url_origin(self)
    }
}

impl<B> RequestTarget for http::Request<B> {
    fn url(&self) -> Cow<'_, str> {
        Cow::Owned(self.uri().to_string())
    }

    fn origin(&self) -> String {
        let uri = self.uri();
        match (uri.scheme_str(), uri.authority()) {
            (Some(scheme), Some(authority)) => {
                let host = authority.host().to_ascii_lowercase();
                match authority.port_u16() {
                    Some(port) => format!("{scheme}://{host}:{port}"),
                    None => format!("{scheme}://{host}"),
                }
            }
            // Relative URIs, e.g. requests built for a server-side stack
            _ => String::new(),
        }
    }
}

impl ResponseStatus for reqwest::Response {
    fn status_code(&self) -> u16 {
        self.status().as_u16()
    }
}

impl<B> ResponseStatus for http::Response<B> {
    fn status_code(&self) -> u16 {
        self.status().as_u16()
    }
}

/// Builds the origin from scheme and host rather than `Url::origin`, which
/// collapses every non-special scheme into the opaque `null` origin.
fn url_origin(url: &reqwest::Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}://{host}:{port}", url.scheme()),
        None => format!("{}://{host}", url.scheme()),
    }
}
