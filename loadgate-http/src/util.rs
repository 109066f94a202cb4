use super::{Error, Result};

pub(super) fn has_header(headers: &[(String, String)], name: &str) -> bool {
    headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
}

pub(super) fn host_header_value(parsed: &url::Url) -> Option<String> {
    let host = parsed.host_str()?;
    match parsed.port() {
        Some(port) => Some(format!("{host}:{port}")),
        None => Some(host.to_string()),
    }
}

/// Parses `raw` both as a [`url::Url`] and as a [`hyper::Uri`], rejecting non-HTTP schemes.
pub(super) fn parse_url(raw: &str) -> Result<(url::Url, hyper::Uri)> {
    let parsed = url::Url::parse(raw).map_err(|_| Error::InvalidUrl(raw.to_string()))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(Error::UnsupportedScheme(raw.to_string()));
    }
    let uri: hyper::Uri = raw
        .parse()
        .map_err(|_| Error::InvalidUrl(raw.to_string()))?;
    Ok((parsed, uri))
}
