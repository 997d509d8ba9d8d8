//! HTTP transport seam.
//!
//! `ServiceClient` only needs "GET this URL with this token". Keeping that behind
//! a trait lets tests script responses without a network.

use crate::vault::ApiToken;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;

/// Raw response handed back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Parsed `Retry-After` header, if present
    pub retry_after: Option<Duration>,
    pub body: String,
}

/// Failure to get any response at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Other(String),
}

pub trait Transport: Send + Sync {
    fn get(
        &self,
        url: &str,
        query: &[(&str, String)],
        token: &ApiToken,
    ) -> Result<HttpResponse, TransportError>;
}

/// Blocking reqwest transport (rustls).
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("taskport/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;

        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn get(
        &self,
        url: &str,
        query: &[(&str, String)],
        token: &ApiToken,
    ) -> Result<HttpResponse, TransportError> {
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .query(query)
            .bearer_auth(token.expose())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .map_err(classify)?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().map_err(classify)?;

        Ok(HttpResponse {
            status,
            retry_after,
            body,
        })
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    // reqwest errors can embed the URL but never headers, so no token leaks here
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connect(err.without_url().to_string())
    } else {
        TransportError::Other(err.without_url().to_string())
    }
}

/// `Retry-After` as delta seconds (fractions accepted) or an HTTP date.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    parse_retry_after_at(value, Utc::now())
}

/// `parse_retry_after` relative to `now`. A date in the past means no wait.
pub fn parse_retry_after_at(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<f64>() {
        if secs < 0.0 {
            return None;
        }
        return Duration::try_from_secs_f64(secs).ok();
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_after(" 1.5 "), Some(Duration::from_millis(1500)));
        assert_eq!(parse_retry_after("-1"), None);
        assert_eq!(parse_retry_after("NaN"), None);
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[test]
    fn test_retry_after_out_of_range_is_ignored() {
        assert_eq!(parse_retry_after("1e300"), None);
        assert_eq!(parse_retry_after("inf"), None);
    }

    #[test]
    fn test_retry_after_http_date() {
        let now = Utc.with_ymd_and_hms(2099, 10, 21, 7, 27, 30).unwrap();
        assert_eq!(
            parse_retry_after_at("Wed, 21 Oct 2099 07:28:00 GMT", now),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            parse_retry_after_at("Wed, 21 Oct 2015 07:28:00 GMT", now),
            Some(Duration::ZERO)
        );
    }
}
