//! HTTP caching surface for dashboard payloads.
//!
//! Builds `Cache-Control`, `ETag`, `Last-Modified` and CDN tag headers from a
//! [`CachePolicy`], and answers conditional requests with `304 Not Modified`
//! before any body is serialized.

use std::time::Duration;

use axum::{
    Json,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use time::{
    OffsetDateTime, PrimitiveDateTime, format_description::BorrowedFormatItem,
    macros::format_description,
};
use tracing::debug;

use crate::cache::{entity_tag, run_tag};
use crate::domain::entities::{DashboardBundle, PrecomputedRecord};
use crate::domain::etag::bundle_etag;

/// IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
const HTTP_DATE: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

const SURROGATE_KEY: HeaderName = HeaderName::from_static("surrogate-key");
const CACHE_TAG: HeaderName = HeaderName::from_static("cache-tag");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

/// Caching metadata attached to one served payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CachePolicy {
    pub visibility: Visibility,
    pub max_age: Duration,
    pub stale_while_revalidate: Duration,
    /// Unquoted strong validator.
    pub etag: String,
    pub last_modified: Option<OffsetDateTime>,
    /// Edge-cache tags, emitted as `Surrogate-Key` and `Cache-Tag`.
    pub tags: Vec<String>,
}

impl CachePolicy {
    pub fn for_record(
        record: &PrecomputedRecord,
        visibility: Visibility,
        max_age: Duration,
        stale_while_revalidate: Duration,
    ) -> Self {
        Self {
            visibility,
            max_age,
            stale_while_revalidate,
            etag: record.etag.clone(),
            last_modified: Some(record.created_at),
            tags: vec![entity_tag(record.entity_id), run_tag(record.run_id)],
        }
    }

    pub fn for_bundle(
        bundle: &DashboardBundle,
        visibility: Visibility,
        max_age: Duration,
        stale_while_revalidate: Duration,
    ) -> Self {
        Self {
            visibility,
            max_age,
            stale_while_revalidate,
            etag: bundle_etag(&bundle.records),
            last_modified: bundle.last_modified(),
            tags: vec![entity_tag(bundle.entity_id), run_tag(bundle.run_id)],
        }
    }

    pub fn cache_control(&self) -> String {
        format!(
            "{}, max-age={}, stale-while-revalidate={}",
            self.visibility.as_str(),
            self.max_age.as_secs(),
            self.stale_while_revalidate.as_secs()
        )
    }

    pub fn quoted_etag(&self) -> String {
        format!("\"{}\"", self.etag)
    }

    /// Response headers describing this policy.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&self.cache_control()) {
            headers.insert(header::CACHE_CONTROL, value);
        }
        if let Ok(value) = HeaderValue::from_str(&self.quoted_etag()) {
            headers.insert(header::ETAG, value);
        }
        if let Some(value) = self
            .last_modified
            .and_then(format_http_date)
            .and_then(|date| HeaderValue::from_str(&date).ok())
        {
            headers.insert(header::LAST_MODIFIED, value);
        }
        if !self.tags.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&self.tags.join(" ")) {
                headers.insert(SURROGATE_KEY, value);
            }
            if let Ok(value) = HeaderValue::from_str(&self.tags.join(",")) {
                headers.insert(CACHE_TAG, value);
            }
        }
        headers
    }

    /// Whether a request carrying `request` headers already has this version.
    ///
    /// `If-None-Match` takes precedence: when present, `If-Modified-Since`
    /// is ignored.
    pub fn is_not_modified(&self, request: &HeaderMap) -> bool {
        if let Some(if_none_match) = request.get(header::IF_NONE_MATCH) {
            return if_none_match
                .to_str()
                .map(|value| etag_list_matches(value, &self.etag))
                .unwrap_or(false);
        }

        let Some(last_modified) = self.last_modified else {
            return false;
        };
        request
            .get(header::IF_MODIFIED_SINCE)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_http_date)
            .is_some_and(|since| last_modified.unix_timestamp() <= since.unix_timestamp())
    }

    /// `304 Not Modified` carrying the validator headers, if applicable.
    pub fn evaluate(&self, request: &HeaderMap) -> Option<Response> {
        if !self.is_not_modified(request) {
            return None;
        }
        debug!(etag = %self.etag, "Conditional request satisfied");
        Some((StatusCode::NOT_MODIFIED, self.headers()).into_response())
    }

    /// Serve `value` as JSON, or `304` when the client copy is current.
    pub fn respond<T: Serialize>(&self, request: &HeaderMap, value: &T) -> Response {
        if let Some(not_modified) = self.evaluate(request) {
            return not_modified;
        }
        (StatusCode::OK, self.headers(), Json(value)).into_response()
    }
}

fn etag_list_matches(header_value: &str, etag: &str) -> bool {
    header_value.split(',').map(str::trim).any(|candidate| {
        if candidate == "*" {
            return true;
        }
        let candidate = candidate.strip_prefix("W/").unwrap_or(candidate);
        candidate.trim_matches('"') == etag
    })
}

pub fn format_http_date(value: OffsetDateTime) -> Option<String> {
    value
        .to_offset(time::UtcOffset::UTC)
        .format(HTTP_DATE)
        .ok()
}

pub fn parse_http_date(value: &str) -> Option<OffsetDateTime> {
    PrimitiveDateTime::parse(value.trim(), HTTP_DATE)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}
