use chrono::{DateTime, TimeZone, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::github::api::{ApiError, ApiResult};

/// Lazily walks a paginated GitHub collection, one page per poll.
pub struct Paginator {
    client: Client,
    per_page: u32,
}

impl Paginator {
    pub fn new(client: Client, per_page: u32) -> Self {
        Self { client, per_page }
    }

    /// Items of every page, decoded one by one. An item that fails to decode
    /// is yielded as `ApiError::MalformedItem` and the walk continues.
    pub fn items<T>(self, base_url: String) -> BoxStream<'static, ApiResult<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let pages = stream::try_unfold(Some(1u32), move |page| {
            let client = self.client.clone();
            let base_url = base_url.clone();
            let per_page = self.per_page;
            async move {
                let Some(page) = page else {
                    return Ok::<_, ApiError>(None);
                };
                let (items, has_next) = fetch_page(&client, &base_url, per_page, page).await?;
                let next = (has_next && items.len() >= per_page as usize).then_some(page + 1);
                Ok(Some((items, next)))
            }
        });

        pages
            .map_ok(|items| stream::iter(items.into_iter().map(decode_item::<T>)))
            .try_flatten()
            .boxed()
    }
}

async fn fetch_page(
    client: &Client,
    base_url: &str,
    per_page: u32,
    page: u32,
) -> ApiResult<(Vec<serde_json::Value>, bool)> {
    let separator = if base_url.contains('?') { "&" } else { "?" };
    let url = format!("{}{}per_page={}&page={}", base_url, separator, per_page, page);

    tracing::debug!("Fetching: {}", url);
    let response = check_response(client.get(&url).send().await?).await?;

    // Check for next page in Link header
    let has_next = response
        .headers()
        .get("link")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("rel=\"next\""))
        .unwrap_or(false);

    let items: Vec<serde_json::Value> = response
        .json()
        .await
        .map_err(|e| ApiError::Http {
            status: 200,
            message: format!("page {} is not a JSON array: {}", page, e),
        })?;

    Ok((items, has_next))
}

fn decode_item<T: DeserializeOwned>(value: serde_json::Value) -> ApiResult<T> {
    serde_json::from_value(value).map_err(|e| ApiError::MalformedItem(e.to_string()))
}

/// Maps a non-success response onto the `ApiError` taxonomy.
pub async fn check_response(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let headers = response.headers();
    let remaining = header_u64(headers, "x-ratelimit-remaining");
    let reset_at = header_u64(headers, "x-ratelimit-reset").and_then(epoch_to_utc);
    let retry_after = header_u64(headers, "retry-after");
    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();

    Err(classify_status(status, remaining, reset_at, retry_after, &url, body))
}

fn classify_status(
    status: StatusCode,
    remaining: Option<u64>,
    reset_at: Option<DateTime<Utc>>,
    retry_after: Option<u64>,
    url: &str,
    body: String,
) -> ApiError {
    match status {
        StatusCode::UNAUTHORIZED => ApiError::Unauthorized(body),
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS
            if remaining == Some(0) || retry_after.is_some() =>
        {
            let reset_at = reset_at.or_else(|| {
                retry_after.map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64))
            });
            ApiError::RateLimited { reset_at }
        }
        StatusCode::FORBIDDEN => ApiError::Unauthorized(body),
        StatusCode::NOT_FOUND => ApiError::NotFound(url.to_string()),
        StatusCode::CONFLICT if body.contains("Git Repository is empty") => {
            ApiError::EmptyRepository
        }
        _ => ApiError::Http {
            status: status.as_u16(),
            message: body,
        },
    }
}

fn header_u64(headers: &reqwest::header::HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

pub(crate) fn epoch_to_utc(secs: u64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs as i64, 0).single()
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            ApiError::Connection(err.to_string())
        } else if err.is_decode() {
            ApiError::MalformedItem(err.to_string())
        } else {
            ApiError::Http {
                status: err.status().map(|s| s.as_u16()).unwrap_or(0),
                message: err.to_string(),
            }
        }
    }
}
