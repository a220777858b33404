use std::thread;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::config::{HttpSettings, RetryPolicy};
use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Globi,
    Ala,
    Wikipedia,
}

impl Service {
    pub fn http_error(self, message: String) -> PipelineError {
        match self {
            Service::Globi => PipelineError::GlobiHttp(message),
            Service::Ala => PipelineError::AlaHttp(message),
            Service::Wikipedia => PipelineError::WikipediaHttp(message),
        }
    }

    pub fn status_error(self, status: u16, message: String) -> PipelineError {
        match self {
            Service::Globi => PipelineError::GlobiStatus { status, message },
            Service::Ala => PipelineError::AlaStatus { status, message },
            Service::Wikipedia => PipelineError::WikipediaStatus { status, message },
        }
    }

    fn label(self) -> &'static str {
        match self {
            Service::Globi => "GloBI",
            Service::Ala => "ALA",
            Service::Wikipedia => "Wikipedia",
        }
    }
}

pub fn build_client(settings: &HttpSettings, service: Service) -> Result<Client, PipelineError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&settings.user_agent)
            .map_err(|err| PipelineError::InvalidConfig(format!("user agent: {err}")))?,
    );
    headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/csv;q=0.9, */*;q=0.8"));
    Client::builder()
        .default_headers(headers)
        .timeout(settings.timeout)
        .build()
        .map_err(|err| service.http_error(err.to_string()))
}

/// Sends the request, retrying throttling, server errors and connection
/// failures up to `policy.attempts` times in total with linear backoff.
pub fn send_with_retries<F>(
    service: Service,
    policy: RetryPolicy,
    mut make_req: F,
) -> Result<Response, PipelineError>
where
    F: FnMut() -> RequestBuilder,
{
    let mut attempt = 1u32;
    loop {
        match make_req().send() {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if attempt < policy.attempts && is_retryable_status(status) {
                    debug!(service = service.label(), status, attempt, "retrying request");
                    thread::sleep(policy.delay_after(attempt));
                    attempt += 1;
                    continue;
                }
                return Ok(resp);
            }
            Err(err) => {
                if attempt < policy.attempts && is_retryable_error(&err) {
                    debug!(service = service.label(), attempt, "retrying request: {err}");
                    thread::sleep(policy.delay_after(attempt));
                    attempt += 1;
                    continue;
                }
                return Err(service.http_error(err.to_string()));
            }
        }
    }
}

pub fn handle_status(service: Service, response: Response) -> Result<Response, PipelineError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response
        .text()
        .map(|body| body.chars().take(200).collect::<String>())
        .unwrap_or_else(|_| format!("{} request failed", service.label()));
    Err(service.status_error(status, message))
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
