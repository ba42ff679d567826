//! Blocking HTTP front end.
//!
//! A fixed pool of worker threads shares one listener; each request is read
//! fully, dispatched through [`App::handle`], and answered with JSON plus
//! permissive CORS headers for the browser UI.
mod multipart;
mod routes;

pub use routes::{ApiRequest, ApiResponse, App};

use crate::config::Config;
use crate::services::Services;
use anyhow::{anyhow, Result};
use std::io::Read;

/// Uploads larger than this are rejected before dispatch.
const MAX_BODY_BYTES: u64 = 64 * 1024 * 1024;

const CORS_HEADERS: [(&str, &str); 3] = [
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "GET, POST, OPTIONS"),
    ("Access-Control-Allow-Headers", "Content-Type, Authorization"),
];

pub fn serve(config: &Config, services: Services) -> Result<()> {
    let addr = format!("0.0.0.0:{}", config.port);
    let server = tiny_http::Server::http(&addr).map_err(|err| anyhow!("bind {addr}: {err}"))?;
    let app = App::new(services);
    let workers = config.workers.max(1);
    tracing::info!(%addr, workers, "listening");

    std::thread::scope(|scope| {
        for worker in 0..workers {
            let server = &server;
            let app = &app;
            scope.spawn(move || {
                while let Ok(request) = server.recv() {
                    if let Err(err) = respond(app, request) {
                        tracing::warn!(worker, error = %format!("{err:#}"), "failed to answer request");
                    }
                }
            });
        }
    });
    Ok(())
}

fn respond(app: &App, mut request: tiny_http::Request) -> Result<()> {
    let api_request = match read_request(&mut request, MAX_BODY_BYTES) {
        Ok(api_request) => api_request,
        Err(response) => return send(request, &response),
    };
    let started = std::time::Instant::now();
    let response = app.handle(&api_request);
    tracing::info!(
        method = %api_request.method,
        path = %api_request.path,
        status = response.status,
        duration_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    send(request, &response)
}

/// Buffer the request; an oversized body is answered with 413.
fn read_request(request: &mut tiny_http::Request, limit: u64) -> Result<ApiRequest, ApiResponse> {
    let too_large = || ApiResponse::error(413, format!("request body exceeds {limit} bytes"));
    if request.body_length().is_some_and(|len| len as u64 > limit) {
        return Err(too_large());
    }
    let content_type = request
        .headers()
        .iter()
        .find(|header| header.field.equiv("Content-Type"))
        .map(|header| header.value.as_str().to_string());
    let mut body = Vec::new();
    request
        .as_reader()
        .take(limit + 1)
        .read_to_end(&mut body)
        .map_err(|err| ApiResponse::error(400, format!("read request body: {err}")))?;
    if body.len() as u64 > limit {
        return Err(too_large());
    }
    let path = request.url().split('?').next().unwrap_or_default().to_string();
    Ok(ApiRequest {
        method: request.method().as_str().to_string(),
        path,
        content_type,
        body,
    })
}

fn send(request: tiny_http::Request, response: &ApiResponse) -> Result<()> {
    let body = serde_json::to_vec(&response.body)?;
    let mut reply = tiny_http::Response::from_data(body).with_status_code(response.status);
    reply.add_header(header("Content-Type", "application/json")?);
    for (name, value) in CORS_HEADERS {
        reply.add_header(header(name, value)?);
    }
    request.respond(reply)?;
    Ok(())
}

fn header(name: &str, value: &str) -> Result<tiny_http::Header> {
    tiny_http::Header::from_bytes(name.as_bytes(), value.as_bytes())
        .map_err(|()| anyhow!("invalid header {name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(body: &'static str) -> tiny_http::Request {
        tiny_http::TestRequest::new()
            .with_method(tiny_http::Method::Post)
            .with_path("/tools/gcs.write?trace=1")
            .with_header(header("Content-Type", "application/json").unwrap())
            .with_body(body)
            .into()
    }

    #[test]
    fn oversized_body_is_payload_too_large() {
        let mut request = post("{\"path\": \"a\", \"content_b64\": \"eA==\"}");
        let response = read_request(&mut request, 8).unwrap_err();
        assert_eq!(response.status, 413);
    }

    #[test]
    fn request_is_buffered_with_path_and_content_type() {
        let mut request = post("{}");
        let api_request = read_request(&mut request, MAX_BODY_BYTES).unwrap();
        assert_eq!(api_request.method, "POST");
        assert_eq!(api_request.path, "/tools/gcs.write");
        assert_eq!(api_request.content_type.as_deref(), Some("application/json"));
        assert_eq!(api_request.body, b"{}");
    }

    #[test]
    fn cors_headers_are_valid() {
        for (name, value) in CORS_HEADERS {
            let built = header(name, value).unwrap();
            assert_eq!(built.value.as_str(), value);
        }
    }
}
