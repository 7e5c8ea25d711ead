use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::connect_info::MockConnectInfo,
    http::{Method, Request},
    response::Response,
    Router,
};
use http_body_util::BodyExt;

use super::default_config;
use localdrop::common::TransferSettings;
use localdrop::receive::{ReceiveAppState, UploadStore};
use localdrop::server::routes;

pub const BOUNDARY: &str = "----WebKitFormBoundary7MA4YWxkTrZu0gW";

//===========
// App Factory
//===========
pub fn create_upload_test_app(upload_dir: PathBuf) -> (Router, ReceiveAppState) {
    create_upload_test_app_with(upload_dir, default_config(), loopback_peer())
}

pub fn create_upload_test_app_with(
    upload_dir: PathBuf,
    config: TransferSettings,
    peer: SocketAddr,
) -> (Router, ReceiveAppState) {
    let store = Arc::new(UploadStore::new(upload_dir));
    let state = ReceiveAppState::new(store, config);
    let app = routes::create_upload_router(&state).layer(MockConnectInfo(peer));
    (app, state)
}

pub fn loopback_peer() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 50000))
}

pub fn lan_peer() -> SocketAddr {
    SocketAddr::from(([192, 168, 1, 40], 50000))
}

//=================
// Request Builders
//=================

/// One multipart part. `file_name: None` makes a plain form field.
pub struct Part<'a> {
    pub field: &'a str,
    pub file_name: Option<&'a str>,
    pub data: &'a [u8],
}

pub fn file_part<'a>(file_name: &'a str, data: &'a [u8]) -> Part<'a> {
    Part {
        field: "files",
        file_name: Some(file_name),
        data,
    }
}

pub fn text_part<'a>(field: &'a str, value: &'a str) -> Part<'a> {
    Part {
        field,
        file_name: None,
        data: value.as_bytes(),
    }
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();

    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part.file_name {
            Some(file_name) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                        part.field, file_name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
            }
            None => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                        part.field
                    )
                    .as_bytes(),
                );
            }
        }
        body.extend_from_slice(part.data);
        body.extend_from_slice(b"\r\n");
    }

    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn build_upload_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("Failed to build upload request")
}

pub fn build_get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("Failed to build request")
}

/// Raw HTTP/1.1 request head for a multipart upload of `content_length` bytes.
pub fn raw_upload_head(content_length: usize) -> String {
    format!(
        "POST /upload HTTP/1.1\r\nHost: localhost\r\nContent-Type: multipart/form-data; boundary={BOUNDARY}\r\nContent-Length: {content_length}\r\n\r\n"
    )
}

//==================
// Response Helpers
//==================
pub async fn response_json(response: Response) -> serde_json::Value {
    let body = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    serde_json::from_slice(&body).expect("Response is not JSON")
}

pub async fn response_text(response: Response) -> String {
    let body = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    String::from_utf8(body.to_vec()).expect("Response is not UTF-8")
}
