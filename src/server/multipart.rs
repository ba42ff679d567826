//! `multipart/form-data` reading for document uploads.
//!
//! The request body is already buffered by the blocking listener, so it is
//! fed to `multer` as a one-chunk stream and driven to completion inline.
use anyhow::{Context, Result};
use futures::executor::block_on;
use futures::stream;
use std::convert::Infallible;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormPart {
    pub name: String,
    pub filename: Option<String>,
    pub data: Vec<u8>,
}

/// Boundary parameter of a `multipart/form-data` content type.
pub fn boundary(content_type: &str) -> Option<String> {
    multer::parse_boundary(content_type).ok()
}

pub fn parse(body: &[u8], boundary: &str) -> Result<Vec<FormPart>> {
    let chunk = body.to_vec();
    let body = stream::once(async move { Ok::<_, Infallible>(chunk) });
    let mut multipart = multer::Multipart::new(body, boundary);
    block_on(async move {
        let mut parts = Vec::new();
        while let Some(field) = multipart.next_field().await.context("read multipart field")? {
            let name = field.name().unwrap_or_default().to_string();
            let filename = field.file_name().map(str::to_string);
            let data = field
                .bytes()
                .await
                .with_context(|| format!("read multipart field {name:?}"))?;
            parts.push(FormPart {
                name,
                filename,
                data: data.to_vec(),
            });
        }
        Ok(parts)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body() -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(b"--XyZ\r\n");
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"files\"; filename=\"risk plan.pdf\"\r\n");
        body.extend_from_slice(b"Content-Type: application/pdf\r\n\r\n");
        body.extend_from_slice(b"%PDF-1.7\r\nbinary\x00data");
        body.extend_from_slice(b"\r\n--XyZ\r\n");
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"note\"\r\n\r\n");
        body.extend_from_slice(b"hello");
        body.extend_from_slice(b"\r\n--XyZ--\r\n");
        body
    }

    #[test]
    fn boundary_from_content_type() {
        assert_eq!(
            boundary("multipart/form-data; boundary=----WebKitFormBoundary7MA4YWxk").as_deref(),
            Some("----WebKitFormBoundary7MA4YWxk")
        );
        assert_eq!(boundary("application/json"), None);
        assert_eq!(boundary("multipart/form-data"), None);
    }

    #[test]
    fn parses_file_and_field_parts() {
        let parts = parse(&body(), "XyZ").unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].name, "files");
        assert_eq!(parts[0].filename.as_deref(), Some("risk plan.pdf"));
        assert_eq!(parts[0].data, b"%PDF-1.7\r\nbinary\x00data");
        assert_eq!(parts[1].name, "note");
        assert_eq!(parts[1].filename, None);
        assert_eq!(parts[1].data, b"hello");
    }

    #[test]
    fn boundary_text_inside_content_is_data() {
        let body = b"--B\r\nContent-Disposition: form-data; name=\"files\"; filename=\"a.txt\"\r\n\r\nx--By\r\n--B--\r\n";
        let parts = parse(body, "B").unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].filename.as_deref(), Some("a.txt"));
        assert_eq!(parts[0].data, b"x--By");
    }

    #[test]
    fn truncated_body_is_rejected() {
        assert!(parse(
            b"--XyZ\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nabc",
            "XyZ"
        )
        .is_err());
    }
}
