//! Helpers shared by the integration test binaries.

#![allow(dead_code)]

pub mod socket_guard;

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// A body that passes PDF validation: magic bytes padded to `len`.
pub fn pdf_body(len: usize) -> Vec<u8> {
    let mut body = b"%PDF-1.7\n".to_vec();
    body.resize(len, b'0');
    body
}

/// An HTML error page padded past the minimum PDF size.
pub fn html_error_page(len: usize) -> Vec<u8> {
    let mut body = b"<!DOCTYPE html><html><body><h1>Access denied</h1>".to_vec();
    body.resize(len, b' ');
    body.extend_from_slice(b"</body></html>");
    body
}

/// A long enough abstract for the default minimum length.
pub const LOREM: &str = "Lorem ipsum dolor sit amet, consectetur adipiscing elit, sed do eiusmod tempor incididunt ut labore.";

/// Atom feed with one entry, as returned by the preprint repository search.
pub fn atom_feed(title: &str, summary: &str, pdf_href: Option<&str>) -> String {
    let pdf_link = pdf_href
        .map(|href| format!(r#"<link title="pdf" href="{href}" rel="related" type="application/pdf"/>"#))
        .unwrap_or_default();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>arXiv Query</title>
  <id>http://arxiv.org/api/query</id>
  <updated>2024-01-01T00:00:00Z</updated>
  <entry>
    <id>http://arxiv.org/abs/2101.00001v1</id>
    <updated>2021-01-01T00:00:00Z</updated>
    <title>{title}</title>
    <summary>{summary}</summary>
    <link href="http://arxiv.org/abs/2101.00001v1" rel="alternate" type="text/html"/>
    {pdf_link}
  </entry>
</feed>"#
    )
}

/// Serves PDF headers promising 100000 bytes, writes 20000 of them, then
/// holds every connection open. Returns the PDF URL, or `None` where
/// sockets cannot be bound.
pub async fn stalled_pdf_server() -> Option<String> {
    if socket_guard::should_skip_socket_bound_test() {
        return None;
    }
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = [0u8; 2048];
                let _ = socket.read(&mut request).await;
                let head = "HTTP/1.1 200 OK\r\ncontent-type: application/pdf\r\ncontent-length: 100000\r\n\r\n";
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&pdf_body(20_000)).await;
                let _ = socket.flush().await;
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
        }
    });
    Some(format!("http://{addr}/stalled.pdf"))
}

/// Waits until some file in `dir` holds bytes.
pub async fn wait_for_partial_file(dir: &Path) {
    for _ in 0..400 {
        let written = std::fs::read_dir(dir)
            .into_iter()
            .flatten()
            .flatten()
            .any(|entry| entry.metadata().is_ok_and(|m| m.len() > 0));
        if written {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("no partial file appeared in {}", dir.display());
}
