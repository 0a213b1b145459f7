#![allow(dead_code)]

use std::io::{Cursor, Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba};

pub fn create_png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        let r = (x % 255) as u8;
        let g = (y % 255) as u8;
        let b = ((x + y) % 255) as u8;
        Rgba([r, g, b, 255])
    });

    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut cursor, ImageFormat::Png)
        .expect("failed to encode test image");
    cursor.into_inner()
}

/// 对每个连接返回同一份响应，并统计命中次数。
pub struct TestServer {
    pub port: u16,
    hits: Arc<AtomicUsize>,
}

impl TestServer {
    pub fn serve(content_type: &str, body: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server failed");
        let port = listener.local_addr().expect("read local addr failed").port();
        let hits = Arc::new(AtomicUsize::new(0));

        let mut response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            content_type,
            body.len()
        )
        .into_bytes();
        response.extend_from_slice(&body);

        let counter = Arc::clone(&hits);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else {
                    continue;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut req_buf = [0u8; 2048];
                let _ = stream.read(&mut req_buf);
                let _ = stream.write_all(&response);
                let _ = stream.flush();
            }
        });

        Self { port, hits }
    }

    pub fn png(width: u32, height: u32) -> Self {
        Self::serve("image/png", create_png_bytes(width, height))
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}/{}", self.port, path)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}
