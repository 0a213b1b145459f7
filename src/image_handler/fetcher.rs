//! # 数据流获取模块
//!
//! ## 设计思路
//!
//! 把 URL 变成一个可重复读取的字节流 `ByteStream`，并在"尽可能早"的阶段拒绝无效输入。
//! 原始响应经注入的 `ResponseCache` 缓存，同一 URL 的后续请求不再访问网络。
//!
//! ## 实现思路
//!
//! - `data:image/*;base64,`：本地解码，不经过缓存。
//! - HTTP/HTTPS：协议 + 主机字面量检查 → 查缓存 → DNS 安全检查 → 手动跟随重定向的流式下载。
//! - 下载阶段只看 `Content-Type`，字节签名留给解码阶段识别。
//! - 缓存读写失败只记录警告，降级为直接走网络 / 不缓存。

use base64::{Engine as _, engine::general_purpose};
use bytes::{Bytes, BytesMut};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::lookup_host;

use super::source::{ByteStream, StreamOrigin};
use super::{ImageConfig, ImageError};
use crate::response_cache::{CachedResponse, ResponseCache};

const BUFFER_INITIAL_CAPACITY: usize = 16 * 1024;
const DATA_URL_PREFIX: &str = "data:";
const BASE64_MARKER: &str = ";base64,";

/// 一次成功的网络下载。
#[derive(Debug)]
struct Download {
    body: Bytes,
    content_type: Option<String>,
    cacheable: bool,
}

/// URL → `ByteStream`。
pub struct StreamFetcher {
    cache: Option<Arc<dyn ResponseCache>>,
}

impl StreamFetcher {
    pub fn new(cache: Option<Arc<dyn ResponseCache>>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> Option<&Arc<dyn ResponseCache>> {
        self.cache.as_ref()
    }

    /// 打开 URL 对应的字节流。
    ///
    /// 返回的流可通过 [`ByteStream::reopen`] 得到第二个独立游标，
    /// 边界探测与正式解码共用同一份字节，不会重复下载。
    pub async fn open(&self, url: &str, config: &ImageConfig) -> Result<ByteStream, ImageError> {
        let trimmed = url.trim();
        if Self::is_data_url(trimmed) {
            log::debug!("📝 解析内联图片数据");
            let (body, mime) = Self::parse_data_url(trimmed, config.max_file_size)?;
            return Ok(ByteStream::new(body, StreamOrigin::Inline).with_content_type(Some(mime)));
        }

        let parsed = reqwest::Url::parse(trimmed)
            .map_err(|e| ImageError::InvalidUrl(format!("URL 格式错误：{}", e)))?;
        Self::check_url_literal(&parsed, config)?;

        let key = parsed.to_string();
        if let Some(hit) = self.cached_response(&key) {
            log::debug!("♻️ 命中响应缓存 - URL: {}", Self::redact_url_for_log(&key));
            return Ok(ByteStream::new(hit.body, StreamOrigin::Cache).with_content_type(hit.content_type));
        }

        log::info!("🌐 开始下载图片 - URL: {}", Self::redact_url_for_log(&key));
        Self::check_url_resolution(&parsed, config).await?;
        let download = Self::download(parsed, config).await?;

        if download.cacheable {
            self.store_response(&key, &download);
        } else {
            log::debug!("响应声明 no-store，跳过缓存");
        }

        Ok(ByteStream::new(download.body, StreamOrigin::Network).with_content_type(download.content_type))
    }

    /// 作用域形式：打开流、交给 `f` 使用，返回后流即被释放。
    pub async fn read_stream<T, F>(&self, url: &str, config: &ImageConfig, f: F) -> Result<T, ImageError>
    where
        F: FnOnce(&mut ByteStream) -> T,
    {
        let mut stream = self.open(url, config).await?;
        Ok(f(&mut stream))
    }

    fn cached_response(&self, key: &str) -> Option<CachedResponse> {
        let cache = self.cache.as_ref()?;
        match cache.get(key) {
            Ok(hit) => hit,
            Err(e) => {
                log::warn!("⚠️ 读取响应缓存失败，改走网络：{}", e);
                None
            }
        }
    }

    fn store_response(&self, key: &str, download: &Download) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        let response = CachedResponse {
            body: download.body.clone(),
            content_type: download.content_type.clone(),
        };
        if let Err(e) = cache.put(key, &response) {
            log::warn!("⚠️ 写入响应缓存失败：{}", e);
        }
    }

    /// 手动跟随重定向的流式下载，每一跳都重新做安全检查。
    async fn download(url: reqwest::Url, config: &ImageConfig) -> Result<Download, ImageError> {
        let mut current_url = url;

        for redirect_count in 0..=config.max_redirects {
            let client = Self::build_request_client(&current_url, config).await?;
            let referer = format!(
                "{}://{}/",
                current_url.scheme(),
                current_url.host_str().unwrap_or("")
            );

            let response = client
                .get(current_url.clone())
                .header(reqwest::header::ACCEPT, "image/avif,image/webp,image/apng,image/*,*/*;q=0.8")
                .header(reqwest::header::REFERER, referer)
                .send()
                .await
                .map_err(|e| Self::map_reqwest_error(e, current_url.as_str(), config))?;

            let status = response.status();
            if status.is_redirection() {
                if redirect_count >= config.max_redirects {
                    return Err(ImageError::Network(format!(
                        "重定向次数超过限制（{}）",
                        config.max_redirects
                    )));
                }

                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .ok_or_else(|| ImageError::Network("重定向响应缺少 Location 头".to_string()))?
                    .to_str()
                    .map_err(|e| ImageError::InvalidUrl(format!("重定向地址无效：{}", e)))?;

                let next_url = current_url
                    .join(location)
                    .map_err(|e| ImageError::InvalidUrl(format!("重定向 URL 解析失败：{}", e)))?;

                Self::check_url_literal(&next_url, config)?;
                Self::check_url_resolution(&next_url, config).await?;

                log::debug!("↪️ 跳转到: {}", Self::redact_url_for_log(next_url.as_str()));
                current_url = next_url;
                continue;
            }

            if !status.is_success() {
                return Err(ImageError::HttpStatus {
                    status: status.as_u16(),
                    message: Self::status_message(status.as_u16()).to_string(),
                });
            }

            let headers = response.headers();
            let content_type = headers
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|ct| ct.to_str().ok())
                .map(str::to_string);
            if let Some(ct) = content_type.as_deref() {
                if !Self::is_image_content_type(ct) {
                    return Err(ImageError::UnsupportedFormat(format!("不是图片类型：{}", ct)));
                }
            }

            let cacheable = status == reqwest::StatusCode::OK
                && !headers
                    .get_all(reqwest::header::CACHE_CONTROL)
                    .iter()
                    .filter_map(|value| value.to_str().ok())
                    .any(Self::is_no_store);

            let total_len = headers
                .get(reqwest::header::CONTENT_LENGTH)
                .and_then(|cl| cl.to_str().ok())
                .and_then(|cl| cl.parse::<u64>().ok());
            if let Some(size) = total_len {
                if size > config.max_file_size {
                    return Err(Self::size_limit_error(size, config.max_file_size));
                }
            }

            let body = Self::read_body(response, total_len, config).await?;
            log::debug!("✅ 下载完成 - {} bytes", body.len());

            return Ok(Download {
                body,
                content_type,
                cacheable,
            });
        }

        Err(ImageError::Network("下载流程异常结束".to_string()))
    }

    async fn read_body(
        mut response: reqwest::Response,
        total_len: Option<u64>,
        config: &ImageConfig,
    ) -> Result<Bytes, ImageError> {
        let initial_capacity = total_len
            .map(|len| len.min(config.max_file_size).min(usize::MAX as u64) as usize)
            .filter(|len| *len > 0)
            .unwrap_or(BUFFER_INITIAL_CAPACITY);
        let mut buffer = BytesMut::with_capacity(initial_capacity);
        let mut received_first_chunk = false;

        loop {
            let read_timeout = if received_first_chunk {
                Duration::from_millis(config.stream_chunk_timeout_ms)
            } else {
                Duration::from_millis(config.stream_first_byte_timeout_ms)
            };

            let next_chunk = tokio::time::timeout(read_timeout, response.chunk())
                .await
                .map_err(|_| {
                    if received_first_chunk {
                        ImageError::Timeout("下载数据流读取超时".to_string())
                    } else {
                        ImageError::Timeout("下载首包超时".to_string())
                    }
                })?
                .map_err(|e| {
                    if e.is_timeout() {
                        ImageError::Timeout(format!("下载超时（{}秒）", config.download_timeout))
                    } else {
                        ImageError::Network(format!("下载失败：{}", e))
                    }
                })?;

            let Some(chunk) = next_chunk else {
                break;
            };
            received_first_chunk = true;

            let total = (buffer.len() as u64).saturating_add(chunk.len() as u64);
            if total > config.max_file_size {
                return Err(ImageError::ResourceLimit("下载后文件超过大小限制".to_string()));
            }
            buffer.extend_from_slice(&chunk);
        }

        Ok(buffer.freeze())
    }

    async fn build_request_client(
        url: &reqwest::Url,
        config: &ImageConfig,
    ) -> Result<reqwest::Client, ImageError> {
        let builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.download_timeout))
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .redirect(reqwest::redirect::Policy::none());

        // 固定到已校验的公网地址，避免校验与连接之间 DNS 结果被替换
        let pinned = match url.host_str() {
            Some(host)
                if !config.allow_private_network
                    && config.resolve_dns_for_url_safety
                    && host.parse::<IpAddr>().is_err() =>
            {
                let port = url
                    .port_or_known_default()
                    .ok_or_else(|| ImageError::InvalidUrl("URL 缺少端口信息".to_string()))?;
                Self::resolve_public_socket_addrs(host, port)
                    .await?
                    .into_iter()
                    .next()
                    .map(|addr| (host.to_string(), addr))
            }
            _ => None,
        };

        let builder = match pinned {
            Some((host, addr)) => builder.resolve(&host, addr),
            None => builder,
        };

        builder
            .build()
            .map_err(|e| ImageError::Network(format!("无法创建 HTTP 客户端：{}", e)))
    }

    async fn resolve_public_socket_addrs(host: &str, port: u16) -> Result<Vec<SocketAddr>, ImageError> {
        let addrs = lookup_host((host, port))
            .await
            .map_err(|e| ImageError::Network(format!("URL 主机解析失败：{}", e)))?;

        let mut result = Vec::new();
        for addr in addrs {
            if Self::is_private_or_local_ip(addr.ip()) {
                return Err(ImageError::InvalidUrl(format!(
                    "URL 解析结果命中内网地址：{}",
                    addr.ip()
                )));
            }
            result.push(addr);
        }

        Ok(result)
    }

    /// 协议与主机字面量检查，不涉及网络。
    ///
    /// 默认阻止本地/内网目标，防止 SSRF 风险。
    fn check_url_literal(url: &reqwest::Url, config: &ImageConfig) -> Result<(), ImageError> {
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ImageError::InvalidUrl(format!(
                "仅支持 HTTP/HTTPS/data：{}",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .ok_or_else(|| ImageError::InvalidUrl("URL 缺少主机地址".to_string()))?;

        if config.allow_private_network {
            return Ok(());
        }

        if Self::is_local_hostname(host) {
            return Err(ImageError::InvalidUrl(format!("禁止访问本地网络地址：{}", host)));
        }

        let literal = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = literal.parse::<IpAddr>() {
            if Self::is_private_or_local_ip(ip) {
                return Err(ImageError::InvalidUrl(format!("禁止访问内网 IP：{}", ip)));
            }
        }

        Ok(())
    }

    /// 可选的 DNS 解析检查：主机名解析到内网地址时拒绝。
    async fn check_url_resolution(url: &reqwest::Url, config: &ImageConfig) -> Result<(), ImageError> {
        if config.allow_private_network || !config.resolve_dns_for_url_safety {
            return Ok(());
        }

        let Some(host) = url.host_str() else {
            return Ok(());
        };
        if host.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>().is_ok() {
            return Ok(());
        }

        let port = url
            .port_or_known_default()
            .ok_or_else(|| ImageError::InvalidUrl("URL 缺少端口信息".to_string()))?;

        if Self::resolve_public_socket_addrs(host, port).await?.is_empty() {
            return Err(ImageError::InvalidUrl("URL 未解析到有效地址".to_string()));
        }

        Ok(())
    }

    fn is_local_hostname(host: &str) -> bool {
        host.eq_ignore_ascii_case("localhost")
            || host.eq_ignore_ascii_case("localhost.")
            || host.to_ascii_lowercase().ends_with(".local")
    }

    /// 判断 IP 是否属于本地/内网/链路本地等受限范围。
    fn is_private_or_local_ip(ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => {
                if v4.is_private()
                    || v4.is_loopback()
                    || v4.is_link_local()
                    || v4.is_broadcast()
                    || v4.is_documentation()
                    || v4.is_unspecified()
                    || v4.is_multicast()
                {
                    return true;
                }

                // 0.0.0.0/8 与 CGNAT 100.64.0.0/10
                let octets = v4.octets();
                octets[0] == 0 || (octets[0] == 100 && (octets[1] & 0b1100_0000) == 0b0100_0000)
            }
            IpAddr::V6(v6) => {
                if let Some(mapped) = v6.to_ipv4_mapped() {
                    return Self::is_private_or_local_ip(IpAddr::V4(mapped));
                }
                v6.is_loopback()
                    || v6.is_unspecified()
                    || v6.is_unique_local()
                    || v6.is_unicast_link_local()
                    || v6.is_multicast()
            }
        }
    }

    fn is_data_url(url: &str) -> bool {
        url.get(..DATA_URL_PREFIX.len())
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case(DATA_URL_PREFIX))
    }

    fn is_image_content_type(content_type: &str) -> bool {
        content_type
            .split(';')
            .next()
            .map(|base| base.trim().to_ascii_lowercase().starts_with("image/"))
            .unwrap_or(false)
    }

    fn is_no_store(cache_control: &str) -> bool {
        cache_control
            .split(',')
            .any(|directive| directive.trim().eq_ignore_ascii_case("no-store"))
    }

    fn estimate_base64_decoded_upper_bound_len(base64_data: &str) -> Result<u64, ImageError> {
        let len = base64_data.trim().len() as u64;
        let groups = len
            .checked_add(3)
            .ok_or_else(|| ImageError::ResourceLimit("Base64 输入长度溢出".to_string()))?
            / 4;

        groups
            .checked_mul(3)
            .ok_or_else(|| ImageError::ResourceLimit("Base64 解码体积估算溢出".to_string()))
    }

    /// 解析 `data:image/<subtype>;base64,<payload>`，返回字节与 MIME 类型。
    fn parse_data_url(data: &str, max_file_size: u64) -> Result<(Bytes, String), ImageError> {
        let rest = &data[DATA_URL_PREFIX.len()..];
        let marker = rest
            .find(BASE64_MARKER)
            .ok_or_else(|| ImageError::InvalidUrl("data URL 缺少 base64 标记".to_string()))?;

        let mime = rest[..marker]
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        if !mime.starts_with("image/") {
            return Err(ImageError::UnsupportedFormat(format!("不是图片类型：{}", mime)));
        }

        let payload = rest[marker + BASE64_MARKER.len()..].trim();
        let estimated_len = Self::estimate_base64_decoded_upper_bound_len(payload)?;
        if estimated_len > max_file_size {
            return Err(ImageError::ResourceLimit(format!(
                "Base64 预计解码体积过大：{:.2} MB（限制：{:.2} MB）",
                estimated_len as f64 / 1024.0 / 1024.0,
                max_file_size as f64 / 1024.0 / 1024.0
            )));
        }

        let bytes = general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| ImageError::InvalidUrl(format!("Base64 解码失败：{}", e)))?;

        Ok((Bytes::from(bytes), mime))
    }

    fn size_limit_error(size: u64, limit: u64) -> ImageError {
        ImageError::ResourceLimit(format!(
            "文件过大：{:.2} MB（限制：{:.2} MB）",
            size as f64 / 1024.0 / 1024.0,
            limit as f64 / 1024.0 / 1024.0
        ))
    }

    /// 日志中只保留协议、主机、端口与路径。
    pub(crate) fn redact_url_for_log(url: &str) -> String {
        if Self::is_data_url(url) {
            return format!("data:<{} bytes>", url.len());
        }

        let Ok(parsed) = reqwest::Url::parse(url) else {
            return "<invalid-url>".to_string();
        };

        let host = parsed.host_str().unwrap_or("<unknown-host>");
        let port = parsed.port().map(|p| format!(":{}", p)).unwrap_or_default();
        let path = parsed.path();

        format!("{}://{}{}{}", parsed.scheme(), host, port, path)
    }

    /// 统一映射 reqwest 错误到业务错误。
    fn map_reqwest_error(e: reqwest::Error, url: &str, config: &ImageConfig) -> ImageError {
        let err_msg = e.to_string().replace(url, &Self::redact_url_for_log(url));

        if e.is_timeout() {
            ImageError::Timeout(format!("下载超时（{}秒）", config.download_timeout))
        } else if e.is_connect() {
            ImageError::Network(format!("无法连接：{}", err_msg))
        } else {
            ImageError::Network(format!("请求失败：{}", err_msg))
        }
    }

    /// 常见 HTTP 状态码本地化文案。
    fn status_message(code: u16) -> &'static str {
        match code {
            404 => "未找到",
            403 => "访问被拒绝",
            500..=599 => "服务器错误",
            _ => "请求失败",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_handler::test_support::create_png_bytes;
    use crate::response_cache::MemoryResponseCache;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// 按顺序为每个连接返回一条预置响应。
    fn serve(responses: Vec<Vec<u8>>) -> (u16, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server failed");
        let port = listener.local_addr().expect("read local addr failed").port();

        let server = thread::spawn(move || {
            for response in responses {
                let (mut stream, _) = listener.accept().expect("accept failed");
                let mut req_buf = [0u8; 2048];
                let _ = stream.read(&mut req_buf);
                stream.write_all(&response).expect("write response failed");
                stream.flush().expect("flush failed");
            }
        });

        (port, server)
    }

    fn http_response(status: &str, extra_headers: &str, body: &[u8]) -> Vec<u8> {
        let mut response = format!(
            "HTTP/1.1 {}\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n",
            status,
            extra_headers,
            body.len()
        )
        .into_bytes();
        response.extend_from_slice(body);
        response
    }

    fn local_config() -> ImageConfig {
        ImageConfig {
            allow_private_network: true,
            ..ImageConfig::default()
        }
    }

    fn fetcher_with_cache() -> (StreamFetcher, Arc<MemoryResponseCache>) {
        let cache = Arc::new(MemoryResponseCache::default());
        let shared: Arc<dyn ResponseCache> = cache.clone();
        (StreamFetcher::new(Some(shared)), cache)
    }

    #[test]
    fn literal_check_blocks_private_targets_by_default() {
        let config = ImageConfig::default();
        for url in [
            "http://127.0.0.1/image.png",
            "https://localhost/image.png",
            "http://10.1.2.3/image.png",
            "http://100.64.0.1/image.png",
            "http://[::1]/image.png",
            "http://printer.local/image.png",
        ] {
            let parsed = reqwest::Url::parse(url).expect("valid url");
            assert!(
                matches!(StreamFetcher::check_url_literal(&parsed, &config), Err(ImageError::InvalidUrl(_))),
                "{url} should be blocked"
            );
        }
    }

    #[test]
    fn literal_check_allows_private_targets_when_enabled() {
        let parsed = reqwest::Url::parse("http://127.0.0.1/image.png").expect("valid url");
        assert!(StreamFetcher::check_url_literal(&parsed, &local_config()).is_ok());
    }

    #[tokio::test]
    async fn unsupported_scheme_is_invalid_url() {
        let fetcher = StreamFetcher::new(None);

        let result = fetcher.open("ftp://example.com/a.png", &local_config()).await;

        assert!(matches!(result, Err(ImageError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn data_url_opens_inline_stream() {
        let png = create_png_bytes(3, 2);
        let url = format!("data:image/png;base64,{}", general_purpose::STANDARD.encode(&png));
        let fetcher = StreamFetcher::new(None);

        let stream = fetcher.open(&url, &ImageConfig::default()).await.expect("open data url");

        assert_eq!(stream.origin(), StreamOrigin::Inline);
        assert_eq!(stream.content_type(), Some("image/png"));
        assert_eq!(stream.as_slice(), png.as_slice());
    }

    #[test]
    fn data_url_rejects_non_image_mime() {
        let result = StreamFetcher::parse_data_url("data:text/plain;base64,SGVsbG8=", u64::MAX);
        assert!(matches!(result, Err(ImageError::UnsupportedFormat(_))));
    }

    #[test]
    fn data_url_rejects_large_payload_before_decode() {
        let huge = format!("data:image/png;base64,{}", "A".repeat(1024 * 1024));
        let result = StreamFetcher::parse_data_url(&huge, 32);

        assert!(matches!(result, Err(ImageError::ResourceLimit(_))));
    }

    #[test]
    fn content_type_parser_accepts_image_with_params() {
        assert!(StreamFetcher::is_image_content_type("image/png; charset=utf-8"));
        assert!(StreamFetcher::is_image_content_type("IMAGE/JPEG"));
        assert!(!StreamFetcher::is_image_content_type("text/html; charset=utf-8"));
    }

    #[test]
    fn no_store_directive_is_detected() {
        assert!(StreamFetcher::is_no_store("no-store"));
        assert!(StreamFetcher::is_no_store("private, No-Store, max-age=0"));
        assert!(!StreamFetcher::is_no_store("no-cache, max-age=60"));
    }

    #[test]
    fn redact_url_for_log_removes_query_and_fragment() {
        let redacted = StreamFetcher::redact_url_for_log(
            "https://example.com:8443/path/img.png?token=abc123#hash",
        );

        assert_eq!(redacted, "https://example.com:8443/path/img.png");
    }

    #[tokio::test]
    async fn network_response_is_cached_and_reused() {
        let png = create_png_bytes(8, 8);
        let (port, server) = serve(vec![http_response(
            "200 OK",
            "Content-Type: image/png\r\n",
            &png,
        )]);
        let (fetcher, cache) = fetcher_with_cache();
        let url = format!("http://127.0.0.1:{}/a.png", port);

        let first = fetcher.open(&url, &local_config()).await.expect("first open");
        server.join().expect("server thread failed");
        let second = fetcher.open(&url, &local_config()).await.expect("second open");

        assert_eq!(first.origin(), StreamOrigin::Network);
        assert_eq!(second.origin(), StreamOrigin::Cache);
        assert_eq!(first.as_slice(), second.as_slice());
        assert_eq!(second.content_type(), Some("image/png"));
        assert_eq!(cache.stats().expect("stats").entries, 1);
    }

    #[tokio::test]
    async fn no_store_response_is_not_cached() {
        let png = create_png_bytes(4, 4);
        let response = http_response(
            "200 OK",
            "Content-Type: image/png\r\nCache-Control: no-store\r\n",
            &png,
        );
        let (port, server) = serve(vec![response.clone(), response]);
        let (fetcher, cache) = fetcher_with_cache();
        let url = format!("http://127.0.0.1:{}/fresh.png", port);

        let first = fetcher.open(&url, &local_config()).await.expect("first open");
        let second = fetcher.open(&url, &local_config()).await.expect("second open");
        server.join().expect("server thread failed");

        assert_eq!(first.origin(), StreamOrigin::Network);
        assert_eq!(second.origin(), StreamOrigin::Network);
        assert_eq!(cache.stats().expect("stats").entries, 0);
    }

    #[tokio::test]
    async fn http_error_status_is_reported() {
        let (port, server) = serve(vec![http_response("404 Not Found", "", b"missing")]);
        let fetcher = StreamFetcher::new(None);
        let url = format!("http://127.0.0.1:{}/missing.png", port);

        let result = fetcher.open(&url, &local_config()).await;
        server.join().expect("server thread failed");

        assert!(matches!(result, Err(ImageError::HttpStatus { status: 404, .. })));
    }

    #[tokio::test]
    async fn non_image_content_type_is_rejected() {
        let (port, server) = serve(vec![http_response(
            "200 OK",
            "Content-Type: text/html\r\n",
            b"<html></html>",
        )]);
        let fetcher = StreamFetcher::new(None);
        let url = format!("http://127.0.0.1:{}/page", port);

        let result = fetcher.open(&url, &local_config()).await;
        server.join().expect("server thread failed");

        assert!(matches!(result, Err(ImageError::UnsupportedFormat(_))));
    }

    #[tokio::test]
    async fn oversized_content_length_is_rejected() {
        let body = vec![0u8; 256];
        let (port, server) = serve(vec![http_response("200 OK", "Content-Type: image/png\r\n", &body)]);
        let fetcher = StreamFetcher::new(None);
        let config = ImageConfig {
            max_file_size: 64,
            ..local_config()
        };
        let url = format!("http://127.0.0.1:{}/big.png", port);

        let result = fetcher.open(&url, &config).await;
        server.join().expect("server thread failed");

        assert!(matches!(result, Err(ImageError::ResourceLimit(_))));
    }

    #[tokio::test]
    async fn redirect_is_followed() {
        let png = create_png_bytes(2, 2);
        let (port, server) = {
            let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server failed");
            let port = listener.local_addr().expect("read local addr failed").port();
            let png = png.clone();
            let server = thread::spawn(move || {
                let responses = [
                    http_response(
                        "302 Found",
                        &format!("Location: http://127.0.0.1:{}/final.png\r\n", port),
                        b"",
                    ),
                    http_response("200 OK", "Content-Type: image/png\r\n", &png),
                ];
                for response in responses {
                    let (mut stream, _) = listener.accept().expect("accept failed");
                    let mut req_buf = [0u8; 2048];
                    let _ = stream.read(&mut req_buf);
                    stream.write_all(&response).expect("write response failed");
                    stream.flush().expect("flush failed");
                }
            });
            (port, server)
        };

        let fetcher = StreamFetcher::new(None);
        let url = format!("http://127.0.0.1:{}/start.png", port);
        let stream = fetcher.open(&url, &local_config()).await.expect("open");
        server.join().expect("server thread failed");

        assert_eq!(stream.as_slice(), png.as_slice());
    }

    #[tokio::test]
    async fn redirect_to_localhost_is_blocked() {
        let (port, server) = serve(vec![http_response(
            "302 Found",
            "Location: http://localhost/final.png\r\n",
            b"",
        )]);
        let config = ImageConfig::default();
        let url = reqwest::Url::parse(&format!("http://127.0.0.1:{}/start.png", port)).expect("valid url");

        let result = StreamFetcher::download(url, &config).await;
        server.join().expect("server thread failed");

        assert!(matches!(result, Err(ImageError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn read_stream_scopes_the_stream() {
        let png = create_png_bytes(5, 5);
        let url = format!("data:image/png;base64,{}", general_purpose::STANDARD.encode(&png));
        let fetcher = StreamFetcher::new(None);

        let len = fetcher
            .read_stream(&url, &ImageConfig::default(), |stream| stream.len())
            .await
            .expect("read stream");

        assert_eq!(len, png.len());
    }
}
