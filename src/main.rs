//! # remote-bitmap：命令行入口
//!
//! 本文件仅负责参数解析、日志与缓存初始化。
//! 业务逻辑分布在各子模块中，详见 `lib.rs` 架构文档。

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use image::{ExtendedColorType, ImageFormat};

use remote_bitmap::error::AppError;
use remote_bitmap::image_handler::{ImageHandler, ImagePerformanceProfile, PixelFormat, RasterImage};
use remote_bitmap::response_cache::{DiskResponseCache, ResponseCache};
use remote_bitmap::settings::AppSettings;
use remote_bitmap::storage::{cache_dir_info, resolve_cache_dir};

/// 从 URL 取图、按目标尺寸采样解码，可选圆角，输出 PNG
#[derive(Parser, Debug)]
#[command(name = "remote-bitmap", version, about)]
struct Args {
    /// 图片地址（http / https / data:image/*;base64）
    url: String,

    /// 期望宽度，0 表示原始宽度
    #[arg(long, default_value_t = 0)]
    width: u32,

    /// 期望高度，0 表示原始高度
    #[arg(long, default_value_t = 0)]
    height: u32,

    /// 圆角半径（像素），<= 0 表示不加圆角
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    radius: i32,

    /// 输出 PNG 路径
    #[arg(long, short, default_value = "output.png")]
    output: PathBuf,

    /// JSON 设置文件
    #[arg(long)]
    settings: Option<PathBuf>,

    /// 响应缓存目录，覆盖设置文件
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// 性能档位：quality / balanced / speed
    #[arg(long)]
    profile: Option<String>,

    /// 允许访问内网 / 本机地址
    #[arg(long)]
    allow_private_network: bool,

    /// 不使用磁盘缓存
    #[arg(long)]
    no_cache: bool,

    /// 结束时以 JSON 打印缓存统计
    #[arg(long)]
    cache_stats: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Args::parse()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            log::error!("❌ 未能生成图片（内存预算不足）");
            ExitCode::from(2)
        }
        Err(err) => {
            log::error!("❌ {} [{}]", err, err.code());
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<bool, AppError> {
    let settings = match args.settings.as_deref() {
        Some(path) => AppSettings::load(path)?,
        None => AppSettings::default(),
    };

    let mut config = settings.image_config()?;
    if let Some(profile) = args.profile.as_deref() {
        config.apply_performance_profile(ImagePerformanceProfile::parse(profile)?);
    }
    if args.allow_private_network {
        config.allow_private_network = true;
    }

    let disk_cache = if args.no_cache {
        None
    } else {
        let dir = resolve_cache_dir(args.cache_dir.as_deref().or(settings.cache_dir.as_deref()))?;
        Some(Arc::new(DiskResponseCache::open(dir, settings.disk_cache_config())?))
    };
    let cache = disk_cache
        .clone()
        .map(|cache| cache as Arc<dyn ResponseCache>);

    let handler = ImageHandler::new(config, cache);
    let image = if args.radius > 0 {
        handler
            .decode_rounded_bitmap_from_url(&args.url, args.width, args.height, args.radius)
            .await?
    } else {
        handler
            .decode_sampled_bitmap_from_url(&args.url, args.width, args.height)
            .await?
    };

    if let Some(image) = &image {
        save_png(image, &args.output)?;
        log::info!(
            "💾 已写入 {}（{}x{}）",
            args.output.display(),
            image.width(),
            image.height()
        );
    }

    if args.cache_stats {
        match &disk_cache {
            Some(cache) => {
                let stats = cache.stats()?;
                let report = serde_json::json!({
                    "entries": stats.entries,
                    "total_bytes": stats.total_bytes,
                    "storage": cache_dir_info(cache.dir()),
                });
                println!("{}", report);
            }
            None => log::warn!("⚠️ 已禁用缓存，无统计可输出"),
        }
    }

    Ok(image.is_some())
}

fn save_png(image: &RasterImage, path: &Path) -> Result<(), AppError> {
    let color = match image.format() {
        PixelFormat::Rgba8 => ExtendedColorType::Rgba8,
        PixelFormat::Rgb8 => ExtendedColorType::Rgb8,
    };

    image::save_buffer_with_format(
        path,
        image.pixels(),
        image.width(),
        image.height(),
        color,
        ImageFormat::Png,
    )
    .map_err(|e| AppError::Storage(format!("写入 PNG 失败: {}", e)))
}
