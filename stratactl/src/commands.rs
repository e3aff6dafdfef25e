use std::{
    fs,
    ops::ControlFlow,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use strata_config::{ConfigSource, StrataConfig};
use strata_core::{
    CachedImage, Format, HttpFetcher, ImageCache, ImageCodec, PathFetcher,
    PreloadPolicy, RasterCodec, StorageEncoding, StoredEntry,
};
use tracing::info;

pub fn load_config(
    path: Option<&Path>,
    root: Option<PathBuf>,
) -> Result<StrataConfig> {
    let (mut config, source) = match path {
        Some(path) => {
            let config = StrataConfig::load_from_file(path)?;
            config.validate()?;
            (config, ConfigSource::File(path.to_path_buf()))
        }
        None => StrataConfig::load_from_env()?,
    };

    match &source {
        ConfigSource::Default => info!("no config found, using defaults"),
        ConfigSource::EnvInline => {
            info!("config loaded from inline environment json")
        }
        ConfigSource::EnvPath(path) | ConfigSource::File(path) => {
            info!(path = %path.display(), "config loaded")
        }
    }

    if root.is_some() {
        config.root = root;
    }
    Ok(config)
}

pub fn formats(config: &StrataConfig) -> Result<()> {
    if config.formats.is_empty() {
        println!("no formats configured");
        return Ok(());
    }
    println!(
        "{:<16} {:>11} {:<12} {:<9} {:>12} {:<7}",
        "NAME", "SIZE", "SCALE", "ENCODING", "CAPACITY", "PRELOAD"
    );
    for spec in &config.formats {
        println!(
            "{:<16} {:>11} {:<12} {:<9} {:>12} {:<7}",
            spec.name,
            spec.size.to_string(),
            spec.scale_mode.to_string(),
            spec.storage_encoding.to_string(),
            spec.persistent_capacity.to_string(),
            spec.preload_policy.to_string(),
        );
    }
    Ok(())
}

/// Open the configured cache with `only` (or every format) registered.
/// Preloading is skipped; the commands below never read the memory tier.
async fn open_cache(
    config: &StrataConfig,
    only: Option<&str>,
) -> Result<ImageCache> {
    let cache = ImageCache::new(config.to_options()?)
        .context("failed to create cache")?;

    let formats = match only {
        Some(name) => vec![Format::new(
            config
                .format(name)
                .with_context(|| format!("format {name:?} is not configured"))?
                .clone(),
        )],
        None => config.format_definitions(),
    };

    for mut format in formats {
        format.spec_mut().preload_policy = PreloadPolicy::None;
        let name = format.name().to_owned();
        cache
            .register_format(format)
            .await
            .with_context(|| format!("failed to register format {name:?}"))?;
    }
    Ok(cache)
}

pub async fn fetch(
    config: &StrataConfig,
    format: &str,
    key: Option<String>,
    out: Option<PathBuf>,
    source: &str,
) -> Result<()> {
    let cache = open_cache(config, Some(format)).await?;

    let remote =
        source.starts_with("http://") || source.starts_with("https://");
    let resolved = if remote {
        let mut fetcher = HttpFetcher::new(reqwest::Client::new(), source);
        if let Some(key) = key {
            fetcher = fetcher.with_key(key);
        }
        cache.fetch_or_produce(fetcher, format).await
    } else {
        let mut fetcher = PathFetcher::new(source);
        if let Some(key) = key {
            fetcher = fetcher.with_key(key);
        }
        cache.fetch_or_produce(fetcher, format).await
    };
    let image = resolved
        .with_context(|| format!("failed to resolve {source} as {format}"))?;

    let stats = cache.stats();
    let origin = if stats.store_hits > 0 { "store" } else { "producer" };
    println!("{source}: {} from {origin}", image.dimensions());

    if let Some(out) = out {
        write_image(&image, &out)?;
        println!("wrote {}", out.display());
    }

    cache.flush().await.context("failed to flush cache writes")?;
    Ok(())
}

fn write_image(image: &CachedImage, out: &Path) -> Result<()> {
    let encoding = match out.extension().and_then(|ext| ext.to_str()) {
        Some("jpg") | Some("jpeg") => StorageEncoding::Jpeg,
        Some("png") => StorageEncoding::Png,
        _ => StorageEncoding::Automatic,
    };
    let bytes = RasterCodec::default()
        .encode(image, 0.9, encoding)
        .context("failed to encode image")?;
    fs::write(out, bytes)
        .with_context(|| format!("failed to write {}", out.display()))
}

pub async fn entries(
    config: &StrataConfig,
    format: &str,
    limit: Option<usize>,
) -> Result<()> {
    let cache = open_cache(config, Some(format)).await?;
    let handle = cache
        .format(format)
        .with_context(|| format!("format {format:?} is not registered"))?;

    let mut rows: Vec<(String, usize, DateTime<Utc>)> = Vec::new();
    let limit = limit.unwrap_or(usize::MAX);
    let mut visitor = |entry: StoredEntry| {
        rows.push((entry.key, entry.bytes.len(), entry.accessed_at));
        if rows.len() >= limit {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    };
    handle
        .store()
        .enumerate_by_access_date(&mut visitor)
        .await
        .with_context(|| format!("failed to list entries of {format:?}"))?;

    println!(
        "{} entries, {} of {} used",
        rows.len(),
        handle.persistent_size(),
        handle.persistent_capacity()
    );
    for (key, len, accessed_at) in rows {
        let accessed_at = accessed_at.format("%Y-%m-%d %H:%M:%S");
        println!("{accessed_at}  {len:>10}  {key}");
    }
    Ok(())
}

pub async fn purge(
    config: &StrataConfig,
    format: Option<&str>,
    key: Option<&str>,
) -> Result<()> {
    let cache = open_cache(config, format).await?;

    match (format, key) {
        (Some(format), Some(key)) => {
            cache.set(key, format, None).await?;
            println!("removed {key:?} from {format:?}");
        }
        (Some(format), None) => {
            cache.remove_format(format).await?;
            println!("purged format {format:?}");
        }
        (None, Some(key)) => {
            if config.formats.is_empty() {
                bail!("no formats configured");
            }
            cache.remove_key(key).await?;
            println!("removed {key:?} from every format");
        }
        (None, None) => {
            cache.remove_all().await?;
            println!("purged {} formats", cache.format_names().len());
        }
    }
    Ok(())
}
