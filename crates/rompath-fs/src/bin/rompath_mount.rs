//! rompath-mount: Mount a remote ROM archive repository as a local directory.
//!
//! Archives are downloaded into the cache directory the first time they are
//! opened. Point an emulator's ROM path at the mount point.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: mount ./roms, cache ./mamecache, https://mdk.cab/download/
//! rompath-mount
//!
//! # Serve .7z sets too, with a custom cache
//! rompath-mount -m /mnt/roms -c /var/cache/rompath --7z
//!
//! # Settings from a file; flags still win
//! rompath-mount --config rompath.toml -v
//! ```

use clap::Parser;
use env_logger::Env;
use log::{error, info};
use rompath_fs::fuse::mount;
use rompath_fs::{FsEngine, HttpFetcher, MountConfig};
use std::fs;
use std::path::PathBuf;
use std::process;

/// Mount a remote ROM archive repository as a read-only directory.
#[derive(Parser, Debug)]
#[command(name = "rompath-mount")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory to mount at (default: ./roms)
    #[arg(short, long = "mount", value_name = "DIR")]
    mount: Option<PathBuf>,

    /// Local cache directory (default: ./mamecache)
    #[arg(short, long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Remote base URL (default: https://mdk.cab/download/)
    #[arg(short = 'u', long, value_name = "URL")]
    base_url: Option<String>,

    /// Also serve .7z archives
    #[arg(long = "7z")]
    seven_zip: bool,

    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Defaults, then the config file, then flags.
    fn resolve(&self) -> Result<MountConfig, rompath_fs::ConfigError> {
        let mut config = match &self.config {
            Some(path) => MountConfig::load(path)?,
            None => MountConfig::default(),
        };
        if let Some(mount) = &self.mount {
            config.mount_point = mount.clone();
        }
        if let Some(cache_dir) = &self.cache_dir {
            config.cache_dir = cache_dir.clone();
        }
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if self.seven_zip {
            config.enable_7z = true;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    let config = match args.resolve() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    for dir in [&config.cache_dir, &config.mount_point] {
        if let Err(e) = fs::create_dir_all(dir) {
            error!("Failed to create {}: {}", dir.display(), e);
            process::exit(1);
        }
    }

    info!("Mount point: {}", config.mount_point.display());
    info!("Cache directory: {}", config.cache_dir.display());
    info!("Base URL: {}", config.base_url);
    info!("7z support: {}", if config.enable_7z { "enabled" } else { "disabled" });

    let fetcher = match HttpFetcher::with_config(config.fetcher_config()) {
        Ok(fetcher) => fetcher,
        Err(e) => {
            error!("Failed to create HTTP client: {}", e);
            process::exit(1);
        }
    };
    let engine = FsEngine::new(config.engine_config(), fetcher);

    match mount(engine, &config.mount_point) {
        Ok(session) => {
            info!("Filesystem running. Unmount or press Ctrl+C to stop.");
            session.wait();
        }
        Err(e) => {
            error!("Mount failed: {}", e);
            process::exit(1);
        }
    }
}
