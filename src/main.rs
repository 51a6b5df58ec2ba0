#[macro_use]
extern crate log;

use std::env;
use std::env::consts::{ARCH, FAMILY, OS};
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Error};
use log::LevelFilter;
use serde::Serialize;
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

use captchouli::booru::GelbooruClient;
use captchouli::config_loader::{AppConfig, DEFAULT_CONFIG_FILE, Logging};
use captchouli::{FetchRequest, Source, SqliteStore, Sourcer};

/// The name of the cargo package.
const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A buffered log file writer that flushes every few lines and on drop.
struct BufferedFileWriter {
    inner: Arc<Mutex<BufWriter<std::fs::File>>>,
    line_count: usize,
}

impl BufferedFileWriter {
    fn new(path: &str) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(BufWriter::with_capacity(64 * 1024, file))),
            line_count: 0,
        })
    }
}

impl Write for BufferedFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut writer = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("Failed to acquire lock"))?;
        let size = writer.write(buf)?;

        let lines = buf.iter().filter(|&&b| b == b'\n').count();
        if lines > 0 {
            self.line_count += lines;
            // Flush every 50 lines so a crash loses little
            if self.line_count >= 50 {
                self.line_count = 0;
                writer.flush()?;
            }
        }
        Ok(size)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut writer = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("Failed to acquire lock"))?;
        writer.flush()
    }
}

impl Drop for BufferedFileWriter {
    fn drop(&mut self) {
        if let Ok(mut writer) = self.inner.lock() {
            let _ = writer.flush();
        }
    }
}

/// One sourced image, as printed to stdout.
#[derive(Serialize)]
struct FetchedReport<'a> {
    tag: &'a str,
    path: String,
    md5: String,
    rating: String,
    source: String,
    tags: Vec<&'a str>,
}

fn main() -> Result<(), Error> {
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());
    let config = AppConfig::load_or_create(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    initialize_logger(&config.logging, &config.paths.log_file);
    log_system_information();
    trace!("Config loaded from {}", config_path);

    let store = SqliteStore::open(&config.paths.database_file)
        .context("Failed to open image store")?;
    let client = GelbooruClient::new(
        config.booru.api_url.clone(),
        &config.booru.user_agent,
        config.request_timeout(),
        config.rate_limiter_config(),
    )
    .context("Failed to build booru client")?;
    let sourcer = Sourcer::new(client, store, config.sourcer_config());

    let mut failures = 0usize;
    for tag in &config.service.tags {
        info!("Sourcing an image for '{}'", tag);
        let fetched = match sourcer.fetch(&FetchRequest::new(tag.as_str(), Source::Gelbooru)) {
            Ok(Some(fetched)) => fetched,
            Ok(None) => {
                warn!("No image currently available for '{}'", tag);
                continue;
            }
            Err(e) => {
                error!("Failed to source an image for '{}': {}", tag, e);
                failures += 1;
                continue;
            }
        };

        // This process is the consumer: keep the file and retire the image
        sourcer.store().insert_image(&fetched.image)?;
        let image = fetched.image;
        let path = fetched
            .file
            .into_temp_path()
            .keep()
            .context("Failed to keep downloaded file")?;

        let report = FetchedReport {
            tag,
            path: path.display().to_string(),
            md5: image.md5.to_hex(),
            rating: image.rating.to_string(),
            source: image.source.to_string(),
            tags: image.tags.iter().map(String::as_str).collect(),
        };
        println!("{}", serde_json::to_string(&report)?);
    }

    info!(
        "Done: {} tags, {} failures, {} blacklisted hashes",
        config.service.tags.len(),
        failures,
        sourcer.store().blacklist_count()?
    );
    Ok(())
}

/// Initializes terminal logging plus an optional log file.
fn initialize_logger(logging: &Logging, log_file: &str) {
    let level = logging.log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);
    let term_logger = TermLogger::new(level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto);

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![term_logger];
    if logging.log_to_file {
        match BufferedFileWriter::new(log_file) {
            Ok(writer) => {
                let mut config = ConfigBuilder::new();
                config.add_filter_allow_str(NAME);
                loggers.push(WriteLogger::new(LevelFilter::max(), config.build(), writer));
            }
            Err(e) => eprintln!(
                "Failed to open log file {}: {}. Logging will only output to terminal.",
                log_file, e
            ),
        }
    }

    if let Err(e) = CombinedLogger::init(loggers) {
        eprintln!("Failed to initialize logger: {}", e);
    }
}

/// Logs important information about the system being used.
fn log_system_information() {
    trace!("Program Name: {}", NAME);
    trace!("Program Version: {}", VERSION);
    trace!("ARCH:   \"{}\"", ARCH);
    trace!("FAMILY: \"{}\"", FAMILY);
    trace!("OS:     \"{}\"", OS);
}
