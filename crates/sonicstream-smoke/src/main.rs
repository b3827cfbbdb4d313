//! SonicStream offline worker smoke harness
//!
//! Installs the worker against a live origin, then replays a list of
//! fetches through it and prints a JSON summary of where each response
//! came from.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use serde_json::{json, Value};
use sonicstream_common::{init_logging, HostConfig, LogConfig, LogFormat};
use sonicstream_sw::{HttpFetcher, OfflineWorker, Request, WorkerHost};
use tracing::{error, info};
use url::Url;

/// Parse command line arguments
#[derive(Debug, Default, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    script_url: Option<String>,
    storage: Option<PathBuf>,
    in_memory: bool,
    log_format: LogFormat,
    targets: Vec<String>,
}

impl Args {
    fn parse() -> anyhow::Result<Self> {
        Self::parse_from(std::env::args().skip(1))
    }

    fn parse_from(args: impl IntoIterator<Item = String>) -> anyhow::Result<Self> {
        let mut args = args.into_iter();
        let mut parsed = Args::default();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => parsed.config = Some(value(&mut args, &arg)?.into()),
                "--script-url" => parsed.script_url = Some(value(&mut args, &arg)?),
                "--storage" => parsed.storage = Some(value(&mut args, &arg)?.into()),
                "--in-memory" => parsed.in_memory = true,
                "--log-format" => {
                    parsed.log_format = value(&mut args, &arg)?
                        .parse()
                        .map_err(anyhow::Error::msg)?
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                flag if flag.starts_with("--") => bail!("unknown flag: {flag}"),
                _ => parsed.targets.push(arg),
            }
        }

        Ok(parsed)
    }

    fn host_config(&self) -> anyhow::Result<HostConfig> {
        let mut config = match self.config {
            Some(ref path) => HostConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => HostConfig::default(),
        };
        if let Some(ref url) = self.script_url {
            config.set_script_url(url)?;
        }
        if let Some(ref dir) = self.storage {
            config.storage_dir = Some(dir.clone());
        }
        if self.in_memory {
            config.storage_dir = None;
        }
        Ok(config)
    }
}

fn value(args: &mut impl Iterator<Item = String>, flag: &str) -> anyhow::Result<String> {
    args.next()
        .with_context(|| format!("{flag} requires a value"))
}

fn print_usage() {
    println!(
        "usage: sonicstream-smoke [--config FILE] [--script-url URL] [--storage DIR] \
         [--in-memory] [--log-format pretty|compact|json] [PATH_OR_URL...]"
    );
}

/// Resolve a target against the script URL so `/api/data` works.
fn target_request(script_url: &Url, target: &str) -> anyhow::Result<Request> {
    let url = script_url
        .join(target)
        .with_context(|| format!("invalid target {target}"))?;
    Ok(Request::get(url))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse()?;
    init_logging(&LogConfig::default().with_format(args.log_format));

    let config = args.host_config()?;
    info!(script_url = %config.script_url, storage = ?config.storage_dir, "Starting smoke run");

    let fetcher = HttpFetcher::from_config(&config)?;
    let (host, _events) = WorkerHost::new(&config, OfflineWorker::new(fetcher))?;

    let started = Instant::now();
    let install = host.install().await;
    let install_ms = started.elapsed().as_secs_f64() * 1000.0;

    let install_summary = match install {
        Ok(stored) => json!({ "ok": true, "stored": stored, "ms": install_ms }),
        Err(ref e) => {
            error!(error = %e, "Install failed");
            json!({ "ok": false, "error": e.to_string(), "ms": install_ms })
        }
    };

    let mut fetches = Vec::with_capacity(args.targets.len());
    for target in &args.targets {
        let request = target_request(&config.script_url, target)?;
        let url = request.url.to_string();
        let started = Instant::now();
        let entry = match host.fetch(request).await {
            Ok(response) => json!({
                "url": url,
                "status": response.status.as_u16(),
                "source": response.source.as_str(),
                "bytes": response.body.len(),
                "ms": started.elapsed().as_secs_f64() * 1000.0,
            }),
            Err(e) => json!({ "url": url, "error": e.to_string() }),
        };
        fetches.push(entry);
    }

    let summary: Value = json!({
        "cache": host.worker().cache_name(),
        "install": install_summary,
        "fetches": fetches,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if install.is_err() {
        std::process::exit(1);
    }
    Ok(())
}
