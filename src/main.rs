// src/main.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use serde_json::json;
use tracing::info;

use reconx::app::{Drivers, ReconApp};
use reconx::config::Settings;
use reconx::core::control::ControlHandle;
use reconx::core::models::{JobState, PathParams, PortParams, ProxyMap, ScanParams, SubdomainParams};
use reconx::core::progress::ignore_progress;
use reconx::core::store::MemoryJobStore;
use reconx::logging;

/// ReconX - reconnaissance scan engine
#[derive(Parser)]
#[command(name = "reconx")]
#[command(version)]
#[command(about = "Subdomain, port and path reconnaissance with cancellable jobs.", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Also log to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Run the scan as a tracked job: progress on stderr, Ctrl-C cancels
    #[arg(long, global = true)]
    job: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Subdomain enumeration and resolution
    Subdomains {
        #[command(subcommand)]
        action: SubdomainAction,
    },
    /// TCP port probing
    Ports {
        #[command(subcommand)]
        action: PortAction,
    },
    /// Web path discovery
    Paths {
        #[command(subcommand)]
        action: PathAction,
    },
    /// Print the version
    Version,
}

#[derive(Subcommand)]
enum SubdomainAction {
    Scan {
        /// Domain to enumerate
        domain: String,

        /// Nameserver IPs, comma separated
        #[arg(long, value_delimiter = ',')]
        resolvers: Vec<String>,

        /// Maximum concurrent resolutions
        #[arg(long, default_value = "50")]
        concurrency: usize,

        /// Per-query timeout in seconds
        #[arg(long, default_value = "30")]
        timeout: f64,
    },
}

#[derive(Subcommand)]
enum PortAction {
    Scan {
        /// Hosts to probe, comma separated
        #[arg(required = true, value_delimiter = ',')]
        targets: Vec<String>,

        /// Ports to probe, comma separated
        #[arg(long, value_delimiter = ',', default_value = "80,443,22,3389")]
        ports: Vec<u16>,

        /// Connect timeout in seconds
        #[arg(long, default_value = "5")]
        timeout: f64,

        /// Total connect attempts per port
        #[arg(long, default_value = "1")]
        retries: u32,
    },
}

#[derive(Subcommand)]
enum PathAction {
    Scan {
        /// Base URL, e.g. https://example.com
        base_url: String,

        /// Words to probe, comma separated
        #[arg(long, value_delimiter = ',', conflicts_with = "wordlist_file")]
        wordlist: Vec<String>,

        /// File with one word per line
        #[arg(long)]
        wordlist_file: Option<PathBuf>,

        /// Statuses to report, comma separated
        #[arg(long, value_delimiter = ',')]
        status_include: Vec<u16>,

        /// Extensions appended to every word, comma separated
        #[arg(long, value_delimiter = ',')]
        extensions: Vec<String>,

        /// `user:pass` or `Authorization: <value>`
        #[arg(long)]
        auth: Option<String>,

        /// Proxy URL, or `scheme=url` pairs separated by commas
        #[arg(long)]
        proxy: Option<String>,

        /// Request timeout in seconds
        #[arg(long, default_value = "10")]
        timeout: f64,

        /// Total attempts per path
        #[arg(long, default_value = "1")]
        retries: u32,

        /// Requests per second per host
        #[arg(long)]
        qps: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    logging::initialize_logging(cli.verbose)?;
    let settings = Settings::load(cli.config.as_deref()).wrap_err("Failed to load settings")?;

    let params = match cli.command {
        Commands::Version => {
            println!("reconx {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Commands::Subdomains { action } => subdomain_params(action),
        Commands::Ports { action } => port_params(action),
        Commands::Paths { action } => path_params(action).await?,
    };
    info!(kind = %params.kind(), job = cli.job, "Scan requested.");

    if cli.job {
        run_as_job(&settings, params).await
    } else {
        run_direct(&settings, params).await
    }
}

fn subdomain_params(action: SubdomainAction) -> ScanParams {
    let SubdomainAction::Scan {
        domain,
        resolvers,
        concurrency,
        timeout,
    } = action;
    ScanParams::Subdomains(SubdomainParams {
        domain,
        resolvers: non_empty(resolvers),
        concurrency,
        timeout,
    })
}

fn port_params(action: PortAction) -> ScanParams {
    let PortAction::Scan {
        targets,
        ports,
        timeout,
        retries,
    } = action;
    ScanParams::Ports(PortParams {
        targets,
        ports,
        timeout,
        retries,
    })
}

async fn path_params(action: PathAction) -> Result<ScanParams> {
    let PathAction::Scan {
        base_url,
        wordlist,
        wordlist_file,
        status_include,
        extensions,
        auth,
        proxy,
        timeout,
        retries,
        qps,
    } = action;

    let wordlist = match wordlist_file {
        Some(path) => {
            let text = tokio::fs::read_to_string(&path)
                .await
                .wrap_err_with(|| format!("Failed to read wordlist {}", path.display()))?;
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string)
                .collect()
        }
        None => wordlist,
    };

    Ok(ScanParams::Paths(PathParams {
        base_url,
        wordlist: non_empty(wordlist),
        status_include: non_empty(status_include),
        extensions: non_empty(extensions),
        auth,
        proxies: proxy.as_deref().map(parse_proxy),
        timeout,
        retries,
        qps_per_host: qps,
    }))
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    (!items.is_empty()).then_some(items)
}

/// `http=http://p:8080,https=http://p:8443` becomes a per-scheme map; anything else is a single proxy.
fn parse_proxy(raw: &str) -> ProxyMap {
    if !raw.contains('=') {
        return ProxyMap::Single(raw.trim().to_string());
    }
    let map: BTreeMap<String, String> = raw
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(scheme, url)| (scheme.trim().to_ascii_lowercase(), url.trim().to_string()))
        .collect();
    ProxyMap::ByScheme(map)
}

async fn run_direct(settings: &Settings, params: ScanParams) -> Result<()> {
    let control = ControlHandle::with_poll_interval(settings.pause_poll());
    let interrupt = control.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, finishing in-flight probes...");
            interrupt.cancel();
        }
    });

    let findings = Drivers::from_settings(settings)
        .run(&params, &control, &ignore_progress)
        .await?;
    println!("{}", serde_json::to_string_pretty(&findings)?);
    Ok(())
}

async fn run_as_job(settings: &Settings, params: ScanParams) -> Result<()> {
    let app = ReconApp::new(MemoryJobStore::new(), settings);
    let job = app.submit(params).await?;
    eprintln!("job {} {}", job.id, job.state);

    let finished = app.wait(job.id);
    tokio::pin!(finished);
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = &mut finished => break,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("job {} cancelling", job.id);
                app.cancel(job.id);
            }
            _ = ticker.tick() => {
                if let Some(current) = app.job(job.id).await? {
                    eprintln!("job {} {} {}%", current.id, current.state, current.progress);
                }
            }
        }
    }

    let record = app
        .job(job.id)
        .await?
        .ok_or_else(|| eyre!("job {} disappeared", job.id))?;
    let findings: Vec<_> = app
        .findings(job.id)
        .await?
        .into_iter()
        .map(|row| row.data)
        .collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "job": record, "findings": findings }))?
    );

    if record.state == JobState::Failed {
        return Err(eyre!("job {} failed; see the log for details", record.id));
    }
    Ok(())
}
