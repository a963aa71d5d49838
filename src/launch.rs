use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use argh::FromArgs;
use exitcode::ExitCode;
use redfish_exporter::config::Config;
use redfish_exporter::http::HttpClient;
use redfish_exporter::redfish::{ScrapeOptions, Scraper, SessionCache};
use redfish_exporter::server::{self, AppState};
use redfish_exporter::{get_version, trace};
use tracing::{error, info, warn};

#[derive(FromArgs)]
#[argh(
    description = "Prometheus exporter for hardware health of Redfish managed servers",
    help_triggers("-h", "--help")
)]
pub struct RootCommand {
    #[argh(switch, short = 'v', description = "show version")]
    version: bool,

    #[argh(switch, short = 'd', description = "enable debug logging")]
    debug: bool,

    #[argh(
        option,
        short = 'l',
        long = "logging",
        description = "write logs to this file as well as to stderr"
    )]
    logging: Option<PathBuf>,
}

impl RootCommand {
    #![allow(clippy::print_stdout)]
    fn show_version(&self) {
        println!("redfish-exporter {}", get_version());
    }

    pub fn run(&self) -> Result<(), ExitCode> {
        if self.version {
            self.show_version();
            return Ok(());
        }

        trace::init(self.debug, self.logging.as_deref()).map_err(|err| {
            eprintln!("open log file failed: {err}");
            exitcode::CANTCREAT
        })?;

        let config = Config::from_env().map_err(|err| {
            error!(message = "Invalid configuration", %err);
            exitcode::CONFIG
        })?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("redfish-worker")
            .enable_io()
            .enable_time()
            .build()
            .map_err(|err| {
                error!(message = "Build tokio runtime failed", %err);
                exitcode::OSERR
            })?;

        runtime.block_on(async move {
            let cache = Arc::new(SessionCache::new(config.session_timeout));

            let scraper = match config.credentials.clone() {
                Some(credentials) => {
                    let http: HttpClient = HttpClient::new().map_err(|err| {
                        error!(message = "Build http client failed", %err);
                        exitcode::SOFTWARE
                    })?;

                    Some(Arc::new(Scraper::new(
                        http,
                        Arc::clone(&cache),
                        credentials,
                        ScrapeOptions::from(&config),
                    )))
                }
                None => {
                    warn!(
                        message = "USERNAME or PASSWORD is not set, scrape requests will be rejected"
                    );
                    None
                }
            };

            let listener = server::bind(config.listen).await.map_err(|err| {
                error!(message = "Start http server failed", %err);
                exitcode::UNAVAILABLE
            })?;

            info!(
                message = "Start redfish exporter",
                version = get_version(),
                listen = %config.listen,
                scrape_timeout = ?config.scrape_timeout,
                fetch_timeout = ?config.fetch_timeout,
                concurrency = config.concurrency,
            );

            let state = Arc::new(AppState {
                scraper,
                timeout: config.scrape_timeout,
            });

            server::serve(listener, state, shutdown_signal()).await;

            info!(message = "Shutdown signal received, logging out sessions");
            cache.logout_all().await;

            Ok::<(), ExitCode>(())
        })?;

        runtime.shutdown_timeout(Duration::from_secs(5));

        Ok(())
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(err) => {
            warn!(message = "Install SIGTERM handler failed", %err);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = terminate.recv() => {},
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
