use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, timeout_at};

use super::SERVICE_ROOT;
use super::builder;
use super::client::Client;
use super::normalize::Normalizer;
use super::record::Record;
use super::session::{SessionCache, SessionHandle};
use super::walker::{self, WalkOptions};
use crate::config::{Config, Credentials};
use crate::http::HttpClient;
use crate::metric::Metric;

pub const UP: &str = "redfish_up";
pub const RESPONSE_DURATION: &str = "redfish_response_duration_seconds";
pub const SCRAPE_DURATION: &str = "redfish_scrape_duration_seconds";

/// Which metrics a scrape reports. The same resources are fetched for
/// every profile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Profile {
    Health,
    Firmware,
    Performance,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Health => "health",
            Profile::Firmware => "firmware",
            Profile::Performance => "performance",
        }
    }

    pub fn accepts(&self, record: &Record) -> bool {
        match self {
            Profile::Health => matches!(
                record,
                Record::Health(_)
                    | Record::MemoryErrors(_)
                    | Record::PowerState(_)
                    | Record::Firmware(_)
                    | Record::SystemInfo(_)
                    | Record::Version(_)
            ),
            Profile::Firmware => matches!(record, Record::Firmware(_) | Record::Version(_)),
            Profile::Performance => matches!(
                record,
                Record::Power(_) | Record::Temperature(_) | Record::Fan(_)
            ),
        }
    }
}

/// Steps of one scrape. `Done` and `Failed` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrapeState {
    Authenticating,
    Probing,
    Walking,
    Normalizing,
    Building,
    Done,
    Failed,
}

#[derive(Clone, Debug)]
pub struct ScrapeOptions {
    /// Timeout of a single request, capped by the scrape deadline.
    pub fetch_timeout: Duration,

    pub walk: WalkOptions,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        ScrapeOptions {
            fetch_timeout: Duration::from_secs(10),
            walk: WalkOptions::default(),
        }
    }
}

impl From<&Config> for ScrapeOptions {
    fn from(config: &Config) -> Self {
        ScrapeOptions {
            fetch_timeout: config.fetch_timeout,
            walk: WalkOptions {
                concurrency: config.concurrency,
                ..Default::default()
            },
        }
    }
}

/// Scrapes targets. Cheap to share, all scrapes use the same session
/// cache.
pub struct Scraper {
    http: HttpClient,
    cache: Arc<SessionCache>,
    credentials: Credentials,
    options: ScrapeOptions,
}

impl Scraper {
    pub fn new(
        http: HttpClient,
        cache: Arc<SessionCache>,
        credentials: Credentials,
        options: ScrapeOptions,
    ) -> Self {
        Scraper {
            http,
            cache,
            credentials,
            options,
        }
    }

    #[inline]
    pub fn cache(&self) -> &Arc<SessionCache> {
        &self.cache
    }

    /// Scrape `target` within `timeout`. Never fails: when the target
    /// cannot be authenticated against, or its service root does not
    /// answer, `redfish_up` is 0 and no other facts are reported. Every
    /// metric carries a `target` label.
    pub async fn scrape(&self, target: &str, timeout: Duration, profile: Profile) -> Vec<Metric> {
        let (_state, metrics) = self.run(target, timeout, profile).await;
        metrics
    }

    /// Like [`Scraper::scrape`], also returning the state the scrape ended
    /// in, either `Done` or `Failed`.
    pub async fn run(
        &self,
        target: &str,
        timeout: Duration,
        profile: Profile,
    ) -> (ScrapeState, Vec<Metric>) {
        let start = Instant::now();
        let deadline = start + timeout;

        let (state, response, mut metrics) = self.collect(target, deadline, profile).await;

        metrics.push(Metric::gauge(
            UP,
            "Whether the Redfish service answered and accepted the credentials",
            if state == ScrapeState::Done { 1 } else { 0 },
        ));
        if let Some(response) = response {
            metrics.push(Metric::gauge(
                RESPONSE_DURATION,
                "Latency of the first service root response",
                response.as_secs_f64(),
            ));
        }
        metrics.push(Metric::gauge(
            SCRAPE_DURATION,
            "Duration of the whole scrape",
            start.elapsed().as_secs_f64(),
        ));

        metrics
            .iter_mut()
            .for_each(|metric| metric.insert_tag("target", target));

        (state, metrics)
    }

    async fn collect(
        &self,
        target: &str,
        deadline: Instant,
        profile: Profile,
    ) -> (ScrapeState, Option<Duration>, Vec<Metric>) {
        let timeout = deadline.saturating_duration_since(Instant::now());
        let client = Client::new(
            self.http.clone(),
            target,
            self.options.fetch_timeout.min(timeout),
        );

        enter(target, ScrapeState::Authenticating);
        let session = match timeout_at(
            deadline,
            SessionHandle::open(
                Arc::clone(&self.cache),
                client,
                self.credentials.clone(),
            ),
        )
        .await
        {
            Ok(Ok(session)) => Arc::new(session),
            Ok(Err(err)) => {
                warn!(message = "Authentication failed", target, %err);
                enter(target, ScrapeState::Failed);
                return (ScrapeState::Failed, err.response(), vec![]);
            }
            Err(_) => {
                warn!(message = "Authentication timed out", target);
                enter(target, ScrapeState::Failed);
                return (ScrapeState::Failed, None, vec![]);
            }
        };

        enter(target, ScrapeState::Probing);
        let started = Instant::now();
        let response = match timeout_at(deadline, session.get(SERVICE_ROOT)).await {
            Ok(Ok(_)) => started.elapsed(),
            Ok(Err(err)) => {
                warn!(message = "Service root request failed", target, %err);
                enter(target, ScrapeState::Failed);
                // a status code is still an answer
                let response = (!err.is_transport()).then(|| started.elapsed());
                return (ScrapeState::Failed, response, vec![]);
            }
            Err(_) => {
                warn!(message = "Service root request timed out", target);
                enter(target, ScrapeState::Failed);
                return (ScrapeState::Failed, None, vec![]);
            }
        };

        enter(target, ScrapeState::Walking);
        let nodes = match walker::walk(session, deadline, &self.options.walk).await {
            Ok(walk) => {
                if walk.truncated {
                    warn!(
                        message = "Scrape deadline reached, reporting partial data",
                        target,
                        fetched = walk.nodes.len(),
                    );
                }
                if !walk.skipped.is_empty() {
                    debug!(
                        message = "Resources skipped",
                        target,
                        count = walk.skipped.len(),
                    );
                }

                walk.nodes
            }
            Err(err) => {
                warn!(message = "Walk resources failed", target, %err);
                vec![]
            }
        };

        enter(target, ScrapeState::Normalizing);
        let normalizer = Normalizer::detect(&nodes);
        let records = normalizer
            .normalize_all(&nodes)
            .into_iter()
            .filter(|record| profile.accepts(record))
            .collect::<Vec<_>>();

        enter(target, ScrapeState::Building);
        let metrics = builder::build(&records);

        enter(target, ScrapeState::Done);
        debug!(
            message = "Scrape finished",
            target,
            profile = profile.as_str(),
            vendor = normalizer.vendor().as_str(),
            resources = nodes.len(),
            records = records.len(),
            metrics = metrics.len(),
        );

        (ScrapeState::Done, Some(response), metrics)
    }
}

#[inline]
fn enter(target: &str, state: ScrapeState) {
    trace!(message = "Scrape state changed", target, ?state);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redfish::record::{FanRecord, FirmwareRecord, VersionRecord};

    #[test]
    fn profiles() {
        let firmware = Record::Firmware(FirmwareRecord {
            component: "BIOS".into(),
            version: "1.0".into(),
            source: String::new(),
        });
        let version = Record::Version(VersionRecord {
            version: "1.6.0".into(),
            source: String::new(),
        });
        let fan = Record::Fan(FanRecord {
            rpm: Some(1.0),
            pwm: None,
            legacy: false,
            source: String::new(),
        });

        assert!(Profile::Health.accepts(&firmware));
        assert!(Profile::Health.accepts(&version));
        assert!(!Profile::Health.accepts(&fan));
        assert!(Profile::Firmware.accepts(&firmware));
        assert!(!Profile::Firmware.accepts(&fan));
        assert!(Profile::Performance.accepts(&fan));
        assert!(!Profile::Performance.accepts(&version));
    }

    #[test]
    fn options_from_config() {
        let config = Config {
            fetch_timeout: Duration::from_secs(3),
            concurrency: 2,
            ..Default::default()
        };

        let options = ScrapeOptions::from(&config);
        assert_eq!(options.fetch_timeout, Duration::from_secs(3));
        assert_eq!(options.walk.concurrency, 2);
        assert_eq!(options.walk.max_depth, walker::DEFAULT_MAX_DEPTH);
    }
}
