//! Fetch Coordinator
//!
//! Owns the request lifecycle for one trigger: composes the request URL
//! from the stored cursor plus allow-listed query state, enforces
//! single-flight per instance, runs the normalizer and merge engine, and
//! settles the instance back to `Idle`, `Error`, or `Exhausted`. All
//! failures are absorbed here; none escape to the embedder.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Url};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::LoaderConfig;
use crate::error::LoaderError;
use crate::events::{EventBus, LoaderEvent};
use crate::merge;
use crate::normalize::normalize;
use crate::state::{ListInstance, LoadPhase, Sentinel};

const USER_AGENT: &str = "catalog-loader/0.2";

/// A fetched response body plus its status, before any interpretation.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    pub body: String,
}

/// Source of page bodies. The production implementation is HTTP; tests
/// inject scripted responses.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, LoaderError>;
}

/// HTTP-backed fetcher.
pub struct HttpPageFetcher {
    client: Client,
}

impl HttpPageFetcher {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for HttpPageFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, LoaderError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| LoaderError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| LoaderError::Transport(e.to_string()))?;
        Ok(FetchedPage { status, body })
    }
}

/// What caused a trigger: the sentinel scrolling into view, or the user
/// explicitly asking for more. Only the explicit path may retry out of a
/// recoverable error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    SentinelVisible,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The instance was not idle (in flight, errored, or exhausted).
    NotIdle,
    /// No locator is available to fetch.
    NoCursor,
    /// The monitor is disarmed and no longer forwards signals.
    Disarmed,
}

/// Result of one trigger, reported to the lifecycle layer so it can
/// re-arm or disarm the monitor and notify collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    /// No request was issued.
    Skipped(SkipReason),
    /// Units were merged. `exhausted` marks the final page.
    Appended {
        count: usize,
        cursor: Option<String>,
        exhausted: bool,
    },
    /// The response carried a locator but zero units; terminated
    /// defensively instead of looping.
    EmptyPage,
    /// The fetch failed. Terminal failures permanently disarm the trigger.
    Failed { terminal: bool },
    /// The response settled under a stale epoch and was discarded.
    Stale,
}

pub struct FetchCoordinator {
    fetcher: Arc<dyn PageFetcher>,
    config: Arc<LoaderConfig>,
    events: Arc<EventBus>,
}

impl FetchCoordinator {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        config: Arc<LoaderConfig>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            fetcher,
            config,
            events,
        }
    }

    /// Run one load cycle for the instance. The check-then-transition into
    /// `Fetching` happens under the instance lock, so concurrent triggers
    /// collapse to a single request; the lock is released across the
    /// network await and re-taken to settle.
    pub async fn trigger(
        &self,
        instance: &Arc<Mutex<ListInstance>>,
        page_address: &str,
        kind: TriggerKind,
    ) -> TriggerOutcome {
        let (epoch, url) = {
            let mut inst = instance.lock().await;
            if kind == TriggerKind::Manual {
                inst.state.clear_error();
            }
            if inst.state.phase() != LoadPhase::Idle {
                debug!(container = %inst.container.id, phase = ?inst.state.phase(), "trigger skipped");
                return TriggerOutcome::Skipped(SkipReason::NotIdle);
            }
            let cursor = match inst.state.cursor() {
                Some(c) => c.to_string(),
                None => return TriggerOutcome::Skipped(SkipReason::NoCursor),
            };
            let url = match compose_request_url(
                &cursor,
                page_address,
                inst.section_id.as_deref(),
                &self.config,
            ) {
                Ok(url) => url,
                Err(e) => return self.fail(&mut inst, e),
            };
            let epoch = match inst.state.mark_fetching() {
                Some(epoch) => epoch,
                None => return TriggerOutcome::Skipped(SkipReason::NotIdle),
            };
            (epoch, url)
        };

        info!(%url, "loading next page");
        let result =
            tokio::time::timeout(self.config.request_timeout, self.fetcher.fetch(&url)).await;

        let mut inst = instance.lock().await;
        if inst.state.epoch() != epoch {
            debug!(container = %inst.container.id, "discarding response from a stale epoch");
            return TriggerOutcome::Stale;
        }
        match result {
            Err(_) => self.fail(&mut inst, LoaderError::Timeout(self.config.request_timeout)),
            Ok(Err(e)) => self.fail(&mut inst, e),
            Ok(Ok(page)) if !(200..300).contains(&page.status) => {
                self.fail(&mut inst, LoaderError::Status(page.status))
            }
            Ok(Ok(page)) => self.settle(&mut inst, &page.body),
        }
    }

    fn settle(&self, inst: &mut ListInstance, body: &str) -> TriggerOutcome {
        let descriptor = match normalize(body, inst.section_id.as_deref(), &self.config) {
            Ok(d) => d,
            Err(e) => return self.fail(inst, e),
        };
        let container = inst.container.id.clone();

        if descriptor.units.is_empty() {
            debug!(%container, "response carried no units, treating as exhausted");
            inst.state.mark_exhausted();
            inst.sentinel = None;
            self.events.publish(LoaderEvent::Exhausted { container });
            return TriggerOutcome::EmptyPage;
        }

        let count = merge::merge(
            &mut inst.container,
            descriptor.units,
            &self.config.strip_classes,
        );
        inst.state.record_merged(count);
        inst.state.reconcile_counters(
            descriptor.counters.current_page,
            descriptor.counters.total_pages,
            descriptor.counters.total_units,
        );
        let mut phase = inst.state.advance(descriptor.next_locator);
        // The response may have revised the counters; when they now rule
        // out further pages, a leftover next locator does not keep the
        // instance alive.
        if phase == LoadPhase::Idle && inst.state.counters_exhausted() {
            debug!(%container, "counters rule out further pages, treating as exhausted");
            inst.state.mark_exhausted();
            phase = LoadPhase::Exhausted;
        }
        let cursor = inst.state.cursor().map(|s| s.to_string());

        if phase == LoadPhase::Idle {
            inst.sentinel = cursor.as_ref().map(|next| Sentinel {
                next_locator: next.clone(),
                current_page: inst.state.current_page,
                total_pages: inst.state.total_pages,
            });
            self.events.publish(LoaderEvent::UnitsAppended {
                container,
                count,
                cursor: cursor.clone(),
            });
            TriggerOutcome::Appended {
                count,
                cursor,
                exhausted: false,
            }
        } else {
            inst.sentinel = None;
            self.events.publish(LoaderEvent::UnitsAppended {
                container: container.clone(),
                count,
                cursor: None,
            });
            self.events.publish(LoaderEvent::Exhausted { container });
            TriggerOutcome::Appended {
                count,
                cursor: None,
                exhausted: true,
            }
        }
    }

    fn fail(&self, inst: &mut ListInstance, error: LoaderError) -> TriggerOutcome {
        let terminal = error.is_terminal();
        warn!(container = %inst.container.id, %error, terminal, "load failed");
        inst.state.mark_error(terminal);
        if terminal {
            inst.sentinel = None;
        }
        self.events.publish(LoaderEvent::LoadFailed {
            container: inst.container.id.clone(),
            message: error.to_string(),
            retryable: !terminal,
            notice_ttl_ms: self.config.notice_ttl.as_millis() as u64,
        });
        TriggerOutcome::Failed { terminal }
    }
}

/// Build the request URL: resolve the cursor against the page address,
/// copy allow-listed query state from the current address (never the page
/// or cursor keys, which the coordinator owns), and request a narrowed
/// section body when the section identity is known.
pub fn compose_request_url(
    cursor: &str,
    page_address: &str,
    section_id: Option<&str>,
    config: &LoaderConfig,
) -> Result<String, LoaderError> {
    let cursor = cursor.trim();
    if cursor.is_empty() {
        return Err(LoaderError::InvalidLocator {
            locator: cursor.to_string(),
            reason: "empty locator".to_string(),
        });
    }
    let page_url = Url::parse(page_address).map_err(|e| LoaderError::InvalidLocator {
        locator: cursor.to_string(),
        reason: format!("unparsable page address {:?}: {}", page_address, e),
    })?;

    // A bare page number targets the current path; a URL cursor (absolute
    // or root-relative) is resolved against the page origin.
    let (mut base, mut pairs): (Url, Vec<(String, String)>) =
        if let Ok(page_no) = cursor.parse::<u32>() {
            let mut url = page_url.clone();
            url.set_query(None);
            (url, vec![(config.page_param.clone(), page_no.to_string())])
        } else {
            let joined = page_url.join(cursor).map_err(|e| LoaderError::InvalidLocator {
                locator: cursor.to_string(),
                reason: e.to_string(),
            })?;
            let pairs = joined
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            let mut url = joined;
            url.set_query(None);
            (url, pairs)
        };

    for (key, value) in page_url.query_pairs() {
        if config.is_passthrough_key(&key) {
            set_pair(&mut pairs, key.into_owned(), value.into_owned());
        }
    }
    if let Some(section) = section_id {
        set_pair(&mut pairs, config.section_param.clone(), section.to_string());
    }
    base.set_fragment(None);

    if pairs.is_empty() {
        return Ok(base.to_string());
    }
    let query: Vec<String> = pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect();
    Ok(format!("{}?{}", base, query.join("&")))
}

/// Set semantics: replace an existing key in place, else append.
fn set_pair(pairs: &mut Vec<(String, String)>, key: String, value: String) {
    match pairs.iter_mut().find(|(k, _)| *k == key) {
        Some(pair) => pair.1 = value,
        None => pairs.push((key, value)),
    }
}
