//! Lifecycle Manager
//!
//! Binds loaders to containers discovered in markup, keeps bind/rebind
//! idempotent so repeated scans never stack observers, and tears down
//! stale instances when a container is structurally replaced. This is the
//! embedder-facing surface: it routes viewport signals to the fetch
//! coordinator and dispatches the post-merge collaborator hook.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::LoaderConfig;
use crate::error::LoaderError;
use crate::events::{EventBus, LoaderEvent};
use crate::fetch::{FetchCoordinator, PageFetcher, SkipReason, TriggerOutcome};
use crate::markup::{self, Element, Locator};
use crate::merge::{self, ContentUnit, ListContainer, RawUnit};
use crate::monitor::{ViewportSignal, VisibilityMonitor};
use crate::state::{ListInstance, LoadPhase, PaginationState, Sentinel};

/// Collaborator hook for dependent visual behaviors (lazy images,
/// entrance animations, per-card layout). Called once per merge with the
/// batch of newly inserted units, after they are in the live model.
pub trait ContentObserver: Send + Sync {
    fn on_content_appended(&self, container: &str, units: &[ContentUnit]);

    fn on_exhausted(&self, _container: &str) {}
}

struct BoundInstance {
    instance: Arc<Mutex<ListInstance>>,
    monitor: VisibilityMonitor,
}

/// The loader facade: one per page. Owns bound instances keyed by
/// container identity, the event bus, and the fetch coordinator.
pub struct CatalogLoader {
    config: Arc<LoaderConfig>,
    coordinator: FetchCoordinator,
    events: Arc<EventBus>,
    page_address: String,
    bound: HashMap<String, BoundInstance>,
    observers: Vec<Arc<dyn ContentObserver>>,
}

impl CatalogLoader {
    pub fn new(page_address: impl Into<String>, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self::with_config(page_address, fetcher, LoaderConfig::default())
    }

    pub fn with_config(
        page_address: impl Into<String>,
        fetcher: Arc<dyn PageFetcher>,
        config: LoaderConfig,
    ) -> Self {
        let config = Arc::new(config);
        let events = Arc::new(EventBus::new());
        Self {
            coordinator: FetchCoordinator::new(fetcher, config.clone(), events.clone()),
            config,
            events,
            page_address: page_address.into(),
            bound: HashMap::new(),
            observers: Vec::new(),
        }
    }

    pub fn add_observer(&mut self, observer: Arc<dyn ContentObserver>) {
        self.observers.push(observer);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<LoaderEvent> {
        self.events.subscribe()
    }

    pub fn page_address(&self) -> &str {
        &self.page_address
    }

    /// Update the page address the allow-listed query state is copied
    /// from, e.g. after the embedder navigated filters in place.
    pub fn set_page_address(&mut self, page_address: impl Into<String>) {
        self.page_address = page_address.into();
    }

    pub fn is_bound(&self, container_id: &str) -> bool {
        self.bound.contains_key(container_id)
    }

    pub fn bound_count(&self) -> usize {
        self.bound.len()
    }

    /// Discover qualifying containers in `markup` and bind each unbound
    /// one. Already-bound identities are left untouched, so the scan may
    /// be repeated (and may cover only a subtree) without stacking
    /// observers. Returns the number of newly bound containers.
    pub fn scan(&mut self, markup: &str) -> usize {
        let discovered = self.discover(markup);
        let mut bound = 0;
        for (id, container, sentinel) in discovered {
            if self.bound.contains_key(&id) {
                debug!(container = %id, "already bound, scan skipped");
                continue;
            }
            let entry = self.bind(markup, &id, &container, sentinel.as_ref());
            self.bound.insert(id.clone(), entry);
            self.events.publish(LoaderEvent::Bound { container: id });
            bound += 1;
        }
        bound
    }

    /// Re-bind containers after a structural replacement (e.g. a filter
    /// change swapped the grid markup). Bound identities found in the new
    /// markup are torn down, with their epoch bumped so an in-flight
    /// response is discarded, and bound fresh from the new initial
    /// state; unbound identities are bound as in `scan`.
    pub async fn rebind(&mut self, markup: &str) -> usize {
        let discovered = self.discover(markup);
        let mut rebound = 0;
        for (id, container, sentinel) in discovered {
            let replaced = self.release(&id).await;
            let entry = self.bind(markup, &id, &container, sentinel.as_ref());
            self.bound.insert(id.clone(), entry);
            if replaced {
                info!(container = %id, "rebound after structural replacement");
                self.events.publish(LoaderEvent::Rebound { container: id });
            } else {
                self.events.publish(LoaderEvent::Bound { container: id });
            }
            rebound += 1;
        }
        rebound
    }

    /// Tear down one bound instance: disarm its monitor and invalidate any
    /// in-flight request. Returns whether an instance was released.
    pub async fn release(&mut self, container_id: &str) -> bool {
        match self.bound.remove(container_id) {
            Some(entry) => {
                entry.instance.lock().await.state.bump_epoch();
                true
            }
            None => false,
        }
    }

    /// Route a viewport signal to the fetch coordinator and apply the
    /// outcome to the monitor and collaborators.
    pub async fn signal(
        &mut self,
        container_id: &str,
        signal: ViewportSignal,
    ) -> Result<TriggerOutcome, LoaderError> {
        let (instance, accepted, armed) = {
            let entry = self
                .bound
                .get(container_id)
                .ok_or_else(|| LoaderError::UnknownInstance(container_id.to_string()))?;
            let guard = entry.instance.lock().await;
            let accepted =
                entry
                    .monitor
                    .accept(signal, guard.state.phase(), guard.state.is_retryable());
            (entry.instance.clone(), accepted, entry.monitor.is_armed())
        };
        let kind = match accepted {
            Some(kind) => kind,
            None if !armed => return Ok(TriggerOutcome::Skipped(SkipReason::Disarmed)),
            None => return Ok(TriggerOutcome::Skipped(SkipReason::NotIdle)),
        };

        let outcome = self
            .coordinator
            .trigger(&instance, &self.page_address, kind)
            .await;
        self.apply_outcome(container_id, &instance, &outcome).await;
        Ok(outcome)
    }

    /// Cloned view of a bound container's merged units.
    pub async fn snapshot(&self, container_id: &str) -> Option<Vec<ContentUnit>> {
        let entry = self.bound.get(container_id)?;
        Some(entry.instance.lock().await.container.units().to_vec())
    }

    pub async fn phase(&self, container_id: &str) -> Option<LoadPhase> {
        let entry = self.bound.get(container_id)?;
        Some(entry.instance.lock().await.state.phase())
    }

    async fn apply_outcome(
        &mut self,
        container_id: &str,
        instance: &Arc<Mutex<ListInstance>>,
        outcome: &TriggerOutcome,
    ) {
        match outcome {
            TriggerOutcome::Appended {
                count, exhausted, ..
            } => {
                let appended: Vec<ContentUnit> = {
                    let guard = instance.lock().await;
                    let units = guard.container.units();
                    units[units.len() - count..].to_vec()
                };
                for observer in &self.observers {
                    observer.on_content_appended(container_id, &appended);
                }
                if let Some(entry) = self.bound.get_mut(container_id) {
                    if *exhausted {
                        entry.monitor.disarm();
                    } else {
                        // Re-observe the replacement sentinel.
                        entry.monitor.arm();
                    }
                }
                if *exhausted {
                    for observer in &self.observers {
                        observer.on_exhausted(container_id);
                    }
                }
            }
            TriggerOutcome::EmptyPage => {
                if let Some(entry) = self.bound.get_mut(container_id) {
                    entry.monitor.disarm();
                }
                for observer in &self.observers {
                    observer.on_exhausted(container_id);
                }
            }
            TriggerOutcome::Failed { terminal: true } => {
                if let Some(entry) = self.bound.get_mut(container_id) {
                    entry.monitor.disarm();
                }
            }
            _ => {}
        }
    }

    /// Qualifying containers in document order, each with its identity and
    /// its associated sentinel element. The sentinel is searched inside
    /// the container first, then between this container and the next one.
    fn discover(&self, markup: &str) -> Vec<(String, Element, Option<Element>)> {
        let marker = Locator::Attr(&self.config.loading_marker_attr, &self.config.loading_marker);
        let containers = markup::find_all_in(markup, 0..markup.len(), &marker);
        let sentinel_locator = Locator::Class(&self.config.sentinel_class);
        containers
            .iter()
            .enumerate()
            .map(|(idx, el)| {
                let id = el
                    .id()
                    .or_else(|| el.attr(&self.config.section_id_attr))
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("list-{}", idx));
                let sentinel = markup::find_first_in(markup, el.inner.clone(), &sentinel_locator)
                    .or_else(|| {
                        let until = containers
                            .get(idx + 1)
                            .map(|next| next.span.start)
                            .unwrap_or(markup.len());
                        markup::find_first_in(markup, el.span.end..until, &sentinel_locator)
                    });
                (id, el.clone(), sentinel)
            })
            .collect()
    }

    fn bind(
        &self,
        markup: &str,
        id: &str,
        container_el: &Element,
        sentinel_el: Option<&Element>,
    ) -> BoundInstance {
        let section_id = container_el
            .attr(&self.config.section_id_attr)
            .map(|s| s.to_string());

        let mut container = ListContainer::new(id);
        let initial: Vec<RawUnit> = markup::find_all_in(
            markup,
            container_el.inner.clone(),
            &Locator::Class(&self.config.unit_class),
        )
        .into_iter()
        .map(|el| RawUnit {
            server_id: el
                .attr(&self.config.unit_id_attr)
                .or_else(|| el.id())
                .map(|s| s.to_string()),
            html: el.outer_html(markup).to_string(),
        })
        .collect();
        let seeded = merge::merge(&mut container, initial, &[]);

        let sentinel = sentinel_el.and_then(|el| {
            let next = el
                .attr(&self.config.next_locator_attr)
                .map(str::trim)
                .filter(|s| !s.is_empty())?;
            Some(Sentinel {
                next_locator: next.to_string(),
                current_page: parse_counter(el.attr(&self.config.current_page_attr)),
                total_pages: parse_counter(el.attr(&self.config.total_pages_attr)),
            })
        });

        let mut state =
            PaginationState::new(sentinel.as_ref().map(|s| s.next_locator.clone()));
        state.record_merged(seeded);
        // Sentinel counters fill in first; container counters win.
        if let Some(s) = &sentinel {
            state.reconcile_counters(s.current_page, s.total_pages, None);
        }
        state.reconcile_counters(
            parse_counter(container_el.attr(&self.config.current_page_attr)),
            parse_counter(container_el.attr(&self.config.total_pages_attr)),
            parse_counter(container_el.attr(&self.config.total_units_attr)).map(|n| n as usize),
        );
        let born_exhausted = state.cursor().is_none() || state.counters_exhausted();
        if born_exhausted {
            state.mark_exhausted();
        }
        debug!(
            container = %id,
            seeded,
            exhausted = born_exhausted,
            "bound container"
        );

        BoundInstance {
            instance: Arc::new(Mutex::new(ListInstance::new(
                container,
                if born_exhausted { None } else { sentinel },
                state,
                section_id,
            ))),
            monitor: if born_exhausted {
                VisibilityMonitor::disarmed()
            } else {
                VisibilityMonitor::armed()
            },
        }
    }
}

fn parse_counter(raw: Option<&str>) -> Option<u32> {
    raw?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchedPage, TriggerKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticFetcher {
        body: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PageFetcher for StaticFetcher {
        async fn fetch(&self, _url: &str) -> Result<FetchedPage, LoaderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FetchedPage {
                status: 200,
                body: self.body.clone(),
            })
        }
    }

    fn fetcher(body: &str) -> Arc<StaticFetcher> {
        Arc::new(StaticFetcher {
            body: body.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    fn initial_markup() -> String {
        r#"<div class="collection">
            <ul id="main-grid" class="product-grid" data-loading-type="infinite_scroll"
                data-section-id="collection-main" data-current-page="1" data-total-pages="3">
              <li class="grid__item" data-product-id="p1">one</li>
              <li class="grid__item" data-product-id="p2">two</li>
            </ul>
            <div class="infinite-scroll-trigger" data-next-url="/collections/all?page=2"></div>
        </div>"#
            .to_string()
    }

    fn loader(body: &str) -> CatalogLoader {
        CatalogLoader::new("https://shop.example/collections/all", fetcher(body))
    }

    #[tokio::test]
    async fn test_scan_binds_and_seeds_initial_units() {
        let mut loader = loader("");
        assert_eq!(loader.scan(&initial_markup()), 1);
        assert!(loader.is_bound("main-grid"));
        let units = loader.snapshot("main-grid").await.unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(loader.phase("main-grid").await, Some(LoadPhase::Idle));
    }

    #[tokio::test]
    async fn test_repeated_scan_is_idempotent() {
        let mut loader = loader("");
        let markup = initial_markup();
        assert_eq!(loader.scan(&markup), 1);
        assert_eq!(loader.scan(&markup), 0);
        assert_eq!(loader.bound_count(), 1);
    }

    #[tokio::test]
    async fn test_container_without_marker_is_ignored() {
        let mut loader = loader("");
        let markup = r#"<ul class="product-grid"><li class="grid__item">x</li></ul>"#;
        assert_eq!(loader.scan(markup), 0);
    }

    #[tokio::test]
    async fn test_bind_on_last_page_is_born_exhausted() {
        let mut loader = loader("");
        let markup = r#"<ul id="g" class="product-grid" data-loading-type="infinite_scroll"
            data-current-page="3" data-total-pages="3">
            <li class="grid__item">x</li></ul>
            <div class="infinite-scroll-trigger" data-next-url="/collections/all?page=4"></div>"#;
        loader.scan(markup);
        assert_eq!(loader.phase("g").await, Some(LoadPhase::Exhausted));
        let outcome = loader.signal("g", ViewportSignal::SentinelVisible).await.unwrap();
        assert_eq!(outcome, TriggerOutcome::Skipped(SkipReason::Disarmed));
    }

    #[tokio::test]
    async fn test_bind_without_sentinel_is_born_exhausted() {
        let mut loader = loader("");
        let markup = r#"<ul id="g" class="product-grid" data-loading-type="infinite_scroll">
            <li class="grid__item">x</li></ul>"#;
        loader.scan(markup);
        assert_eq!(loader.phase("g").await, Some(LoadPhase::Exhausted));
    }

    #[tokio::test]
    async fn test_signal_unknown_container_errors() {
        let mut loader = loader("");
        let err = loader
            .signal("ghost", ViewportSignal::SentinelVisible)
            .await
            .unwrap_err();
        assert!(matches!(err, LoaderError::UnknownInstance(_)));
    }

    #[tokio::test]
    async fn test_signal_fetches_and_notifies_observers() {
        struct Recorder {
            appended: std::sync::Mutex<Vec<(String, usize)>>,
            exhausted: AtomicUsize,
        }
        impl ContentObserver for Recorder {
            fn on_content_appended(&self, container: &str, units: &[ContentUnit]) {
                self.appended
                    .lock()
                    .unwrap()
                    .push((container.to_string(), units.len()));
            }
            fn on_exhausted(&self, _container: &str) {
                self.exhausted.fetch_add(1, Ordering::SeqCst);
            }
        }

        let body = r#"<ul class="product-grid">
            <li class="grid__item" data-product-id="p3">three</li>
            <li class="grid__item" data-product-id="p4">four</li>
        </ul>"#;
        let mut loader = loader(body);
        let recorder = Arc::new(Recorder {
            appended: std::sync::Mutex::new(Vec::new()),
            exhausted: AtomicUsize::new(0),
        });
        loader.add_observer(recorder.clone());
        loader.scan(&initial_markup());

        let outcome = loader
            .signal("main-grid", ViewportSignal::SentinelVisible)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            TriggerOutcome::Appended {
                count: 2,
                cursor: None,
                exhausted: true,
            }
        );
        assert_eq!(
            recorder.appended.lock().unwrap().as_slice(),
            &[("main-grid".to_string(), 2)]
        );
        assert_eq!(recorder.exhausted.load(Ordering::SeqCst), 1);
        // Exhausted instances never fetch again.
        let outcome = loader
            .signal("main-grid", ViewportSignal::SentinelVisible)
            .await
            .unwrap();
        assert_eq!(outcome, TriggerOutcome::Skipped(SkipReason::Disarmed));
    }

    #[tokio::test]
    async fn test_rebind_replaces_instance_and_bumps_epoch() {
        let mut loader = loader("");
        loader.scan(&initial_markup());
        let before = {
            let entry = loader.bound.get("main-grid").unwrap();
            let guard = entry.instance.lock().await;
            (entry.instance.clone(), guard.state.epoch())
        };

        let replaced = initial_markup().replace("page=2", "page=1");
        assert_eq!(loader.rebind(&replaced).await, 1);
        assert_eq!(loader.bound_count(), 1);

        // The old instance was invalidated; the new one starts fresh.
        assert!(before.0.lock().await.state.epoch() > before.1);
        let units = loader.snapshot("main-grid").await.unwrap();
        assert_eq!(units.len(), 2);
    }

    #[tokio::test]
    async fn test_release_unbinds() {
        let mut loader = loader("");
        loader.scan(&initial_markup());
        assert!(loader.release("main-grid").await);
        assert!(!loader.is_bound("main-grid"));
        assert!(!loader.release("main-grid").await);
    }

    #[test]
    fn test_trigger_kind_mapping_for_manual_signal() {
        // Explicit requests map to the manual trigger path.
        let monitor = VisibilityMonitor::armed();
        assert_eq!(
            monitor.accept(ViewportSignal::LoadMoreRequested, LoadPhase::Idle, true),
            Some(TriggerKind::Manual)
        );
    }
}
