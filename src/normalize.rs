//! Response Normalizer
//!
//! Parses a raw response body into content units plus a descriptor of how
//! to fetch the next page. The server answers in one of three shapes: a
//! full page document, a delegated section (itself possibly a full
//! document), or a bare fragment. The normalizer tolerates all three
//! without being told which one arrived; the section hint only narrows
//! where the sentinel is searched for.

use tracing::{debug, warn};

use crate::config::LoaderConfig;
use crate::error::LoaderError;
use crate::markup::{self, Locator};
use crate::merge::RawUnit;

/// Pagination counters read from the response. `None` fields were missing
/// or unparsable and the caller keeps its previous values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageCounters {
    pub current_page: Option<u32>,
    pub total_pages: Option<u32>,
    pub total_units: Option<usize>,
}

/// Result of normalization. An absent `next_locator` means the sequence is
/// exhausted.
#[derive(Debug, Clone)]
pub struct PageDescriptor {
    pub next_locator: Option<String>,
    pub units: Vec<RawUnit>,
    pub counters: PageCounters,
}

/// Normalize a response body. Fails only with `StructureNotFound`, which
/// is terminal for the instance; every other oddity degrades (missing
/// sentinel means exhaustion, bad counters keep previous values).
pub fn normalize(
    body: &str,
    section_hint: Option<&str>,
    config: &LoaderConfig,
) -> Result<PageDescriptor, LoaderError> {
    let wrapped;
    let (text, scope, shape) = if markup::is_document(body) {
        let scope = markup::body_range(body).unwrap_or(0..body.len());
        let shape = if section_hint.is_some() {
            "section document"
        } else {
            "full document"
        };
        (body, scope, shape)
    } else {
        wrapped = markup::wrap_fragment(body);
        (wrapped.as_str(), 0..wrapped.len(), "bare fragment")
    };

    // Ordered location strategies; the first match wins.
    let strategies: [(&str, Locator<'_>); 3] = [
        ("primary class", Locator::Class(&config.container_class)),
        ("fallback id", Locator::Id(&config.container_id)),
        ("generic class", Locator::Class(&config.generic_container_class)),
    ];
    let mut container = None;
    for (name, locator) in &strategies {
        if let Some(el) = markup::find_first_in(text, scope.clone(), locator) {
            debug!(shape, strategy = name, "located list container");
            container = Some(el);
            break;
        }
    }
    let container = container.ok_or_else(|| {
        let preview: String = body.chars().take(200).collect();
        warn!(shape, preview = %preview, "no location strategy matched a list container");
        LoaderError::StructureNotFound
    })?;

    let units: Vec<RawUnit> =
        markup::find_all_in(text, container.inner.clone(), &Locator::Class(&config.unit_class))
            .into_iter()
            .map(|el| RawUnit {
                server_id: el
                    .attr(&config.unit_id_attr)
                    .or_else(|| el.id())
                    .map(|s| s.to_string()),
                html: el.outer_html(text).to_string(),
            })
            .collect();

    // The sentinel may sit inside the container, inside the enclosing
    // section wrapper, or anywhere in the body, tried in that order.
    let sentinel_locator = Locator::Class(&config.sentinel_class);
    let sentinel = markup::find_first_in(text, container.inner.clone(), &sentinel_locator)
        .or_else(|| {
            markup::find_first_in(text, scope.clone(), &Locator::Class(&config.section_wrapper_class))
                .and_then(|wrapper| markup::find_first_in(text, wrapper.inner, &sentinel_locator))
        })
        .or_else(|| markup::find_first_in(text, scope.clone(), &sentinel_locator));

    let next_locator = sentinel
        .as_ref()
        .and_then(|el| el.attr(&config.next_locator_attr))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());

    let counters = PageCounters {
        current_page: counter_u32(&container, sentinel.as_ref(), &config.current_page_attr),
        total_pages: counter_u32(&container, sentinel.as_ref(), &config.total_pages_attr),
        total_units: counter_u32(&container, sentinel.as_ref(), &config.total_units_attr)
            .map(|n| n as usize),
    };

    debug!(
        units = units.len(),
        next = next_locator.as_deref().unwrap_or("<none>"),
        "normalized response"
    );
    Ok(PageDescriptor {
        next_locator,
        units,
        counters,
    })
}

/// Read a numeric counter from the container, falling back to the
/// sentinel. Unparsable values are logged and dropped rather than
/// surfaced as errors.
fn counter_u32(
    container: &markup::Element,
    sentinel: Option<&markup::Element>,
    attr: &str,
) -> Option<u32> {
    let raw = container
        .attr(attr)
        .or_else(|| sentinel.and_then(|el| el.attr(attr)))?;
    match raw.trim().parse::<u32>() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!(attr, value = raw, "unparsable pagination counter, keeping previous value");
            None
        }
    }
}
