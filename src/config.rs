//! Loader Configuration
//!
//! Selector vocabulary, query allow-list, and timing knobs. The defaults
//! match the storefront markup this loader was built against; embedders
//! with a different vocabulary override the relevant fields.

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Attribute whose value opts a container into progressive loading.
    pub loading_marker_attr: String,
    /// Marker value that enables progressive loading.
    pub loading_marker: String,

    /// Primary class selector for the list container.
    pub container_class: String,
    /// Fallback id selector for the list container.
    pub container_id: String,
    /// Generic last-resort class selector for the list container.
    pub generic_container_class: String,
    /// Class of the section wrapper searched when a delegated response
    /// does not carry the sentinel inside the container itself.
    pub section_wrapper_class: String,

    /// Class that marks one content unit inside the container.
    pub unit_class: String,
    /// Attribute carrying a server-side unit identity.
    pub unit_id_attr: String,

    /// Class that marks the sentinel element.
    pub sentinel_class: String,
    /// Attribute on the sentinel carrying the next locator.
    pub next_locator_attr: String,

    /// Attribute carrying the current page counter.
    pub current_page_attr: String,
    /// Attribute carrying the total page counter.
    pub total_pages_attr: String,
    /// Attribute carrying the total unit count, when the server knows it.
    pub total_units_attr: String,
    /// Attribute carrying the section identity of a container.
    pub section_id_attr: String,

    /// Query keys copied verbatim from the page address into the request.
    pub passthrough_keys: Vec<String>,
    /// Query key prefixes copied from the page address into the request.
    pub passthrough_prefixes: Vec<String>,
    /// Query keys never copied from the page address; the cursor owns them.
    pub reserved_keys: Vec<String>,
    /// Query key used to request a single-section response body.
    pub section_param: String,
    /// Query key used when the cursor is a bare page number.
    pub page_param: String,

    /// Classes stripped from unit roots before merge so re-inserted markup
    /// does not restart entrance animations.
    pub strip_classes: Vec<String>,

    /// Hard deadline for one page fetch.
    pub request_timeout: Duration,
    /// How long the embedder should keep a failure notice visible.
    pub notice_ttl: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            loading_marker_attr: "data-loading-type".to_string(),
            loading_marker: "infinite_scroll".to_string(),
            container_class: "product-grid".to_string(),
            container_id: "product-grid".to_string(),
            generic_container_class: "grid".to_string(),
            section_wrapper_class: "collection".to_string(),
            unit_class: "grid__item".to_string(),
            unit_id_attr: "data-product-id".to_string(),
            sentinel_class: "infinite-scroll-trigger".to_string(),
            next_locator_attr: "data-next-url".to_string(),
            current_page_attr: "data-current-page".to_string(),
            total_pages_attr: "data-total-pages".to_string(),
            total_units_attr: "data-total-items".to_string(),
            section_id_attr: "data-section-id".to_string(),
            passthrough_keys: vec!["sort_by".to_string(), "q".to_string()],
            passthrough_prefixes: vec!["filter_".to_string()],
            reserved_keys: vec!["page".to_string(), "cursor".to_string()],
            section_param: "section_id".to_string(),
            page_param: "page".to_string(),
            strip_classes: vec!["scroll-trigger".to_string()],
            request_timeout: Duration::from_secs(10),
            notice_ttl: Duration::from_secs(5),
        }
    }
}

impl LoaderConfig {
    /// Whether a query key from the page address may be copied into a
    /// composed request. Reserved keys and the section/page params are
    /// owned by the coordinator and never copied.
    pub fn is_passthrough_key(&self, key: &str) -> bool {
        if key == self.section_param || key == self.page_param {
            return false;
        }
        if self.reserved_keys.iter().any(|k| k == key) {
            return false;
        }
        self.passthrough_keys.iter().any(|k| k == key)
            || self.passthrough_prefixes.iter().any(|p| key.starts_with(p.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_allow_list() {
        let config = LoaderConfig::default();
        assert!(config.is_passthrough_key("filter_color"));
        assert!(config.is_passthrough_key("filter_size"));
        assert!(config.is_passthrough_key("sort_by"));
        assert!(config.is_passthrough_key("q"));
        assert!(!config.is_passthrough_key("page"));
        assert!(!config.is_passthrough_key("cursor"));
        assert!(!config.is_passthrough_key("section_id"));
        assert!(!config.is_passthrough_key("utm_source"));
    }

    #[test]
    fn test_deserializes_with_partial_overrides() {
        let config: LoaderConfig =
            serde_json::from_str(r#"{"unit_class": "card", "passthrough_keys": ["order"]}"#)
                .unwrap();
        assert_eq!(config.unit_class, "card");
        assert!(config.is_passthrough_key("order"));
        assert_eq!(config.container_class, "product-grid");
    }
}
