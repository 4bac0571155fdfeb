//! Engine-wide configuration. No env/file loading lives here — the
//! surrounding application constructs one of these however it wants and
//! hands it to the engine, the way `crudkit_rs` takes its config as a plain
//! struct rather than reading it itself.

/// Tunables that apply across every entity, independent of any single
/// [`crate::meta::Meta`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hard ceiling on `list`'s `limit` parameter (spec §5, "Backpressure").
    pub default_list_limit: u64,
    /// Page size used when a `list` call omits `limit` entirely.
    pub default_page_size: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_list_limit: 500,
            default_page_size: 25,
        }
    }
}
