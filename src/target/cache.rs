use strum_macros::Display;

/// How resolved method names are kept between queries.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Display)]
pub enum StringCaching {
    /// Resolve a name on every request.
    #[default]
    #[strum(serialize = "none")]
    None,
    /// Resolve every address, frames own their names. Same as `None` for a ptrace target.
    #[strum(serialize = "intern")]
    Intern,
    /// Remember the name of every resolved address.
    #[strum(serialize = "cache")]
    Cache,
}

/// Memory/speed trade-offs of an attach session.
///
/// Options are fixed at attach time, a session never changes them.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct CacheOptions {
    /// Keep parsed method tables (module symbol tables) for the whole session.
    pub cache_methods: bool,
    pub cache_method_names: StringCaching,
    /// Keep discovered stack roots.
    pub cache_stack_roots: bool,
    /// Keep complete stack traces per thread.
    pub cache_stack_traces: bool,
    /// Keep decoded runtime types.
    pub cache_types: bool,
    /// Prefer bulk OS facilities (`process_vm_readv`, file mappings) over word sized reads.
    pub use_os_memory_features: bool,
}

impl CacheOptions {
    /// Everything cached, OS memory features in use.
    pub fn enabled() -> Self {
        Self {
            cache_methods: true,
            cache_method_names: StringCaching::Cache,
            cache_stack_roots: true,
            cache_stack_traces: true,
            cache_types: true,
            use_os_memory_features: true,
        }
    }
}
