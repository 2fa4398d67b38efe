//! Pool configuration.

use crate::buffer::ExternalPool;
use crate::format::PoolCaps;
use std::sync::Arc;

/// Default number of passes over the slot array when searching for a free
/// encoder input buffer.
pub const DEFAULT_SEARCH_ROUNDS: usize = 3;

/// Optional features a pool can be asked to provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolOption {
    /// Attach [`VideoMeta`](crate::metadata::VideoMeta) to every buffer.
    VideoMeta,
}

impl PoolOption {
    /// Option name.
    pub const fn name(&self) -> &'static str {
        match self {
            PoolOption::VideoMeta => "video-meta",
        }
    }
}

/// Configuration negotiated before the pool starts.
///
/// # Example
///
/// ```rust
/// use portpool::format::{PixelFormat, PoolCaps, VideoInfo};
/// use portpool::pool::{PoolConfig, PoolOption};
///
/// let config = PoolConfig::new(PoolCaps::RawVideo(VideoInfo::new(PixelFormat::Nv12, 1920, 1080)))
///     .with_option(PoolOption::VideoMeta)
///     .with_buffer_count(4);
/// assert!(config.has_option(PoolOption::VideoMeta));
/// ```
#[derive(Clone)]
pub struct PoolConfig {
    caps: Option<PoolCaps>,
    buffer_count: Option<usize>,
    options: Vec<PoolOption>,
    borrowed: Option<Arc<dyn ExternalPool>>,
    search_rounds: usize,
}

impl PoolConfig {
    /// Configuration for the given caps.
    pub fn new(caps: PoolCaps) -> Self {
        Self {
            caps: Some(caps),
            ..Self::empty()
        }
    }

    /// Configuration without caps. Rejected by `configure`.
    pub fn empty() -> Self {
        Self {
            caps: None,
            buffer_count: None,
            options: Vec::new(),
            borrowed: None,
            search_rounds: DEFAULT_SEARCH_ROUNDS,
        }
    }

    /// Require an exact buffer count. Must match the port's slot count.
    pub fn with_buffer_count(mut self, count: usize) -> Self {
        self.buffer_count = Some(count);
        self
    }

    /// Enable an option.
    pub fn with_option(mut self, option: PoolOption) -> Self {
        if !self.options.contains(&option) {
            self.options.push(option);
        }
        self
    }

    /// Adopt one buffer per slot from an external pool instead of using
    /// the component's memory directly.
    pub fn with_borrowed_pool(mut self, pool: Arc<dyn ExternalPool>) -> Self {
        self.borrowed = Some(pool);
        self
    }

    /// Number of passes over the slot array an encoder input search makes
    /// before giving up. At least one.
    pub fn with_search_rounds(mut self, rounds: usize) -> Self {
        self.search_rounds = rounds.max(1);
        self
    }

    /// The caps, if set.
    pub fn caps(&self) -> Option<&PoolCaps> {
        self.caps.as_ref()
    }

    /// The requested buffer count, if set.
    pub fn buffer_count(&self) -> Option<usize> {
        self.buffer_count
    }

    /// Whether `option` is enabled.
    pub fn has_option(&self, option: PoolOption) -> bool {
        self.options.contains(&option)
    }

    /// Enabled options.
    pub fn options(&self) -> &[PoolOption] {
        &self.options
    }

    /// The external pool lending buffers, if any.
    pub fn borrowed_pool(&self) -> Option<&Arc<dyn ExternalPool>> {
        self.borrowed.as_ref()
    }

    /// Encoder search rounds.
    pub fn search_rounds(&self) -> usize {
        self.search_rounds
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for PoolConfig {
    fn eq(&self, other: &Self) -> bool {
        let same_borrowed = match (&self.borrowed, &other.borrowed) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        same_borrowed
            && self.caps == other.caps
            && self.buffer_count == other.buffer_count
            && self.search_rounds == other.search_rounds
            && self.options.len() == other.options.len()
            && self.options.iter().all(|o| other.options.contains(o))
    }
}

impl std::fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolConfig")
            .field("caps", &self.caps)
            .field("buffer_count", &self.buffer_count)
            .field("options", &self.options)
            .field("borrowed", &self.borrowed.as_ref().map(|p| p.name().to_owned()))
            .field("search_rounds", &self.search_rounds)
            .finish()
    }
}
