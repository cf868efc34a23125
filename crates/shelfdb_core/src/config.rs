//! Store configuration.

/// Default number of objects per fragment.
pub const DEFAULT_FRAGMENT_SIZE: usize = 1000;

/// Which codec new backing files are written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecKind {
    /// Compact CBOR files.
    #[default]
    Cbor,
    /// Pretty-printed JSON files.
    Json,
}

impl CodecKind {
    /// Codec name as understood by `shelfdb_codec::codec_by_name`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cbor => "cbor",
            Self::Json => "json",
        }
    }
}

/// Configuration for opening a store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the store directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Maximum number of objects per fragment of a fragmented class.
    pub fragment_size: usize,

    /// Whether a thread may own at most one open transaction.
    pub thread_bound_transactions: bool,

    /// Codec used for backing files.
    pub codec: CodecKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            thread_bound_transactions: true,
            codec: CodecKind::Cbor,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the fragment capacity. Zero is treated as one.
    #[must_use]
    pub const fn fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = if size == 0 { 1 } else { size };
        self
    }

    /// Sets whether transactions are bound to their thread.
    #[must_use]
    pub const fn thread_bound_transactions(mut self, value: bool) -> Self {
        self.thread_bound_transactions = value;
        self
    }

    /// Sets the codec for backing files.
    #[must_use]
    pub const fn codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }
}
