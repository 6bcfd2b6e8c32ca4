use crate::error::{Error, Result};

/// Default number of tasks held by one queue segment's ring buffer.
pub const DEFAULT_SEGMENT_CAPACITY: usize = 64;

/// Default number of blocks the pool reserves up front.
pub const DEFAULT_INITIAL_BLOCKS: usize = 64;

#[derive(Debug, Clone)]
pub struct Config {
    pub num_threads: Option<usize>,

    /// Tasks per queue segment. Each service queue grows and shrinks in
    /// segments of this capacity.
    pub segment_capacity: usize,

    /// Blocks reserved into the shared pool before the first service is
    /// created.
    pub initial_blocks: usize,

    pub pin_workers: bool,
    pub stack_size: Option<usize>,
    pub thread_name_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_threads: None,
            segment_capacity: DEFAULT_SEGMENT_CAPACITY,
            initial_blocks: DEFAULT_INITIAL_BLOCKS,
            pin_workers: false,
            stack_size: Some(2 * 1024 * 1024),
            thread_name_prefix: "rondo-worker".to_string(),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(n) = self.num_threads {
            if n == 0 {
                return Err(Error::config("num_threads must be > 0"));
            }
            if n > 1024 {
                return Err(Error::config("num_threads too large (max 1024)"));
            }
        }

        if self.segment_capacity < 2 {
            return Err(Error::config("segment_capacity must be >= 2"));
        }
        if self.segment_capacity > 8192 {
            return Err(Error::config("segment_capacity too large (max 8192)"));
        }

        if self.initial_blocks == 0 {
            return Err(Error::config("initial_blocks must be > 0"));
        }

        Ok(())
    }

    pub fn worker_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(num_cpus::get)
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn num_threads(mut self, n: usize) -> Self {
        self.config.num_threads = Some(n);
        self
    }

    pub fn segment_capacity(mut self, capacity: usize) -> Self {
        self.config.segment_capacity = capacity;
        self
    }

    pub fn initial_blocks(mut self, blocks: usize) -> Self {
        self.config.initial_blocks = blocks;
        self
    }

    pub fn pin_workers(mut self, pin: bool) -> Self {
        self.config.pin_workers = pin;
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
