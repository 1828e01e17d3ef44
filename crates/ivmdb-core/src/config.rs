//! Engine configuration.

/// Configuration for the query optimizer.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Run predicate pushdown at all.
    pub enabled: bool,

    /// Maximum number of rewrite passes before giving up on convergence.
    pub max_iterations: usize,

    /// Maximum subquery nesting depth the rewrite descends into.
    /// Deeper levels are left untouched.
    pub max_depth: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_iterations: 10,
            max_depth: 32,
        }
    }
}

impl OptimizerConfig {
    /// Create a config with custom bounds.
    pub fn new(max_iterations: usize, max_depth: usize) -> Self {
        Self {
            enabled: true,
            max_iterations,
            max_depth,
        }
    }

    /// Create a config that leaves queries unchanged.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Set the iteration bound.
    pub fn max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    /// Set the depth bound.
    pub fn max_depth(mut self, max: usize) -> Self {
        self.max_depth = max;
        self
    }
}

/// Configuration for a live query.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Optimizer settings used when compiling the query.
    pub optimizer: OptimizerConfig,

    /// Run the graph after every `apply` outside an explicit transaction.
    /// When false, changes accumulate until `flush` or `commit`.
    pub autocommit: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerConfig::default(),
            autocommit: true,
        }
    }
}

impl EngineConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the optimizer configuration.
    pub fn with_optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Set autocommit.
    pub fn with_autocommit(mut self, autocommit: bool) -> Self {
        self.autocommit = autocommit;
        self
    }
}
