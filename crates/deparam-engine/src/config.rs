//! Engine configuration.

use deparam_core::Literal;

/// A pre-built hierarchical block wrapper supplied to a sub-run.
#[derive(Debug, Clone, PartialEq)]
pub struct HierBlockOption {
    /// Name of the template the wrapper specializes.
    pub orig_name: String,
    /// Name of the pre-built wrapper module.
    pub mangled_name: String,
    /// Parameter values the wrapper was built with.
    pub params: Vec<(String, Literal)>,
}

impl HierBlockOption {
    pub fn new(orig_name: impl Into<String>, mangled_name: impl Into<String>) -> Self {
        Self {
            orig_name: orig_name.into(),
            mangled_name: mangled_name.into(),
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: Literal) -> Self {
        self.params.push((name.into(), value));
        self
    }
}

/// Configuration for a specialization pass.
///
/// # Example
///
/// ```
/// use deparam_engine::ParamConfig;
///
/// let config = ParamConfig::new()
///     .with_max_recursion_depth(20)
///     .with_long_name_threshold(40);
/// assert_eq!(config.max_recursion_depth, 20);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ParamConfig {
    /// Deepest a template may be cloned below its own level.
    pub max_recursion_depth: u32,
    /// Longest specialization name kept verbatim.
    pub long_name_threshold: usize,
    /// Resolve hierarchical block sites against `hier_blocks` instead of cloning.
    pub hier_sub_run: bool,
    pub hier_blocks: Vec<HierBlockOption>,
    /// Key values by their printed form only, so distinct values can collide.
    /// Testing aid for the hierarchical name probe.
    pub force_hash_collision: bool,
}

impl Default for ParamConfig {
    fn default() -> Self {
        Self {
            max_recursion_depth: 100,
            long_name_threshold: 30,
            hier_sub_run: false,
            hier_blocks: Vec::new(),
            force_hash_collision: false,
        }
    }
}

impl ParamConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_recursion_depth(mut self, depth: u32) -> Self {
        self.max_recursion_depth = depth;
        self
    }

    pub fn with_long_name_threshold(mut self, threshold: usize) -> Self {
        self.long_name_threshold = threshold;
        self
    }

    /// Enable sub-run mode with the given wrapper registry.
    pub fn with_hier_blocks(mut self, blocks: Vec<HierBlockOption>) -> Self {
        self.hier_sub_run = true;
        self.hier_blocks = blocks;
        self
    }

    pub fn with_force_hash_collision(mut self, force: bool) -> Self {
        self.force_hash_collision = force;
        self
    }
}
