//! Runtime configuration. No CLI parsing and no environment variables: the
//! core exposes no such surface, so unlike erdos's own
//! `Configuration::from_args` (`clap`-backed), this struct is built with
//! plain constructors - see DESIGN.md, "Dropped dependencies".
//!
//! Field defaults are taken from Ray Streaming's `config.py` (`Config`'s
//! `parallelism`/`queue_type` knobs), adapted to this crate's
//! channel-capacity and logging knobs.
use tracing::Level;

/// Tunables shared by [`crate::dataflow::graph::LogicalGraph`] construction
/// and [`crate::node::environment::Environment::execute`].
#[derive(Debug, Clone)]
pub struct Configuration {
    /// Bound applied to every [`crate::communication::channel::DataChannel`]
    /// the physical compiler materializes.
    pub channel_capacity: usize,
    /// Parallelism used for an operator whose builder call didn't request
    /// one explicitly.
    pub default_parallelism: usize,
    /// If set, `Environment::execute` installs a `tracing` subscriber at
    /// this level before deploying any task. Left `None` when the host
    /// process manages its own subscriber.
    pub logging_level: Option<Level>,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            channel_capacity: 1024,
            default_parallelism: 1,
            logging_level: None,
        }
    }
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_default_parallelism(mut self, parallelism: usize) -> Self {
        self.default_parallelism = parallelism;
        self
    }

    pub fn with_logging_level(mut self, level: Level) -> Self {
        self.logging_level = Some(level);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable_without_any_builder_call() {
        let config = Configuration::default();
        assert_eq!(config.channel_capacity, 1024);
        assert_eq!(config.default_parallelism, 1);
        assert!(config.logging_level.is_none());
    }

    #[test]
    fn builder_methods_chain() {
        let config = Configuration::new()
            .with_channel_capacity(16)
            .with_default_parallelism(4)
            .with_logging_level(Level::DEBUG);
        assert_eq!(config.channel_capacity, 16);
        assert_eq!(config.default_parallelism, 4);
        assert_eq!(config.logging_level, Some(Level::DEBUG));
    }
}
