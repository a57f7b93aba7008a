use glob::Pattern;

use crate::config::FilterConfig;
use crate::error::{BridgeError, Result};

/// Decides which metric names are exported
#[derive(Debug, Clone, Default)]
pub struct MetricFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl MetricFilter {
    /// Compile the configured patterns
    pub fn new(config: &FilterConfig) -> Result<Self> {
        Ok(Self {
            include: compile(&config.include)?,
            exclude: compile(&config.exclude)?,
        })
    }

    /// A filter admitting every metric
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn matches(&self, name: &str) -> bool {
        if self.exclude.iter().any(|p| p.matches(name)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|p| p.matches(name))
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p)
                .map_err(|e| BridgeError::Config(format!("invalid metric pattern '{}': {}", p, e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(include: &[&str], exclude: &[&str]) -> MetricFilter {
        MetricFilter::new(&FilterConfig {
            include: include.iter().map(|s| s.to_string()).collect(),
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
        })
        .unwrap()
    }

    #[test]
    fn test_empty_filter_admits_everything() {
        assert!(MetricFilter::allow_all().matches("anything.at.all"));
    }

    #[test]
    fn test_exact_names() {
        let f = filter(&["com.hivemq.messages.incoming.total.count"], &[]);
        assert!(f.matches("com.hivemq.messages.incoming.total.count"));
        assert!(!f.matches("com.hivemq.messages.outgoing.total.count"));
    }

    #[test]
    fn test_prefix_and_exclusion() {
        let f = filter(&["com.hivemq.messages.*"], &["*.rate"]);
        assert!(f.matches("com.hivemq.messages.incoming.total.count"));
        assert!(!f.matches("com.hivemq.messages.incoming.total.rate"));
        assert!(!f.matches("com.hivemq.sessions.overall.current"));
    }

    #[test]
    fn test_invalid_pattern() {
        let result = MetricFilter::new(&FilterConfig {
            include: vec!["[".to_string()],
            exclude: vec![],
        });
        assert!(result.is_err());
    }
}
