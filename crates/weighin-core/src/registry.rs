//! Handler registry and format detection

use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

use crate::handlers::{builtin_handlers, ImportHandler};

static BUILTIN: LazyLock<Arc<FormatRegistry>> =
    LazyLock::new(|| Arc::new(FormatRegistry::from_handlers(builtin_handlers())));

/// Confidence a single handler reported for a file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionScore {
    pub id: String,
    pub label: String,
    pub confidence: f64,
}

/// Ordered, immutable set of import handlers.
///
/// Registration order is the tie-break during detection.
pub struct FormatRegistry {
    handlers: Vec<Box<dyn ImportHandler>>,
}

impl FormatRegistry {
    /// Start building a registry
    pub fn builder() -> FormatRegistryBuilder {
        FormatRegistryBuilder::default()
    }

    /// The built-in registry shared by the whole process
    pub fn builtin() -> Arc<FormatRegistry> {
        Arc::clone(&BUILTIN)
    }

    fn from_handlers(handlers: Vec<Box<dyn ImportHandler>>) -> Self {
        Self { handlers }
    }

    /// Registered handlers, in order
    pub fn handlers(&self) -> impl Iterator<Item = &dyn ImportHandler> {
        self.handlers.iter().map(|h| h.as_ref())
    }

    /// Look up a handler by ID
    pub fn get(&self, id: &str) -> Option<&dyn ImportHandler> {
        self.handlers().find(|h| h.id() == id)
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Score `content` with every handler.
    ///
    /// A handler that errors or panics scores 0; the others are unaffected.
    pub fn score_all(&self, content: &str) -> Vec<DetectionScore> {
        self.handlers()
            .map(|handler| DetectionScore {
                id: handler.id().to_string(),
                label: handler.label().to_string(),
                confidence: isolated_score(handler, content),
            })
            .collect()
    }

    /// Pick the handler with the strictly highest positive confidence.
    ///
    /// Returns `None` when every handler scores 0.
    pub fn detect_handler(&self, content: &str) -> Option<&dyn ImportHandler> {
        let mut best: Option<(&dyn ImportHandler, f64)> = None;

        for handler in self.handlers() {
            let score = isolated_score(handler, content);
            debug!("Handler {} scored {}", handler.id(), score);

            if score > best.map_or(0.0, |(_, top)| top) {
                best = Some((handler, score));
            }
        }

        best.map(|(handler, _)| handler)
    }
}

/// Builder for [`FormatRegistry`]
#[derive(Default)]
pub struct FormatRegistryBuilder {
    handlers: Vec<Box<dyn ImportHandler>>,
}

impl FormatRegistryBuilder {
    /// Append a handler
    pub fn register(mut self, handler: impl ImportHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Append the built-in handlers
    pub fn with_builtins(mut self) -> Self {
        self.handlers.extend(builtin_handlers());
        self
    }

    /// Freeze the registry
    pub fn build(self) -> FormatRegistry {
        FormatRegistry::from_handlers(self.handlers)
    }
}

/// Detect against the built-in registry and return the handler ID
pub fn detect_handler(content: &str) -> Option<String> {
    FormatRegistry::builtin()
        .detect_handler(content)
        .map(|handler| handler.id().to_string())
}

fn isolated_score(handler: &dyn ImportHandler, content: &str) -> f64 {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.detect(content)));

    let score = match outcome {
        Ok(Ok(score)) => score,
        Ok(Err(e)) => {
            warn!("Handler {} failed during detection: {}", handler.id(), e);
            0.0
        }
        Err(_) => {
            warn!("Handler {} panicked during detection", handler.id());
            0.0
        }
    };

    if score.is_finite() && score > 0.0 {
        score
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CandidateRow;
    use crate::{Error, Result};

    struct Fixed {
        id: &'static str,
        score: f64,
    }

    impl ImportHandler for Fixed {
        fn id(&self) -> &str {
            self.id
        }
        fn label(&self) -> &str {
            "fixed"
        }
        fn detect(&self, _content: &str) -> Result<f64> {
            Ok(self.score)
        }
        fn parse(&self, _content: &str) -> Result<Vec<CandidateRow>> {
            Ok(Vec::new())
        }
    }

    struct Failing;

    impl ImportHandler for Failing {
        fn id(&self) -> &str {
            "failing"
        }
        fn label(&self) -> &str {
            "failing"
        }
        fn detect(&self, _content: &str) -> Result<f64> {
            Err(Error::Handler {
                id: "failing".to_string(),
                message: "boom".to_string(),
            })
        }
        fn parse(&self, _content: &str) -> Result<Vec<CandidateRow>> {
            Ok(Vec::new())
        }
    }

    struct Panicking;

    impl ImportHandler for Panicking {
        fn id(&self) -> &str {
            "panicking"
        }
        fn label(&self) -> &str {
            "panicking"
        }
        fn detect(&self, _content: &str) -> Result<f64> {
            panic!("detector bug")
        }
        fn parse(&self, _content: &str) -> Result<Vec<CandidateRow>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_highest_score_wins() {
        let registry = FormatRegistry::builder()
            .register(Fixed { id: "low", score: 0.2 })
            .register(Fixed { id: "high", score: 0.9 })
            .build();
        assert_eq!(registry.detect_handler("x").unwrap().id(), "high");
    }

    #[test]
    fn test_ties_keep_first_registered() {
        let registry = FormatRegistry::builder()
            .register(Fixed { id: "first", score: 1.0 })
            .register(Fixed { id: "second", score: 1.0 })
            .build();
        assert_eq!(registry.detect_handler("x").unwrap().id(), "first");
    }

    #[test]
    fn test_zero_scores_match_nothing() {
        let registry = FormatRegistry::builder()
            .register(Fixed { id: "zero", score: 0.0 })
            .register(Fixed { id: "negative", score: -1.0 })
            .register(Fixed { id: "nan", score: f64::NAN })
            .build();
        assert!(registry.detect_handler("x").is_none());
    }

    #[test]
    fn test_failing_handlers_are_isolated() {
        let registry = FormatRegistry::builder()
            .register(Failing)
            .register(Panicking)
            .register(Fixed { id: "ok", score: 0.3 })
            .build();

        assert_eq!(registry.detect_handler("x").unwrap().id(), "ok");

        let scores = registry.score_all("x");
        assert_eq!(scores[0].confidence, 0.0);
        assert_eq!(scores[1].confidence, 0.0);
        assert_eq!(scores[2].confidence, 0.3);
    }

    #[test]
    fn test_builtin_detection_is_idempotent() {
        let content = "Date,Weight (lbs),Fitbit Steps\n2024-01-01,180.4,5000\n";
        let first = detect_handler(content);
        assert_eq!(first.as_deref(), Some("fitbit-weight-csv"));
        for _ in 0..5 {
            assert_eq!(detect_handler(content), first);
        }
    }

    #[test]
    fn test_builtin_generic_and_unknown() {
        assert_eq!(
            detect_handler("Day;Body Weight\n2024-01-01;80\n").as_deref(),
            Some("generic-weight-csv")
        );
        assert!(detect_handler("Morning scale said 180 on Jan 1").is_none());
        assert!(detect_handler("").is_none());
    }

    #[test]
    fn test_get_and_len() {
        let registry = FormatRegistry::builder().with_builtins().build();
        assert_eq!(registry.len(), 3);
        assert!(!registry.is_empty());
        assert_eq!(
            registry.get("withings-weight-csv").unwrap().label(),
            "Withings measurements export"
        );
        assert!(registry.get("missing").is_none());
    }
}
