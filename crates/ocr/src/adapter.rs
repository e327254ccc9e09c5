use std::time::Duration;
use tracing::{info, warn};

use halves_core::config::OcrSettings;

use crate::recognizer::{OcrBackend, OcrError, OcrOutput, TesseractRecognizer};
use crate::vision::VisionRecognizer;

/// What the adapter got out of its engines. Never an error: failures land in
/// `errors` and the output is empty.
#[derive(Debug, Clone)]
pub struct OcrOutcome {
    pub output: OcrOutput,
    pub used_fallback: bool,
    pub errors: Vec<String>,
}

/// Primary engine with timeout and retries, then a single fallback attempt.
pub struct OcrAdapter {
    primary: Box<dyn OcrBackend>,
    fallback: Option<Box<dyn OcrBackend>>,
    timeout: Duration,
    max_retries: u32,
    backoff: Duration,
}

impl OcrAdapter {
    pub fn new(primary: Box<dyn OcrBackend>) -> Self {
        Self {
            primary,
            fallback: None,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff: Duration::from_millis(500),
        }
    }

    pub fn with_fallback(mut self, fallback: Box<dyn OcrBackend>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.backoff = backoff;
        self
    }

    /// Google Vision when an API key is configured, with local Tesseract as
    /// fallback. Without a key Tesseract is the only engine.
    pub fn from_settings(settings: &OcrSettings, client: reqwest::Client) -> Self {
        let tesseract = || {
            Box::new(TesseractRecognizer::new(
                settings.tesseract_data_path.clone(),
                &settings.tesseract_lang,
            )) as Box<dyn OcrBackend>
        };

        let vision = settings
            .vision_api_key
            .as_deref()
            .map(|key| VisionRecognizer::new(client, key, &settings.vision_endpoint));

        let adapter = match vision {
            Some(Ok(vision)) => OcrAdapter::new(Box::new(vision)).with_fallback(tesseract()),
            Some(Err(e)) => {
                warn!("Google Vision disabled: {e}");
                OcrAdapter::new(tesseract())
            }
            None => OcrAdapter::new(tesseract()),
        };

        adapter
            .with_timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .with_retries(settings.max_retries, Duration::from_millis(settings.retry_backoff_ms))
    }

    /// Linear backoff before retry number `attempt`; zero before the first try.
    fn retry_delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }

    async fn attempt(&self, backend: &dyn OcrBackend, image_bytes: &[u8]) -> Result<OcrOutput, OcrError> {
        match tokio::time::timeout(self.timeout, backend.recognize(image_bytes)).await {
            Ok(result) => result,
            Err(_) => Err(OcrError::Timeout(self.timeout.as_secs())),
        }
    }

    pub async fn recognize(&self, image_bytes: &[u8]) -> OcrOutcome {
        let mut errors = Vec::new();
        let engine = self.primary.engine();

        for attempt in 0..=self.max_retries {
            let delay = self.retry_delay(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match self.attempt(self.primary.as_ref(), image_bytes).await {
                Ok(output) if !output.text.trim().is_empty() => {
                    info!("OCR via {engine} succeeded on attempt {}", attempt + 1);
                    return OcrOutcome { output, used_fallback: false, errors };
                }
                Ok(_) => {
                    errors.push(format!("{engine}: no text detected"));
                    break;
                }
                Err(e) => {
                    warn!("OCR via {engine} failed (attempt {}): {e}", attempt + 1);
                    let permanent = matches!(e, OcrError::NotAvailable | OcrError::NotConfigured(_));
                    errors.push(format!("{engine}: {e}"));
                    if permanent {
                        break;
                    }
                }
            }
        }

        if let Some(fallback) = &self.fallback {
            let fb_engine = fallback.engine();
            info!("Falling back to {fb_engine}");
            match self.attempt(fallback.as_ref(), image_bytes).await {
                Ok(output) => {
                    return OcrOutcome { output, used_fallback: true, errors };
                }
                Err(e) => {
                    warn!("Fallback OCR via {fb_engine} failed: {e}");
                    errors.push(format!("{fb_engine}: {e}"));
                    return OcrOutcome {
                        output: OcrOutput::empty(fb_engine),
                        used_fallback: true,
                        errors,
                    };
                }
            }
        }

        OcrOutcome { output: OcrOutput::empty(engine), used_fallback: false, errors }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::{FailingRecognizer, MockRecognizer, OcrEngine};
    use std::sync::Arc;

    struct Slow;

    #[async_trait::async_trait]
    impl OcrBackend for Slow {
        fn engine(&self) -> OcrEngine {
            OcrEngine::GoogleVision
        }

        async fn recognize(&self, _image_bytes: &[u8]) -> Result<OcrOutput, OcrError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(OcrOutput::empty(OcrEngine::GoogleVision))
        }
    }

    /// Shares a FailingRecognizer so the test can read its call count.
    struct Shared(Arc<FailingRecognizer>);

    #[async_trait::async_trait]
    impl OcrBackend for Shared {
        fn engine(&self) -> OcrEngine {
            self.0.engine()
        }

        async fn recognize(&self, image_bytes: &[u8]) -> Result<OcrOutput, OcrError> {
            self.0.recognize(image_bytes).await
        }
    }

    #[tokio::test]
    async fn primary_success_does_not_touch_fallback() {
        let adapter = OcrAdapter::new(Box::new(MockRecognizer::new("COSTCO")))
            .with_fallback(Box::new(FailingRecognizer::new("unused")));
        let outcome = adapter.recognize(b"img").await;
        assert_eq!(outcome.output.text, "COSTCO");
        assert!(!outcome.used_fallback);
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn retries_then_falls_back() {
        let failing = Arc::new(FailingRecognizer::new("503").as_engine(OcrEngine::GoogleVision));
        let adapter = OcrAdapter::new(Box::new(Shared(failing.clone())))
            .with_fallback(Box::new(MockRecognizer::new("WALMART")))
            .with_retries(2, Duration::ZERO);
        let outcome = adapter.recognize(b"img").await;
        assert_eq!(failing.calls(), 3);
        assert!(outcome.used_fallback);
        assert_eq!(outcome.output.text, "WALMART");
        assert_eq!(outcome.errors.len(), 3);
    }

    #[tokio::test]
    async fn both_failing_gives_empty_text_and_errors() {
        let adapter = OcrAdapter::new(Box::new(FailingRecognizer::new("down")))
            .with_fallback(Box::new(FailingRecognizer::new("also down")))
            .with_retries(0, Duration::ZERO);
        let outcome = adapter.recognize(b"img").await;
        assert!(outcome.output.text.is_empty());
        assert!(outcome.used_fallback);
        assert_eq!(outcome.errors.len(), 2);
    }

    #[tokio::test]
    async fn timeout_counts_as_failure() {
        let adapter = OcrAdapter::new(Box::new(Slow))
            .with_fallback(Box::new(MockRecognizer::new("LOCAL")))
            .with_timeout(Duration::from_millis(20))
            .with_retries(0, Duration::ZERO);
        let outcome = adapter.recognize(b"img").await;
        assert_eq!(outcome.output.text, "LOCAL");
        assert!(outcome.errors[0].contains("timed out"));
    }

    #[tokio::test]
    async fn no_fallback_returns_empty_output() {
        let adapter =
            OcrAdapter::new(Box::new(FailingRecognizer::new("x"))).with_retries(1, Duration::ZERO);
        let outcome = adapter.recognize(b"img").await;
        assert!(outcome.output.text.is_empty());
        assert!(!outcome.used_fallback);
        assert_eq!(outcome.errors.len(), 2);
    }

    #[test]
    fn retry_delay_grows_linearly_and_saturates() {
        let adapter = OcrAdapter::new(Box::new(MockRecognizer::new("x")))
            .with_retries(3, Duration::from_millis(500));
        assert_eq!(adapter.retry_delay(0), Duration::ZERO);
        assert_eq!(adapter.retry_delay(2), Duration::from_secs(1));

        let huge = OcrAdapter::new(Box::new(MockRecognizer::new("x")))
            .with_retries(3, Duration::from_secs(u64::MAX / 2));
        assert_eq!(huge.retry_delay(3), Duration::MAX);
    }

    #[tokio::test]
    async fn settings_without_key_use_local_engine_only() {
        let adapter = OcrAdapter::from_settings(&OcrSettings::default(), reqwest::Client::new());
        assert_eq!(adapter.primary.engine(), OcrEngine::Tesseract);
        assert!(adapter.fallback.is_none());
    }
}
