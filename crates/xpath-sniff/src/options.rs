/// Per-pass configuration for a [`Sniffer`](crate::Sniffer).
#[derive(Debug, Clone)]
pub struct SniffOptions {
    min_hits: Option<usize>,
    trace: bool,
    capture_text: bool,
}

impl Default for SniffOptions {
    fn default() -> Self {
        Self { min_hits: None, trace: false, capture_text: true }
    }
}

impl SniffOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop reading once every user result has recorded at least `min_hits` hits.
    /// `0` disables the early stop.
    pub fn with_min_hits(mut self, min_hits: usize) -> Self {
        self.min_hits = (min_hits > 0).then_some(min_hits);
        self
    }

    pub fn min_hits(&self) -> Option<usize> {
        self.min_hits
    }

    /// Emit the frontier after every event as `tracing` trace events.
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn trace(&self) -> bool {
        self.trace
    }

    /// Collect the string value of element hits for user-given and observed
    /// query nodes. When disabled element hits carry an empty value and are
    /// recorded as soon as the element opens.
    pub fn with_capture_text(mut self, capture: bool) -> Self {
        self.capture_text = capture;
        self
    }

    pub fn capture_text(&self) -> bool {
        self.capture_text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_min_hits_disables_early_stop() {
        let options = SniffOptions::new().with_min_hits(0);
        assert_eq!(options.min_hits(), None);
        assert_eq!(SniffOptions::new().with_min_hits(3).min_hits(), Some(3));
    }

    #[test]
    fn defaults_capture_text_without_trace() {
        let options = SniffOptions::default();
        assert!(options.capture_text());
        assert!(!options.trace());
    }
}
