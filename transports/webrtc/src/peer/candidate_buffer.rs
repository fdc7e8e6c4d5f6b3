//! Holding area for remote path candidates that arrive before the remote
//! description

use tracing::debug;

/// What the caller should do with a candidate it just handed to the buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateDisposition {
    /// The remote description is applied; apply this candidate now
    Immediate(String),
    /// Queued until [`PathCandidateBuffer::flush_candidates`]
    Buffered,
}

/// FIFO of remote candidates gated on the remote description
///
/// No candidate is handed out before the remote description is marked ready,
/// and none is dropped except by [`clear`](Self::clear).
#[derive(Debug, Default)]
pub struct PathCandidateBuffer {
    pending: Vec<String>,
    remote_description_ready: bool,
}

impl PathCandidateBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a candidate to the buffer
    pub fn add_candidate(&mut self, candidate: String) -> CandidateDisposition {
        if self.remote_description_ready {
            return CandidateDisposition::Immediate(candidate);
        }

        self.pending.push(candidate);
        debug!(
            "Buffered remote candidate ({} pending)",
            self.pending.len()
        );
        CandidateDisposition::Buffered
    }

    /// Mark the remote description as applied
    pub fn set_remote_description_ready(&mut self) {
        self.remote_description_ready = true;
    }

    /// Drain every buffered candidate in arrival order
    ///
    /// A second call returns nothing until new candidates are buffered.
    pub fn flush_candidates(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending)
    }

    /// Reset to the initial state
    pub fn clear(&mut self) {
        self.pending.clear();
        self.remote_description_ready = false;
    }

    pub fn is_remote_description_ready(&self) -> bool {
        self.remote_description_ready
    }

    pub fn buffered_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffers_until_ready_then_flushes_in_order() {
        let mut buffer = PathCandidateBuffer::new();
        assert_eq!(buffer.add_candidate("c1".into()), CandidateDisposition::Buffered);
        assert_eq!(buffer.add_candidate("c2".into()), CandidateDisposition::Buffered);
        assert_eq!(buffer.buffered_count(), 2);

        buffer.set_remote_description_ready();
        assert_eq!(buffer.flush_candidates(), vec!["c1", "c2"]);
        assert!(buffer.flush_candidates().is_empty());
    }

    #[test]
    fn test_immediate_after_ready() {
        let mut buffer = PathCandidateBuffer::new();
        buffer.set_remote_description_ready();
        assert_eq!(
            buffer.add_candidate("c3".into()),
            CandidateDisposition::Immediate("c3".into())
        );
        assert_eq!(buffer.buffered_count(), 0);
    }

    #[test]
    fn test_clear_resets_readiness() {
        let mut buffer = PathCandidateBuffer::new();
        buffer.add_candidate("c1".into());
        buffer.set_remote_description_ready();
        buffer.clear();

        assert!(!buffer.is_remote_description_ready());
        assert_eq!(buffer.buffered_count(), 0);
        assert_eq!(buffer.add_candidate("c2".into()), CandidateDisposition::Buffered);
    }
}
