use std::sync::{Mutex, MutexGuard};

/// Latest published caption and how many captions have been published.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptionSnapshot {
    pub text: String,
    /// Zero while the placeholder is still shown.
    pub generation: u64,
}

/// Single-writer, multi-reader caption result.
///
/// The writer is the caption worker thread; readers are request handlers.
pub struct CaptionBoard {
    inner: Mutex<CaptionSnapshot>,
}

impl CaptionBoard {
    pub fn new(placeholder: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(CaptionSnapshot {
                text: placeholder.into(),
                generation: 0,
            }),
        }
    }

    pub fn publish(&self, text: String) {
        let mut inner = self.lock();
        inner.text = text;
        inner.generation += 1;
    }

    pub fn latest(&self) -> String {
        self.lock().text.clone()
    }

    pub fn snapshot(&self) -> CaptionSnapshot {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, CaptionSnapshot> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn board_starts_with_placeholder() {
        let board = CaptionBoard::new("Initializing caption... (CPU)");
        let snap = board.snapshot();
        assert_eq!(snap.text, "Initializing caption... (CPU)");
        assert_eq!(snap.generation, 0);
    }

    #[test]
    fn publish_overwrites_and_counts() {
        let board = CaptionBoard::new("placeholder");
        board.publish("a cat on a sofa".to_string());
        board.publish("a dog on a sofa".to_string());

        assert_eq!(board.latest(), "a dog on a sofa");
        assert_eq!(board.snapshot().generation, 2);
    }
}
