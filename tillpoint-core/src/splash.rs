//! Splash message stack.
//!
//! Startup tasks push progress text while they run. The displayed message is
//! always the most recently pushed entry that has not been popped, no matter
//! in which order entries are removed.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use uuid::Uuid;

/// Shared stack of splash messages.
#[derive(Clone)]
pub struct SplashScreen {
    inner: Arc<Inner>,
}

struct Inner {
    /// Newest entry first.
    entries: Mutex<Vec<Entry>>,
    current: watch::Sender<Option<String>>,
}

struct Entry {
    id: Uuid,
    text: String,
}

impl SplashScreen {
    /// Create an empty stack.
    #[must_use]
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(Vec::new()),
                current,
            }),
        }
    }

    /// Push `text` on top of the stack and display it.
    ///
    /// The message stays until the returned handle is popped or dropped.
    #[must_use = "the message is removed as soon as the handle is dropped"]
    pub fn push_message(&self, text: impl Into<String>) -> SplashMessage {
        let text = text.into();
        let id = Uuid::new_v4();
        {
            let mut entries = self
                .inner
                .entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            entries.insert(
                0,
                Entry {
                    id,
                    text: text.clone(),
                },
            );
            self.publish(&entries);
        }
        tracing::debug!(message = %text, "Splash message pushed");
        SplashMessage {
            id,
            text,
            screen: self.clone(),
            popped: false,
        }
    }

    /// The message currently displayed, if any.
    #[must_use]
    pub fn current_message(&self) -> Option<String> {
        self.inner.current.borrow().clone()
    }

    /// Subscribe to changes of the displayed message.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.inner.current.subscribe()
    }

    /// Number of messages on the stack.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if no message is displayed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: Uuid) {
        let mut entries = self
            .inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        if before != entries.len() {
            self.publish(&entries);
        }
    }

    /// Publish the head of `entries`, notifying only when it changed.
    ///
    /// Called with the entries lock held so heads are published in the order
    /// the stack changed.
    fn publish(&self, entries: &[Entry]) {
        let head = entries.first().map(|entry| entry.text.clone());
        self.inner.current.send_if_modified(|current| {
            if *current == head {
                false
            } else {
                *current = head;
                true
            }
        });
    }
}

impl Default for SplashScreen {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SplashScreen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SplashScreen")
            .field("current", &self.current_message())
            .field("len", &self.len())
            .finish()
    }
}

/// Handle to one pushed splash message.
pub struct SplashMessage {
    id: Uuid,
    text: String,
    screen: SplashScreen,
    popped: bool,
}

impl SplashMessage {
    /// The pushed text.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.text
    }

    /// Remove exactly this entry, wherever it sits in the stack.
    pub fn pop(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if !self.popped {
            self.popped = true;
            self.screen.remove(self.id);
        }
    }
}

impl Drop for SplashMessage {
    fn drop(&mut self) {
        self.remove();
    }
}

impl fmt::Debug for SplashMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SplashMessage")
            .field("message", &self.text)
            .field("popped", &self.popped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_screen_has_no_message() {
        let screen = SplashScreen::new();
        assert!(screen.is_empty());
        assert_eq!(screen.current_message(), None);
    }

    #[test]
    fn test_lifo_by_handle() {
        let screen = SplashScreen::new();
        let m1 = screen.push_message("M1");
        let m2 = screen.push_message("M2");
        let m3 = screen.push_message("M3");
        assert_eq!(screen.current_message().as_deref(), Some("M3"));

        m2.pop();
        assert_eq!(screen.current_message().as_deref(), Some("M3"));
        assert_eq!(screen.len(), 2);

        m3.pop();
        assert_eq!(screen.current_message().as_deref(), Some("M1"));

        m1.pop();
        assert_eq!(screen.current_message(), None);
    }

    #[test]
    fn test_pop_removes_by_identity_not_value() {
        let screen = SplashScreen::new();
        let first = screen.push_message("Loading");
        let second = screen.push_message("Loading");
        first.pop();
        assert_eq!(screen.len(), 1);
        assert_eq!(screen.current_message().as_deref(), Some("Loading"));
        assert_eq!(second.message(), "Loading");
        drop(second);
        assert!(screen.is_empty());
    }

    #[test]
    fn test_drop_pops_message() {
        let screen = SplashScreen::new();
        {
            let _msg = screen.push_message("Scoped");
            assert_eq!(screen.current_message().as_deref(), Some("Scoped"));
        }
        assert!(screen.is_empty());
    }

    #[test]
    fn test_head_changes_are_deduplicated() {
        let screen = SplashScreen::new();
        let mut rx = screen.subscribe();
        rx.mark_unchanged();

        let bottom = screen.push_message("Connecting");
        assert!(rx.has_changed().expect("sender alive"));
        rx.mark_unchanged();

        let top = screen.push_message("Retrying");
        rx.mark_unchanged();

        // Same text pushed and popped on top: the head value never changes.
        let duplicate = screen.push_message("Retrying");
        assert!(!rx.has_changed().expect("sender alive"));
        duplicate.pop();
        assert!(!rx.has_changed().expect("sender alive"));

        top.pop();
        assert!(rx.has_changed().expect("sender alive"));
        assert_eq!(rx.borrow_and_update().as_deref(), Some("Connecting"));
        bottom.pop();
        assert_eq!(*rx.borrow(), None);
    }

    #[test]
    fn test_concurrent_pops_leave_displayed_head_in_sync() {
        let screen = SplashScreen::new();
        let base = screen.push_message("Personalizing device...");

        for _ in 0..200 {
            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let screen = screen.clone();
                    std::thread::spawn(move || {
                        let msg = screen.push_message(format!("step {i}"));
                        std::thread::yield_now();
                        msg.pop();
                    })
                })
                .collect();
            for handle in handles {
                handle.join().expect("thread");
            }
            assert_eq!(screen.len(), 1);
            assert_eq!(
                screen.current_message().as_deref(),
                Some("Personalizing device...")
            );
        }
        base.pop();
        assert_eq!(screen.current_message(), None);
    }
}
