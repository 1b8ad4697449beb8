//! Close-to-notify signalling.
//!
//! A [`StopSignal`] fires once its paired sender is dropped. Any number of
//! clones observe the same closure, which makes it the broker's single
//! primitive for "this thing is over": producer stop, peer departure,
//! listener shutdown and endpoint halt.

use tokio::sync::watch;

/// Owning half of a [`StopSignal`]. Dropping it fires the signal.
pub(crate) type StopHandle = watch::Sender<()>;

/// A signal that completes when the broker closes it.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<()>,
}

impl StopSignal {
    /// Create a linked handle and signal.
    pub(crate) fn pair() -> (StopHandle, Self) {
        let (tx, rx) = watch::channel(());
        (tx, Self { rx })
    }

    /// Create a signal that has already fired.
    pub(crate) fn closed() -> Self {
        let (_, signal) = Self::pair();
        signal
    }

    /// Check whether the signal has fired, without waiting.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.rx.has_changed().is_err()
    }

    /// Wait until the signal fires.
    ///
    /// Returns immediately if it already has.
    pub async fn stopped(&mut self) {
        // Nothing is ever sent on the channel; `changed` only errors once the
        // handle is gone.
        while self.rx.changed().await.is_ok() {}
    }
}
