use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Publish/subscribe component embedded by types that emit events.
///
/// Each subscriber gets its own unbounded channel; subscribers whose receiver
/// was dropped are pruned on the next emit.
#[derive(Debug)]
pub struct Emitter<E> {
  subscribers: Mutex<Vec<mpsc::UnboundedSender<E>>>,
}

impl<E> Default for Emitter<E> {
  fn default() -> Self {
    Self {
      subscribers: Mutex::new(Vec::new()),
    }
  }
}

impl<E: Clone> Emitter<E> {
  pub fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<E>> {
    let (tx, rx) = mpsc::unbounded_channel();
    self
      .subscribers
      .lock()
      .map_err(|e| Error::LockPoisoned(e.to_string()))?
      .push(tx);
    Ok(rx)
  }

  /// Send `event` to every live subscriber. Returns how many received it.
  pub fn emit(&self, event: E) -> Result<usize> {
    let mut subscribers = self
      .subscribers
      .lock()
      .map_err(|e| Error::LockPoisoned(e.to_string()))?;
    subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    Ok(subscribers.len())
  }

  pub fn subscriber_count(&self) -> usize {
    self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_emit_reaches_subscribers() {
    let emitter = Emitter::default();
    let mut a = emitter.subscribe().unwrap();
    let mut b = emitter.subscribe().unwrap();

    assert_eq!(emitter.emit(1).unwrap(), 2);
    assert_eq!(a.try_recv().unwrap(), 1);
    assert_eq!(b.try_recv().unwrap(), 1);
  }

  #[test]
  fn test_dropped_subscribers_are_pruned() {
    let emitter = Emitter::default();
    let rx = emitter.subscribe().unwrap();
    drop(rx);
    assert_eq!(emitter.subscriber_count(), 1);
    assert_eq!(emitter.emit("x").unwrap(), 0);
    assert_eq!(emitter.subscriber_count(), 0);
  }
}
