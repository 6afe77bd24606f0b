use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;

use crate::presence::PresenceUpdate;
use crate::writer::SelfWriter;

/// Turns press gestures on the shared surface into writes of our own
/// `touching` flag.
///
/// The local flag is optimistic and only reported back to the caller; what
/// the screen shows comes from the reconciled snapshot.
#[derive(Clone)]
pub struct TouchHandler {
    writer: SelfWriter,
    touching: Arc<AtomicBool>,
}

impl TouchHandler {
    pub(crate) fn new(writer: SelfWriter, touching: Arc<AtomicBool>) -> Self {
        TouchHandler { writer, touching }
    }

    pub fn press_in(&self) {
        self.set_touching(true);
    }

    pub fn press_out(&self) {
        self.set_touching(false);
    }

    pub fn is_touching(&self) -> bool {
        self.touching.load(Ordering::Acquire)
    }

    fn set_touching(&self, touching: bool) {
        if self.writer.is_closed() {
            debug!("Ignoring touch {} after leaving the session", touching);
            return;
        }
        self.touching.store(touching, Ordering::Release);
        if !self.writer.submit(PresenceUpdate::touching(touching)) {
            debug!("Touch {} raced with leaving the session", touching);
        }
    }
}
