use crate::Frame;
use std::sync::{Arc, Mutex, MutexGuard};

/// Single-item mailbox holding the newest frame for one source.
///
/// Frames are stored behind an `Arc`, so `publish` swaps a pointer under the
/// lock and `snapshot` hands out an immutable shared view that later
/// publishes cannot touch.
#[derive(Debug, Default)]
pub struct FrameSlot {
    latest: Mutex<Option<Arc<Frame>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current contents. The previous frame is freed once the
    /// last outstanding snapshot of it is dropped.
    pub fn publish(&self, frame: Frame) {
        let frame = Arc::new(frame);
        let previous = {
            let mut guard = self.lock();
            guard.replace(frame)
        };
        drop(previous);
    }

    pub fn snapshot(&self) -> Option<Arc<Frame>> {
        self.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    // The guarded value is only ever swapped whole, so a poisoned lock
    // still holds a consistent frame.
    fn lock(&self) -> MutexGuard<'_, Option<Arc<Frame>>> {
        self.latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PixelFormat, Resolution};
    use std::thread;

    fn filled(value: u8) -> Frame {
        Frame {
            width: 64,
            height: 48,
            pixel_format: PixelFormat::Bgr8,
            data: vec![value; 64 * 48 * 3],
            ts: None,
        }
    }

    #[test]
    fn test_empty_slot() {
        let slot = FrameSlot::new();
        assert!(slot.snapshot().is_none());
        assert!(slot.is_empty());
    }

    #[test]
    fn test_publish_replaces() {
        let slot = FrameSlot::new();
        slot.publish(filled(1));
        slot.publish(filled(2));
        let snap = slot.snapshot().unwrap();
        assert!(snap.data.iter().all(|b| *b == 2));
    }

    #[test]
    fn test_snapshot_idempotent_between_publishes() {
        let slot = FrameSlot::new();
        slot.publish(filled(7));
        let a = slot.snapshot().unwrap();
        let b = slot.snapshot().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.data, b.data);
    }

    #[test]
    fn test_snapshot_survives_later_publish() {
        let slot = FrameSlot::new();
        slot.publish(filled(3));
        let held = slot.snapshot().unwrap();
        slot.publish(filled(4));
        assert!(held.data.iter().all(|b| *b == 3));
        assert!(slot.snapshot().unwrap().data.iter().all(|b| *b == 4));
    }

    #[test]
    fn test_no_torn_reads_under_contention() {
        let slot = Arc::new(FrameSlot::new());
        let writer = {
            let slot = slot.clone();
            thread::spawn(move || {
                for i in 0..2000u32 {
                    slot.publish(filled((i % 251) as u8));
                }
            })
        };
        let reader = {
            let slot = slot.clone();
            thread::spawn(move || {
                let mut seen = 0usize;
                for _ in 0..2000 {
                    if let Some(frame) = slot.snapshot() {
                        let first = frame.data[0];
                        assert!(frame.data.iter().all(|b| *b == first));
                        assert_eq!(frame.resolution(), Resolution::new(64, 48));
                        seen += 1;
                    }
                }
                seen
            })
        };
        writer.join().unwrap();
        let _ = reader.join().unwrap();
        assert!(!slot.is_empty());
    }
}
