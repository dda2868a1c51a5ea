//! Delivery of rendered frames to recording and snapshot consumers.
//!
//! When a consumer is registered or a snapshot is pending, the compositor
//! renders the final image into a BGRA pixel buffer taken from a small pool.
//! The GPU completion handler of that frame hands the buffer to the
//! [`ExportQueue`], a dedicated thread that calls the consumers. Consumers
//! may hold on to the buffer; it returns to the pool once they drop it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread;

use facelens_graphics::{
    GraphicsDevice, GraphicsError, PixelBufferAttributes, PixelBufferPool, PooledPixelBuffer,
    Texture, TextureFormat,
};

use crate::error::RendererError;

/// Buffers preallocated in the export pool.
pub const EXPORT_POOL_MINIMUM: usize = 3;
/// Maximum buffers the export pool hands out at once.
pub const EXPORT_POOL_THRESHOLD: usize = 3;

/// A rendered frame in host memory.
#[derive(Debug, Clone)]
pub struct ExportedFrame {
    pub buffer: Arc<PooledPixelBuffer>,
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: u32,
    /// Timestamp of the tracking update the frame was rendered with.
    pub timestamp: f64,
}

/// Receiver of every exported frame, such as a video recorder.
pub trait PixelBufferConsumer: Send + Sync {
    fn rendered_output(&self, frame: ExportedFrame);
}

/// One-shot receiver of the next exported frame.
pub type SnapshotCallback = Box<dyn FnOnce(ExportedFrame) + Send>;

enum ExportCommand {
    Deliver {
        frame: ExportedFrame,
        consumer: Option<Arc<dyn PixelBufferConsumer>>,
        snapshots: Vec<SnapshotCallback>,
    },
    Shutdown,
}

/// Dedicated thread that calls consumers.
pub struct ExportQueue {
    sender: mpsc::Sender<ExportCommand>,
    thread: Option<thread::JoinHandle<()>>,
    delivered: Arc<AtomicU64>,
}

impl ExportQueue {
    /// Spawn the export thread.
    pub fn new(thread_name: &str) -> Result<Self, RendererError> {
        let (sender, receiver) = mpsc::channel::<ExportCommand>();
        let delivered = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&delivered);

        let thread = thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || export_worker(receiver, counter))
            .map_err(|e| {
                RendererError::Graphics(GraphicsError::InitializationFailed(format!(
                    "failed to spawn export thread: {e}"
                )))
            })?;

        Ok(Self {
            sender,
            thread: Some(thread),
            delivered,
        })
    }

    /// Number of frames handed to consumers so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Acquire)
    }

    fn sender(&self) -> mpsc::Sender<ExportCommand> {
        self.sender.clone()
    }
}

impl Drop for ExportQueue {
    fn drop(&mut self) {
        let _ = self.sender.send(ExportCommand::Shutdown);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            log::error!("Export thread panicked");
        }
    }
}

impl std::fmt::Debug for ExportQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportQueue")
            .field("delivered", &self.delivered())
            .finish()
    }
}

fn export_worker(receiver: mpsc::Receiver<ExportCommand>, delivered: Arc<AtomicU64>) {
    while let Ok(command) = receiver.recv() {
        match command {
            ExportCommand::Deliver {
                frame,
                consumer,
                snapshots,
            } => {
                let timestamp = frame.timestamp;
                let mut recipients = snapshots;
                if let Some(consumer) = consumer {
                    recipients.insert(
                        0,
                        Box::new(move |f: ExportedFrame| consumer.rendered_output(f)),
                    );
                }
                // The last recipient takes the frame so no copy outlives delivery.
                if let Some(last) = recipients.pop() {
                    for recipient in recipients {
                        recipient(frame.clone());
                    }
                    last(frame);
                }
                delivered.fetch_add(1, Ordering::AcqRel);
                log::trace!("Exported frame at {timestamp:.3}s");
            }
            ExportCommand::Shutdown => break,
        }
    }
    log::debug!("Export thread shut down");
}

/// Export work prepared for one frame.
///
/// The compositor renders into [`texture`](Self::texture); the frame's
/// completion handler then calls [`deliver`](ExportDelivery::deliver).
pub struct PendingExport {
    pub texture: Arc<Texture>,
    pub delivery: ExportDelivery,
}

/// Hand-off of one exported frame to the export thread.
pub struct ExportDelivery {
    frame: ExportedFrame,
    consumer: Option<Arc<dyn PixelBufferConsumer>>,
    snapshots: Vec<SnapshotCallback>,
    sender: mpsc::Sender<ExportCommand>,
}

impl ExportDelivery {
    /// Queue the frame for delivery. Safe to call from any thread.
    pub fn deliver(self) {
        let command = ExportCommand::Deliver {
            frame: self.frame,
            consumer: self.consumer,
            snapshots: self.snapshots,
        };
        if self.sender.send(command).is_err() {
            log::debug!("Export thread gone, frame discarded");
        }
    }
}

/// Owns the export pool, the registered consumer and pending snapshots.
pub struct OutputSink {
    pool: Option<Arc<PixelBufferPool>>,
    consumer: Option<Arc<dyn PixelBufferConsumer>>,
    snapshots: Vec<SnapshotCallback>,
    queue: ExportQueue,
    skipped_exports: u64,
}

impl OutputSink {
    pub fn new(thread_name: &str) -> Result<Self, RendererError> {
        Ok(Self {
            pool: None,
            consumer: None,
            snapshots: Vec::new(),
            queue: ExportQueue::new(thread_name)?,
            skipped_exports: 0,
        })
    }

    /// Create the export pool on the first camera frame.
    ///
    /// Later calls keep the existing pool.
    pub fn configure(&mut self, width: u32, height: u32) -> Result<(), GraphicsError> {
        if self.pool.is_some() {
            return Ok(());
        }
        let pool = PixelBufferPool::new(
            PixelBufferAttributes::bgra(width, height),
            EXPORT_POOL_MINIMUM,
            EXPORT_POOL_THRESHOLD,
        )?;
        log::info!(
            "Export pool configured: {width}x{height} BGRA32, {EXPORT_POOL_MINIMUM} buffers"
        );
        self.pool = Some(Arc::new(pool));
        Ok(())
    }

    /// Attributes of exported pixel buffers, once the pool exists.
    pub fn output_attributes(&self) -> Option<PixelBufferAttributes> {
        self.pool.as_ref().map(|p| p.attributes())
    }

    pub fn pool(&self) -> Option<&Arc<PixelBufferPool>> {
        self.pool.as_ref()
    }

    /// Deliver every following frame to `consumer`.
    pub fn start_export(&mut self, consumer: Arc<dyn PixelBufferConsumer>) {
        log::info!("Export started");
        self.consumer = Some(consumer);
    }

    pub fn stop_export(&mut self) {
        if self.consumer.take().is_some() {
            log::info!("Export stopped");
        }
    }

    pub fn is_exporting(&self) -> bool {
        self.consumer.is_some()
    }

    /// Deliver the next exported frame to `callback`.
    pub fn capture_snapshot(&mut self, callback: SnapshotCallback) {
        self.snapshots.push(callback);
    }

    pub fn has_pending_export(&self) -> bool {
        self.consumer.is_some() || !self.snapshots.is_empty()
    }

    /// Exports skipped because the pool was exhausted.
    pub fn skipped_exports(&self) -> u64 {
        self.skipped_exports
    }

    pub fn delivered(&self) -> u64 {
        self.queue.delivered()
    }

    /// Take a pooled buffer and import it as the readback target.
    ///
    /// Returns `None` if nothing is pending or no buffer is available; the
    /// frame then renders without export and pending snapshots wait for the
    /// next frame.
    pub fn prepare_export(
        &mut self,
        device: &Arc<GraphicsDevice>,
        timestamp: f64,
    ) -> Option<PendingExport> {
        if !self.has_pending_export() {
            return None;
        }
        let Some(pool) = &self.pool else {
            log::trace!("Export pending but no camera frame has configured the pool");
            return None;
        };

        let buffer = match pool.acquire() {
            Ok(buffer) => buffer,
            Err(e) => {
                self.skipped_exports += 1;
                log::warn!("Skipping export at {timestamp:.3}s: {e}");
                return None;
            }
        };

        let texture = match device.import_pixel_buffer_plane(
            buffer.pixel_buffer(),
            0,
            TextureFormat::Bgra8Unorm,
            "export_buffer",
        ) {
            Ok(texture) => texture,
            Err(e) => {
                log::warn!("Failed to import export buffer: {e}");
                return None;
            }
        };

        let frame = ExportedFrame {
            width: buffer.width(),
            height: buffer.height(),
            bytes_per_row: buffer.bytes_per_row(),
            timestamp,
            buffer: Arc::new(buffer),
        };

        Some(PendingExport {
            texture,
            delivery: ExportDelivery {
                frame,
                consumer: self.consumer.clone(),
                snapshots: std::mem::take(&mut self.snapshots),
                sender: self.queue.sender(),
            },
        })
    }
}

impl std::fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSink")
            .field("attributes", &self.output_attributes())
            .field("exporting", &self.is_exporting())
            .field("pending_snapshots", &self.snapshots.len())
            .finish()
    }
}

static_assertions::assert_impl_all!(ExportDelivery: Send);

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use facelens_graphics::{GraphicsInstance, PixelFormat};

    struct ChannelConsumer(parking_lot::Mutex<mpsc::Sender<ExportedFrame>>);

    impl PixelBufferConsumer for ChannelConsumer {
        fn rendered_output(&self, frame: ExportedFrame) {
            let _ = self.0.lock().send(frame);
        }
    }

    fn device() -> Arc<GraphicsDevice> {
        GraphicsInstance::new().unwrap().create_device().unwrap()
    }

    #[test]
    fn test_no_export_without_consumer() {
        let device = device();
        let mut sink = OutputSink::new("test-export").unwrap();
        sink.configure(64, 32).unwrap();
        assert!(sink.prepare_export(&device, 0.0).is_none());
        assert_eq!(sink.pool().unwrap().outstanding(), 0);
    }

    #[test]
    fn test_pool_configured_once() {
        let mut sink = OutputSink::new("test-export").unwrap();
        assert!(sink.output_attributes().is_none());
        sink.configure(64, 32).unwrap();
        sink.configure(128, 128).unwrap();
        let attributes = sink.output_attributes().unwrap();
        assert_eq!((attributes.width, attributes.height), (64, 32));
        assert_eq!(attributes.format, PixelFormat::Bgra32);
    }

    #[test]
    fn test_consumer_receives_frame() {
        let device = device();
        let (tx, rx) = mpsc::channel();
        let mut sink = OutputSink::new("test-export").unwrap();
        sink.configure(64, 32).unwrap();
        sink.start_export(Arc::new(ChannelConsumer(parking_lot::Mutex::new(tx))));

        let pending = sink.prepare_export(&device, 2.25).unwrap();
        assert_eq!(pending.texture.format(), TextureFormat::Bgra8Unorm);
        assert!(pending.texture.is_imported());
        drop(pending.texture);
        pending.delivery.deliver();

        let frame = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!((frame.width, frame.height), (64, 32));
        assert_eq!(frame.timestamp, 2.25);
        assert_eq!(frame.bytes_per_row, frame.buffer.bytes_per_row());
        assert_eq!(sink.pool().unwrap().outstanding(), 1);
        drop(frame);
        assert_eq!(sink.pool().unwrap().outstanding(), 0);
    }

    #[test]
    fn test_snapshot_is_one_shot() {
        let device = device();
        let (tx, rx) = mpsc::channel();
        let mut sink = OutputSink::new("test-export").unwrap();
        sink.configure(16, 16).unwrap();
        sink.capture_snapshot(Box::new(move |frame| {
            let _ = tx.send(frame.timestamp);
        }));

        sink.prepare_export(&device, 1.0).unwrap().delivery.deliver();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1.0);
        assert!(!sink.has_pending_export());
        assert!(sink.prepare_export(&device, 2.0).is_none());
    }

    #[test]
    fn test_exhausted_pool_skips_export() {
        let device = device();
        let mut sink = OutputSink::new("test-export").unwrap();
        sink.configure(16, 16).unwrap();
        sink.capture_snapshot(Box::new(|_| {}));

        let held: Vec<_> = (0..EXPORT_POOL_THRESHOLD)
            .map(|_| sink.pool().unwrap().acquire().unwrap())
            .collect();
        assert!(sink.prepare_export(&device, 0.0).is_none());
        assert_eq!(sink.skipped_exports(), 1);
        assert!(sink.has_pending_export());

        drop(held);
        assert!(sink.prepare_export(&device, 0.0).is_some());
    }
}
