//! Frame acquisition sources.
//!
//! Two acquisition strategies exist behind one `CameraSource` surface:
//!
//! - **Pull** (`http://`, `https://`, `stub://`): the caller drives a
//!   blocking `read_next_frame` loop against an MJPEG/JPEG network camera
//!   (or a synthetic stub for tests) and owns loop termination.
//! - **Push** (`udp://`): a negotiated peer session delivers RTP/JPEG
//!   datagrams to a background thread, which publishes each decoded frame
//!   into a shared latest-frame slot and fires the registered callback.
//!   There is no blocking read; consumers snapshot `latest()`.
//!
//! Both variants expose `is_active`, `stop`, and `latest`. All frames are
//! normalized to RGB before they leave this module.

use anyhow::{anyhow, Context, Result};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use url::Url;

use crate::frame::{Frame, LatestFrame};

pub mod http;
pub mod peer;

pub use http::HttpPullSource;
pub use peer::PeerPushSource;

/// Configuration for a camera endpoint.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Stream URL. Supported schemes: http(s):// for MJPEG/JPEG pull,
    /// udp:// for a peer push session, stub:// for a synthetic source.
    pub url: String,
    /// Target frame rate (frames per second); 0 disables decimation.
    pub target_fps: u32,
    /// Frame width (synthetic frames only; network sources use the
    /// dimensions of the decoded stream).
    pub width: u32,
    /// Frame height (synthetic frames only).
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            url: "stub://demo_camera".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

/// How frames reach the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Caller invokes a blocking read in a loop.
    Pull,
    /// Frames arrive on a background thread; caller snapshots `latest()`.
    Push,
}

/// Frame counters for health logging.
#[derive(Clone, Debug)]
pub struct CameraStats {
    pub frames_captured: u64,
    pub source: String,
}

type FrameCallback = Box<dyn Fn(&Frame) + Send + Sync>;

/// Optional observer invoked for every delivered frame. Shared with the
/// push delivery thread, so registration works before or after connect.
#[derive(Clone, Default)]
pub struct FrameListener {
    inner: Arc<Mutex<Option<FrameCallback>>>,
}

impl FrameListener {
    pub fn set(&self, callback: impl Fn(&Frame) + Send + Sync + 'static) {
        *self.lock() = Some(Box::new(callback));
    }

    pub(crate) fn emit(&self, frame: &Frame) {
        if let Some(callback) = self.lock().as_ref() {
            callback(frame);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<FrameCallback>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// A live camera, pull- or push-style depending on the URL scheme.
pub struct CameraSource {
    backend: CameraBackend,
    slot: LatestFrame,
    listener: FrameListener,
}

enum CameraBackend {
    Pull(HttpPullSource),
    Push(PeerPushSource),
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        let url = Url::parse(&config.url).context("parse camera url")?;
        let slot = LatestFrame::new();
        let listener = FrameListener::default();
        let backend = match url.scheme() {
            "http" | "https" | "stub" => CameraBackend::Pull(HttpPullSource::new(config)),
            "udp" => CameraBackend::Push(PeerPushSource::new(
                config,
                url,
                slot.clone(),
                listener.clone(),
            )?),
            other => {
                return Err(anyhow!(
                    "unsupported camera scheme '{}'; expected http(s), udp, or stub",
                    other
                ))
            }
        };
        Ok(Self {
            backend,
            slot,
            listener,
        })
    }

    pub fn delivery(&self) -> Delivery {
        match self.backend {
            CameraBackend::Pull(_) => Delivery::Pull,
            CameraBackend::Push(_) => Delivery::Push,
        }
    }

    /// Open the underlying stream or session. For the push variant this
    /// spawns the delivery thread.
    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Pull(source) => source.connect(),
            CameraBackend::Push(source) => source.connect(),
        }
    }

    /// Block until the next frame arrives. Pull variant only; the push
    /// variant has no read loop to drive.
    pub fn read_next_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            CameraBackend::Pull(source) => {
                let frame = source.next_frame()?;
                self.slot.publish(frame.clone());
                self.listener.emit(&frame);
                Ok(frame)
            }
            CameraBackend::Push(_) => Err(anyhow!(
                "push source delivers frames asynchronously; snapshot latest() instead"
            )),
        }
    }

    /// Most recently delivered frame, if any.
    pub fn latest(&self) -> Option<Frame> {
        self.slot.snapshot()
    }

    /// Register a per-frame observer.
    pub fn set_on_frame(&self, callback: impl Fn(&Frame) + Send + Sync + 'static) {
        self.listener.set(callback);
    }

    pub fn is_active(&self) -> bool {
        match &self.backend {
            CameraBackend::Pull(source) => source.is_active(),
            CameraBackend::Push(source) => source.is_active(),
        }
    }

    /// Release the stream, socket, and delivery thread.
    pub fn stop(&mut self) {
        match &mut self.backend {
            CameraBackend::Pull(source) => source.stop(),
            CameraBackend::Push(source) => source.stop(),
        }
        self.slot.clear();
    }

    pub fn stats(&self) -> CameraStats {
        match &self.backend {
            CameraBackend::Pull(source) => source.stats(),
            CameraBackend::Push(source) => source.stats(),
        }
    }

    /// Local endpoint of the peer session. `None` for the pull variant or
    /// before connect.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.backend {
            CameraBackend::Pull(_) => None,
            CameraBackend::Push(source) => source.local_addr(),
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.stop();
    }
}

pub(crate) fn frame_interval(target_fps: u32) -> std::time::Duration {
    if target_fps == 0 {
        std::time::Duration::from_millis(0)
    } else {
        std::time::Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}
