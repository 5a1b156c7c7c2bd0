//! Discovery of capturable windows, cameras and audio inputs.
//!
//! Enumeration itself is delegated to a [`DeviceSource`]; the catalog decides
//! what is rescanned and what is cached.

mod ffmpeg;

pub use ffmpeg::{
    parse_dshow_devices, parse_pactl_sources, parse_window_titles, parse_wmctrl_windows,
    scan_video4linux, FfmpegDeviceSource,
};

use crate::error::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reelcap_common::{Device, WindowInfo};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Names that look like a microphone input.
static MICROPHONE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(microphone|\bmic\b|mic\s*array|headset|alsa_input|input)").unwrap());

/// Names of software cameras that only deliver a fixed native rate.
static VIRTUAL_CAMERA_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(virtual|obs[- ]cam|manycam|xsplit|snap camera|v4l2 ?loopback|dummy video)").unwrap()
});

/// Whether a camera name belongs to a virtual-class device.
pub fn is_virtual_camera_name(name: &str) -> bool {
    VIRTUAL_CAMERA_PATTERN.is_match(name)
}

/// Platform enumeration calls.
#[async_trait]
pub trait DeviceSource: Send + Sync {
    /// List visible top-level windows.
    async fn windows(&self) -> Result<Vec<WindowInfo>>;

    /// List camera devices.
    async fn cameras(&self) -> Result<Vec<Device>>;

    /// List audio input devices.
    async fn audio_devices(&self) -> Result<Vec<Device>>;
}

/// Cached view over a [`DeviceSource`].
///
/// Windows and cameras are rescanned on every call. Audio devices are scanned
/// once and then frozen for the lifetime of the catalog, so a selection in
/// progress never sees the list change under it.
pub struct DeviceCatalog {
    source: Arc<dyn DeviceSource>,
    audio: OnceCell<Vec<Device>>,
}

impl DeviceCatalog {
    pub fn new(source: Arc<dyn DeviceSource>) -> Self {
        Self {
            source,
            audio: OnceCell::new(),
        }
    }

    pub async fn list_windows(&self) -> Result<Vec<WindowInfo>> {
        let windows = self.source.windows().await?;
        debug!(count = windows.len(), "Enumerated windows");
        Ok(windows)
    }

    pub async fn list_cameras(&self) -> Result<Vec<Device>> {
        let mut cameras = self.source.cameras().await?;
        for camera in &mut cameras {
            if !camera.is_virtual {
                camera.is_virtual = is_virtual_camera_name(&camera.display_name)
                    || camera
                        .alternate_name
                        .as_deref()
                        .is_some_and(is_virtual_camera_name);
            }
        }
        debug!(count = cameras.len(), "Enumerated cameras");
        Ok(cameras)
    }

    /// Audio inputs from the first successful scan.
    ///
    /// A failed first scan is cached as an empty list.
    pub async fn list_audio_devices(&self) -> Vec<Device> {
        self.audio
            .get_or_init(|| async {
                match self.source.audio_devices().await {
                    Ok(devices) => {
                        debug!(count = devices.len(), "Enumerated audio devices");
                        devices
                    }
                    Err(e) => {
                        warn!("Audio device enumeration failed: {}", e);
                        Vec::new()
                    }
                }
            })
            .await
            .clone()
    }

    /// Prefer a microphone-like input, else the first device.
    pub async fn get_best_audio_device(&self) -> Option<Device> {
        let devices = self.list_audio_devices().await;
        devices
            .iter()
            .find(|d| MICROPHONE_PATTERN.is_match(&d.display_name))
            .or_else(|| devices.first())
            .cloned()
    }

    /// Look up a camera by display name.
    pub async fn find_camera(&self, display_name: &str) -> Result<Option<Device>> {
        Ok(self
            .list_cameras()
            .await?
            .into_iter()
            .find(|c| c.display_name == display_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Source whose contents can be swapped between calls.
    #[derive(Default)]
    struct StubSource {
        cameras: Mutex<Vec<Device>>,
        audio: Mutex<Vec<Device>>,
        audio_scans: AtomicUsize,
    }

    #[async_trait]
    impl DeviceSource for StubSource {
        async fn windows(&self) -> Result<Vec<WindowInfo>> {
            Ok(vec![WindowInfo {
                title: "My App".to_string(),
                id: None,
            }])
        }

        async fn cameras(&self) -> Result<Vec<Device>> {
            Ok(self.cameras.lock().unwrap().clone())
        }

        async fn audio_devices(&self) -> Result<Vec<Device>> {
            self.audio_scans.fetch_add(1, Ordering::SeqCst);
            Ok(self.audio.lock().unwrap().clone())
        }
    }

    #[tokio::test]
    async fn test_audio_devices_are_scanned_once() {
        let source = Arc::new(StubSource::default());
        *source.audio.lock().unwrap() = vec![Device::new("Line In")];
        let catalog = DeviceCatalog::new(source.clone());

        assert_eq!(catalog.list_audio_devices().await, vec![Device::new("Line In")]);

        // Hardware change after the first scan is not observed.
        *source.audio.lock().unwrap() = vec![Device::new("USB Microphone")];
        assert_eq!(catalog.list_audio_devices().await, vec![Device::new("Line In")]);
        assert_eq!(source.audio_scans.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cameras_are_rescanned() {
        let source = Arc::new(StubSource::default());
        let catalog = DeviceCatalog::new(source.clone());
        assert!(catalog.list_cameras().await.unwrap().is_empty());

        *source.cameras.lock().unwrap() = vec![Device::new("HD Webcam")];
        assert_eq!(catalog.list_cameras().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_best_audio_prefers_microphone() {
        let source = Arc::new(StubSource::default());
        *source.audio.lock().unwrap() = vec![
            Device::new("Stereo Mix (Realtek Audio)"),
            Device::new("Microphone Array (Realtek Audio)"),
        ];
        let catalog = DeviceCatalog::new(source);
        assert_eq!(
            catalog.get_best_audio_device().await.map(|d| d.display_name),
            Some("Microphone Array (Realtek Audio)".to_string())
        );
    }

    #[tokio::test]
    async fn test_best_audio_falls_back_to_first_then_none() {
        let source = Arc::new(StubSource::default());
        *source.audio.lock().unwrap() = vec![Device::new("Stereo Mix"), Device::new("Line 2")];
        let catalog = DeviceCatalog::new(source);
        assert_eq!(
            catalog.get_best_audio_device().await.map(|d| d.display_name),
            Some("Stereo Mix".to_string())
        );

        let catalog = DeviceCatalog::new(Arc::new(StubSource::default()));
        assert_eq!(catalog.get_best_audio_device().await, None);
    }

    #[tokio::test]
    async fn test_virtual_cameras_are_flagged() {
        let source = Arc::new(StubSource::default());
        *source.cameras.lock().unwrap() = vec![
            Device::new("OBS Virtual Camera"),
            Device::new("Integrated Webcam"),
        ];
        let catalog = DeviceCatalog::new(source);
        let cameras = catalog.list_cameras().await.unwrap();
        assert!(cameras[0].is_virtual);
        assert!(!cameras[1].is_virtual);

        let found = catalog.find_camera("OBS Virtual Camera").await.unwrap().unwrap();
        assert!(found.is_virtual);
        assert!(catalog.find_camera("Missing").await.unwrap().is_none());
    }

    #[test]
    fn test_virtual_camera_names() {
        assert!(is_virtual_camera_name("OBS Virtual Camera"));
        assert!(is_virtual_camera_name("ManyCam Video Source"));
        assert!(is_virtual_camera_name("Dummy video device (0x0000)"));
        assert!(!is_virtual_camera_name("Logitech BRIO"));
    }
}
