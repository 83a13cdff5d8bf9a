//! Backend reading raw disk images and block devices directly
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use super::{ForensicBackend, Image, Volume};
use crate::fs::common::BlockDevice;
use crate::volume::DosVolume;

/// Opens device paths as memory-mapped raw images
#[derive(Debug, Default, Clone, Copy)]
pub struct RawBackend;

impl RawBackend {
    pub fn new() -> Self {
        RawBackend
    }
}

impl ForensicBackend for RawBackend {
    fn open_image(&self, path: &Path) -> Result<Box<dyn Image>> {
        let device = BlockDevice::open(path)
            .with_context(|| format!("Failed to open image {}", path.display()))?;
        tracing::debug!("Opened {} ({} bytes)", path.display(), device.size());
        Ok(Box::new(RawImage::new(device)))
    }
}

/// A raw image shared by its volume and filesystems
pub struct RawImage {
    device: Arc<BlockDevice>,
}

impl RawImage {
    pub fn new(device: BlockDevice) -> Self {
        RawImage {
            device: Arc::new(device),
        }
    }
}

impl Image for RawImage {
    fn open_volume(&self) -> Result<Box<dyn Volume>> {
        let volume = DosVolume::open(self.device.clone()).context("No DOS partition table")?;
        Ok(Box::new(volume))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_image() {
        let backend = RawBackend::new();
        assert!(backend
            .open_image(Path::new("/nonexistent/diskwalk.img"))
            .is_err());
    }

    #[test]
    fn test_image_without_table() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 4096]).unwrap();
        file.flush().unwrap();

        let image = RawBackend::new().open_image(file.path()).unwrap();
        assert!(image.open_volume().is_err());
    }
}
