//! Per-device image and volume access
use std::path::Path;

use crate::backend::{ForensicBackend, Image, Partition, Volume};
use crate::error::QueryError;

/// Opens one device as an image and volume, at most once
///
/// The open outcome is cached; both handles are released when the accessor
/// is dropped.
pub struct DeviceAccessor<'b> {
    backend: &'b dyn ForensicBackend,
    device_path: String,
    opened: Option<bool>,
    // Declared before `image` so the volume is dropped first
    volume: Option<Box<dyn Volume>>,
    image: Option<Box<dyn Image>>,
}

impl<'b> DeviceAccessor<'b> {
    pub fn new(backend: &'b dyn ForensicBackend, device_path: impl Into<String>) -> Self {
        Self {
            backend,
            device_path: device_path.into(),
            opened: None,
            volume: None,
            image: None,
        }
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Attempt to open the image and its volume; later calls reuse the outcome
    pub fn open(&mut self) -> bool {
        if let Some(result) = self.opened {
            return result;
        }

        let result = match self.try_open() {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("{}", e);
                false
            }
        };
        self.opened = Some(result);
        result
    }

    fn try_open(&mut self) -> Result<(), QueryError> {
        let image = self
            .backend
            .open_image(Path::new(&self.device_path))
            .map_err(|e| QueryError::ImageOpen {
                device: self.device_path.clone(),
                reason: e.to_string(),
            })?;

        let volume = image.open_volume().map_err(|e| QueryError::VolumeOpen {
            device: self.device_path.clone(),
            reason: e.to_string(),
        });
        // The image stays open even when no volume was found; it is released
        // with the accessor.
        self.image = Some(image);
        self.volume = Some(volume?);
        Ok(())
    }

    /// The opened volume, if `open` succeeded
    pub fn volume(&self) -> Option<&dyn Volume> {
        match self.opened {
            Some(true) => self.volume.as_deref(),
            _ => None,
        }
    }

    /// Visit each partition descriptor in ascending address order
    ///
    /// Nothing is visited when the device cannot be opened. Empty slots in
    /// the partition table are skipped.
    pub fn partitions<F>(&mut self, mut visitor: F)
    where
        F: FnMut(&dyn Volume, &Partition),
    {
        if !self.open() {
            return;
        }
        let Some(volume) = self.volume() else {
            return;
        };

        for index in 0..volume.partition_count() {
            match volume.partition(index) {
                Some(part) => visitor(volume, &part),
                None => tracing::debug!(
                    "{}: skipping empty partition slot {}",
                    self.device_path,
                    index
                ),
            }
        }
    }
}
