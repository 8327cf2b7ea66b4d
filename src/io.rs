//! Boundary types for the persistence collaborator: a flattened RGBA
//! snapshot of the canvas and the error type shared by every fallible call.

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Maximum supported canvas dimension in pixels (per axis).
/// Prevents memory exhaustion from crafted snapshot files.
pub const MAX_CANVAS_DIM: u32 = 32_768;

const SNAPSHOT_MAGIC: &str = "PCS1";

/// Error type for snapshot and settings I/O
#[derive(Debug)]
pub enum EngineError {
    Io(std::io::Error),
    Serialize(String),
    InvalidSnapshot(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Io(e) => write!(f, "I/O error: {}", e),
            EngineError::Serialize(e) => write!(f, "Serialization error: {}", e),
            EngineError::InvalidSnapshot(e) => write!(f, "Invalid snapshot: {}", e),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e)
    }
}

impl From<Box<bincode::ErrorKind>> for EngineError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        EngineError::Serialize(e.to_string())
    }
}

/// Read-only flattened copy of the canvas handed to collaborators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatSnapshot {
    magic: String,
    pub width: u32,
    pub height: u32,
    /// Straight (non-premultiplied) RGBA, row-major.
    pub pixels: Vec<u8>,
}

impl FlatSnapshot {
    pub fn from_image(img: &RgbaImage) -> Self {
        Self {
            magic: SNAPSHOT_MAGIC.to_string(),
            width: img.width(),
            height: img.height(),
            pixels: img.as_raw().clone(),
        }
    }

    /// Pixel buffer as an image.  Fails if the byte count does not match the
    /// dimensions.
    pub fn to_image(&self) -> Result<RgbaImage, EngineError> {
        RgbaImage::from_raw(self.width, self.height, self.pixels.clone()).ok_or_else(|| {
            EngineError::InvalidSnapshot(format!(
                "{} bytes for a {}x{} canvas, expected {}",
                self.pixels.len(),
                self.width,
                self.height,
                self.expected_len()
            ))
        })
    }

    fn expected_len(&self) -> u64 {
        self.width as u64 * self.height as u64 * 4
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(EngineError::InvalidSnapshot(format!("Unknown magic '{}'", self.magic)));
        }
        if self.width == 0 || self.height == 0 {
            return Err(EngineError::InvalidSnapshot("Canvas dimensions cannot be zero".into()));
        }
        if self.width > MAX_CANVAS_DIM || self.height > MAX_CANVAS_DIM {
            return Err(EngineError::InvalidSnapshot(format!(
                "Canvas size {}x{} exceeds maximum allowed {}x{}",
                self.width, self.height, MAX_CANVAS_DIM, MAX_CANVAS_DIM
            )));
        }
        if self.pixels.len() as u64 != self.expected_len() {
            return Err(EngineError::InvalidSnapshot(format!(
                "Pixel data has {} bytes, expected {}",
                self.pixels.len(),
                self.expected_len()
            )));
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>, EngineError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EngineError> {
        let snap: FlatSnapshot = bincode::deserialize(bytes)?;
        snap.validate()?;
        Ok(snap)
    }

    pub fn write_to(&self, path: &Path) -> Result<(), EngineError> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self, EngineError> {
        let file = File::open(path)?;
        let snap: FlatSnapshot = bincode::deserialize_from(BufReader::new(file))?;
        snap.validate()?;
        Ok(snap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn decode_rejects_truncated_pixels() {
        let mut snap = FlatSnapshot::from_image(&RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 4])));
        snap.pixels.truncate(10);
        let bytes = snap.encode().unwrap();
        match FlatSnapshot::decode(&bytes) {
            Err(EngineError::InvalidSnapshot(msg)) => assert!(msg.contains("expected 24"), "{}", msg),
            other => panic!("expected InvalidSnapshot, got {:?}", other),
        }
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(FlatSnapshot::decode(&[0xff; 5]), Err(EngineError::Serialize(_))));
    }

    #[test]
    fn encoded_snapshot_restores_image() {
        let img = RgbaImage::from_fn(4, 3, |x, y| Rgba([x as u8, y as u8, 7, 255]));
        let decoded = FlatSnapshot::decode(&FlatSnapshot::from_image(&img).encode().unwrap()).unwrap();
        assert_eq!(decoded.to_image().unwrap(), img);
    }
}
