use gatewatch_core::{PlateReader, ServiceError};
use image::{GrayImage, ImageFormat};
use std::io::{Cursor, ErrorKind, Write};
use std::process::{Command, Stdio};

/// Plate OCR through the `tesseract` executable, one call per crop.
///
/// Runs in single-line mode (`--psm 7`) with the default engine (`--oem 3`).
pub struct TesseractReader {
    binary: String,
}

impl TesseractReader {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl PlateReader for TesseractReader {
    fn read(&mut self, crop: &GrayImage) -> Result<String, ServiceError> {
        let mut png = Vec::new();
        crop.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| ServiceError::Failed(format!("encoding crop: {e}")))?;

        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "--oem", "3", "--psm", "7"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    ServiceError::Unavailable(format!("{} not found", self.binary))
                }
                _ => ServiceError::Failed(format!("spawning {}: {e}", self.binary)),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&png)
                .map_err(|e| ServiceError::Failed(format!("writing to {}: {e}", self.binary)))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| ServiceError::Failed(format!("waiting for {}: {e}", self.binary)))?;
        if !output.status.success() {
            return Err(ServiceError::Failed(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::trace!(%text, "tesseract read");
        Ok(text)
    }
}
