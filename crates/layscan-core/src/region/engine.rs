//! Recognition engine contract and the Tesseract implementation.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use tracing::debug;

use crate::error::RegionError;

lazy_static! {
    /// Whole-value corrections for characters the engine commonly
    /// confuses on short numeric regions. Applied only when the entire
    /// recognized string equals a key.
    static ref CONFUSABLES: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("O", "0");
        m.insert("_", "-");
        m
    };
}

/// Correct a recognized value against the confusable table.
pub fn correct_confusables(text: &str) -> String {
    match CONFUSABLES.get(text) {
        Some(corrected) => (*corrected).to_string(),
        None => text.to_string(),
    }
}

/// An external optical recognition engine.
///
/// Invoked as a blocking call over one region artifact file. Anything
/// that reads an image file and produces text fits behind this.
pub trait RecognitionEngine {
    /// Recognize the text in `artifact`, stripped of surrounding
    /// whitespace. An empty result is reported as
    /// [`RegionError::EmptyRecognition`].
    fn recognize(&self, artifact: &Path) -> Result<String, RegionError>;
}

/// Tesseract invoked as an external command.
///
/// Runs `tesseract <artifact> <base> --psm <psm>` and reads the
/// `<base>.txt` result file tesseract writes next to the artifact.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    binary: String,
    /// Page segmentation mode; 7 treats the region as a single line.
    psm: u8,
    /// Invocations past this deadline are killed and reported as
    /// recognition failures.
    timeout: Duration,
}

impl TesseractEngine {
    pub fn new() -> Self {
        Self {
            binary: "tesseract".to_string(),
            psm: 7,
            timeout: Duration::from_secs(30),
        }
    }

    /// Use a different tesseract binary.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Set the page segmentation mode.
    pub fn with_psm(mut self, psm: u8) -> Self {
        self.psm = psm;
        self
    }

    /// Set the per-invocation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RecognitionEngine for TesseractEngine {
    fn recognize(&self, artifact: &Path) -> Result<String, RegionError> {
        let recognition_err = |reason: String| RegionError::Recognition {
            artifact: artifact.display().to_string(),
            reason,
        };

        let base = artifact.with_extension("");
        debug!(artifact = %artifact.display(), psm = self.psm, "invoking recognition engine");

        let mut child = Command::new(&self.binary)
            .arg(artifact)
            .arg(&base)
            .arg("--psm")
            .arg(self.psm.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| recognition_err(format!("failed to spawn {}: {e}", self.binary)))?;

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child
                .try_wait()
                .map_err(|e| recognition_err(format!("wait failed: {e}")))?
            {
                Some(status) => break status,
                None if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(recognition_err(format!(
                        "timed out after {:?}",
                        self.timeout
                    )));
                }
                None => std::thread::sleep(Duration::from_millis(25)),
            }
        };

        if !status.success() {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            return Err(recognition_err(format!(
                "exited with {status}: {}",
                stderr.trim()
            )));
        }

        let result_file = base.with_extension("txt");
        let content = std::fs::read_to_string(&result_file)
            .map_err(|e| recognition_err(format!("no result file {}: {e}", result_file.display())))?;
        // The raw result file must not outlive the invocation: if the
        // artifact and cache directories coincide it is byte-for-byte
        // the store path for this key, and a later lookup would take
        // uncorrected engine output for a cached value.
        let _ = std::fs::remove_file(&result_file);

        let text = content.trim().to_string();
        if text.is_empty() {
            return Err(RegionError::EmptyRecognition(
                artifact.display().to_string(),
            ));
        }
        Ok(text)
    }
}
