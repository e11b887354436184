//! Region extraction and recognition caching.
//!
//! Turns an (image, rectangle) pair into recognized text, doing the
//! expensive work at most once per distinct key for the cache's whole
//! lifetime: the crop is saved as a content-addressed artifact file,
//! and the recognized text is persisted in a [`CacheStore`]. Keys are
//! derived from the literal image identity and coordinate strings, not
//! from pixel content, so two differently-worded requests that crop
//! identical pixels are distinct entries.

mod engine;
mod store;

pub use engine::{correct_confusables, RecognitionEngine, TesseractEngine};
pub use store::{CacheStore, FsStore, MemoryStore};

use std::path::{Path, PathBuf};

use image::{DynamicImage, GenericImageView, Luma};
use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{RegionError, Result, SchemaError};

/// Luminance cutoff for binarizing a noisy crop.
const BINARIZE_THRESHOLD: u8 = 50;

lazy_static! {
    static ref REGION_SPEC: Regex = Regex::new(r"^(\d+),(\d+)[ ,](\d+),(\d+)$").unwrap();
}

/// A crop rectangle: origin plus size, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Parse an image-pipeline region spec of the form `x,y w,h`.
///
/// `"615,158 32,24"` crops the 32x24 rectangle whose top-left corner
/// is at (615, 158). A zero-size rectangle is malformed: it can never
/// contain a recognizable value.
pub fn parse_region_spec(spec: &str) -> std::result::Result<CropBox, SchemaError> {
    let caps = REGION_SPEC
        .captures(spec.trim())
        .ok_or_else(|| SchemaError::BadRegionSpec(spec.to_string()))?;
    let parse = |i: usize| -> std::result::Result<u32, SchemaError> {
        caps[i]
            .parse()
            .map_err(|_| SchemaError::BadRegionSpec(spec.to_string()))
    };
    let crop = CropBox {
        x: parse(1)?,
        y: parse(2)?,
        width: parse(3)?,
        height: parse(4)?,
    };
    if crop.width == 0 || crop.height == 0 {
        return Err(SchemaError::BadRegionSpec(spec.to_string()));
    }
    Ok(crop)
}

/// Content-addressed key for an (image identity, coordinates) request.
///
/// A pure function of the two literal strings. Two coordinate strings
/// that crop identical pixels still produce distinct keys; accepted
/// duplication, by design of the addressing scheme.
pub fn region_key(image: &str, coordinates: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image.as_bytes());
    hasher.update(coordinates.as_bytes());
    format!("{:x}", hasher.finalize())
}

struct DecodedSlot {
    path: PathBuf,
    image: DynamicImage,
}

/// Crops regions out of source images into cached artifact files.
///
/// Holds a single-slot decoded-image cache: many consecutive crops
/// typically come from the same source image before moving on to the
/// next, so only the most recently opened source stays decoded. The
/// slot is owned by this extractor, never shared; concurrent workers
/// each construct their own.
pub struct RegionExtractor {
    regions_dir: PathBuf,
    slot: Option<DecodedSlot>,
}

impl RegionExtractor {
    pub fn new(regions_dir: impl Into<PathBuf>) -> Self {
        Self {
            regions_dir: regions_dir.into(),
            slot: None,
        }
    }

    /// Crop `coordinates` out of `image` into an artifact file,
    /// returning its path.
    ///
    /// If the artifact already exists the source image is not even
    /// opened. If the crop's top-left pixel is not exactly white the
    /// region is considered noisy and is grayscaled and binarized at a
    /// fixed luminance cutoff; clean crops pass through unmodified.
    pub fn extract(&mut self, image: &Path, coordinates: &str) -> Result<PathBuf> {
        let key = region_key(&image.display().to_string(), coordinates);
        let artifact = store::sharded_path(&self.regions_dir, &key, "tiff")?;
        if artifact.exists() {
            return Ok(artifact);
        }

        info!(image = %image.display(), coordinates, "extracting region");

        let crop = parse_region_spec(coordinates)?;
        let source = self.decode(image)?;

        let (width, height) = source.dimensions();
        let fits = crop.x.checked_add(crop.width).is_some_and(|x1| x1 <= width)
            && crop.y.checked_add(crop.height).is_some_and(|y1| y1 <= height);
        if !fits {
            return Err(RegionError::OutOfBounds(coordinates.to_string(), width, height).into());
        }

        let mut region = source.crop_imm(crop.x, crop.y, crop.width, crop.height);

        let [r, g, b, _] = region.get_pixel(0, 0).0;
        if (r, g, b) != (255, 255, 255) {
            region = binarize(&region);
        }

        let dir = artifact.parent().expect("sharded path always has a parent");
        std::fs::create_dir_all(dir)?;

        // Write-then-rename so a concurrent run never reads a torn
        // artifact.
        let tmp = dir.join(format!("{key}.{}.tiff", std::process::id()));
        region.save(&tmp)?;
        std::fs::rename(&tmp, &artifact)?;

        Ok(artifact)
    }

    fn decode(&mut self, path: &Path) -> Result<&DynamicImage> {
        let stale = match &self.slot {
            Some(slot) => slot.path.as_path() != path,
            None => true,
        };
        if stale {
            debug!(image = %path.display(), "decoding source image");
            let image = image::open(path)?;
            self.slot = Some(DecodedSlot {
                path: path.to_path_buf(),
                image,
            });
        }
        Ok(&self.slot.as_ref().expect("slot just filled").image)
    }
}

/// Grayscale then threshold: anything brighter than the cutoff goes
/// white, the rest black. Salvages low-contrast crops.
fn binarize(region: &DynamicImage) -> DynamicImage {
    let mut gray = region.to_luma8();
    for pixel in gray.pixels_mut() {
        *pixel = if pixel.0[0] > BINARIZE_THRESHOLD {
            Luma([255])
        } else {
            Luma([0])
        };
    }
    DynamicImage::ImageLuma8(gray)
}

/// The full region pipeline: crop, recognize, cache.
pub struct RegionRecognizer<S: CacheStore, E: RecognitionEngine> {
    extractor: RegionExtractor,
    store: S,
    engine: E,
}

impl<S: CacheStore, E: RecognitionEngine> RegionRecognizer<S, E> {
    pub fn new(regions_dir: impl Into<PathBuf>, store: S, engine: E) -> Self {
        Self {
            extractor: RegionExtractor::new(regions_dir),
            store,
            engine,
        }
    }

    /// Recognized text for a region, from cache if present.
    ///
    /// A cached value is returned unconditionally; recognition is
    /// skipped entirely and later changes to the source image have no
    /// effect on the entry. On a miss the crop artifact is produced,
    /// the engine invoked, the confusable-correction table applied,
    /// and the corrected text persisted under the key before
    /// returning. Failed or empty recognition is surfaced to the
    /// caller without caching anything.
    pub fn recognize(&mut self, image: &Path, coordinates: &str) -> Result<String> {
        let key = region_key(&image.display().to_string(), coordinates);
        if self.store.exists(&key) {
            return Ok(self.store.get(&key)?);
        }

        let artifact = self.extractor.extract(image, coordinates)?;
        let text = self.engine.recognize(&artifact)?;
        let text = correct_confusables(&text);
        self.store.set(&key, &text)?;
        Ok(text)
    }

    /// The underlying store, for callers that pre-seed or inspect it.
    pub fn store(&self) -> &S {
        &self.store
    }
}
