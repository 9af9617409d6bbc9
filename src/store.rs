use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use tracing::{info, warn};

use crate::{compositor::Overlay, error::AppError};

/// Label → file name table shipped with the demo
pub const ANIMAL_IMAGES: &[(&str, &str)] = &[
    ("Sassy Sloth", "sassy_sloth.png"),
    ("Goofy Goat", "goofy_goat.png"),
    ("Wacky Walrus", "wacky_walrus.png"),
    ("Cheeky Chinchilla", "cheeky_chinchilla.png"),
    ("Grumpy Cat", "grumpy_cat.png"),
    ("Majestic Manatee", "majestic_manatee.png"),
    ("Ponderous Penguin", "ponderous_penguin.png"),
    ("Daring Duck", "daring_duck.png"),
    ("Sleepy Owl", "sleepy_owl.png"),
    ("Sneaky Ferret", "sneaky_ferret.png"),
    ("Enthusiastic Elephant", "enthusiastic_elephant.png"),
    ("Dramatic Llama", "dramatic_llama.png"),
    ("Fabulous Flamingo", "fabulous_flamingo.png"),
    ("Curious Meerkat", "curious_meerkat.png"),
    ("Questionable Quokka", "questionable_quokka.png"),
];

pub struct LabeledImage {
    pub label: String,
    pub pixels: Overlay,
}

/// A file from the mapping that could not be read
#[derive(Debug, Clone)]
pub struct ImageLoadFailure {
    pub label: String,
    pub path: PathBuf,
    pub reason: String,
}

impl From<ImageLoadFailure> for AppError {
    fn from(failure: ImageLoadFailure) -> Self {
        AppError::ImageLoad {
            label: failure.label,
            path: failure.path,
            reason: failure.reason,
        }
    }
}

/// Overlay images keyed by label, read-only after [`ImageStore::load`].
pub struct ImageStore {
    images: BTreeMap<String, LabeledImage>,
    warnings: Vec<ImageLoadFailure>,
}

impl ImageStore {
    /// Reads every file of `mapping` from `dir`, keeping the alpha channel
    /// when the file has one. Unreadable files are skipped with a warning;
    /// the load only fails when nothing could be read.
    pub fn load(dir: &Path, mapping: &[(&str, &str)]) -> Result<Self, AppError> {
        let mut images = BTreeMap::new();
        let mut warnings = Vec::new();

        for (label, file_name) in mapping {
            let path = dir.join(file_name);
            match image::open(&path) {
                Ok(decoded) => {
                    let pixels = if decoded.color().has_alpha() {
                        Overlay::Transparent(decoded.to_rgba8())
                    } else {
                        Overlay::Opaque(decoded.to_rgb8())
                    };
                    let (width, height) = pixels.dimensions();
                    info!(label, width, height, alpha = pixels.has_alpha(), "loaded overlay");
                    images.insert(
                        label.to_string(),
                        LabeledImage {
                            label: label.to_string(),
                            pixels,
                        },
                    );
                }
                Err(err) => {
                    let failure = ImageLoadFailure {
                        label: label.to_string(),
                        path,
                        reason: err.to_string(),
                    };
                    warn!("{}", AppError::from(failure.clone()));
                    warnings.push(failure);
                }
            }
        }

        if images.is_empty() {
            return Err(AppError::NoImagesLoaded {
                dir: dir.to_path_buf(),
            });
        }
        Ok(Self { images, warnings })
    }

    pub fn get(&self, label: &str) -> Option<&LabeledImage> {
        self.images.get(label)
    }

    /// Loaded labels in sorted order
    pub fn labels(&self) -> Vec<String> {
        self.images.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn warnings(&self) -> &[ImageLoadFailure] {
        &self.warnings
    }
}
