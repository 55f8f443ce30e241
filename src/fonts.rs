use ab_glyph::FontArc;
use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

static EMBEDDED_BOLD: &[u8] = include_bytes!("../assets/fonts/DejaVuSans-Bold.ttf");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontSource {
    File,
    Embedded,
}

/// Fonts used by the card, acquired once at startup.
#[derive(Clone)]
pub struct FontSet {
    pub bold: FontArc,
    pub source: FontSource,
}

impl FontSet {
    /// Loads the configured bold face, falling back to the embedded one when
    /// the file is missing or not a usable font. Only a broken embedded font
    /// is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            match std::fs::read(path) {
                Ok(bytes) => match FontArc::try_from_vec(bytes) {
                    Ok(bold) => {
                        info!(path = %path.display(), "loaded title font");
                        return Ok(Self {
                            bold,
                            source: FontSource::File,
                        });
                    }
                    Err(err) => {
                        warn!(
                            path = %path.display(),
                            error = %err,
                            "font file unusable, using embedded font"
                        );
                    }
                },
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "font file unreadable, using embedded font"
                    );
                }
            }
        }
        Self::embedded()
    }

    pub fn embedded() -> Result<Self> {
        let bold = FontArc::try_from_slice(EMBEDDED_BOLD).context("parse embedded font")?;
        Ok(Self {
            bold,
            source: FontSource::Embedded,
        })
    }
}
