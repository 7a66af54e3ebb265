//! Embedded cover-art extraction and image-format validation.

use std::fs::File;
use std::path::Path;

use image::ImageFormat;
use lofty::config::{ParseOptions, ParsingMode};
use lofty::file::{TaggedFile, TaggedFileExt};
use lofty::picture::{MimeType, Picture, PictureType};
use lofty::probe::Probe;
use log::debug;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardVisualKey};
use symphonia::core::probe::Hint;

/// Raw picture bytes plus the MIME type the container declared for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedPicture {
    pub data: Vec<u8>,
    pub declared_mime: Option<String>,
}

/// Source of embedded pictures for an audio file.
pub trait EmbeddedArtReader: Send + Sync {
    fn read_picture(&self, path: &Path) -> Option<EmbeddedPicture>;
}

/// Reads pictures from tags with lofty, falling back to symphonia's probe.
#[derive(Debug, Clone, Copy, Default)]
pub struct TagArtReader;

impl EmbeddedArtReader for TagArtReader {
    fn read_picture(&self, path: &Path) -> Option<EmbeddedPicture> {
        if let Some(picture) = read_picture_with_lofty(path) {
            return Some(picture);
        }
        let recovered = read_picture_with_symphonia(path);
        if recovered.is_some() {
            debug!(
                "Embedded art read recovered via symphonia fallback for {}",
                path.display()
            );
        }
        recovered
    }
}

fn read_tagged_file(path: &Path) -> Option<TaggedFile> {
    let options = ParseOptions::new()
        .read_properties(false)
        .read_cover_art(true)
        .parsing_mode(ParsingMode::BestAttempt);
    match Probe::open(path).and_then(|probe| probe.options(options).read()) {
        Ok(tagged_file) => Some(tagged_file),
        Err(err) => {
            debug!("Tag read failed for {}: {}", path.display(), err);
            None
        }
    }
}

fn picture_from_lofty(picture: &Picture) -> EmbeddedPicture {
    let declared_mime = picture.mime_type().and_then(|mime| match mime {
        MimeType::Unknown(value) if value.trim().is_empty() => None,
        other => Some(other.as_str().to_string()),
    });
    EmbeddedPicture {
        data: picture.data().to_vec(),
        declared_mime,
    }
}

fn read_picture_with_lofty(path: &Path) -> Option<EmbeddedPicture> {
    let tagged_file = read_tagged_file(path)?;
    let tags = tagged_file
        .primary_tag()
        .into_iter()
        .chain(tagged_file.tags().iter());

    let mut fallback = None;
    for tag in tags {
        for picture in tag.pictures() {
            if picture.data().is_empty() {
                continue;
            }
            if picture.pic_type() == PictureType::CoverFront {
                return Some(picture_from_lofty(picture));
            }
            if fallback.is_none() {
                fallback = Some(picture_from_lofty(picture));
            }
        }
    }
    fallback
}

fn first_visual(revision: &MetadataRevision) -> Option<EmbeddedPicture> {
    let visuals = revision.visuals();
    visuals
        .iter()
        .find(|visual| {
            matches!(visual.usage, Some(StandardVisualKey::FrontCover)) && !visual.data.is_empty()
        })
        .or_else(|| visuals.iter().find(|visual| !visual.data.is_empty()))
        .map(|visual| EmbeddedPicture {
            data: visual.data.to_vec(),
            declared_mime: (!visual.media_type.trim().is_empty())
                .then(|| visual.media_type.clone()),
        })
}

fn read_picture_with_symphonia(path: &Path) -> Option<EmbeddedPicture> {
    let file = File::open(path).ok()?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }
    let mut probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .ok()?;

    if let Some(probe_meta) = probed.metadata.get() {
        if let Some(picture) = probe_meta.current().and_then(first_visual) {
            return Some(picture);
        }
    }

    let mut metadata = probed.format.metadata();
    while !metadata.is_latest() {
        metadata.pop();
    }
    metadata.current().and_then(first_visual)
}

/// Image format identified from the leading magic bytes.
pub fn detect_image_format(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes).ok()
}

fn normalized_mime(mime: &str) -> String {
    let essence = mime.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    match essence.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        "image/x-png" => "image/png".to_string(),
        "image/x-ms-bmp" => "image/bmp".to_string(),
        _ => essence,
    }
}

/// Accepts a picture only when its magic bytes name an image format and that
/// format agrees with the declared MIME type, if one was declared.
pub fn validate_picture(picture: &EmbeddedPicture) -> Option<ImageFormat> {
    let detected = detect_image_format(&picture.data)?;
    match picture.declared_mime.as_deref().map(normalized_mime) {
        Some(declared) if declared != detected.to_mime_type() => {
            debug!(
                "Embedded picture declared {} but bytes look like {}",
                declared,
                detected.to_mime_type()
            );
            None
        }
        _ => Some(detected),
    }
}

/// File extension used for a cached picture of `format`.
pub fn extension_for(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "jpg",
        other => other.extensions_str().first().copied().unwrap_or("img"),
    }
}
