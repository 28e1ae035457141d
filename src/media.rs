use std::io::Cursor;

use actix_multipart::Multipart;
use bytesize::ByteSize;
use futures_util::TryStreamExt as _;
use image::{GenericImageView, ImageOutputFormat};
use mime::Mime;

use crate::error::AppError;

/// A downscaled derivative of an uploaded image, always PNG so the output is
/// deterministic for a given input regardless of the source format.
pub struct Thumbnail {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Display metadata for an uploaded file. `dimensions` is `None` for
/// non-image payloads.
pub struct MediaInfo {
    pub size: i64,
    pub dimensions: Option<(u32, u32)>,
    pub created: i64,
}

/// Decodes `bytes` and produces a thumbnail no larger than `bound` on either
/// axis, preserving aspect ratio. Corrupt or unsupported input fails with
/// `UnsupportedMedia` and the caller must persist nothing.
pub fn thumbnail(bytes: &[u8], bound: u32) -> Result<Thumbnail, AppError> {
    let img = image::load_from_memory(bytes).map_err(|_| AppError::UnsupportedMedia)?;

    let (ow, oh) = img.dimensions();
    let thumb = if ow <= bound && oh <= bound {
        // already inside the bounding box, never upscale
        img
    } else {
        img.thumbnail(bound, bound)
    };
    let (width, height) = thumb.dimensions();

    let mut out = Vec::new();
    thumb
        .write_to(&mut Cursor::new(&mut out), ImageOutputFormat::Png)
        .map_err(|_| AppError::UnsupportedMedia)?;

    Ok(Thumbnail {
        bytes: out,
        width,
        height,
    })
}

pub fn describe(bytes: &[u8]) -> MediaInfo {
    let dimensions = image::load_from_memory(bytes).ok().map(|i| i.dimensions());

    MediaInfo {
        size: bytes.len() as i64,
        dimensions,
        created: crate::util::now_unix(),
    }
}

pub struct FilePart {
    pub field: String,
    pub filename: String,
    pub mime: Mime,
    pub data: Vec<u8>,
}

/// A fully received multipart form: plain fields plus file parts.
#[derive(Default)]
pub struct UploadForm {
    fields: Vec<(String, String)>,
    files: Vec<FilePart>,
}

impl UploadForm {
    pub fn field(&self, name: &str) -> &str {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    }

    pub fn file(&self, name: &str) -> Option<&FilePart> {
        self.files
            .iter()
            .find(|f| f.field == name && !f.data.is_empty())
    }
}

/// Drains a multipart payload into memory with a hard size cap. Transfer
/// and encoding problems surface as typed errors, never silently.
pub async fn receive_form(mut payload: Multipart) -> Result<UploadForm, AppError> {
    let mut form = UploadForm::default();

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|_| AppError::Validation("malformed upload".into()))?
    {
        let cd = field.content_disposition();
        let name = cd.get_name().unwrap_or("").to_owned();
        let filename = cd.get_filename().map(|x| x.to_owned());

        let filetype = field
            .content_type()
            .cloned()
            .unwrap_or(mime::APPLICATION_OCTET_STREAM);

        let mut data: Vec<u8> = Default::default();

        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|_| AppError::Validation("malformed upload".into()))?
        {
            if data.len() + chunk.len() > ByteSize::mib(50).as_u64() as usize {
                return Err(AppError::Validation("file too large".into()));
            }

            data.extend(chunk)
        }

        match filename {
            Some(filename) => form.files.push(FilePart {
                field: name,
                filename,
                mime: filetype,
                data,
            }),
            None => {
                let value = String::from_utf8(data)
                    .map_err(|_| AppError::Validation("malformed upload".into()))?;
                form.fields.push((name, value));
            }
        }
    }

    Ok(form)
}

#[cfg(test)]
pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
    use image::{DynamicImage, Rgb, RgbImage};

    let mut img = RgbImage::new(width, height);
    for (x, y, px) in img.enumerate_pixels_mut() {
        *px = Rgb([(x % 256) as u8, (y % 256) as u8, 64]);
    }

    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), ImageOutputFormat::Png)
        .unwrap();

    out
}

#[test]
fn thumbnail_respects_bound_and_aspect() {
    let png = sample_png(800, 600);

    let thumb = thumbnail(&png, 200).unwrap();

    assert!(thumb.width <= 200 && thumb.height <= 200);
    assert_eq!((thumb.width, thumb.height), (200, 150));

    // output decodes and matches the reported dimensions
    let decoded = image::load_from_memory(&thumb.bytes).unwrap();
    assert_eq!(decoded.dimensions(), (200, 150));
}

#[test]
fn thumbnail_is_deterministic() {
    let png = sample_png(320, 240);

    let a = thumbnail(&png, 100).unwrap();
    let b = thumbnail(&png, 100).unwrap();

    assert_eq!(a.bytes, b.bytes);
}

#[test]
fn thumbnail_never_upscales() {
    let png = sample_png(64, 48);

    let thumb = thumbnail(&png, 200).unwrap();

    assert_eq!((thumb.width, thumb.height), (64, 48));
}

#[test]
fn garbage_is_unsupported_media() {
    let result = thumbnail(b"definitely not an image", 200);

    assert!(matches!(result, Err(AppError::UnsupportedMedia)));
}

#[test]
fn describe_reports_dimensions_and_size() {
    let png = sample_png(800, 600);

    let info = describe(&png);
    assert_eq!(info.size, png.len() as i64);
    assert_eq!(info.dimensions, Some((800, 600)));

    let info = describe(b"some audio-ish bytes");
    assert_eq!(info.dimensions, None);
    assert_eq!(info.size, 20);
}
