use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, ImageResult};
use log::info;
use tempfile::NamedTempFile;

use crate::error::ConvertError;

/// Converts a downloaded WebP file into a PNG next to it and returns the PNG
/// path. Nothing is left at the destination unless the whole conversion
/// succeeds.
pub fn convert_to_archival(input: &Path) -> Result<PathBuf, ConvertError> {
    if input.as_os_str().is_empty() {
        return Err(ConvertError::EmptyPath);
    }
    let output = input.with_extension("png");
    if output == input {
        return Err(ConvertError::AlreadyPng {
            path: input.to_path_buf(),
        });
    }
    let bytes = std::fs::read(input).map_err(|source| ConvertError::Read {
        path: input.to_path_buf(),
        source,
    })?;
    let decoded = decode_webp(&bytes).map_err(|source| ConvertError::Decode {
        path: input.to_path_buf(),
        source,
    })?;
    let png = encode_png(&decoded).map_err(|source| ConvertError::Encode { source })?;

    write_atomically(&output, &png)?;
    info!(
        "converted {} to {} ({}x{})",
        input.display(),
        output.display(),
        decoded.width(),
        decoded.height()
    );
    Ok(output)
}

/// In-memory WebP to PNG conversion.
pub fn convert_bytes_to_archival(bytes: &[u8]) -> ImageResult<Vec<u8>> {
    encode_png(&decode_webp(bytes)?)
}

fn decode_webp(bytes: &[u8]) -> ImageResult<DynamicImage> {
    image::load_from_memory_with_format(bytes, ImageFormat::WebP)
}

fn encode_png(image: &DynamicImage) -> ImageResult<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

fn write_atomically(output: &Path, bytes: &[u8]) -> Result<(), ConvertError> {
    let write_err = |source: std::io::Error| ConvertError::Write {
        path: output.to_path_buf(),
        source,
    };
    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staged = NamedTempFile::new_in(dir).map_err(write_err)?;
    staged.write_all(bytes).map_err(write_err)?;
    staged.flush().map_err(write_err)?;
    staged
        .persist(output)
        .map_err(|err| write_err(err.error))?;
    Ok(())
}
