//! # Format Classifier Module
//!
//! Questo modulo determina il formato di un file senza decodificarlo.
//!
//! ## Responsabilità:
//! - Riconosce i formati lossless (PNG, GIF, TIFF, PNM), lossy (JPEG) e gli
//!   archivi fumetto (CBZ, CBR)
//! - Legge solo l'header dell'immagine tramite `image::io::Reader`
//! - Rileva immagini con più frame (GIF animate, APNG)
//! - Conta i frame GIF percorrendo i blocchi, senza decomprimere LZW
//! - Nessun side effect: pura ispezione
//!
//! ## Risultati:
//! - `Ok(Some(Classification))`: formato riconosciuto
//! - `Ok(None)`: file leggibile ma non è un'immagine supportata
//! - `Err(Classification)`: file illeggibile o header corrotto

use crate::error::{OptimizeError, Result};
use image::codecs::png::PngDecoder;
use image::ImageDecoder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

const ZIP_MAGIC: &[&[u8]] = &[b"PK\x03\x04", b"PK\x05\x06"];
const RAR_MAGIC: &[u8] = b"Rar!\x1a\x07";

/// Formats the optimizer knows how to handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileFormat {
    Png,
    Gif,
    Tiff,
    Pnm,
    Jpeg,
    Cbz,
    Cbr,
}

/// How a format is optimized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatFamily {
    /// Tools must not alter visual content
    Lossless,
    /// Tools may re-encode
    Lossy,
    /// Comic archives holding other images
    Archive,
}

impl FileFormat {
    pub fn family(&self) -> FormatFamily {
        match self {
            FileFormat::Png | FileFormat::Gif | FileFormat::Tiff | FileFormat::Pnm => {
                FormatFamily::Lossless
            }
            FileFormat::Jpeg => FormatFamily::Lossy,
            FileFormat::Cbz | FileFormat::Cbr => FormatFamily::Archive,
        }
    }

    pub fn is_archive(&self) -> bool {
        self.family() == FormatFamily::Archive
    }

    /// Extension used when an optimizer changes the file format
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Png => "png",
            FileFormat::Gif => "gif",
            FileFormat::Tiff => "tiff",
            FileFormat::Pnm => "pnm",
            FileFormat::Jpeg => "jpg",
            FileFormat::Cbz => "cbz",
            FileFormat::Cbr => "cbr",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FileFormat::Png => "PNG",
            FileFormat::Gif => "GIF",
            FileFormat::Tiff => "TIFF",
            FileFormat::Pnm => "PNM",
            FileFormat::Jpeg => "JPEG",
            FileFormat::Cbz => "CBZ",
            FileFormat::Cbr => "CBR",
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FileFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PNG" => Ok(FileFormat::Png),
            "GIF" => Ok(FileFormat::Gif),
            "TIFF" | "TIF" => Ok(FileFormat::Tiff),
            "PNM" | "PPM" | "PGM" | "PBM" => Ok(FileFormat::Pnm),
            "JPEG" | "JPG" => Ok(FileFormat::Jpeg),
            "CBZ" => Ok(FileFormat::Cbz),
            "CBR" => Ok(FileFormat::Cbr),
            other => Err(format!("unknown format {}", other)),
        }
    }
}

/// Result of a successful inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub format: FileFormat,
    /// More than one frame (animated GIF, APNG)
    pub sequenced: bool,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sequenced {
            write!(f, "{} SEQUENCED", self.format)
        } else {
            write!(f, "{}", self.format)
        }
    }
}

/// Inspect a file and determine its format without decoding pixel data
pub fn classify(path: &Path) -> Result<Option<Classification>> {
    if let Some(format) = classify_archive(path)? {
        return Ok(Some(Classification {
            format,
            sequenced: false,
        }));
    }

    let reader = image::io::Reader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| classification_error(path, e))?;

    let format = match reader.format().and_then(map_image_format) {
        Some(format) => format,
        None => {
            debug!("{} is not a supported image", path.display());
            return Ok(None);
        }
    };

    // Header only: a truncated or corrupt header fails here
    reader
        .into_dimensions()
        .map_err(|e| classification_error(path, e))?;

    let sequenced = is_sequenced(path, format)?;

    Ok(Some(Classification { format, sequenced }))
}

fn map_image_format(format: image::ImageFormat) -> Option<FileFormat> {
    match format {
        image::ImageFormat::Png => Some(FileFormat::Png),
        image::ImageFormat::Gif => Some(FileFormat::Gif),
        image::ImageFormat::Tiff => Some(FileFormat::Tiff),
        image::ImageFormat::Pnm => Some(FileFormat::Pnm),
        image::ImageFormat::Jpeg => Some(FileFormat::Jpeg),
        _ => None,
    }
}

/// Comic archives are recognized by extension and confirmed by magic bytes
fn classify_archive(path: &Path) -> Result<Option<FileFormat>> {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase());

    let expected = match ext.as_deref() {
        Some("cbz") => FileFormat::Cbz,
        Some("cbr") => FileFormat::Cbr,
        _ => return Ok(None),
    };

    let mut header = [0u8; 8];
    let read = File::open(path)
        .and_then(|mut f| f.read(&mut header))
        .map_err(|e| classification_error(path, e))?;
    let header = &header[..read];

    let actual = if ZIP_MAGIC.iter().any(|magic| header.starts_with(magic)) {
        FileFormat::Cbz
    } else if header.starts_with(RAR_MAGIC) {
        FileFormat::Cbr
    } else {
        return Err(classification_error(
            path,
            format!("{} is not a good format", expected),
        ));
    };

    if actual != expected {
        debug!(
            "{} has a .{} extension but is a {} archive",
            path.display(),
            expected.extension(),
            actual
        );
    }

    Ok(Some(actual))
}

/// Looks for a second frame.
///
/// A GIF whose block structure cannot be walked, or a PNG whose header the
/// decoder rejects, is treated as sequenced.
fn is_sequenced(path: &Path, format: FileFormat) -> Result<bool> {
    match format {
        FileFormat::Gif => {
            let file = File::open(path).map_err(|e| classification_error(path, e))?;
            match count_gif_frames(&mut BufReader::new(file), 2) {
                Ok(frames) => Ok(frames > 1),
                Err(e) => {
                    debug!("Frame count failed for {}: {}", path.display(), e);
                    Ok(true)
                }
            }
        }
        FileFormat::Png => {
            let file = File::open(path).map_err(|e| classification_error(path, e))?;
            match PngDecoder::new(BufReader::new(file)) {
                Ok(decoder) => Ok(decoder.is_apng()),
                Err(e) => {
                    debug!("APNG probe failed for {}: {}", path.display(), e);
                    Ok(true)
                }
            }
        }
        _ => Ok(false),
    }
}

/// Counts GIF image descriptors, stopping once `limit` is reached.
///
/// Extensions and image data are skipped by their sub-block lengths, so no
/// frame is ever decompressed. End of input between two blocks ends the
/// count like a trailer would.
fn count_gif_frames<R: Read>(reader: &mut R, limit: usize) -> io::Result<usize> {
    let mut header = [0u8; 13];
    reader.read_exact(&mut header)?;
    if &header[..3] != b"GIF" {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "missing GIF signature"));
    }
    if header[10] & 0x80 != 0 {
        skip(reader, color_table_len(header[10]))?;
    }

    let mut frames = 0;
    loop {
        let mut introducer = [0u8; 1];
        match reader.read_exact(&mut introducer) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(frames),
            Err(e) => return Err(e),
        }

        match introducer[0] {
            // extension: label, then sub-blocks
            0x21 => {
                skip(reader, 1)?;
                skip_sub_blocks(reader)?;
            }
            // image descriptor
            0x2C => {
                frames += 1;
                if frames >= limit {
                    return Ok(frames);
                }
                let mut descriptor = [0u8; 9];
                reader.read_exact(&mut descriptor)?;
                if descriptor[8] & 0x80 != 0 {
                    skip(reader, color_table_len(descriptor[8]))?;
                }
                // LZW minimum code size
                skip(reader, 1)?;
                skip_sub_blocks(reader)?;
            }
            0x3B => return Ok(frames),
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unexpected GIF block 0x{:02x}", other),
                ))
            }
        }
    }
}

fn color_table_len(packed: u8) -> u64 {
    3 * (1u64 << ((packed & 0x07) + 1))
}

fn skip<R: Read>(reader: &mut R, len: u64) -> io::Result<()> {
    let skipped = io::copy(&mut (&mut *reader).take(len), &mut io::sink())?;
    if skipped < len {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    Ok(())
}

fn skip_sub_blocks<R: Read>(reader: &mut R) -> io::Result<()> {
    loop {
        let mut len = [0u8; 1];
        reader.read_exact(&mut len)?;
        if len[0] == 0 {
            return Ok(());
        }
        skip(reader, u64::from(len[0]))?;
    }
}

/// Bits per channel of a PNG, read from its header.
///
/// `None` when the file is not a PNG the decoder accepts.
pub fn png_bit_depth(path: &Path) -> Option<u8> {
    let file = File::open(path).ok()?;
    let decoder = PngDecoder::new(BufReader::new(file)).ok()?;
    let color = decoder.color_type();
    u8::try_from(color.bits_per_pixel() / u16::from(color.channel_count())).ok()
}

fn classification_error(path: &Path, reason: impl ToString) -> OptimizeError {
    OptimizeError::Classification {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}
