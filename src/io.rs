// io.rs — Minimal MetaImage (.mha) reader/writer.
//
// Just enough of the MetaImage format for the comparison harness: a single
// file (.mha) with an ASCII `Key = Value` header followed by LOCAL binary
// voxel data, pixel type MET_SHORT, little-endian, uncompressed. This is the
// common on-disk shape of CT volumes in registration test suites.
//
// Deliberately not a general I/O stack: one format, one pixel type, no
// compression, no detached .mhd/.raw pairs.

use std::fmt;
use std::fs;
use std::path::Path;

use crate::volume::{Volume, IDENTITY};

/// Errors from MetaImage reading/writing.
#[derive(Debug)]
pub enum IoError {
    /// Underlying filesystem error.
    Io(std::io::Error),
    /// Header is missing a required field.
    MissingField(&'static str),
    /// Header field present but unparseable or with the wrong arity.
    BadField { field: &'static str, value: String },
    /// Header describes something this reader does not support
    /// (non-3-D, non-MET_SHORT, big-endian, compressed, non-LOCAL data).
    Unsupported(String),
    /// Binary payload length disagrees with DimSize.
    DataSize { expected: usize, got: usize },
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoError::Io(e) => write!(f, "i/o error: {e}"),
            IoError::MissingField(field) => write!(f, "missing MetaImage header field {field}"),
            IoError::BadField { field, value } => {
                write!(f, "bad MetaImage header field {field} = {value:?}")
            }
            IoError::Unsupported(what) => write!(f, "unsupported MetaImage: {what}"),
            IoError::DataSize { expected, got } => write!(
                f,
                "MetaImage data size mismatch: header implies {expected} bytes, file has {got}"
            ),
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for IoError {
    fn from(e: std::io::Error) -> Self {
        IoError::Io(e)
    }
}

/// Read a `.mha` volume (3-D, MET_SHORT, LOCAL binary data).
pub fn read_mha(path: &Path) -> Result<Volume<i16>, IoError> {
    let bytes = fs::read(path)?;

    // Parse header lines until "ElementDataFile", which is required to be
    // the last header field; the binary payload starts right after its
    // newline.
    let mut dims: Option<[usize; 3]> = None;
    let mut spacing = [1.0f32; 3];
    let mut origin = [0.0f32; 3];
    let mut direction = IDENTITY;
    let mut element_type: Option<String> = None;
    let mut data_offset: Option<usize> = None;

    let mut pos = 0usize;
    while pos < bytes.len() {
        let line_end = bytes[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| pos + i)
            .unwrap_or(bytes.len());
        let line = std::str::from_utf8(&bytes[pos..line_end])
            .map_err(|_| IoError::Unsupported("non-UTF-8 header".into()))?
            .trim();
        let next = line_end + 1;

        let (key, value) = match line.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => {
                pos = next;
                continue;
            }
        };

        match key {
            "NDims" => {
                if value != "3" {
                    return Err(IoError::Unsupported(format!("NDims = {value}, expected 3")));
                }
            }
            "DimSize" => dims = Some(parse_triple(value, "DimSize")?),
            "ElementSpacing" => spacing = parse_triple(value, "ElementSpacing")?,
            "Offset" | "Origin" | "Position" => origin = parse_triple(value, "Offset")?,
            "TransformMatrix" => {
                let v: Vec<f32> = parse_list(value, "TransformMatrix")?;
                if v.len() != 9 {
                    return Err(IoError::BadField {
                        field: "TransformMatrix",
                        value: value.to_string(),
                    });
                }
                for i in 0..3 {
                    direction[i].copy_from_slice(&v[i * 3..i * 3 + 3]);
                }
            }
            "ElementType" => element_type = Some(value.to_string()),
            "BinaryData" => {
                if !value.eq_ignore_ascii_case("true") {
                    return Err(IoError::Unsupported("ASCII element data".into()));
                }
            }
            "BinaryDataByteOrderMSB" | "ElementByteOrderMSB" => {
                if value.eq_ignore_ascii_case("true") {
                    return Err(IoError::Unsupported("big-endian element data".into()));
                }
            }
            "CompressedData" => {
                if value.eq_ignore_ascii_case("true") {
                    return Err(IoError::Unsupported("compressed element data".into()));
                }
            }
            "ElementDataFile" => {
                if value != "LOCAL" {
                    return Err(IoError::Unsupported(format!(
                        "ElementDataFile = {value}, only LOCAL is supported"
                    )));
                }
                data_offset = Some(next);
                break;
            }
            // ObjectType and anything else: ignored.
            _ => {}
        }
        pos = next;
    }

    let dims = dims.ok_or(IoError::MissingField("DimSize"))?;
    let data_offset = data_offset.ok_or(IoError::MissingField("ElementDataFile"))?;
    match element_type.as_deref() {
        Some("MET_SHORT") => {}
        Some(other) => {
            return Err(IoError::Unsupported(format!(
                "ElementType = {other}, only MET_SHORT is supported"
            )))
        }
        None => return Err(IoError::MissingField("ElementType")),
    }

    // DimSize comes from the file; a huge header must not wrap the size math.
    let bad_dims = || IoError::BadField {
        field: "DimSize",
        value: format!("{} {} {}", dims[0], dims[1], dims[2]),
    };
    let n = dims[0]
        .checked_mul(dims[1])
        .and_then(|v| v.checked_mul(dims[2]))
        .ok_or_else(bad_dims)?;
    let expected = n.checked_mul(2).ok_or_else(bad_dims)?;
    let payload = &bytes[data_offset..];
    if payload.len() < expected {
        return Err(IoError::DataSize {
            expected,
            got: payload.len(),
        });
    }

    let data: Vec<i16> = payload[..expected]
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();

    let mut vol = Volume::from_vec(dims, data);
    vol.set_spacing(spacing);
    vol.set_origin(origin);
    vol.set_direction(direction);
    Ok(vol)
}

/// Write a volume as `.mha` (LOCAL little-endian MET_SHORT).
pub fn write_mha(path: &Path, vol: &Volume<i16>) -> Result<(), IoError> {
    let [nx, ny, nz] = vol.dims();
    let s = vol.spacing();
    let o = vol.origin();
    let d = vol.direction();

    let mut header = String::new();
    header.push_str("ObjectType = Image\n");
    header.push_str("NDims = 3\n");
    header.push_str("BinaryData = True\n");
    header.push_str("BinaryDataByteOrderMSB = False\n");
    header.push_str("CompressedData = False\n");
    header.push_str(&format!(
        "TransformMatrix = {} {} {} {} {} {} {} {} {}\n",
        d[0][0], d[0][1], d[0][2], d[1][0], d[1][1], d[1][2], d[2][0], d[2][1], d[2][2],
    ));
    header.push_str(&format!("Offset = {} {} {}\n", o[0], o[1], o[2]));
    header.push_str(&format!("ElementSpacing = {} {} {}\n", s[0], s[1], s[2]));
    header.push_str(&format!("DimSize = {nx} {ny} {nz}\n"));
    header.push_str("ElementType = MET_SHORT\n");
    header.push_str("ElementDataFile = LOCAL\n");

    let mut out = header.into_bytes();
    out.reserve(vol.len() * 2);
    for &v in vol.as_slice() {
        out.extend_from_slice(&v.to_le_bytes());
    }
    fs::write(path, out)?;
    Ok(())
}

fn parse_list<T: std::str::FromStr>(value: &str, field: &'static str) -> Result<Vec<T>, IoError> {
    value
        .split_whitespace()
        .map(|tok| {
            tok.parse::<T>().map_err(|_| IoError::BadField {
                field,
                value: value.to_string(),
            })
        })
        .collect()
}

fn parse_triple<T: std::str::FromStr + Copy>(
    value: &str,
    field: &'static str,
) -> Result<[T; 3], IoError> {
    let v: Vec<T> = parse_list(value, field)?;
    if v.len() != 3 {
        return Err(IoError::BadField {
            field,
            value: value.to_string(),
        });
    }
    Ok([v[0], v[1], v[2]])
}
