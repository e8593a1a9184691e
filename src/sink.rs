//! Persistence of admitted frames as NumPy `.npy` arrays

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::frame::{Frame, FramePayload, FrameRecord};

const NPY_MAGIC: &[u8] = b"\x93NUMPY";
const NPY_ALIGN: usize = 64;

pub trait PersistenceSink: Send {
    /// Store one frame; returns where it went.
    fn persist(&mut self, frame: &Frame, record: &FrameRecord) -> Result<PathBuf>;
}

/// Writes `{dir}/{prefix}_{timestamp_us}_{sequence}.npy`.
pub struct NpySink {
    dir: PathBuf,
}

impl NpySink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl PersistenceSink for NpySink {
    fn persist(&mut self, frame: &Frame, record: &FrameRecord) -> Result<PathBuf> {
        let path = self.dir.join(format!("{}.npy", record.file_stem()));
        let file =
            File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
        let mut out = BufWriter::new(file);
        write_npy(&mut out, frame)?;
        out.flush()?;
        Ok(path)
    }
}

/// NPY v1.0 header for a C-ordered 2D array, padded to 64 bytes.
fn npy_header(descr: &str, height: u32, width: u32) -> Vec<u8> {
    let dict = format!(
        "{{'descr': '{}', 'fortran_order': False, 'shape': ({}, {}), }}",
        descr, height, width
    );
    // magic + version + u16 length
    let preamble = NPY_MAGIC.len() + 2 + 2;
    let unpadded = preamble + dict.len() + 1;
    let padding = (NPY_ALIGN - unpadded % NPY_ALIGN) % NPY_ALIGN;
    let header_len = dict.len() + padding + 1;

    let mut header = Vec::with_capacity(preamble + header_len);
    header.extend_from_slice(NPY_MAGIC);
    header.extend_from_slice(&[1, 0]);
    header.extend_from_slice(&(header_len as u16).to_le_bytes());
    header.extend_from_slice(dict.as_bytes());
    header.resize(header.len() + padding, b' ');
    header.push(b'\n');
    header
}

pub fn write_npy<W: Write>(out: &mut W, frame: &Frame) -> Result<()> {
    let (width, height) = frame.dimensions();
    match &frame.payload {
        FramePayload::Gray8(img) => {
            out.write_all(&npy_header("|u1", height, width))?;
            out.write_all(img.as_raw())?;
        }
        FramePayload::Gray16(img) => {
            out.write_all(&npy_header("<u2", height, width))?;
            for px in img.as_raw() {
                out.write_all(&px.to_le_bytes())?;
            }
        }
    }
    Ok(())
}
