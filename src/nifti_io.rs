//! NIfTI file I/O for organ masks and label volumes
//!
//! Masks are read through the `nifti` crate (any datatype, .nii or .nii.gz)
//! and flattened in Fortran order. Label volumes are written as uint8
//! NIfTI-1 single files, gzip-compressed when the path ends in `.nii.gz`.

use std::io::{Cursor, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::Array;
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject};

use crate::error::{RefineError, Result};
use crate::volume::Grid;

/// NIfTI data loaded from bytes
#[derive(Debug)]
pub struct NiftiData {
    /// Volume data as f64, Fortran order
    pub data: Vec<f64>,
    /// Dimensions (nx, ny, nz)
    pub dims: (usize, usize, usize),
    /// Voxel sizes in mm
    pub voxel_size: (f64, f64, f64),
    /// Affine transformation matrix (4x4, row-major)
    pub affine: [f64; 16],
}

impl NiftiData {
    pub fn grid(&self) -> Grid {
        Grid {
            dims: self.dims,
            voxel_size: self.voxel_size,
            affine: self.affine,
        }
    }

    /// Binary view: every non-zero voxel is foreground.
    pub fn to_mask(&self) -> Vec<u8> {
        self.data.iter().map(|&v| u8::from(v > 0.0)).collect()
    }
}

/// Check if bytes are gzip compressed
fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Get header info for diagnostics
fn get_header_info(bytes: &[u8]) -> String {
    if bytes.len() < 348 {
        return format!("file too small ({} bytes, need at least 348)", bytes.len());
    }

    let sizeof_hdr = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let magic = String::from_utf8_lossy(&bytes[344..348]).to_string();
    let datatype = i16::from_le_bytes([bytes[70], bytes[71]]);

    format!("sizeof_hdr={}, magic='{}', datatype={}", sizeof_hdr, magic, datatype)
}

/// Load a 3D NIfTI volume from bytes
///
/// Supports both .nii and .nii.gz content (gzip is auto-detected). For 4D
/// input only the first volume is kept.
pub fn load_nifti(bytes: &[u8]) -> Result<NiftiData> {
    let obj: InMemNiftiObject = if is_gzip(bytes) {
        InMemNiftiObject::from_reader(GzDecoder::new(Cursor::new(bytes))).map_err(|e| {
            let mut decompressed = Vec::new();
            let info = if GzDecoder::new(Cursor::new(bytes)).read_to_end(&mut decompressed).is_ok() {
                get_header_info(&decompressed)
            } else {
                "could not decompress".to_string()
            };
            RefineError::Nifti(format!("gzipped NIfTI: {} ({})", e, info))
        })?
    } else {
        let info = get_header_info(bytes);
        InMemNiftiObject::from_reader(Cursor::new(bytes))
            .map_err(|e| RefineError::Nifti(format!("{} ({})", e, info)))?
    };

    let header = obj.header();
    let ndim = header.dim[0] as usize;
    if ndim < 3 {
        return Err(RefineError::InvalidVolume(format!(
            "expected at least 3D volume, got {}D",
            ndim
        )));
    }

    let pixdim = header.pixdim;
    let voxel_size = (pixdim[1] as f64, pixdim[2] as f64, pixdim[3] as f64);
    let affine = get_affine(header);

    let array: Array<f64, _> = obj
        .into_volume()
        .into_ndarray()
        .map_err(|e| RefineError::Nifti(format!("failed to convert to ndarray: {}", e)))?;

    let shape = array.shape().to_vec();
    if shape.len() < 3 {
        return Err(RefineError::InvalidVolume(format!(
            "expected at least 3D array, got {}D",
            shape.len()
        )));
    }
    if shape.len() > 4 {
        return Err(RefineError::InvalidVolume(format!(
            "expected at most 4D array, got {}D",
            shape.len()
        )));
    }

    // Use the array shape for dimensions (nifti-rs may reorder)
    let (nx, ny, nz) = (shape[0], shape[1], shape[2]);
    let mut data = Vec::with_capacity(nx * ny * nz);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let v = if shape.len() == 3 {
                    array[[i, j, k]]
                } else {
                    array[[i, j, k, 0]]
                };
                data.push(v);
            }
        }
    }

    Ok(NiftiData {
        data,
        dims: (nx, ny, nz),
        voxel_size,
        affine,
    })
}

/// Get affine transformation matrix from header
fn get_affine(header: &NiftiHeader) -> [f64; 16] {
    if header.sform_code > 0 {
        let s = &header.srow_x;
        let t = &header.srow_y;
        let u = &header.srow_z;
        [
            s[0] as f64, s[1] as f64, s[2] as f64, s[3] as f64,
            t[0] as f64, t[1] as f64, t[2] as f64, t[3] as f64,
            u[0] as f64, u[1] as f64, u[2] as f64, u[3] as f64,
            0.0, 0.0, 0.0, 1.0,
        ]
    } else {
        // Identity with voxel scaling
        let vsx = header.pixdim[1] as f64;
        let vsy = header.pixdim[2] as f64;
        let vsz = header.pixdim[3] as f64;
        [
            vsx, 0.0, 0.0, 0.0,
            0.0, vsy, 0.0, 0.0,
            0.0, 0.0, vsz, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ]
    }
}

/// Encode a uint8 label volume as NIfTI-1 bytes (.nii)
pub fn save_labels(data: &[u8], grid: &Grid) -> Result<Vec<u8>> {
    let (nx, ny, nz) = grid.dims;
    if data.len() != grid.len() {
        return Err(RefineError::InvalidVolume(format!(
            "label data has {} voxels, grid {:?} needs {}",
            data.len(),
            grid.dims,
            grid.len()
        )));
    }
    if nx > i16::MAX as usize || ny > i16::MAX as usize || nz > i16::MAX as usize {
        return Err(RefineError::InvalidVolume(format!(
            "dimensions {:?} exceed the NIfTI-1 limit",
            grid.dims
        )));
    }
    let (vsx, vsy, vsz) = grid.voxel_size;
    let affine = &grid.affine;

    let mut header = [0u8; 348];

    // sizeof_hdr = 348
    header[0..4].copy_from_slice(&348i32.to_le_bytes());

    // dim[0..7]
    let dim: [i16; 8] = [3, nx as i16, ny as i16, nz as i16, 1, 1, 1, 1];
    for (i, &d) in dim.iter().enumerate() {
        let offset = 40 + i * 2;
        header[offset..offset + 2].copy_from_slice(&d.to_le_bytes());
    }

    // datatype = 2 (UINT8), bitpix = 8
    header[70..72].copy_from_slice(&2i16.to_le_bytes());
    header[72..74].copy_from_slice(&8i16.to_le_bytes());

    // pixdim[0..7]
    let pixdim: [f32; 8] = [1.0, vsx as f32, vsy as f32, vsz as f32, 1.0, 1.0, 1.0, 1.0];
    for (i, &p) in pixdim.iter().enumerate() {
        let offset = 76 + i * 4;
        header[offset..offset + 4].copy_from_slice(&p.to_le_bytes());
    }

    // vox_offset = 352 (header + 4 bytes extension)
    header[108..112].copy_from_slice(&352.0f32.to_le_bytes());

    // scl_slope = 1.0, scl_inter = 0.0
    header[112..116].copy_from_slice(&1.0f32.to_le_bytes());
    header[116..120].copy_from_slice(&0.0f32.to_le_bytes());

    // sform_code = 1 (scanner anat)
    header[254..256].copy_from_slice(&1i16.to_le_bytes());

    // srow_x, srow_y, srow_z
    for row in 0..3 {
        for col in 0..4 {
            let offset = 280 + row * 16 + col * 4;
            header[offset..offset + 4].copy_from_slice(&(affine[row * 4 + col] as f32).to_le_bytes());
        }
    }

    // magic = "n+1\0" for NIfTI-1 single file
    header[344..348].copy_from_slice(b"n+1\0");

    let mut buffer = Vec::with_capacity(352 + data.len());
    buffer.extend_from_slice(&header);
    // Extension flag: no extensions
    buffer.extend_from_slice(&[0u8; 4]);
    buffer.extend_from_slice(data);

    Ok(buffer)
}

/// Encode a uint8 label volume as gzipped NIfTI bytes (.nii.gz)
pub fn save_labels_gz(data: &[u8], grid: &Grid) -> Result<Vec<u8>> {
    let uncompressed = save_labels(data, grid)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&uncompressed)
        .map_err(|e| RefineError::Nifti(format!("gzip compression failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| RefineError::Nifti(format!("gzip finish failed: {}", e)))
}

/// Read a NIfTI file from a filesystem path
pub fn read_nifti_file(path: &Path) -> Result<NiftiData> {
    let bytes = std::fs::read(path).map_err(|e| RefineError::io(path, e))?;
    load_nifti(&bytes).map_err(|e| match e {
        RefineError::Nifti(msg) => RefineError::Nifti(format!("{}: {}", path.display(), msg)),
        other => other,
    })
}

/// Read a mask file and binarize it.
pub fn read_mask_file(path: &Path) -> Result<(Grid, Vec<u8>)> {
    let nifti = read_nifti_file(path)?;
    Ok((nifti.grid(), nifti.to_mask()))
}

/// Save a label volume to a file.
///
/// If the path ends with .nii.gz, the file is gzip compressed.
pub fn save_labels_to_file(path: &Path, data: &[u8], grid: &Grid) -> Result<()> {
    let bytes = if path.to_string_lossy().ends_with(".nii.gz") {
        save_labels_gz(data, grid)?
    } else {
        save_labels(data, grid)?
    };
    std::fs::write(path, &bytes).map_err(|e| RefineError::io(path, e))
}
