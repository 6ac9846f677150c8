//! NIfTI-1 reading and writing
//!
//! Decodes `.nii` / `.nii.gz` into a [`Volume`] and encodes volumes back to
//! single-file float32 NIfTI-1. Gzip is detected from the magic bytes on read
//! and chosen from the file extension on write.

use std::io::{Cursor, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::{Array, IxDyn};
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject};

use crate::error::{Result, RpopError};
use crate::volume::Volume;

const HEADER_SIZE: usize = 348;
const VOX_OFFSET: usize = 352;
const DT_FLOAT32: i16 = 16;

fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Short description of a raw header, appended to decode errors
fn describe_header(bytes: &[u8]) -> String {
    if bytes.len() < HEADER_SIZE {
        return format!("file too small ({} bytes, need at least {})", bytes.len(), HEADER_SIZE);
    }
    let sizeof_hdr = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let magic = String::from_utf8_lossy(&bytes[344..348]).to_string();
    let datatype = i16::from_le_bytes([bytes[70], bytes[71]]);
    format!("sizeof_hdr={}, magic='{}', datatype={}", sizeof_hdr, magic, datatype)
}

/// Decode NIfTI bytes (plain or gzipped) into a volume.
///
/// 4D inputs keep only their first frame. Intensity scaling from the header
/// is applied by the decoder.
pub fn decode(bytes: &[u8]) -> std::result::Result<Volume, String> {
    let obj = if is_gzip(bytes) {
        InMemNiftiObject::from_reader(GzDecoder::new(Cursor::new(bytes))).map_err(|e| {
            let mut raw = Vec::new();
            let info = match GzDecoder::new(Cursor::new(bytes)).read_to_end(&mut raw) {
                Ok(_) => describe_header(&raw),
                Err(_) => "could not decompress".to_string(),
            };
            format!("failed to read gzipped NIfTI: {} ({})", e, info)
        })?
    } else {
        InMemNiftiObject::from_reader(Cursor::new(bytes))
            .map_err(|e| format!("failed to read NIfTI: {} ({})", e, describe_header(bytes)))?
    };

    let header = obj.header();
    if header.dim[0] < 3 {
        return Err(format!("expected at least a 3D volume, got {}D", header.dim[0]));
    }
    let voxel_size = (
        header.pixdim[1] as f64,
        header.pixdim[2] as f64,
        header.pixdim[3] as f64,
    );
    let affine = header_affine(header);

    let array: Array<f64, IxDyn> = obj
        .into_volume()
        .into_ndarray()
        .map_err(|e| format!("failed to convert voxel data: {}", e))?;
    let shape = array.shape().to_vec();
    if shape.len() < 3 {
        return Err(format!("expected at least a 3D array, got {}D", shape.len()));
    }
    let dims = (shape[0], shape[1], shape[2]);

    // Fortran order, x fastest; extra dimensions are pinned to index 0
    let mut index = vec![0usize; shape.len()];
    let mut data = Vec::with_capacity(dims.0 * dims.1 * dims.2);
    for k in 0..dims.2 {
        for j in 0..dims.1 {
            for i in 0..dims.0 {
                index[0] = i;
                index[1] = j;
                index[2] = k;
                data.push(array[&index[..]]);
            }
        }
    }

    Volume::new(data, dims, voxel_size, affine).map_err(|e| e.to_string())
}

/// Affine from the sform rows, else from the qform quaternion, else a
/// voxel-size diagonal
fn header_affine(header: &NiftiHeader) -> [f64; 16] {
    if header.sform_code > 0 {
        let (x, y, z) = (&header.srow_x, &header.srow_y, &header.srow_z);
        [
            x[0] as f64, x[1] as f64, x[2] as f64, x[3] as f64,
            y[0] as f64, y[1] as f64, y[2] as f64, y[3] as f64,
            z[0] as f64, z[1] as f64, z[2] as f64, z[3] as f64,
            0.0, 0.0, 0.0, 1.0,
        ]
    } else if header.qform_code > 0 {
        qform_affine(header)
    } else {
        let p = &header.pixdim;
        [
            p[1] as f64, 0.0, 0.0, 0.0,
            0.0, p[2] as f64, 0.0, 0.0,
            0.0, 0.0, p[3] as f64, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ]
    }
}

/// Rotation from the unit quaternion (a, b, c, d), columns scaled by the
/// voxel size; a negative `pixdim[0]` (qfac) flips the slice axis.
#[allow(clippy::many_single_char_names)]
fn qform_affine(header: &NiftiHeader) -> [f64; 16] {
    let (b, c, d) = (
        header.quatern_b as f64,
        header.quatern_c as f64,
        header.quatern_d as f64,
    );
    let a = (1.0 - b * b - c * c - d * d).max(0.0).sqrt();

    let qfac = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
    let (i, j, k) = (
        header.pixdim[1].abs() as f64,
        header.pixdim[2].abs() as f64,
        header.pixdim[3].abs() as f64 * qfac,
    );

    [
        (a * a + b * b - c * c - d * d) * i,
        2.0 * (b * c - a * d) * j,
        2.0 * (b * d + a * c) * k,
        header.quatern_x as f64,
        2.0 * (b * c + a * d) * i,
        (a * a - b * b + c * c - d * d) * j,
        2.0 * (c * d - a * b) * k,
        header.quatern_y as f64,
        2.0 * (b * d - a * c) * i,
        2.0 * (c * d + a * b) * j,
        (a * a - b * b - c * c + d * d) * k,
        header.quatern_z as f64,
        0.0, 0.0, 0.0, 1.0,
    ]
}

fn put_i16(header: &mut [u8], offset: usize, value: i16) {
    header[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_f32(header: &mut [u8], offset: usize, value: f32) {
    header[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Build a float32 NIfTI-1 header carrying the volume's geometry
fn build_header(volume: &Volume) -> std::result::Result<[u8; HEADER_SIZE], String> {
    let (nx, ny, nz) = volume.dims();
    let to_i16 = |n: usize| {
        i16::try_from(n).map_err(|_| format!("dimension {} exceeds the NIfTI-1 limit", n))
    };
    let dim = [3, to_i16(nx)?, to_i16(ny)?, to_i16(nz)?, 1, 1, 1, 1];
    let (vx, vy, vz) = volume.voxel_size();
    let pixdim = [1.0, vx as f32, vy as f32, vz as f32, 1.0, 1.0, 1.0, 1.0];
    let affine = volume.affine();

    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&(HEADER_SIZE as i32).to_le_bytes());
    for (i, &d) in dim.iter().enumerate() {
        put_i16(&mut header, 40 + i * 2, d);
    }
    put_i16(&mut header, 70, DT_FLOAT32);
    put_i16(&mut header, 72, 32);
    for (i, &p) in pixdim.iter().enumerate() {
        put_f32(&mut header, 76 + i * 4, p);
    }
    put_f32(&mut header, 108, VOX_OFFSET as f32);
    put_f32(&mut header, 112, 1.0);
    // sform_code = 1 (scanner anatomical)
    put_i16(&mut header, 254, 1);
    for row in 0..3 {
        for col in 0..4 {
            put_f32(&mut header, 280 + row * 16 + col * 4, affine[row * 4 + col] as f32);
        }
    }
    header[344..348].copy_from_slice(b"n+1\0");
    Ok(header)
}

/// Encode a volume as uncompressed single-file NIfTI-1 (float32 voxels)
pub fn encode(volume: &Volume) -> std::result::Result<Vec<u8>, String> {
    let header = build_header(volume)?;
    let mut buffer = Vec::with_capacity(VOX_OFFSET + volume.len() * 4);
    buffer.extend_from_slice(&header);
    // empty extension block
    buffer.extend_from_slice(&[0u8; 4]);
    for &v in volume.data() {
        buffer.extend_from_slice(&(v as f32).to_le_bytes());
    }
    Ok(buffer)
}

/// Encode a volume as gzipped NIfTI-1
pub fn encode_gz(volume: &Volume) -> std::result::Result<Vec<u8>, String> {
    let raw = encode(volume)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&raw)
        .map_err(|e| format!("gzip compression failed: {}", e))?;
    encoder.finish().map_err(|e| format!("gzip finish failed: {}", e))
}

/// Read a `.nii` or `.nii.gz` file into a volume
pub fn read_volume(path: &Path) -> Result<Volume> {
    let bytes = std::fs::read(path).map_err(|e| RpopError::io(path, e))?;
    decode(&bytes).map_err(|reason| RpopError::format(path, reason))
}

/// Write a volume; `.nii.gz` paths are gzip compressed, anything else is plain
pub fn write_volume(path: &Path, volume: &Volume) -> Result<()> {
    let gz = path.to_string_lossy().ends_with(".gz");
    let encoded = if gz { encode_gz(volume) } else { encode(volume) };
    let bytes = encoded.map_err(|reason| RpopError::format(path, reason))?;
    std::fs::write(path, bytes).map_err(|e| RpopError::io(path, e))
}
