// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Arrow-to-KDS batch transcoding.
//!
//! Responsibilities:
//! - Builds kernel-data-store buffers in the accelerator runtime's columnar
//!   binary layout: header, per-column validity bitmaps, fixed-width data
//!   runs, and offset+payload regions with per-value POINT Z headers.
//! - Decodes accelerator result buffers back into partial-aggregate form.
//!
//! Key exported interfaces:
//! - Types: `KdsBatch`, `PartialAggregate`.
//! - Functions: `encode_columns`, `decode_result`, `write_point_z`.
//!
//! The byte layout is an ABI contract with the external accelerator runtime
//! and is pinned to the version this bridge was built against; a layout
//! change on the consumer side requires a coordinated update here.

use arrow::array::{Array, ArrayRef, BinaryArray};
use arrow_buffer::NullBuffer;

use crate::exec::chunk::ColumnDesc;
use crate::gpubridge_logging::debug;

/// Platform maximum alignment; every region inside a KDS buffer starts on
/// this boundary.
pub const MAX_ALIGN: usize = 8;

/// Format tag for the columnar KDS layout.
pub const KDS_FORMAT_COLUMN: u16 = 4;

// Header field offsets.
const HDR_LENGTH_OFF: usize = 0;
const HDR_FORMAT_OFF: usize = 4;
const HDR_NCOLS_OFF: usize = 6;
const HDR_NROOMS_OFF: usize = 8;
const HDR_NITEMS_OFF: usize = 12;
const HDR_COL_OFFSETS: usize = 16;

/// Geometry type code for POINT.
pub const POINT_TYPE: i32 = 1;
/// Flags bit: the geometry carries a Z coordinate.
pub const FLAG_HAS_Z: u16 = 0x01;
/// Serialized size of one POINT Z value: 24-byte header and 24 bytes of
/// coordinates, keeping the doubles 8-byte aligned in every block.
pub const POINT_Z_SIZE: usize = 48;
/// Raw coordinate payload: three 8-byte doubles.
const POINT_RAW_SIZE: i32 = 24;
const POINT_NITEMS: i32 = 1;
/// Minimum well-known-binary POINT Z record: byte order (1), type (4),
/// three doubles (24).
pub const MIN_WKB_POINT_Z: usize = 29;
/// ECEF spatial reference, used when the column descriptor carries none.
pub const DEFAULT_POINT_SRID: i32 = 4978;

/// Bytes per aggregate slot in a result buffer: an 8-byte value plus a
/// 1-byte null flag.
pub const AGG_VALUE_SIZE: usize = 8;

pub(crate) fn max_align(n: usize) -> usize {
    (n + MAX_ALIGN - 1) & !(MAX_ALIGN - 1)
}

fn validity_bitmap_bytes(nrows: usize) -> usize {
    max_align(nrows.div_ceil(64) * 8)
}

fn fixed_column_bytes(nrows: usize, width: usize) -> usize {
    validity_bitmap_bytes(nrows) + max_align(nrows * width)
}

fn geometry_column_bytes(nrows: usize) -> usize {
    validity_bitmap_bytes(nrows)
        + max_align((nrows + 1) * 4)
        + max_align(nrows * POINT_Z_SIZE)
}

pub(crate) fn header_size(ncols: usize) -> usize {
    max_align(HDR_COL_OFFSETS + ncols * 4)
}

/// One transcoded batch: a contiguous buffer in the accelerator's columnar
/// layout, owned by the bridge for the duration of a single dispatch.
#[derive(Debug)]
pub struct KdsBatch {
    buffer: Vec<u8>,
    ncols: usize,
    nrows: usize,
}

impl KdsBatch {
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }
}

fn write_u16_at(dest: &mut [u8], offset: usize, value: u16) {
    dest[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn write_u32_at(dest: &mut [u8], offset: usize, value: u32) {
    dest[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn write_i32_at(dest: &mut [u8], offset: usize, value: i32) {
    dest[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn write_f64_at(dest: &mut [u8], offset: usize, value: f64) {
    dest[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

fn read_f64_le(bytes: &[u8], offset: usize) -> f64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    f64::from_le_bytes(raw)
}

fn read_u64_ne(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_ne_bytes(raw)
}

/// Write a column's validity bitmap. Arrow and KDS share the LSB-first
/// bitmap convention, so a byte-aligned Arrow bitmap is copied verbatim.
/// Bits at positions >= nrows are forced to zero in every case: Arrow leaves
/// them unspecified, the accelerator must not see garbage.
fn write_validity(dest: &mut [u8], nulls: Option<&NullBuffer>, nrows: usize) {
    let word_bytes = nrows.div_ceil(64) * 8;
    match nulls {
        None => {
            for b in dest[..word_bytes].iter_mut() {
                *b = 0xFF;
            }
        }
        Some(nulls) => {
            let bits = nulls.inner();
            if bits.offset() % 8 == 0 {
                let start = bits.offset() / 8;
                let nbytes = nrows.div_ceil(8);
                dest[..nbytes].copy_from_slice(&bits.values()[start..start + nbytes]);
            } else {
                // Sliced to a non-byte boundary: rebuild bit by bit.
                for i in 0..nrows {
                    if nulls.is_valid(i) {
                        dest[i / 8] |= 1 << (i % 8);
                    }
                }
            }
        }
    }

    if nrows % 8 != 0 {
        dest[nrows / 8] &= (1u8 << (nrows % 8)) - 1;
    }
    for b in dest[nrows.div_ceil(8)..word_bytes].iter_mut() {
        *b = 0;
    }
}

fn encode_fixed_column(
    dest: &mut [u8],
    array: &ArrayRef,
    width: usize,
    nrows: usize,
) -> Result<(), String> {
    let data = array.to_data();
    write_validity(dest, data.nulls(), nrows);

    let data_off = validity_bitmap_bytes(nrows);
    if let Some(values) = data.buffers().first() {
        let start = data.offset() * width;
        let need = nrows * width;
        let src = values.as_slice();
        if src.len() < start + need {
            return Err(format!(
                "fixed-width data buffer too short: have {} bytes, need {}",
                src.len(),
                start + need
            ));
        }
        dest[data_off..data_off + need].copy_from_slice(&src[start..start + need]);
    }
    Ok(())
}

/// Serialize one POINT Z value at `dest[0..48]`. Layout: type code, flags,
/// 2 pad bytes, srid, inline-item count, raw payload size, 4 pad bytes, then
/// x/y/z doubles at 8-byte alignment. Returns the written length.
pub fn write_point_z(dest: &mut [u8], srid: i32, x: f64, y: f64, z: f64) -> usize {
    write_i32_at(dest, 0, POINT_TYPE);
    write_u16_at(dest, 4, FLAG_HAS_Z);
    dest[6..8].fill(0);
    write_i32_at(dest, 8, srid);
    write_i32_at(dest, 12, POINT_NITEMS);
    write_i32_at(dest, 16, POINT_RAW_SIZE);
    dest[20..24].fill(0);
    write_f64_at(dest, 24, x);
    write_f64_at(dest, 32, y);
    write_f64_at(dest, 40, z);
    POINT_Z_SIZE
}

fn encode_geometry_column(
    dest: &mut [u8],
    array: &ArrayRef,
    srid: i32,
    nrows: usize,
) -> Result<(), String> {
    let bin = array
        .as_any()
        .downcast_ref::<BinaryArray>()
        .ok_or_else(|| {
            format!(
                "geometry column expects a binary array, got {:?}",
                array.data_type()
            )
        })?;

    let data = bin.to_data();
    write_validity(dest, data.nulls(), nrows);

    let offsets_off = validity_bitmap_bytes(nrows);
    let payload_off = offsets_off + max_align((nrows + 1) * 4);

    let mut cursor: u32 = 0;
    for i in 0..nrows {
        write_u32_at(dest, offsets_off + i * 4, cursor);

        if !bin.is_valid(i) {
            continue;
        }

        let wkb = bin.value(i);
        if wkb.len() < MIN_WKB_POINT_Z {
            debug!(
                "gpu_bridge: geometry payload at row {} is {} bytes, below the {}-byte POINT Z minimum, emitting no value",
                i,
                wkb.len(),
                MIN_WKB_POINT_Z
            );
            continue;
        }

        // WKB POINT Z: skip byte order (1) and type (4), read three packed
        // little-endian doubles.
        let x = read_f64_le(wkb, 5);
        let y = read_f64_le(wkb, 13);
        let z = read_f64_le(wkb, 21);

        let block = &mut dest[payload_off + cursor as usize..];
        let written = write_point_z(block, srid, x, y, z);
        cursor += written as u32;
    }
    write_u32_at(dest, offsets_off + nrows * 4, cursor);
    Ok(())
}

/// Transcode a set of Arrow arrays into one KDS columnar buffer.
///
/// The Arrow buffers are borrowed for the duration of the call; the returned
/// batch owns its buffer outright and holds no Arrow references.
pub fn encode_columns(
    arrays: &[ArrayRef],
    descs: &[ColumnDesc],
    nrows: usize,
) -> Result<KdsBatch, String> {
    if nrows == 0 {
        return Err("cannot encode an empty batch".to_string());
    }
    if nrows > i32::MAX as usize {
        return Err(format!("batch of {} rows exceeds the KDS row limit", nrows));
    }
    if arrays.len() != descs.len() {
        return Err(format!(
            "column count mismatch: {} arrays, {} descriptors",
            arrays.len(),
            descs.len()
        ));
    }
    let ncols = descs.len();
    if ncols == 0 || ncols > usize::from(u16::MAX) {
        return Err(format!("unsupported column count: {}", ncols));
    }
    for (idx, array) in arrays.iter().enumerate() {
        if array.len() != nrows {
            return Err(format!(
                "column {} has {} rows, batch declares {}",
                idx,
                array.len(),
                nrows
            ));
        }
    }

    // Sizing pass.
    let hdr = header_size(ncols);
    let mut col_sizes = Vec::with_capacity(ncols);
    let mut total = hdr;
    for desc in descs {
        let col_size = match desc.kind.fixed_width() {
            Some(width) => fixed_column_bytes(nrows, width),
            None => geometry_column_bytes(nrows),
        };
        col_sizes.push(col_size);
        total += col_size;
    }
    if total > u32::MAX as usize {
        return Err(format!("KDS buffer of {} bytes exceeds the length field", total));
    }

    // Zero-initialized: padding and null slots must not leak process memory
    // to the accelerator.
    let mut buffer = vec![0u8; total];

    write_u32_at(&mut buffer, HDR_LENGTH_OFF, total as u32);
    write_u16_at(&mut buffer, HDR_FORMAT_OFF, KDS_FORMAT_COLUMN);
    write_u16_at(&mut buffer, HDR_NCOLS_OFF, ncols as u16);
    write_u32_at(&mut buffer, HDR_NROOMS_OFF, nrows as u32);
    write_u32_at(&mut buffer, HDR_NITEMS_OFF, nrows as u32);

    let mut col_off = hdr;
    for (idx, (array, desc)) in arrays.iter().zip(descs.iter()).enumerate() {
        write_u32_at(&mut buffer, HDR_COL_OFFSETS + idx * 4, col_off as u32);

        let region = &mut buffer[col_off..col_off + col_sizes[idx]];
        match desc.kind.fixed_width() {
            Some(width) => encode_fixed_column(region, array, width, nrows)?,
            None => {
                let srid = desc.srid.unwrap_or(DEFAULT_POINT_SRID);
                encode_geometry_column(region, array, srid, nrows)?
            }
        }
        col_off += col_sizes[idx];
    }

    Ok(KdsBatch {
        buffer,
        ncols,
        nrows,
    })
}

/// Per-batch bridge output in the host's partial-aggregate shape: one value
/// and one null flag per aggregate, in declaration order.
#[derive(Clone, Debug, PartialEq)]
pub struct PartialAggregate {
    pub values: Vec<u64>,
    pub nulls: Vec<bool>,
}

impl PartialAggregate {
    pub fn all_null(n_aggs: usize) -> Self {
        Self {
            values: vec![0; n_aggs],
            nulls: vec![true; n_aggs],
        }
    }
}

/// Bytes a result buffer must hold for `n_aggs` aggregates.
pub fn result_buffer_len(n_aggs: usize) -> usize {
    n_aggs * (AGG_VALUE_SIZE + 1)
}

/// Decode an accelerator result buffer: `n_aggs` 8-byte values followed by
/// `n_aggs` 1-byte null flags. A short buffer yields all-null outputs.
pub fn decode_result(result_buf: &[u8], n_aggs: usize) -> PartialAggregate {
    if result_buf.len() < result_buffer_len(n_aggs) {
        return PartialAggregate::all_null(n_aggs);
    }

    let mut values = Vec::with_capacity(n_aggs);
    for i in 0..n_aggs {
        values.push(read_u64_ne(result_buf, i * AGG_VALUE_SIZE));
    }
    let null_base = n_aggs * AGG_VALUE_SIZE;
    let nulls = (0..n_aggs)
        .map(|i| result_buf[null_base + i] != 0)
        .collect();

    PartialAggregate { values, nulls }
}
