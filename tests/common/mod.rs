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
//! Common utilities and helpers for bridge integration tests: a mock
//! accelerator runtime, chunk/expression builders, and an independent KDS
//! verification decoder derived from the binary-layout contract alone.
#![allow(dead_code)]
#![allow(unused_imports)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use arrow::array::{ArrayRef, BinaryArray, Float64Array, Int64Array, RecordBatch};
use arrow::datatypes::{DataType, Field, Schema};

use gpubridge::exec::expr::{ExprArena, ExprId, ExprNode, FunctionId};
use gpubridge::{AcceleratorRegistration, Chunk, ColumnDesc, ColumnKind, WorkerState};

/// Serializes tests that mutate mock-runtime state within one test binary.
pub static TEST_LOCK: Mutex<()> = Mutex::new(());

/// Mock accelerator runtime. Per-call behavior is driven by process statics
/// so one registration can serve every scenario in a test binary.
pub mod mock {
    use super::*;

    /// Return code the mock submit entry reports. 0 = success.
    pub static SUBMIT_RC: AtomicI32 = AtomicI32::new(0);
    /// Number of submit invocations observed.
    pub static SUBMIT_CALLS: AtomicUsize = AtomicUsize::new(0);
    /// When false, every registry lookup reports "unsupported".
    pub static SUPPORT_ALL: AtomicBool = AtomicBool::new(true);
    /// Function identities the registry rejects even when SUPPORT_ALL is set.
    pub static BLOCKED_FUNCS: Mutex<Option<HashSet<u32>>> = Mutex::new(None);

    pub fn block_func(func_id: u32) {
        let mut guard = BLOCKED_FUNCS.lock().expect("blocked funcs lock");
        guard.get_or_insert_with(HashSet::new).insert(func_id);
    }

    pub fn unblock_func(func_id: u32) {
        let mut guard = BLOCKED_FUNCS.lock().expect("blocked funcs lock");
        if let Some(set) = guard.as_mut() {
            set.remove(&func_id);
        }
    }

    pub extern "C" fn func_opcode(func_id: u32) -> i32 {
        if !SUPPORT_ALL.load(Ordering::SeqCst) {
            return 0;
        }
        let guard = BLOCKED_FUNCS.lock().expect("blocked funcs lock");
        if let Some(set) = guard.as_ref() {
            if set.contains(&func_id) {
                return 0;
            }
        }
        func_id as i32
    }

    pub extern "C" fn opcode_cost(_opcode: i32) -> f64 {
        10.0
    }

    pub extern "C" fn parallelism() -> i32 {
        1024
    }

    /// Behaves like a count-all kernel: reads the actual row count out of
    /// the KDS header and reports it for every aggregate slot.
    pub unsafe extern "C" fn submit(
        kds: *const u8,
        kds_len: usize,
        result: *mut u8,
        result_len: *mut usize,
    ) -> i32 {
        SUBMIT_CALLS.fetch_add(1, Ordering::SeqCst);
        let rc = SUBMIT_RC.load(Ordering::SeqCst);
        if rc != 0 {
            return rc;
        }

        let kds = std::slice::from_raw_parts(kds, kds_len);
        let nitems = u32::from_le_bytes(kds[12..16].try_into().expect("nitems"));

        let capacity = *result_len;
        let n_aggs = capacity / 9;
        let out = std::slice::from_raw_parts_mut(result, capacity);
        for i in 0..n_aggs {
            out[i * 8..(i + 1) * 8].copy_from_slice(&u64::from(nitems).to_ne_bytes());
        }
        for flag in out[n_aggs * 8..n_aggs * 9].iter_mut() {
            *flag = 0;
        }
        *result_len = n_aggs * 9;
        0
    }

    pub fn registration() -> AcceleratorRegistration {
        AcceleratorRegistration {
            submit: Some(submit),
            func_opcode: Some(func_opcode),
            opcode_cost: Some(opcode_cost),
            parallelism: Some(parallelism),
        }
    }
}

static INIT_ONCE: Once = Once::new();

/// Register the mock accelerator and host sentinel, then initialize the
/// bridge. Idempotent per process.
pub fn init_bridge_with_mock() -> bool {
    INIT_ONCE.call_once(|| {
        gpubridge::register_host_engine();
        gpubridge::register_accelerator(mock::registration());
    });
    gpubridge::initialize()
}

/// A plain CPU grouping policy that counts rows, mirroring the mock
/// accelerator kernel so both paths produce identical partial aggregates.
pub struct CountingCpuPolicy {
    pub calls: Arc<AtomicUsize>,
}

impl CountingCpuPolicy {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

impl gpubridge::GroupingPolicy for CountingCpuPolicy {
    fn name(&self) -> &str {
        "AGGREGATE"
    }

    fn process_chunk(
        &mut self,
        _state: &WorkerState,
        chunk: &Chunk,
    ) -> Result<gpubridge::PartialAggregate, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(gpubridge::PartialAggregate {
            values: vec![chunk.len() as u64],
            nulls: vec![false],
        })
    }
}

/// `count(f(v))`-shaped plan: one aggregate over one registered function of
/// one column.
pub fn single_agg_plan(func_id: u32) -> (Arc<ExprArena>, Vec<ExprId>) {
    let mut arena = ExprArena::default();
    let col = arena.push(ExprNode::ColumnRef(gpubridge::common::ids::SlotId::new(1)));
    let call = arena.push(ExprNode::FunctionCall {
        func: FunctionId::new(func_id),
        args: vec![col],
    });
    let agg = arena.push(ExprNode::Aggregate {
        args: vec![call],
        filter: None,
    });
    (Arc::new(arena), vec![agg])
}

pub fn int64_chunk(nrows: usize) -> Chunk {
    let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, true)]));
    let values: Vec<i64> = (0..nrows as i64).collect();
    let batch = RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values))])
        .expect("record batch");
    Chunk::try_new(batch, vec![ColumnDesc::new(ColumnKind::Int64, 1)]).expect("chunk")
}

pub fn wkb_point_z(x: f64, y: f64, z: f64) -> Vec<u8> {
    let mut wkb = Vec::with_capacity(29);
    wkb.push(1u8);
    wkb.extend_from_slice(&1001u32.to_le_bytes());
    wkb.extend_from_slice(&x.to_le_bytes());
    wkb.extend_from_slice(&y.to_le_bytes());
    wkb.extend_from_slice(&z.to_le_bytes());
    wkb
}

/// Chunk with one float64 measure and one POINT Z geometry column.
pub fn measure_and_geometry_chunk(points: &[Option<(f64, f64, f64)>]) -> Chunk {
    let nrows = points.len();
    let measures: ArrayRef = Arc::new(Float64Array::from(
        (0..nrows).map(|i| i as f64 * 0.5).collect::<Vec<_>>(),
    ));
    let wkbs: Vec<Option<Vec<u8>>> = points
        .iter()
        .map(|p| p.map(|(x, y, z)| wkb_point_z(x, y, z)))
        .collect();
    let geoms: ArrayRef = Arc::new(BinaryArray::from_opt_vec(
        wkbs.iter().map(|w| w.as_deref()).collect(),
    ));

    let schema = Arc::new(Schema::new(vec![
        Field::new("m", DataType::Float64, true),
        Field::new("g", DataType::Binary, true),
    ]));
    let batch = RecordBatch::try_new(schema, vec![measures, geoms]).expect("record batch");
    Chunk::try_new(
        batch,
        vec![
            ColumnDesc::new(ColumnKind::Float64, 1),
            ColumnDesc::with_srid(ColumnKind::GeometryPointZ, 2, 4978),
        ],
    )
    .expect("chunk")
}

// Independent KDS verification decoder, written against the binary-layout
// contract only (no bridge internals).

pub const VERIFY_MAX_ALIGN: usize = 8;

fn align_up(n: usize) -> usize {
    (n + VERIFY_MAX_ALIGN - 1) & !(VERIFY_MAX_ALIGN - 1)
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedPointZ {
    pub type_code: i32,
    pub flags: u16,
    pub srid: i32,
    pub nitems: i32,
    pub rawsize: i32,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone)]
pub enum VerifiedColumn {
    Fixed {
        validity: Vec<bool>,
        rows: Vec<Vec<u8>>,
    },
    Geometry {
        validity: Vec<bool>,
        offsets: Vec<u32>,
        points: Vec<Option<VerifiedPointZ>>,
    },
}

#[derive(Debug, Clone)]
pub struct VerifiedKds {
    pub length: u32,
    pub format: u16,
    pub ncols: usize,
    pub nrooms: u32,
    pub nrows: usize,
    pub columns: Vec<VerifiedColumn>,
}

fn rd_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(buf[off..off + 2].try_into().expect("u16"))
}

fn rd_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(buf[off..off + 4].try_into().expect("u32"))
}

fn rd_i32(buf: &[u8], off: usize) -> i32 {
    i32::from_le_bytes(buf[off..off + 4].try_into().expect("i32"))
}

fn rd_f64(buf: &[u8], off: usize) -> f64 {
    f64::from_le_bytes(buf[off..off + 8].try_into().expect("f64"))
}

fn rd_validity(buf: &[u8], off: usize, nrows: usize) -> Vec<bool> {
    (0..nrows)
        .map(|i| buf[off + i / 8] & (1 << (i % 8)) != 0)
        .collect()
}

/// Decode a KDS buffer given the per-column fixed widths (`None` marks a
/// geometry column). Panics on malformed layout; tests treat that as
/// failure.
pub fn verify_decode_kds(buf: &[u8], widths: &[Option<usize>]) -> VerifiedKds {
    let length = rd_u32(buf, 0);
    assert_eq!(length as usize, buf.len(), "header length vs buffer size");
    let format = rd_u16(buf, 4);
    let ncols = rd_u16(buf, 6) as usize;
    assert_eq!(ncols, widths.len(), "column count vs expectation");
    let nrooms = rd_u32(buf, 8);
    let nrows = rd_u32(buf, 12) as usize;

    let bitmap_bytes = align_up(nrows.div_ceil(64) * 8);

    let mut columns = Vec::with_capacity(ncols);
    for (idx, width) in widths.iter().enumerate() {
        let col_off = rd_u32(buf, 16 + idx * 4) as usize;
        assert!(col_off < buf.len(), "column offset in bounds");
        let validity = rd_validity(buf, col_off, nrows);

        // Bits past nrows in the final bitmap word must be zero.
        for bit in nrows..bitmap_bytes * 8 {
            assert_eq!(
                buf[col_off + bit / 8] & (1 << (bit % 8)),
                0,
                "trailing validity bit {} set",
                bit
            );
        }

        match width {
            Some(w) => {
                let data_off = col_off + bitmap_bytes;
                let rows = (0..nrows)
                    .map(|i| buf[data_off + i * w..data_off + (i + 1) * w].to_vec())
                    .collect();
                columns.push(VerifiedColumn::Fixed { validity, rows });
            }
            None => {
                let offsets_off = col_off + bitmap_bytes;
                let payload_off = offsets_off + align_up((nrows + 1) * 4);
                let offsets: Vec<u32> = (0..=nrows)
                    .map(|i| rd_u32(buf, offsets_off + i * 4))
                    .collect();
                assert_eq!(offsets[0], 0, "first geometry offset");
                for w in offsets.windows(2) {
                    assert!(w[0] <= w[1], "geometry offsets monotone");
                }

                let points = (0..nrows)
                    .map(|i| {
                        let start = offsets[i] as usize;
                        let end = offsets[i + 1] as usize;
                        if start == end {
                            return None;
                        }
                        assert_eq!(end - start, 48, "POINT Z block size");
                        let b = payload_off + start;
                        Some(VerifiedPointZ {
                            type_code: rd_i32(buf, b),
                            flags: rd_u16(buf, b + 4),
                            srid: rd_i32(buf, b + 8),
                            nitems: rd_i32(buf, b + 12),
                            rawsize: rd_i32(buf, b + 16),
                            x: rd_f64(buf, b + 24),
                            y: rd_f64(buf, b + 32),
                            z: rd_f64(buf, b + 40),
                        })
                    })
                    .collect();
                columns.push(VerifiedColumn::Geometry {
                    validity,
                    offsets,
                    points,
                });
            }
        }
    }

    VerifiedKds {
        length,
        format,
        ncols,
        nrooms,
        nrows,
        columns,
    }
}
