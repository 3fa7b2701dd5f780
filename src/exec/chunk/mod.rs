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
use arrow::array::{Array, ArrayRef, RecordBatch};
use arrow::datatypes::DataType;

/// Semantic column types the bridge can carry to the accelerator.
///
/// `Int64` covers microsecond timestamps as well; the accelerator only sees
/// the raw 8-byte values.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ColumnKind {
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    GeometryPointZ,
}

impl ColumnKind {
    /// Fixed value width in bytes, or `None` for variable-length geometry.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            ColumnKind::Int16 => Some(2),
            ColumnKind::Int32 => Some(4),
            ColumnKind::Int64 => Some(8),
            ColumnKind::Float32 => Some(4),
            ColumnKind::Float64 => Some(8),
            ColumnKind::GeometryPointZ => None,
        }
    }

    fn matches_arrow(self, data_type: &DataType) -> bool {
        match self {
            ColumnKind::Int16 => matches!(data_type, DataType::Int16),
            ColumnKind::Int32 => matches!(data_type, DataType::Int32),
            ColumnKind::Int64 => {
                matches!(data_type, DataType::Int64 | DataType::Timestamp(_, _))
            }
            ColumnKind::Float32 => matches!(data_type, DataType::Float32),
            ColumnKind::Float64 => matches!(data_type, DataType::Float64),
            ColumnKind::GeometryPointZ => matches!(data_type, DataType::Binary),
        }
    }
}

/// Column descriptor for transcoding: semantic type, source attribute index
/// in the host tuple, and the spatial reference for geometry columns.
#[derive(Clone, Debug)]
pub struct ColumnDesc {
    pub kind: ColumnKind,
    pub attnum: i32,
    pub srid: Option<i32>,
}

impl ColumnDesc {
    pub fn new(kind: ColumnKind, attnum: i32) -> Self {
        Self {
            kind,
            attnum,
            srid: None,
        }
    }

    pub fn with_srid(kind: ColumnKind, attnum: i32, srid: i32) -> Self {
        Self {
            kind,
            attnum,
            srid: Some(srid),
        }
    }
}

/// Bytes per row used for transfer estimation: fixed widths plus the
/// serialized per-value size for geometry columns.
pub fn estimated_row_width(descs: &[ColumnDesc]) -> usize {
    descs
        .iter()
        .map(|d| d.kind.fixed_width().unwrap_or(crate::gpu::kds::POINT_Z_SIZE))
        .sum()
}

/// A decompressed batch handed over by the host aggregation engine.
///
/// Wraps an Arrow `RecordBatch` together with the bridge's column
/// descriptors. Ownership of the Arrow buffers stays with the host for the
/// duration of one dispatch.
#[derive(Debug, Clone)]
pub struct Chunk {
    batch: RecordBatch,
    descs: Vec<ColumnDesc>,
}

impl Chunk {
    pub fn try_new(batch: RecordBatch, descs: Vec<ColumnDesc>) -> Result<Self, String> {
        if batch.num_columns() != descs.len() {
            return Err(format!(
                "chunk column count mismatch: batch has {}, descriptors have {}",
                batch.num_columns(),
                descs.len()
            ));
        }
        for (idx, (column, desc)) in batch.columns().iter().zip(descs.iter()).enumerate() {
            if !desc.kind.matches_arrow(column.data_type()) {
                return Err(format!(
                    "column {} (attnum {}): descriptor {:?} does not match arrow type {:?}",
                    idx,
                    desc.attnum,
                    desc.kind,
                    column.data_type()
                ));
            }
        }
        Ok(Self { batch, descs })
    }

    pub fn len(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn columns(&self) -> &[ArrayRef] {
        self.batch.columns()
    }

    pub fn descs(&self) -> &[ColumnDesc] {
        &self.descs
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }
}
