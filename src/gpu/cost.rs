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
//! Accelerator-vs-CPU cost estimation.
//!
//! Cost formula:
//!   total = transfer_bytes * transfer_cost + launch_overhead
//!           + nrows * opcode_cost_sum / parallelism
//!
//! Transfer cost and launch overhead resolve explicit tunable > calibrated >
//! default; calibration happens once per process from the first successful
//! dispatch. The bridge exposes numbers; the host compares them.

use std::sync::OnceLock;

use crate::exec::expr::{ExprArena, ExprId, ExprNode};
use crate::gpu::runtime::{self, AcceleratorApi};
use crate::gpubridge_logging::debug;

/// Conservative defaults used before calibration. The launch overhead is
/// deliberately high so small batches stay on the CPU path.
pub const DEFAULT_TRANSFER_COST_PER_BYTE: f64 = 1.0e-4;
pub const DEFAULT_LAUNCH_OVERHEAD: f64 = 10_000.0;
pub const DEFAULT_PARALLELISM: i32 = 1024;

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct CostEstimate {
    pub is_valid: bool,
    pub total_cost: f64,
    pub transfer_cost: f64,
    pub launch_cost: f64,
    pub compute_cost: f64,
}

impl CostEstimate {
    pub(crate) fn invalid() -> Self {
        Self::default()
    }
}

/// Transfer and launch constants measured on the local accelerator.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Calibration {
    pub transfer_cost_per_byte: f64,
    pub launch_overhead: f64,
}

static CALIBRATION: OnceLock<Calibration> = OnceLock::new();

pub fn is_calibrated() -> bool {
    CALIBRATION.get().is_some()
}

pub(crate) fn calibration() -> Option<Calibration> {
    CALIBRATION.get().copied()
}

pub(crate) fn compute_calibration(
    bytes_transferred: u64,
    elapsed_us: f64,
    estimated_compute: f64,
) -> Calibration {
    // Cost units are treated as roughly proportional to microseconds.
    Calibration {
        transfer_cost_per_byte: elapsed_us / bytes_transferred as f64,
        launch_overhead: (elapsed_us - estimated_compute).max(1.0),
    }
}

/// One-time calibration from the first successful dispatch: observed bytes
/// moved in both directions and elapsed wall-clock microseconds. Later calls
/// are no-ops; the first published values hold for the process lifetime.
pub fn calibrate(bytes_transferred: u64, elapsed_us: f64, estimated_compute: f64) {
    if bytes_transferred == 0 || elapsed_us <= 0.0 {
        return;
    }
    let cal = compute_calibration(bytes_transferred, elapsed_us, estimated_compute);
    if CALIBRATION.set(cal).is_ok() {
        debug!(
            "gpu_bridge: calibrated transfer cost = {:.6} per byte, launch overhead = {:.1} (from {} bytes in {:.1} us)",
            cal.transfer_cost_per_byte, cal.launch_overhead, bytes_transferred, elapsed_us
        );
    }
}

pub(crate) fn effective_transfer_cost(tunable: f64, calibration: Option<Calibration>) -> f64 {
    if tunable > 0.0 {
        return tunable;
    }
    if let Some(cal) = calibration {
        if cal.transfer_cost_per_byte > 0.0 {
            return cal.transfer_cost_per_byte;
        }
    }
    DEFAULT_TRANSFER_COST_PER_BYTE
}

pub(crate) fn effective_launch_overhead(tunable: f64, calibration: Option<Calibration>) -> f64 {
    if tunable > 0.0 {
        return tunable;
    }
    if let Some(cal) = calibration {
        if cal.launch_overhead > 0.0 {
            return cal.launch_overhead;
        }
    }
    DEFAULT_LAUNCH_OVERHEAD
}

pub(crate) fn effective_parallelism(reported: i32) -> i32 {
    if reported > 0 {
        reported
    } else {
        DEFAULT_PARALLELISM
    }
}

/// Recursive opcode-cost sum over one expression tree. Constants, column
/// references, and the aggregate wrappers themselves contribute zero;
/// aggregate argument expressions are descended into.
pub fn sum_opcode_costs(api: &AcceleratorApi, arena: &ExprArena, id: ExprId) -> f64 {
    let Some(node) = arena.node(id) else {
        return 0.0;
    };
    match node {
        ExprNode::Literal(_) | ExprNode::ColumnRef(_) => 0.0,
        ExprNode::FunctionCall { func, args } => {
            let mut cost = 0.0;
            let opcode = (api.func_opcode)(func.as_u32());
            if opcode > 0 {
                cost += (api.opcode_cost)(opcode);
            }
            for arg in args {
                cost += sum_opcode_costs(api, arena, *arg);
            }
            cost
        }
        ExprNode::Aggregate { args, .. } => args
            .iter()
            .map(|arg| sum_opcode_costs(api, arena, *arg))
            .sum(),
    }
}

fn roots_opcode_cost_sum(api: &AcceleratorApi, arena: &ExprArena, roots: &[ExprId]) -> f64 {
    roots
        .iter()
        .map(|root| sum_opcode_costs(api, arena, *root))
        .sum()
}

/// Everything the estimate formula reads besides the batch itself; split out
/// so the arithmetic can be exercised without process-global state.
#[derive(Copy, Clone, Debug)]
pub(crate) struct CostInputs {
    pub transfer_cost_per_byte: f64,
    pub launch_overhead: f64,
    pub min_batch_rows: i32,
    pub parallelism: i32,
    pub calibration: Option<Calibration>,
}

impl CostInputs {
    #[cfg(test)]
    pub(crate) fn defaults() -> Self {
        Self {
            transfer_cost_per_byte: 0.0,
            launch_overhead: 0.0,
            min_batch_rows: 0,
            parallelism: DEFAULT_PARALLELISM,
            calibration: None,
        }
    }
}

pub(crate) fn estimate_from_inputs(
    inputs: &CostInputs,
    opcode_cost_sum: f64,
    nrows: i64,
    row_width: usize,
) -> CostEstimate {
    if nrows <= 0 {
        return CostEstimate::invalid();
    }
    if inputs.min_batch_rows > 0 && nrows < i64::from(inputs.min_batch_rows) {
        return CostEstimate::invalid();
    }
    if opcode_cost_sum <= 0.0 {
        return CostEstimate::invalid();
    }

    // Bidirectional: batch up, results back.
    let transfer_bytes = nrows as f64 * row_width as f64 * 2.0;
    let transfer_cost =
        transfer_bytes * effective_transfer_cost(inputs.transfer_cost_per_byte, inputs.calibration);
    let launch_cost = effective_launch_overhead(inputs.launch_overhead, inputs.calibration);
    let parallelism = effective_parallelism(inputs.parallelism);
    let compute_cost = nrows as f64 * opcode_cost_sum / f64::from(parallelism);

    CostEstimate {
        is_valid: true,
        total_cost: transfer_cost + launch_cost + compute_cost,
        transfer_cost,
        launch_cost,
        compute_cost,
    }
}

/// Estimated accelerator cost for a batch of `nrows` rows of `row_width`
/// bytes under the given aggregate expressions. Invalid when the bridge is
/// disabled, the batch is empty or under `min_batch_rows`, or no expression
/// node maps to a costed opcode.
pub fn estimate_cost(
    arena: &ExprArena,
    roots: &[ExprId],
    nrows: i64,
    row_width: usize,
) -> CostEstimate {
    let Some(api) = runtime::accelerator_api() else {
        return CostEstimate::invalid();
    };
    let inputs = CostInputs {
        transfer_cost_per_byte: runtime::transfer_cost_per_byte(),
        launch_overhead: runtime::launch_overhead(),
        min_batch_rows: runtime::min_batch_rows(),
        parallelism: (api.parallelism)(),
        calibration: calibration(),
    };
    estimate_from_inputs(&inputs, roots_opcode_cost_sum(api, arena, roots), nrows, row_width)
}

pub(crate) fn cpu_reference(opcode_cost_sum: f64, nrows: i64) -> f64 {
    nrows as f64 * opcode_cost_sum
}

/// CPU baseline the wrapper compares the accelerator estimate against:
/// every per-row opcode evaluated without parallelism or transfer.
pub fn cpu_reference_cost(arena: &ExprArena, roots: &[ExprId], nrows: i64) -> f64 {
    let Some(api) = runtime::accelerator_api() else {
        return 0.0;
    };
    cpu_reference(roots_opcode_cost_sum(api, arena, roots), nrows)
}
