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
//! Batch dispatch and the grouping-policy wrapper.
//!
//! Responsibilities:
//! - Intercepts batches from the host engine's grouping policy, routes
//!   eligible and cost-favorable ones through the accelerator, and delegates
//!   everything else to the wrapped CPU policy unchanged.
//! - Every step reports `ok` or `fallback`; fallback is ordinary control
//!   flow, not an error.
//!
//! Key exported interfaces:
//! - Types: `DispatchOutcome`, `GroupingPolicy`, `AggPlan`, `AcceleratedPolicy`.
//! - Functions: `dispatch_batch`, `install_policy`.

use std::sync::Arc;
use std::time::Instant;

use crate::exec::chunk::{estimated_row_width, Chunk};
use crate::exec::expr::{ExprArena, ExprId};
use crate::gpu::kds::{self, KdsBatch, PartialAggregate};
use crate::gpu::{cost, eligibility, runtime};
use crate::gpubridge_logging::debug;
use crate::runtime::worker_state::WorkerState;

/// Two-state outcome of every accelerated-path step.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DispatchOutcome {
    Ok,
    Fallback,
}

/// Submit one KDS batch to the accelerator.
///
/// `result_len` is in/out: buffer capacity on entry, bytes written on a
/// successful return. Unavailable runtime and nonzero return codes both
/// yield `Fallback`, logged at debug only.
pub fn dispatch_batch(
    batch: &KdsBatch,
    result: &mut [u8],
    result_len: &mut usize,
) -> DispatchOutcome {
    let Some(api) = runtime::accelerator_api() else {
        debug!("gpu_bridge: accelerator dispatch not available, falling back to cpu");
        return DispatchOutcome::Fallback;
    };

    let rc = unsafe {
        (api.submit)(
            batch.buffer().as_ptr(),
            batch.len(),
            result.as_mut_ptr(),
            result_len as *mut usize,
        )
    };
    if rc != 0 {
        debug!(
            "gpu_bridge: accelerator execution failed (rc={}), falling back to cpu",
            rc
        );
        return DispatchOutcome::Fallback;
    }
    DispatchOutcome::Ok
}

/// Contract of the host engine's grouping policy, and of the wrapper the
/// bridge installs around it. One batch in, one partial aggregate out; batch
/// order is preserved.
pub trait GroupingPolicy: Send {
    fn name(&self) -> &str;

    /// Plan-display label. Advisory only; never consulted by execution.
    fn plan_label(&self) -> Option<&'static str> {
        None
    }

    fn process_chunk(
        &mut self,
        state: &WorkerState,
        chunk: &Chunk,
    ) -> Result<PartialAggregate, String>;
}

/// Per-query aggregate plan the wrapper evaluates each batch against.
#[derive(Clone)]
pub struct AggPlan {
    pub arena: Arc<ExprArena>,
    pub agg_exprs: Vec<ExprId>,
}

impl AggPlan {
    pub fn new(arena: Arc<ExprArena>, agg_exprs: Vec<ExprId>) -> Self {
        Self { arena, agg_exprs }
    }

    pub fn num_aggs(&self) -> usize {
        self.agg_exprs.len()
    }
}

/// Grouping-policy wrapper: tries the accelerator for each batch and falls
/// back to the wrapped CPU policy on any rejection or failure.
pub struct AcceleratedPolicy {
    name: String,
    plan: AggPlan,
    inner: Box<dyn GroupingPolicy>,
}

/// Install the accelerated wrapper around the host's CPU grouping policy.
/// When the bridge is disabled this returns the CPU policy untouched, so
/// plans and labels are indistinguishable from an unloaded bridge.
pub fn install_policy(plan: AggPlan, cpu: Box<dyn GroupingPolicy>) -> Box<dyn GroupingPolicy> {
    if !runtime::enabled() {
        return cpu;
    }
    let name = format!("ACCELERATED({})", cpu.name());
    Box::new(AcceleratedPolicy {
        name,
        plan,
        inner: cpu,
    })
}

impl AcceleratedPolicy {
    /// The accelerated path for one batch. `Ok(None)` means fall back;
    /// only cancellation propagates as an error.
    fn try_accelerated(
        &self,
        state: &WorkerState,
        chunk: &Chunk,
    ) -> Result<Option<PartialAggregate>, String> {
        if !runtime::enabled() || chunk.is_empty() {
            return Ok(None);
        }
        if !eligibility::check_eligibility(&self.plan.arena, &self.plan.agg_exprs) {
            return Ok(None);
        }

        let nrows = chunk.len() as i64;
        let row_width = estimated_row_width(chunk.descs());
        let est = cost::estimate_cost(&self.plan.arena, &self.plan.agg_exprs, nrows, row_width);
        if !est.is_valid {
            return Ok(None);
        }
        let cpu_cost = cost::cpu_reference_cost(&self.plan.arena, &self.plan.agg_exprs, nrows);
        if est.total_cost >= cpu_cost {
            return Ok(None);
        }

        let batch = match kds::encode_columns(chunk.columns(), chunk.descs(), chunk.len()) {
            Ok(b) => b,
            Err(e) => {
                debug!("gpu_bridge: batch encoding failed: {}, falling back to cpu", e);
                return Ok(None);
            }
        };

        // Host interrupt check before committing to the accelerator call; an
        // in-flight call is awaited, never cancelled.
        state.check_cancelled()?;

        let n_aggs = self.plan.num_aggs();
        let mut result = vec![0u8; kds::result_buffer_len(n_aggs)];
        let mut result_len = result.len();
        let started = Instant::now();
        match dispatch_batch(&batch, &mut result, &mut result_len) {
            DispatchOutcome::Fallback => Ok(None),
            DispatchOutcome::Ok => {
                let elapsed_us = started.elapsed().as_secs_f64() * 1.0e6;
                let written = result_len.min(result.len());
                let observed_bytes = batch.len() as u64 + written as u64;
                cost::calibrate(observed_bytes, elapsed_us, est.compute_cost);
                Ok(Some(kds::decode_result(&result[..written], n_aggs)))
            }
        }
    }
}

impl GroupingPolicy for AcceleratedPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn plan_label(&self) -> Option<&'static str> {
        Some("accelerated")
    }

    fn process_chunk(
        &mut self,
        state: &WorkerState,
        chunk: &Chunk,
    ) -> Result<PartialAggregate, String> {
        match self.try_accelerated(state, chunk)? {
            Some(agg) => Ok(agg),
            None => self.inner.process_chunk(state, chunk),
        }
    }
}
