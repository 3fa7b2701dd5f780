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
//! Accelerator runtime discovery and process-wide bridge state.
//!
//! Responsibilities:
//! - Collects the accelerator's entry points and the host engine's presence
//!   marker deposited at load time, and publishes a complete capability
//!   record iff every entry point resolved.
//! - Owns the enabled flag and the live-updatable cost tunables.
//!
//! Key exported interfaces:
//! - Types: `AcceleratorApi`, `AcceleratorRegistration`, `BridgeStatus`.
//! - Functions: `register_accelerator`, `register_host_engine`,
//!   `initialize`, `enabled`, `accelerator_api`, `bridge_status`.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use serde::Serialize;

use crate::common::config;
use crate::gpubridge_logging::{debug, info};

/// Submit a KDS batch for accelerator execution.
///
/// `result_len` is in/out: capacity on entry, bytes written on return.
/// Returns 0 on success.
pub type SubmitFn =
    unsafe extern "C" fn(kds: *const u8, kds_len: usize, result: *mut u8, result_len: *mut usize) -> i32;

/// Registry lookup: function identity to opcode. Returns > 0 when supported.
pub type FuncOpcodeFn = extern "C" fn(func_id: u32) -> i32;

/// Per-row cost weight for a registered opcode.
pub type OpcodeCostFn = extern "C" fn(opcode: i32) -> f64;

/// Effective parallel width of the accelerator.
pub type ParallelismFn = extern "C" fn() -> i32;

/// Capability record for the accelerator runtime.
///
/// Exists only in fully-populated form: if any entry point is missing at
/// init, no record is published and the bridge stays disabled for the
/// process lifetime.
#[derive(Copy, Clone)]
pub struct AcceleratorApi {
    pub submit: SubmitFn,
    pub func_opcode: FuncOpcodeFn,
    pub opcode_cost: OpcodeCostFn,
    pub parallelism: ParallelismFn,
}

/// Entry points deposited by the accelerator runtime at load time, before
/// the bridge initializes. Partial registrations are discarded whole.
#[derive(Copy, Clone, Default)]
pub struct AcceleratorRegistration {
    pub submit: Option<SubmitFn>,
    pub func_opcode: Option<FuncOpcodeFn>,
    pub opcode_cost: Option<OpcodeCostFn>,
    pub parallelism: Option<ParallelismFn>,
}

impl AcceleratorRegistration {
    /// Complete capability record, or `None` if any entry point is missing.
    pub fn complete(&self) -> Option<AcceleratorApi> {
        Some(AcceleratorApi {
            submit: self.submit?,
            func_opcode: self.func_opcode?,
            opcode_cost: self.opcode_cost?,
            parallelism: self.parallelism?,
        })
    }
}

struct InitState {
    enabled: bool,
    accelerator_detected: bool,
    host_detected: bool,
    api: Option<AcceleratorApi>,
}

static REGISTRATION: Mutex<Option<AcceleratorRegistration>> = Mutex::new(None);
static HOST_SENTINEL: AtomicBool = AtomicBool::new(false);
static INIT: OnceLock<InitState> = OnceLock::new();

/// Called by the accelerator runtime when it loads. Must happen before
/// `initialize`; later deposits are ignored.
pub fn register_accelerator(registration: AcceleratorRegistration) {
    let mut guard = REGISTRATION.lock().unwrap_or_else(|e| e.into_inner());
    if guard.is_none() {
        *guard = Some(registration);
    }
}

/// Called by the host aggregation engine when it loads; stands in for the
/// engine's well-known presence symbol.
pub fn register_host_engine() {
    HOST_SENTINEL.store(true, Ordering::Release);
}

/// Bridge initialization, run once per process.
///
/// Registers the tunables, then probes for the host engine and a complete
/// accelerator capability record. Enabled iff both probes succeed; the
/// outcome is immutable for the process lifetime. Returns the enabled flag.
pub fn initialize() -> bool {
    INIT.get_or_init(|| {
        crate::common::logging::init_with_level(&config::log_filter_expression());

        seed_tunables_from_config();

        let host_detected = HOST_SENTINEL.load(Ordering::Acquire);
        let registration = {
            let guard = REGISTRATION.lock().unwrap_or_else(|e| e.into_inner());
            *guard
        };
        let api = match registration {
            Some(reg) => {
                let api = reg.complete();
                if api.is_none() {
                    debug!("gpu_bridge: accelerator registration is incomplete, discarding");
                }
                api
            }
            None => {
                debug!("gpu_bridge: no accelerator runtime registered");
                None
            }
        };
        let accelerator_detected = api.is_some();

        if !host_detected {
            info!("gpu_bridge: host aggregation engine not loaded, accelerator dispatch disabled");
        } else if !accelerator_detected {
            info!("gpu_bridge: accelerator runtime not loaded, accelerator dispatch disabled");
        } else {
            info!("gpu_bridge: host engine and accelerator runtime detected, dispatch enabled");
        }

        let enabled = host_detected && accelerator_detected;
        InitState {
            enabled,
            accelerator_detected,
            host_detected,
            api: if enabled { api } else { None },
        }
    })
    .enabled
}

/// Write-once per process: false until `initialize` succeeds, then fixed.
pub fn enabled() -> bool {
    INIT.get().map(|s| s.enabled).unwrap_or(false)
}

/// The published capability record; `None` unless the bridge is enabled.
pub fn accelerator_api() -> Option<&'static AcceleratorApi> {
    INIT.get().and_then(|s| if s.enabled { s.api.as_ref() } else { None })
}

// Tunables. The host updates these at any time; the cost model re-reads them
// on every estimate. f64 values are stored as bit patterns so the getters
// stay lock-free.

pub const TRANSFER_COST_PER_BYTE_MAX: f64 = 1.0e6;
pub const LAUNCH_OVERHEAD_MAX: f64 = 1.0e9;

static TRANSFER_COST_PER_BYTE: AtomicU64 = AtomicU64::new(0);
static LAUNCH_OVERHEAD: AtomicU64 = AtomicU64::new(0);
static MIN_BATCH_ROWS: AtomicI64 = AtomicI64::new(0);

fn seed_tunables_from_config() {
    set_transfer_cost_per_byte(config::cost_transfer_cost_per_byte());
    set_launch_overhead(config::cost_launch_overhead());
    set_min_batch_rows(config::cost_min_batch_rows());
}

pub(crate) fn clamp_real_tunable(value: f64, max: f64) -> f64 {
    if !value.is_finite() || value < 0.0 {
        0.0
    } else if value > max {
        max
    } else {
        value
    }
}

/// Cost per byte for accelerator data transfer. 0 means auto-calibrate.
pub fn set_transfer_cost_per_byte(value: f64) {
    let v = clamp_real_tunable(value, TRANSFER_COST_PER_BYTE_MAX);
    TRANSFER_COST_PER_BYTE.store(v.to_bits(), Ordering::Release);
}

pub fn transfer_cost_per_byte() -> f64 {
    f64::from_bits(TRANSFER_COST_PER_BYTE.load(Ordering::Acquire))
}

/// Fixed overhead per kernel launch. 0 means auto-calibrate.
pub fn set_launch_overhead(value: f64) {
    let v = clamp_real_tunable(value, LAUNCH_OVERHEAD_MAX);
    LAUNCH_OVERHEAD.store(v.to_bits(), Ordering::Release);
}

pub fn launch_overhead() -> f64 {
    f64::from_bits(LAUNCH_OVERHEAD.load(Ordering::Acquire))
}

/// Batches below this row count always take the CPU path. 0 defers to the
/// cost model.
pub fn set_min_batch_rows(value: i32) {
    MIN_BATCH_ROWS.store(i64::from(value.max(0)), Ordering::Release);
}

pub fn min_batch_rows() -> i32 {
    MIN_BATCH_ROWS.load(Ordering::Acquire) as i32
}

/// Diagnostic record for the host's status query.
#[derive(Clone, Debug, Serialize)]
pub struct BridgeStatus {
    pub enabled: bool,
    pub accelerator_detected: bool,
    pub host_detected: bool,
    pub transfer_cost_per_byte: f64,
    pub launch_overhead: f64,
    pub min_batch_rows: i32,
}

pub fn bridge_status() -> BridgeStatus {
    let (enabled, accelerator_detected, host_detected) = match INIT.get() {
        Some(s) => (s.enabled, s.accelerator_detected, s.host_detected),
        None => (false, false, false),
    };
    BridgeStatus {
        enabled,
        accelerator_detected,
        host_detected,
        transfer_cost_per_byte: transfer_cost_per_byte(),
        launch_overhead: launch_overhead(),
        min_batch_rows: min_batch_rows(),
    }
}
