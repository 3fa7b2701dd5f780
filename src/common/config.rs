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
use crate::gpubridge_config::config as gpubridge_app_config;

/// EnvFilter expression for logging init: explicit filter wins over level.
pub(crate) fn log_filter_expression() -> String {
    gpubridge_app_config()
        .ok()
        .map(|c| {
            c.log_filter
                .clone()
                .unwrap_or_else(|| c.log_level.clone())
        })
        .unwrap_or_else(|| "info".to_string())
}

pub(crate) fn cost_transfer_cost_per_byte() -> f64 {
    gpubridge_app_config()
        .ok()
        .map(|c| c.cost.transfer_cost_per_byte)
        .unwrap_or(0.0)
}

pub(crate) fn cost_launch_overhead() -> f64 {
    gpubridge_app_config()
        .ok()
        .map(|c| c.cost.launch_overhead)
        .unwrap_or(0.0)
}

pub(crate) fn cost_min_batch_rows() -> i32 {
    gpubridge_app_config()
        .ok()
        .map(|c| c.cost.min_batch_rows)
        .unwrap_or(0)
}
