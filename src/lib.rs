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
pub mod common;
pub mod exec;
pub mod gpu;
pub mod runtime;

pub use common::app_config as gpubridge_config;
pub use common::logging as gpubridge_logging;

pub use exec::chunk::{Chunk, ColumnDesc, ColumnKind};
pub use exec::expr::{ExprArena, ExprId, ExprNode, FunctionId, LiteralValue};
pub use gpu::kds::PartialAggregate;
pub use gpu::policy::{AggPlan, GroupingPolicy, install_policy};
pub use gpu::runtime::{
    AcceleratorRegistration, BridgeStatus, bridge_status, initialize, register_accelerator,
    register_host_engine,
};
pub use runtime::worker_state::WorkerState;
