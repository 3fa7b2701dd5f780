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
use crate::exec::expr::{ExprArena, ExprId, ExprNode};
use crate::gpu::runtime::{self, AcceleratorApi};
use crate::gpubridge_logging::debug;

/// Recursive eligibility of a single expression node.
///
/// Constants and column references are always eligible. A function call is
/// eligible iff the accelerator registry returns a positive opcode for it
/// and every argument is eligible. An aggregate is eligible iff its argument
/// expressions and optional filter are; the aggregate identity itself is not
/// checked because the host finalizes aggregates on CPU after the
/// accelerator computes per-row argument values.
pub fn expr_is_eligible(api: &AcceleratorApi, arena: &ExprArena, id: ExprId) -> bool {
    let Some(node) = arena.node(id) else {
        debug!("gpu_bridge: expression id {} not present in arena", id.0);
        return false;
    };
    match node {
        ExprNode::Literal(_) | ExprNode::ColumnRef(_) => true,
        ExprNode::FunctionCall { func, args } => {
            let opcode = (api.func_opcode)(func.as_u32());
            if opcode <= 0 {
                debug!(
                    "gpu_bridge: function id {} has no accelerator opcode",
                    func.as_u32()
                );
                return false;
            }
            args.iter().all(|arg| expr_is_eligible(api, arena, *arg))
        }
        ExprNode::Aggregate { args, filter } => {
            if !args.iter().all(|arg| expr_is_eligible(api, arena, *arg)) {
                return false;
            }
            match filter {
                Some(f) => expr_is_eligible(api, arena, *f),
                None => true,
            }
        }
    }
}

/// Conjunction over the expression roots, without the global enabled guard.
pub(crate) fn roots_eligible(api: &AcceleratorApi, arena: &ExprArena, roots: &[ExprId]) -> bool {
    if roots.is_empty() {
        return false;
    }
    roots.iter().all(|root| expr_is_eligible(api, arena, *root))
}

/// Batch eligibility: every aggregate expression maps to registered
/// accelerator opcodes. Always false when the bridge is disabled or the
/// root list is empty. Pure and read-only; rejection detail goes to debug
/// logging only.
pub fn check_eligibility(arena: &ExprArena, roots: &[ExprId]) -> bool {
    let Some(api) = runtime::accelerator_api() else {
        return false;
    };
    roots_eligible(api, arena, roots)
}
