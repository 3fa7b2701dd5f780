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
use crate::common::ids::SlotId;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ExprId(pub usize);

/// Stable function identity assigned by the host engine's catalog.
///
/// Opaque to the bridge: the accelerator's registry translates it to either
/// "unsupported" (0) or a positive opcode with a cost weight.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct FunctionId(pub u32);

impl FunctionId {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

#[derive(Clone, Debug)]
pub enum LiteralValue {
    Null,
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Binary(Vec<u8>),
}

/// Node grammar of the aggregate expression trees the host hands to the
/// bridge. The bridge never evaluates these; it only walks them for
/// eligibility and cost.
#[derive(Clone, Debug)]
pub enum ExprNode {
    Literal(LiteralValue),
    /// Reference to an input column by host plan slot id.
    ColumnRef(SlotId),
    FunctionCall {
        func: FunctionId,
        args: Vec<ExprId>,
    },
    /// Aggregate application. The aggregate identity itself is finalized on
    /// CPU by the host; only its argument expressions (and the optional
    /// filter) travel to the accelerator.
    Aggregate {
        args: Vec<ExprId>,
        filter: Option<ExprId>,
    },
}

#[derive(Clone, Debug, Default)]
pub struct ExprArena {
    nodes: Vec<ExprNode>,
}

impl ExprArena {
    pub fn push(&mut self, node: ExprNode) -> ExprId {
        let id = ExprId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: ExprId) -> Option<&ExprNode> {
        self.nodes.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
