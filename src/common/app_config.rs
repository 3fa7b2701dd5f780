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
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<GpuBridgeConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static GpuBridgeConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = path.as_ref().to_path_buf();
    let cfg = GpuBridgeConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

/// The bridge is loaded into a host process; unlike a standalone server it
/// must come up with defaults when no config file is present.
pub fn init_from_env_or_default() -> Result<&'static GpuBridgeConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let cfg = match config_path_from_env_or_default() {
        Some(path) => GpuBridgeConfig::load_from_file(&path)?,
        None => GpuBridgeConfig::default(),
    };
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn config() -> Result<&'static GpuBridgeConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("GPUBRIDGE_CONFIG") {
        if !p.trim().is_empty() {
            return Some(PathBuf::from(p));
        }
    }

    let candidate = PathBuf::from("gpubridge.toml");
    if candidate.exists() {
        return Some(candidate);
    }
    None
}

#[derive(Clone, Deserialize)]
pub struct GpuBridgeConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "gpubridge=debug"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub cost: CostModelConfig,
}

impl GpuBridgeConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        let cfg: GpuBridgeConfig =
            toml::from_str(&s).with_context(|| format!("parse toml: {}", path.display()))?;
        Ok(cfg)
    }
}

impl Default for GpuBridgeConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            cost: CostModelConfig::default(),
        }
    }
}

/// Initial values for the cost-model tunables. Zero means "auto": transfer
/// and launch fall back to calibration, min rows defers to the cost model.
#[derive(Clone, Default, Deserialize)]
pub struct CostModelConfig {
    #[serde(default)]
    pub transfer_cost_per_byte: f64,

    #[serde(default)]
    pub launch_overhead: f64,

    #[serde(default)]
    pub min_batch_rows: i32,
}
