// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

use anyhow::Context;
use serde::de::DeserializeOwned;
use std::path::Path;

// Parse a YAML document into a config structure. An empty document is treated as an empty mapping
// so that every field falls back to its default.
pub fn from_yaml<T: DeserializeOwned>(yaml: &str) -> anyhow::Result<T> {
  if yaml.trim().is_empty() {
    return Ok(serde_yaml::from_value(serde_yaml::Value::Mapping(
      serde_yaml::Mapping::new(),
    ))?);
  }
  Ok(serde_yaml::from_str(yaml)?)
}

pub fn load_from_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> anyhow::Result<T> {
  let path = path.as_ref();
  let file_contents = std::fs::read_to_string(path)
    .with_context(|| format!("can't read config file {}", path.display()))?;
  log::debug!("loaded {} byte(s) from {}", file_contents.len(), path.display());
  from_yaml(&file_contents).with_context(|| format!("invalid config file {}", path.display()))
}
