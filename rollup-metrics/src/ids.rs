// rollup - bitdrift's streaming metrics aggregation core
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./ids_test.rs"]
mod ids_test;

use base64ct::{Base64, Encoding};

// Entity ids are built from base64 encoded names so that the connectors below can never appear
// inside an encoded segment.
const SERVICE_ID_CONNECTOR: char = '.';
const ID_CONNECTOR: char = '_';
const RELATION_ID_CONNECTOR: char = '-';

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum IdError {
  #[error("malformed service id '{0}'")]
  MalformedServiceId(String),
}

fn encode(name: &str) -> String {
  Base64::encode_string(name.as_bytes())
}

fn decode(encoded: &str) -> Option<String> {
  Base64::decode_vec(encoded)
    .ok()
    .and_then(|bytes| String::from_utf8(bytes).ok())
}

// A service id is the encoded service name followed by a flag telling whether the service is a
// normal (instrumented) service or a conjectured one such as a remote database.
#[must_use]
pub fn service_id(name: &str, normal: bool) -> String {
  format!(
    "{}{SERVICE_ID_CONNECTOR}{}",
    encode(name),
    if normal { '1' } else { '0' }
  )
}

// Reverse of service_id().
pub fn parse_service_id(id: &str) -> Result<(String, bool), IdError> {
  let malformed = || IdError::MalformedServiceId(id.to_string());
  let (encoded, normal) = id.rsplit_once(SERVICE_ID_CONNECTOR).ok_or_else(malformed)?;
  let normal = match normal {
    "1" => true,
    "0" => false,
    _ => return Err(malformed()),
  };
  Ok((decode(encoded).ok_or_else(malformed)?, normal))
}

#[must_use]
pub fn instance_id(service_id: &str, instance_name: &str) -> String {
  format!("{service_id}{ID_CONNECTOR}{}", encode(instance_name))
}

#[must_use]
pub fn endpoint_id(service_id: &str, endpoint_name: &str) -> String {
  format!("{service_id}{ID_CONNECTOR}{}", encode(endpoint_name))
}

#[must_use]
pub fn relation_id(source_id: &str, dest_id: &str) -> String {
  format!("{source_id}{RELATION_ID_CONNECTOR}{dest_id}")
}
