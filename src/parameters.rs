use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::checksum;
use crate::error::{DeployError, Result};
use crate::normalize::Parameters;

/// Parameter name to value, built fresh for each deployment unit.
pub type ParameterMap = BTreeMap<String, JsonValue>;

/// The two accepted parameter file layouts.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterFile {
    /// ARM deployment parameters: `{ "parameters": { "name": { "value": ... } } }`.
    Wrapped(ParameterMap),
    /// A plain object mapping names straight to values.
    Flat(ParameterMap),
}

impl ParameterFile {
    /// Decode parameter file text: the ARM layout when it fits, else flat.
    ///
    /// The ARM layout needs a `parameters` object whose entries all carry a
    /// `value`. Any other JSON object is read as flat, so a plain parameter
    /// that happens to be named `parameters` still works.
    pub fn decode(path: &Path, text: &str) -> Result<Self> {
        let format_err = |reason: String| DeployError::Format {
            path: path.to_path_buf(),
            reason,
        };

        let value: JsonValue =
            serde_json::from_str(text).map_err(|err| format_err(err.to_string()))?;
        let JsonValue::Object(obj) = value else {
            return Err(format_err("parameter file must be a JSON object".to_string()));
        };

        if let Some(map) = decode_wrapped(&obj) {
            return Ok(ParameterFile::Wrapped(map));
        }
        Ok(ParameterFile::Flat(obj.into_iter().collect()))
    }

    pub fn into_map(self) -> ParameterMap {
        match self {
            ParameterFile::Wrapped(map) | ParameterFile::Flat(map) => map,
        }
    }
}

fn decode_wrapped(obj: &serde_json::Map<String, JsonValue>) -> Option<ParameterMap> {
    let JsonValue::Object(entries) = obj.get("parameters")? else {
        return None;
    };
    entries
        .iter()
        .map(|(name, entry)| entry.get("value").map(|v| (name.clone(), v.clone())))
        .collect()
}

/// Build the merged parameter map for one unit.
///
/// File values are loaded first (and checksum-verified when a checksum is
/// declared), then inline overrides replace same-named keys.
pub fn resolve(params: &Parameters) -> Result<ParameterMap> {
    let mut merged = ParameterMap::new();

    if let Some(path) = params.file.as_deref() {
        let text = fs::read_to_string(path).map_err(|err| match err.kind() {
            ErrorKind::NotFound => DeployError::FileNotFound(path.to_path_buf()),
            _ => DeployError::Io(err),
        })?;
        merged = ParameterFile::decode(path, &text)?.into_map();

        checksum::verify_file(path, params.checksum.as_deref())?;
    }

    for (key, value) in &params.overrides {
        merged.insert(key.clone(), value.clone());
    }

    Ok(merged)
}
