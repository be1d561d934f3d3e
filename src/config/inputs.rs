//! Parsing of the two run inputs: the configuration document and the
//! device list. Both accept either inline content or a file path, so
//! operators can paste a quick one-off or point at a checked-in file.

use std::path::Path;

use regex::Regex;
use tracing::{debug, info};

use super::document::ConfigDocument;

/// Errors loading or validating run inputs.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InputError {
    #[error("Configuration must have a '{0}' element")]
    MissingSection(&'static str),
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("Configuration file not found: {0}")]
    ConfigFileNotFound(String),
    #[error("Device list file not found: {0}")]
    DeviceFileNotFound(String),
    #[error("Device list is empty")]
    EmptyDeviceList,
    #[error("Error reading {path}: {message}")]
    Read { path: String, message: String },
}

/// Parse the configuration input: tried as a JSON string first, then as
/// a file path.
pub fn parse_config_input(input: &str) -> Result<ConfigDocument, InputError> {
    if serde_json::from_str::<serde_json::Value>(input).is_ok() {
        debug!("Configuration parsed as inline JSON");
        return ConfigDocument::from_json_str(input);
    }

    let path = Path::new(input);
    if !path.exists() {
        return Err(InputError::ConfigFileNotFound(input.to_string()));
    }
    let text = std::fs::read_to_string(path).map_err(|e| InputError::Read {
        path: input.to_string(),
        message: e.to_string(),
    })?;
    let doc = ConfigDocument::from_json_str(&text)?;
    info!(path = input, "Loaded configuration file");
    Ok(doc)
}

/// Parse the device input: an inline list of device IDs, or a file path.
///
/// Particle device IDs are 24-character hex strings; the inline form
/// accepts them separated by commas, semicolons, or whitespace, with or
/// without surrounding brackets. Anything that doesn't look like a list
/// of IDs is treated as a path. Duplicates are preserved.
pub fn parse_device_input(input: &str) -> Result<Vec<String>, InputError> {
    let cleaned = input.trim().trim_matches(['[', ']']);

    // Unambiguous 24-hex-char IDs anywhere in the input.
    static ID_PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let id_pattern = ID_PATTERN
        .get_or_init(|| Regex::new(r"(?i)[a-f0-9]{24}").expect("static pattern compiles"));
    let matched: Vec<String> = id_pattern
        .find_iter(cleaned)
        .map(|m| m.as_str().to_string())
        .collect();
    if !matched.is_empty() {
        info!(count = matched.len(), "Device input parsed as ID list");
        return Ok(matched);
    }

    // Separated tokens that all look like device IDs (hex, >= 20 chars).
    let tokens: Vec<&str> = cleaned
        .split([',', ';', ' ', '\t', '\n'])
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    if !tokens.is_empty()
        && tokens
            .iter()
            .all(|t| t.len() >= 20 && t.chars().all(|c| c.is_ascii_hexdigit()))
    {
        info!(count = tokens.len(), "Device input parsed as ID list");
        return Ok(tokens.into_iter().map(String::from).collect());
    }

    load_device_list(input)
}

/// Load a device list file: either a JSON array of ID strings or a
/// newline-separated list.
fn load_device_list(path: &str) -> Result<Vec<String>, InputError> {
    if !Path::new(path).exists() {
        return Err(InputError::DeviceFileNotFound(path.to_string()));
    }
    let content = std::fs::read_to_string(path).map_err(|e| InputError::Read {
        path: path.to_string(),
        message: e.to_string(),
    })?;
    let content = content.trim();

    let device_ids: Vec<String> = if content.starts_with('[') {
        serde_json::from_str(content).map_err(|e| InputError::InvalidJson(e.to_string()))?
    } else {
        content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect()
    };

    if device_ids.is_empty() {
        return Err(InputError::EmptyDeviceList);
    }
    info!(count = device_ids.len(), path, "Loaded device list");
    Ok(device_ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn inline_json_config() {
        let doc = parse_config_input(r#"{"config":{"system":{"logPeriod":60},"sensors":{}}}"#)
            .unwrap();
        assert_eq!(doc.config.system.log_period, 60);
    }

    #[test]
    fn inline_json_missing_section_is_fatal() {
        let err = parse_config_input(r#"{"config":{"system":{}}}"#).unwrap_err();
        assert_eq!(err, InputError::MissingSection("sensors"));
    }

    #[test]
    fn config_path_not_found() {
        let err = parse_config_input("/nonexistent/config.json").unwrap_err();
        assert!(matches!(err, InputError::ConfigFileNotFound(_)));
    }

    #[test]
    fn config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"config":{{"system":{{}},"sensors":{{"numSoil":2}}}}}}"#).unwrap();
        let doc = parse_config_input(file.path().to_str().unwrap()).unwrap();
        assert_eq!(doc.config.sensors.num_soil, 2);
    }

    #[test]
    fn inline_device_ids_comma_separated() {
        let ids =
            parse_device_input("e00fce681234567890abcdef, E00FCE68FEDCBA0987654321").unwrap();
        assert_eq!(
            ids,
            vec![
                "e00fce681234567890abcdef".to_string(),
                "E00FCE68FEDCBA0987654321".to_string()
            ]
        );
    }

    #[test]
    fn inline_device_ids_bracketed() {
        let ids = parse_device_input("[e00fce681234567890abcdef]").unwrap();
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn duplicates_are_preserved() {
        let ids = parse_device_input(
            "e00fce681234567890abcdef e00fce681234567890abcdef",
        )
        .unwrap();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn device_file_newline_separated() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "device-one").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "device-two").unwrap();
        let ids = parse_device_input(file.path().to_str().unwrap()).unwrap();
        assert_eq!(ids, vec!["device-one".to_string(), "device-two".to_string()]);
    }

    #[test]
    fn device_file_json_array() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"["a", "b", "c"]"#).unwrap();
        let ids = parse_device_input(file.path().to_str().unwrap()).unwrap();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn empty_device_file_is_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = parse_device_input(file.path().to_str().unwrap()).unwrap_err();
        assert_eq!(err, InputError::EmptyDeviceList);
    }

    #[test]
    fn missing_device_file_is_error() {
        let err = parse_device_input("/nonexistent/devices.txt").unwrap_err();
        assert!(matches!(err, InputError::DeviceFileNotFound(_)));
    }
}
