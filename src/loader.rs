//! Loading JSON inputs (models, documents, configuration) from files,
//! strings and HTTP URLs.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::LoadError;
use crate::types::Options;

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Read a file as text.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` if the file doesn't exist,
/// or `LoadError::ReadError` if it cannot be read.
pub fn load_text(path: &Path) -> Result<String, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    std::fs::read_to_string(path).map_err(|source| LoadError::ReadError {
        path: path.to_path_buf(),
        source,
    })
}

/// Load JSON from a file path.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` if the file doesn't exist,
/// or `LoadError::InvalidJson` if the file isn't valid JSON.
pub fn load_json(path: &Path) -> Result<Value, LoadError> {
    let content = load_text(path)?;
    load_json_str(&content)
}

/// Load JSON from a string.
///
/// # Errors
///
/// Returns `LoadError::InvalidJson` if the string isn't valid JSON.
pub fn load_json_str(content: &str) -> Result<Value, LoadError> {
    serde_json::from_str(content).map_err(|source| LoadError::InvalidJson { source })
}

/// Fetch a body from an HTTP/HTTPS URL as text.
///
/// Requires the `remote` feature (enabled by default).
///
/// # Errors
///
/// Returns `LoadError::NetworkError` if the request fails or the server
/// answers with an error status.
#[cfg(feature = "remote")]
pub fn load_url_text(url: &str) -> Result<String, LoadError> {
    let network = |source| LoadError::NetworkError {
        url: url.to_string(),
        source,
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(network)?;

    tracing::debug!(url, "fetching");
    client
        .get(url)
        .send()
        .and_then(|response| response.error_for_status())
        .and_then(|response| response.text())
        .map_err(network)
}

/// Check if a string looks like a URL (starts with http:// or https://).
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Read text from a file path or URL.
///
/// URL loading requires the `remote` feature.
pub fn load_text_auto(source: &str) -> Result<String, LoadError> {
    if is_url(source) {
        #[cfg(feature = "remote")]
        {
            load_url_text(source)
        }
        #[cfg(not(feature = "remote"))]
        {
            Err(LoadError::FileNotFound {
                path: std::path::PathBuf::from(source),
            })
        }
    } else {
        load_text(Path::new(source))
    }
}

/// Load JSON from a file path or URL.
pub fn load_auto(source: &str) -> Result<Value, LoadError> {
    load_json_str(&load_text_auto(source)?)
}

/// Load and deserialize a typed value from a file path or URL.
pub fn load_typed<T: DeserializeOwned>(source: &str) -> Result<T, LoadError> {
    serde_json::from_str(&load_text_auto(source)?)
        .map_err(|source| LoadError::InvalidJson { source })
}

/// Load [`Options`] from a JSON configuration file or URL.
///
/// Missing keys take their defaults.
pub fn load_options(source: &str) -> Result<Options, LoadError> {
    load_typed(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn load_json_valid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"data": null}}"#).unwrap();

        let value = load_json(file.path()).unwrap();
        assert!(value["data"].is_null());
    }

    #[test]
    fn load_json_file_not_found() {
        let result = load_json(Path::new("/nonexistent/path.json"));
        assert!(matches!(result, Err(LoadError::FileNotFound { .. })));
        assert_eq!(result.unwrap_err().exit_code(), 3);
    }

    #[test]
    fn load_json_invalid() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not valid json").unwrap();

        let result = load_json(file.path());
        assert!(matches!(result, Err(LoadError::InvalidJson { .. })));
    }

    #[test]
    fn load_json_str_invalid() {
        assert!(matches!(
            load_json_str("{"),
            Err(LoadError::InvalidJson { .. })
        ));
    }

    #[test]
    fn is_url_detection() {
        assert!(is_url("https://example.com/model.json"));
        assert!(is_url("http://example.com/model.json"));
        assert!(!is_url("/path/to/model.json"));
        assert!(!is_url("model.json"));
    }

    #[test]
    fn options_from_file_use_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"maxAtomicOperations": 3, "baseUrl": "https://api.test"}}"#).unwrap();

        let options = load_options(file.path().to_str().unwrap()).unwrap();
        assert_eq!(options.max_atomic_operations, 3);
        assert_eq!(options.base_url.as_deref(), Some("https://api.test"));
        assert!(!options.allow_client_generated_ids);
    }

    #[cfg(feature = "remote")]
    mod remote {
        use super::*;

        #[test]
        fn load_auto_url() {
            let mut server = mockito::Server::new();
            let mock = server
                .mock("GET", "/model.json")
                .with_status(200)
                .with_header("content-type", "application/json")
                .with_body(r#"{"resources": []}"#)
                .create();

            let value = load_auto(&format!("{}/model.json", server.url())).unwrap();
            assert!(value["resources"].as_array().unwrap().is_empty());
            mock.assert();
        }

        #[test]
        fn load_url_error_status() {
            let mut server = mockito::Server::new();
            let _mock = server.mock("GET", "/missing.json").with_status(404).create();

            let result = load_auto(&format!("{}/missing.json", server.url()));
            assert!(matches!(result, Err(LoadError::NetworkError { .. })));
            assert_eq!(result.unwrap_err().exit_code(), 3);
        }
    }
}
