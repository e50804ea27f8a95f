use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tracing::info;

use crate::simulation::error::EngineError;

/// Reads an xml document into a serde type. Supports plain `.xml` and gzipped `.xml.gz`
/// files, which is what network converters typically hand us.
pub fn read_xml<T>(path: &Path) -> Result<T, EngineError>
where
    T: DeserializeOwned,
{
    info!("Starting to read xml file at: {path:?}");
    let file = File::open(path).map_err(|e| EngineError::io(path, e))?;
    let buffered_reader = BufReader::new(file);

    let file_name = path.to_string_lossy();
    if file_name.ends_with(".xml.gz") {
        let decoder = flate2::read::GzDecoder::new(buffered_reader);
        let buffered_decoder = BufReader::new(decoder);
        let mut deserializer = quick_xml::de::Deserializer::from_reader(buffered_decoder);
        serde_path_to_error::deserialize(&mut deserializer)
            .map_err(|e| EngineError::parse(path, e))
    } else if file_name.ends_with(".xml") {
        let mut deserializer = quick_xml::de::Deserializer::from_reader(buffered_reader);
        serde_path_to_error::deserialize(&mut deserializer)
            .map_err(|e| EngineError::parse(path, e))
    } else {
        Err(EngineError::parse(
            path,
            "unsupported file ending. Either use `.xml` or `.xml.gz`",
        ))
    }
}

/// Relative paths in a config file are resolved against the directory of that config file.
pub fn resolve_path(config_path: &Option<PathBuf>, file_path: &Path) -> PathBuf {
    if file_path.is_absolute() || file_path.starts_with("./") {
        return file_path.to_path_buf();
    }

    if let Some(path) = config_path.as_ref().and_then(|c| c.parent()) {
        path.join(file_path)
    } else {
        file_path.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::{read_xml, resolve_path};

    // only testing the failure cases here, the ok cases are implicitly tested when
    // data containers are loaded e.g. in network and scenario
    #[test]
    fn unsupported_ending() {
        let result: Result<(), _> = read_xml(Path::new("file-path-with-unsupported.ending"));
        assert!(result.is_err());
    }

    #[test]
    fn missing_file() {
        let result: Result<(), _> = read_xml(Path::new("does-not-exist.xml"));
        assert!(result.is_err());
    }

    #[test]
    fn resolve_relative_to_config() {
        let config = Some(PathBuf::from("/conf/run.yml"));
        assert_eq!(
            PathBuf::from("/conf/net.xml"),
            resolve_path(&config, Path::new("net.xml"))
        );
        assert_eq!(
            PathBuf::from("./net.xml"),
            resolve_path(&config, Path::new("./net.xml"))
        );
        assert_eq!(
            PathBuf::from("/abs/net.xml"),
            resolve_path(&config, Path::new("/abs/net.xml"))
        );
    }
}
