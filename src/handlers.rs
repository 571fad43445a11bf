use std::{fs::File, io::BufReader, path::Path};

use crate::{environment::Environment, models::DefaultFlag, Result};

/// Provides a fallback flag for features that cannot be resolved.
///
/// Any `Fn(&str) -> DefaultFlag` closure implements this trait.
pub trait DefaultFlagHandler {
    fn get_default_flag(&self, feature_name: &str) -> DefaultFlag;
}

impl<T: Fn(&str) -> DefaultFlag> DefaultFlagHandler for T {
    fn get_default_flag(&self, feature_name: &str) -> DefaultFlag {
        self(feature_name)
    }
}

/// Provides an environment document from a source other than the Flagsmith API.
///
/// The handler is called once, when the client is created.
pub trait OfflineHandler {
    fn get_environment(&self) -> Environment;
}

/// Offline handler that serves an environment document loaded from a local JSON file.
#[derive(Debug, Clone)]
pub struct LocalFileHandler {
    environment: Environment,
}

impl LocalFileHandler {
    /// Read and parse the environment document at `path`.
    ///
    /// ```no_run
    /// # use flagsmith::LocalFileHandler;
    /// let handler = LocalFileHandler::new("environment.json").unwrap();
    /// ```
    pub fn new(path: impl AsRef<Path>) -> Result<LocalFileHandler> {
        let file = File::open(path.as_ref())?;
        let environment = serde_json::from_reader(BufReader::new(file))?;
        log::debug!(target: "flagsmith", path:display = path.as_ref().display(); "loaded environment document from file");
        Ok(LocalFileHandler { environment })
    }
}

impl OfflineHandler for LocalFileHandler {
    fn get_environment(&self) -> Environment {
        self.environment.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{DefaultFlagHandler, LocalFileHandler, OfflineHandler};
    use crate::{models::DefaultFlag, Error};

    #[test]
    fn closures_are_default_flag_handlers() {
        let handler = |name: &str| DefaultFlag {
            enabled: name == "on",
            value: name.into(),
        };

        assert!(handler.get_default_flag("on").enabled);
        assert!(!handler.get_default_flag("off").enabled);
    }

    #[test]
    fn local_file_handler_reads_document() {
        let handler = LocalFileHandler::new("tests/data/environment.json").unwrap();

        assert_eq!(handler.get_environment().api_key, "B62qaMZNwfiqT76p38ggrQ");
    }

    #[test]
    fn local_file_handler_missing_file() {
        assert!(matches!(
            LocalFileHandler::new("tests/data/does-not-exist.json"),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn local_file_handler_invalid_document() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{\"not\": \"an environment\"}").unwrap();

        assert!(matches!(
            LocalFileHandler::new(file.path()),
            Err(Error::InvalidResponse(_))
        ));
    }
}
