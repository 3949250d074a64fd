use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::constants::{DEFAULT_MAX_RESYNC_BYTES, DEFAULT_MIN_POINTS, DEFAULT_WINDOW_SIZE};
use super::error::ConfigError;
use super::event::RunMetadata;
use super::format::{DecoderOptions, Electronics, EndMarkerPolicy};

/// Structure representing the application configuration. Contains pathing, run and
/// electronics information.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub electronics: Electronics,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub file_extension: Option<String>,
    pub first_run_number: i32,
    pub last_run_number: i32,
    pub n_threads: i32,
    pub window_size: u32,
    pub reorder_depth: Option<u32>,
    pub max_resync_bytes: u64,
    pub end_marker: EndMarkerPolicy,
    pub min_points: usize,
    pub sub_run_origin: i32,
    pub run_start: Option<String>,
}

impl Default for Config {
    /// Generate a new Config object. Paths will be empty/invalid
    fn default() -> Self {
        Self {
            electronics: Electronics::default(),
            input_path: PathBuf::from("None"),
            output_path: PathBuf::from("None"),
            file_extension: None,
            first_run_number: 0,
            last_run_number: 0,
            n_threads: 1,
            window_size: DEFAULT_WINDOW_SIZE,
            reorder_depth: None,
            max_resync_bytes: DEFAULT_MAX_RESYNC_BYTES,
            end_marker: EndMarkerPolicy::Strict,
            min_points: DEFAULT_MIN_POINTS,
            sub_run_origin: 0,
            run_start: None,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful and valid
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;
        let config = serde_yaml::from_str::<Self>(&yaml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration to a YAML file
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }

    /// Check the settings which would make merging impossible
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size < 1 {
            return Err(ConfigError::BadWindowSize(self.window_size));
        }
        if self.n_threads < 1 {
            return Err(ConfigError::BadThreadCount(self.n_threads));
        }
        let depth = self.get_reorder_depth();
        if depth >= self.window_size {
            return Err(ConfigError::BadReorderDepth(depth, self.window_size));
        }
        self.get_start_epoch_ns()?;
        Ok(())
    }

    /// Check if a specific run exists by evaluating the existance of its directory
    pub fn does_run_exist(&self, run_number: i32) -> bool {
        self.input_path.join(self.get_run_str(run_number)).exists()
    }

    /// Get the Path to a run directory
    pub fn get_run_directory(&self, run_number: i32) -> Result<PathBuf, ConfigError> {
        let run_dir: PathBuf = self.input_path.join(self.get_run_str(run_number));
        if run_dir.exists() {
            Ok(run_dir)
        } else {
            Err(ConfigError::BadFilePath(run_dir))
        }
    }

    /// Get the path to the output summary file
    pub fn get_output_file_name(&self, run_number: i32) -> Result<PathBuf, ConfigError> {
        let output_file_path: PathBuf = self
            .output_path
            .join(format!("{}.yml", self.get_run_str(run_number)));
        if self.output_path.exists() {
            Ok(output_file_path)
        } else {
            Err(ConfigError::BadFilePath(self.output_path.clone()))
        }
    }

    /// The extension of the raw data files, without the dot
    pub fn get_file_extension(&self) -> String {
        match &self.file_extension {
            Some(ext) => ext.trim_start_matches('.').to_string(),
            None => self.electronics.default_extension().to_string(),
        }
    }

    /// The configured reorder depth, or the electronics' own default
    pub fn get_reorder_depth(&self) -> u32 {
        match self.reorder_depth {
            Some(depth) => depth,
            None => self
                .electronics
                .build_format(&self.decoder_options())
                .default_reorder_depth(),
        }
    }

    pub fn decoder_options(&self) -> DecoderOptions {
        DecoderOptions {
            end_marker: self.end_marker,
            min_points: self.min_points,
        }
    }

    /// Start of the run in nanoseconds since the Unix epoch; 0 if not given
    pub fn get_start_epoch_ns(&self) -> Result<i64, ConfigError> {
        match &self.run_start {
            Some(start) => {
                let datetime = OffsetDateTime::parse(start, &Rfc3339)
                    .map_err(|_| ConfigError::BadRunStart(start.clone()))?;
                i64::try_from(datetime.unix_timestamp_nanos())
                    .map_err(|_| ConfigError::BadRunStart(start.clone()))
            }
            None => Ok(0),
        }
    }

    pub fn run_metadata(&self, run_number: i32) -> Result<RunMetadata, ConfigError> {
        Ok(RunMetadata {
            run_origin: run_number,
            sub_run_origin: self.sub_run_origin,
            start_epoch_ns: self.get_start_epoch_ns()?,
        })
    }

    /// Construct the run string using the DAQ format
    fn get_run_str(&self, run_number: i32) -> String {
        format!("run_{run_number:0>4}")
    }

    pub fn is_n_threads_valid(&self) -> bool {
        self.n_threads >= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::UstcVariant;

    #[test]
    fn test_read_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(
            &path,
            "electronics:\n  type: feminos\n  asic: after\n\
             input_path: /data\noutput_path: /out\nfirst_run_number: 2\n\
             last_run_number: 5\nwindow_size: 8\nrun_start: 2023-05-01T12:00:00Z\n",
        )
        .unwrap();
        let config = Config::read_config_file(&path).unwrap();
        assert_eq!(config.window_size, 8);
        assert_eq!(config.n_threads, 1);
        assert_eq!(config.get_file_extension(), "aqs");
        assert_eq!(config.get_reorder_depth(), 0);
        assert_eq!(config.get_start_epoch_ns().unwrap(), 1_682_942_400_000_000_000);
        let run = config.run_metadata(3).unwrap();
        assert_eq!(run.run_origin, 3);
        assert_eq!(run.start_epoch_ns, 1_682_942_400_000_000_000);
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        let config = Config {
            electronics: Electronics::Ustc {
                variant: UstcVariant::V4,
            },
            file_extension: Some(".bin".to_string()),
            ..Default::default()
        };
        config.write_config_file(&path).unwrap();
        let read = Config::read_config_file(&path).unwrap();
        assert_eq!(read.electronics, config.electronics);
        assert_eq!(read.get_file_extension(), "bin");
    }

    #[test]
    fn test_validation() {
        let config = Config {
            window_size: 0,
            reorder_depth: Some(0),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::BadWindowSize(0))));

        let config = Config {
            window_size: 2,
            reorder_depth: Some(2),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BadReorderDepth(2, 2))
        ));

        let config = Config {
            n_threads: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::BadThreadCount(0))));

        let config = Config {
            run_start: Some("yesterday".to_string()),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::BadRunStart(_))));

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_run_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("run_0007")).unwrap();
        let config = Config {
            input_path: dir.path().to_path_buf(),
            output_path: dir.path().to_path_buf(),
            ..Default::default()
        };
        assert!(config.does_run_exist(7));
        assert!(!config.does_run_exist(8));
        assert!(config.get_run_directory(8).is_err());
        assert_eq!(
            config.get_output_file_name(7).unwrap(),
            dir.path().join("run_0007.yml")
        );
    }
}
