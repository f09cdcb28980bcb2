use crate::types::Config;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_roundtrip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "capture:\n  cooldown_ms: 3000\nexport:\n  gallery_dir: /tmp/wrongway\n  jpeg_quality: 80\n"
        )
        .unwrap();

        let cfg = Config::load(file.path()).expect("config should load");
        assert_eq!(cfg.capture.cooldown_ms, 3000);
        assert_eq!(cfg.export.gallery_dir, "/tmp/wrongway");
        assert_eq!(cfg.export.jpeg_quality, 80);
    }

    #[test]
    fn test_load_missing_file_errors() {
        let err = Config::load("/nonexistent/config.yaml").unwrap_err();
        assert!(err.to_string().contains("config"));
    }
}
