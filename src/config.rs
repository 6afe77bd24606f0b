use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Base64 salt for hashing client IPs in metric labels.
    pub ip_hash_salt: String,

    /// Refuse reads and writes of sessions the participant is not part of.
    pub enforce_membership: bool,

    /// Mark a participant offline in every session it wrote to when its
    /// connection drops without leaving.
    pub mark_offline_on_disconnect: bool,

    pub blend_period_ms: u64,

    pub glow_period_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ip_hash_salt: "Z2FyZGVucHJlc2VuY2U".to_owned(),
            enforce_membership: true,
            mark_offline_on_disconnect: true,
            blend_period_ms: 8000,
            glow_period_ms: 2000,
        }
    }
}

pub fn load(path: &Path) -> Result<Config, failure::Error> {
    // create a new file if it does not exist
    if !path.exists() {
        let mut file = File::create(path)?;
        let config = toml::from_str::<Config>("")?;
        file.write_all(toml::to_string(&config)?.as_ref())?;
        return Ok(config);
    }

    let mut file = File::open(path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    Ok(toml::from_str(&contents)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let path = std::env::temp_dir().join(format!(
            "garden-presence-config-{}.toml",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let created = load(&path).unwrap();
        assert_eq!(created, Config::default());
        assert!(path.exists());
        assert_eq!(load(&path).unwrap(), Config::default());

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn partial_files_keep_defaults() {
        let config: Config = toml::from_str("enforce_membership = false").unwrap();
        assert!(!config.enforce_membership);
        assert_eq!(config.blend_period_ms, 8000);
        assert!(config.mark_offline_on_disconnect);
    }
}
