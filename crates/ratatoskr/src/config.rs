//! Configuration for a robot's team communication.
//!
//! ```toml
//! robot_id = 3
//! port = 10012
//! budget = 128
//!
//! [transport]
//! mode = "field"
//! subnet = "10.0.255.255"
//!
//! [priorities]
//! BallEstimate = 12
//! ```
use std::collections::HashMap;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::message::MAX_MESSAGE_BYTES;
use crate::{RegistryBuilder, Result};

/// A configuration that lives in a toml file at a fixed path relative to a config directory.
pub trait Config: DeserializeOwned {
    /// Path of the file, relative to the config directory.
    const PATH: &'static str;

    /// Loads the configuration from `dir`.
    fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(dir.as_ref().join(Self::PATH))?;
        Ok(toml::from_str(&contents)?)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CommsConfig {
    /// Id this robot sends with, and filters its own echoes by.
    pub robot_id: u16,
    /// UDP port shared by the whole team.
    pub port: u16,
    pub transport: TransportConfig,
    /// Maximum packet size in bytes, never more than [`MAX_MESSAGE_BYTES`].
    #[serde(default = "default_budget")]
    pub budget: usize,
    /// Priority overrides by component name, applied before the registry is frozen.
    #[serde(default)]
    pub priorities: HashMap<String, i32>,
}

impl Config for CommsConfig {
    const PATH: &'static str = "comms.toml";
}

/// How packets reach the teammates.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Broadcast to every robot on the wireless segment.
    Field { subnet: Ipv4Addr },
    /// Multicast on this host only, for simulated robots.
    Local {
        /// Address the multicast group is derived from.
        #[serde(default = "default_host")]
        host: Ipv4Addr,
    },
}

fn default_budget() -> usize {
    MAX_MESSAGE_BYTES
}

fn default_host() -> Ipv4Addr {
    Ipv4Addr::LOCALHOST
}

impl CommsConfig {
    /// Applies the configured priority overrides.
    ///
    /// Fails if an override names a kind that has not been registered.
    pub fn apply_priorities(&self, builder: &mut RegistryBuilder) -> Result<()> {
        for (name, priority) in &self.priorities {
            builder.set_priority(name, *priority)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{BallEstimate, RobotPose, register_standard};
    use crate::{Component, Error};

    const FIELD: &str = r#"
robot_id = 3
port = 10012

[transport]
mode = "field"
subnet = "10.0.255.255"

[priorities]
BallEstimate = 12
"#;

    #[test]
    fn test_load() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join(CommsConfig::PATH), FIELD)?;

        let config = CommsConfig::load(dir.path())?;
        assert_eq!(config.robot_id, 3);
        assert_eq!(config.port, 10012);
        assert_eq!(config.budget, MAX_MESSAGE_BYTES);
        assert_eq!(
            config.transport,
            TransportConfig::Field {
                subnet: Ipv4Addr::new(10, 0, 255, 255)
            }
        );

        Ok(())
    }

    #[test]
    fn test_local_default_host() -> Result<()> {
        let config: CommsConfig = toml::from_str(
            r#"
robot_id = 1
port = 10100
budget = 64
transport = { mode = "local" }
"#,
        )?;

        assert_eq!(config.budget, 64);
        assert_eq!(
            config.transport,
            TransportConfig::Local {
                host: Ipv4Addr::LOCALHOST
            }
        );
        Ok(())
    }

    #[test]
    fn test_unknown_field() {
        let parsed = toml::from_str::<CommsConfig>("robot_id = 1\nport = 1\nteam = 4\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(CommsConfig::load(dir.path()), Err(Error::Io(_))));
    }

    #[test]
    fn test_apply_priorities() -> Result<()> {
        let config: CommsConfig = toml::from_str(FIELD)?;
        let mut builder = RegistryBuilder::new();
        register_standard(&mut builder)?;
        config.apply_priorities(&mut builder)?;
        let registry = builder.freeze()?;

        assert_eq!(registry.get(BallEstimate::NAME).map(|d| d.priority()), Some(12));
        assert_eq!(registry.pack_order()[0], registry.id_of::<BallEstimate>().unwrap());
        assert_eq!(registry.get(RobotPose::NAME).map(|d| d.priority()), Some(10));

        let mut unknown = config.clone();
        unknown.priorities.insert("Referee".to_string(), 1);
        let mut builder = RegistryBuilder::new();
        register_standard(&mut builder)?;
        assert!(matches!(
            unknown.apply_priorities(&mut builder),
            Err(Error::UnregisteredComponent(_))
        ));

        Ok(())
    }
}
