use serde::Deserialize;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Security {
    #[default]
    Plain,
    Tls,
}

#[derive(Clone, Deserialize)]
pub(crate) struct Server {
    /// Address of the server
    pub(crate) host: String,

    /// Port of the server
    pub(crate) port: u16,

    /// Plain TCP or TLS
    #[serde(default)]
    pub(crate) security: Security,

    /// User name for connection registration. Falls back to the daemon-wide `default_user`.
    #[serde(default)]
    pub(crate) user: Option<String>,

    /// Server password (optional)
    #[serde(default)]
    pub(crate) pass: Option<String>,

    /// Raw IRC command sent once after the welcome, with `{}` replaced by `pass`. Server
    /// dependent; most networks want something like `PRIVMSG NickServ :IDENTIFY {}`.
    #[serde(default)]
    pub(crate) ident_command: Option<String>,

    /// Channels to join on connect.
    #[serde(default)]
    pub(crate) channels: Vec<String>,
}

#[derive(Deserialize)]
pub(crate) struct Config {
    pub(crate) default_user: String,

    /// Path of the Unix socket local clients connect to.
    #[serde(default)]
    pub(crate) socket_path: Option<PathBuf>,

    /// Keyed by the server name clients will see; iteration order (and so the Hello catalog
    /// order) follows the key order.
    pub(crate) servers: BTreeMap<String, Server>,
}

impl Config {
    /// Returns error descriptions.
    pub(crate) fn validate(&self) -> Vec<String> {
        let mut errors = vec![];

        if self.default_user.trim().is_empty() {
            errors.push("'default_user' can't be empty".to_owned());
        }

        if self.servers.is_empty() {
            errors.push("No servers configured, please add at least one server".to_owned());
        }

        for (name, server) in &self.servers {
            if name.trim().is_empty() {
                errors.push("Server names can't be empty".to_owned());
            }

            if server.host.trim().is_empty() {
                errors.push(format!("'host' can't be empty for server '{}'", name));
            }

            if let Some(user) = &server.user {
                if user.trim().is_empty() {
                    errors.push(format!(
                        "'user' is present but empty for server '{}', either set it or drop it",
                        name
                    ));
                }
            }

            for chan in &server.channels {
                if !chan.starts_with(['#', '&']) {
                    errors.push(format!(
                        "Channel '{}' of server '{}' should start with '#' or '&'",
                        chan, name
                    ));
                }
            }
        }

        errors
    }
}

/// Returns the hircd config file path. File may or may not exist.
///
/// Panics when the platform config directory can't be found (using the `dirs` crate).
pub(crate) fn get_config_path() -> PathBuf {
    let mut config_path = dirs::config_dir().expect(
        "Can't determine the config directory, please consider setting $XDG_CONFIG_HOME or $HOME",
    );
    config_path.push("hirc");
    let _ = std::fs::create_dir_all(&config_path);
    config_path.push("config.yml");
    config_path
}

/// Default location of the local socket: the user data directory's `hirc/hircd.sock`.
pub(crate) fn get_default_socket_path() -> PathBuf {
    let mut socket_path = dirs::data_dir().expect(
        "Can't determine the data directory, please consider setting $XDG_DATA_HOME or $HOME",
    );
    socket_path.push("hirc");
    socket_path.push("hircd.sock");
    socket_path
}

pub(crate) fn parse_config(config_path: &Path) -> Result<Config, String> {
    let contents = {
        let mut str = String::new();
        let mut file = File::open(config_path).map_err(|err| err.to_string())?;
        file.read_to_string(&mut str)
            .map_err(|err| err.to_string())?;
        str
    };

    serde_yaml::from_str(&contents).map_err(|err| err.to_string())
}

pub(crate) fn generate_default_config(config_path: &Path) {
    if let Some(parent) = config_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Ok(mut file) = File::create(config_path) {
        let _ = file.write_all(include_str!("../config.yml").as_bytes());
    }
    println!(
        "\
hircd couldn't find a config file at {config_path:?}, and created one with defaults.
Edit {config_path:?} before re-running hircd."
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_default_config() {
        match serde_yaml::from_str::<Config>(include_str!("../config.yml")) {
            Err(yaml_err) => {
                println!("{yaml_err}");
                panic!();
            }
            Ok(config) => {
                assert!(config.validate().is_empty());
                let server = &config.servers["libera"];
                assert_eq!(server.security, Security::Tls);
                assert_eq!(server.channels, vec!["#tiny".to_owned()]);
            }
        }
    }

    #[test]
    fn parse_security_field() {
        let yaml = "\
default_user: milo
servers:
  ts:
    host: irc.example.com
    port: 6667
    security: plain
    channels: [\"#a\", \"#b\"]
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let server = &config.servers["ts"];
        assert_eq!(server.security, Security::Plain);
        assert_eq!(server.user, None);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn validation() {
        let yaml = "\
default_user: \"  \"
servers:
  ts:
    host: \"\"
    port: 6667
    channels: [\"general\"]
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let errors = config.validate();
        assert_eq!(errors.len(), 3);
        assert_eq!(&errors[0], "'default_user' can't be empty");
        assert_eq!(&errors[1], "'host' can't be empty for server 'ts'");
        assert_eq!(
            &errors[2],
            "Channel 'general' of server 'ts' should start with '#' or '&'"
        );
    }
}
