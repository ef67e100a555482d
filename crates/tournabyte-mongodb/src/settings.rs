//! Database section of the service configuration

use serde::Deserialize;

use crate::options::{app_name, credentials, hosts, ConnectionOption};

/// Application name reported to the server when the settings name none
pub const DEFAULT_APP_NAME: &str = "Tournabyte API";

/// Connection settings as they appear in the service configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Seed hosts, `host[:port]`
    pub hosts: Vec<String>,
    pub username: String,
    pub password: String,
    #[serde(rename = "appName")]
    pub app_name: Option<String>,
}

impl DatabaseSettings {
    /// Connection options equivalent to these settings.
    ///
    /// An empty host list keeps the driver default (`localhost:27017`).
    pub fn connection_options(&self) -> Vec<ConnectionOption> {
        let name = self
            .app_name
            .clone()
            .unwrap_or_else(|| DEFAULT_APP_NAME.to_string());

        let mut options = vec![
            app_name(name),
            credentials(self.username.clone(), self.password.clone()),
        ];
        if !self.hosts.is_empty() {
            options.push(hosts(self.hosts.clone()));
        }
        options
    }
}
