use chrono_tz::Tz;
use log::warn;
use std::collections::HashMap;
use std::env;

use crate::classifier::Team;
use crate::transport::ChannelRouting;

#[derive(Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub data: DataConfig,
    pub channels: ChannelConfig,
    /// Outbound chat gateway base URL.
    pub gateway_url: String,
    /// Property timezone for user-facing timestamps.
    pub timezone: Tz,
}

#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone)]
pub struct DataConfig {
    pub db_path: String,
    pub keywords_file: String,
    pub users_file: String,
}

#[derive(Clone)]
pub struct ChannelConfig {
    pub primary: String,
    pub destinations: HashMap<Team, String>,
}

impl ChannelConfig {
    pub fn routing(&self) -> ChannelRouting {
        ChannelRouting::new(self.destinations.clone(), self.primary.clone())
    }
}

fn get_str(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut destinations = HashMap::new();
        for team in Team::ALL {
            let key = format!("TICKETBOT_CHANNEL_{}", team.code().to_uppercase());
            if let Ok(channel) = env::var(&key) {
                destinations.insert(team, channel);
            }
        }

        let timezone = {
            let raw = get_str("TICKETBOT_TZ", "America/Hermosillo");
            raw.parse().unwrap_or_else(|_| {
                warn!("unknown timezone {raw}, falling back to America/Hermosillo");
                chrono_tz::America::Hermosillo
            })
        };

        Self {
            server: ServerConfig {
                host: get_str("TICKETBOT_HOST", "0.0.0.0"),
                port: get_str("TICKETBOT_PORT", "8080").parse().unwrap_or(8080),
            },
            data: DataConfig {
                db_path: get_str("TICKETBOT_DB", "data/tickets.db"),
                keywords_file: get_str("TICKETBOT_KEYWORDS", "data/keywords.json"),
                users_file: get_str("TICKETBOT_USERS", "data/users.json"),
            },
            channels: ChannelConfig {
                primary: get_str("TICKETBOT_PRIMARY_CHANNEL", "primary@g.us"),
                destinations,
            },
            gateway_url: get_str("TICKETBOT_GATEWAY_URL", "http://127.0.0.1:3000"),
            timezone,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
