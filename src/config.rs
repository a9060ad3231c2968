use serde::Deserialize;
use std::env;

/// Default number of days a king may stay inactive before the crown is vacated.
pub const DEFAULT_KING_TIMEOUT_DAYS: i64 = 3;

/// Default number of tracked recent messages (dedup window bound).
pub const DEFAULT_RECENT_WINDOW: usize = 5;

/// Default number of players shown on the leaderboard.
pub const DEFAULT_LEADERBOARD_TOP_N: usize = 10;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub roles: RoleConfig,
    pub channels: ChannelConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RoleConfig {
    pub king_role_name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChannelConfig {
    pub results_channel: String,
    pub leaderboard_channel: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    pub king_timeout_days: i64,
    pub recent_window: usize,
    pub leaderboard_top_n: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            king_timeout_days: DEFAULT_KING_TIMEOUT_DAYS,
            recent_window: DEFAULT_RECENT_WINDOW,
            leaderboard_top_n: DEFAULT_LEADERBOARD_TOP_N,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            roles: RoleConfig {
                king_role_name: "Scrimmer of The Hill".to_string(),
            },
            channels: ChannelConfig {
                results_channel: "scrimmage-results".to_string(),
                leaderboard_channel: "scrimmer-of-the-hill".to_string(),
            },
            engine: EngineConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let king_role_name = env::var("KING_ROLE_NAME").unwrap_or(defaults.roles.king_role_name);
        let results_channel =
            env::var("RESULTS_CHANNEL").unwrap_or(defaults.channels.results_channel);
        let leaderboard_channel =
            env::var("LEADERBOARD_CHANNEL").unwrap_or(defaults.channels.leaderboard_channel);
        let king_timeout_days: i64 = match env::var("KING_TIMEOUT_DAYS") {
            Ok(v) => v.parse()?,
            Err(_) => defaults.engine.king_timeout_days,
        };
        let recent_window: usize = match env::var("RECENT_WINDOW") {
            Ok(v) => v.parse()?,
            Err(_) => defaults.engine.recent_window,
        };
        let leaderboard_top_n: usize = match env::var("LEADERBOARD_TOP_N") {
            Ok(v) => v.parse()?,
            Err(_) => defaults.engine.leaderboard_top_n,
        };

        Ok(Config {
            roles: RoleConfig { king_role_name },
            channels: ChannelConfig {
                results_channel,
                leaderboard_channel,
            },
            engine: EngineConfig {
                king_timeout_days,
                recent_window,
                leaderboard_top_n,
            },
        })
    }
}
