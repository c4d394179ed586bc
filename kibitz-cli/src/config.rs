use std::collections::HashMap;

use kibitz::EngineConfig;
use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    pub engine: Option<Engine>,
}

/// Wire dialect the engine speaks
#[derive(Debug, Deserialize, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Uci,
    Xboard,
}

#[derive(Debug, Deserialize)]
pub struct Engine {
    #[serde(flatten)]
    pub spawn: EngineConfig,
    #[serde(default)]
    pub protocol: Protocol,
    /// Options applied right after initialization
    #[serde(default)]
    pub options: HashMap<String, String>,
}
