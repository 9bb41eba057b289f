use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Steam app id of WorldBox.
pub const APP_ID: &str = "1206560";

/// One of the depots WorldBox ships. Each platform owns exactly one depot id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Platform {
    Windows,
    Linux,
    Mac,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Windows, Platform::Linux, Platform::Mac];

    pub fn depot_id(self) -> &'static str {
        match self {
            Platform::Windows => "1206561",
            Platform::Linux => "1206562",
            Platform::Mac => "1206563",
        }
    }

    pub fn from_depot_id(depot_id: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.depot_id() == depot_id.trim())
    }

    /// Folder name under `versions/`.
    pub fn folder_name(self) -> &'static str {
        match self {
            Platform::Windows => "Windows",
            Platform::Linux => "Linux",
            Platform::Mac => "Mac",
        }
    }

    /// SteamDB page listing every manifest id published for this depot.
    pub fn manifests_url(self) -> String {
        format!("https://steamdb.info/depot/{}/manifests/", self.depot_id())
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.folder_name())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(p) = Self::from_depot_id(s) {
            return Ok(p);
        }
        match s.to_lowercase().as_str() {
            "windows" | "win" => Ok(Platform::Windows),
            "linux" => Ok(Platform::Linux),
            "mac" | "macos" | "osx" => Ok(Platform::Mac),
            _ => Err(format!(
                "unknown platform '{s}' (expected windows, linux, mac or a depot id)"
            )),
        }
    }
}
