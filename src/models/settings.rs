use serde::{Deserialize, Serialize};

pub const DEFAULT_THRESHOLD: f64 = 0.90;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FolderStrategy {
    #[default]
    Simple,
    Detailed,
    Domain,
    Flat,
}

impl std::str::FromStr for FolderStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple" => Ok(Self::Simple),
            "detailed" => Ok(Self::Detailed),
            "domain" => Ok(Self::Domain),
            "flat" => Ok(Self::Flat),
            _ => Err(format!("unknown folder strategy: {s}")),
        }
    }
}

/// Which part of the tree a run operates over.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    All,
    Bar,
    Other,
    Current,
}

impl std::str::FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "bar" => Ok(Self::Bar),
            "other" => Ok(Self::Other),
            "current" => Ok(Self::Current),
            _ => Err(format!("unknown scope: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub threshold: f64,
    pub dry_run: bool,
    pub auto_rename: bool,
    pub folder_strategy: FolderStrategy,
    pub auto_new: bool,
    pub scope: Scope,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            dry_run: false,
            auto_rename: true,
            folder_strategy: FolderStrategy::Simple,
            auto_new: false,
            scope: Scope::All,
        }
    }
}

impl Settings {
    /// Clamps the threshold into [0, 1]; NaN falls back to the default.
    pub fn normalized(mut self) -> Self {
        self.threshold = if self.threshold.is_nan() {
            DEFAULT_THRESHOLD
        } else {
            self.threshold.clamp(0.0, 1.0)
        };
        self
    }
}
