use serde::{Deserialize, Serialize};

/// Wallet surfaces a pass can be issued to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Certificate-signed `.pkpass` archive
    Apple,
    /// JWT-asserted loyalty object
    Google,
    /// Browser-rendered fallback card
    Pwa,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Apple, Platform::Google, Platform::Pwa];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Apple => "apple",
            Platform::Google => "google",
            Platform::Pwa => "pwa",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
