use derive_more::{AsRef, Debug, Display, From, FromStr};
use serde::{Deserialize, Serialize};

/// The name of a configured module instance, i.e. `"weather"` or a user-chosen name like `"cpu-left"`.
#[derive(Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, AsRef, From, FromStr, Display, Debug)]
#[debug("ModuleKey({})", _0)]
pub struct ModuleKey(pub String);

impl ModuleKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for ModuleKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ModuleKey {
    fn from(s: &str) -> Self {
        ModuleKey(s.to_owned())
    }
}

/// The name of a module implementation in the registry, i.e. `"command"` or `"clock"`.
#[derive(Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, AsRef, From, FromStr, Display, Debug)]
#[debug("ModuleType({})", _0)]
pub struct ModuleType(pub String);

impl ModuleType {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for ModuleType {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ModuleType {
    fn from(s: &str) -> Self {
        ModuleType(s.to_owned())
    }
}
