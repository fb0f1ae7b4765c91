//! District directory: canonical district names mapped to portal codes.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Built-in units of the Maharashtra citizen portal. Codes other than the ones
/// exercised in tests may drift upstream; deployments can replace the whole
/// table through `portal.district_file`.
const BUILTIN_DISTRICTS: &[(&str, &str)] = &[
    ("AHMEDNAGAR", "19372"),
    ("AKOLA", "19373"),
    ("AMRAVATI CITY", "19842"),
    ("AMRAVATI RURAL", "19374"),
    ("AURANGABAD CITY", "19409"),
    ("AURANGABAD RURAL", "19375"),
    ("BEED", "19377"),
    ("BHANDARA", "19378"),
    ("BRIHAN MUMBAI CITY", "19408"),
    ("BULDHANA", "19379"),
    ("CHANDRAPUR", "19380"),
    ("DHULE", "19381"),
    ("GADCHIROLI", "19382"),
    ("GONDIYA", "19383"),
    ("HINGOLI", "19384"),
    ("JALGAON", "19385"),
    ("JALNA", "19386"),
    ("KOLHAPUR", "19387"),
    ("LATUR", "19388"),
    ("NAGPUR CITY", "19389"),
    ("NAGPUR RURAL", "19390"),
    ("NANDED", "19391"),
    ("NANDURBAR", "19392"),
    ("NASHIK CITY", "19410"),
    ("NASHIK RURAL", "19394"),
    ("NAVI MUMBAI", "19411"),
    ("OSMANABAD", "19395"),
    ("PALGHAR", "19845"),
    ("PARBHANI", "19396"),
    ("PIMPRI-CHINCHWAD", "19846"),
    ("PUNE CITY", "19393"),
    ("PUNE RURAL", "19397"),
    ("RAIGAD", "19398"),
    ("RATNAGIRI", "19399"),
    ("SANGLI", "19400"),
    ("SATARA", "19401"),
    ("SINDHUDURG", "19402"),
    ("SOLAPUR CITY", "19412"),
    ("SOLAPUR RURAL", "19403"),
    ("THANE CITY", "19413"),
    ("THANE RURAL", "19404"),
    ("WARDHA", "19405"),
    ("WASHIM", "19406"),
    ("YAVATMAL", "19407"),
];

#[derive(Debug, Error)]
pub enum DistrictError {
    #[error("failed to read district file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("district file {path} is not a JSON object of name -> code: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("district file {path} defines no districts")]
    Empty { path: PathBuf },
    #[error("district `{name}` has an empty code in {path}")]
    EmptyCode { path: PathBuf, name: String },
}

/// A validated district selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct District {
    pub name: String,
    pub code: String,
}

/// Immutable name -> code table, keyed by canonical upper-case name.
#[derive(Debug, Clone)]
pub struct DistrictDirectory {
    entries: BTreeMap<String, String>,
}

impl DistrictDirectory {
    pub fn builtin() -> Self {
        let entries = BUILTIN_DISTRICTS
            .iter()
            .map(|(name, code)| (canonical_name(name), (*code).to_string()))
            .collect();
        Self { entries }
    }

    /// Load the table from `path` when configured, otherwise use the built-in one.
    pub fn load(path: Option<&Path>) -> Result<Self, DistrictError> {
        match path {
            Some(path) => Self::from_json_file(path),
            None => Ok(Self::builtin()),
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, DistrictError> {
        let raw = fs::read_to_string(path).map_err(|source| DistrictError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed: BTreeMap<String, String> =
            serde_json::from_str(&raw).map_err(|source| DistrictError::Json {
                path: path.to_path_buf(),
                source,
            })?;

        let mut entries = BTreeMap::new();
        for (name, code) in parsed {
            let code = code.trim().to_string();
            if code.is_empty() {
                return Err(DistrictError::EmptyCode {
                    path: path.to_path_buf(),
                    name,
                });
            }
            entries.insert(canonical_name(&name), code);
        }
        if entries.is_empty() {
            return Err(DistrictError::Empty {
                path: path.to_path_buf(),
            });
        }
        tracing::info!(path = %path.display(), districts = entries.len(), "loaded district table");
        Ok(Self { entries })
    }

    /// Case-insensitive lookup; surrounding and repeated whitespace is ignored.
    pub fn lookup(&self, name: &str) -> Option<District> {
        let key = canonical_name(name);
        self.entries.get(&key).map(|code| District {
            name: key.clone(),
            code: code.clone(),
        })
    }

    /// Canonical names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = District> + '_ {
        self.entries.iter().map(|(name, code)| District {
            name: name.clone(),
            code: code.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DistrictDirectory {
    fn default() -> Self {
        Self::builtin()
    }
}

fn canonical_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}
