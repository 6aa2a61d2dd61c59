use std::path::Path;

use figment::{
    providers::{Format, Json, Yaml},
    value::{Dict, Map},
    Error, Metadata, Profile, Provider,
};

/// A provider whose data is read once, up front.
///
/// Reading eagerly means a missing or malformed file surfaces when it's added to the loader, rather than at the first
/// lookup.
pub struct ResolvedProvider {
    data: Map<Profile, Dict>,
    metadata: Metadata,
}

impl ResolvedProvider {
    pub fn from_yaml<P>(path: P) -> Result<Self, Error>
    where
        P: AsRef<Path>,
    {
        let file_data = std::fs::read_to_string(path.as_ref()).map_err(|e| e.to_string())?;
        Self::from_data::<Yaml>(&file_data, Metadata::from("YAML file", path.as_ref()))
    }

    pub fn from_json<P>(path: P) -> Result<Self, Error>
    where
        P: AsRef<Path>,
    {
        let file_data = std::fs::read_to_string(path.as_ref()).map_err(|e| e.to_string())?;
        Self::from_data::<Json>(&file_data, Metadata::from("JSON file", path.as_ref()))
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, Error> {
        Self::from_data::<Yaml>(raw, Metadata::named("inline YAML"))
    }

    fn from_data<F: Format>(raw: &str, metadata: Metadata) -> Result<Self, Error> {
        let data = F::string(raw).data()?;
        Ok(Self { data, metadata })
    }
}

impl Provider for ResolvedProvider {
    fn metadata(&self) -> Metadata {
        self.metadata.clone()
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        Ok(self.data.clone())
    }
}
