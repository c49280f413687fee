use crate::api::v1beta1::harbor::{ExternalRedisSpec, HarborDatabaseSpec, HarborStorageS3Spec};

pub const CACHE_PROPERTY: &str = "redisSpec";
pub const DATABASE_PROPERTY: &str = "databaseSpec";
pub const STORAGE_PROPERTY: &str = "storageSpec";

/// S3 coordinates of an in-cluster object store, plus whether clients must
/// be kept from following storage redirects.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StorageConnection {
    pub s3: HarborStorageS3Spec,
    pub disable_redirect: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    Redis(ExternalRedisSpec),
    Database(HarborDatabaseSpec),
    Storage(StorageConnection),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Property {
    pub name: String,
    pub value: PropertyValue,
}

/// Ordered, append-only name/value collection a dependency publishes for
/// the Harbor spec.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Properties(Vec<Property>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str, value: PropertyValue) {
        self.0.push(Property {
            name: name.to_string(),
            value,
        });
    }

    pub fn with(mut self, name: &str, value: PropertyValue) -> Self {
        self.add(name, value);
        self
    }

    /// First property registered under `name`.
    pub fn get(&self, name: &str) -> Option<&Property> {
        self.0.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn redis_spec(&self) -> Option<&ExternalRedisSpec> {
        match self.get(CACHE_PROPERTY).map(|p| &p.value) {
            Some(PropertyValue::Redis(spec)) => Some(spec),
            _ => None,
        }
    }

    pub fn database_spec(&self) -> Option<&HarborDatabaseSpec> {
        match self.get(DATABASE_PROPERTY).map(|p| &p.value) {
            Some(PropertyValue::Database(spec)) => Some(spec),
            _ => None,
        }
    }

    pub fn storage_spec(&self) -> Option<&StorageConnection> {
        match self.get(STORAGE_PROPERTY).map(|p| &p.value) {
            Some(PropertyValue::Storage(spec)) => Some(spec),
            _ => None,
        }
    }
}
