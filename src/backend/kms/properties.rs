//! Atomic property tables of the KMS objects the pipeline drives.

use smithay::reexports::drm::control::property;
use tracing::{trace, warn};

use super::devices::KmsDevice;
use super::error::{KmsError, KmsResult};
use super::types::{KmsObject, Topology};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyEntry {
    pub name: String,
    pub handle: property::Handle,
    pub value: property::RawValue,
}

/// Name-to-id table of one object's atomic properties, fetched once.
#[derive(Debug, Clone)]
pub struct PropertyTable {
    object: KmsObject,
    entries: Vec<PropertyEntry>,
}

impl PropertyTable {
    pub fn new(object: KmsObject, entries: Vec<PropertyEntry>) -> Self {
        Self { object, entries }
    }

    /// Fetches the properties of `object`.
    ///
    /// Properties whose metadata cannot be read are left out of the table.
    pub fn load<D: KmsDevice>(device: &D, object: KmsObject) -> KmsResult<Self> {
        let _span = tracy_client::span!("PropertyTable::load");

        let props = device
            .object_properties(object)
            .map_err(|source| KmsError::PropertyQueryFailed { object, source })?;

        let mut entries = Vec::with_capacity(props.len());
        for (handle, value) in props {
            match device.property_name(handle) {
                Ok(name) => entries.push(PropertyEntry {
                    name,
                    handle,
                    value,
                }),
                Err(err) => warn!("error getting property info on {object}: {err:?}"),
            }
        }

        trace!("{object}: {} properties", entries.len());
        Ok(Self { object, entries })
    }

    pub fn object(&self) -> KmsObject {
        self.object
    }

    pub fn entries(&self) -> &[PropertyEntry] {
        &self.entries
    }

    fn entry(&self, name: &str) -> Option<&PropertyEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// Id of the property called `name`, or `None` if the object has no such property.
    pub fn lookup(&self, name: &str) -> Option<property::Handle> {
        self.entry(name).map(|entry| entry.handle)
    }

    /// Value of `name` at the time the table was loaded.
    pub fn value(&self, name: &str) -> Option<property::RawValue> {
        self.entry(name).map(|entry| entry.value)
    }

    /// Like [`lookup`](Self::lookup), for properties the pipeline cannot work without.
    pub fn require(&self, name: &'static str) -> KmsResult<property::Handle> {
        self.lookup(name).ok_or(KmsError::MissingProperty {
            object: self.object,
            name,
        })
    }
}

/// Property tables of the chosen connector, CRTC and plane.
#[derive(Debug, Clone)]
pub struct PropertyCache {
    pub connector: PropertyTable,
    pub crtc: PropertyTable,
    pub plane: PropertyTable,
}

impl PropertyCache {
    pub fn load<D: KmsDevice>(device: &D, topology: &Topology) -> KmsResult<Self> {
        let _span = tracy_client::span!("PropertyCache::load");

        Ok(Self {
            connector: PropertyTable::load(device, KmsObject::Connector(topology.connector))?,
            crtc: PropertyTable::load(device, KmsObject::Crtc(topology.crtc))?,
            plane: PropertyTable::load(device, KmsObject::Plane(topology.plane))?,
        })
    }
}
