//! Service registry
//! This module normalizes and validates the user supplied service/characteristic
//! sets, converts between the sequence and map forms used at the boundary, and
//! merges them with the built-in default table.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::constants::{
    BLUETOOTH_BASE_UUID, UUID_HM10_DATA_CHAR, UUID_HM10_SERVICE, UUID_NORDIC_UART_RX_CHAR,
    UUID_NORDIC_UART_SERVICE, UUID_NORDIC_UART_TX_CHAR, UUID_REDBEAR_RX_CHAR,
    UUID_REDBEAR_SERVICE, UUID_REDBEAR_TX_CHAR,
};
use crate::core::bluetooth::error::{CentralError, Result};

static SHORT_UUID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:0[xX])?([0-9A-Fa-f]{4}|[0-9A-Fa-f]{8})$").unwrap());

/// One element of the boundary service format.
///
/// All values are UUID strings; `read`, `write` and `notify` are optional but at
/// least one of them must be present and non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify: Option<String>,
}

/// Value side of the map form: the characteristics of one service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify: Option<String>,
}

/// Map form of the boundary format, keyed by service UUID string.
pub type ServiceMap = BTreeMap<String, CharacteristicSet>;

/// Parses a 16-, 32- or 128-bit Bluetooth UUID string.
///
/// Short forms expand into the Bluetooth base UUID.
pub fn parse_uuid(value: &str) -> Result<Uuid> {
    let value = value.trim();
    if let Some(caps) = SHORT_UUID.captures(value) {
        let short = u32::from_str_radix(&caps[1], 16)
            .map_err(|_| CentralError::MalformedUuid(value.to_string()))?;
        return Ok(Uuid::from_u128(
            BLUETOOTH_BASE_UUID.as_u128() | (u128::from(short) << 96),
        ));
    }
    Uuid::from_str(value).map_err(|_| CentralError::MalformedUuid(value.to_string()))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_optional(value: &Option<String>) -> Result<Option<Uuid>> {
    non_empty(value).map(parse_uuid).transpose()
}

/// A normalized, validated service entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceDescriptor {
    pub service: Uuid,
    pub read: Option<Uuid>,
    pub write: Option<Uuid>,
    pub notify: Option<Uuid>,
}

impl ServiceDescriptor {
    /// The distinct characteristic UUIDs this service declares, in read/write/notify order.
    pub fn characteristics(&self) -> Vec<Uuid> {
        let mut uuids = Vec::with_capacity(3);
        for uuid in [self.read, self.write, self.notify].into_iter().flatten() {
            if !uuids.contains(&uuid) {
                uuids.push(uuid);
            }
        }
        uuids
    }

    pub fn to_config(&self) -> ServiceConfig {
        ServiceConfig {
            service: self.service.to_string(),
            read: self.read.map(|u| u.to_string()),
            write: self.write.map(|u| u.to_string()),
            notify: self.notify.map(|u| u.to_string()),
        }
    }
}

impl TryFrom<&ServiceConfig> for ServiceDescriptor {
    type Error = CentralError;

    fn try_from(config: &ServiceConfig) -> Result<Self> {
        let service = config.service.trim();
        if service.is_empty() {
            return Err(CentralError::InvalidService("missing service UUID".to_string()));
        }
        if non_empty(&config.read).is_none()
            && non_empty(&config.write).is_none()
            && non_empty(&config.notify).is_none()
        {
            return Err(CentralError::InvalidService(format!(
                "service {} declares no characteristic",
                service
            )));
        }
        Ok(Self {
            service: parse_uuid(service)?,
            read: parse_optional(&config.read)?,
            write: parse_optional(&config.write)?,
            notify: parse_optional(&config.notify)?,
        })
    }
}

impl fmt::Display for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.service)
    }
}

/// Returns true iff every element carries a service UUID and at least one
/// characteristic UUID, and all of them are well-formed.
pub fn validate(services: &[ServiceConfig]) -> bool {
    services.iter().all(|s| ServiceDescriptor::try_from(s).is_ok())
}

/// Sequence form to map form, keyed by service UUID.
pub fn to_map(services: &[ServiceConfig]) -> ServiceMap {
    services
        .iter()
        .map(|s| {
            (
                s.service.clone(),
                CharacteristicSet {
                    read: s.read.clone(),
                    write: s.write.clone(),
                    notify: s.notify.clone(),
                },
            )
        })
        .collect()
}

/// Map form to sequence form, ordered by service UUID.
pub fn to_seq(services: &ServiceMap) -> Vec<ServiceConfig> {
    services
        .iter()
        .map(|(service, chars)| ServiceConfig {
            service: service.clone(),
            read: chars.read.clone(),
            write: chars.write.clone(),
            notify: chars.notify.clone(),
        })
        .collect()
}

/// The built-in service table.
pub fn default_set() -> Vec<ServiceDescriptor> {
    vec![
        ServiceDescriptor {
            service: UUID_REDBEAR_SERVICE,
            read: Some(UUID_REDBEAR_TX_CHAR),
            write: Some(UUID_REDBEAR_RX_CHAR),
            notify: Some(UUID_REDBEAR_TX_CHAR),
        },
        ServiceDescriptor {
            service: UUID_NORDIC_UART_SERVICE,
            read: None,
            write: Some(UUID_NORDIC_UART_RX_CHAR),
            notify: Some(UUID_NORDIC_UART_TX_CHAR),
        },
        ServiceDescriptor {
            service: UUID_HM10_SERVICE,
            read: Some(UUID_HM10_DATA_CHAR),
            write: Some(UUID_HM10_DATA_CHAR),
            notify: Some(UUID_HM10_DATA_CHAR),
        },
    ]
}

/// Union by service UUID; user entries win and come first in input order,
/// followed by the defaults they do not supersede.
pub fn merge_with_defaults(user: &[ServiceDescriptor]) -> Vec<ServiceDescriptor> {
    let mut merged = user.to_vec();
    for default in default_set() {
        if !merged.iter().any(|s| s.service == default.service) {
            merged.push(default);
        }
    }
    merged
}

/// Boundary-format counterpart of [`merge_with_defaults`].
pub fn include_defaults(services: &[ServiceConfig]) -> Result<Vec<ServiceConfig>> {
    let registry = ServiceRegistry::from_configs(services)?;
    Ok(merge_with_defaults(registry.services())
        .iter()
        .map(ServiceDescriptor::to_config)
        .collect())
}

/// Ordered set of service descriptors with unique service UUIDs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceRegistry {
    services: Vec<ServiceDescriptor>,
}

impl ServiceRegistry {
    pub fn new(services: Vec<ServiceDescriptor>) -> Result<Self> {
        let mut seen = HashSet::new();
        for s in &services {
            if !seen.insert(s.service) {
                return Err(CentralError::InvalidService(format!(
                    "duplicate service {}",
                    s.service
                )));
            }
        }
        Ok(Self { services })
    }

    pub fn from_configs(services: &[ServiceConfig]) -> Result<Self> {
        let descriptors = services
            .iter()
            .map(ServiceDescriptor::try_from)
            .collect::<Result<Vec<_>>>()?;
        Self::new(descriptors)
    }

    pub fn with_defaults(self) -> Self {
        Self {
            services: merge_with_defaults(&self.services),
        }
    }

    pub fn services(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    pub fn service_uuids(&self) -> Vec<Uuid> {
        self.services.iter().map(|s| s.service).collect()
    }

    pub fn get(&self, service: &Uuid) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| &s.service == service)
    }

    pub fn to_configs(&self) -> Vec<ServiceConfig> {
        self.services.iter().map(ServiceDescriptor::to_config).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
