//! Delivery address lookup and zone validation.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use common::{AddressId, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::DomainError;

/// A user's delivery address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: AddressId,
    pub user_id: UserId,
    pub province: String,
    pub city: String,
    pub district: String,
    pub detail: String,
}

impl Address {
    /// Creates an address with a fresh ID.
    pub fn new(
        user_id: UserId,
        province: impl Into<String>,
        city: impl Into<String>,
        district: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            id: AddressId::new(),
            user_id,
            province: province.into(),
            city: city.into(),
            district: district.into(),
            detail: detail.into(),
        }
    }
}

/// Address service consulted when placing an order.
#[async_trait]
pub trait AddressValidator: Send + Sync {
    /// Looks up an address.
    async fn find_address(&self, address_id: AddressId) -> Result<Option<Address>, DomainError>;

    /// Returns true if the address is inside a delivery zone.
    async fn is_serviceable(&self, address: &Address) -> Result<bool, DomainError>;
}

#[async_trait]
impl<T: AddressValidator + ?Sized> AddressValidator for Arc<T> {
    async fn find_address(&self, address_id: AddressId) -> Result<Option<Address>, DomainError> {
        (**self).find_address(address_id).await
    }

    async fn is_serviceable(&self, address: &Address) -> Result<bool, DomainError> {
        (**self).is_serviceable(address).await
    }
}

/// In-memory address book with a city allow-list.
///
/// With no service area configured every address is serviceable.
#[derive(Clone, Default)]
pub struct InMemoryAddressValidator {
    addresses: Arc<RwLock<HashMap<AddressId, Address>>>,
    service_area: Arc<RwLock<HashSet<String>>>,
}

impl InMemoryAddressValidator {
    /// Creates an empty address book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an address.
    pub async fn add_address(&self, address: Address) {
        self.addresses.write().await.insert(address.id, address);
    }

    /// Restricts delivery to the given cities.
    pub async fn set_service_area<I, S>(&self, cities: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut area = self.service_area.write().await;
        area.clear();
        area.extend(cities.into_iter().map(Into::into));
    }
}

#[async_trait]
impl AddressValidator for InMemoryAddressValidator {
    async fn find_address(&self, address_id: AddressId) -> Result<Option<Address>, DomainError> {
        Ok(self.addresses.read().await.get(&address_id).cloned())
    }

    async fn is_serviceable(&self, address: &Address) -> Result<bool, DomainError> {
        let area = self.service_area.read().await;
        Ok(area.is_empty() || area.contains(&address.city))
    }
}
