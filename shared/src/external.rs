//! Device and hosting services the core calls out to. Shells implement
//! these traits; the core only composes them.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::geo::{Coordinate, CoordinateError};
use crate::model::{ImageRef, Location};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("location unavailable: {0}")]
    Unavailable(String),
    #[error("device reported an invalid position: {0}")]
    InvalidFix(#[from] CoordinateError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("image upload failed: {0}")]
pub struct ImageUploadError(pub String);

/// Reverse-geocoding result, as returned by the platform geocoder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Address {
    pub street_number: Option<String>,
    pub street: Option<String>,
    pub district: Option<String>,
    pub subregion: Option<String>,
    pub city: Option<String>,
    /// State or province.
    pub region: Option<String>,
    pub postal_code: Option<String>,
}

impl Address {
    /// Street-level parts joined with commas, or `None` if there are none.
    #[must_use]
    pub fn formatted(&self) -> Option<String> {
        let parts: Vec<&str> = [
            &self.street_number,
            &self.street,
            &self.district,
            &self.subregion,
        ]
        .into_iter()
        .filter_map(|p| p.as_deref())
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
        (!parts.is_empty()).then(|| parts.join(", "))
    }
}

#[async_trait]
pub trait GeolocationProvider: Send + Sync {
    /// Asks for foreground location access. `true` when granted.
    async fn request_permission(&self) -> bool;

    async fn current_coordinate(&self) -> Result<Coordinate, LocationError>;

    async fn reverse_geocode(&self, coordinate: Coordinate) -> Result<Address, LocationError>;
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Uploads a local image and returns its public URL.
    async fn upload(&self, local_uri: &str) -> Result<Url, ImageUploadError>;
}

/// Current device location, with a human-readable address when the
/// geocoder can supply one.
#[instrument(skip(provider))]
pub async fn locate<G>(provider: &G) -> Result<Location, LocationError>
where
    G: GeolocationProvider + ?Sized,
{
    if !provider.request_permission().await {
        return Err(LocationError::PermissionDenied);
    }

    let coordinate = provider.current_coordinate().await?;
    let mut location = Location::at(coordinate);

    match provider.reverse_geocode(coordinate).await {
        Ok(address) => {
            location.address = address.formatted();
            location.area = address.district.clone().or_else(|| address.subregion.clone());
            location.city = address.city;
            location.state = address.region;
            location.pincode = address.postal_code;
        }
        Err(e) => warn!("Reverse geocoding failed, using bare coordinate: {e}"),
    }

    Ok(location)
}

/// Uploads a local image if an [`ImageStore`] is available. Any failure
/// leaves the local reference in place so the report can still be filed.
#[instrument(skip(store, image), fields(remote = image.is_remote()))]
pub async fn resolve_image<I>(store: Option<&I>, image: ImageRef) -> ImageRef
where
    I: ImageStore + ?Sized,
{
    let Some(store) = store else {
        return image;
    };
    let ImageRef::Local(uri) = &image else {
        return image;
    };

    match store.upload(uri).await {
        Ok(url) => {
            debug!(%url, "Image uploaded");
            ImageRef::Remote(url)
        }
        Err(e) => {
            warn!("Keeping local image reference: {e}");
            image
        }
    }
}
