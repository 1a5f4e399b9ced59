//! Request/response capability used by bootstrap and the identity check.

use async_trait::async_trait;

use crate::error::Error;
use crate::models::{IdentityResponse, ListingResponse, User};

/// The RPC-style half of the remote data service.
#[async_trait]
pub trait DataService: Send + Sync {
    /// Resolve the user behind the current access token.
    async fn get_user(&self) -> Result<User, Error>;

    /// Bootstrap resource A: the primary domain listing.
    async fn fetch_listing(&self) -> Result<ListingResponse, Error>;

    /// Bootstrap resource B: the current identity/profile.
    async fn fetch_identity(&self) -> Result<IdentityResponse, Error>;
}
