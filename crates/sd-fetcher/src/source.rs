//! The boundary between the scheduler and the backend.

use std::future::Future;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use sd_core::{FetchResult, ItemId, ItemMetadata, Timestep};

/// Backend operations a plot fetcher needs for one kind of item.
///
/// `Raw` is what the network returns for one step; `Payload` is what
/// `resolve_timestep` turns it into and what step futures settle with.
pub trait PlotSource: Send + Sync + 'static {
    type Raw: Send + 'static;
    type Payload: Clone + Send + Sync + 'static;

    /// Item metadata, at minimum the available steps in any order.
    fn metadata(&self, item_id: &ItemId) -> BoxFuture<'static, FetchResult<ItemMetadata>>;

    /// Retrieve one step's raw payload.
    fn fetch_timestep(
        &self,
        item_id: &ItemId,
        timestep: Timestep,
    ) -> BoxFuture<'static, FetchResult<Self::Raw>>;

    /// Decode a raw response (and update any rendering state).
    fn resolve_timestep(
        &self,
        raw: Self::Raw,
        timestep: Timestep,
    ) -> BoxFuture<'static, FetchResult<Self::Payload>>;
}

/// [`PlotSource`] built from three closures.
pub struct FnSource<M, F, R> {
    metadata_fn: M,
    fetch_fn: F,
    resolve_fn: R,
}

impl<M, F, R> FnSource<M, F, R> {
    pub fn new(metadata_fn: M, fetch_fn: F, resolve_fn: R) -> Self {
        Self {
            metadata_fn,
            fetch_fn,
            resolve_fn,
        }
    }
}

impl<M, MFut, F, FFut, Raw, R, RFut, Payload> PlotSource for FnSource<M, F, R>
where
    M: Fn(ItemId) -> MFut + Send + Sync + 'static,
    MFut: Future<Output = FetchResult<ItemMetadata>> + Send + 'static,
    F: Fn(ItemId, Timestep) -> FFut + Send + Sync + 'static,
    FFut: Future<Output = FetchResult<Raw>> + Send + 'static,
    R: Fn(Raw, Timestep) -> RFut + Send + Sync + 'static,
    RFut: Future<Output = FetchResult<Payload>> + Send + 'static,
    Raw: Send + 'static,
    Payload: Clone + Send + Sync + 'static,
{
    type Raw = Raw;
    type Payload = Payload;

    fn metadata(&self, item_id: &ItemId) -> BoxFuture<'static, FetchResult<ItemMetadata>> {
        (self.metadata_fn)(item_id.clone()).boxed()
    }

    fn fetch_timestep(&self, item_id: &ItemId, timestep: Timestep) -> BoxFuture<'static, FetchResult<Raw>> {
        (self.fetch_fn)(item_id.clone(), timestep).boxed()
    }

    fn resolve_timestep(&self, raw: Raw, timestep: Timestep) -> BoxFuture<'static, FetchResult<Payload>> {
        (self.resolve_fn)(raw, timestep).boxed()
    }
}
