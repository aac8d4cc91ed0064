//! Fetching collections from the remote service into the cache.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::models::Collection;
use crate::remote::{endpoints, ApiRequest, RemoteService};
use crate::store::CacheStore;

/// Remote resource backing a cached collection
pub const fn endpoint_for(collection: Collection) -> &'static str {
    match collection {
        Collection::User => endpoints::PROFILE,
        Collection::Appointments => endpoints::APPOINTMENTS,
        Collection::Notifications => endpoints::NOTIFICATIONS,
        Collection::HealthCenters => endpoints::HEALTH_CENTERS,
        Collection::Services => endpoints::SERVICES,
    }
}

/// Fetch a collection and overwrite its cache entry.
///
/// Returns the fresh data, or the reason it could not be obtained. A failed
/// cache write is logged but does not discard data the server returned.
pub async fn fetch_and_cache<R, T>(
    remote: &R,
    store: &CacheStore,
    collection: Collection,
) -> Result<T, String>
where
    R: RemoteService,
    T: DeserializeOwned + Serialize,
{
    let response = remote
        .request(ApiRequest::get(endpoint_for(collection)))
        .await
        .map_err(|error| error.to_string())?;
    if !response.success {
        return Err(response.failure_message());
    }

    let data: T = response.decode().map_err(|error| error.to_string())?;
    if let Err(error) = store.put_collection(collection, &data).await {
        tracing::warn!("Failed to cache {}: {}", collection, error);
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HealthCenter;
    use crate::remote::Method;
    use crate::testing::{FakeRemote, Reply};

    #[tokio::test(flavor = "multi_thread")]
    async fn successful_fetch_overwrites_cache() {
        let store = CacheStore::open_in_memory().await.unwrap();
        let remote = FakeRemote::new();
        remote.respond(
            Method::Get,
            endpoints::HEALTH_CENTERS,
            Reply::Ok(serde_json::json!([{ "id": "h-1", "name": "North Clinic" }])),
        );

        let centers: Vec<HealthCenter> =
            fetch_and_cache(&remote, &store, Collection::HealthCenters)
                .await
                .unwrap();
        assert_eq!(centers.len(), 1);

        let cached = store
            .get_collection::<Vec<HealthCenter>>(Collection::HealthCenters)
            .await
            .unwrap();
        assert_eq!(cached.data, centers);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_fetch_leaves_cache_untouched() {
        let store = CacheStore::open_in_memory().await.unwrap();
        store
            .put_collection(Collection::Services, &serde_json::json!([{ "id": "s-1" }]))
            .await
            .unwrap();
        let remote = FakeRemote::new();
        remote.respond(
            Method::Get,
            endpoints::SERVICES,
            Reply::Reject("maintenance".to_string()),
        );

        let result: Result<serde_json::Value, _> =
            fetch_and_cache(&remote, &store, Collection::Services).await;
        assert_eq!(result.unwrap_err(), "maintenance");

        let cached: serde_json::Value = store.get(Collection::Services.key()).await.unwrap();
        assert_eq!(cached, serde_json::json!([{ "id": "s-1" }]));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_payload_is_not_cached() {
        let store = CacheStore::open_in_memory().await.unwrap();
        let remote = FakeRemote::new();
        remote.respond(
            Method::Get,
            endpoints::HEALTH_CENTERS,
            Reply::Ok(serde_json::json!({ "unexpected": true })),
        );

        let result: Result<Vec<HealthCenter>, _> =
            fetch_and_cache(&remote, &store, Collection::HealthCenters).await;
        assert!(result.is_err());
        assert_eq!(store.get_raw(Collection::HealthCenters.key()).await, None);
    }
}
