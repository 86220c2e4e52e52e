use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use shmparcel_frame::{decode_frame, encode_frame, Encoded, Parcel, ParcelReader, Payload};
use shmparcel_transport::{RegionId, SharedRegion};
use tracing::debug;

use crate::error::Result;

/// How one [`LargeContainer::send`] carried its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// The payload was written inline.
    Inline,
    /// A new region was created for this send.
    Created(RegionId),
    /// The cached region was referenced again; nothing was serialized.
    Cached(RegionId),
}

impl Route {
    /// Region referenced by the frame, if any.
    pub fn region(&self) -> Option<RegionId> {
        match self {
            Self::Inline => None,
            Self::Created(id) | Self::Cached(id) => Some(*id),
        }
    }
}

/// One payload plus the sealed region its last large send produced.
///
/// The cache is keyed on nothing: mutating the payload behind the
/// container's back (through interior mutability) leaves the old bytes in
/// the region. Call [`close`](Self::close) before resending such a payload.
/// [`payload_mut`](Self::payload_mut) drops the cache on its own.
#[derive(Debug)]
pub struct LargeContainer<P> {
    payload: P,
    cache: Mutex<Option<Arc<SharedRegion>>>,
}

impl<P: Payload> LargeContainer<P> {
    /// Wrap a payload with an empty cache.
    pub fn new(payload: P) -> Self {
        Self {
            payload,
            cache: Mutex::new(None),
        }
    }

    /// Decode a container from the frame at the reader's position.
    pub fn from_frame(src: &mut ParcelReader<'_>) -> Result<Self> {
        Ok(Self::new(decode_frame(src)?))
    }

    /// Replace the payload with the one decoded from `src`.
    ///
    /// Any cached region is released; received payloads are never cached.
    pub fn receive(&mut self, src: &mut ParcelReader<'_>) -> Result<()> {
        self.payload = decode_frame(src)?;
        self.clear_cache();
        Ok(())
    }

    /// Append the payload to `dest` as one frame.
    ///
    /// The cache lock is held only while the cached region is cloned out or
    /// a new one is stored. When two sends race to create a region, the first
    /// to store wins and the other region is closed once its frame is
    /// written.
    pub fn send(&self, dest: &mut Parcel) -> Result<Route> {
        let cached = self.lock().clone();

        match encode_frame(&self.payload, cached.as_deref(), dest)? {
            Encoded::Inline => Ok(Route::Inline),
            Encoded::Cached(id) => Ok(Route::Cached(id)),
            Encoded::Created(region) => {
                let id = region.id();
                let mut slot = self.lock();
                if slot.is_none() {
                    debug!(%id, len = region.len(), "caching shared region");
                    *slot = Some(Arc::new(region));
                } else {
                    debug!(%id, "region cached concurrently; releasing this one");
                }
                Ok(Route::Created(id))
            }
        }
    }

    /// Encode the payload into a fresh parcel.
    pub fn to_parcel(&self) -> Result<Parcel> {
        let mut parcel = Parcel::new();
        self.send(&mut parcel)?;
        Ok(parcel)
    }

    /// Release the cached region. Safe to call repeatedly.
    ///
    /// Frames already written keep their own handle and stay readable.
    pub fn close(&self) {
        if let Some(region) = self.lock().take() {
            debug!(id = %region.id(), "released cached region");
        }
    }

    pub fn has_cached_region(&self) -> bool {
        self.lock().is_some()
    }

    pub fn cached_region_id(&self) -> Option<RegionId> {
        self.lock().as_ref().map(|region| region.id())
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Mutable access to the payload. Drops the cache.
    pub fn payload_mut(&mut self) -> &mut P {
        self.clear_cache();
        &mut self.payload
    }

    pub fn into_payload(self) -> P {
        self.payload
    }

    fn clear_cache(&mut self) {
        self.cache
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<SharedRegion>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::MetadataExt;
    use std::sync::Barrier;
    use std::thread;

    use bytes::Bytes;
    use shmparcel_frame::{decode_frame_detailed, MAX_DIRECT_PAYLOAD_SIZE};

    use super::*;

    fn large_blob() -> Bytes {
        Bytes::from((0..64 * 1024).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
    }

    /// Identities of every file this process holds open.
    fn open_region_ids() -> Vec<RegionId> {
        std::fs::read_dir("/proc/self/fd")
            .unwrap()
            .filter_map(|entry| std::fs::metadata(entry.ok()?.path()).ok())
            .map(|meta| RegionId {
                dev: meta.dev(),
                ino: meta.ino(),
            })
            .collect()
    }

    fn frame_region(parcel: &Parcel) -> Option<RegionId> {
        decode_frame_detailed::<Bytes>(&mut parcel.reader())
            .unwrap()
            .region
    }

    #[test]
    fn small_payload_goes_inline() {
        let container = LargeContainer::new(String::from("hello"));
        let parcel = container.to_parcel().unwrap();

        assert_eq!(parcel.handle_count(), 0);
        assert!(!container.has_cached_region());

        let decoded = LargeContainer::<String>::from_frame(&mut parcel.reader()).unwrap();
        assert_eq!(decoded.payload(), "hello");
    }

    #[test]
    fn large_payload_creates_one_region() {
        let blob = large_blob();
        let container = LargeContainer::new(blob.clone());
        let mut parcel = Parcel::new();

        let route = container.send(&mut parcel).unwrap();
        assert!(matches!(route, Route::Created(_)));
        assert_eq!(container.cached_region_id(), route.region());
        assert_eq!(parcel.handle_count(), 1);

        let decoded = LargeContainer::<Bytes>::from_frame(&mut parcel.reader()).unwrap();
        assert_eq!(decoded.into_payload(), blob);
    }

    #[test]
    fn boundary_is_inclusive() {
        // byte arrays carry a 4-byte length prefix
        let fits = LargeContainer::new(vec![1u8; MAX_DIRECT_PAYLOAD_SIZE - 4]);
        assert_eq!(fits.send(&mut Parcel::new()).unwrap(), Route::Inline);

        let spills = LargeContainer::new(vec![1u8; MAX_DIRECT_PAYLOAD_SIZE - 3]);
        assert!(matches!(
            spills.send(&mut Parcel::new()).unwrap(),
            Route::Created(_)
        ));
    }

    #[test]
    fn resend_reuses_cached_region() {
        let container = LargeContainer::new(large_blob());
        let mut first = Parcel::new();
        let mut second = Parcel::new();

        let created = container.send(&mut first).unwrap();
        let reused = container.send(&mut second).unwrap();

        let Route::Created(id) = created else {
            panic!("expected a new region, got {created:?}");
        };
        assert_eq!(reused, Route::Cached(id));
        assert_eq!(frame_region(&first), Some(id));
        assert_eq!(frame_region(&second), Some(id));
    }

    #[test]
    fn close_forces_a_new_region() {
        let container = LargeContainer::new(large_blob());
        let mut first = Parcel::new();
        let mut second = Parcel::new();

        let a = container.send(&mut first).unwrap();
        container.close();
        assert!(!container.has_cached_region());
        let b = container.send(&mut second).unwrap();

        assert!(matches!(b, Route::Created(_)));
        assert_ne!(a.region(), b.region());
        assert_ne!(frame_region(&first), frame_region(&second));
    }

    #[test]
    fn frames_outlive_close() {
        let blob = large_blob();
        let container = LargeContainer::new(blob.clone());
        let parcel = container.to_parcel().unwrap();
        container.close();
        drop(container);

        let decoded: Bytes = decode_frame(&mut parcel.reader()).unwrap();
        assert_eq!(decoded, blob);
    }

    #[test]
    fn close_is_idempotent() {
        let container = LargeContainer::new(large_blob());
        container.to_parcel().unwrap();
        container.close();
        container.close();
        assert!(container.cached_region_id().is_none());
    }

    #[test]
    fn payload_mut_invalidates_cache() {
        let mut container = LargeContainer::new(vec![7u8; 10_000]);
        let first = container.send(&mut Parcel::new()).unwrap();

        container.payload_mut()[0] = 8;
        assert!(!container.has_cached_region());

        let parcel = container.to_parcel().unwrap();
        let decoded: Vec<u8> = decode_frame(&mut parcel.reader()).unwrap();
        assert_eq!(decoded[0], 8);
        assert_ne!(frame_region(&parcel), first.region());
    }

    #[test]
    fn receive_replaces_payload_and_drops_cache() {
        let mut container = LargeContainer::new(large_blob());
        container.to_parcel().unwrap();
        assert!(container.has_cached_region());

        let incoming = LargeContainer::new(Bytes::from_static(b"short")).to_parcel().unwrap();
        container.receive(&mut incoming.reader()).unwrap();

        assert_eq!(container.payload().as_ref(), b"short");
        assert!(!container.has_cached_region());
    }

    #[test]
    fn receive_failure_keeps_payload() {
        let mut container = LargeContainer::new(String::from("kept"));
        let garbage = Parcel::from_bytes(&[1, 0, 0, 0]);
        let err = container.receive(&mut garbage.reader()).unwrap_err();
        assert!(err.is_decode_error());
        assert_eq!(container.payload(), "kept");
    }

    #[test]
    fn concurrent_sends_store_exactly_one_region() {
        const THREADS: usize = 8;
        let container = Arc::new(LargeContainer::new(large_blob()));
        let barrier = Arc::new(Barrier::new(THREADS));

        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let container = Arc::clone(&container);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let mut parcel = Parcel::new();
                    barrier.wait();
                    let route = container.send(&mut parcel).unwrap();
                    (route, parcel)
                })
            })
            .collect();

        let mut results: Vec<(Route, Parcel)> =
            workers.into_iter().map(|w| w.join().unwrap()).collect();

        let stored = container.cached_region_id().unwrap();
        assert!(results
            .iter()
            .any(|(route, _)| *route == Route::Created(stored)));
        for (route, parcel) in &results {
            match route {
                Route::Cached(id) => assert_eq!(*id, stored),
                Route::Created(id) if *id != stored => {
                    assert_eq!(frame_region(parcel), Some(*id));
                }
                _ => {}
            }
            let decoded: Bytes = decode_frame(&mut parcel.reader()).unwrap();
            assert_eq!(decoded, *container.payload());
        }

        let losers: Vec<RegionId> = results
            .iter()
            .filter_map(|(route, _)| match route {
                Route::Created(id) if *id != stored => Some(*id),
                _ => None,
            })
            .collect();
        assert!(losers.iter().all(|id| *id != stored));

        // Losing regions live on only through the handles in their frames.
        let kept = losers.first().copied();
        let kept_parcel = kept.and_then(|id| {
            let at = results
                .iter()
                .position(|(route, _)| *route == Route::Created(id))?;
            Some(results.swap_remove(at).1)
        });
        drop(results);

        let open = open_region_ids();
        assert!(open.contains(&stored));
        for id in &losers {
            assert_eq!(open.contains(id), Some(*id) == kept, "region {id}");
        }

        if let (Some(id), Some(parcel)) = (kept, kept_parcel) {
            let decoded: Bytes = decode_frame(&mut parcel.reader()).unwrap();
            assert_eq!(decoded, *container.payload());
            drop(parcel);
            assert!(!open_region_ids().contains(&id));
        }

        assert_eq!(
            container.send(&mut Parcel::new()).unwrap(),
            Route::Cached(stored)
        );
    }

    #[test]
    fn container_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LargeContainer<Bytes>>();
    }
}
