//! Response body capture through a streaming intercept.
//!
//! Platforms that expose a per-request byte stream (a response filter) let the tap read the body as
//! it flows to the page. Where that capability is missing, [`BodyCapture::unavailable`] turns every
//! operation into a no-op and the tracker falls back to a side-channel re-fetch.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hintbridge_core_types::RequestId;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::decode::Utf8StreamDecoder;
use crate::TapError;

/// Byte stream handed out by the platform for one request.
///
/// `data` yields the body chunks; everything read must be written back to `passthrough` so the page
/// still receives it. The stream ends when `data` closes.
pub struct ResponseFilter {
    pub data: mpsc::Receiver<Vec<u8>>,
    pub passthrough: mpsc::Sender<Vec<u8>>,
}

/// Capability to intercept response bodies.
pub trait ResponseFilterProvider: Send + Sync {
    fn filter_response_data(&self, request: &RequestId) -> Result<ResponseFilter, TapError>;
}

/// Deferred body text for one request, resolved when its stream ends.
pub struct CapturedBody {
    request: RequestId,
    rx: oneshot::Receiver<String>,
}

impl CapturedBody {
    pub async fn text(self) -> Result<String, TapError> {
        let CapturedBody { request, rx } = self;
        rx.await.map_err(|_| TapError::CaptureDropped(request))
    }
}

pub struct BodyCapture {
    provider: Option<Arc<dyn ResponseFilterProvider>>,
    pending: DashMap<RequestId, oneshot::Receiver<String>>,
}

impl BodyCapture {
    pub fn new(provider: Arc<dyn ResponseFilterProvider>) -> Self {
        Self {
            provider: Some(provider),
            pending: DashMap::new(),
        }
    }

    /// Capture for a platform without a streaming intercept.
    pub fn unavailable() -> Self {
        Self {
            provider: None,
            pending: DashMap::new(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.provider.is_some()
    }

    /// Start capturing `request`. At most one capture per id is active at a time.
    pub fn begin(&self, request: &RequestId) {
        let Some(provider) = self.provider.as_ref() else {
            return;
        };
        let slot = match self.pending.entry(request.clone()) {
            Entry::Occupied(_) => {
                trace!(target: "network-tap", %request, "capture already active");
                return;
            }
            Entry::Vacant(slot) => slot,
        };
        let filter = match provider.filter_response_data(request) {
            Ok(filter) => filter,
            Err(err) => {
                warn!(target: "network-tap", %request, ?err, "response filter unavailable");
                return;
            }
        };
        let (tx, rx) = oneshot::channel();
        slot.insert(rx);
        tokio::spawn(pump(request.clone(), filter, tx));
    }

    /// Hand out the deferred body, removing it from the store.
    pub fn take(&self, request: &RequestId) -> Option<CapturedBody> {
        self.pending
            .remove(request)
            .map(|(request, rx)| CapturedBody { request, rx })
    }

    pub fn is_capturing(&self, request: &RequestId) -> bool {
        self.pending.contains_key(request)
    }

    pub fn active(&self) -> usize {
        self.pending.len()
    }

    /// Drop a capture nobody is going to take.
    pub(crate) fn evict(&self, request: &RequestId) -> bool {
        self.pending.remove(request).is_some()
    }
}

async fn pump(request: RequestId, mut filter: ResponseFilter, done: oneshot::Sender<String>) {
    let mut decoder = Utf8StreamDecoder::new();
    let mut text = String::new();
    let mut passthrough_open = true;

    while let Some(chunk) = filter.data.recv().await {
        decoder.decode(&chunk, &mut text);
        if passthrough_open && filter.passthrough.send(chunk).await.is_err() {
            debug!(target: "network-tap", %request, "passthrough closed; still capturing");
            passthrough_open = false;
        }
    }
    decoder.finish(&mut text);

    trace!(target: "network-tap", %request, bytes = text.len(), "capture complete");
    // Receiver gone means the record was evicted or suppressed.
    let _ = done.send(text);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    type OpenedFilter = (RequestId, mpsc::Sender<Vec<u8>>, mpsc::Receiver<Vec<u8>>);

    /// Hands the test the other ends of each filter it opens.
    #[derive(Default)]
    struct ChannelProvider {
        opened: Mutex<Vec<OpenedFilter>>,
    }

    impl ResponseFilterProvider for ChannelProvider {
        fn filter_response_data(&self, request: &RequestId) -> Result<ResponseFilter, TapError> {
            let (data_tx, data_rx) = mpsc::channel(16);
            let (pass_tx, pass_rx) = mpsc::channel(16);
            self.opened
                .lock()
                .unwrap()
                .push((request.clone(), data_tx, pass_rx));
            Ok(ResponseFilter {
                data: data_rx,
                passthrough: pass_tx,
            })
        }
    }

    #[tokio::test]
    async fn unavailable_capture_is_a_no_op() {
        let capture = BodyCapture::unavailable();
        let id = RequestId::new("r1");
        capture.begin(&id);
        assert!(!capture.is_available());
        assert!(capture.take(&id).is_none());
    }

    #[tokio::test]
    async fn chunks_are_decoded_and_passed_through() {
        let provider = Arc::new(ChannelProvider::default());
        let capture = BodyCapture::new(provider.clone());
        let id = RequestId::new("r1");
        capture.begin(&id);
        capture.begin(&id);
        assert_eq!(provider.opened.lock().unwrap().len(), 1);

        let (_, data_tx, mut pass_rx) = provider.opened.lock().unwrap().pop().unwrap();
        let bytes = "h\u{e9}llo".as_bytes().to_vec();
        data_tx.send(bytes[..2].to_vec()).await.unwrap();
        data_tx.send(bytes[2..].to_vec()).await.unwrap();
        drop(data_tx);

        let body = capture.take(&id).expect("capture registered");
        assert_eq!(body.text().await.unwrap(), "h\u{e9}llo");
        assert!(capture.take(&id).is_none());

        assert_eq!(pass_rx.recv().await.unwrap(), bytes[..2].to_vec());
        assert_eq!(pass_rx.recv().await.unwrap(), bytes[2..].to_vec());
    }
}
