//! Request/response recording hook.

use crate::request::RequestDescriptor;
use crate::response::Response;

/// Observes final request/response pairs, e.g. for replay or debugging.
///
/// Called with the response as seen by the outermost stages. Implementations
/// only read it.
pub trait Recorder: Send + Sync {
    fn record(&self, request: &RequestDescriptor, response: &Response);
}

impl<F> Recorder for F
where
    F: Fn(&RequestDescriptor, &Response) + Send + Sync,
{
    fn record(&self, request: &RequestDescriptor, response: &Response) {
        self(request, response)
    }
}
