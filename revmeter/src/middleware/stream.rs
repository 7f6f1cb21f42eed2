use chrono::Utc;
use futures::future::BoxFuture;
use futures::{Stream, ready};
use std::fmt;
use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, warn};

use super::{Metering, spawn_report};
use crate::config::ReportMode;
use crate::identity::{calculate_duration_ms, format_timestamp};
use crate::metering::create_metering_request;
use crate::types::{OperationType, TokenCounts};
use crate::usage::DEFAULT_STOP_REASON;

/// Chunk stream of a metered `generate_content_stream` call.
///
/// Yields exactly what the underlying stream yields. The first successful chunk stamps the
/// time to first token; the stream is finalized and reported once, either when the
/// underlying stream ends or when this wrapper is dropped before that.
///
/// Error items are passed through and do not end the stream.
pub struct MeteredStream<S> {
    inner: Pin<Box<S>>,
    state: State,
}

enum State {
    /// Not metered; every poll goes straight to the inner stream
    Passthrough,
    Open(Box<Finalizer>),
    /// Inner stream ended, waiting for the report before yielding `None`
    Reporting(BoxFuture<'static, ()>),
    Done,
}

/// What a stream needs to report itself once it ends.
pub(crate) struct Finalizer {
    metering: Metering,
    transaction_id: String,
    model: String,
    first_token_seen: bool,
}

impl Finalizer {
    pub(crate) fn new(metering: Metering, transaction_id: String, model: String) -> Self {
        Self {
            metering,
            transaction_id,
            model,
            first_token_seen: false,
        }
    }

    fn on_chunk(&mut self) {
        if !self.first_token_seen {
            self.first_token_seen = true;
            self.metering
                .registry()
                .record_first_token(&self.transaction_id, Utc::now());
        }
    }

    /// Remove the tracker and build the report future. `None` if the tracker was already gone.
    fn finish(self) -> Option<BoxFuture<'static, ()>> {
        let tracker = match self.metering.registry().try_finalize(&self.transaction_id) {
            Ok(tracker) => tracker,
            Err(e) => {
                warn!(transaction_id = %self.transaction_id, error = %e, "Stream finalized without a tracker, not reporting");
                return None;
            }
        };

        let end_time = Utc::now();
        let time_to_first_token = tracker
            .first_token_time
            .map(|first| calculate_duration_ms(tracker.start_time, first))
            .unwrap_or(0);

        debug!(
            transaction_id = %tracker.transaction_id,
            model = %self.model,
            time_to_first_token,
            "Stream completed"
        );

        let request = create_metering_request()
            .transaction_id(tracker.transaction_id)
            .model(self.model)
            .token_counts(TokenCounts::zero())
            .stop_reason(DEFAULT_STOP_REASON.to_string())
            .request_time(format_timestamp(tracker.start_time))
            .response_time(format_timestamp(end_time))
            .request_duration(calculate_duration_ms(tracker.start_time, end_time))
            .operation_type(OperationType::Chat)
            .is_streamed(true)
            .time_to_first_token(time_to_first_token)
            .maybe_usage_metadata(tracker.usage_metadata)
            .call();

        Some(self.metering.dispatch(request))
    }
}

impl<S> MeteredStream<S> {
    pub(crate) fn new(inner: S, finalizer: Finalizer) -> Self {
        Self {
            inner: Box::pin(inner),
            state: State::Open(Box::new(finalizer)),
        }
    }

    pub(crate) fn passthrough(inner: S) -> Self {
        Self {
            inner: Box::pin(inner),
            state: State::Passthrough,
        }
    }

    /// Whether this stream reports its usage.
    pub fn is_metered(&self) -> bool {
        !matches!(self.state, State::Passthrough)
    }
}

impl<S> fmt::Debug for MeteredStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Passthrough => "Passthrough",
            State::Open(_) => "Open",
            State::Reporting(_) => "Reporting",
            State::Done => "Done",
        };
        f.debug_struct("MeteredStream")
            .field("state", &state)
            .finish_non_exhaustive()
    }
}

impl<S, T, E> Stream for MeteredStream<S>
where
    S: Stream<Item = Result<T, E>>,
{
    type Item = Result<T, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match &mut this.state {
                State::Passthrough => return this.inner.as_mut().poll_next(cx),
                State::Done => return Poll::Ready(None),
                State::Reporting(report) => {
                    ready!(report.as_mut().poll(cx));
                    this.state = State::Done;
                    return Poll::Ready(None);
                }
                State::Open(finalizer) => match ready!(this.inner.as_mut().poll_next(cx)) {
                    Some(Ok(chunk)) => {
                        finalizer.on_chunk();
                        return Poll::Ready(Some(Ok(chunk)));
                    }
                    Some(Err(e)) => return Poll::Ready(Some(Err(e))),
                    None => {}
                },
            }

            // Inner stream is exhausted
            let State::Open(finalizer) = mem::replace(&mut this.state, State::Done) else {
                return Poll::Ready(None);
            };
            let mode = finalizer.metering.report_mode();
            match (finalizer.finish(), mode) {
                (Some(report), ReportMode::Await) => this.state = State::Reporting(report),
                (Some(report), ReportMode::Background) => spawn_report(report),
                (None, _) => {}
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.state {
            State::Passthrough | State::Open(_) => self.inner.size_hint(),
            State::Reporting(_) | State::Done => (0, Some(0)),
        }
    }
}

impl<S> Drop for MeteredStream<S> {
    fn drop(&mut self) {
        match mem::replace(&mut self.state, State::Done) {
            State::Open(finalizer) => {
                debug!(transaction_id = %finalizer.transaction_id, "Stream dropped before completion");
                if let Some(report) = finalizer.finish() {
                    spawn_report(report);
                }
            }
            State::Reporting(report) => spawn_report(report),
            State::Passthrough | State::Done => {}
        }
    }
}
