//! Bidirectional frame forwarding
//!
//! Two symmetric copy loops joined on a shared cancellation token. Each
//! loop moves one frame at a time from its source stream to its
//! destination sender; the channel capacity is one frame, so the slower
//! peer throttles the faster one. Whichever direction finishes first
//! (end-of-stream, stream error, or a send failing because the peer went
//! away) cancels the shared token, and forwarding returns once both
//! directions have finished.

use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tonic::Status;

use switchyard_proto::StreamFrame;

use crate::registry::FrameSender;

/// In-flight frames per direction
pub(crate) const FORWARD_BUFFER: usize = 1;

/// Copy frames between two paired participants until either side is done.
///
/// `a` and `b` are each a participant's inbound stream and outbound
/// sender; frames read from one side are written to the other verbatim.
pub async fn forward<A, B>(
    cancel: CancellationToken,
    a: (A, FrameSender),
    b: (B, FrameSender),
) -> Result<(), Status>
where
    A: Stream<Item = Result<StreamFrame, Status>> + Unpin + Send,
    B: Stream<Item = Result<StreamFrame, Status>> + Unpin + Send,
{
    let (a_rx, a_tx) = a;
    let (b_rx, b_tx) = b;

    let (a_to_b, b_to_a) = tokio::join!(
        copy_frames(cancel.clone(), a_rx, b_tx),
        copy_frames(cancel.clone(), b_rx, a_tx),
    );
    a_to_b.and(b_to_a)
}

/// Copy one direction; tears the shared token down on exit
async fn copy_frames<S>(
    cancel: CancellationToken,
    mut source: S,
    sink: FrameSender,
) -> Result<(), Status>
where
    S: Stream<Item = Result<StreamFrame, Status>> + Unpin + Send,
{
    // Wakes the opposite direction no matter how this one ends
    let _teardown = cancel.clone().drop_guard();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            frame = source.next() => match frame {
                // end of stream: clean termination
                None => return Ok(()),
                Some(Err(status)) => return Err(status),
                Some(Ok(frame)) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        sent = sink.send(Ok(frame)) => {
                            if sent.is_err() {
                                return Err(Status::aborted("peer stream closed"));
                            }
                        }
                    }
                }
            },
        }
    }
}
