use super::conn::Shared;
use super::frame::{Frame, Reason};
use crate::body::Body;
use crate::Error;
use bytes::Bytes;
use std::sync::Arc;

/// Send a body as DATA frames on a stream.
///
/// Each chunk waits for credit in both the stream and connection window and
/// is split to fit the credit and the peer's max frame size. The remainder
/// goes out once more credit is granted. The body end is an empty DATA frame
/// with END_STREAM, a failing body resets the stream.
pub(crate) async fn send_body(shared: &Arc<Shared>, stream_id: u32, mut body: Body) -> Result<(), Error> {
    loop {
        let mut chunk = match body.read().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                debug!("Body for stream {} failed: {}", stream_id, e);
                shared.reset(stream_id, Reason::InternalError);
                return Err(e);
            }
        };

        while !chunk.is_empty() {
            let amount = match shared.reserve(stream_id, chunk.len()).await {
                Ok(v) => v,
                Err(e) => {
                    // stream reset or connection gone, nobody is reading.
                    body.close(Some(e.duplicate()));
                    return Err(e);
                }
            };

            let part = chunk.split_to(amount);

            trace!("Send {} bytes on stream {}", amount, stream_id);

            shared.send_frame(Frame::data(stream_id, part, false)).await?;
        }
    }

    shared
        .send_frame(Frame::data(stream_id, Bytes::new(), true))
        .await?;

    shared.close_local(stream_id);

    Ok(())
}
