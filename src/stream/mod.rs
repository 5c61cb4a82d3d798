use crate::error::GitsError;
use bytes::Bytes;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_stream::Stream;
use tracing::{debug, error};

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, GitsError>> + Send + 'static>>;

const CHUNK: usize = 32 * 1024;

pub fn once(data: Bytes) -> ByteStream {
    Box::pin(tokio_stream::once(Ok(data)))
}

/// Turns a reader into a stream of chunks. A read error ends the stream
/// after being logged: once a response has started there is nobody to
/// report it to.
pub fn from_reader<R>(mut reader: R, what: String) -> ByteStream
where
    R: AsyncRead + Send + Unpin + 'static,
{
    Box::pin(async_stream::stream! {
        let mut buf = vec![0u8; CHUNK];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => yield Ok(Bytes::copy_from_slice(&buf[..n])),
                Err(e) => {
                    error!("Reading {}: {}", what, e);
                    break;
                }
            }
        }
        debug!("Finished streaming {}", what);
    })
}
