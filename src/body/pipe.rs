use super::{Body, Writable};
use crate::io::Io;
use crate::Error;
use async_std::task::{self, JoinHandle};
use bytes::Bytes;
use futures_util::future::{join, AbortHandle, Abortable};
use futures_util::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};

const READ_BUF_SIZE: usize = 16_384;

/// Bridges a body pair to a raw bidirectional transport.
///
/// Bytes of `input` are written to the transport, bytes read from the
/// transport are written to `output`. The two directions run concurrently.
/// When `input` ends, the write side of the transport is closed and reading
/// carries on until the peer closes. A failure on either side stops both, and
/// the transport is dropped once both have finished.
///
/// Used for CONNECT tunnels and protocol upgrades.
#[derive(Debug)]
pub struct Pipe {
    task: JoinHandle<()>,
}

impl Pipe {
    /// Start piping.
    pub fn new<S: Io>(io: S, input: Body, output: Writable) -> Self {
        let (reader, writer) = io.split();

        let (stop_read, read_reg) = AbortHandle::new_pair();
        let (stop_write, write_reg) = AbortHandle::new_pair();

        let out = output.clone();
        let write = async move {
            if let Err(e) = write_half(input, writer).await {
                debug!("Pipe write failed: {}", e);
                out.close(Some(e));
                stop_read.abort();
            }
        };

        let read = async move {
            match read_half(reader, &output).await {
                Ok(()) => {
                    output.close(None);
                }
                Err(e) => {
                    debug!("Pipe read failed: {}", e);
                    output.close(Some(e));
                    stop_write.abort();
                }
            }
        };

        let task = task::spawn(async move {
            join(
                Abortable::new(write, write_reg),
                Abortable::new(read, read_reg),
            )
            .await;
            trace!("Pipe finished");
        });

        Pipe { task }
    }

    /// Wait for both directions to finish.
    pub async fn join(self) {
        self.task.await
    }
}

async fn write_half<S: Io>(mut input: Body, mut writer: WriteHalf<S>) -> Result<(), Error> {
    while let Some(chunk) = input.read().await? {
        writer.write_all(&chunk).await?;
        writer.flush().await?;
    }

    // half close, the peer sees EOF.
    writer.close().await?;

    Ok(())
}

async fn read_half<S: Io>(mut reader: ReadHalf<S>, output: &Writable) -> Result<(), Error> {
    let mut buf = vec![0; READ_BUF_SIZE];

    loop {
        let amount = reader.read(&mut buf).await?;

        if amount == 0 {
            return Ok(());
        }

        output.write(Bytes::copy_from_slice(&buf[..amount])).await?;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use async_std::net::{TcpListener, TcpStream};

    #[async_std::test]
    async fn pipe_both_directions() -> Result<(), Error> {
        let l = TcpListener::bind("127.0.0.1:0").await?;
        let addr = l.local_addr()?;

        let echo = task::spawn(async move {
            let (s, _) = l.accept().await.unwrap();
            let (mut r, mut w) = (&s, &s);
            futures_util::io::copy(&mut r, &mut w).await.unwrap();
            s.shutdown(std::net::Shutdown::Write).unwrap();
        });

        let tcp = TcpStream::connect(addr).await?;
        let output = Writable::new(2);
        let pipe = Pipe::new(tcp, Body::from("tunnelled"), output.clone());

        let mut body = Body::from(output);
        assert_eq!(body.join().await?, b"tunnelled");

        pipe.join().await;
        echo.await;

        Ok(())
    }
}
