//! A callback-driven TCP primitive with tagged reads and writes.
//!
//! [`RawTcpSocket`] takes exclusive ownership of a stream and drives it from two local tasks, one
//! for each direction. Submitting an operation never blocks: the request is queued to the task
//! and the outcome is reported later to the socket's [`RawSocketDelegate`], carrying the tag
//! given when submitting it. The socket reports its own disconnection exactly once, whether it
//! was caused by the remote end, an I/O error, or a close request.

use std::{
    cell::{Cell, RefCell},
    io,
    rc::{Rc, Weak},
};

use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
    task::AbortHandle,
};
use tracing::trace;

use crate::socket::Tag;

/// The default maximum amount of bytes handed out by a single read.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 16 * 1024;

/// Receives the completion events of a [`RawTcpSocket`].
pub trait RawSocketDelegate {
    /// Data was read. Never called with an empty buffer, end of stream is reported as a
    /// disconnect instead.
    fn did_read_data(&self, data: Bytes, tag: Tag);

    /// All the bytes of the write submitted with `tag` were handed to the transport.
    fn did_write_data(&self, tag: Tag);

    /// The transport is closed. `error` is `None` for a clean close.
    fn did_disconnect(&self, error: Option<io::Error>);
}

enum WriteCommand {
    Data(Bytes, Tag),
    Shutdown,
}

struct RawShared {
    delegate: Weak<dyn RawSocketDelegate>,
    closed: Cell<bool>,
    shutting_down: Cell<bool>,
    tasks: RefCell<Vec<AbortHandle>>,
}

impl RawShared {
    fn delegate(&self) -> Option<Rc<dyn RawSocketDelegate>> {
        self.delegate.upgrade()
    }

    /// Stops both I/O tasks. Returns whether this call was the one that closed the socket.
    fn close(&self) -> bool {
        if self.closed.replace(true) {
            return false;
        }

        for task in self.tasks.borrow_mut().drain(..) {
            task.abort();
        }

        true
    }

    fn close_and_report(&self, error: Option<io::Error>) {
        if self.close() {
            if let Some(delegate) = self.delegate() {
                delegate.did_disconnect(error);
            }
        }
    }
}

pub struct RawTcpSocket {
    reads: mpsc::UnboundedSender<Tag>,
    writes: mpsc::UnboundedSender<WriteCommand>,
    shared: Rc<RawShared>,
}

impl RawTcpSocket {
    /// Takes ownership of `stream` and starts driving it.
    ///
    /// This spawns local tasks, so it must be called from within a
    /// [`LocalSet`](tokio::task::LocalSet). No event is delivered before the caller yields.
    pub fn new<S>(stream: S, delegate: Weak<dyn RawSocketDelegate>, read_buffer_size: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (reads, reads_rx) = mpsc::unbounded_channel();
        let (writes, writes_rx) = mpsc::unbounded_channel();

        let shared = Rc::new(RawShared {
            delegate,
            closed: Cell::new(false),
            shutting_down: Cell::new(false),
            tasks: RefCell::new(Vec::with_capacity(2)),
        });

        let read_task = tokio::task::spawn_local(read_loop(reader, reads_rx, Rc::clone(&shared), read_buffer_size.max(1)));
        let write_task = tokio::task::spawn_local(write_loop(writer, writes_rx, Rc::clone(&shared)));
        shared.tasks.borrow_mut().extend([read_task.abort_handle(), write_task.abort_handle()]);

        Self { reads, writes, shared }
    }

    /// Whether the socket has closed, or has been asked to close immediately.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.get()
    }

    /// Reads whatever data is available next, up to the read buffer size.
    pub fn read_data(&self, tag: Tag) {
        if self.reads.send(tag).is_err() {
            trace!(%tag, "Read submitted to a raw socket that already stopped reading");
        }
    }

    /// Writes all of `data`.
    pub fn write_data(&self, data: Bytes, tag: Tag) {
        if self.writes.send(WriteCommand::Data(data, tag)).is_err() {
            trace!(%tag, "Write submitted to a raw socket that already stopped writing");
        }
    }

    /// Closes the socket once every write submitted so far has been flushed.
    ///
    /// The flush carries on even if this socket is dropped before it finishes.
    pub fn disconnect(&self) {
        if self.writes.send(WriteCommand::Shutdown).is_ok() {
            self.shared.shutting_down.set(true);
        }
    }

    /// Closes the socket right away. Pending writes are dropped and never acknowledged. The
    /// disconnect is still reported to the delegate, from a separate task.
    pub fn force_disconnect(&self) {
        if self.shared.close() {
            let shared = Rc::clone(&self.shared);
            tokio::task::spawn_local(async move {
                if let Some(delegate) = shared.delegate() {
                    delegate.did_disconnect(None);
                }
            });
        }
    }
}

impl Drop for RawTcpSocket {
    fn drop(&mut self) {
        // Dropping the senders lets a graceful shutdown finish on its own.
        if !self.shared.shutting_down.get() {
            self.shared.close();
        }
    }
}

async fn read_loop<R>(mut reader: R, mut reads: mpsc::UnboundedReceiver<Tag>, shared: Rc<RawShared>, buffer_size: usize)
where
    R: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::new();

    while let Some(tag) = reads.recv().await {
        buffer.reserve(buffer_size);
        match reader.read_buf(&mut buffer).await {
            Ok(0) => {
                trace!(%tag, "Raw socket reached end of stream");
                shared.close_and_report(None);
                return;
            }
            Ok(length) => {
                trace!(%tag, length, "Raw socket read data");
                let data = buffer.split().freeze();
                if let Some(delegate) = shared.delegate() {
                    delegate.did_read_data(data, tag);
                }
            }
            Err(error) => {
                trace!(%tag, "Raw socket read failed: {error}");
                shared.close_and_report(Some(error));
                return;
            }
        }
    }
}

async fn write_loop<W>(mut writer: W, mut writes: mpsc::UnboundedReceiver<WriteCommand>, shared: Rc<RawShared>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(command) = writes.recv().await {
        match command {
            WriteCommand::Data(data, tag) => match writer.write_all(&data).await {
                Ok(()) => {
                    trace!(%tag, length = data.len(), "Raw socket wrote data");
                    if let Some(delegate) = shared.delegate() {
                        delegate.did_write_data(tag);
                    }
                }
                Err(error) => {
                    trace!(%tag, "Raw socket write failed: {error}");
                    shared.close_and_report(Some(error));
                    return;
                }
            },
            WriteCommand::Shutdown => {
                let result = writer.shutdown().await;
                trace!("Raw socket shut down");
                shared.close_and_report(result.err());
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, time::Duration};

    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::utils::test_utils::run_local;

    #[derive(Debug, PartialEq)]
    enum RawEvent {
        Read(Vec<u8>, Tag),
        Wrote(Tag),
        Disconnected(Option<io::ErrorKind>),
    }

    #[derive(Default)]
    struct Recorder {
        events: RefCell<Vec<RawEvent>>,
    }

    impl RawSocketDelegate for Recorder {
        fn did_read_data(&self, data: Bytes, tag: Tag) {
            self.events.borrow_mut().push(RawEvent::Read(data.to_vec(), tag));
        }

        fn did_write_data(&self, tag: Tag) {
            self.events.borrow_mut().push(RawEvent::Wrote(tag));
        }

        fn did_disconnect(&self, error: Option<io::Error>) {
            self.events.borrow_mut().push(RawEvent::Disconnected(error.map(|e| e.kind())));
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[test]
    fn tagged_read_and_write() {
        run_local(async {
            let (mut remote, local) = duplex(1024);
            let recorder = Rc::new(Recorder::default());
            let socket = RawTcpSocket::new(local, Rc::downgrade(&recorder) as Weak<dyn RawSocketDelegate>, 64);

            socket.write_data(Bytes::from_static(b"ping"), Tag(3));
            let mut buf = [0u8; 4];
            remote.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"ping");

            socket.read_data(Tag(9));
            remote.write_all(b"pong").await.unwrap();
            settle().await;

            assert_eq!(
                *recorder.events.borrow(),
                vec![RawEvent::Wrote(Tag(3)), RawEvent::Read(b"pong".to_vec(), Tag(9))]
            );
        });
    }

    #[test]
    fn end_of_stream_reports_single_disconnect() {
        run_local(async {
            let (remote, local) = duplex(1024);
            let recorder = Rc::new(Recorder::default());
            let socket = RawTcpSocket::new(local, Rc::downgrade(&recorder) as Weak<dyn RawSocketDelegate>, 64);

            socket.read_data(Tag(1));
            drop(remote);
            settle().await;
            socket.force_disconnect();
            socket.disconnect();
            settle().await;

            assert_eq!(*recorder.events.borrow(), vec![RawEvent::Disconnected(None)]);
            assert!(socket.is_closed());
        });
    }

    #[test]
    fn force_disconnect_drops_pending_write() {
        run_local(async {
            let (_remote, local) = duplex(16);
            let recorder = Rc::new(Recorder::default());
            let socket = RawTcpSocket::new(local, Rc::downgrade(&recorder) as Weak<dyn RawSocketDelegate>, 64);

            // Nobody reads the remote end, so this write can't complete.
            socket.write_data(Bytes::from(vec![7u8; 4096]), Tag(1));
            settle().await;
            socket.force_disconnect();
            settle().await;

            assert_eq!(*recorder.events.borrow(), vec![RawEvent::Disconnected(None)]);
        });
    }

    #[test]
    fn graceful_disconnect_flushes_first() {
        run_local(async {
            let (mut remote, local) = duplex(1024);
            let recorder = Rc::new(Recorder::default());
            let socket = RawTcpSocket::new(local, Rc::downgrade(&recorder) as Weak<dyn RawSocketDelegate>, 64);

            socket.write_data(Bytes::from_static(b"bye"), Tag(5));
            socket.disconnect();

            let mut received = Vec::new();
            remote.read_to_end(&mut received).await.unwrap();
            assert_eq!(received, b"bye");
            settle().await;

            assert_eq!(
                *recorder.events.borrow(),
                vec![RawEvent::Wrote(Tag(5)), RawEvent::Disconnected(None)]
            );
        });
    }
}
