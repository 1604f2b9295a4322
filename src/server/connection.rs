use bytes::BytesMut;
use smallvec::SmallVec;
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::protocol::{Encoder, Frame, Parser};

const READ_CAPACITY: usize = 8 * 1024;
const WRITE_CAPACITY: usize = 8 * 1024;

/// Buffered RESP framing over one TCP stream.
///
/// The store server reads pipelined batches with [`Connection::read_frames`]
/// and answers them with one flush; the store client issues one request at
/// a time with [`Connection::round_trip`].
pub struct Connection {
    stream: BufWriter<TcpStream>,
    inbound: BytesMut,
    outbound: BytesMut,
    parser: Parser,
    encoder: Encoder,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        // Replies are small and latency bound
        let _ = stream.set_nodelay(true);
        Self {
            stream: BufWriter::with_capacity(WRITE_CAPACITY, stream),
            inbound: BytesMut::with_capacity(READ_CAPACITY),
            outbound: BytesMut::with_capacity(WRITE_CAPACITY),
            parser: Parser::new(),
            encoder: Encoder::new(),
        }
    }

    /// Open a client connection to a store server.
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::new(stream))
    }

    /// Wait for at least one request, then drain every complete frame
    /// already buffered.
    ///
    /// An empty batch means the peer closed between requests; a close in
    /// the middle of a frame is `Error::ConnectionClosed`.
    pub async fn read_frames(&mut self) -> Result<SmallVec<[Frame; 8]>> {
        let mut frames = SmallVec::new();
        loop {
            while let Some(frame) = self.parse_buffered()? {
                frames.push(frame);
            }
            if !frames.is_empty() {
                return Ok(frames);
            }
            if !self.fill().await? {
                return if self.inbound.is_empty() {
                    Ok(frames)
                } else {
                    Err(Error::ConnectionClosed)
                };
            }
        }
    }

    /// Read exactly one frame. Any close before it completes is
    /// `Error::ConnectionClosed`, since a client always expects a reply.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.parse_buffered()? {
                return Ok(frame);
            }
            if !self.fill().await? {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    /// Send one request frame and wait for its reply.
    pub async fn round_trip(&mut self, request: &Frame) -> Result<Frame> {
        self.write_frame_buffered(request);
        self.flush().await?;
        self.read_frame().await
    }

    /// Whether unread bytes are buffered. A pooled client connection with
    /// leftovers is out of sync with the server and must not be reused.
    pub fn has_pending_input(&self) -> bool {
        !self.inbound.is_empty()
    }

    /// Queue a frame; nothing is sent until [`Connection::flush`].
    #[inline]
    pub fn write_frame_buffered(&mut self, frame: &Frame) {
        self.encoder.encode(frame, &mut self.outbound);
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        if !self.outbound.is_empty() {
            self.stream.write_all(&self.outbound).await?;
            self.outbound.clear();
        }
        self.stream.flush().await
    }

    fn parse_buffered(&mut self) -> Result<Option<Frame>> {
        if self.inbound.is_empty() {
            return Ok(None);
        }
        match self.parser.parse(&mut self.inbound) {
            Ok(frame) => Ok(Some(frame)),
            Err(Error::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Read more bytes from the socket. `false` on EOF.
    async fn fill(&mut self) -> Result<bool> {
        let n = self.stream.get_mut().read_buf(&mut self.inbound).await?;
        Ok(n > 0)
    }
}
