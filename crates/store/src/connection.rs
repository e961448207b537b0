//! One TCP stream speaking RESP

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::BytesMut;

use crate::resp::{self, RespValue};
use crate::{Endpoint, Result, StoreError};

const READ_CHUNK: usize = 4096;

/// Blocking request/reply connection
#[derive(Debug)]
pub struct RespConnection {
    endpoint: Endpoint,
    stream: TcpStream,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl RespConnection {
    /// Open a TCP connection with bounded connect and I/O timeouts
    pub fn open(
        endpoint: &Endpoint,
        connect_timeout: Duration,
        command_timeout: Duration,
    ) -> Result<Self> {
        let label = endpoint.to_string();
        let addrs = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(|e| StoreError::io(&label, e))?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, connect_timeout) {
                Ok(stream) => {
                    stream
                        .set_read_timeout(Some(command_timeout))
                        .and_then(|_| stream.set_write_timeout(Some(command_timeout)))
                        .and_then(|_| stream.set_nodelay(true))
                        .map_err(|e| StoreError::io(&label, e))?;
                    return Ok(Self {
                        endpoint: endpoint.clone(),
                        stream,
                        read_buf: BytesMut::with_capacity(READ_CHUNK),
                        write_buf: BytesMut::new(),
                    });
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(match last_err {
            Some(e) => StoreError::io(label, e),
            None => StoreError::not_connected(label),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Send one command and wait for its reply
    pub fn command(&mut self, args: &[&str]) -> Result<RespValue> {
        self.write_buf.clear();
        resp::encode_command(args, &mut self.write_buf);
        self.stream
            .write_all(&self.write_buf)
            .map_err(|e| StoreError::io(self.endpoint.to_string(), e))?;
        self.read_reply()
    }

    /// `PING` answered with `PONG`
    pub fn ping(&mut self) -> Result<()> {
        match self.command(&["PING"])? {
            reply if reply.is_pong() => Ok(()),
            RespValue::Error(message) => Err(StoreError::Server { message }),
            other => Err(StoreError::protocol(format!(
                "unexpected PING reply: {other:?}"
            ))),
        }
    }

    fn read_reply(&mut self) -> Result<RespValue> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(value) = resp::decode(&mut self.read_buf)? {
                return Ok(value);
            }
            let n = self
                .stream
                .read(&mut chunk)
                .map_err(|e| StoreError::io(self.endpoint.to_string(), e))?;
            if n == 0 {
                return Err(StoreError::io(
                    self.endpoint.to_string(),
                    std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection closed"),
                ));
            }
            self.read_buf.extend_from_slice(&chunk[..n]);
        }
    }
}
