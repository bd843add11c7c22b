//! MySQL client/server wire packet framing.
//!
//! Grounded on `myyrakle-mysql-binlog-rs`'s `src/protocol.rs` (`PacketChannel`,
//! `GreetingPacket`), adapted to the crate's `CdcError` taxonomy.

use crate::error::{CdcError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Read;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// A single MySQL client/server packet channel over one TCP connection.
pub struct PacketChannel {
    stream: TcpStream,
}

impl PacketChannel {
    pub async fn connect(hostname: &str, port: u16) -> Result<Self> {
        let addr = format!("{hostname}:{port}");
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| CdcError::Connection(format!("failed to connect to {addr}: {e}")))?;
        debug!(%addr, "connected to MySQL source");
        Ok(PacketChannel { stream })
    }

    /// Read one packet: 3-byte little-endian length, 1-byte sequence id,
    /// then the body.
    pub async fn read_packet(&mut self) -> Result<Vec<u8>> {
        let mut len_buf = [0u8; 3];
        self.stream
            .read_exact(&mut len_buf)
            .await
            .map_err(CdcError::Io)?;
        let length = u32::from_le_bytes([len_buf[0], len_buf[1], len_buf[2], 0]);

        let _sequence = self.stream.read_u8().await.map_err(CdcError::Io)?;

        let mut buffer = vec![0u8; length as usize];
        self.stream.read_exact(&mut buffer).await.map_err(CdcError::Io)?;
        Ok(buffer)
    }

    pub async fn write_packet(&mut self, data: &[u8], sequence: u8) -> Result<()> {
        let length = data.len() as u32;

        let mut header = Vec::with_capacity(4);
        WriteBytesExt::write_u24::<LittleEndian>(&mut header, length)
            .map_err(CdcError::Io)?;
        WriteBytesExt::write_u8(&mut header, sequence).map_err(CdcError::Io)?;

        self.stream.write_all(&header).await.map_err(CdcError::Io)?;
        self.stream.write_all(data).await.map_err(CdcError::Io)?;
        self.stream.flush().await.map_err(CdcError::Io)?;
        Ok(())
    }

    /// Read raw bytes directly from the stream, used once the dump
    /// command has been sent and the server is pushing binlog events.
    pub async fn read_raw(&mut self, buffer: &mut [u8]) -> Result<usize> {
        self.stream.read(buffer).await.map_err(CdcError::Io)
    }
}

/// The server's initial handshake (greeting) packet.
pub struct GreetingPacket {
    pub protocol_version: u8,
    pub server_version: String,
    pub thread_id: u32,
    pub scramble: Vec<u8>,
    pub server_capabilities: u32,
    pub server_collation: u8,
    pub server_status: u16,
}

impl GreetingPacket {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = std::io::Cursor::new(data);

        let protocol_version = ReadBytesExt::read_u8(&mut cursor)
            .map_err(|e| CdcError::Protocol(format!("failed to read protocol version: {e}")))?;

        let server_version = read_null_terminated_string(&mut cursor)?;

        let thread_id = ReadBytesExt::read_u32::<LittleEndian>(&mut cursor)
            .map_err(|e| CdcError::Protocol(format!("failed to read thread id: {e}")))?;

        let mut scramble_part1 = vec![0u8; 8];
        Read::read_exact(&mut cursor, &mut scramble_part1)
            .map_err(|e| CdcError::Protocol(format!("failed to read scramble part 1: {e}")))?;

        ReadBytesExt::read_u8(&mut cursor)
            .map_err(|e| CdcError::Protocol(format!("failed to read filler: {e}")))?;

        let capabilities_lower = ReadBytesExt::read_u16::<LittleEndian>(&mut cursor)
            .map_err(|e| CdcError::Protocol(format!("failed to read capabilities: {e}")))?;

        let server_collation = ReadBytesExt::read_u8(&mut cursor)
            .map_err(|e| CdcError::Protocol(format!("failed to read collation: {e}")))?;

        let server_status = ReadBytesExt::read_u16::<LittleEndian>(&mut cursor)
            .map_err(|e| CdcError::Protocol(format!("failed to read status: {e}")))?;

        let capabilities_upper = ReadBytesExt::read_u16::<LittleEndian>(&mut cursor)
            .map_err(|e| CdcError::Protocol(format!("failed to read capabilities upper: {e}")))?;

        let server_capabilities = ((capabilities_upper as u32) << 16) | capabilities_lower as u32;

        let auth_data_len = ReadBytesExt::read_u8(&mut cursor)
            .map_err(|e| CdcError::Protocol(format!("failed to read auth data length: {e}")))?;

        let mut reserved = vec![0u8; 10];
        Read::read_exact(&mut cursor, &mut reserved)
            .map_err(|e| CdcError::Protocol(format!("failed to read reserved bytes: {e}")))?;

        let scramble_len = std::cmp::max(13, auth_data_len.saturating_sub(8)) as usize;
        let mut scramble_part2 = vec![0u8; scramble_len];
        Read::read_exact(&mut cursor, &mut scramble_part2)
            .map_err(|e| CdcError::Protocol(format!("failed to read scramble part 2: {e}")))?;

        let mut scramble = scramble_part1;
        if !scramble_part2.is_empty() {
            scramble.extend_from_slice(&scramble_part2[..scramble_part2.len() - 1]);
        }

        Ok(GreetingPacket {
            protocol_version,
            server_version,
            thread_id,
            scramble,
            server_capabilities,
            server_collation,
            server_status,
        })
    }
}

fn read_null_terminated_string<R: Read>(reader: &mut R) -> Result<String> {
    let mut bytes = Vec::new();
    loop {
        let byte = ReadBytesExt::read_u8(reader)
            .map_err(|e| CdcError::Protocol(format!("failed to read string byte: {e}")))?;
        if byte == 0 {
            break;
        }
        bytes.push(byte);
    }
    String::from_utf8(bytes).map_err(|e| CdcError::Protocol(format!("invalid utf-8 in string: {e}")))
}

pub fn is_error_packet(data: &[u8]) -> bool {
    !data.is_empty() && data[0] == 0xFF
}

pub fn is_ok_packet(data: &[u8]) -> bool {
    !data.is_empty() && data[0] == 0x00
}

pub fn is_eof_packet(data: &[u8]) -> bool {
    !data.is_empty() && data[0] == 0xFE && data.len() < 9
}
