//! Frame header and async frame I/O.

use std::io::Cursor;

use binrw::prelude::*;
use binrw::Endian;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::TransportError;

/// Largest payload a peer will accept. Generously above one block plus
/// message overhead; anything bigger indicates a corrupt or hostile peer.
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

/// The fixed per-message header: 4-byte magic followed by the payload
/// length, both big-endian on the wire.
#[binrw]
#[brw(big, magic = b"PFS1")]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct FrameHeader {
    pub length: u32,
}

impl FrameHeader {
    pub const SIZE: usize = 8;
}

/// Writes one framed message. The header and payload are coalesced into a
/// single buffer so each frame is one write on the socket.
pub async fn write_frame<W, M>(writer: &mut W, message: &M) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
    M: for<'a> BinWrite<Args<'a> = ()>,
{
    let mut cursor = Cursor::new(Vec::with_capacity(FrameHeader::SIZE + 64));
    cursor.set_position(FrameHeader::SIZE as u64);
    message.write_options(&mut cursor, Endian::Little, ())?;

    let payload_len = cursor.position() as usize - FrameHeader::SIZE;
    let length: u32 = payload_len
        .try_into()
        .map_err(|_| TransportError::FrameTooLarge(u32::MAX))?;
    if length > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge(length));
    }

    cursor.set_position(0);
    FrameHeader { length }.write(&mut cursor)?;

    writer.write_all(cursor.get_ref()).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one framed message. A clean EOF before the header yields
/// [`TransportError::Closed`].
pub async fn read_frame<R, M>(reader: &mut R) -> Result<M, TransportError>
where
    R: AsyncRead + Unpin,
    M: for<'a> BinRead<Args<'a> = ()>,
{
    let mut header_bytes = [0u8; FrameHeader::SIZE];
    if let Err(e) = reader.read_exact(&mut header_bytes).await {
        return Err(match e.kind() {
            std::io::ErrorKind::UnexpectedEof => TransportError::Closed,
            _ => TransportError::Io(e),
        });
    }

    let header = FrameHeader::read(&mut Cursor::new(&header_bytes))?;
    if header.length > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge(header.length));
    }

    let mut payload = vec![0u8; header.length as usize];
    reader.read_exact(&mut payload).await?;

    let message = M::read_options(&mut Cursor::new(&payload), Endian::Little, ())?;
    Ok(message)
}
