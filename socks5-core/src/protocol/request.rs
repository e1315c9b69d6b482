use byteorder::{BigEndian, ByteOrder};

use super::{ParseOutcome, ParseResult, VERSION};
use crate::error::ProtocolError;

const ATYP_V4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_V6: u8 = 0x04;

const CMD_CONNECT: u8 = 0x01;

/// Only `CONNECT` is in scope; `BIND` and `UDP ASSOCIATE` are Non-goals.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum Command {
    Connect,
}

/// `DST.ADDR`, tagged by the wire's `ATYP` byte.
#[derive(Debug, Eq, PartialEq, Clone)]
pub enum Address {
    V4([u8; 4]),
    Domain(Vec<u8>),
    V6([u8; 16]),
}

/// A parsed `VER | CMD | RSV | ATYP | DST.ADDR | DST.PORT` request.
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct RequestMessage {
    pub command: Command,
    pub address: Address,
    pub port: u16,
}

/// Parses a CONNECT request from the front of `buf`.
pub fn parse_request(buf: &[u8]) -> ParseResult<RequestMessage> {
    if buf.len() < 4 {
        return Ok(ParseOutcome::Incomplete);
    }
    let version = buf[0];
    if version != VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }
    let cmd = buf[1];
    if cmd != CMD_CONNECT {
        return Err(ProtocolError::UnsupportedCommand(cmd));
    }
    // buf[2] is RSV, reserved and ignored.
    let atyp = buf[3];

    let (address, addr_len) = match atyp {
        ATYP_V4 => {
            let needed = 4 + 4;
            if buf.len() < needed {
                return Ok(ParseOutcome::Incomplete);
            }
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&buf[4..8]);
            (Address::V4(octets), 4usize)
        }
        ATYP_DOMAIN => {
            if buf.len() < 5 {
                return Ok(ParseOutcome::Incomplete);
            }
            let len = buf[4] as usize;
            let needed = 5 + len;
            if buf.len() < needed {
                return Ok(ParseOutcome::Incomplete);
            }
            (Address::Domain(buf[5..5 + len].to_vec()), 1 + len)
        }
        ATYP_V6 => {
            let needed = 4 + 16;
            if buf.len() < needed {
                return Ok(ParseOutcome::Incomplete);
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[4..20]);
            (Address::V6(octets), 16usize)
        }
        other => return Err(ProtocolError::UnsupportedAddressType(other)),
    };

    let port_offset = 4 + addr_len;
    let total = port_offset + 2;
    if buf.len() < total {
        return Ok(ParseOutcome::Incomplete);
    }
    let port = BigEndian::read_u16(&buf[port_offset..total]);

    Ok(ParseOutcome::Complete(RequestMessage { command: Command::Connect, address, port }, total))
}
