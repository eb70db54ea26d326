//! The header of the datagram protocol.
use core::fmt;
use byteorder::{ByteOrder, NetworkEndian};

use super::{Checksum, Error, Result};
use super::field::Field;
use super::ip::{checksum, Protocol, Version};

byte_wrapper! {
    /// A datagram of the datagram protocol, header and payload.
    #[derive(Debug, PartialEq, Eq)]
    pub struct udp([u8]);
}

mod field {
    use crate::wire::field::*;

    pub(crate) const SOURCE: Field = 0..2;
    pub(crate) const DESTINATION: Field = 2..4;
    /// Header and payload, in bytes.
    pub(crate) const LENGTH: Field = 4..6;
    pub(crate) const CHECKSUM: Field = 6..8;

    pub(crate) const HEADER_LEN: usize = CHECKSUM.end;
}

impl udp {
    /// View a buffer as a datagram without checking it.
    pub fn new_unchecked(data: &[u8]) -> &Self {
        Self::__from_macro_new_unchecked(data)
    }

    /// View a mutable buffer as a datagram without checking it.
    pub fn new_unchecked_mut(data: &mut [u8]) -> &mut Self {
        Self::__from_macro_new_unchecked_mut(data)
    }

    /// View a buffer as a datagram whose accessors are all in bounds.
    pub fn new_checked(data: &[u8]) -> Result<&Self> {
        let datagram = Self::new_unchecked(data);
        datagram.check_len()?;
        Ok(datagram)
    }

    /// The whole buffer, including padding.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Check the header is present and the length field is consistent with the buffer.
    ///
    /// The buffer may be longer than the length field, the rest is link layer padding.
    pub fn check_len(&self) -> Result<()> {
        if self.0.len() < field::HEADER_LEN {
            return Err(Error::Truncated);
        }

        match usize::from(self.length()) {
            len if len < field::HEADER_LEN => Err(Error::Malformed),
            len if len > self.0.len() => Err(Error::Truncated),
            _ => Ok(()),
        }
    }

    /// The fixed header length.
    pub fn header_len() -> usize {
        field::HEADER_LEN
    }

    fn read(&self, field: Field) -> u16 {
        NetworkEndian::read_u16(&self.0[field])
    }

    fn write(&mut self, field: Field, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field], value)
    }

    /// The port of the sender, zero if it expects no answer.
    pub fn src_port(&self) -> u16 {
        self.read(field::SOURCE)
    }

    /// The port of the receiver.
    pub fn dst_port(&self) -> u16 {
        self.read(field::DESTINATION)
    }

    /// The length field, covering header and payload.
    pub fn length(&self) -> u16 {
        self.read(field::LENGTH)
    }

    /// The checksum field, zero when the sender computed none.
    pub fn checksum(&self) -> u16 {
        self.read(field::CHECKSUM)
    }

    /// The datagram within its length field, without padding.
    pub fn datagram_slice(&self) -> &[u8] {
        &self.0[..usize::from(self.length())]
    }

    /// The payload within the length field.
    pub fn payload_slice(&self) -> &[u8] {
        &self.datagram_slice()[field::HEADER_LEN..]
    }

    /// Set the port of the sender.
    pub fn set_src_port(&mut self, port: u16) {
        self.write(field::SOURCE, port)
    }

    /// Set the port of the receiver.
    pub fn set_dst_port(&mut self, port: u16) {
        self.write(field::DESTINATION, port)
    }

    /// Set the length field.
    pub fn set_length(&mut self, length: u16) {
        self.write(field::LENGTH, length)
    }

    /// Set the checksum field.
    pub fn set_checksum(&mut self, checksum: u16) {
        self.write(field::CHECKSUM, checksum)
    }
}

impl AsRef<[u8]> for udp {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// The header fields of a datagram.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Repr {
    /// Port of the sender.
    pub src_port: u16,
    /// Port of the receiver.
    pub dst_port: u16,
    /// Bytes following the header.
    pub payload_len: usize,
}

impl Repr {
    /// Read the header of a datagram, verifying its checksum if asked to.
    ///
    /// A zero checksum field means the sender computed none. That is accepted over IPv4 and
    /// malformed over IPv6, where the checksum is mandatory.
    pub fn parse(datagram: &udp, checksum: Checksum) -> Result<Repr> {
        datagram.check_len()?;

        if datagram.dst_port() == 0 {
            return Err(Error::Malformed);
        }

        if let Checksum::Manual { src_addr, dst_addr } = checksum {
            match datagram.checksum() {
                0 if src_addr.version() == Version::Ipv6 => return Err(Error::Malformed),
                0 => (),
                _ => if !checksum::verify(&src_addr, &dst_addr, Protocol::Udp, datagram.datagram_slice()) {
                    return Err(Error::WrongChecksum);
                },
            }
        }

        Ok(Repr {
            src_port: datagram.src_port(),
            dst_port: datagram.dst_port(),
            payload_len: datagram.payload_slice().len(),
        })
    }

    /// Header and payload length.
    pub fn buffer_len(&self) -> usize {
        field::HEADER_LEN + self.payload_len
    }

    /// Write the header into a buffer of at least eight bytes.
    ///
    /// The checksum is left zero, the caller patches it once the payload was summed.
    pub fn emit(&self, header: &mut udp) {
        header.set_src_port(self.src_port);
        header.set_dst_port(self.dst_port);
        header.set_length(self.buffer_len() as u16);
        header.set_checksum(0);
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} -> {} ({} bytes)", self.src_port, self.dst_port, self.payload_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::ip::Address;

    // Port 48896 to 53, four bytes of payload, no checksum.
    static DATAGRAM: [u8; 12] = [
        0xbf, 0x00, 0x00, 0x35,
        0x00, 0x0c, 0x00, 0x00,
        0xaa, 0x00, 0x00, 0xff,
    ];

    fn addresses() -> Checksum {
        Checksum::Manual {
            src_addr: Address::v4(192, 168, 1, 1),
            dst_addr: Address::v4(192, 168, 1, 2),
        }
    }

    #[test]
    fn header_fields() {
        let repr = Repr::parse(udp::new_checked(&DATAGRAM).unwrap(), Checksum::Ignored).unwrap();
        assert_eq!(repr, Repr { src_port: 48896, dst_port: 53, payload_len: 4 });
        assert_eq!(format!("{}", repr), "48896 -> 53 (4 bytes)");

        let mut bytes = [0xa5; 8];
        repr.emit(udp::new_unchecked_mut(&mut bytes));
        assert_eq!(&bytes[..], &DATAGRAM[..8]);
    }

    #[test]
    fn checksum_is_verified() {
        let (src, dst) = match addresses() {
            Checksum::Manual { src_addr, dst_addr } => (src_addr, dst_addr),
            Checksum::Ignored => unreachable!(),
        };
        let mut bytes = DATAGRAM;
        let value = checksum::pseudo_header_checksum(&src, &dst, Protocol::Udp, &bytes);
        udp::new_unchecked_mut(&mut bytes).set_checksum(value);
        assert!(Repr::parse(udp::new_checked(&bytes).unwrap(), addresses()).is_ok());

        bytes[11] = 0;
        assert_eq!(Repr::parse(udp::new_checked(&bytes).unwrap(), addresses()), Err(Error::WrongChecksum));
    }

    #[test]
    fn missing_checksum() {
        assert!(Repr::parse(udp::new_checked(&DATAGRAM).unwrap(), addresses()).is_ok());

        let v6 = Checksum::Manual {
            src_addr: Address::v6(0xfe80, 0, 0, 0, 0, 0, 0, 1),
            dst_addr: Address::v6(0xfe80, 0, 0, 0, 0, 0, 0, 2),
        };
        assert_eq!(Repr::parse(udp::new_checked(&DATAGRAM).unwrap(), v6), Err(Error::Malformed));
    }

    #[test]
    fn length_field() {
        let mut bytes = DATAGRAM;
        bytes[5] = 0x04;
        assert_eq!(udp::new_checked(&bytes).err(), Some(Error::Malformed));
        bytes[5] = 0x10;
        assert_eq!(udp::new_checked(&bytes).err(), Some(Error::Truncated));

        // Padding behind the datagram is not payload.
        let mut padded = DATAGRAM.to_vec();
        padded.extend_from_slice(&[0; 6]);
        let datagram = udp::new_checked(&padded).unwrap();
        assert_eq!(datagram.payload_slice(), &[0xaa, 0x00, 0x00, 0xff]);
    }
}
