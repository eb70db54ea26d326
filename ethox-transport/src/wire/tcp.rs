//! The header of the stream protocol.
//!
//! Only what the send engine needs to build segments and what tests need to read them back:
//! header fields, control flags, and the maximum segment size and window scale options.
use core::{cmp, fmt, ops};
use byteorder::{ByteOrder, NetworkEndian};

use super::{Checksum, Error, Result};
use super::field::Field;
use super::ip::{checksum, Protocol};

/// A position in the sequence space, which wraps at 2<sup>32</sup>.
///
/// Two numbers compare by their signed distance, so the order is meaningful for any pair less
/// than 2<sup>31</sup> apart. This is how every window of a connection is compared.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Hash)]
pub struct SeqNumber(pub i32);

impl SeqNumber {
    /// The later of two positions.
    pub fn max(self, other: Self) -> Self {
        cmp::max_by(self, other, Self::compare)
    }

    /// The earlier of two positions.
    pub fn min(self, other: Self) -> Self {
        cmp::min_by(self, other, Self::compare)
    }

    fn compare(a: &Self, b: &Self) -> cmp::Ordering {
        a.0.wrapping_sub(b.0).cmp(&0)
    }

    /// Convert a length in sequence space to a signed distance.
    ///
    /// # Panics
    /// When the distance does not fit, since no window is ever that large.
    fn distance(len: usize) -> i32 {
        assert!(len <= i32::max_value() as usize, "sequence distance {} exceeds the window space", len);
        len as i32
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&u32::from(*self), f)
    }
}

impl From<u32> for SeqNumber {
    fn from(raw: u32) -> Self {
        SeqNumber(raw as i32)
    }
}

impl From<SeqNumber> for u32 {
    fn from(seq: SeqNumber) -> u32 {
        seq.0 as u32
    }
}

impl ops::Add<usize> for SeqNumber {
    type Output = SeqNumber;

    fn add(self, len: usize) -> SeqNumber {
        SeqNumber(self.0.wrapping_add(Self::distance(len)))
    }
}

impl ops::Sub<usize> for SeqNumber {
    type Output = SeqNumber;

    fn sub(self, len: usize) -> SeqNumber {
        SeqNumber(self.0.wrapping_sub(Self::distance(len)))
    }
}

impl ops::AddAssign<usize> for SeqNumber {
    fn add_assign(&mut self, len: usize) {
        *self = *self + len;
    }
}

/// The length of sequence space from `rhs` up to `self`.
///
/// # Panics
/// When `rhs` is after `self`.
impl ops::Sub for SeqNumber {
    type Output = usize;

    fn sub(self, rhs: SeqNumber) -> usize {
        let diff = self.0.wrapping_sub(rhs.0);
        assert!(diff >= 0, "sequence number {} is before {}", self, rhs);
        diff as usize
    }
}

impl cmp::PartialOrd for SeqNumber {
    fn partial_cmp(&self, other: &SeqNumber) -> Option<cmp::Ordering> {
        Some(Self::compare(self, other))
    }
}

byte_wrapper! {
    /// A segment of the stream protocol, header and payload.
    #[derive(Debug, PartialEq, Eq)]
    pub struct tcp([u8]);
}

mod field {
    use crate::wire::field::*;

    pub(crate) const SOURCE: Field = 0..2;
    pub(crate) const DESTINATION: Field = 2..4;
    pub(crate) const SEQUENCE: Field = 4..8;
    pub(crate) const ACKNOWLEDGE: Field = 8..12;
    /// Data offset in the top four bits, the flags in the low nine.
    pub(crate) const CONTROL: Field = 12..14;
    pub(crate) const WINDOW: Field = 14..16;
    pub(crate) const CHECKSUM: Field = 16..18;
    pub(crate) const URGENT: Field = 18..20;

    pub(crate) const FIXED_LEN: usize = URGENT.end;

    pub(crate) fn options(header_len: usize) -> Field {
        FIXED_LEN..header_len
    }

    pub(crate) fn payload(header_len: usize) -> Rest {
        header_len..
    }

    pub(crate) const FLAG_MASK: u16 = 0x01ff;
    pub(crate) const OFFSET_SHIFT: u32 = 12;

    pub(crate) mod option {
        pub(crate) const END: u8 = 0;
        pub(crate) const NOOP: u8 = 1;
        pub(crate) const MSS: u8 = 2;
        pub(crate) const WINDOW_SCALE: u8 = 3;
    }
}

impl tcp {
    /// View a buffer as a segment without checking it.
    pub fn new_unchecked(data: &[u8]) -> &Self {
        Self::__from_macro_new_unchecked(data)
    }

    /// View a mutable buffer as a segment without checking it.
    pub fn new_unchecked_mut(data: &mut [u8]) -> &mut Self {
        Self::__from_macro_new_unchecked_mut(data)
    }

    /// View a buffer as a segment whose header accessors are all in bounds.
    pub fn new_checked(data: &[u8]) -> Result<&Self> {
        let segment = Self::new_unchecked(data);
        segment.check_len()?;
        Ok(segment)
    }

    /// The whole segment.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The whole segment, mutably.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }

    /// Check that the fixed header and the options announced by the data offset are present.
    ///
    /// A data offset below the fixed header is `Malformed`, a buffer shorter than it `Truncated`.
    pub fn check_len(&self) -> Result<()> {
        if self.0.len() < field::FIXED_LEN {
            return Err(Error::Truncated);
        }

        match usize::from(self.header_len()) {
            len if len < field::FIXED_LEN => Err(Error::Malformed),
            len if len > self.0.len() => Err(Error::Truncated),
            _ => Ok(()),
        }
    }

    fn read(&self, field: Field) -> u16 {
        NetworkEndian::read_u16(&self.0[field])
    }

    fn write(&mut self, field: Field, value: u16) {
        NetworkEndian::write_u16(&mut self.0[field], value)
    }

    /// The port of the sender.
    pub fn src_port(&self) -> u16 {
        self.read(field::SOURCE)
    }

    /// The port of the receiver.
    pub fn dst_port(&self) -> u16 {
        self.read(field::DESTINATION)
    }

    /// The sequence number of the first byte.
    pub fn seq_number(&self) -> SeqNumber {
        SeqNumber(NetworkEndian::read_i32(&self.0[field::SEQUENCE]))
    }

    /// The acknowledgement field, meaningful only with the ACK flag.
    pub fn ack_number(&self) -> SeqNumber {
        SeqNumber(NetworkEndian::read_i32(&self.0[field::ACKNOWLEDGE]))
    }

    /// The control flags.
    pub fn flags(&self) -> Flags {
        Flags(self.read(field::CONTROL) & field::FLAG_MASK)
    }

    /// The header length in bytes, from the data offset.
    pub fn header_len(&self) -> u8 {
        let words = self.read(field::CONTROL) >> field::OFFSET_SHIFT;
        (words * 4) as u8
    }

    /// The raw window field, not scaled.
    pub fn window_len(&self) -> u16 {
        self.read(field::WINDOW)
    }

    /// The checksum field.
    pub fn checksum(&self) -> u16 {
        self.read(field::CHECKSUM)
    }

    /// The urgent pointer, meaningful only with the URG flag.
    pub fn urgent_at(&self) -> u16 {
        self.read(field::URGENT)
    }

    /// The raw option bytes between the fixed header and the payload.
    pub fn options(&self) -> &[u8] {
        &self.0[field::options(self.header_len().into())]
    }

    /// The options as parsed items.
    pub fn option_iter(&self) -> OptionIter<'_> {
        OptionIter { rest: self.options() }
    }

    /// The data after the header.
    pub fn payload_slice(&self) -> &[u8] {
        &self.0[field::payload(self.header_len().into())]
    }

    /// The sequence space taken by the segment, its payload plus SYN and FIN.
    pub fn sequence_len(&self) -> usize {
        self.payload_slice().len() + self.flags().sequence_len()
    }

    /// Set the port of the sender.
    pub fn set_src_port(&mut self, port: u16) {
        self.write(field::SOURCE, port)
    }

    /// Set the port of the receiver.
    pub fn set_dst_port(&mut self, port: u16) {
        self.write(field::DESTINATION, port)
    }

    /// Set the sequence number field.
    pub fn set_seq_number(&mut self, seq: SeqNumber) {
        NetworkEndian::write_i32(&mut self.0[field::SEQUENCE], seq.0)
    }

    /// Set the acknowledgement field.
    pub fn set_ack_number(&mut self, ack: SeqNumber) {
        NetworkEndian::write_i32(&mut self.0[field::ACKNOWLEDGE], ack.0)
    }

    /// Replace the flags, the data offset stays as it is.
    pub fn set_flags(&mut self, flags: Flags) {
        let offset = self.read(field::CONTROL) & !field::FLAG_MASK;
        self.write(field::CONTROL, offset | (flags.0 & field::FLAG_MASK))
    }

    /// Set the data offset from a header length in bytes, a multiple of four.
    pub fn set_header_len(&mut self, len: u8) {
        let flags = self.read(field::CONTROL) & field::FLAG_MASK;
        let words = u16::from(len / 4) << field::OFFSET_SHIFT;
        self.write(field::CONTROL, words | flags)
    }

    /// Set the window field.
    pub fn set_window_len(&mut self, window: u16) {
        self.write(field::WINDOW, window)
    }

    /// Set the checksum field.
    pub fn set_checksum(&mut self, checksum: u16) {
        self.write(field::CHECKSUM, checksum)
    }

    /// Set the urgent pointer field.
    pub fn set_urgent_at(&mut self, pointer: u16) {
        self.write(field::URGENT, pointer)
    }

    /// The option bytes, sized by the current data offset.
    pub fn options_mut(&mut self) -> &mut [u8] {
        let options = field::options(self.header_len().into());
        &mut self.0[options]
    }
}

impl AsRef<[u8]> for tcp {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// The control flags of a segment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Flags(pub u16);

macro_rules! control_flags {
    ($($name:literal: $get:ident, $set:ident = $bit:expr;)*) => {
        impl Flags {
            $(
                #[doc = concat!("Whether ", $name, " is set.")]
                pub fn $get(&self) -> bool {
                    self.0 & $bit != 0
                }

                #[doc = concat!("Set or clear ", $name, ".")]
                pub fn $set(&mut self, value: bool) {
                    self.assign($bit, value)
                }
            )*

            const NAMES: &'static [(u16, &'static str)] = &[$(($bit, $name)),*];
        }
    };
}

control_flags! {
    "SYN": syn, set_syn = 0x002;
    "FIN": fin, set_fin = 0x001;
    "RST": rst, set_rst = 0x004;
    "PSH": psh, set_psh = 0x008;
    "ACK": ack, set_ack = 0x010;
    "URG": urg, set_urg = 0x020;
}

impl Flags {
    /// No flag set.
    pub const EMPTY: Flags = Flags(0);

    /// SYN and FIN each take one number of sequence space.
    pub fn sequence_len(self) -> usize {
        usize::from(self.syn()) + usize::from(self.fin())
    }

    fn assign(&mut self, bit: u16, value: bool) {
        if value {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut set = Self::NAMES.iter().filter(|(bit, _)| self.0 & bit != 0);
        match set.next() {
            None => f.write_str("-"),
            Some((_, first)) => {
                f.write_str(first)?;
                set.try_for_each(|(_, name)| write!(f, "|{}", name))
            },
        }
    }
}

/// One entry of the option list.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TcpOption<'a> {
    /// Terminates the list, everything after it is padding.
    EndOfList,
    /// Single byte filler for alignment.
    NoOperation,
    /// The largest payload the sender accepts in one segment.
    MaxSegmentSize(u16),
    /// The shift applied to the sender's window field.
    WindowScale(u8),
    /// Options this crate passes over.
    Unknown {
        /// The option kind.
        kind: u8,
        /// Data after the kind and length bytes.
        data: &'a [u8],
    },
}

impl<'a> TcpOption<'a> {
    /// Split the first option off a list.
    pub fn parse(buffer: &'a [u8]) -> Result<(&'a [u8], TcpOption<'a>)> {
        let kind = *buffer.first().ok_or(Error::Truncated)?;
        if kind == field::option::END || kind == field::option::NOOP {
            let option = if kind == field::option::END {
                TcpOption::EndOfList
            } else {
                TcpOption::NoOperation
            };
            return Ok((&buffer[1..], option));
        }

        let len = usize::from(*buffer.get(1).ok_or(Error::Truncated)?);
        if len < 2 {
            return Err(Error::Malformed);
        }
        let data = buffer.get(2..len).ok_or(Error::Truncated)?;
        let option = match kind {
            field::option::MSS if data.len() == 2 => TcpOption::MaxSegmentSize(NetworkEndian::read_u16(data)),
            field::option::WINDOW_SCALE if data.len() == 1 => TcpOption::WindowScale(data[0]),
            field::option::MSS | field::option::WINDOW_SCALE => return Err(Error::Malformed),
            kind => TcpOption::Unknown { kind, data },
        };
        Ok((&buffer[len..], option))
    }

    /// The bytes the option takes in the list.
    pub fn buffer_len(&self) -> usize {
        match self {
            TcpOption::EndOfList | TcpOption::NoOperation => 1,
            TcpOption::MaxSegmentSize(_) => 4,
            TcpOption::WindowScale(_) => 3,
            TcpOption::Unknown { data, .. } => data.len() + 2,
        }
    }

    /// Write the option to the front of `buffer` and return what is left.
    ///
    /// The end of list marker also fills the remainder, which is padding.
    pub fn emit<'b>(&self, buffer: &'b mut [u8]) -> &'b mut [u8] {
        let len = self.buffer_len();
        let (head, rest) = buffer.split_at_mut(len);
        match *self {
            TcpOption::EndOfList => {
                head[0] = field::option::END;
                rest.iter_mut().for_each(|pad| *pad = field::option::END);
            },
            TcpOption::NoOperation => head[0] = field::option::NOOP,
            TcpOption::MaxSegmentSize(mss) => {
                head[..2].copy_from_slice(&[field::option::MSS, len as u8]);
                NetworkEndian::write_u16(&mut head[2..], mss);
            },
            TcpOption::WindowScale(shift) => {
                head.copy_from_slice(&[field::option::WINDOW_SCALE, len as u8, shift]);
            },
            TcpOption::Unknown { kind, data } => {
                head[..2].copy_from_slice(&[kind, len as u8]);
                head[2..].copy_from_slice(data);
            },
        }
        rest
    }
}

/// Iterates the options of a segment up to the end of list marker.
#[derive(Debug, Clone)]
pub struct OptionIter<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for OptionIter<'a> {
    type Item = Result<TcpOption<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }

        match TcpOption::parse(self.rest) {
            Ok((_, TcpOption::EndOfList)) => {
                self.rest = &[];
                None
            },
            Ok((rest, option)) => {
                self.rest = rest;
                Some(Ok(option))
            },
            Err(error) => {
                self.rest = &[];
                Some(Err(error))
            },
        }
    }
}

/// The header fields of a segment that the stream layer works with.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Repr {
    /// Port of the sender.
    pub src_port: u16,
    /// Port of the receiver.
    pub dst_port: u16,
    /// Position of the first byte of sequence space, the SYN if set.
    pub seq_number: SeqNumber,
    /// Present exactly when the ACK flag is set.
    pub ack_number: Option<SeqNumber>,
    /// Control flags other than ACK and URG, which follow their fields.
    pub flags: Flags,
    /// The window field, not scaled.
    pub window_len: u16,
    /// The window scale option, capped at 14.
    pub window_scale: Option<u8>,
    /// The maximum segment size option.
    pub max_seg_size: Option<u16>,
    /// Present exactly when the URG flag is set.
    pub urgent_at: Option<u16>,
}

impl Repr {
    /// Largest window scale shift a peer may announce.
    const MAX_WINDOW_SCALE: u8 = 14;

    /// Read the header of a segment, verifying its checksum if asked to.
    pub fn parse(segment: &tcp, checksum: Checksum) -> Result<Repr> {
        segment.check_len()?;

        if segment.src_port() == 0 || segment.dst_port() == 0 {
            return Err(Error::Malformed);
        }

        if let Checksum::Manual { src_addr, dst_addr } = checksum {
            if !checksum::verify(&src_addr, &dst_addr, Protocol::Tcp, segment.as_bytes()) {
                return Err(Error::WrongChecksum);
            }
        }

        let mut repr = Repr {
            src_port: segment.src_port(),
            dst_port: segment.dst_port(),
            seq_number: segment.seq_number(),
            ack_number: None,
            flags: segment.flags(),
            window_len: segment.window_len(),
            window_scale: None,
            max_seg_size: None,
            urgent_at: None,
        };

        if repr.flags.ack() {
            repr.ack_number = Some(segment.ack_number());
        }
        if repr.flags.urg() {
            repr.urgent_at = Some(segment.urgent_at());
        }
        repr.flags.set_ack(false);
        repr.flags.set_urg(false);

        for option in segment.option_iter() {
            match option? {
                TcpOption::MaxSegmentSize(mss) => repr.max_seg_size = Some(mss),
                TcpOption::WindowScale(shift) => repr.window_scale = Some(shift.min(Self::MAX_WINDOW_SCALE)),
                _ => (),
            }
        }

        Ok(repr)
    }

    /// The header length including options, padded to whole words.
    pub fn header_len(&self) -> usize {
        let options = self.max_seg_size.map_or(0, |_| 4) + self.window_scale.map_or(0, |_| 3);
        (field::FIXED_LEN + options + 3) / 4 * 4
    }

    /// The sequence space of a segment with this header and `payload_len` data bytes.
    pub fn sequence_len(&self, payload_len: usize) -> usize {
        self.flags.sequence_len() + payload_len
    }

    /// Write the header into a buffer of exactly `header_len` bytes.
    ///
    /// The checksum is left zero. The payload is usually scattered over borrowed buffers so the
    /// caller sums it separately and patches the field with `tcp::set_checksum`.
    pub fn emit(&self, segment: &mut tcp) {
        let mut flags = self.flags;
        flags.set_ack(self.ack_number.is_some());
        flags.set_urg(self.urgent_at.is_some());

        segment.set_src_port(self.src_port);
        segment.set_dst_port(self.dst_port);
        segment.set_seq_number(self.seq_number);
        segment.set_ack_number(self.ack_number.unwrap_or_default());
        segment.set_header_len(self.header_len() as u8);
        segment.set_flags(flags);
        segment.set_window_len(self.window_len);
        segment.set_checksum(0);
        segment.set_urgent_at(self.urgent_at.unwrap_or_default());

        let options = [
            self.max_seg_size.map(TcpOption::MaxSegmentSize),
            self.window_scale.map(TcpOption::WindowScale),
        ];
        let rest = options.iter().flatten()
            .fold(segment.options_mut(), |buffer, option| option.emit(buffer));
        if !rest.is_empty() {
            TcpOption::EndOfList.emit(rest);
        }
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} -> {} [{}] seq {}", self.src_port, self.dst_port, self.flags, self.seq_number)?;
        if let Some(ack) = self.ack_number {
            write!(f, " ack {}", ack)?;
        }
        write!(f, " win {}", self.window_len)?;
        if let Some(mss) = self.max_seg_size {
            write!(f, " mss {}", mss)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::ip::Address;

    // Port 48896 to 80, SYN with seq 0x01234567, window 0x0123 and an MSS of 1460.
    static SYN_WITH_MSS: [u8; 24] = [
        0xbf, 0x00, 0x00, 0x50,
        0x01, 0x23, 0x45, 0x67,
        0x00, 0x00, 0x00, 0x00,
        0x60, 0x02, 0x01, 0x23,
        0x00, 0x00, 0x00, 0x00,
        0x02, 0x04, 0x05, 0xb4,
    ];

    fn syn() -> Repr {
        let mut flags = Flags::EMPTY;
        flags.set_syn(true);
        Repr {
            src_port: 48896,
            dst_port: 80,
            seq_number: SeqNumber(0x0123_4567),
            ack_number: None,
            flags,
            window_len: 0x0123,
            window_scale: None,
            max_seg_size: Some(1460),
            urgent_at: None,
        }
    }

    #[test]
    fn syn_matches_reference_bytes() {
        let repr = syn();
        assert_eq!(repr.header_len(), 24);
        let mut bytes = [0xa5; 24];
        repr.emit(tcp::new_unchecked_mut(&mut bytes));
        assert_eq!(bytes, SYN_WITH_MSS);

        let segment = tcp::new_checked(&SYN_WITH_MSS).unwrap();
        assert_eq!(segment.header_len(), 24);
        assert_eq!(segment.sequence_len(), 1);
        assert_eq!(Repr::parse(segment, Checksum::Ignored), Ok(repr));
    }

    #[test]
    fn options_are_padded() {
        let mut repr = syn();
        repr.window_scale = Some(7);
        assert_eq!(repr.header_len(), 28);
        let mut bytes = [0xa5; 28];
        repr.emit(tcp::new_unchecked_mut(&mut bytes));
        assert_eq!(&bytes[20..], &[2, 4, 0x05, 0xb4, 3, 3, 7, 0]);

        let segment = tcp::new_checked(&bytes).unwrap();
        let options: Vec<_> = segment.option_iter().collect();
        assert_eq!(options, vec![Ok(TcpOption::MaxSegmentSize(1460)), Ok(TcpOption::WindowScale(7))]);
        assert_eq!(Repr::parse(segment, Checksum::Ignored), Ok(repr));
    }

    #[test]
    fn checksum_is_verified() {
        let src = Address::v4(10, 0, 0, 1);
        let dst = Address::v4(10, 0, 0, 2);
        let mut bytes = SYN_WITH_MSS.to_vec();
        bytes.extend_from_slice(b"abc");
        let value = checksum::pseudo_header_checksum(&src, &dst, Protocol::Tcp, &bytes);
        tcp::new_unchecked_mut(&mut bytes).set_checksum(value);

        let segment = tcp::new_checked(&bytes).unwrap();
        assert_eq!(segment.payload_slice(), b"abc");
        let matching = Checksum::Manual { src_addr: src, dst_addr: dst };
        assert!(Repr::parse(segment, matching).is_ok());

        let other = Checksum::Manual { src_addr: dst, dst_addr: Address::v4(10, 0, 0, 3) };
        assert_eq!(Repr::parse(segment, other), Err(Error::WrongChecksum));
    }

    #[test]
    fn bad_data_offset() {
        assert_eq!(tcp::new_checked(&SYN_WITH_MSS[..19]).err(), Some(Error::Truncated));
        let mut bytes = SYN_WITH_MSS;
        // Four words, shorter than the fixed header.
        bytes[12] = 0x40;
        assert_eq!(tcp::new_checked(&bytes).err(), Some(Error::Malformed));
        // Fifteen words, longer than the buffer.
        bytes[12] = 0xf0;
        assert_eq!(tcp::new_checked(&bytes).err(), Some(Error::Truncated));
    }

    #[test]
    fn broken_mss_option() {
        let mut bytes = SYN_WITH_MSS;
        bytes[21] = 3;
        let segment = tcp::new_checked(&bytes).unwrap();
        assert_eq!(Repr::parse(segment, Checksum::Ignored), Err(Error::Malformed));
    }

    #[test]
    fn wrapping_sequence_space() {
        let before = SeqNumber(i32::max_value() - 1);
        let after = before + 4;
        assert!(after > before);
        assert_eq!(after - before, 4);
        assert_eq!(before.max(after), after);
        assert_eq!(after.min(before), before);
        assert_eq!(after - 4usize, before);
        assert_eq!(format!("{}", SeqNumber(-1)), "4294967295");
    }

    #[test]
    #[should_panic]
    fn negative_distance() {
        let _ = SeqNumber(10) - SeqNumber(11);
    }

    #[test]
    fn flag_names() {
        let mut flags = Flags::EMPTY;
        assert_eq!(format!("{}", flags), "-");
        flags.set_ack(true);
        flags.set_syn(true);
        assert_eq!(format!("{}", flags), "SYN|ACK");
        flags.set_syn(false);
        assert_eq!(flags.sequence_len(), 0);
        assert_eq!(format!("{}", flags), "ACK");
    }
}
