//! Bit-accurate CAN 2.0 / CAN-FD frame encoding.
//!
//! [`encode`] turns a [`FrameSpec`] into a [`Frame`]: the full wire bit
//! sequence from SOF through IFS, complete with bit stuffing, CRC, and (for
//! CAN-FD) fixed stuff bits around the stuff-count field and the CRC.

use crate::error::EncodeError;
use embedded_can::{Id, StandardId};

/// Gray code for 0..=7, indexed by binary value, MSB first when read off
/// the top three bits of each entry.
const GRAY3: [u8; 8] = [0b000, 0b001, 0b011, 0b010, 0b110, 0b111, 0b101, 0b100];

/// Everything the encoder needs to build one CAN frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSpec {
    /// Base 11-bit identifier (standard ID, or the top 11 bits of an
    /// extended ID).
    pub id_a: u16,
    /// Extended-ID low 18 bits. Ignored unless `ide`.
    pub id_b: u32,
    /// Remote-frame request. Meaningless (and ignored during encoding) for
    /// FD frames, which have no RTR bit.
    pub rtr: bool,
    /// Extended (29-bit) identifier.
    pub ide: bool,
    /// Data length code, `0..=15`.
    pub dlc: u8,
    /// Payload bytes. Only the first [`FrameSpec::payload_len`] are used.
    pub data: [u8; 64],
    /// CAN-FD format.
    pub fd: bool,
    /// Bit-rate switch (FD only).
    pub brs: bool,
    /// Error-state indicator (FD only). `true` means the transmitter
    /// reports itself error-passive, which is wired as a *dominant* ESI
    /// bit — see [`encode`]'s handling of this field.
    pub esi: bool,
}

impl FrameSpec {
    /// Builds a spec from an [`embedded_can::Id`], splitting an extended ID
    /// into its 11-bit/18-bit wire halves.
    pub fn new(id: Id, rtr: bool, dlc: u8, data: &[u8], fd: bool, brs: bool, esi: bool) -> Self {
        let (id_a, id_b, ide) = match id {
            Id::Standard(sid) => (sid.as_raw(), 0u32, false),
            Id::Extended(eid) => {
                let raw = eid.as_raw();
                (((raw >> 18) & 0x7FF) as u16, raw & 0x3_FFFF, true)
            }
        };
        let mut buf = [0u8; 64];
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Self {
            id_a,
            id_b,
            rtr,
            ide,
            dlc: dlc.min(15),
            data: buf,
            fd,
            brs,
            esi,
        }
    }

    /// A basic (11-bit, non-FD) data frame spec, the common case in tests
    /// and examples.
    pub fn standard_data(id: u16, data: &[u8]) -> Self {
        Self::new(
            Id::Standard(StandardId::new(id).unwrap_or_else(|| StandardId::new(0).unwrap())),
            false,
            data.len() as u8,
            data,
            false,
            false,
            false,
        )
    }

    /// Payload length in bytes, derived from `dlc`, `rtr` and `fd` per the
    /// CAN 2.0 / CAN-FD length tables.
    pub fn payload_len(&self) -> usize {
        if self.rtr && !self.fd {
            return 0;
        }
        if self.fd {
            match self.dlc {
                0..=8 => self.dlc as usize,
                9..=12 => 4 * (self.dlc as usize - 6),
                13 => 32,
                14 | 15 => 16 * (self.dlc as usize - 11),
                _ => unreachable!("dlc is clamped to 0..=15"),
            }
        } else {
            self.dlc.min(8) as usize
        }
    }

    fn crc_params(&self) -> (u32, u32, u32) {
        if !self.fd {
            (15, 0x4599, 0)
        } else if self.dlc <= 10 {
            (17, 0x3685B, 1 << 16)
        } else {
            (21, 0x302899, 1 << 20)
        }
    }
}

/// A fully encoded CAN frame: the wire bitstream plus the landmarks the bit
/// engine needs to drive it (arbitration end, BRS position, CRC/EOF bounds).
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    /// The transmitted bit sequence, SOF through the end of IFS.
    pub tx_bitstream: [bool; Self::CAPACITY],
    /// `true` at indices that are stuff bits (dynamic or fixed).
    pub stuff_bit: [bool; Self::CAPACITY],
    /// Number of valid bits in `tx_bitstream`/`stuff_bit`.
    pub tx_bits: usize,
    /// Index of the last arbitration-field bit (IDE for standard frames,
    /// the trailing RTR/RRS bit for extended frames).
    pub last_arbitration_bit: usize,
    /// Index of the BRS bit, if this is an FD frame with BRS set.
    pub brs_bit: Option<usize>,
    /// Index of the last DLC bit.
    pub last_dlc_bit: usize,
    /// Index of the last payload bit (or the last DLC bit, for a
    /// zero-length payload).
    pub last_data_bit: usize,
    /// Index of the last CRC bit.
    pub last_crc_bit: usize,
    /// Index of the last EOF bit; `last_eof_bit+1..=last_eof_bit+3` are IFS.
    pub last_eof_bit: usize,
    /// CAN-FD format.
    pub fd: bool,
    /// Bit-rate switch asserted.
    pub brs: bool,
    /// Total stuff bits counted into the FD stuff-count field.
    pub stuff_count: u8,
    /// Whether this frame has been populated by [`encode`].
    pub frame_set: bool,
}

impl Frame {
    /// Upper bound on encoded frame length. 64 bytes of FD payload plus
    /// worst-case dynamic and fixed stuffing comfortably fits in 700 bits.
    pub const CAPACITY: usize = 700;

    /// An empty, unpopulated frame.
    pub const fn new() -> Self {
        Self {
            tx_bitstream: [false; Self::CAPACITY],
            stuff_bit: [false; Self::CAPACITY],
            tx_bits: 0,
            last_arbitration_bit: 0,
            brs_bit: None,
            last_dlc_bit: 0,
            last_data_bit: 0,
            last_crc_bit: 0,
            last_eof_bit: 0,
            fd: false,
            brs: false,
            stuff_count: 0,
            frame_set: false,
        }
    }

    /// Number of arbitration-field bits, i.e. `last_arbitration_bit + 1`.
    pub fn tx_arbitration_bits(&self) -> usize {
        self.last_arbitration_bit + 1
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

struct Builder<'a> {
    frame: &'a mut Frame,
    n: usize,
    crc: u32,
    width: u32,
    poly: u32,
    crcing: bool,
    stuffing: bool,
    fd: bool,
    run_bit: bool,
    run_len: u8,
    stuff_count: u8,
}

impl<'a> Builder<'a> {
    fn push_raw(&mut self, bit: bool, stuff: bool) -> Result<(), EncodeError> {
        if self.n >= Frame::CAPACITY {
            return Err(EncodeError::TooManyBits);
        }
        self.frame.tx_bitstream[self.n] = bit;
        self.frame.stuff_bit[self.n] = stuff;
        self.n += 1;
        Ok(())
    }

    fn step_crc(&mut self, bit: bool) {
        let top = (self.crc >> (self.width - 1)) & 1;
        let mask = (1u32 << self.width) - 1;
        self.crc = (self.crc << 1) & mask;
        if (bit as u32) ^ top != 0 {
            self.crc ^= self.poly;
        }
    }

    /// Appends a bit, subject to CRC accumulation and dynamic bit stuffing.
    fn add_bit(&mut self, bit: bool) -> Result<(), EncodeError> {
        self.push_raw(bit, false)?;
        if self.crcing {
            self.step_crc(bit);
        }
        if bit == self.run_bit {
            self.run_len += 1;
        } else {
            self.run_bit = bit;
            self.run_len = 1;
        }
        if self.stuffing && self.run_len == 5 {
            let stuff = !bit;
            self.push_raw(stuff, true)?;
            if self.fd && self.crcing {
                self.step_crc(stuff);
            }
            self.run_bit = stuff;
            self.run_len = 1;
            self.stuff_count = self.stuff_count.wrapping_add(1);
        }
        Ok(())
    }

    /// Appends a fixed stuff bit (FD stuff-count framing, FD CRC framing):
    /// unconditional, not subject to the five-in-a-row rule, and restarts
    /// the run-length tracker at this bit so dynamic stuffing (already
    /// disabled by the time these are used) doesn't double up.
    fn emit_fixed_stuff(&mut self, bit: bool) -> Result<(), EncodeError> {
        self.push_raw(bit, true)?;
        if self.fd && self.crcing {
            self.step_crc(bit);
        }
        self.run_bit = bit;
        self.run_len = 1;
        self.stuff_count = self.stuff_count.wrapping_add(1);
        Ok(())
    }

    fn add_bits_msb(&mut self, value: u32, width: u32) -> Result<(), EncodeError> {
        for i in (0..width).rev() {
            self.add_bit((value >> i) & 1 != 0)?;
        }
        Ok(())
    }
}

/// Encodes `spec` into `frame`, overwriting it completely.
///
/// Fails only if the resulting bitstream would exceed [`Frame::CAPACITY`]
/// bits, which cannot happen for any in-range `FrameSpec` (`dlc <= 15`).
pub fn encode(spec: &FrameSpec, frame: &mut Frame) -> Result<(), EncodeError> {
    let (width, poly, init) = spec.crc_params();
    *frame = Frame::new();
    let mut b = Builder {
        frame,
        n: 0,
        crc: init,
        width,
        poly,
        crcing: true,
        stuffing: true,
        fd: spec.fd,
        run_bit: true,
        run_len: 0,
        stuff_count: 0,
    };

    // SOF
    b.add_bit(false)?;

    // ID-A, 11 bits MSB first
    b.add_bits_msb(spec.id_a as u32, 11)?;

    // RTR/SRR/RRS
    let first_bit = if spec.ide {
        true
    } else if spec.fd {
        false
    } else {
        spec.rtr
    };
    b.add_bit(first_bit)?;

    // IDE
    b.add_bit(spec.ide)?;
    b.frame.last_arbitration_bit = b.n - 1;

    if spec.ide {
        b.add_bits_msb(spec.id_b, 18)?;
        let rtr_bit = if spec.fd { false } else { spec.rtr };
        b.add_bit(rtr_bit)?;
        b.frame.last_arbitration_bit = b.n - 1;
    }

    // r1 / FDF
    if spec.fd {
        b.add_bit(true)?;
    } else if spec.ide {
        b.add_bit(false)?;
    }

    // r0
    b.add_bit(false)?;

    // BRS / ESI
    if spec.fd {
        b.add_bit(spec.brs)?;
        if spec.brs {
            b.frame.brs_bit = Some(b.n - 1);
        }
        b.add_bit(!spec.esi)?;
    }

    // DLC, 4 bits MSB first
    b.add_bits_msb(spec.dlc as u32, 4)?;
    b.frame.last_dlc_bit = b.n - 1;

    // Data
    let len = spec.payload_len();
    for byte_idx in 0..len {
        for bit_idx in (0..8u32).rev() {
            if spec.fd && byte_idx + 1 == len && bit_idx == 0 {
                b.stuffing = false;
            }
            b.add_bit((spec.data[byte_idx] >> bit_idx) & 1 != 0)?;
        }
    }
    if spec.fd && len == 0 {
        b.stuffing = false;
    }
    b.frame.last_data_bit = b.n - 1;

    if spec.fd {
        let last_val = b.frame.tx_bitstream[b.frame.last_data_bit];
        b.emit_fixed_stuff(!last_val)?;
        b.stuff_count = b.stuff_count.saturating_sub(1);

        let gray = GRAY3[(b.stuff_count & 7) as usize];
        b.add_bits_msb(gray as u32, 3)?;

        let parity = (b.stuff_count & 1) != 0;
        b.add_bit(parity)?;
        b.emit_fixed_stuff(!parity)?;

        b.crcing = false;
        for i in (0..width).rev() {
            let crc_bit = (b.crc >> i) & 1 != 0;
            b.add_bit(crc_bit)?;
            let emitted = width - i;
            if emitted % 4 == 0 {
                b.emit_fixed_stuff(!crc_bit)?;
            }
        }
    } else {
        b.crcing = false;
        for i in (0..width).rev() {
            let crc_bit = (b.crc >> i) & 1 != 0;
            b.add_bit(crc_bit)?;
        }
    }
    b.frame.last_crc_bit = b.n - 1;
    b.stuffing = false;

    // CRC delimiter, ACK (self-driven dominant), ACK delimiter
    b.add_bit(true)?;
    b.add_bit(false)?;
    b.add_bit(true)?;

    // EOF
    for _ in 0..7 {
        b.add_bit(true)?;
    }
    b.frame.last_eof_bit = b.n - 1;

    // IFS
    for _ in 0..3 {
        b.add_bit(true)?;
    }

    frame.tx_bits = b.n;
    frame.fd = spec.fd;
    frame.brs = spec.brs;
    frame.stuff_count = b.stuff_count;
    frame.frame_set = true;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn count_stuff_bits(frame: &Frame, upto: usize) -> usize {
        frame.stuff_bit[..=upto].iter().filter(|&&s| s).count()
    }

    #[test]
    fn basic_data_frame_layout() {
        let spec = FrameSpec::standard_data(0x123, &[0xA5]);
        let mut frame = Frame::new();
        encode(&spec, &mut frame).unwrap();

        assert!(frame.frame_set);
        assert!(!frame.tx_bitstream[0], "SOF must be dominant");
        assert!(
            frame.tx_bitstream[frame.last_eof_bit + 1]
                && frame.tx_bitstream[frame.last_eof_bit + 2]
                && frame.tx_bitstream[frame.last_eof_bit + 3],
            "IFS must be recessive"
        );
        // ACK slot: CRC delimiter, ACK, ACK delimiter immediately follow the CRC field.
        assert!(frame.tx_bitstream[frame.last_crc_bit + 1], "CRC delimiter recessive");
        assert!(!frame.tx_bitstream[frame.last_crc_bit + 2], "self-driven ACK dominant");
        assert!(frame.tx_bitstream[frame.last_crc_bit + 3], "ACK delimiter recessive");
    }

    #[test]
    fn extended_remote_frame_has_no_payload() {
        let id = Id::Extended(embedded_can::ExtendedId::new(0x1FF3FFFF).unwrap());
        let spec = FrameSpec::new(id, true, 0, &[], false, false, false);
        let mut frame = Frame::new();
        encode(&spec, &mut frame).unwrap();
        assert_eq!(frame.last_data_bit, frame.last_dlc_bit);
    }

    #[test]
    fn fd_frame_sets_brs_and_stuff_count_fields() {
        let spec = FrameSpec::new(
            Id::Standard(StandardId::new(0x7FF).unwrap()),
            false,
            15,
            &[0u8; 64],
            true,
            true,
            false,
        );
        let mut frame = Frame::new();
        encode(&spec, &mut frame).unwrap();
        assert!(frame.fd);
        assert!(frame.brs);
        assert!(frame.brs_bit.is_some());
        // ESI false (not error-passive) wires as recessive.
        let brs_bit = frame.brs_bit.unwrap();
        assert!(frame.tx_bitstream[brs_bit + 1], "esi=false wires recessive");
    }

    #[test]
    fn no_run_of_six_equal_non_stuff_bits_through_crc_field() {
        let spec = FrameSpec::standard_data(0x555, &[0xFF, 0x00, 0xFF, 0x00]);
        let mut frame = Frame::new();
        encode(&spec, &mut frame).unwrap();

        let mut run_bit = frame.tx_bitstream[0];
        let mut run_len = 1u32;
        for i in 1..=frame.last_crc_bit {
            if frame.stuff_bit[i] {
                run_bit = frame.tx_bitstream[i];
                run_len = 1;
                continue;
            }
            if frame.tx_bitstream[i] == run_bit {
                run_len += 1;
            } else {
                run_bit = frame.tx_bitstream[i];
                run_len = 1;
            }
            assert!(run_len < 6, "run of {run_len} equal non-stuff bits at index {i}");
        }
        assert!(count_stuff_bits(&frame, frame.last_crc_bit) > 0);
    }

    #[test]
    fn dlc_to_payload_len_matches_fd_table() {
        let mut spec = FrameSpec::standard_data(0, &[0u8; 64]);
        spec.fd = true;
        for (dlc, len) in [
            (0u8, 0usize),
            (8, 8),
            (9, 12),
            (10, 16),
            (11, 20),
            (12, 24),
            (13, 32),
            (14, 48),
            (15, 64),
        ] {
            spec.dlc = dlc;
            assert_eq!(spec.payload_len(), len, "dlc={dlc}");
        }
    }

    /// Strips stuff bits out of `frame.tx_bitstream` and decodes the
    /// arbitration/control/data fields of a non-FD extended data frame back
    /// into `(id_a, id_b, rtr, ide, dlc, data)`, far short of a general
    /// decoder but enough to exercise the round-trip property against the
    /// encoder's own output.
    fn decode_extended_data_frame(frame: &Frame) -> (u16, u32, bool, bool, u8, [u8; 8]) {
        let mut bits = [false; Frame::CAPACITY];
        let mut n = 0usize;
        for i in 0..frame.tx_bits {
            if !frame.stuff_bit[i] {
                bits[n] = frame.tx_bitstream[i];
                n += 1;
            }
        }

        let mut idx = 1usize; // skip SOF
        let mut id_a = 0u16;
        for _ in 0..11 {
            id_a = (id_a << 1) | bits[idx] as u16;
            idx += 1;
        }
        idx += 1; // SRR
        let ide = bits[idx];
        idx += 1;
        let mut id_b = 0u32;
        for _ in 0..18 {
            id_b = (id_b << 1) | bits[idx] as u32;
            idx += 1;
        }
        let rtr = bits[idx];
        idx += 1;
        idx += 1; // r1
        idx += 1; // r0
        let mut dlc = 0u8;
        for _ in 0..4 {
            dlc = (dlc << 1) | bits[idx] as u8;
            idx += 1;
        }
        let mut data = [0u8; 8];
        for byte in data.iter_mut().take(dlc as usize) {
            let mut b = 0u8;
            for _ in 0..8 {
                b = (b << 1) | bits[idx] as u8;
                idx += 1;
            }
            *byte = b;
        }
        (id_a, id_b, rtr, ide, dlc, data)
    }

    #[test]
    fn round_trip_decode_matches_spec_fields() {
        let id = Id::Extended(embedded_can::ExtendedId::new(0x1FF3FFFF).unwrap());
        let spec = FrameSpec::new(id, false, 3, &[0x11, 0x22, 0x33], false, false, false);
        let mut frame = Frame::new();
        encode(&spec, &mut frame).unwrap();

        let (id_a, id_b, rtr, ide, dlc, data) = decode_extended_data_frame(&frame);
        assert_eq!(id_a, spec.id_a);
        assert_eq!(id_b, spec.id_b);
        assert_eq!(rtr, spec.rtr);
        assert_eq!(ide, spec.ide);
        assert_eq!(dlc, spec.dlc);
        assert_eq!(&data[..dlc as usize], &spec.data[..dlc as usize]);
    }
}
